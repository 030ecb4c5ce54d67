//! The debugger's only way into the bus.
//!
//! Freeze and watch settings go straight to the shared `WatchTable`. Anything
//! that needs device state is queued for the emulation thread, which answers
//! from `PortBus::service_requests` between steps; the caller waits for the
//! reply with a timeout, the emulation thread never waits on the caller.

use crate::bus::BusStats;
use crate::errors::{CoreError, MonitorError};
use crate::watch::{WatchEvent, WatchTable};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(250);

/// One row of a debugger port table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRow {
    pub address: u16,
    pub value: u8,
    pub read_watch: bool,
    pub write_watch: bool,
    pub freeze: bool,
}

pub(crate) enum BusRequest {
    Status { port: u16, reply: Sender<PortRow> },
    Rows { reply: Sender<Vec<PortRow>> },
    Stats { reply: Sender<BusStats> },
    Poke { port: u16, value: u8 },
    Reset,
}

#[derive(Clone)]
pub struct PortMonitor {
    watch: Arc<WatchTable>,
    requests: Sender<BusRequest>,
    events: Receiver<WatchEvent>,
    reply_timeout: Duration,
}

impl PortMonitor {
    pub(crate) fn new(
        watch: Arc<WatchTable>,
        requests: Sender<BusRequest>,
        events: Receiver<WatchEvent>,
    ) -> PortMonitor {
        PortMonitor {
            watch,
            requests,
            events,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> PortMonitor {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn watch(&self) -> &WatchTable {
        &self.watch
    }

    /// Adds a port table row, creating its watch entry.
    pub fn add_port(&self, port: u16) -> Result<PortRow, MonitorError> {
        self.watch.add(port);
        self.status(port)
    }

    /// Removes a port table row. Returns `false` if there was none.
    pub fn remove_port(&self, port: u16) -> bool {
        self.watch.remove(port).is_some()
    }

    /// Edits a row's address: the entry moves with its flags and freeze.
    pub fn move_port(&self, from: u16, to: u16) -> Result<PortRow, MonitorError> {
        self.watch.move_entry(from, to)?;
        self.status(to)
    }

    /// Writes the port table to `path`. Returns the number of rows written.
    pub fn export_table(&self, path: &Path) -> Result<usize, CoreError> {
        let entries = self.watch.len();
        fs::write(path, self.watch.save_state())?;
        Ok(entries)
    }

    /// Replaces the port table with one written by `export_table`.
    pub fn import_table(&self, path: &Path) -> Result<usize, CoreError> {
        let blob = fs::read(path)?;
        self.watch.load_state(&blob)?;
        Ok(self.watch.len())
    }

    pub fn set_freeze(&self, port: u16, value: u8) {
        self.watch.set_freeze(port, value);
    }

    pub fn clear_freeze(&self, port: u16) {
        self.watch.clear_freeze(port);
    }

    pub fn set_watch(&self, port: u16, on_read: bool, on_write: bool) {
        self.watch.set_watch(port, on_read, on_write);
    }

    /// Edits the value column: re-freezes a frozen port at the new value,
    /// otherwise writes it to the device.
    pub fn edit_value(&self, port: u16, value: u8) -> Result<(), MonitorError> {
        match self.watch.entry(port) {
            Some(entry) if entry.freeze => {
                self.watch.set_freeze(port, value);
                Ok(())
            }
            _ => self.send(BusRequest::Poke { port, value }),
        }
    }

    /// Applies a whole edited row: watch flags, then freeze state and value.
    pub fn edit_row(&self, row: PortRow) -> Result<(), MonitorError> {
        self.watch
            .set_watch(row.address, row.read_watch, row.write_watch);
        if row.freeze {
            self.watch.set_freeze(row.address, row.value);
            Ok(())
        } else {
            self.watch.clear_freeze(row.address);
            self.send(BusRequest::Poke {
                port: row.address,
                value: row.value,
            })
        }
    }

    pub fn status(&self, port: u16) -> Result<PortRow, MonitorError> {
        self.request(|reply| BusRequest::Status { port, reply })
    }

    pub fn rows(&self) -> Result<Vec<PortRow>, MonitorError> {
        self.request(|reply| BusRequest::Rows { reply })
    }

    pub fn stats(&self) -> Result<BusStats, MonitorError> {
        self.request(|reply| BusRequest::Stats { reply })
    }

    pub fn reset_devices(&self) -> Result<(), MonitorError> {
        self.send(BusRequest::Reset)
    }

    pub fn events(&self) -> &Receiver<WatchEvent> {
        &self.events
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn drain_events(&self) -> Vec<WatchEvent> {
        self.events.try_iter().collect()
    }

    fn send(&self, request: BusRequest) -> Result<(), MonitorError> {
        self.requests
            .send(request)
            .map_err(|_| MonitorError::Disconnected)
    }

    fn request<T, F>(&self, make_request: F) -> Result<T, MonitorError>
    where
        F: FnOnce(Sender<T>) -> BusRequest,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(make_request(reply_tx))?;
        reply_rx
            .recv_timeout(self.reply_timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => MonitorError::Timeout,
                RecvTimeoutError::Disconnected => MonitorError::Disconnected,
            })
    }
}
