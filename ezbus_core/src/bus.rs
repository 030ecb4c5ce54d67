use crate::debugger::monitor::{BusRequest, PortMonitor, PortRow};
use crate::devices::{Device, DeviceId, DeviceImpl};
use crate::errors::{BusError, Diagnostic};
use crate::watch::{Access, WatchEvent, WatchTable};
use crate::{EVENT_QUEUE_DEPTH, SLOT_COUNT, UNMAPPED_SENTINEL};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

/// Only the low byte of a port takes part in decoding, so every port with the
/// same low byte reaches the same slot.
#[inline(always)]
pub const fn slot_index(port: u16) -> u8 {
    (port & 0xFF) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    device: DeviceId,
    offset: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub reads: u64,
    pub writes: u64,
    pub unmapped_reads: u64,
    pub unmapped_writes: u64,
    pub frozen_reads: u64,
    pub frozen_writes: u64,
    pub watch_events: u64,
    pub dropped_events: u64,
    pub last_diagnostic: Option<Diagnostic>,
}

/// Opaque per-device state blobs, in attach order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusState {
    pub devices: Vec<Vec<u8>>,
}

pub struct PortBus {
    devices: Vec<DeviceImpl>,
    slots: [Option<Binding>; SLOT_COUNT],
    watch: Arc<WatchTable>,
    stats: BusStats,

    events: Option<Sender<WatchEvent>>,
    requests: Option<Receiver<BusRequest>>,
    monitor: Option<PortMonitor>,
}

impl Default for PortBus {
    fn default() -> PortBus {
        PortBus::new()
    }
}

impl PortBus {
    pub fn new() -> PortBus {
        PortBus::with_watch_table(Arc::new(WatchTable::new()))
    }

    pub fn with_watch_table(watch: Arc<WatchTable>) -> PortBus {
        PortBus {
            devices: Vec::new(),
            slots: [None; SLOT_COUNT],
            watch,
            stats: BusStats::default(),
            events: None,
            requests: None,
            monitor: None,
        }
    }

    /// Takes ownership of a device without mapping it anywhere yet.
    pub fn attach<D: Into<DeviceImpl>>(&mut self, device: D) -> DeviceId {
        let id = DeviceId(self.devices.len());
        self.devices.push(device.into());
        id
    }

    /// Maps an attached device at `base` and the slots after it, as many as
    /// the device spans.
    ///
    /// Nothing is mapped if any of those slots belongs to another device.
    /// Binding the same device again is fine.
    pub fn bind(&mut self, base: u8, id: DeviceId) -> Result<(), BusError> {
        let (name, span) = match self.devices.get(id.0) {
            Some(device) => (device.name(), device.span()),
            None => return Err(BusError::UnknownDevice(id)),
        };

        let start = base as usize;
        let end = start + span as usize;
        if span == 0 || end > SLOT_COUNT {
            return Err(BusError::SpanOverflow {
                device: name,
                base,
                span,
            });
        }

        for slot in start..end {
            if let Some(bound) = self.slots[slot] {
                if bound.device != id {
                    return Err(BusError::SlotConflict {
                        slot: slot as u8,
                        bound: self.devices[bound.device.0].name(),
                        bound_id: bound.device,
                    });
                }
            }
        }

        for (offset, slot) in (start..end).enumerate() {
            self.slots[slot] = Some(Binding {
                device: id,
                offset: offset as u8,
            });
        }

        log::info!(
            "Bound {} {} at slots 0x{:02X}..=0x{:02X}",
            name,
            id,
            start,
            end - 1
        );
        Ok(())
    }

    /// `attach` followed by `bind`. The device is dropped if binding fails.
    pub fn register<D: Into<DeviceImpl>>(
        &mut self,
        base: u8,
        device: D,
    ) -> Result<DeviceId, BusError> {
        let id = self.attach(device);
        if let Err(err) = self.bind(base, id) {
            self.devices.pop();
            return Err(err);
        }
        Ok(id)
    }

    #[inline]
    pub fn read(&mut self, port: u16) -> u8 {
        let binding = match self.slots[slot_index(port) as usize] {
            Some(binding) => binding,
            None => {
                self.unmapped(port, Access::Read);
                return UNMAPPED_SENTINEL;
            }
        };

        self.stats.reads += 1;
        let raw = self.devices[binding.device.0].read(binding.offset);

        let entry = self.watch.lookup(port);
        let (value, frozen) = match self.watch.read_override(port, &entry) {
            Some(value) => {
                self.stats.frozen_reads += 1;
                (value, true)
            }
            None => (raw, false),
        };

        if entry.watch_read {
            self.raise(WatchEvent {
                port,
                access: Access::Read,
                value,
                frozen,
            });
        }
        value
    }

    #[inline]
    pub fn write(&mut self, port: u16, value: u8) {
        let binding = match self.slots[slot_index(port) as usize] {
            Some(binding) => binding,
            None => {
                self.unmapped(port, Access::Write);
                return;
            }
        };

        self.stats.writes += 1;
        let entry = self.watch.lookup(port);
        if entry.freeze {
            self.stats.frozen_writes += 1;
        } else {
            self.devices[binding.device.0].write(binding.offset, value);
        }

        if entry.watch_write {
            self.raise(WatchEvent {
                port,
                access: Access::Write,
                value,
                frozen: entry.freeze,
            });
        }
    }

    /// Resets every bound device once, in ascending slot order.
    pub fn reset(&mut self) {
        let mut is_reset = vec![false; self.devices.len()];
        for binding in self.slots.iter().flatten() {
            let index = binding.device.0;
            if !is_reset[index] {
                self.devices[index].reset();
                is_reset[index] = true;
            }
        }
        log::info!(
            "Bus reset, {} device(s)",
            is_reset.iter().filter(|&&done| done).count()
        );
    }

    /// Live device value, bypassing freezes and without read side effects.
    pub fn peek(&self, port: u16) -> Option<u8> {
        self.slots[slot_index(port) as usize]
            .map(|binding| self.devices[binding.device.0].peek(binding.offset))
    }

    /// Debugger write straight to the device: no freeze check, no watch event.
    /// Returns `false` for an unmapped port.
    pub fn poke(&mut self, port: u16, value: u8) -> bool {
        match self.slots[slot_index(port) as usize] {
            Some(binding) => {
                self.devices[binding.device.0].write(binding.offset, value);
                true
            }
            None => {
                log::debug!("Debugger write to unmapped port 0x{:04X} ignored", port);
                false
            }
        }
    }

    /// The row a debugger port table shows for `port`: the value a CPU read
    /// would see right now, plus the port's watch flags.
    pub fn status(&self, port: u16) -> PortRow {
        let entry = self.watch.entry(port).unwrap_or_default();
        let value = match self.peek(port) {
            Some(live) => self.watch.read_override(port, &entry).unwrap_or(live),
            None => UNMAPPED_SENTINEL,
        };

        PortRow {
            address: port,
            value,
            read_watch: entry.watch_read,
            write_watch: entry.watch_write,
            freeze: entry.freeze,
        }
    }

    pub fn rows(&self) -> Vec<PortRow> {
        self.watch
            .entries()
            .into_iter()
            .map(|(port, _)| self.status(port))
            .collect()
    }

    pub fn device(&self, id: DeviceId) -> Option<&DeviceImpl> {
        self.devices.get(id.0)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut DeviceImpl> {
        self.devices.get_mut(id.0)
    }

    pub fn device_at(&self, slot: u8) -> Option<DeviceId> {
        self.slots[slot as usize].map(|binding| binding.device)
    }

    pub fn device_name_at(&self, slot: u8) -> Option<&'static str> {
        self.device_at(slot)
            .map(|id| self.devices[id.0].name())
    }

    pub fn watch(&self) -> &Arc<WatchTable> {
        &self.watch
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = BusStats::default();
    }

    pub fn save_state(&self) -> BusState {
        BusState {
            devices: self.devices.iter().map(|d| d.save_state()).collect(),
        }
    }

    /// Restores device state. Devices before a rejected blob keep the state
    /// they were just given.
    pub fn load_state(&mut self, state: &BusState) -> Result<(), BusError> {
        if state.devices.len() != self.devices.len() {
            let err = BusError::StateMismatch {
                expected: self.devices.len(),
                actual: state.devices.len(),
            };
            log::warn!("{}", err);
            return Err(err);
        }
        for (device, blob) in self.devices.iter_mut().zip(state.devices.iter()) {
            if let Err(err) = device.load_state(blob) {
                log::warn!("{}", err);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Handle for debugger threads. All handles share one request queue and
    /// one event queue; an event is delivered to exactly one receiver.
    pub fn monitor(&mut self) -> PortMonitor {
        if let Some(ref monitor) = self.monitor {
            return monitor.clone();
        }

        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_DEPTH);
        let monitor = PortMonitor::new(Arc::clone(&self.watch), request_tx, event_rx);

        self.requests = Some(request_rx);
        self.events = Some(event_tx);
        self.monitor = Some(monitor.clone());
        monitor
    }

    /// Answers everything debugger threads have queued, without waiting for
    /// more. Call between instruction steps.
    pub fn service_requests(&mut self) -> usize {
        let mut handled = 0;
        while let Some(request) = self.requests.as_ref().and_then(|rx| rx.try_recv().ok()) {
            self.handle_request(request);
            handled += 1;
        }
        handled
    }

    fn handle_request(&mut self, request: BusRequest) {
        // A debugger that gave up waiting has dropped its reply receiver
        match request {
            BusRequest::Status { port, reply } => {
                let _ = reply.send(self.status(port));
            }
            BusRequest::Rows { reply } => {
                let _ = reply.send(self.rows());
            }
            BusRequest::Stats { reply } => {
                let _ = reply.send(self.stats);
            }
            BusRequest::Poke { port, value } => {
                self.poke(port, value);
            }
            BusRequest::Reset => self.reset(),
        }
    }

    fn raise(&mut self, event: WatchEvent) {
        self.stats.watch_events += 1;
        log::trace!("Watch hit: {}", event);

        if let Some(ref events) = self.events {
            if let Err(TrySendError::Full(_)) = events.try_send(event) {
                self.stats.dropped_events += 1;
                if self.stats.dropped_events % EVENT_QUEUE_DEPTH as u64 == 1 {
                    log::warn!(
                        "Watch event queue full, {} event(s) dropped so far",
                        self.stats.dropped_events
                    );
                }
            }
        }
    }

    #[cold]
    fn unmapped(&mut self, port: u16, access: Access) {
        match access {
            Access::Read => self.stats.unmapped_reads += 1,
            Access::Write => self.stats.unmapped_writes += 1,
        }
        let diagnostic = Diagnostic::UnmappedPortAccess { port, access };
        log::debug!("{}", diagnostic);
        self.stats.last_diagnostic = Some(diagnostic);
    }
}
