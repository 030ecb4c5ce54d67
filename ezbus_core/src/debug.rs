use crate::bus::slot_index;
use crate::watch::Access;

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::Path;

/// One script-driven bus access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub index: u64,
    pub access: Access,
    pub port: u16,
    pub value: u8,
    /// `None` when the slot was unmapped.
    pub device: Option<&'static str>,
}

impl Trace {
    pub fn slot(&self) -> u8 {
        slot_index(self.port)
    }
}

impl Display for Trace {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let direction = match self.access {
            Access::Read => "IN ",
            Access::Write => "OUT",
        };
        write!(
            fmt,
            "{:>8}\t{}\t0x{:04X}\tslot 0x{:02X}\t0x{:02X}\t{}",
            self.index,
            direction,
            self.port,
            self.slot(),
            self.value,
            self.device.unwrap_or("<unmapped>")
        )
    }
}

#[derive(Default)]
pub struct Tracer {
    is_enabled: bool,
    traces: Vec<Trace>,
}

impl Tracer {
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn set_enabled(&mut self, is_enabled: bool) {
        self.is_enabled = is_enabled;
    }

    pub fn add_trace(&mut self, trace: Trace) {
        if self.is_enabled {
            self.traces.push(trace);
        }
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn write_to_file(&self, file_path: &Path) -> io::Result<()> {
        let lines: Vec<String> = self.traces.iter().map(|t| t.to_string()).collect();
        fs::write(file_path, lines.join("\n"))
    }

    pub fn has_traces(&self) -> bool {
        !self.traces.is_empty()
    }

    pub fn clear_traces(&mut self) {
        self.traces.clear();
    }
}
