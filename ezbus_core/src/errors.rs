use crate::devices::DeviceId;
use crate::watch::Access;
use std::io;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Slot 0x{slot:02X} is already bound to {bound} (device {bound_id})")]
    SlotConflict {
        slot: u8,
        bound: &'static str,
        bound_id: DeviceId,
    },
    #[error("{device} spans {span:#X} slots and does not fit at base slot 0x{base:02X}")]
    SpanOverflow {
        device: &'static str,
        base: u8,
        span: u16,
    },
    #[error("No device attached with id {0}")]
    UnknownDevice(DeviceId),
    #[error("Bus state holds {actual} device blobs, expected {expected}")]
    StateMismatch { expected: usize, actual: usize },
    #[error("Device state rejected: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{device} state is {actual} bytes, expected {expected}")]
    StateSize {
        device: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Watch table blob is {0} bytes, not a whole number of entries")]
    MalformedBlob(usize),
    #[error("Watch table blob has unknown flag bits 0x{flags:02X} for port 0x{port:04X}")]
    UnknownFlags { port: u16, flags: u8 },
    #[error("Watch table blob lists port 0x{0:04X} more than once")]
    DuplicatePort(u16),
    #[error("Port 0x{0:04X} is not in the watch table")]
    UnknownPort(u16),
    #[error("Port 0x{0:04X} is already in the watch table")]
    PortInUse(u16),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Emulation thread is gone")]
    Disconnected,
    #[error("Emulation thread did not answer in time")]
    Timeout,
    #[error("{0}")]
    Watch(#[from] WatchError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Line {line}: cannot parse \"{text}\"")]
    Syntax { line: usize, text: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Bus configuration error: {0}")]
    Bus(#[from] BusError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Watch table error: {0}")]
    Watch(#[from] WatchError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Non-fatal conditions raised on the emulation path. They are logged and
/// kept in `BusStats`, never returned to the caller of `read`/`write`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("Unmapped port {access} at 0x{port:04X}")]
    UnmappedPortAccess { port: u16, access: Access },
    #[error("{device} received offset 0x{offset:02X} outside its {capacity} registers")]
    InvalidOffset {
        device: &'static str,
        offset: u8,
        capacity: usize,
    },
}
