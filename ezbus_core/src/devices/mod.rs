mod read_only_ports;
mod scratch_ports;

pub use self::read_only_ports::ReadOnlyPorts;
pub use self::scratch_ports::ScratchPorts;

use crate::errors::{DeviceError, Diagnostic};
use enum_dispatch::enum_dispatch;
use std::fmt;

/// Number of slots a single device may claim at most.
pub const MAX_SPAN: u16 = 0x100;

/// A peripheral reachable through the port bus.
///
/// `offset` is the decoded slot minus the base slot the device was bound at,
/// so it is always below `span()`. Devices with fewer registers than slots
/// re-mask it themselves.
#[enum_dispatch]
pub trait Device {
    fn name(&self) -> &'static str;

    /// Number of consecutive slots the device claims, in `1..=MAX_SPAN`.
    fn span(&self) -> u16;

    fn read(&mut self, offset: u8) -> u8;
    fn write(&mut self, offset: u8, value: u8);

    /// Restores the documented power-on state. The device stays bound.
    fn reset(&mut self);

    /// Reads without side effects, for debugger display.
    fn peek(&self, offset: u8) -> u8;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, state: &[u8]) -> Result<(), DeviceError>;
}

#[enum_dispatch(Device)]
#[derive(Debug, Clone)]
pub enum DeviceImpl {
    ScratchPorts(ScratchPorts),
    ReadOnlyPorts(ReadOnlyPorts),
}

/// Handle returned when a device is attached to a `PortBus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Validates an offset against a device's register count.
///
/// An out-of-range offset means the bus decoded wrong, so debug builds stop
/// right there. Release builds log it and the caller ignores the access.
pub(crate) fn checked_offset(device: &'static str, offset: u8, capacity: usize) -> Option<usize> {
    let index = offset as usize;
    if index < capacity {
        return Some(index);
    }

    let diagnostic = Diagnostic::InvalidOffset {
        device,
        offset,
        capacity,
    };
    debug_assert!(false, "{}", diagnostic);
    log::error!("{}", diagnostic);
    None
}

pub(crate) fn check_state_len(
    device: &'static str,
    state: &[u8],
    expected: usize,
) -> Result<(), DeviceError> {
    if state.len() != expected {
        return Err(DeviceError::StateSize {
            device,
            expected,
            actual: state.len(),
        });
    }
    Ok(())
}
