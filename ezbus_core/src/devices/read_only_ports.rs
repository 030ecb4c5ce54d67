use crate::devices::{check_state_len, checked_offset, Device, MAX_SPAN};
use crate::errors::DeviceError;
use crate::UNMAPPED_SENTINEL;

/// A block of fixed identification bytes. Writes are ignored and reset leaves
/// the contents alone.
///
/// Offsets are not re-masked: the span is the number of bytes.
#[derive(Debug, Clone)]
pub struct ReadOnlyPorts {
    bytes: Vec<u8>,
}

impl ReadOnlyPorts {
    /// Anything past `MAX_SPAN` bytes is dropped; an empty slice becomes a
    /// single sentinel byte.
    pub fn new(bytes: &[u8]) -> ReadOnlyPorts {
        let mut bytes = bytes[..bytes.len().min(MAX_SPAN as usize)].to_vec();
        if bytes.is_empty() {
            bytes.push(UNMAPPED_SENTINEL);
        }
        ReadOnlyPorts { bytes }
    }

    fn byte_at(&self, offset: u8) -> u8 {
        checked_offset(self.name(), offset, self.bytes.len())
            .map_or(UNMAPPED_SENTINEL, |index| self.bytes[index])
    }
}

impl Device for ReadOnlyPorts {
    fn name(&self) -> &'static str {
        "read-only"
    }

    fn span(&self) -> u16 {
        self.bytes.len() as u16
    }

    fn read(&mut self, offset: u8) -> u8 {
        self.byte_at(offset)
    }

    fn write(&mut self, offset: u8, _value: u8) {
        checked_offset(self.name(), offset, self.bytes.len());
    }

    fn reset(&mut self) {}

    fn peek(&self, offset: u8) -> u8 {
        self.byte_at(offset)
    }

    fn save_state(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DeviceError> {
        check_state_len(self.name(), state, self.bytes.len())?;
        self.bytes.copy_from_slice(state);
        Ok(())
    }
}
