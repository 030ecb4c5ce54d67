use crate::devices::{check_state_len, Device, MAX_SPAN};
use crate::errors::DeviceError;

const REGISTER_COUNT: usize = 0x80;
const REGISTER_MASK: u8 = 0x7F;

/// Placeholder peripheral: 0x80 plain byte registers with no side effects.
///
/// Only the low seven offset bits are decoded, so a device spanning the full
/// 256-slot block sees every register twice.
#[derive(Debug, Clone)]
pub struct ScratchPorts {
    span: u16,
    ports: [u8; REGISTER_COUNT],
}

impl Default for ScratchPorts {
    fn default() -> ScratchPorts {
        ScratchPorts::new()
    }
}

impl ScratchPorts {
    /// Claims the whole low-byte range. With only 0x80 registers behind 256
    /// slots, slot `n` and slot `n + 0x80` reach the same register, on top of
    /// the low-byte aliasing every device gets from the bus. Use
    /// `with_span(0x80)` for one register per slot.
    pub fn new() -> ScratchPorts {
        ScratchPorts::with_span(MAX_SPAN)
    }

    /// `span` is clamped to `1..=MAX_SPAN`.
    pub fn with_span(span: u16) -> ScratchPorts {
        ScratchPorts {
            span: span.clamp(1, MAX_SPAN),
            ports: [0; REGISTER_COUNT],
        }
    }

    pub fn registers(&self) -> &[u8] {
        &self.ports
    }

    #[inline(always)]
    fn index(offset: u8) -> usize {
        (offset & REGISTER_MASK) as usize
    }
}

impl Device for ScratchPorts {
    fn name(&self) -> &'static str {
        "scratch"
    }

    fn span(&self) -> u16 {
        self.span
    }

    #[inline]
    fn read(&mut self, offset: u8) -> u8 {
        self.ports[ScratchPorts::index(offset)]
    }

    #[inline]
    fn write(&mut self, offset: u8, value: u8) {
        self.ports[ScratchPorts::index(offset)] = value;
    }

    fn reset(&mut self) {
        self.ports = [0; REGISTER_COUNT];
    }

    fn peek(&self, offset: u8) -> u8 {
        self.ports[ScratchPorts::index(offset)]
    }

    fn save_state(&self) -> Vec<u8> {
        self.ports.to_vec()
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DeviceError> {
        check_state_len(self.name(), state, REGISTER_COUNT)?;
        self.ports.copy_from_slice(state);
        Ok(())
    }
}
