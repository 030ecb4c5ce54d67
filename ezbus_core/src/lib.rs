pub mod bus;
pub mod debug;
pub mod debugger;
pub mod devices;
pub mod errors;
pub mod script;
pub mod watch;

use crate::bus::PortBus;
use crate::debug::{Trace, Tracer};
use crate::debugger::monitor::PortMonitor;
use crate::devices::{ReadOnlyPorts, ScratchPorts};
use crate::script::{PortScript, ScriptOp};
use crate::watch::Access;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use crate::bus::{BusState, BusStats};
pub use crate::errors::{BusError, CoreError, Diagnostic, MonitorError};
pub use crate::watch::{WatchEntry, WatchEvent, WatchState, WatchTable};

/// Value returned by reads of a slot no device is bound to.
pub const UNMAPPED_SENTINEL: u8 = 0xFF;
pub const SLOT_COUNT: usize = 0x100;
pub const PORT_COUNT: usize = 0x10000;
/// Watch events buffered for debuggers before new ones are dropped.
pub const EVENT_QUEUE_DEPTH: usize = 4096;

// Default machine layout
pub const SCRATCH_BASE_SLOT: u8 = 0x00;
pub const SCRATCH_SPAN: u16 = 0x80;
pub const ID_BASE_SLOT: u8 = 0x80;
pub const DEFAULT_ID_BYTES: [u8; 16] = *b"ez80 port bus\0\0\0";

/// An emulator instance: a port bus driven by a port access script.
pub struct Core {
    bus: PortBus,
    script: PortScript,
    running: Arc<AtomicBool>,
    ops_executed: u64,
}

impl Core {
    /// Default layout: scratch registers in the low half of the slot table,
    /// identification bytes right after them, the rest unmapped.
    pub fn new() -> Result<Core, CoreError> {
        let mut bus = PortBus::new();
        bus.register(SCRATCH_BASE_SLOT, ScratchPorts::with_span(SCRATCH_SPAN))?;
        bus.register(ID_BASE_SLOT, ReadOnlyPorts::new(&DEFAULT_ID_BYTES))?;
        Ok(Core::with_bus(bus))
    }

    pub fn with_bus(bus: PortBus) -> Core {
        Core {
            bus,
            script: PortScript::default(),
            running: Arc::new(AtomicBool::new(false)),
            ops_executed: 0,
        }
    }

    pub fn load_script(&mut self, file_path: &Path) -> Result<(), CoreError> {
        self.script = PortScript::from_file(file_path)?;
        Ok(())
    }

    pub fn set_script(&mut self, script: PortScript) {
        self.script = script;
    }

    pub fn script(&self) -> &PortScript {
        &self.script
    }

    pub fn bus(&mut self) -> &mut PortBus {
        &mut self.bus
    }

    pub fn attach_monitor(&mut self) -> PortMonitor {
        self.bus.monitor()
    }

    /// Shared flag a debugger uses to start and stop the script.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn unpause(&mut self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn pause(&mut self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ops_executed(&self) -> u64 {
        self.ops_executed
    }

    /// Answers pending debugger requests, then runs the next script op if
    /// the script is running. Returns the op that ran.
    pub fn step(&mut self, tracer: &mut Tracer) -> Option<ScriptOp> {
        self.bus.service_requests();

        if !self.is_running() {
            return None;
        }
        let op = self.script.next_op()?;

        let (access, port, value) = match op {
            ScriptOp::In(port) => (Access::Read, port, self.bus.read(port)),
            ScriptOp::Out(port, value) => {
                self.bus.write(port, value);
                (Access::Write, port, value)
            }
        };

        if tracer.is_enabled() {
            tracer.add_trace(Trace {
                index: self.ops_executed,
                access,
                port,
                value,
                device: self.bus.device_name_at(bus::slot_index(port)),
            });
        }
        self.ops_executed += 1;
        Some(op)
    }

    /// Resets every device and restarts the script from its first op.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.script.rewind();
    }
}
