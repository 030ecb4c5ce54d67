use crate::debugger::frontends::terminal::TerminalDebugger;
use enum_dispatch::enum_dispatch;

pub mod command;
pub mod frontends;
pub mod monitor;

#[enum_dispatch]
pub trait Debugger {
    /// Runs the debugger's command loop until it is told to stop.
    fn start_listening(&mut self);
    fn stop_listening(&mut self);

    fn is_listening(&self) -> bool;
}

#[enum_dispatch(Debugger)]
pub enum DebuggerFrontend {
    TerminalDebugger,
}
