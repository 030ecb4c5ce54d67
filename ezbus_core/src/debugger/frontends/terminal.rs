use crate::debugger::command::Command;
use crate::debugger::monitor::{PortMonitor, PortRow};
use crate::debugger::Debugger;
use crate::errors::MonitorError;

use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Line-oriented port table console. Reads commands from `input` until
/// `quit` or end of input.
pub struct TerminalDebugger {
    monitor: PortMonitor,
    running: Option<Arc<AtomicBool>>,
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    is_listening: bool,
}

impl TerminalDebugger {
    pub fn new(
        monitor: PortMonitor,
        input: Box<dyn BufRead + Send>,
        output: Box<dyn Write + Send>,
    ) -> TerminalDebugger {
        TerminalDebugger {
            monitor,
            running: None,
            input,
            output,
            is_listening: false,
        }
    }

    pub fn stdio(monitor: PortMonitor) -> TerminalDebugger {
        TerminalDebugger::new(
            monitor,
            Box::new(BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    /// Lets `run`/`pause` drive the emulation thread's script.
    pub fn with_run_flag(mut self, running: Arc<AtomicBool>) -> TerminalDebugger {
        self.running = Some(running);
        self
    }

    fn execute_command(&mut self, command: Command) -> io::Result<()> {
        use crate::debugger::command::Command::*;

        match command {
            ShowUsage => self.show_usage(),
            PrintPorts => self.print_ports(),
            PrintStats => self.print_stats(),
            PrintEvents => self.print_events(),
            PortAdd(port) => {
                let row = self.monitor.add_port(port);
                self.print_result(row.map(|row| vec![row]))
            }
            PortRemove(port) => {
                if !self.monitor.remove_port(port) {
                    writeln!(self.output, "Port 0x{:04X} is not in the table", port)?;
                }
                Ok(())
            }
            PortMove(from, to) => {
                let row = self.monitor.move_port(from, to);
                self.print_result(row.map(|row| vec![row]))
            }
            Export(path) => match self.monitor.export_table(Path::new(&path)) {
                Ok(count) => writeln!(self.output, "Exported {} port(s) to {}", count, path),
                Err(err) => writeln!(self.output, "{}", err),
            },
            Import(path) => match self.monitor.import_table(Path::new(&path)) {
                Ok(count) => writeln!(self.output, "Imported {} port(s) from {}", count, path),
                Err(err) => writeln!(self.output, "{}", err),
            },
            Freeze(port, value) => {
                self.monitor.set_freeze(port, value);
                Ok(())
            }
            Unfreeze(port) => {
                self.monitor.clear_freeze(port);
                Ok(())
            }
            Watch(port, mode) => {
                let (on_read, on_write) = mode.flags();
                self.monitor.set_watch(port, on_read, on_write);
                Ok(())
            }
            SetValue(port, value) => {
                let result = self.monitor.edit_value(port, value);
                self.print_result(result.map(|_| Vec::new()))
            }
            Reset => {
                let result = self.monitor.reset_devices();
                self.print_result(result.map(|_| Vec::new()))
            }
            Run => self.set_running(true),
            Pause => self.set_running(false),
            Quit => {
                self.stop_listening();
                Ok(())
            }
            RepeatCommand(command, count) => {
                for _ in 0..count {
                    self.execute_command((*command).clone())?;
                }
                Ok(())
            }
        }
    }

    fn show_usage(&mut self) -> io::Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        writeln!(out, "Usage:")?;
        writeln!(out, "---------------------------------------------------------")?;
        writeln!(out, "Command Name                      Short       Description")?;
        writeln!(out, "---------------------------------------------------------")?;
        writeln!(out, "PrintPorts                        pp          shows the port table")?;
        writeln!(out, "PortAdd addr                      pa          adds a port to the table")?;
        writeln!(out, "PortRemove addr                   pr          removes a port from the table")?;
        writeln!(out, "PortMove addr new_addr            pm          moves a row and its flags to another address")?;
        writeln!(out, "Freeze addr value                 fz          forces reads of a port to value and drops writes")?;
        writeln!(out, "Unfreeze addr                     uf          removes a freeze")?;
        writeln!(out, "Watch addr r|w|rw|off             wa          reports reads and/or writes of a port")?;
        writeln!(out, "SetValue addr value               sv          edits a port value (re-freezes frozen ports)")?;
        writeln!(out, "Events                            ev          prints and clears pending watch events")?;
        writeln!(out, "Stats                             st          prints bus statistics")?;
        writeln!(out, "Export file                       ex          saves the port table to a file")?;
        writeln!(out, "Import file                       im          replaces the port table with a saved one")?;
        writeln!(out, "Reset                             rs          resets every device")?;
        writeln!(out, "Run / Pause                       ru / ps     starts or stops the port script")?;
        writeln!(out, "RepeatCommand (command) n         r           repeats the given debugger command n times")?;
        writeln!(out, "Quit                              q           leaves the debugger")?;
        writeln!(out)
    }

    fn print_ports(&mut self) -> io::Result<()> {
        let rows = self.monitor.rows();
        self.print_result(rows)
    }

    fn print_stats(&mut self) -> io::Result<()> {
        match self.monitor.stats() {
            Ok(stats) => {
                writeln!(self.output, "{:#?}", stats)
            }
            Err(err) => self.print_error(err),
        }
    }

    fn print_events(&mut self) -> io::Result<()> {
        let events = self.monitor.drain_events();
        if events.is_empty() {
            return writeln!(self.output, "No pending events");
        }
        for event in events {
            writeln!(self.output, "{}", event)?;
        }
        Ok(())
    }

    fn print_result(&mut self, rows: Result<Vec<PortRow>, MonitorError>) -> io::Result<()> {
        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => return self.print_error(err),
        };
        if rows.is_empty() {
            return Ok(());
        }

        writeln!(self.output, "Address   Value   Read   Write   Freeze")?;
        for row in rows {
            writeln!(
                self.output,
                "0x{:04X}    0x{:02X}    {:<5}  {:<5}   {}",
                row.address,
                row.value,
                yes_no(row.read_watch),
                yes_no(row.write_watch),
                yes_no(row.freeze)
            )?;
        }
        Ok(())
    }

    fn print_error(&mut self, err: MonitorError) -> io::Result<()> {
        writeln!(self.output, "{}", err)
    }

    fn set_running(&mut self, is_running: bool) -> io::Result<()> {
        match self.running {
            Some(ref running) => {
                running.store(is_running, Ordering::Release);
                Ok(())
            }
            None => writeln!(self.output, "No port script attached"),
        }
    }

    fn prompt(&mut self) -> io::Result<()> {
        let pending = self.monitor.pending_events();
        if pending > 0 {
            write!(self.output, "[{} events] ezbus -> ", pending)?;
        } else {
            write!(self.output, "ezbus -> ")?;
        }
        self.output.flush()
    }

    fn listen_once(&mut self) -> io::Result<()> {
        self.prompt()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            self.stop_listening();
            return Ok(());
        }

        match Command::parse(&line) {
            Ok(command) => self.execute_command(command),
            Err(err) => writeln!(self.output, "{}", err),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl Debugger for TerminalDebugger {
    fn start_listening(&mut self) {
        self.is_listening = true;

        while self.is_listening {
            if let Err(err) = self.listen_once() {
                log::error!("Debugger console I/O failed: {}", err);
                self.stop_listening();
            }
        }
    }

    fn stop_listening(&mut self) {
        self.is_listening = false;
    }

    fn is_listening(&self) -> bool {
        self.is_listening
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PortBus;
    use crate::devices::ScratchPorts;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::thread;

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedOutput {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn run_script(bus: PortBus, monitor: PortMonitor, script: &str) -> (PortBus, String) {
        let stop = Arc::new(AtomicBool::new(false));
        let emulation_stop = Arc::clone(&stop);
        let emulation = thread::spawn(move || {
            let mut bus = bus;
            while !emulation_stop.load(Ordering::Acquire) {
                bus.service_requests();
                thread::yield_now();
            }
            bus.service_requests();
            bus
        });

        let output = SharedOutput::default();
        let mut debugger = TerminalDebugger::new(
            monitor,
            Box::new(Cursor::new(script.to_string())),
            Box::new(output.clone()),
        );
        debugger.start_listening();
        assert!(!debugger.is_listening());

        stop.store(true, Ordering::Release);
        (emulation.join().unwrap(), output.text())
    }

    #[test]
    fn console_drives_port_table() {
        let mut bus = PortBus::new();
        bus.register(0x00, ScratchPorts::new()).unwrap();
        let monitor = bus.monitor();

        let (mut bus, text) = run_script(
            bus,
            monitor,
            "pa 0xE010\nsv 0xE010 0x42\nfz 0xE010 0x99\nwa 0xE010 rw\npp\nquit\npp\n",
        );

        assert!(text.contains("0xE010    0x99    yes    yes     yes"));
        assert_eq!(bus.peek(0x0010), Some(0x42));
        assert_eq!(bus.read(0x0010), 0x99);
    }

    #[test]
    fn console_moves_exports_and_imports_rows() {
        let mut bus = PortBus::new();
        bus.register(0x00, ScratchPorts::with_span(0x80)).unwrap();
        let monitor = bus.monitor();
        let path = std::env::temp_dir().join(format!("ezbus_console_{}.bin", std::process::id()));
        let path = path.display().to_string();

        let script = format!(
            "fz 0xE010 0x99\npm 0xE010 0xE011\nex {path}\nuf 0xE011\nim {path}\npm 0x0001 0x0002\n",
            path = path
        );
        let (mut bus, text) = run_script(bus, monitor, &script);
        std::fs::remove_file(&path).unwrap();

        assert!(text.contains("0xE011    0x99"));
        assert!(text.contains("Exported 1 port(s)"));
        assert!(text.contains("Imported 1 port(s)"));
        assert!(text.contains("Port 0x0001 is not in the watch table"));
        // The import brought the freeze back
        assert_eq!(bus.read(0x0011), 0x99);
        assert_eq!(bus.read(0x0010), 0x00);
    }

    #[test]
    fn bad_commands_are_reported_and_eof_stops() {
        let mut bus = PortBus::new();
        let monitor = bus.monitor();

        let (_, text) = run_script(bus, monitor, "bogus\nrun\n");
        assert!(text.contains("Error while parsing command \"bogus\""));
        assert!(text.contains("No port script attached"));
    }

    #[test]
    fn run_and_pause_toggle_flag() {
        let mut bus = PortBus::new();
        let monitor = bus.monitor();
        let running = Arc::new(AtomicBool::new(false));

        let output = SharedOutput::default();
        let mut debugger = TerminalDebugger::new(
            monitor,
            Box::new(Cursor::new("run\n".to_string())),
            Box::new(output),
        )
        .with_run_flag(Arc::clone(&running));
        debugger.start_listening();
        assert!(running.load(Ordering::Acquire));
        drop(bus);
    }
}
