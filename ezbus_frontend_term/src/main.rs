use ezbus_core::debug::Tracer;
use ezbus_core::debugger::frontends::terminal::TerminalDebugger;
use ezbus_core::debugger::{Debugger, DebuggerFrontend};
use ezbus_core::script::PortScript;
use ezbus_core::{Core, CoreError};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_OPS_PER_SECOND: u64 = 1000;
const PAUSED_POLL_INTERVAL: Duration = Duration::from_millis(5);

// Polls a status port, echoes into scratch and reads the identification bytes
const DEMO_SCRIPT: &str = "\
# status poll
in  0xE010
out 0x0011 0x01
in  0x0011
out 0x0011 0x00
# identification
in  0x0080
in  0x0081
# unmapped
in  0x00F0
";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut script_path: Option<PathBuf> = None;
    let mut trace_path: Option<PathBuf> = None;
    let mut ops_per_second = DEFAULT_OPS_PER_SECOND;
    let mut start_paused = false;

    let mut arg_index = 1;
    while arg_index < args.len() {
        let arg = &args[arg_index];
        if arg == "--paused" {
            start_paused = true;
            arg_index += 1;
        } else if arg == "--trace" {
            match args.get(arg_index + 1) {
                Some(path) => trace_path = Some(PathBuf::from(path)),
                None => usage(),
            }
            arg_index += 2;
        } else if arg == "--rate" {
            match args.get(arg_index + 1).and_then(|rate| rate.parse().ok()) {
                Some(rate) => ops_per_second = rate,
                None => usage(),
            }
            arg_index += 2;
        } else if arg.starts_with("--") {
            usage();
        } else {
            script_path = Some(PathBuf::from(arg));
            arg_index += 1;
        }
    }

    let mut core = match Core::new() {
        Ok(core) => core,
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    };

    let loaded = match script_path {
        Some(ref path) => core.load_script(path),
        None => PortScript::parse(DEMO_SCRIPT)
            .map(|script| core.set_script(script))
            .map_err(CoreError::from),
    };
    if let Err(err) = loaded {
        log::error!("{}", err);
        std::process::exit(1);
    }

    if !start_paused {
        core.unpause();
    }

    start(core, trace_path, ops_per_second);
}

fn usage() -> ! {
    println!("Usage: ezbus [script_path] [--trace file] [--rate ops_per_second] [--paused]");
    std::process::exit(1);
}

pub fn start(mut core: Core, trace_path: Option<PathBuf>, ops_per_second: u64) {
    let monitor = core.attach_monitor();
    let running = core.running_flag();
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut tracer = Tracer::default();
    tracer.set_enabled(trace_path.is_some());

    let emulation_shutdown = Arc::clone(&shutdown);
    let emulation = thread::spawn(move || {
        run_emulation(core, &mut tracer, ops_per_second, &emulation_shutdown);
        tracer
    });

    let mut debugger =
        DebuggerFrontend::from(TerminalDebugger::stdio(monitor).with_run_flag(running));
    debugger.start_listening();

    shutdown.store(true, Ordering::Release);
    let tracer = match emulation.join() {
        Ok(tracer) => tracer,
        Err(_) => {
            log::error!("Emulation thread panicked");
            std::process::exit(1);
        }
    };

    if let Some(path) = trace_path {
        if tracer.has_traces() {
            match tracer.write_to_file(&path) {
                Ok(()) => log::info!(
                    "Wrote {} trace lines to {}",
                    tracer.traces().len(),
                    path.display()
                ),
                Err(err) => log::error!("Cannot write trace to {}: {}", path.display(), err),
            }
        }
    }
}

fn run_emulation(
    mut core: Core,
    tracer: &mut Tracer,
    ops_per_second: u64,
    shutdown: &AtomicBool,
) {
    let op_interval = if ops_per_second == 0 {
        None
    } else {
        Some(Duration::from_nanos(1_000_000_000 / ops_per_second))
    };

    let mut next_op = Instant::now();
    while !shutdown.load(Ordering::Acquire) {
        if !core.is_running() {
            // Keeps the console answered while the script is stopped
            core.step(tracer);
            thread::sleep(PAUSED_POLL_INTERVAL);
            next_op = Instant::now();
            continue;
        }

        core.step(tracer);

        if let Some(interval) = op_interval {
            next_op += interval;
            let now = Instant::now();
            if next_op > now {
                thread::sleep(next_op - now);
            } else {
                next_op = now;
            }
        }
    }

    log::info!("Emulation stopped after {} port ops", core.ops_executed());
}
