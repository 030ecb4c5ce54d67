use ezbus_core::debug::Tracer;
use ezbus_core::script::PortScript;
use ezbus_core::Core;
use std::time::Instant;

const OPS_TO_RUN: u64 = 20_000_000;

const BENCH_SCRIPT: &str = "\
out 0x0010 0x42
in  0xE010
out 0x1111 0x01
in  0x0011
in  0x0080
in  0x00F0
";

fn main() {
    let mut core = match Core::new() {
        Ok(core) => core,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    match PortScript::parse(BENCH_SCRIPT) {
        Ok(script) => core.set_script(script),
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }

    // A debugger is attached but idle, like an interactive session
    let monitor = core.attach_monitor();
    monitor.set_freeze(0x1111, 0x99);
    monitor.set_watch(0xE010, true, false);

    let mut tracer = Tracer::default();
    core.unpause();

    println!("Running {} port ops...", OPS_TO_RUN);
    let start_time = Instant::now();
    bench(&mut core, &mut tracer, OPS_TO_RUN);
    let cur_time = Instant::now();

    let seconds = cur_time.duration_since(start_time).as_millis() as f64 / 1000.0;
    let stats = core.bus().stats();
    println!("Ops: {}", core.ops_executed());
    println!("Watch events: {} ({} dropped)", stats.watch_events, stats.dropped_events);
    println!("Seconds: {}", seconds);
    if seconds > 0.0 {
        println!(
            "Ops per second: {}",
            (core.ops_executed() as f64 / seconds).floor()
        );
    }
}

fn bench(core: &mut Core, tracer: &mut Tracer, max_ops: u64) {
    while core.ops_executed() < max_ops {
        core.step(tracer);
    }
}
