use ezbus_core::bus::PortBus;
use ezbus_core::devices::ScratchPorts;
use ezbus_core::watch::WatchTable;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const LIVE: u8 = 0x42;
const FROZEN_A: u8 = 0x11;
const FROZEN_B: u8 = 0xEE;
const TOGGLES: usize = 20_000;

#[test]
fn freeze_toggling_never_tears_reads() {
    let watch = Arc::new(WatchTable::new());
    let mut bus = PortBus::with_watch_table(Arc::clone(&watch));
    bus.register(0x00, ScratchPorts::new()).unwrap();
    bus.write(0x0010, LIVE);

    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));

    let control = {
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        let watch = Arc::clone(&watch);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..TOGGLES {
                match i % 3 {
                    0 => watch.set_freeze(0xE010, FROZEN_A),
                    1 => watch.set_freeze(0xE010, FROZEN_B),
                    _ => watch.clear_freeze(0xE010),
                }
                watch.set_watch(0xE010, i % 2 == 0, i % 2 == 1);
            }
            done.store(true, Ordering::Release);
        })
    };

    let emulation = thread::spawn(move || {
        barrier.wait();
        let mut reads = 0u64;
        while !done.load(Ordering::Acquire) || reads < 1000 {
            for port in [0x0010u16, 0xE010] {
                let value = bus.read(port);
                assert!(
                    value == LIVE || value == FROZEN_A || value == FROZEN_B,
                    "torn read 0x{:02X} at 0x{:04X}",
                    value,
                    port
                );
            }
            // Writes to the frozen address may be dropped, never corrupted
            bus.write(0xE010, LIVE);
            reads += 1;
        }
        bus
    });

    control.join().unwrap();
    let mut bus = emulation.join().unwrap();

    watch.clear_freeze(0xE010);
    assert_eq!(bus.read(0x0010), LIVE);
}

#[test]
fn table_entries_stay_consistent_under_writers() {
    let watch = Arc::new(WatchTable::new());
    let barrier = Arc::new(Barrier::new(4));

    let writers: Vec<_> = (0..3u16)
        .map(|n| {
            let watch = Arc::clone(&watch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..5_000u16 {
                    let port = (n << 8) | (i & 0x3F);
                    watch.set_freeze(port, n as u8);
                    if i % 4 == 0 {
                        watch.remove(port);
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    for _ in 0..1000 {
        for (port, entry) in watch.entries() {
            if entry.freeze {
                assert_eq!(entry.frozen_value as u16, port >> 8);
            }
        }
        thread::sleep(Duration::from_micros(10));
    }

    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(watch.len(), watch.entries().len());
}

#[test]
fn restoring_the_table_keeps_frozen_ports_frozen() {
    let watch = Arc::new(WatchTable::new());
    let mut bus = PortBus::with_watch_table(Arc::clone(&watch));
    bus.register(0x00, ScratchPorts::with_span(0x80)).unwrap();
    bus.write(0x0010, LIVE);
    watch.set_freeze(0x0010, FROZEN_A);

    // Both tables freeze 0x0010; they differ elsewhere
    let first = watch.save_state();
    watch.set_watch(0x0020, true, true);
    let second = watch.save_state();

    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));

    let control = {
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        let watch = Arc::clone(&watch);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..2_000 {
                let blob = if i % 2 == 0 { &first } else { &second };
                watch.load_state(blob).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let emulation = thread::spawn(move || {
        barrier.wait();
        let mut leaked_writes = 0u64;
        let mut unfrozen_reads = 0u64;
        let mut n = 0u8;
        while !done.load(Ordering::Acquire) {
            n = n.wrapping_add(1);
            bus.write(0x0010, n);
            if bus.peek(0x0010) != Some(LIVE) {
                leaked_writes += 1;
                bus.poke(0x0010, LIVE);
            }
            if bus.read(0xE010) != FROZEN_A {
                unfrozen_reads += 1;
            }
        }
        (leaked_writes, unfrozen_reads)
    });

    control.join().unwrap();
    let (leaked_writes, unfrozen_reads) = emulation.join().unwrap();
    assert_eq!(leaked_writes, 0);
    assert_eq!(unfrozen_reads, 0);
}
