//! Per-port freeze and watch metadata shared between the emulation thread and
//! debugger threads.
//!
//! Every entry is packed into a single `AtomicU16`, so the emulation side only
//! ever performs plain atomic loads and can never see a half-written entry.
//! Debugger-side mutations additionally take `writer`, which serializes them
//! against each other and guards the freeze ordering used for slot overrides.

use crate::bus::slot_index;
use crate::errors::WatchError;
use crate::{PORT_COUNT, SLOT_COUNT};

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const VALUE_MASK: u16 = 0x00FF;
const FREEZE: u16 = 1 << 8;
const WATCH_READ: u16 = 1 << 9;
const WATCH_WRITE: u16 = 1 << 10;
const PRESENT: u16 = 1 << 11;

// Flag byte layout used by save_state/load_state
const BLOB_FREEZE: u8 = 0b001;
const BLOB_READ: u8 = 0b010;
const BLOB_WRITE: u8 = 0b100;
const BLOB_ENTRY_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchEntry {
    pub freeze: bool,
    pub frozen_value: u8,
    pub watch_read: bool,
    pub watch_write: bool,
}

impl WatchEntry {
    #[inline(always)]
    fn unpack(raw: u16) -> WatchEntry {
        WatchEntry {
            freeze: raw & FREEZE != 0,
            frozen_value: (raw & VALUE_MASK) as u8,
            watch_read: raw & WATCH_READ != 0,
            watch_write: raw & WATCH_WRITE != 0,
        }
    }

    fn pack(self) -> u16 {
        let mut raw = PRESENT | self.frozen_value as u16;
        if self.freeze {
            raw |= FREEZE;
        }
        if self.watch_read {
            raw |= WATCH_READ;
        }
        if self.watch_write {
            raw |= WATCH_WRITE;
        }
        raw
    }

    pub fn is_watched(&self) -> bool {
        self.watch_read || self.watch_write
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    WatchedOnly,
    Frozen,
    FrozenAndWatched,
}

impl WatchState {
    pub fn of(entry: Option<WatchEntry>) -> WatchState {
        match entry {
            None => WatchState::Unwatched,
            Some(e) => match (e.freeze, e.is_watched()) {
                (false, false) => WatchState::Unwatched,
                (false, true) => WatchState::WatchedOnly,
                (true, false) => WatchState::Frozen,
                (true, true) => WatchState::FrozenAndWatched,
            },
        }
    }
}

/// Raised synchronously by the bus when an access hits a watched port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent {
    pub port: u16,
    pub access: Access,
    /// Value returned to the CPU for reads, value written for writes.
    pub value: u8,
    /// The read was masked by a freeze, or the write was dropped by one.
    pub frozen: bool,
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} 0x{:04X} = 0x{:02X}", self.access, self.port, self.value)?;
        if self.frozen {
            write!(f, " (frozen)")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FreezeLog {
    // Frozen ports, least recently frozen first
    order: Vec<u16>,
}

pub struct WatchTable {
    entries: Box<[AtomicU16]>,
    slot_overrides: Box<[AtomicU16]>,
    len: AtomicUsize,
    writer: Mutex<FreezeLog>,
}

impl Default for WatchTable {
    fn default() -> WatchTable {
        WatchTable::new()
    }
}

impl fmt::Debug for WatchTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WatchTable")
            .field("entries", &self.entries())
            .finish()
    }
}

impl WatchTable {
    pub fn new() -> WatchTable {
        WatchTable {
            entries: (0..PORT_COUNT).map(|_| AtomicU16::new(0)).collect(),
            slot_overrides: (0..SLOT_COUNT).map(|_| AtomicU16::new(0)).collect(),
            len: AtomicUsize::new(0),
            writer: Mutex::new(FreezeLog::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, port: u16) -> Option<WatchEntry> {
        let raw = self.entries[port as usize].load(Ordering::Acquire);
        if raw & PRESENT == 0 {
            None
        } else {
            Some(WatchEntry::unpack(raw))
        }
    }

    pub fn state(&self, port: u16) -> WatchState {
        WatchState::of(self.entry(port))
    }

    /// All live entries in ascending port order.
    pub fn entries(&self) -> Vec<(u16, WatchEntry)> {
        if self.is_empty() {
            return Vec::new();
        }
        (0..=u16::MAX)
            .filter_map(|port| self.entry(port).map(|entry| (port, entry)))
            .collect()
    }

    /// Creates an all-clear entry for `port` unless one exists already.
    pub fn add(&self, port: u16) -> WatchEntry {
        let mut log = self.lock_writer();
        self.update(&mut log, port, |entry| entry)
    }

    /// Destroys the entry for `port`, returning what it held.
    pub fn remove(&self, port: u16) -> Option<WatchEntry> {
        let mut log = self.lock_writer();
        let previous = self.entry(port)?;
        self.entries[port as usize].store(0, Ordering::Release);
        self.len.fetch_sub(1, Ordering::AcqRel);
        if previous.freeze {
            self.unfreeze_in_log(&mut log, port);
        }
        Some(previous)
    }

    pub fn set_freeze(&self, port: u16, value: u8) {
        let mut log = self.lock_writer();
        self.update(&mut log, port, |entry| WatchEntry {
            freeze: true,
            frozen_value: value,
            ..entry
        });
        log.order.retain(|&p| p != port);
        log.order.push(port);
        self.refresh_slot_override(&log, slot_index(port));
    }

    /// No-op when the port has no entry.
    pub fn clear_freeze(&self, port: u16) {
        let mut log = self.lock_writer();
        match self.entry(port) {
            Some(entry) if entry.freeze => {
                self.update(&mut log, port, |entry| WatchEntry {
                    freeze: false,
                    ..entry
                });
                self.unfreeze_in_log(&mut log, port);
            }
            _ => {}
        }
    }

    pub fn set_watch(&self, port: u16, on_read: bool, on_write: bool) {
        let mut log = self.lock_writer();
        self.update(&mut log, port, |entry| WatchEntry {
            watch_read: on_read,
            watch_write: on_write,
            ..entry
        });
    }

    pub fn clear(&self) {
        let mut log = self.lock_writer();
        self.clear_locked(&mut log);
    }

    /// Moves the entry at `from` to `to`, keeping its flags and its place in
    /// the freeze order.
    pub fn move_entry(&self, from: u16, to: u16) -> Result<WatchEntry, WatchError> {
        let mut log = self.lock_writer();
        let moved = self.entry(from).ok_or(WatchError::UnknownPort(from))?;
        if from == to {
            return Ok(moved);
        }
        if self.entry(to).is_some() {
            return Err(WatchError::PortInUse(to));
        }

        // The new word lands before the old one goes, so a frozen port never
        // reads as unfrozen in between
        self.entries[to as usize].store(moved.pack(), Ordering::Release);
        self.entries[from as usize].store(0, Ordering::Release);
        if moved.freeze {
            for port in log.order.iter_mut().filter(|p| **p == from) {
                *port = to;
            }
            self.refresh_slot_override(&log, slot_index(to));
            self.refresh_slot_override(&log, slot_index(from));
        }
        Ok(moved)
    }

    /// Serializes every entry as `[port lo, port hi, flags, frozen value]`.
    pub fn save_state(&self) -> Vec<u8> {
        let entries = self.entries();
        let mut blob = Vec::with_capacity(entries.len() * BLOB_ENTRY_LEN);
        for (port, entry) in entries {
            let mut flags = 0;
            if entry.freeze {
                flags |= BLOB_FREEZE;
            }
            if entry.watch_read {
                flags |= BLOB_READ;
            }
            if entry.watch_write {
                flags |= BLOB_WRITE;
            }
            blob.extend_from_slice(&port.to_le_bytes());
            blob.push(flags);
            blob.push(entry.frozen_value);
        }
        blob
    }

    /// Replaces the whole table. The table is left untouched on error,
    /// including when the blob lists a port twice.
    pub fn load_state(&self, blob: &[u8]) -> Result<(), WatchError> {
        if blob.len() % BLOB_ENTRY_LEN != 0 {
            let err = WatchError::MalformedBlob(blob.len());
            log::warn!("{}", err);
            return Err(err);
        }

        let mut decoded: Vec<(u16, WatchEntry)> =
            Vec::with_capacity(blob.len() / BLOB_ENTRY_LEN);
        let mut seen = vec![false; PORT_COUNT];
        for chunk in blob.chunks_exact(BLOB_ENTRY_LEN) {
            let port = u16::from_le_bytes([chunk[0], chunk[1]]);
            if seen[port as usize] {
                let err = WatchError::DuplicatePort(port);
                log::warn!("{}", err);
                return Err(err);
            }
            seen[port as usize] = true;
            let flags = chunk[2];
            if flags & !(BLOB_FREEZE | BLOB_READ | BLOB_WRITE) != 0 {
                let err = WatchError::UnknownFlags { port, flags };
                log::warn!("{}", err);
                return Err(err);
            }
            decoded.push((
                port,
                WatchEntry {
                    freeze: flags & BLOB_FREEZE != 0,
                    frozen_value: chunk[3],
                    watch_read: flags & BLOB_READ != 0,
                    watch_write: flags & BLOB_WRITE != 0,
                },
            ));
        }

        let mut log = self.lock_writer();

        // New words go in first and stale ones are zeroed after, so a port
        // frozen on both sides of the restore stays frozen throughout
        let mut loaded = vec![false; PORT_COUNT];
        for &(port, entry) in decoded.iter() {
            self.entries[port as usize].store(entry.pack(), Ordering::Release);
            loaded[port as usize] = true;
        }
        for (port, cell) in self.entries.iter().enumerate() {
            if !loaded[port] {
                cell.store(0, Ordering::Release);
            }
        }
        self.len.store(decoded.len(), Ordering::Release);

        let is_frozen = |port: u16| self.entry(port).map_or(false, |entry| entry.freeze);
        log.order.retain(|&port| is_frozen(port));
        for &(port, entry) in decoded.iter() {
            if entry.freeze && !log.order.contains(&port) {
                log.order.push(port);
            }
        }
        for slot in 0..SLOT_COUNT {
            self.refresh_slot_override(&log, slot as u8);
        }
        Ok(())
    }

    /// Raw entry for the emulation path; absent ports read as all-clear.
    #[inline(always)]
    pub(crate) fn lookup(&self, port: u16) -> WatchEntry {
        WatchEntry::unpack(self.entries[port as usize].load(Ordering::Acquire))
    }

    /// Value a read of `port` must return instead of the device's, if any.
    /// An exact freeze wins over a freeze on another alias of the slot.
    #[inline(always)]
    pub(crate) fn read_override(&self, port: u16, entry: &WatchEntry) -> Option<u8> {
        if entry.freeze {
            return Some(entry.frozen_value);
        }
        let raw = self.slot_overrides[slot_index(port) as usize].load(Ordering::Acquire);
        if raw & FREEZE != 0 {
            Some((raw & VALUE_MASK) as u8)
        } else {
            None
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, FreezeLog> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the writer lock, which is what makes load-then-store safe.
    fn update<F>(&self, _log: &mut FreezeLog, port: u16, f: F) -> WatchEntry
    where
        F: FnOnce(WatchEntry) -> WatchEntry,
    {
        let cell = &self.entries[port as usize];
        let raw = cell.load(Ordering::Acquire);
        let existed = raw & PRESENT != 0;
        let current = if existed {
            WatchEntry::unpack(raw)
        } else {
            WatchEntry::default()
        };

        let updated = f(current);
        cell.store(updated.pack(), Ordering::Release);
        if !existed {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        updated
    }

    fn clear_locked(&self, log: &mut FreezeLog) {
        for entry in self.entries.iter() {
            entry.store(0, Ordering::Release);
        }
        for slot in self.slot_overrides.iter() {
            slot.store(0, Ordering::Release);
        }
        log.order.clear();
        self.len.store(0, Ordering::Release);
    }

    fn unfreeze_in_log(&self, log: &mut FreezeLog, port: u16) {
        log.order.retain(|&p| p != port);
        self.refresh_slot_override(log, slot_index(port));
    }

    fn refresh_slot_override(&self, log: &FreezeLog, slot: u8) {
        let raw = log
            .order
            .iter()
            .rev()
            .filter(|&&p| slot_index(p) == slot)
            .filter_map(|&p| self.entry(p))
            .find(|entry| entry.freeze)
            .map_or(0, |entry| FREEZE | entry.frozen_value as u16);
        self.slot_overrides[slot as usize].store(raw, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_created_lazily() {
        let table = WatchTable::new();
        assert!(table.is_empty());
        assert_eq!(table.entry(0xE010), None);

        table.add(0xE010);
        assert_eq!(table.len(), 1);
        assert_eq!(table.entry(0xE010), Some(WatchEntry::default()));

        // Adding again keeps the existing entry
        table.set_watch(0xE010, true, false);
        let entry = table.add(0xE010);
        assert!(entry.watch_read);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn state_machine_follows_setters() {
        let table = WatchTable::new();
        let port = 0x0042;
        assert_eq!(table.state(port), WatchState::Unwatched);

        table.set_watch(port, true, true);
        assert_eq!(table.state(port), WatchState::WatchedOnly);

        table.set_freeze(port, 0x10);
        assert_eq!(table.state(port), WatchState::FrozenAndWatched);

        table.set_watch(port, false, false);
        assert_eq!(table.state(port), WatchState::Frozen);

        table.clear_freeze(port);
        assert_eq!(table.state(port), WatchState::Unwatched);
        assert!(table.entry(port).is_some());

        table.remove(port);
        assert_eq!(table.entry(port), None);
        assert!(table.is_empty());
    }

    #[test]
    fn clear_freeze_on_unknown_port_creates_nothing() {
        let table = WatchTable::new();
        table.clear_freeze(0x1234);
        assert!(table.is_empty());
    }

    #[test]
    fn slot_override_follows_latest_frozen_alias() {
        let table = WatchTable::new();
        table.set_freeze(0x0010, 0x11);
        table.set_freeze(0xE010, 0x22);

        let alias = table.lookup(0x7710);
        assert_eq!(table.read_override(0x7710, &alias), Some(0x22));

        // Exact freeze still wins over the slot override
        let exact = table.lookup(0x0010);
        assert_eq!(table.read_override(0x0010, &exact), Some(0x11));

        table.clear_freeze(0xE010);
        assert_eq!(table.read_override(0x7710, &alias), Some(0x11));

        table.remove(0x0010);
        assert_eq!(table.read_override(0x7710, &alias), None);
    }

    #[test]
    fn other_slots_are_not_overridden() {
        let table = WatchTable::new();
        table.set_freeze(0xE010, 0x99);
        let entry = table.lookup(0xE011);
        assert_eq!(table.read_override(0xE011, &entry), None);
    }

    #[test]
    fn save_and_load_state() {
        let table = WatchTable::new();
        table.set_freeze(0xE010, 0x99);
        table.set_watch(0xE010, true, false);
        table.set_watch(0x0003, false, true);
        table.add(0xFFFF);

        let blob = table.save_state();
        assert_eq!(blob.len(), 3 * 4);

        let restored = WatchTable::new();
        restored.set_freeze(0x1111, 0x01);
        restored.load_state(&blob).unwrap();
        assert_eq!(restored.entries(), table.entries());

        let alias = restored.lookup(0x0010);
        assert_eq!(restored.read_override(0x0010, &alias), Some(0x99));
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        let table = WatchTable::new();
        table.add(0x0001);

        assert_eq!(
            table.load_state(&[0, 1, 2]),
            Err(WatchError::MalformedBlob(3))
        );
        assert_eq!(
            table.load_state(&[0x10, 0xE0, 0x80, 0x00]),
            Err(WatchError::UnknownFlags {
                port: 0xE010,
                flags: 0x80
            })
        );
        assert!(table.entry(0x0001).is_some());
    }

    #[test]
    fn duplicate_ports_in_blob_are_rejected() {
        let table = WatchTable::new();
        table.set_watch(0x0001, true, false);

        let blob = [0x10, 0xE0, 0b001, 0x99, 0x10, 0xE0, 0b000, 0x00];
        assert_eq!(
            table.load_state(&blob),
            Err(WatchError::DuplicatePort(0xE010))
        );
        assert_eq!(table.entry(0xE010), None);
        let alias = table.lookup(0x0010);
        assert_eq!(table.read_override(0x0010, &alias), None);
        assert_eq!(table.state(0x0001), WatchState::WatchedOnly);
    }

    #[test]
    fn load_state_replaces_freezes_and_overrides() {
        let table = WatchTable::new();
        table.set_freeze(0x0020, 0x20);
        table.set_freeze(0xE010, 0x10);
        table.set_watch(0x1234, true, true);

        // 0xE010 stays frozen at a new value, 0x0020 goes away
        table
            .load_state(&[0x10, 0xE0, 0b001, 0x77, 0x30, 0x00, 0b100, 0x00])
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.entry(0x0020), None);
        assert_eq!(table.entry(0x1234), None);
        let alias = table.lookup(0x0010);
        assert_eq!(table.read_override(0x0010, &alias), Some(0x77));
        let old = table.lookup(0x0120);
        assert_eq!(table.read_override(0x0120, &old), None);

        table.clear_freeze(0xE010);
        assert_eq!(table.read_override(0x0010, &alias), None);
    }

    #[test]
    fn move_entry_keeps_flags_and_freeze() {
        let table = WatchTable::new();
        table.set_freeze(0xE010, 0x99);
        table.set_watch(0xE010, true, false);

        let moved = table.move_entry(0xE010, 0xE011).unwrap();
        assert!(moved.freeze && moved.watch_read);
        assert_eq!(table.entry(0xE010), None);
        assert_eq!(table.state(0xE011), WatchState::FrozenAndWatched);
        assert_eq!(table.len(), 1);

        // The slot override followed the entry
        let old_slot = table.lookup(0x0010);
        assert_eq!(table.read_override(0x0010, &old_slot), None);
        let new_slot = table.lookup(0x0011);
        assert_eq!(table.read_override(0x0011, &new_slot), Some(0x99));

        table.clear_freeze(0xE011);
        assert_eq!(table.read_override(0x0011, &new_slot), None);
    }

    #[test]
    fn move_entry_rejects_collisions_and_unknown_ports() {
        let table = WatchTable::new();
        table.add(0x0001);
        table.set_freeze(0x0002, 0x22);

        assert_eq!(
            table.move_entry(0x0001, 0x0002),
            Err(WatchError::PortInUse(0x0002))
        );
        assert_eq!(
            table.move_entry(0x0003, 0x0004),
            Err(WatchError::UnknownPort(0x0003))
        );
        assert_eq!(table.state(0x0002), WatchState::Frozen);
        assert_eq!(table.move_entry(0x0001, 0x0001), Ok(WatchEntry::default()));
    }

    #[test]
    fn event_display() {
        let event = WatchEvent {
            port: 0xE010,
            access: Access::Write,
            value: 0x42,
            frozen: true,
        };
        assert_eq!(event.to_string(), "write 0xE010 = 0x42 (frozen)");
    }
}
