use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

/// A memory-mapped IO port written by more than one bus master.
///
/// The owner sees `value` directly; everyone else goes through the port
/// lock. A non-owner write is staged in `write` until the owner settles
/// it with [`IoPort::read_io_byte`], so external writes land at a point
/// the owner chooses rather than mid-instruction.
pub(super) struct IoPort {
    addr: u16,
    value: AtomicU8,
    shared: Mutex<PortShared>,
}

#[derive(Default)]
struct PortShared {
    /// Last value observable to non-owners.
    read: u8,
    /// Staged write. Tracks `value` whenever nothing is queued, so a
    /// settle always yields the latest effective value.
    write: u8,
    queued: bool,
}

impl IoPort {
    pub(super) fn new(addr: u16) -> Self {
        IoPort {
            addr,
            value: AtomicU8::new(0),
            shared: Mutex::new(PortShared::default()),
        }
    }

    pub(super) fn read_byte(&self, owner: bool) -> u8 {
        if owner {
            // The owner is serialized with itself; no lock needed.
            self.value.load(Ordering::Relaxed)
        } else {
            self.shared.lock().read
        }
    }

    pub(super) fn write_byte(&self, value: u8, owner: bool) {
        let mut shared = self.shared.lock();
        if owner {
            self.value.store(value, Ordering::Relaxed);
            shared.read = value;
            if !shared.queued {
                shared.write = value;
            }
        } else {
            // A second queued write before the owner settles simply
            // replaces the first: latest wins.
            shared.queued = true;
            shared.write = value;
        }
    }

    pub(super) fn read_io_byte(&self, owner: bool) -> (u8, bool) {
        if !owner {
            panic!("unhandled io settle: 0x{:04X}", self.addr);
        }
        let mut shared = self.shared.lock();
        let queued = shared.queued;
        shared.queued = false;
        (shared.write, queued)
    }
}
