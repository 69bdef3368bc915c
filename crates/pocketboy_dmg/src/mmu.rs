use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;

use parking_lot::{Condvar, Mutex};

mod mmio;

use mmio::IoPort;

// Region boundaries in the 16-bit address space.
pub const ADDR_ROM: u16 = 0x0000;
pub const ADDR_VRAM: u16 = 0x8000;
pub const ADDR_ERAM: u16 = 0xA000;
pub const ADDR_WRAM: u16 = 0xC000;
pub const ADDR_OAM: u16 = 0xFE00;
pub const ADDR_OAM_END: u16 = 0xFEA0;
pub const ADDR_P1: u16 = 0xFF00;
pub const ADDR_IF: u16 = 0xFF0F;
pub const ADDR_GPU_REGS: u16 = 0xFF40;
pub const ADDR_GPU_REGS_END: u16 = 0xFF4C;
pub const ADDR_HRAM: u16 = 0xFF80;
pub const ADDR_IE: u16 = 0xFFFF;

/// Disjoint address blocks, one lock each.
///
/// The discriminant doubles as the block's bit position in an
/// [`AddressKeys`] set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressBlock {
    Rom = 0,
    VRam = 1,
    ERam = 2,
    WRam = 3,
    Oam = 4,
    P1 = 5,
    If = 6,
    GpuRegs = 7,
    HRam = 8,
    Ie = 9,
}

impl AddressBlock {
    pub const COUNT: usize = 10;

    const ALL: [AddressBlock; Self::COUNT] = [
        AddressBlock::Rom,
        AddressBlock::VRam,
        AddressBlock::ERam,
        AddressBlock::WRam,
        AddressBlock::Oam,
        AddressBlock::P1,
        AddressBlock::If,
        AddressBlock::GpuRegs,
        AddressBlock::HRam,
        AddressBlock::Ie,
    ];

    #[inline]
    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressBlock::Rom => "rom",
            AddressBlock::VRam => "vram",
            AddressBlock::ERam => "eram",
            AddressBlock::WRam => "wram",
            AddressBlock::Oam => "oam",
            AddressBlock::P1 => "p1",
            AddressBlock::If => "if",
            AddressBlock::GpuRegs => "gpuregs",
            AddressBlock::HRam => "hram",
            AddressBlock::Ie => "ie",
        };
        f.write_str(name)
    }
}

/// Direction of a memory access, carried into fatal error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Lock,
    Unlock,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Lock => "lock",
            Access::Unlock => "unlock",
        };
        f.write_str(name)
    }
}

/// A bus master's set of held region keys.
///
/// Holding a block's bit confers exclusive read/write rights to that
/// block. Key sets are worker-local: they are only ever mutated by the
/// owning worker's calls to [`Mmu::lock_addr`] / [`Mmu::unlock_addr`],
/// which return the updated set.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressKeys(u16);

impl AddressKeys {
    pub const fn empty() -> Self {
        AddressKeys(0)
    }

    #[inline]
    pub fn holds(self, block: AddressBlock) -> bool {
        self.0 & block.bit() != 0
    }

    #[inline]
    fn grant(self, block: AddressBlock) -> Self {
        AddressKeys(self.0 | block.bit())
    }

    #[inline]
    fn revoke(self, block: AddressBlock) -> Self {
        AddressKeys(self.0 & !block.bit())
    }
}

impl fmt::Debug for AddressKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for block in AddressBlock::ALL {
            if self.holds(block) {
                set.entry(&format_args!("{block}"));
            }
        }
        set.finish()
    }
}

/// Guard-free binary semaphore protecting one address block.
///
/// Unlike a `MutexGuard`, possession is tracked in the holder's
/// [`AddressKeys`] bitset, so a key can be acquired on one thread and
/// released on another (the CPU worker acquires its lifetime keys before
/// its thread starts).
struct RegionLock {
    held: Mutex<bool>,
    ready: Condvar,
}

impl RegionLock {
    fn new() -> Self {
        RegionLock {
            held: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.ready.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        self.ready.notify_one();
    }
}

fn byte_store(len: usize) -> Box<[AtomicU8]> {
    (0..len).map(|_| AtomicU8::new(0)).collect()
}

/// The memory management unit.
///
/// Owns every memory backing store and one lock per address block, and
/// dispatches reads and writes to the right block. All bus masters (CPU,
/// GPU, keypad, DMA) share the MMU through an `Arc` and authenticate each
/// access with their key set; an access without the matching key aborts.
pub struct Mmu {
    rom: Box<[AtomicU8]>,
    vram: Box<[AtomicU8]>,
    eram: Box<[AtomicU8]>,
    wram: Box<[AtomicU8]>,
    oam: Box<[AtomicU8]>,
    gpu_regs: Box<[AtomicU8]>,
    hram: Box<[AtomicU8]>,
    ie: AtomicU8,

    // Ports crossed by more than one master get queued-write semantics.
    io_if: IoPort,
    io_p1: IoPort,

    locks: [RegionLock; AddressBlock::COUNT],

    // Pinged when a non-owner writes P1, so the keypad worker can
    // recompute the output nibble on its own schedule.
    p1_listener: Mutex<Option<Sender<()>>>,
}

impl Mmu {
    /// Create an MMU with the given cartridge ROM image mapped at
    /// `0x0000`. Images longer than 32 KiB are truncated (banking is a
    /// cartridge concern, not a bus concern).
    pub fn new(rom: &[u8]) -> Self {
        if rom.len() > 0x8000 {
            log::warn!(
                "ROM image is {} bytes; only the first 0x8000 are mapped",
                rom.len()
            );
        }
        let rom_store = byte_store(0x8000);
        for (cell, byte) in rom_store.iter().zip(rom.iter()) {
            cell.store(*byte, Ordering::Relaxed);
        }

        Mmu {
            rom: rom_store,
            vram: byte_store(0x2000),
            eram: byte_store(0x2000),
            wram: byte_store(0x2000),
            oam: byte_store(0xA0),
            gpu_regs: byte_store((ADDR_GPU_REGS_END - ADDR_GPU_REGS) as usize),
            hram: byte_store((ADDR_IE - ADDR_HRAM) as usize),
            ie: AtomicU8::new(0),
            io_if: IoPort::new(ADDR_IF),
            io_p1: IoPort::new(ADDR_P1),
            locks: [
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
                RegionLock::new(),
            ],
            p1_listener: Mutex::new(None),
        }
    }

    /// Register the channel pinged when a non-owner writes P1.
    pub fn set_p1_listener(&self, listener: Sender<()>) {
        *self.p1_listener.lock() = Some(listener);
    }

    /// Partition the address space.
    ///
    /// Returns the block and its base address, or `None` for addresses
    /// that are known to exist on the machine but are not backed by this
    /// bus model (these read as zero and drop writes). Addresses the
    /// address-info table cannot account for abort.
    fn select_block(&self, addr: u16, dir: Access) -> Option<(AddressBlock, u16)> {
        if addr < ADDR_VRAM {
            Some((AddressBlock::Rom, ADDR_ROM))
        } else if addr < ADDR_ERAM {
            Some((AddressBlock::VRam, ADDR_VRAM))
        } else if addr < ADDR_WRAM {
            Some((AddressBlock::ERam, ADDR_ERAM))
        } else if addr < ADDR_OAM {
            // WRAM plus its echo at 0xE000-0xFDFF; offsets are masked to
            // the low 13 bits on access.
            Some((AddressBlock::WRam, ADDR_WRAM))
        } else if addr < ADDR_OAM_END {
            Some((AddressBlock::Oam, ADDR_OAM))
        } else if addr == ADDR_P1 {
            Some((AddressBlock::P1, ADDR_P1))
        } else if addr == ADDR_IF {
            Some((AddressBlock::If, ADDR_IF))
        } else if (ADDR_GPU_REGS..ADDR_GPU_REGS_END).contains(&addr) {
            Some((AddressBlock::GpuRegs, ADDR_GPU_REGS))
        } else if (ADDR_HRAM..ADDR_IE).contains(&addr) {
            Some((AddressBlock::HRam, ADDR_HRAM))
        } else if addr == ADDR_IE {
            Some((AddressBlock::Ie, ADDR_IE))
        } else {
            let (purpose, known) = address_info(addr);
            if !known {
                panic!("unhandled memory {dir}: 0x{addr:04X} - {purpose}");
            }
            None
        }
    }

    /// Acquire the key for the block containing `addr`, unless it is
    /// already in `keys`. Blocks until the current holder releases.
    /// Returns the updated key set.
    pub fn lock_addr(&self, addr: u16, keys: AddressKeys) -> AddressKeys {
        let Some((block, _)) = self.select_block(addr, Access::Lock) else {
            return keys;
        };
        if keys.holds(block) {
            return keys;
        }
        self.locks[block as usize].acquire();
        keys.grant(block)
    }

    /// Release the key for the block containing `addr`. A no-op when the
    /// caller does not hold it. Returns the updated key set.
    pub fn unlock_addr(&self, addr: u16, keys: AddressKeys) -> AddressKeys {
        let Some((block, _)) = self.select_block(addr, Access::Unlock) else {
            return keys;
        };
        if !keys.holds(block) {
            return keys;
        }
        self.locks[block as usize].release();
        keys.revoke(block)
    }

    /// Release every key in `keys`. Used by workers on shutdown.
    pub fn release_all(&self, mut keys: AddressKeys) -> AddressKeys {
        for block in AddressBlock::ALL {
            if keys.holds(block) {
                self.locks[block as usize].release();
                keys = keys.revoke(block);
            }
        }
        keys
    }

    pub fn read_byte_at(&self, addr: u16, keys: AddressKeys) -> u8 {
        let Some((block, base)) = self.select_block(addr, Access::Read) else {
            // Known but unbacked hardware (timer, serial, sound, ...).
            return 0;
        };
        let owner = keys.holds(block);

        match block {
            AddressBlock::P1 => return self.io_p1.read_byte(owner),
            AddressBlock::If => return self.io_if.read_byte(owner),
            _ => {}
        }

        if !owner {
            let (purpose, _) = address_info(addr);
            panic!("unauthorized memory read: 0x{addr:04X} - {purpose}");
        }

        let offset = (addr - base) as usize;
        match block {
            AddressBlock::Rom => self.rom[offset].load(Ordering::Relaxed),
            AddressBlock::VRam => self.vram[offset].load(Ordering::Relaxed),
            AddressBlock::ERam => self.eram[offset].load(Ordering::Relaxed),
            AddressBlock::WRam => self.wram[offset & 0x1FFF].load(Ordering::Relaxed),
            AddressBlock::Oam => self.oam[offset].load(Ordering::Relaxed),
            AddressBlock::GpuRegs => self.gpu_regs[offset].load(Ordering::Relaxed),
            AddressBlock::HRam => self.hram[offset].load(Ordering::Relaxed),
            AddressBlock::Ie => self.ie.load(Ordering::Relaxed),
            AddressBlock::P1 | AddressBlock::If => unreachable!(),
        }
    }

    pub fn write_byte_at(&self, addr: u16, value: u8, keys: AddressKeys) {
        let Some((block, base)) = self.select_block(addr, Access::Write) else {
            return;
        };
        let owner = keys.holds(block);

        match block {
            // ROM writes are dropped regardless of the writer: games poke
            // the mapper range freely and expect no bus fault.
            AddressBlock::Rom => return,
            AddressBlock::P1 => {
                self.io_p1.write_byte(value, owner);
                if !owner {
                    if let Some(listener) = self.p1_listener.lock().as_ref() {
                        let _ = listener.send(());
                    }
                }
                return;
            }
            AddressBlock::If => {
                self.io_if.write_byte(value, owner);
                return;
            }
            _ => {}
        }

        if !owner {
            let (purpose, _) = address_info(addr);
            panic!("unauthorized memory write: 0x{addr:04X} 0x{value:02X} - {purpose}");
        }

        let offset = (addr - base) as usize;
        match block {
            AddressBlock::VRam => self.vram[offset].store(value, Ordering::Relaxed),
            AddressBlock::ERam => self.eram[offset].store(value, Ordering::Relaxed),
            AddressBlock::WRam => self.wram[offset & 0x1FFF].store(value, Ordering::Relaxed),
            AddressBlock::Oam => self.oam[offset].store(value, Ordering::Relaxed),
            AddressBlock::GpuRegs => self.gpu_regs[offset].store(value, Ordering::Relaxed),
            AddressBlock::HRam => self.hram[offset].store(value, Ordering::Relaxed),
            AddressBlock::Ie => self.ie.store(value, Ordering::Relaxed),
            AddressBlock::Rom | AddressBlock::P1 | AddressBlock::If => unreachable!(),
        }
    }

    /// Two successive byte reads, little-endian.
    pub fn read_word_at(&self, addr: u16, keys: AddressKeys) -> u16 {
        let lo = self.read_byte_at(addr, keys);
        let hi = self.read_byte_at(addr.wrapping_add(1), keys);
        u16::from_le_bytes([lo, hi])
    }

    /// Two successive byte writes, little-endian.
    pub fn write_word_at(&self, addr: u16, value: u16, keys: AddressKeys) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte_at(addr, lo, keys);
        self.write_byte_at(addr.wrapping_add(1), hi, keys);
    }

    /// Owner-side settlement of a queued-write port (IF or P1).
    ///
    /// Returns the staged value and whether a non-owner write was pending;
    /// the pending flag is cleared. This is how the port owner applies
    /// external writes on its own schedule.
    pub fn read_io_byte(&self, addr: u16, keys: AddressKeys) -> (u8, bool) {
        let block = self.select_block(addr, Access::Read).map(|(block, _)| block);
        match block {
            Some(AddressBlock::P1) => self.io_p1.read_io_byte(keys.holds(AddressBlock::P1)),
            Some(AddressBlock::If) => self.io_if.read_io_byte(keys.holds(AddressBlock::If)),
            _ => panic!("unhandled queued write: 0x{addr:04X}"),
        }
    }
}

/// Purpose lookup for addresses outside the modelled blocks.
///
/// Incomplete; used to keep fatal bus errors readable and to tolerate
/// accesses to hardware this core deliberately does not back. The bool is
/// true when the address is accounted for (reads as zero, drops writes).
fn address_info(addr: u16) -> (&'static str, bool) {
    match addr {
        0xFEA0..=0xFEFF => ("unusable region above OAM", true),
        0xFF01 => ("serial transfer data", true),
        0xFF02 => ("serial transfer control", true),
        0xFF03 => ("undocumented", true),
        0xFF04 => ("divider register DIV", true),
        0xFF05 => ("timer counter TIMA", true),
        0xFF06 => ("timer modulo TMA", true),
        0xFF07 => ("timer control TAC", true),
        0xFF08..=0xFF0E => ("undocumented", true),
        0xFF10..=0xFF26 => ("sound channel registers", true),
        0xFF30..=0xFF3F => ("sound wave pattern RAM", true),
        0xFF4D..=0xFF7F => ("CGB-only registers", true),
        _ => ("unknown", false),
    }
}
