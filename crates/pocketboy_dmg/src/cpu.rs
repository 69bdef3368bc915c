use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use crate::clock::ClockAccumulator;
use crate::mmu::{
    AddressKeys, Mmu, ADDR_ERAM, ADDR_HRAM, ADDR_IE, ADDR_IF, ADDR_OAM, ADDR_OAM_END, ADDR_ROM,
    ADDR_VRAM, ADDR_WRAM,
};

mod alu;
mod interrupts;
mod opcodes;
mod step;
#[cfg(test)]
mod tests;

use opcodes::OPCODES;

/// The DMG register file: eight 8-bit registers plus SP and PC.
///
/// Each of AF, BC, DE, and HL can also be viewed as one 16-bit value,
/// with the first register supplying the upper byte and the second the
/// lower. F never exposes its low nibble; every write masks it off.
#[derive(Clone, Copy, Debug, Default)]
pub struct Registers {
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// The flags register. The lower 4 bits always read zero.
    #[inline]
    pub fn f(&self) -> u8 {
        self.f & 0xF0
    }

    #[inline]
    pub fn set_f(&mut self, value: u8) {
        self.f = value & 0xF0;
    }

    #[inline]
    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f()])
    }

    #[inline]
    pub fn set_af(&mut self, value: u16) {
        let [a, f] = value.to_be_bytes();
        self.a = a;
        self.set_f(f);
    }

    #[inline]
    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    #[inline]
    pub fn set_bc(&mut self, value: u16) {
        let [b, c] = value.to_be_bytes();
        self.b = b;
        self.c = c;
    }

    #[inline]
    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    #[inline]
    pub fn set_de(&mut self, value: u16) {
        let [d, e] = value.to_be_bytes();
        self.d = d;
        self.e = e;
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    #[inline]
    pub fn set_hl(&mut self, value: u16) {
        let [h, l] = value.to_be_bytes();
        self.h = h;
        self.l = l;
    }
}

/// Condition flags, named by their bit position in F.
///
/// Only the upper nibble of F is meaningful: Z reports a zero result,
/// N records whether the last ALU op subtracted, H a carry out of bit
/// 3, and C a carry out of bit 7. The remaining four bits read zero.
#[derive(Clone, Copy, Debug)]
pub enum Flag {
    Z = 7,
    N = 6,
    H = 5,
    C = 4,
}

/// The current instruction buffer: a synthetic 9-bit opcode (base byte,
/// or `0xCB00 | byte` for the prefixed page) plus up to two immediate
/// operand bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Instruction {
    pub(crate) op: u16,
    p: [u8; 2],
    len: u8,
}

impl Instruction {
    #[inline]
    pub(crate) fn imm8(&self) -> u8 {
        self.p[0]
    }

    #[inline]
    pub(crate) fn imm16(&self) -> u16 {
        u16::from_le_bytes(self.p)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = OPCODES[self.op as usize]
            .as_ref()
            .map(|entry| entry.mnemonic.as_str())
            .unwrap_or("??");
        write!(f, "0x{:04X} {}", self.op, mnemonic)?;
        for operand in &self.p[..self.len as usize] {
            write!(f, " 0x{operand:02X}")?;
        }
        Ok(())
    }
}

/// The central processing unit.
///
/// Fetches and executes instructions, services interrupts, and fans the
/// per-step cycle counts out to clock subscribers. All memory traffic
/// goes through the shared [`Mmu`], authenticated by this CPU's key set.
pub struct Cpu {
    pub regs: Registers,

    /// Interrupt master enable.
    ime: bool,
    halted: bool,
    stopped: bool,

    /// Per-step cycle counters.
    t: u32,
    m: u32,

    inst: Instruction,

    mmu: Arc<Mmu>,
    keys: AddressKeys,

    /// Optional 256-byte overlay over 0x0000-0x00FF; unmapped for good
    /// the first time PC reaches 0x0100.
    boot_rom: Option<Box<[u8; 0x100]>>,
    boot_finished: bool,

    clocks: Vec<ClockAccumulator>,
    trace_subs: Vec<Sender<String>>,
}

impl Cpu {
    /// Create a CPU attached to `mmu`, acquiring lifetime keys for the
    /// regions it owns exclusively (ROM, external RAM, WRAM, IF, HRAM,
    /// IE). Contested regions (VRAM, OAM, GPU registers) are keyed per
    /// access instead.
    pub fn new(mmu: Arc<Mmu>, boot_rom: Option<[u8; 0x100]>) -> Self {
        let mut keys = AddressKeys::empty();
        keys = mmu.lock_addr(ADDR_ROM, keys);
        keys = mmu.lock_addr(ADDR_ERAM, keys);
        keys = mmu.lock_addr(ADDR_WRAM, keys);
        keys = mmu.lock_addr(ADDR_IF, keys);
        keys = mmu.lock_addr(ADDR_HRAM, keys);
        keys = mmu.lock_addr(ADDR_IE, keys);

        let boot_finished = boot_rom.is_none();
        let mut cpu = Cpu {
            regs: Registers::default(),
            ime: true,
            halted: false,
            stopped: false,
            t: 0,
            m: 0,
            inst: Instruction::default(),
            mmu,
            keys,
            boot_rom: boot_rom.map(Box::new),
            boot_finished,
            clocks: Vec::new(),
            trace_subs: Vec::new(),
        };
        cpu.apply_reset_state();
        cpu
    }

    /// Reset to power-on state: registers zeroed, SP = 0xFFFE, PC = 0,
    /// IME set, boot ROM re-mapped if one was provided.
    pub fn reset(&mut self) {
        self.apply_reset_state();
        self.halted = false;
        self.stopped = false;
        self.boot_finished = self.boot_rom.is_none();
        self.inst = Instruction::default();
    }

    fn apply_reset_state(&mut self) {
        self.regs = Registers::default();
        self.regs.sp = 0xFFFE;
        self.regs.pc = 0x0000;
        self.ime = true;
        self.t = 0;
        self.m = 0;
    }

    #[inline]
    pub fn get_flag(&self, flag: Flag) -> bool {
        self.regs.f() & (1 << flag as u8) != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        let bit = 1 << flag as u8;
        if value {
            self.regs.set_f(self.regs.f() | bit);
        } else {
            self.regs.set_f(self.regs.f() & !bit);
        }
    }

    #[inline]
    pub fn clear_flags(&mut self) {
        self.regs.set_f(0);
    }

    fn flags_string(&self) -> String {
        let bit = |flag, ch| if self.get_flag(flag) { ch } else { '-' };
        [
            bit(Flag::Z, 'Z'),
            bit(Flag::N, 'N'),
            bit(Flag::H, 'H'),
            bit(Flag::C, 'C'),
        ]
        .iter()
        .collect()
    }

    /// Human-readable state dump: the buffered instruction, registers,
    /// and flags. Pushed to trace subscribers before each execute and
    /// returned synchronously by the string-dump command.
    pub fn snapshot(&self) -> String {
        format!(
            "{inst}\n\
             a:{a:02X} f:{f:02X} b:{b:02X} c:{c:02X} d:{d:02X} e:{e:02X} h:{h:02X} l:{l:02X} \
             sp:{sp:04X} pc:{pc:04X}\n\
             ime:{ime} {flags}",
            inst = self.inst,
            a = self.regs.a,
            f = self.regs.f(),
            b = self.regs.b,
            c = self.regs.c,
            d = self.regs.d,
            e = self.regs.e,
            h = self.regs.h,
            l = self.regs.l,
            sp = self.regs.sp,
            pc = self.regs.pc,
            ime = self.ime as u8,
            flags = self.flags_string(),
        )
    }

    /// Register a clock subscriber; the receiver yields accumulated
    /// T-cycle counts and can never back-pressure the CPU.
    pub fn subscribe_clock(&mut self) -> Receiver<u32> {
        let (acc, rx) = ClockAccumulator::new();
        self.clocks.push(acc);
        rx
    }

    /// Register an instruction-trace subscriber; the receiver yields a
    /// snapshot before each execute.
    pub fn subscribe_trace(&mut self) -> Receiver<String> {
        let (tx, rx) = channel();
        self.trace_subs.push(tx);
        rx
    }

    /// Release every held region key. Called once by the worker on its
    /// way out; the CPU must not touch memory afterwards.
    pub(crate) fn release_keys(&mut self) {
        self.keys = self.mmu.release_all(self.keys);
    }

    #[inline]
    fn lock_addr(&mut self, addr: u16) {
        self.keys = self.mmu.lock_addr(addr, self.keys);
    }

    #[inline]
    fn unlock_addr(&mut self, addr: u16) {
        self.keys = self.mmu.unlock_addr(addr, self.keys);
    }

    /// Read one byte, honoring the boot ROM overlay and taking the
    /// transient key for contested regions around the access.
    fn read_byte(&mut self, addr: u16) -> u8 {
        if !self.boot_finished && addr < 0x0100 {
            if let Some(boot) = &self.boot_rom {
                return boot[addr as usize];
            }
        }
        if (ADDR_VRAM..ADDR_ERAM).contains(&addr) {
            self.lock_addr(ADDR_VRAM);
            let value = self.mmu.read_byte_at(addr, self.keys);
            self.unlock_addr(ADDR_VRAM);
            value
        } else if (ADDR_OAM..ADDR_OAM_END).contains(&addr) {
            self.lock_addr(ADDR_OAM);
            let value = self.mmu.read_byte_at(addr, self.keys);
            self.unlock_addr(ADDR_OAM);
            value
        } else {
            self.mmu.read_byte_at(addr, self.keys)
        }
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        if (ADDR_VRAM..ADDR_ERAM).contains(&addr) {
            self.lock_addr(ADDR_VRAM);
            self.mmu.write_byte_at(addr, value, self.keys);
            self.unlock_addr(ADDR_VRAM);
        } else if (ADDR_OAM..ADDR_OAM_END).contains(&addr) {
            self.lock_addr(ADDR_OAM);
            self.mmu.write_byte_at(addr, value, self.keys);
            self.unlock_addr(ADDR_OAM);
        } else {
            self.mmu.write_byte_at(addr, value, self.keys);
        }
    }

    fn read_word(&mut self, addr: u16) -> u16 {
        let lo = self.read_byte(addr);
        let hi = self.read_byte(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn write_word(&mut self, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// SP moves down by two; the pushed word sits little-endian at the
    /// new SP.
    fn push_word(&mut self, value: u16) {
        self.write_word(self.regs.sp.wrapping_sub(2), value);
        self.regs.sp = self.regs.sp.wrapping_sub(2);
    }

    fn pop_word(&mut self) -> u16 {
        let value = self.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        value
    }

    /// Read an 8-bit register or (HL) by table index:
    /// 0=B, 1=C, 2=D, 3=E, 4=H, 5=L, 6=(HL), 7=A.
    fn read_reg8(&mut self, index: u8) -> u8 {
        match index {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => self.read_byte(self.regs.hl()),
            7 => self.regs.a,
            _ => 0,
        }
    }

    /// Write an 8-bit register or (HL), using the same index mapping as
    /// `read_reg8`.
    fn write_reg8(&mut self, index: u8, value: u8) {
        match index {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => self.write_byte(self.regs.hl(), value),
            7 => self.regs.a = value,
            _ => {}
        }
    }

    /// Condition decode shared by JR/JP/CALL/RET cc: 0=NZ, 1=Z, 2=NC, 3=C.
    fn condition(&self, code: u8) -> bool {
        match code & 0x03 {
            0 => !self.get_flag(Flag::Z),
            1 => self.get_flag(Flag::Z),
            2 => !self.get_flag(Flag::C),
            _ => self.get_flag(Flag::C),
        }
    }

    /// Extra cycles charged by an executor on the taken path of a
    /// conditional branch; the opcode table carries the not-taken cost.
    #[inline]
    fn add_branch_cycles(&mut self, extra: u8) {
        self.t += extra as u32;
    }
}
