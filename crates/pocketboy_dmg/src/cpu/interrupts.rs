use crate::mmu::{ADDR_IE, ADDR_IF};

use super::Cpu;

/// The five maskable interrupt sources, in dispatch priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Keypad,
}

impl Interrupt {
    const PRIORITY: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::LcdStat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Keypad,
    ];

    /// Bit position shared by IE and IF.
    pub fn bit(self) -> u8 {
        match self {
            Interrupt::VBlank => 0x01,
            Interrupt::LcdStat => 0x02,
            Interrupt::Timer => 0x04,
            Interrupt::Serial => 0x08,
            Interrupt::Keypad => 0x10,
        }
    }

    /// Jump vector for the handler.
    pub fn vector(self) -> u16 {
        match self {
            Interrupt::VBlank => 0x0040,
            Interrupt::LcdStat => 0x0048,
            Interrupt::Timer => 0x0050,
            Interrupt::Serial => 0x0058,
            Interrupt::Keypad => 0x0060,
        }
    }

    /// Highest-priority interrupt that is both enabled and requested.
    fn highest_pending(ie: u8, iflag: u8) -> Option<Interrupt> {
        Interrupt::PRIORITY
            .into_iter()
            .find(|int| ie & iflag & int.bit() != 0)
    }
}

impl Cpu {
    /// Settle the IF queue: fold in any write staged by another bus
    /// master, then mask by IME and IE and publish the effective value.
    ///
    /// A halted CPU wakes here as soon as an enabled line is asserted,
    /// even with IME clear (in that case the interrupt is not serviced).
    pub(super) fn settle_io(&mut self) {
        let (iflag, _queued) = self.mmu.read_io_byte(ADDR_IF, self.keys);
        let ie = self.read_byte(ADDR_IE);

        if self.halted && iflag & ie & 0x1F != 0 {
            self.halted = false;
        }

        let effective = if self.ime { iflag & ie } else { 0 };
        self.write_byte(ADDR_IF, effective);
    }

    /// Dispatch the highest-priority pending interrupt, if any: clear
    /// IME, push PC, jump to the vector, and acknowledge the IF bit.
    pub(super) fn service_interrupts(&mut self) {
        if !self.ime {
            return;
        }
        let ie = self.read_byte(ADDR_IE);
        let iflag = self.read_byte(ADDR_IF);
        let Some(int) = Interrupt::highest_pending(ie, iflag) else {
            return;
        };

        log::debug!(
            "interrupt {:?}: vector=0x{:04X} pc=0x{:04X} IF=0x{:02X} IE=0x{:02X}",
            int,
            int.vector(),
            self.regs.pc,
            iflag,
            ie,
        );

        self.ime = false;
        self.halted = false;
        let pc = self.regs.pc;
        self.push_word(pc);
        self.regs.pc = int.vector();
        self.write_byte(ADDR_IF, iflag & !int.bit());
    }
}
