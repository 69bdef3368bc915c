use crate::mmu::{ADDR_GPU_REGS, ADDR_P1};

use super::opcodes::OPCODES;
use super::{Cpu, Instruction};

impl Cpu {
    /// Execute a single step and return the T-cycles it consumed.
    ///
    /// A step services memory-mapped IO and pending interrupts, then
    /// fetches and executes one instruction (or idles when halted or
    /// stopped) and publishes the cycle count to every clock subscriber.
    pub fn step(&mut self) -> u32 {
        self.t = 0;
        self.m = 0;

        if !self.boot_finished && self.regs.pc == 0x0100 {
            // Hand-off point: the overlay never comes back.
            self.boot_finished = true;
            log::debug!("boot ROM unmapped at pc=0x0100");
        }

        self.publish_trace();

        self.settle_io();
        self.service_interrupts();

        if self.stopped {
            // A keypad line pulled low resumes execution. The CPU is not
            // the P1 owner, so this observes the keypad's published value.
            let p1 = self.mmu.read_byte_at(ADDR_P1, self.keys);
            if p1 & 0x0F != 0x0F {
                self.stopped = false;
            }
        }

        if self.halted || self.stopped {
            // Suspended fetch still honors the clock.
            self.t = 4;
            self.m = self.t * 4;
        } else {
            self.fetch();
            // Many executors touch the GPU register file; hold its key
            // for the whole execute window.
            self.keys = self.mmu.lock_addr(ADDR_GPU_REGS, self.keys);
            self.execute();
            self.keys = self.mmu.unlock_addr(ADDR_GPU_REGS, self.keys);
        }

        for clock in &mut self.clocks {
            clock.add_cycles(self.t);
        }
        self.t
    }

    /// Load the next instruction into the buffer, advancing PC past the
    /// opcode and its immediate operands. A 0xCB prefix byte folds into
    /// the synthetic opcode space at 0x100.
    fn fetch(&mut self) {
        let pc = self.regs.pc;
        let mut op = self.read_byte(pc) as u16;
        self.regs.pc = self.regs.pc.wrapping_add(1);
        if op == 0xCB {
            op = 0x0100 | self.read_byte(self.regs.pc) as u16;
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }

        let Some(entry) = &OPCODES[op as usize] else {
            panic!("unknown opcode 0x{op:04X} at pc 0x{pc:04X}");
        };

        let mut operands = [0u8; 2];
        for slot in operands.iter_mut().take(entry.b as usize) {
            *slot = self.read_byte(self.regs.pc);
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
        self.inst = Instruction {
            op,
            p: operands,
            len: entry.b,
        };
    }

    /// Run the buffered instruction's executor and credit its cycles.
    fn execute(&mut self) {
        let op = self.inst.op as usize;
        let Some(entry) = &OPCODES[op] else {
            panic!("unknown opcode 0x{op:04X}");
        };
        let exec = entry.exec;
        let base_t = entry.t;

        exec(self);

        self.t += base_t as u32;
        self.m = self.t * 4;
    }

    fn publish_trace(&mut self) {
        if self.trace_subs.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.trace_subs
            .retain(|sub| sub.send(snapshot.clone()).is_ok());
    }
}
