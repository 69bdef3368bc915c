use once_cell::sync::Lazy;

use super::{Cpu, Flag};

pub(crate) type ExecFn = fn(&mut Cpu);

/// One entry in the synthetic opcode space.
///
/// `b` is the number of immediate operand bytes the fetch stage reads;
/// `t` is the base T-cycle cost. Conditional control flow records the
/// not-taken cost here and the executor charges the extra cycles itself
/// when the branch is taken.
#[derive(Clone)]
pub(crate) struct Opcode {
    pub(crate) mnemonic: String,
    pub(crate) b: u8,
    pub(crate) t: u8,
    pub(crate) exec: ExecFn,
}

/// 512-entry dispatch table: 256 base opcodes plus the 0xCB-prefixed
/// page at `0x100..0x200`. `None` entries are opcode holes; executing
/// one is fatal.
pub(crate) static OPCODES: Lazy<Vec<Option<Opcode>>> = Lazy::new(build_table);

const R8: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
const RR: [&str; 4] = ["BC", "DE", "HL", "SP"];
const RR_STACK: [&str; 4] = ["BC", "DE", "HL", "AF"];
const RR_IND: [&str; 4] = ["(BC)", "(DE)", "(HL+)", "(HL-)"];
const CC: [&str; 4] = ["NZ", "Z", "NC", "C"];
const ALU: [&str; 8] = [
    "ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP ",
];
const CB_ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SWAP", "SRL"];

fn build_table() -> Vec<Option<Opcode>> {
    fn def(
        table: &mut Vec<Option<Opcode>>,
        op: u16,
        mnemonic: impl Into<String>,
        b: u8,
        t: u8,
        exec: ExecFn,
    ) {
        let slot = &mut table[op as usize];
        assert!(slot.is_none(), "duplicate opcode 0x{op:04X}");
        *slot = Some(Opcode {
            mnemonic: mnemonic.into(),
            b,
            t,
            exec,
        });
    }

    let mut t: Vec<Option<Opcode>> = vec![None; 512];

    def(&mut t, 0x00, "NOP", 0, 4, exec_nop);
    def(&mut t, 0x08, "LD (a16),SP", 2, 20, exec_ld_a16_sp);
    def(&mut t, 0x10, "STOP", 1, 4, exec_stop);
    def(&mut t, 0x18, "JR e8", 1, 12, exec_jr);

    for i in 0..4u16 {
        def(
            &mut t,
            0x20 | (i << 3),
            format!("JR {},e8", CC[i as usize]),
            1,
            8,
            exec_jr_cc,
        );
        def(
            &mut t,
            0x01 | (i << 4),
            format!("LD {},d16", RR[i as usize]),
            2,
            12,
            exec_ld_rr_d16,
        );
        def(
            &mut t,
            0x03 | (i << 4),
            format!("INC {}", RR[i as usize]),
            0,
            8,
            exec_inc_rr,
        );
        def(
            &mut t,
            0x09 | (i << 4),
            format!("ADD HL,{}", RR[i as usize]),
            0,
            8,
            exec_add_hl_rr,
        );
        def(
            &mut t,
            0x0B | (i << 4),
            format!("DEC {}", RR[i as usize]),
            0,
            8,
            exec_dec_rr,
        );
        def(
            &mut t,
            0x02 | (i << 4),
            format!("LD {},A", RR_IND[i as usize]),
            0,
            8,
            exec_ld_ind_a,
        );
        def(
            &mut t,
            0x0A | (i << 4),
            format!("LD A,{}", RR_IND[i as usize]),
            0,
            8,
            exec_ld_a_ind,
        );
    }

    for y in 0..8u16 {
        let cost = if y == 6 { 12 } else { 4 };
        def(
            &mut t,
            0x04 | (y << 3),
            format!("INC {}", R8[y as usize]),
            0,
            cost,
            exec_inc_r8,
        );
        def(
            &mut t,
            0x05 | (y << 3),
            format!("DEC {}", R8[y as usize]),
            0,
            cost,
            exec_dec_r8,
        );
        let cost = if y == 6 { 12 } else { 8 };
        def(
            &mut t,
            0x06 | (y << 3),
            format!("LD {},d8", R8[y as usize]),
            1,
            cost,
            exec_ld_r8_d8,
        );
    }

    def(&mut t, 0x07, "RLCA", 0, 4, exec_rotate_a);
    def(&mut t, 0x0F, "RRCA", 0, 4, exec_rotate_a);
    def(&mut t, 0x17, "RLA", 0, 4, exec_rotate_a);
    def(&mut t, 0x1F, "RRA", 0, 4, exec_rotate_a);
    def(&mut t, 0x27, "DAA", 0, 4, exec_daa);
    def(&mut t, 0x2F, "CPL", 0, 4, exec_cpl);
    def(&mut t, 0x37, "SCF", 0, 4, exec_scf);
    def(&mut t, 0x3F, "CCF", 0, 4, exec_ccf);

    // 8-bit transfers 0x40-0x7F; 0x76 is HALT, not LD (HL),(HL).
    for y in 0..8u16 {
        for z in 0..8u16 {
            let op = 0x40 | (y << 3) | z;
            if op == 0x76 {
                continue;
            }
            let cost = if y == 6 || z == 6 { 8 } else { 4 };
            def(
                &mut t,
                op,
                format!("LD {},{}", R8[y as usize], R8[z as usize]),
                0,
                cost,
                exec_ld_r8_r8,
            );
        }
    }
    def(&mut t, 0x76, "HALT", 0, 4, exec_halt);

    // 8-bit ALU on A, register operands 0x80-0xBF and immediates.
    for fam in 0..8u16 {
        for z in 0..8u16 {
            let op = 0x80 | (fam << 3) | z;
            let cost = if z == 6 { 8 } else { 4 };
            def(
                &mut t,
                op,
                format!("{}{}", ALU[fam as usize], R8[z as usize]),
                0,
                cost,
                exec_alu_r8,
            );
        }
        def(
            &mut t,
            0xC6 | (fam << 3),
            format!("{}d8", ALU[fam as usize]),
            1,
            8,
            exec_alu_d8,
        );
    }

    for i in 0..4u16 {
        def(
            &mut t,
            0xC0 | (i << 3),
            format!("RET {}", CC[i as usize]),
            0,
            8,
            exec_ret_cc,
        );
        def(
            &mut t,
            0xC2 | (i << 3),
            format!("JP {},a16", CC[i as usize]),
            2,
            12,
            exec_jp_cc,
        );
        def(
            &mut t,
            0xC4 | (i << 3),
            format!("CALL {},a16", CC[i as usize]),
            2,
            12,
            exec_call_cc,
        );
        def(
            &mut t,
            0xC1 | (i << 4),
            format!("POP {}", RR_STACK[i as usize]),
            0,
            12,
            exec_pop_rr,
        );
        def(
            &mut t,
            0xC5 | (i << 4),
            format!("PUSH {}", RR_STACK[i as usize]),
            0,
            16,
            exec_push_rr,
        );
    }

    for i in 0..8u16 {
        def(
            &mut t,
            0xC7 | (i << 3),
            format!("RST 0x{:02X}", i * 8),
            0,
            16,
            exec_rst,
        );
    }

    def(&mut t, 0xC3, "JP a16", 2, 16, exec_jp);
    def(&mut t, 0xC9, "RET", 0, 16, exec_ret);
    def(&mut t, 0xCD, "CALL a16", 2, 24, exec_call);
    def(&mut t, 0xD9, "RETI", 0, 16, exec_reti);
    def(&mut t, 0xE0, "LDH (a8),A", 1, 12, exec_ldh_a8_a);
    def(&mut t, 0xF0, "LDH A,(a8)", 1, 12, exec_ldh_a_a8);
    def(&mut t, 0xE2, "LD (C),A", 0, 8, exec_ld_c_ind_a);
    def(&mut t, 0xF2, "LD A,(C)", 0, 8, exec_ld_a_c_ind);
    def(&mut t, 0xE8, "ADD SP,e8", 1, 16, exec_add_sp_e8);
    def(&mut t, 0xE9, "JP HL", 0, 4, exec_jp_hl);
    def(&mut t, 0xEA, "LD (a16),A", 2, 16, exec_ld_a16_a);
    def(&mut t, 0xFA, "LD A,(a16)", 2, 16, exec_ld_a_a16);
    def(&mut t, 0xF3, "DI", 0, 4, exec_di);
    def(&mut t, 0xFB, "EI", 0, 4, exec_ei);
    def(&mut t, 0xF8, "LD HL,SP+e8", 1, 12, exec_ld_hl_sp_e8);
    def(&mut t, 0xF9, "LD SP,HL", 0, 8, exec_ld_sp_hl);

    // The whole prefixed page is defined; cost depends only on whether
    // the operand is (HL).
    for cb in 0..0x100u16 {
        let x = cb >> 6;
        let y = ((cb >> 3) & 0x07) as usize;
        let z = (cb & 0x07) as usize;
        let (mnemonic, cost) = match x {
            0 => (
                format!("{} {}", CB_ROT[y], R8[z]),
                if z == 6 { 16 } else { 8 },
            ),
            1 => (format!("BIT {},{}", y, R8[z]), if z == 6 { 12 } else { 8 }),
            2 => (format!("RES {},{}", y, R8[z]), if z == 6 { 16 } else { 8 }),
            _ => (format!("SET {},{}", y, R8[z]), if z == 6 { 16 } else { 8 }),
        };
        def(&mut t, 0x100 | cb, mnemonic, 0, cost, exec_cb);
    }

    t
}

// 16-bit register pair selection for the 0x01/0x03/0x09/0x0B columns.
fn read_rr16(cpu: &Cpu, sel: u16) -> u16 {
    match sel & 0x03 {
        0 => cpu.regs.bc(),
        1 => cpu.regs.de(),
        2 => cpu.regs.hl(),
        _ => cpu.regs.sp,
    }
}

fn write_rr16(cpu: &mut Cpu, sel: u16, value: u16) {
    match sel & 0x03 {
        0 => cpu.regs.set_bc(value),
        1 => cpu.regs.set_de(value),
        2 => cpu.regs.set_hl(value),
        _ => cpu.regs.sp = value,
    }
}

fn jump_rel(cpu: &mut Cpu) {
    let offset = cpu.inst.imm8() as i8;
    cpu.regs.pc = cpu.regs.pc.wrapping_add(offset as i16 as u16);
}

fn alu_apply(cpu: &mut Cpu, family: u16, value: u8) {
    let a = cpu.regs.a;
    match family & 0x07 {
        0 => cpu.regs.a = cpu.alu_add(a, value),
        1 => cpu.regs.a = cpu.alu_adc(a, value),
        2 => cpu.regs.a = cpu.alu_sub(a, value),
        3 => cpu.regs.a = cpu.alu_sbc(a, value),
        4 => cpu.regs.a = cpu.alu_and(a, value),
        5 => cpu.regs.a = cpu.alu_xor(a, value),
        6 => cpu.regs.a = cpu.alu_or(a, value),
        _ => cpu.alu_cp(a, value),
    }
}

fn exec_nop(_cpu: &mut Cpu) {}

fn exec_ld_rr_d16(cpu: &mut Cpu) {
    let sel = cpu.inst.op >> 4;
    let value = cpu.inst.imm16();
    write_rr16(cpu, sel, value);
}

fn exec_inc_rr(cpu: &mut Cpu) {
    let sel = cpu.inst.op >> 4;
    let value = read_rr16(cpu, sel).wrapping_add(1);
    write_rr16(cpu, sel, value);
}

fn exec_dec_rr(cpu: &mut Cpu) {
    let sel = cpu.inst.op >> 4;
    let value = read_rr16(cpu, sel).wrapping_sub(1);
    write_rr16(cpu, sel, value);
}

fn exec_add_hl_rr(cpu: &mut Cpu) {
    let value = read_rr16(cpu, cpu.inst.op >> 4);
    cpu.alu_add16_hl(value);
}

fn exec_ld_ind_a(cpu: &mut Cpu) {
    let a = cpu.regs.a;
    match (cpu.inst.op >> 4) & 0x03 {
        0 => {
            let addr = cpu.regs.bc();
            cpu.write_byte(addr, a);
        }
        1 => {
            let addr = cpu.regs.de();
            cpu.write_byte(addr, a);
        }
        2 => {
            let hl = cpu.regs.hl();
            cpu.write_byte(hl, a);
            cpu.regs.set_hl(hl.wrapping_add(1));
        }
        _ => {
            let hl = cpu.regs.hl();
            cpu.write_byte(hl, a);
            cpu.regs.set_hl(hl.wrapping_sub(1));
        }
    }
}

fn exec_ld_a_ind(cpu: &mut Cpu) {
    match (cpu.inst.op >> 4) & 0x03 {
        0 => {
            let addr = cpu.regs.bc();
            cpu.regs.a = cpu.read_byte(addr);
        }
        1 => {
            let addr = cpu.regs.de();
            cpu.regs.a = cpu.read_byte(addr);
        }
        2 => {
            let hl = cpu.regs.hl();
            cpu.regs.a = cpu.read_byte(hl);
            cpu.regs.set_hl(hl.wrapping_add(1));
        }
        _ => {
            let hl = cpu.regs.hl();
            cpu.regs.a = cpu.read_byte(hl);
            cpu.regs.set_hl(hl.wrapping_sub(1));
        }
    }
}

fn exec_inc_r8(cpu: &mut Cpu) {
    let index = ((cpu.inst.op >> 3) & 0x07) as u8;
    let value = cpu.read_reg8(index);
    let result = cpu.alu_inc8(value);
    cpu.write_reg8(index, result);
}

fn exec_dec_r8(cpu: &mut Cpu) {
    let index = ((cpu.inst.op >> 3) & 0x07) as u8;
    let value = cpu.read_reg8(index);
    let result = cpu.alu_dec8(value);
    cpu.write_reg8(index, result);
}

fn exec_ld_r8_d8(cpu: &mut Cpu) {
    let index = ((cpu.inst.op >> 3) & 0x07) as u8;
    let value = cpu.inst.imm8();
    cpu.write_reg8(index, value);
}

fn exec_ld_r8_r8(cpu: &mut Cpu) {
    let dst = ((cpu.inst.op >> 3) & 0x07) as u8;
    let src = (cpu.inst.op & 0x07) as u8;
    let value = cpu.read_reg8(src);
    cpu.write_reg8(dst, value);
}

/// Unprefixed rotates of A; unlike their CB twins these always clear Z.
fn exec_rotate_a(cpu: &mut Cpu) {
    let a = cpu.regs.a;
    cpu.regs.a = match cpu.inst.op {
        0x07 => cpu.alu_rlc(a),
        0x0F => cpu.alu_rrc(a),
        0x17 => cpu.alu_rl(a),
        _ => cpu.alu_rr(a),
    };
    cpu.set_flag(Flag::Z, false);
}

fn exec_daa(cpu: &mut Cpu) {
    cpu.alu_daa();
}

fn exec_cpl(cpu: &mut Cpu) {
    cpu.alu_cpl();
}

fn exec_scf(cpu: &mut Cpu) {
    cpu.alu_scf();
}

fn exec_ccf(cpu: &mut Cpu) {
    cpu.alu_ccf();
}

fn exec_halt(cpu: &mut Cpu) {
    cpu.halted = true;
}

fn exec_stop(cpu: &mut Cpu) {
    cpu.stopped = true;
}

fn exec_alu_r8(cpu: &mut Cpu) {
    let family = cpu.inst.op >> 3;
    let value = cpu.read_reg8((cpu.inst.op & 0x07) as u8);
    alu_apply(cpu, family, value);
}

fn exec_alu_d8(cpu: &mut Cpu) {
    let family = cpu.inst.op >> 3;
    let value = cpu.inst.imm8();
    alu_apply(cpu, family, value);
}

fn exec_jr(cpu: &mut Cpu) {
    jump_rel(cpu);
}

fn exec_jr_cc(cpu: &mut Cpu) {
    if cpu.condition((cpu.inst.op >> 3) as u8) {
        jump_rel(cpu);
        cpu.add_branch_cycles(4);
    }
}

fn exec_jp(cpu: &mut Cpu) {
    cpu.regs.pc = cpu.inst.imm16();
}

fn exec_jp_cc(cpu: &mut Cpu) {
    if cpu.condition((cpu.inst.op >> 3) as u8) {
        cpu.regs.pc = cpu.inst.imm16();
        cpu.add_branch_cycles(4);
    }
}

fn exec_jp_hl(cpu: &mut Cpu) {
    cpu.regs.pc = cpu.regs.hl();
}

fn exec_call(cpu: &mut Cpu) {
    let ret = cpu.regs.pc;
    cpu.push_word(ret);
    cpu.regs.pc = cpu.inst.imm16();
}

fn exec_call_cc(cpu: &mut Cpu) {
    if cpu.condition((cpu.inst.op >> 3) as u8) {
        let ret = cpu.regs.pc;
        cpu.push_word(ret);
        cpu.regs.pc = cpu.inst.imm16();
        cpu.add_branch_cycles(12);
    }
}

fn exec_ret(cpu: &mut Cpu) {
    cpu.regs.pc = cpu.pop_word();
}

fn exec_ret_cc(cpu: &mut Cpu) {
    if cpu.condition((cpu.inst.op >> 3) as u8) {
        cpu.regs.pc = cpu.pop_word();
        cpu.add_branch_cycles(12);
    }
}

fn exec_reti(cpu: &mut Cpu) {
    cpu.regs.pc = cpu.pop_word();
    cpu.ime = true;
}

fn exec_rst(cpu: &mut Cpu) {
    let target = cpu.inst.op & 0x38;
    let ret = cpu.regs.pc;
    cpu.push_word(ret);
    cpu.regs.pc = target;
}

fn exec_push_rr(cpu: &mut Cpu) {
    let value = match (cpu.inst.op >> 4) & 0x03 {
        0 => cpu.regs.bc(),
        1 => cpu.regs.de(),
        2 => cpu.regs.hl(),
        _ => cpu.regs.af(),
    };
    cpu.push_word(value);
}

fn exec_pop_rr(cpu: &mut Cpu) {
    let value = cpu.pop_word();
    match (cpu.inst.op >> 4) & 0x03 {
        0 => cpu.regs.set_bc(value),
        1 => cpu.regs.set_de(value),
        2 => cpu.regs.set_hl(value),
        _ => cpu.regs.set_af(value),
    }
}

fn exec_ld_a16_sp(cpu: &mut Cpu) {
    let addr = cpu.inst.imm16();
    let sp = cpu.regs.sp;
    cpu.write_word(addr, sp);
}

fn exec_ldh_a8_a(cpu: &mut Cpu) {
    let addr = 0xFF00 | cpu.inst.imm8() as u16;
    let a = cpu.regs.a;
    cpu.write_byte(addr, a);
}

fn exec_ldh_a_a8(cpu: &mut Cpu) {
    let addr = 0xFF00 | cpu.inst.imm8() as u16;
    cpu.regs.a = cpu.read_byte(addr);
}

fn exec_ld_c_ind_a(cpu: &mut Cpu) {
    let addr = 0xFF00 | cpu.regs.c as u16;
    let a = cpu.regs.a;
    cpu.write_byte(addr, a);
}

fn exec_ld_a_c_ind(cpu: &mut Cpu) {
    let addr = 0xFF00 | cpu.regs.c as u16;
    cpu.regs.a = cpu.read_byte(addr);
}

fn exec_add_sp_e8(cpu: &mut Cpu) {
    let sp = cpu.regs.sp;
    let offset = cpu.inst.imm8();
    cpu.regs.sp = cpu.alu_add_sp_e8(sp, offset);
}

fn exec_ld_hl_sp_e8(cpu: &mut Cpu) {
    let sp = cpu.regs.sp;
    let offset = cpu.inst.imm8();
    let value = cpu.alu_add_sp_e8(sp, offset);
    cpu.regs.set_hl(value);
}

fn exec_ld_sp_hl(cpu: &mut Cpu) {
    cpu.regs.sp = cpu.regs.hl();
}

fn exec_ld_a16_a(cpu: &mut Cpu) {
    let addr = cpu.inst.imm16();
    let a = cpu.regs.a;
    cpu.write_byte(addr, a);
}

fn exec_ld_a_a16(cpu: &mut Cpu) {
    let addr = cpu.inst.imm16();
    cpu.regs.a = cpu.read_byte(addr);
}

fn exec_di(cpu: &mut Cpu) {
    cpu.ime = false;
}

fn exec_ei(cpu: &mut Cpu) {
    cpu.ime = true;
}

/// All 256 prefixed opcodes: rotates/shifts, BIT, RES, SET. The operand
/// encoding is the usual x/y/z field split of the second byte.
fn exec_cb(cpu: &mut Cpu) {
    let cb = (cpu.inst.op & 0xFF) as u8;
    let x = cb >> 6;
    let y = (cb >> 3) & 0x07;
    let z = cb & 0x07;

    match x {
        0 => {
            let value = cpu.read_reg8(z);
            let result = match y {
                0 => cpu.alu_rlc(value),
                1 => cpu.alu_rrc(value),
                2 => cpu.alu_rl(value),
                3 => cpu.alu_rr(value),
                4 => cpu.alu_sla(value),
                5 => cpu.alu_sra(value),
                6 => cpu.alu_swap(value),
                _ => cpu.alu_srl(value),
            };
            cpu.write_reg8(z, result);
        }
        1 => {
            let value = cpu.read_reg8(z);
            cpu.alu_bit(y, value);
        }
        2 => {
            let value = cpu.read_reg8(z);
            cpu.write_reg8(z, value & !(1 << y));
        }
        _ => {
            let value = cpu.read_reg8(z);
            cpu.write_reg8(z, value | (1 << y));
        }
    }
}
