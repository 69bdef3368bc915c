use std::sync::Arc;

use super::opcodes::OPCODES;
use super::*;
use crate::mmu::Mmu;

fn test_cpu(rom: &[u8]) -> Cpu {
    let mmu = Arc::new(Mmu::new(rom));
    Cpu::new(mmu, None)
}

#[test]
fn nop_timing() {
    let mut cpu = test_cpu(&[0x00]);
    let t = cpu.step();
    assert_eq!(cpu.regs.pc, 0x0001);
    assert_eq!(t, 4);
    assert_eq!(cpu.t, 4);
    assert_eq!(cpu.m, 16);
    assert_eq!(cpu.regs.f(), 0x00);
}

#[test]
fn xor_a_zeroes_and_sets_z() {
    let mut cpu = test_cpu(&[0xAF]);
    cpu.regs.a = 0x5A;
    let t = cpu.step();
    assert_eq!(cpu.regs.a, 0x00);
    assert_eq!(cpu.regs.f(), 0x80);
    assert_eq!(cpu.regs.pc, 0x0001);
    assert_eq!(t, 4);
}

#[test]
fn ld_sp_d16_then_push_bc() {
    let mut cpu = test_cpu(&[0x31, 0xFE, 0xFF, 0xC5]);
    cpu.regs.b = 0x12;
    cpu.regs.c = 0x34;

    let t = cpu.step();
    assert_eq!(cpu.regs.sp, 0xFFFE);
    assert_eq!(cpu.regs.pc, 0x0003);
    assert_eq!(t, 12);

    let t = cpu.step();
    assert_eq!(cpu.read_byte(0xFFFC), 0x34);
    assert_eq!(cpu.read_byte(0xFFFD), 0x12);
    assert_eq!(cpu.regs.sp, 0xFFFC);
    assert_eq!(cpu.regs.pc, 0x0004);
    assert_eq!(t, 16);
}

#[test]
fn inc_a_half_carry() {
    let mut cpu = test_cpu(&[0x3C]);
    cpu.regs.a = 0x0F;
    cpu.set_flag(Flag::C, true);
    cpu.step();
    assert_eq!(cpu.regs.a, 0x10);
    assert!(!cpu.get_flag(Flag::Z));
    assert!(!cpu.get_flag(Flag::N));
    assert!(cpu.get_flag(Flag::H));
    // C is untouched by INC.
    assert!(cpu.get_flag(Flag::C));
}

#[test]
fn jr_nz_taken_wraps_backwards() {
    let mut cpu = test_cpu(&[0x20, 0xFB]);
    let t = cpu.step();
    assert_eq!(cpu.regs.pc, 0xFFFD);
    assert_eq!(t, 12);
}

#[test]
fn jr_nz_not_taken_costs_base_cycles() {
    let mut cpu = test_cpu(&[0x20, 0xFB]);
    cpu.set_flag(Flag::Z, true);
    let t = cpu.step();
    assert_eq!(cpu.regs.pc, 0x0002);
    assert_eq!(t, 8);
}

#[test]
fn interrupt_dispatch_services_highest_priority() {
    let mut cpu = test_cpu(&[0x00]);
    cpu.write_byte(0xFFFF, 0x05); // IE: VBlank + Timer
    cpu.write_byte(0xFF0F, 0x05); // IF: both pending
    assert!(cpu.ime);

    cpu.step();

    assert!(!cpu.ime);
    // VBlank serviced, Timer still pending.
    assert_eq!(cpu.read_byte(0xFF0F), 0x04);
    // Old PC (0x0000) pushed, then the NOP at the vector executed.
    assert_eq!(cpu.regs.sp, 0xFFFC);
    assert_eq!(cpu.read_byte(0xFFFC), 0x00);
    assert_eq!(cpu.read_byte(0xFFFD), 0x00);
    assert_eq!(cpu.regs.pc, 0x0041);
}

#[test]
fn conditional_call_and_ret_taken_costs() {
    // CALL NZ,0x0010 ... RET NZ at 0x0010.
    let mut rom = vec![0x00; 0x20];
    rom[0x00] = 0xC4;
    rom[0x01] = 0x10;
    rom[0x02] = 0x00;
    rom[0x10] = 0xC0;
    let mut cpu = test_cpu(&rom);
    cpu.regs.sp = 0xFFFE;

    let t = cpu.step();
    assert_eq!(t, 24);
    assert_eq!(cpu.regs.pc, 0x0010);
    assert_eq!(cpu.regs.sp, 0xFFFC);

    let t = cpu.step();
    assert_eq!(t, 20);
    assert_eq!(cpu.regs.pc, 0x0003);
    assert_eq!(cpu.regs.sp, 0xFFFE);
}

#[test]
fn halt_suspends_and_wakes_without_service_when_ime_clear() {
    let mut cpu = test_cpu(&[0x76, 0x00]);
    cpu.ime = false;
    cpu.step();
    assert!(cpu.halted);
    assert_eq!(cpu.regs.pc, 0x0001);

    // Halted steps idle at 4 T-cycles.
    let t = cpu.step();
    assert!(cpu.halted);
    assert_eq!(t, 4);
    assert_eq!(cpu.regs.pc, 0x0001);

    // An enabled, asserted line wakes the CPU even with IME clear; the
    // interrupt itself is not serviced.
    cpu.write_byte(0xFFFF, 0x01);
    cpu.write_byte(0xFF0F, 0x01);
    cpu.step();
    assert!(!cpu.halted);
    assert!(!cpu.ime);
    assert_eq!(cpu.regs.pc, 0x0002);
}

#[test]
fn stop_suspends_until_keypad_line_low() {
    let mut cpu = test_cpu(&[0x10, 0x00, 0x00]);
    cpu.step();
    assert!(cpu.stopped);
    assert_eq!(cpu.regs.pc, 0x0002);

    let t = cpu.step();
    assert!(cpu.stopped);
    assert_eq!(t, 4);

    // The keypad owns P1; its published value drives the wake-up.
    let keypad_keys = cpu.mmu.lock_addr(0xFF00, crate::mmu::AddressKeys::empty());
    cpu.mmu.write_byte_at(0xFF00, 0xEE, keypad_keys);
    cpu.step();
    assert!(!cpu.stopped);
    assert_eq!(cpu.regs.pc, 0x0003);
}

#[test]
fn boot_rom_overlay_until_pc_reaches_0x0100() {
    let mut rom = vec![0x77u8; 0x200];
    rom[0x100] = 0x00;
    let mut boot = [0u8; 0x100];
    boot[0x00] = 0x42;

    let mmu = Arc::new(Mmu::new(&rom));
    let mut cpu = Cpu::new(mmu, Some(boot));

    assert_eq!(cpu.read_byte(0x0000), 0x42);

    // First step at 0x0100 unmaps the overlay for good.
    cpu.regs.pc = 0x0100;
    cpu.step();
    assert!(cpu.boot_finished);
    assert_eq!(cpu.read_byte(0x0000), 0x77);
}

#[test]
#[should_panic(expected = "unknown opcode")]
fn opcode_hole_is_fatal() {
    let mut cpu = test_cpu(&[0xD3]);
    cpu.step();
}

#[test]
fn clock_subscriber_receives_step_cycles() {
    let mut cpu = test_cpu(&[0x00]);
    let rx = cpu.subscribe_clock();
    cpu.step();
    assert_eq!(rx.try_recv(), Ok(4));
}

#[test]
fn trace_subscriber_receives_snapshot() {
    let mut cpu = test_cpu(&[0x00]);
    let rx = cpu.subscribe_trace();
    cpu.step();
    let snapshot = rx.try_recv().expect("trace snapshot");
    assert!(snapshot.contains("pc:"));
    assert!(snapshot.contains("ime:"));
}

#[test]
fn f_low_nibble_always_reads_zero() {
    let mut regs = Registers::default();
    regs.set_f(0xFF);
    assert_eq!(regs.f(), 0xF0);
    regs.set_af(0x12FF);
    assert_eq!(regs.af(), 0x12F0);
    assert_eq!(regs.a, 0x12);
}

#[test]
fn register_pairs_compose_big_endian() {
    let mut regs = Registers::default();
    regs.set_bc(0x1234);
    assert_eq!(regs.b, 0x12);
    assert_eq!(regs.c, 0x34);
    assert_eq!(regs.bc(), 0x1234);
    regs.set_hl(0xBEEF);
    assert_eq!(regs.h, 0xBE);
    assert_eq!(regs.l, 0xEF);
}

#[test]
fn add_matches_mod_256_with_exact_flags() {
    let mut cpu = test_cpu(&[]);
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            cpu.clear_flags();
            let r = cpu.alu_add(a, b);
            assert_eq!(r, a.wrapping_add(b));
            assert_eq!(cpu.get_flag(Flag::Z), r == 0);
            assert!(!cpu.get_flag(Flag::N));
            assert_eq!(cpu.get_flag(Flag::H), (a & 0x0F) + (b & 0x0F) > 0x0F);
            assert_eq!(cpu.get_flag(Flag::C), a as u16 + b as u16 > 0xFF);
        }
    }
}

#[test]
fn sub_sets_borrow_flags() {
    let mut cpu = test_cpu(&[]);
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            cpu.clear_flags();
            let r = cpu.alu_sub(a, b);
            assert_eq!(r, a.wrapping_sub(b));
            assert_eq!(cpu.get_flag(Flag::Z), r == 0);
            assert!(cpu.get_flag(Flag::N));
            assert_eq!(cpu.get_flag(Flag::H), (a & 0x0F) < (b & 0x0F));
            assert_eq!(cpu.get_flag(Flag::C), a < b);
        }
    }
}

#[test]
fn adc_and_sbc_fold_in_carry() {
    let mut cpu = test_cpu(&[]);

    cpu.clear_flags();
    cpu.set_flag(Flag::C, true);
    assert_eq!(cpu.alu_adc(0x0F, 0x00), 0x10);
    assert!(cpu.get_flag(Flag::H));
    assert!(!cpu.get_flag(Flag::C));

    cpu.clear_flags();
    cpu.set_flag(Flag::C, true);
    assert_eq!(cpu.alu_sbc(0x10, 0x0F), 0x00);
    assert!(cpu.get_flag(Flag::Z));
    assert!(cpu.get_flag(Flag::H));
    assert!(!cpu.get_flag(Flag::C));

    cpu.clear_flags();
    cpu.set_flag(Flag::C, true);
    assert_eq!(cpu.alu_sbc(0x00, 0x00), 0xFF);
    assert!(cpu.get_flag(Flag::C));
}

#[test]
fn dec_half_borrow_leaves_carry() {
    let mut cpu = test_cpu(&[]);
    cpu.set_flag(Flag::C, true);
    let r = cpu.alu_dec8(0x10);
    assert_eq!(r, 0x0F);
    assert!(cpu.get_flag(Flag::N));
    assert!(cpu.get_flag(Flag::H));
    assert!(cpu.get_flag(Flag::C));

    let r = cpu.alu_dec8(0x01);
    assert_eq!(r, 0x00);
    assert!(cpu.get_flag(Flag::Z));
    assert!(!cpu.get_flag(Flag::H));
}

#[test]
fn rotate_through_carry() {
    let mut cpu = test_cpu(&[]);

    cpu.clear_flags();
    cpu.set_flag(Flag::C, true);
    let r = cpu.alu_rl(0x80);
    assert_eq!(r, 0x01);
    assert!(cpu.get_flag(Flag::C));
    assert!(!cpu.get_flag(Flag::Z));

    cpu.clear_flags();
    cpu.set_flag(Flag::C, true);
    let r = cpu.alu_rr(0x01);
    assert_eq!(r, 0x80);
    assert!(cpu.get_flag(Flag::C));

    cpu.clear_flags();
    let r = cpu.alu_rl(0x80);
    assert_eq!(r, 0x00);
    assert!(cpu.get_flag(Flag::Z));
    assert!(cpu.get_flag(Flag::C));
}

#[test]
fn bit_test_preserves_carry() {
    let mut cpu = test_cpu(&[]);
    cpu.set_flag(Flag::C, true);
    cpu.alu_bit(7, 0x80);
    assert!(!cpu.get_flag(Flag::Z));
    assert!(!cpu.get_flag(Flag::N));
    assert!(cpu.get_flag(Flag::H));
    assert!(cpu.get_flag(Flag::C));

    cpu.alu_bit(7, 0x00);
    assert!(cpu.get_flag(Flag::Z));
}

#[test]
fn add_sp_e8_flags_come_from_low_byte() {
    let mut cpu = test_cpu(&[]);

    cpu.clear_flags();
    let r = cpu.alu_add_sp_e8(0xFFF8, 0x08);
    assert_eq!(r, 0x0000);
    assert!(!cpu.get_flag(Flag::Z));
    assert!(!cpu.get_flag(Flag::N));
    assert!(cpu.get_flag(Flag::H));
    assert!(cpu.get_flag(Flag::C));

    cpu.clear_flags();
    let r = cpu.alu_add_sp_e8(0x000A, 0xFB); // -5
    assert_eq!(r, 0x0005);
    assert!(cpu.get_flag(Flag::H));
    assert!(cpu.get_flag(Flag::C));
}

#[test]
fn ldh_reaches_high_ram_and_gpu_regs() {
    // LD A,0x5C; LDH (0x80),A; LDH (0x42),A writes HRAM then SCY.
    let mut cpu = test_cpu(&[0x3E, 0x5C, 0xE0, 0x80, 0xE0, 0x42]);
    cpu.step();
    cpu.step();
    cpu.step();
    assert_eq!(cpu.read_byte(0xFF80), 0x5C);
    let gpu_keys = cpu.mmu.lock_addr(0xFF40, crate::mmu::AddressKeys::empty());
    assert_eq!(cpu.mmu.read_byte_at(0xFF42, gpu_keys), 0x5C);
}

#[test]
fn opcode_table_shape() {
    const HOLES: [usize; 11] = [
        0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
    ];

    assert_eq!(OPCODES.len(), 512);
    for (index, entry) in OPCODES.iter().enumerate() {
        match entry {
            Some(opcode) => {
                assert!(opcode.b <= 2, "opcode 0x{index:04X} has b={}", opcode.b);
                assert!(opcode.t > 0, "opcode 0x{index:04X} has zero cost");
                assert_eq!(opcode.t % 4, 0, "opcode 0x{index:04X} cost not in M-cycles");
            }
            None => {
                assert!(
                    HOLES.contains(&index) || index == 0xCB,
                    "unexpected hole at 0x{index:04X}"
                );
            }
        }
    }
    // The prefixed page is fully populated.
    for index in 0x100..0x200 {
        assert!(OPCODES[index].is_some(), "missing CB entry 0x{index:04X}");
    }
}

#[test]
fn daa_adjusts_bcd_addition() {
    // 0x15 + 0x27 = 0x3C, DAA corrects to 0x42.
    let mut cpu = test_cpu(&[]);
    cpu.clear_flags();
    cpu.regs.a = cpu.alu_add(0x15, 0x27);
    cpu.alu_daa();
    assert_eq!(cpu.regs.a, 0x42);
    assert!(!cpu.get_flag(Flag::C));
}

#[test]
fn reset_restores_power_on_state() {
    let mut cpu = test_cpu(&[0x31, 0x00, 0x80, 0xAF]);
    cpu.step();
    cpu.step();
    cpu.reset();
    assert_eq!(cpu.regs.pc, 0x0000);
    assert_eq!(cpu.regs.sp, 0xFFFE);
    assert_eq!(cpu.regs.a, 0x00);
    assert_eq!(cpu.regs.f(), 0x00);
    assert!(cpu.ime);
}
