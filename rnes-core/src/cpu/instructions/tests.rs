use crate::bus::cartridge::{Mapper, NametableMirroring, RomImage};
use crate::bus::{Bus, BusOp, IrqSource};
use crate::cpu;
use crate::cpu::{CpuRegisters, CpuState, StatusReadContext};
use std::collections::HashMap;

#[derive(Default)]
struct ExpectedState {
    a: Option<u8>,
    x: Option<u8>,
    y: Option<u8>,
    p: Option<u8>,
    s: Option<u8>,
    pc: Option<u16>,
    memory: HashMap<u16, u8>,
    cycles: Option<u64>,
}

macro_rules! assert_state_eq {
    ($(($name:literal, $expected:expr, $actual:expr)),+$(,)?) => {
        {
            let mut errors: Vec<String> = Vec::new();

            $(
                if let Some(expected) = $expected {
                    let actual = $actual;
                    if expected != actual {
                        errors.push(format!("[{} mismatch: expected = {:02X}, actual = {:02X}]", $name, expected, actual));
                    }
                }
            )*

            errors
        }
    }
}

impl ExpectedState {
    fn assert_eq(&self, cpu_state: &CpuState, bus: &mut Bus, cycle_count: u64) {
        let registers = &cpu_state.registers;
        let mut errors = assert_state_eq!(
            ("A", self.a, registers.accumulator),
            ("X", self.x, registers.x),
            ("Y", self.y, registers.y),
            (
                "P",
                self.p,
                registers.status.to_byte(StatusReadContext::PushStack)
            ),
            ("S", self.s, registers.sp),
            ("PC", self.pc, registers.pc),
            ("Cycles", self.cycles, cycle_count),
        );

        for (&address, &value) in &self.memory {
            let actual_value = bus.cpu().read_address(address);
            if value != actual_value {
                errors.push(format!(
                    "[Mismatch at memory address {address:04X}: expected = {value:02X}, actual = {actual_value:02X}]"
                ));
            }
        }

        if !errors.is_empty() {
            panic!("Expected state mismatch: {}", errors.join(", "));
        }
    }
}

fn rom_from_program(program: &str) -> Vec<u8> {
    let mut prg_rom = vec![0; 16384];
    // RESET vector points at $8000
    prg_rom[16381] = 0x80;

    for (chunk, prg_byte) in program.as_bytes().chunks_exact(2).zip(prg_rom.iter_mut()) {
        let hex = String::from_utf8(Vec::from(chunk)).unwrap();
        let value = u8::from_str_radix(&hex, 16).unwrap();
        *prg_byte = value;
    }

    prg_rom
}

fn boot(prg_rom: Vec<u8>) -> (CpuState, Bus) {
    let mapper = Mapper::from_rom(RomImage {
        prg_rom,
        chr_rom: vec![0; 8192],
        prg_ram_size: 0,
        chr_ram_size: 0,
        mapper_number: 0,
        nametable_mirroring: NametableMirroring::Vertical,
    })
    .unwrap();

    let mut bus = Bus::from_cartridge(mapper);
    let cpu_state = CpuState::new(CpuRegisters::create(&mut bus.cpu()));

    (cpu_state, bus)
}

fn step(cpu_state: &mut CpuState, bus: &mut Bus, cycles: u64) {
    for _ in 0..cycles {
        cpu::tick_phi1(cpu_state, &mut bus.cpu());
        cpu::tick_phi2(cpu_state, &mut bus.cpu());
    }
}

fn run_test(program: &str, expected_state: ExpectedState) {
    let (mut cpu_state, mut bus) = boot(rom_from_program(program));

    let program_end = 0x8000 + (program.len() / 2) as u16;
    let mut cycle_count = 0;
    while cpu_state.registers.pc < program_end || cpu_state.is_mid_instruction() {
        step(&mut cpu_state, &mut bus, 1);
        cycle_count += 1;

        assert!(cycle_count < 10_000, "program did not terminate");
    }

    expected_state.assert_eq(&cpu_state, &mut bus, cycle_count);
}

#[test]
fn lda_immediate() {
    run_test(
        // LDA #$78
        "A978",
        ExpectedState {
            a: Some(0x78),
            p: Some(0x34),
            cycles: Some(2),
            ..ExpectedState::default()
        },
    );

    run_test(
        // LDA #$DD
        "A9DD",
        ExpectedState {
            a: Some(0xDD),
            p: Some(0xB4),
            cycles: Some(2),
            ..ExpectedState::default()
        },
    );

    run_test(
        // LDA #$00
        "A900",
        ExpectedState {
            a: Some(0x00),
            p: Some(0x36),
            cycles: Some(2),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn adc_immediate() {
    run_test(
        // LDA #$05; ADC #$03
        "A9056903",
        ExpectedState {
            a: Some(0x08),
            p: Some(0x34),
            pc: Some(0x8004),
            cycles: Some(4),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn adc_overflow_sets_v_and_n() {
    run_test(
        // LDA #$7F; ADC #$01
        "A97F6901",
        ExpectedState {
            a: Some(0x80),
            p: Some(0xF4),
            cycles: Some(4),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn sbc_immediate() {
    run_test(
        // SEC; LDA #$10; SBC #$01
        "38A910E901",
        ExpectedState {
            a: Some(0x0F),
            p: Some(0x35),
            cycles: Some(6),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn sta_absolute() {
    run_test(
        // LDA #$42; STA $0200
        "A9428D0002",
        ExpectedState {
            a: Some(0x42),
            memory: HashMap::from([(0x0200, 0x42)]),
            cycles: Some(6),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn inc_zero_page() {
    run_test(
        // INC $10; INC $10
        "E610E610",
        ExpectedState {
            memory: HashMap::from([(0x0010, 0x02)]),
            cycles: Some(10),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn pha_pla_round_trip() {
    run_test(
        // LDA #$42; PHA; LDA #$00; PLA
        "A94248A90068",
        ExpectedState {
            a: Some(0x42),
            s: Some(0xFD),
            p: Some(0x34),
            memory: HashMap::from([(0x01FD, 0x42)]),
            cycles: Some(11),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn php_plp_round_trip() {
    run_test(
        // LDA #$00; PHP; LDA #$01; PLP
        "A90008A90128",
        ExpectedState {
            a: Some(0x01),
            s: Some(0xFD),
            // Z restored by PLP; pushed byte has B and bit 5 set
            p: Some(0x36),
            memory: HashMap::from([(0x01FD, 0x36)]),
            cycles: Some(11),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn stack_wraparound() {
    run_test(
        // LDX #$00; TXS; LDA #$42; PHA
        "A2009AA94248",
        ExpectedState {
            a: Some(0x42),
            s: Some(0xFF),
            memory: HashMap::from([(0x0100, 0x42)]),
            cycles: Some(9),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn branch_not_taken() {
    run_test(
        // LDX #$01; BEQ +5
        "A201F005",
        ExpectedState {
            x: Some(0x01),
            pc: Some(0x8004),
            cycles: Some(4),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn branch_taken_same_page() {
    run_test(
        // LDX #$01; BNE +1 (skipping a NOP)
        "A201D001EA",
        ExpectedState {
            pc: Some(0x8005),
            cycles: Some(5),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn branch_taken_page_cross() {
    // NOP sled so that the branch operand sits at $80FE; the taken branch
    // from $80FF to $817E crosses a page and takes 4 cycles
    let program = "EA".repeat(253) + "D07F";
    run_test(
        &program,
        ExpectedState {
            pc: Some(0x817E),
            cycles: Some(253 * 2 + 4),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn absolute_x_read_page_cross_takes_extra_cycle() {
    run_test(
        // LDX #$01; LDA $02FF,X
        "A201BDFF02",
        ExpectedState {
            a: Some(0x00),
            p: Some(0x36),
            cycles: Some(2 + 5),
            ..ExpectedState::default()
        },
    );

    run_test(
        // LDX #$01; LDA $0200,X (no crossing)
        "A201BD0002",
        ExpectedState {
            a: Some(0x00),
            p: Some(0x36),
            cycles: Some(2 + 4),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn absolute_x_store_never_skips_dummy_read() {
    run_test(
        // LDX #$01; STA $0200,X
        "A2019D0002",
        ExpectedState {
            cycles: Some(2 + 5),
            ..ExpectedState::default()
        },
    );
}

#[test]
fn jmp_indirect_page_wrap_bug() {
    // LDA #$34; STA $01FF; LDA #$12; STA $0100; JMP ($01FF)
    // The pointer high byte comes from $0100, not $0200
    let (mut cpu_state, mut bus) = boot(rom_from_program("A9348DFF01A9128D00016CFF01"));

    step(&mut cpu_state, &mut bus, 17);

    assert_eq!(cpu_state.registers.pc, 0x1234);
    assert!(!cpu_state.is_mid_instruction());
}

#[test]
fn jam_opcode_freezes_cpu() {
    let (mut cpu_state, mut bus) = boot(rom_from_program("02"));

    step(&mut cpu_state, &mut bus, 1);
    assert!(cpu_state.is_jammed());
    assert_eq!(cpu_state.registers.pc, 0x8000);

    bus.set_op_log_enabled(true);
    step(&mut cpu_state, &mut bus, 5);

    assert_eq!(cpu_state.registers.pc, 0x8000);
    assert_eq!(bus.take_op_log(), vec![BusOp::Read(0x8000, 0x02); 5]);
}

#[test]
fn reset_sequence_from_blank_bus() {
    let mut bus = Bus::new();
    let mut cpu_state = CpuState::new(CpuRegisters::create(&mut bus.cpu()));

    cpu_state.reset(&mut bus.cpu());

    // Open bus reads 0x00 for both vector bytes
    assert_eq!(cpu_state.registers.pc, 0x0000);
    assert_eq!(cpu_state.registers.sp, 0xFD);
    assert_eq!(
        cpu_state.registers.status.to_byte(StatusReadContext::PushStack),
        0x34
    );

    bus.set_op_log_enabled(true);
    step(&mut cpu_state, &mut bus, 7);

    // The three stack cycles are reads, not writes, but S still decrements
    assert_eq!(cpu_state.registers.sp, 0xFA);
    assert_eq!(cpu_state.registers.pc, 0x0000);
    assert_eq!(
        bus.take_op_log(),
        vec![
            BusOp::Read(0x0000, 0x00),
            BusOp::Read(0x0000, 0x00),
            BusOp::Read(0x01FD, 0x00),
            BusOp::Read(0x01FC, 0x00),
            BusOp::Read(0x01FB, 0x00),
            BusOp::Read(0xFFFC, 0x00),
            BusOp::Read(0xFFFD, 0x00),
        ]
    );
}

#[test]
fn oam_dma_even_alignment() {
    // LDA $00; LDA #$02; STA $4014 puts the $4014 write on an even cycle
    let (mut cpu_state, mut bus) = boot(rom_from_program("A500A9028D1440"));

    for i in 0..=255_u16 {
        bus.poke(0x0200 + i, i as u8);
    }

    bus.set_op_log_enabled(true);

    // 9 instruction cycles, then 256 read/write pairs with no alignment
    // cycle: 513 cycles stolen from the write cycle onward
    step(&mut cpu_state, &mut bus, 520);
    assert!(cpu_state.is_mid_instruction());
    step(&mut cpu_state, &mut bus, 1);
    assert!(!cpu_state.is_mid_instruction());

    assert_eq!(cpu_state.registers.pc, 0x8007);

    let log = bus.take_op_log();
    // Exactly one bus access per cycle
    assert_eq!(log.len(), 521);
    assert_eq!(log[9], BusOp::Read(0x0200, 0x00));
    assert_eq!(log[10], BusOp::Write(0x2004, 0x00));

    let dma_writes: Vec<u8> = log
        .iter()
        .filter_map(|op| match op {
            BusOp::Write(0x2004, value) => Some(*value),
            _ => None,
        })
        .collect();
    let expected: Vec<u8> = (0..=255).collect();
    assert_eq!(dma_writes, expected);
}

#[test]
fn oam_dma_odd_alignment() {
    // LDA #$02; STA $4014 puts the $4014 write on an odd cycle, which costs
    // one extra alignment cycle: 514 total
    let (mut cpu_state, mut bus) = boot(rom_from_program("A9028D1440"));

    for i in 0..=255_u16 {
        bus.poke(0x0200 + i, i as u8);
    }

    bus.set_op_log_enabled(true);

    step(&mut cpu_state, &mut bus, 519);
    assert!(!cpu_state.is_mid_instruction());

    let log = bus.take_op_log();
    assert_eq!(log.len(), 519);
    // Alignment cycle re-reads the current PC before the first transfer read
    assert_eq!(log[6], BusOp::Read(0x8005, 0x00));
    assert_eq!(log[7], BusOp::Read(0x0200, 0x00));

    let dma_write_count = log
        .iter()
        .filter(|op| matches!(op, BusOp::Write(0x2004, _)))
        .count();
    assert_eq!(dma_write_count, 256);
}

fn interrupt_test_rom() -> Vec<u8> {
    // 32 KiB of NOPs with an RTI at the IRQ handler ($A000); NMI -> $9000,
    // RESET -> $8000, IRQ -> $A000
    let mut prg_rom = vec![0xEA; 32768];
    prg_rom[0x2000] = 0x40;
    prg_rom[0x7FFA] = 0x00;
    prg_rom[0x7FFB] = 0x90;
    prg_rom[0x7FFC] = 0x00;
    prg_rom[0x7FFD] = 0x80;
    prg_rom[0x7FFE] = 0x00;
    prg_rom[0x7FFF] = 0xA0;
    prg_rom
}

fn count_handler_entries(
    cpu_state: &mut CpuState,
    bus: &mut Bus,
    handler: u16,
    cycles: u64,
) -> u32 {
    let mut entries = 0;
    for _ in 0..cycles {
        step(cpu_state, bus, 1);
        if !cpu_state.is_mid_instruction() && cpu_state.registers.pc == handler {
            entries += 1;
        }
    }
    entries
}

#[test]
fn nmi_taken_once_per_edge() {
    let (mut cpu_state, mut bus) = boot(interrupt_test_rom());

    bus.interrupt_lines().set_nmi_line(true);
    let entries = count_handler_entries(&mut cpu_state, &mut bus, 0x9000, 100);
    assert_eq!(entries, 1);
    assert_eq!(cpu_state.registers.sp, 0xFA);

    // Status was pushed with B clear
    assert_eq!(bus.peek(0x01FB), 0x24);

    // Holding the line high does not retrigger
    let entries = count_handler_entries(&mut cpu_state, &mut bus, 0x9000, 100);
    assert_eq!(entries, 0);

    // A second edge does
    bus.interrupt_lines().set_nmi_line(false);
    step(&mut cpu_state, &mut bus, 4);
    bus.interrupt_lines().set_nmi_line(true);
    let entries = count_handler_entries(&mut cpu_state, &mut bus, 0x9000, 100);
    assert_eq!(entries, 1);
    assert_eq!(cpu_state.registers.sp, 0xF7);
}

#[test]
fn level_irq_retaken_while_line_low() {
    // CLI at $8000, RTI at the handler: with the line held low the handler
    // is re-entered as soon as RTI restores I=0
    let mut prg_rom = interrupt_test_rom();
    prg_rom[0] = 0x58;
    let (mut cpu_state, mut bus) = boot(prg_rom);

    bus.interrupt_lines().pull_irq_low(IrqSource::ApuFrameCounter);

    let entries = count_handler_entries(&mut cpu_state, &mut bus, 0xA000, 200);
    assert!(entries >= 2, "IRQ handler entered {entries} times");
}

#[test]
fn irq_masked_by_i_flag() {
    // No CLI: I stays set from power-on, so a held-low line is never taken
    let (mut cpu_state, mut bus) = boot(interrupt_test_rom());

    bus.interrupt_lines().pull_irq_low(IrqSource::ApuFrameCounter);

    let entries = count_handler_entries(&mut cpu_state, &mut bus, 0xA000, 100);
    assert_eq!(entries, 0);
    assert_eq!(cpu_state.registers.sp, 0xFD);
}

#[test]
fn brk_pushes_b_set_and_jumps_to_irq_vector() {
    let mut prg_rom = interrupt_test_rom();
    prg_rom[0] = 0x00;
    let (mut cpu_state, mut bus) = boot(prg_rom);

    step(&mut cpu_state, &mut bus, 7);

    assert_eq!(cpu_state.registers.pc, 0xA000);
    assert_eq!(cpu_state.registers.sp, 0xFA);
    // BRK pushes PC+2 and status with B set
    assert_eq!(bus.peek(0x01FD), 0x80);
    assert_eq!(bus.peek(0x01FC), 0x02);
    assert_eq!(bus.peek(0x01FB), 0x34);
}
