//! The Ricoh 6502 CPU core.
//!
//! The host drives two entry points per master cycle, [`tick_phi1`] then
//! [`tick_phi2`], in strict alternation. Phi1 is internal work: the IRQ level
//! snapshot, the mapper's per-cycle hook, and DMA arbitration. Phi2 performs
//! the current micro-step's single bus access, then latches the NMI edge,
//! accumulates the IRQ level, and increments the cycle counter.

mod instructions;

use crate::bus;
use crate::bus::CpuBus;
use crate::cpu::instructions::{Instruction, InstructionState, INTERRUPT_HANDLER_OPS, RESET_OPS};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, serde::Serialize, serde::Deserialize)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    negative: bool,
    overflow: bool,
    decimal: bool,
    interrupt_disable: bool,
    zero: bool,
    carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I defaults to 1, everything else to 0
        Self {
            negative: false,
            overflow: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn set_overflow(&mut self, overflow: bool) -> &mut Self {
        self.overflow = overflow;
        self
    }

    pub fn set_zero(&mut self, zero: bool) -> &mut Self {
        self.zero = zero;
        self
    }

    pub fn set_carry(&mut self, carry: bool) -> &mut Self {
        self.carry = carry;
        self
    }

    /// The 8-bit status value as it appears on the bus. B is not a stored
    /// flag: it reads 1 when status is pushed by PHP or BRK and 0 when pushed
    /// by the hardware interrupt handler. Bit 5 always reads 1.
    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | b_flag
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    /// Build flags from a byte pulled off the stack; bits 4 and 5 are not
    /// stored.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte & 0x80 != 0,
            overflow: byte & 0x40 != 0,
            decimal: byte & 0x08 != 0,
            interrupt_disable: byte & 0x04 != 0,
            zero: byte & 0x02 != 0,
            carry: byte & 0x01 != 0,
        }
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
}

impl CpuRegisters {
    /// Power-on register values: A/X/Y zeroed, S at $FD, I set, PC loaded
    /// from the reset vector.
    pub fn create(bus: &mut CpuBus<'_>) -> Self {
        let pc_lsb = bus.read_address(bus::CPU_RESET_VECTOR);
        let pc_msb = bus.read_address(bus::CPU_RESET_VECTOR + 1);
        let pc = u16::from_le_bytes([pc_lsb, pc_msb]);

        Self {
            accumulator: 0,
            x: 0,
            y: 0,
            status: StatusFlags::new(),
            pc,
            sp: 0xFD,
        }
    }
}

/// Configuration for the opcodes whose behavior varies between physical
/// chips. ANE and LXA involve a "magic" constant that depends on chip
/// revision and even temperature; 0xFF models the common case, while the
/// community cycle-level test suites assume 0xEE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct CpuConfig {
    pub ane_lxa_magic: u8,
}

impl CpuConfig {
    #[must_use]
    pub fn new() -> Self {
        Self { ane_lxa_magic: 0xFF }
    }

    #[must_use]
    pub fn test_suite_compat() -> Self {
        Self { ane_lxa_magic: 0xEE }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The CPU's interrupt pipeline.
///
/// NMI is edge-triggered: the line's rising edge, sampled at phi2, sets
/// `nmi_detected` until the edge is consumed by vector selection. IRQ is
/// level-sensitive: the line is OR-accumulated into `irq_seen_low_phi2` at
/// every phi2, snapshotted into `irq_status_phi1` at the next phi1, and gated
/// by the I flag only at the instruction's polling point, which sets
/// `handle_irq`. The next opcode fetch consumes the handle flags.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct InterruptState {
    pub(crate) last_nmi: bool,
    pub(crate) nmi_detected: bool,
    pub(crate) irq_seen_low_phi2: bool,
    pub(crate) irq_status_phi1: bool,
    pub(crate) handle_nmi: bool,
    pub(crate) handle_irq: bool,
    pub(crate) reset_pending: bool,
}

/// OAM DMA steals the CPU for 513 or 514 cycles: an optional alignment cycle,
/// then 256 read/write pairs from `source_page` into the OAMDATA port. The
/// halt and alignment cycles re-read the current PC.
#[derive(Debug, Clone, Copy, Encode, Decode)]
struct OamDmaState {
    source_page: u8,
    offset: u16,
    latch: u8,
    align_cycles: u8,
    writing: bool,
}

impl OamDmaState {
    fn new(source_page: u8, extra_align_cycle: bool) -> Self {
        Self {
            source_page,
            offset: 0,
            latch: 0,
            align_cycles: u8::from(extra_align_cycle),
            writing: false,
        }
    }

    /// Run one DMA cycle; returns whether the transfer has completed.
    fn run_cycle(&mut self, registers: &CpuRegisters, bus: &mut CpuBus<'_>) -> bool {
        if self.align_cycles > 0 {
            self.align_cycles -= 1;
            bus.read_address(registers.pc);
            false
        } else if !self.writing {
            self.latch = bus.read_address(u16::from_be_bytes([self.source_page, self.offset as u8]));
            self.writing = true;
            false
        } else {
            bus.write_address(0x2004, self.latch);
            self.writing = false;
            self.offset += 1;
            self.offset == 256
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
enum ExecutionState {
    FetchOpcode,
    Executing(InstructionState),
    /// A JAM opcode was fetched; the CPU re-reads the same PC forever.
    Jammed,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuState {
    pub registers: CpuRegisters,
    exec: ExecutionState,
    oam_dma: Option<OamDmaState>,
    interrupts: InterruptState,
    config: CpuConfig,
    total_cycles: u64,
}

impl CpuState {
    #[must_use]
    pub fn new(registers: CpuRegisters) -> Self {
        Self::with_config(registers, CpuConfig::new())
    }

    #[must_use]
    pub fn with_config(registers: CpuRegisters, config: CpuConfig) -> Self {
        Self {
            registers,
            exec: ExecutionState::FetchOpcode,
            oam_dma: None,
            interrupts: InterruptState::default(),
            config,
            total_cycles: 0,
        }
    }

    /// Reset to known state: power-on register values with PC loaded from the
    /// reset vector, and the 7-cycle reset sequence pending. The sequence's
    /// three stack cycles are reads rather than writes, but S still
    /// decrements by 3.
    pub fn reset(&mut self, bus: &mut CpuBus<'_>) {
        self.registers = CpuRegisters::create(bus);
        self.exec = ExecutionState::FetchOpcode;
        self.oam_dma = None;
        self.interrupts = InterruptState {
            reset_pending: true,
            ..InterruptState::default()
        };
    }

    /// Whether the CPU is partway through an instruction (or halted for DMA).
    /// False at instruction boundaries, i.e. when the next cycle would fetch
    /// an opcode.
    #[must_use]
    pub fn is_mid_instruction(&self) -> bool {
        matches!(self.exec, ExecutionState::Executing(..)) || self.oam_dma.is_some()
    }

    #[must_use]
    pub fn is_jammed(&self) -> bool {
        matches!(self.exec, ExecutionState::Jammed)
    }

    /// Master cycle counter; increments once per phi2 for the life of the
    /// CPU.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }
}

/// First half of a master cycle: snapshot the IRQ level seen during the
/// previous phi2, run the mapper's per-cycle hook, and arbitrate a pending
/// OAM DMA request. No bus traffic occurs here.
pub fn tick_phi1(state: &mut CpuState, bus: &mut CpuBus<'_>) {
    state.interrupts.irq_status_phi1 = state.interrupts.irq_seen_low_phi2;
    state.interrupts.irq_seen_low_phi2 = false;

    bus.tick_mapper();

    if state.oam_dma.is_none() {
        if let Some(source_page) = bus.take_pending_oam_dma() {
            // The transfer takes an extra alignment cycle when the $4014
            // write landed on an odd CPU cycle (513 total when even, 514
            // when odd)
            let extra_align_cycle = state.total_cycles % 2 == 0;
            state.oam_dma = Some(OamDmaState::new(source_page, extra_align_cycle));
        }
    }
}

/// Second half of a master cycle: execute the current micro-step's single bus
/// access, then sample the interrupt lines and advance the cycle counter.
pub fn tick_phi2(state: &mut CpuState, bus: &mut CpuBus<'_>) {
    if let Some(mut oam_dma) = state.oam_dma.take() {
        // The CPU is halted; the in-flight instruction resumes at its exact
        // micro-step once the transfer completes. Interrupt-line sampling
        // below continues as normal.
        let finished = oam_dma.run_cycle(&state.registers, bus);
        if !finished {
            state.oam_dma = Some(oam_dma);
        }
    } else {
        match std::mem::replace(&mut state.exec, ExecutionState::FetchOpcode) {
            ExecutionState::FetchOpcode => {
                fetch_opcode(state, bus);
            }
            ExecutionState::Executing(instruction_state) => {
                let op = instruction_state.ops[usize::from(instruction_state.op_index)];
                let instruction_state = op.execute(
                    instruction_state,
                    &mut state.registers,
                    &mut state.interrupts,
                    state.config,
                    bus,
                );

                if usize::from(instruction_state.op_index) < instruction_state.ops.len() {
                    state.exec = ExecutionState::Executing(instruction_state);
                }
            }
            ExecutionState::Jammed => {
                bus.read_address(state.registers.pc);
                state.exec = ExecutionState::Jammed;
            }
        }
    }

    let nmi_line = bus.nmi_line();
    state.interrupts.nmi_detected |= !state.interrupts.last_nmi && nmi_line;
    state.interrupts.last_nmi = nmi_line;

    state.interrupts.irq_seen_low_phi2 |= bus.irq_line();

    state.total_cycles += 1;
}

/// The first cycle of every instruction: read the opcode at PC. A pending
/// reset or a polled interrupt steers execution into the corresponding
/// synthetic sequence instead; the fetched byte is discarded and PC is not
/// incremented.
fn fetch_opcode(state: &mut CpuState, bus: &mut CpuBus<'_>) {
    let opcode = bus.read_address(state.registers.pc);

    if state.interrupts.reset_pending {
        state.interrupts.reset_pending = false;
        state.interrupts.handle_nmi = false;
        state.interrupts.handle_irq = false;

        let mut instruction_state = InstructionState::from_ops(RESET_OPS.into_iter().collect());
        instruction_state.interrupt_vector = bus::CPU_RESET_VECTOR;
        state.exec = ExecutionState::Executing(instruction_state);
        return;
    }

    if state.interrupts.handle_nmi || state.interrupts.handle_irq {
        log::trace!(
            "Interrupt pending; discarding fetched opcode {opcode:02X} and entering the interrupt sequence"
        );
        state.interrupts.handle_nmi = false;
        state.interrupts.handle_irq = false;

        state.exec = ExecutionState::Executing(InstructionState::from_ops(
            INTERRUPT_HANDLER_OPS.into_iter().collect(),
        ));
        return;
    }

    match Instruction::from_opcode(opcode) {
        Some(instruction) => {
            state.registers.pc = state.registers.pc.wrapping_add(1);
            state.exec =
                ExecutionState::Executing(InstructionState::from_ops(instruction.cycle_ops()));
        }
        None => {
            log::debug!(
                "CPU jammed by opcode {opcode:02X} at PC {:04X}",
                state.registers.pc
            );
            state.exec = ExecutionState::Jammed;
        }
    }
}
