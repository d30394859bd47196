//! The 6502 instruction set as per-cycle micro-step sequences.
//!
//! Every opcode decodes to a list of cycle ops that specify exactly what the
//! CPU does on each cycle of the instruction: one bus access per cycle, in
//! the order the real chip performs them, including the dummy reads and
//! spurious write-backs that are observable on the bus.
//!
//! Rather than one op kind per addressing mode, each memory op names a
//! [`MemoryTarget`] that resolves its effective address from the operand and
//! pointer bytes accumulated by earlier cycles. An instruction's sequence is
//! then the mode's address-formation cycles followed by a generic read,
//! store, or read-modify-write tail.

#[cfg(test)]
mod tests;

use crate::bus;
use crate::bus::CpuBus;
use crate::cpu::{
    CpuConfig, CpuRegisters, InterruptState, StatusFlags, StatusReadContext,
};
use crate::num::GetBit;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tinyvec::ArrayVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum AddressingMode {
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum CpuRegister {
    A,
    X,
    Y,
    S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum PushableRegister {
    A,
    P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum StorableRegister {
    A,
    X,
    Y,
    AX,
}

impl StorableRegister {
    fn read(self, registers: &CpuRegisters) -> u8 {
        match self {
            Self::A => registers.accumulator,
            Self::X => registers.x,
            Self::Y => registers.y,
            Self::AX => registers.accumulator & registers.x,
        }
    }
}

/// The registers involved in the unstable store opcodes. All of them AND the
/// stored value with the high byte of the target address plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum UnstableStore {
    // SHA (A & X)
    Sha,
    // SHS (A & X, also transferred into S)
    Shs,
    // SHX
    Shx,
    // SHY
    Shy,
}

impl UnstableStore {
    fn read(self, registers: &CpuRegisters) -> u8 {
        match self {
            Self::Sha | Self::Shs => registers.accumulator & registers.x,
            Self::Shx => registers.x,
            Self::Shy => registers.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum ReadInstruction {
    // ADC
    AddWithCarry(AddressingMode),
    // AND
    And(AddressingMode),
    // BIT
    BitTest(AddressingMode),
    // CMP / CPX / CPY
    Compare(CpuRegister, AddressingMode),
    // EOR
    ExclusiveOr(AddressingMode),
    // LDA / LDX / LDY
    Load(CpuRegister, AddressingMode),
    // ORA
    InclusiveOr(AddressingMode),
    // SBC
    SubtractWithCarry(AddressingMode),
    // ANC (unofficial AND + ASL/ROL carry)
    AndWithShiftLeft,
    // ASR / ALR (unofficial AND + LSR)
    AndWithShiftRight,
    // ARR (unofficial AND + ROR with ADC-style flags)
    AndWithRotateRight,
    // LAX (unofficial LDA + TAX)
    LoadTransferAX(AddressingMode),
    // ANE / XAA (unstable: A := (A | magic) & X & #imm)
    AneImmediate,
    // LXA (unstable: A := X := (A | magic) & #imm)
    LxaImmediate,
    // SBX / AXS (unofficial X := (A & X) - #imm)
    AXSubtract,
    // LAS (unofficial A := X := S := value & S)
    Las,
    // unofficial NOPs
    NoOp(AddressingMode),
}

impl ReadInstruction {
    fn execute(self, value: u8, registers: &mut CpuRegisters, config: CpuConfig) {
        match self {
            Self::AddWithCarry(..) => {
                registers.accumulator = add(registers.accumulator, value, &mut registers.status);
            }
            Self::And(..) => {
                registers.accumulator = and(registers.accumulator, value, &mut registers.status);
            }
            Self::BitTest(..) => {
                bit_test(registers.accumulator, value, &mut registers.status);
            }
            Self::Compare(register, ..) => {
                compare(read_register(registers, register), value, &mut registers.status);
            }
            Self::ExclusiveOr(..) => {
                registers.accumulator = xor(registers.accumulator, value, &mut registers.status);
            }
            Self::Load(register, ..) => {
                write_register(registers, register, value);
                set_nz(&mut registers.status, value);
            }
            Self::InclusiveOr(..) => {
                registers.accumulator = or(registers.accumulator, value, &mut registers.status);
            }
            Self::SubtractWithCarry(..) => {
                registers.accumulator =
                    subtract(registers.accumulator, value, &mut registers.status);
            }
            Self::AndWithShiftLeft => {
                // ANC is AND with the carry then set from bit 7, the way a
                // shift left would
                registers.accumulator = and(registers.accumulator, value, &mut registers.status);
                registers.status.carry = registers.accumulator.bit(7);
            }
            Self::AndWithShiftRight => {
                // ASR is an AND followed by an LSR of the accumulator
                let and_value = and(registers.accumulator, value, &mut registers.status);
                registers.accumulator = logical_shift_right(and_value, &mut registers.status);
            }
            Self::AndWithRotateRight => {
                // ARR: A := (A & #imm) rotated right through carry, but C and
                // V come from the rotated result as if an ADC were involved
                let rotated = ((registers.accumulator & value) >> 1)
                    | (u8::from(registers.status.carry) << 7);
                registers.accumulator = rotated;

                registers
                    .status
                    .set_overflow(rotated.bit(6) ^ rotated.bit(5))
                    .set_carry(rotated.bit(6));
                set_nz(&mut registers.status, rotated);
            }
            Self::LoadTransferAX(..) => {
                // LAX performs LDA and LDX simultaneously
                registers.accumulator = value;
                registers.x = value;
                set_nz(&mut registers.status, value);
            }
            Self::AneImmediate => {
                // Unstable: the result involves a constant that depends on
                // chip revision and temperature; the configured magic models
                // the commonly observed values
                let result = (registers.accumulator | config.ane_lxa_magic) & registers.x & value;
                registers.accumulator = result;
                set_nz(&mut registers.status, result);
            }
            Self::LxaImmediate => {
                let result = (registers.accumulator | config.ane_lxa_magic) & value;
                registers.accumulator = result;
                registers.x = result;
                set_nz(&mut registers.status, result);
            }
            Self::AXSubtract => {
                // SBX: X := (A & X) - #imm, ignoring the current carry; the
                // flags come from a compare rather than the subtraction
                let ax = registers.accumulator & registers.x;
                registers.x = ax.wrapping_sub(value);
                compare(ax, value, &mut registers.status);
            }
            Self::Las => {
                let result = value & registers.sp;
                registers.accumulator = result;
                registers.x = result;
                registers.sp = result;
                set_nz(&mut registers.status, result);
            }
            Self::NoOp(_) => {}
        }
    }

    fn addressing_mode(self) -> AddressingMode {
        match self {
            Self::AddWithCarry(addressing_mode)
            | Self::And(addressing_mode)
            | Self::BitTest(addressing_mode)
            | Self::Compare(_, addressing_mode)
            | Self::ExclusiveOr(addressing_mode)
            | Self::Load(_, addressing_mode)
            | Self::InclusiveOr(addressing_mode)
            | Self::SubtractWithCarry(addressing_mode)
            | Self::NoOp(addressing_mode)
            | Self::LoadTransferAX(addressing_mode) => addressing_mode,
            Self::AndWithShiftLeft
            | Self::AndWithShiftRight
            | Self::AndWithRotateRight
            | Self::AneImmediate
            | Self::LxaImmediate
            | Self::AXSubtract => AddressingMode::Immediate,
            Self::Las => AddressingMode::AbsoluteY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum ModifyInstruction {
    // ASL
    ShiftLeft(AddressingMode),
    // DEC
    Decrement(AddressingMode),
    // INC
    Increment(AddressingMode),
    // LSR
    LogicalShiftRight(AddressingMode),
    // ROL
    RotateLeft(AddressingMode),
    // ROR
    RotateRight(AddressingMode),
    // SLO (unofficial ASL + ORA)
    ShiftLeftOr(AddressingMode),
    // RLA (unofficial ROL + AND)
    RotateLeftAnd(AddressingMode),
    // SRE (unofficial LSR + EOR)
    ShiftRightExclusiveOr(AddressingMode),
    // RRA (unofficial ROR + ADC)
    RotateRightAdd(AddressingMode),
    // DCP (unofficial DEC + CMP)
    DecrementCompare(AddressingMode),
    // ISB / ISC (unofficial INC + SBC)
    IncrementSubtract(AddressingMode),
}

impl ModifyInstruction {
    fn addressing_mode(self) -> AddressingMode {
        match self {
            Self::ShiftLeft(addressing_mode)
            | Self::Decrement(addressing_mode)
            | Self::Increment(addressing_mode)
            | Self::LogicalShiftRight(addressing_mode)
            | Self::RotateLeft(addressing_mode)
            | Self::RotateRight(addressing_mode)
            | Self::ShiftLeftOr(addressing_mode)
            | Self::RotateLeftAnd(addressing_mode)
            | Self::ShiftRightExclusiveOr(addressing_mode)
            | Self::RotateRightAdd(addressing_mode)
            | Self::DecrementCompare(addressing_mode)
            | Self::IncrementSubtract(addressing_mode) => addressing_mode,
        }
    }

    fn execute(self, value: u8, registers: &mut CpuRegisters) -> u8 {
        match self {
            Self::ShiftLeft(..) => shift_left(value, &mut registers.status),
            Self::Decrement(..) => decrement(value, &mut registers.status),
            Self::Increment(..) => increment(value, &mut registers.status),
            Self::LogicalShiftRight(..) => logical_shift_right(value, &mut registers.status),
            Self::RotateLeft(..) => rotate_left(value, &mut registers.status),
            Self::RotateRight(..) => rotate_right(value, &mut registers.status),
            Self::ShiftLeftOr(..) => {
                let shifted = shift_left(value, &mut registers.status);
                registers.accumulator = or(registers.accumulator, shifted, &mut registers.status);
                shifted
            }
            Self::RotateLeftAnd(..) => {
                let rotated = rotate_left(value, &mut registers.status);
                registers.accumulator = and(registers.accumulator, rotated, &mut registers.status);
                rotated
            }
            Self::ShiftRightExclusiveOr(..) => {
                let shifted = logical_shift_right(value, &mut registers.status);
                registers.accumulator = xor(registers.accumulator, shifted, &mut registers.status);
                shifted
            }
            Self::RotateRightAdd(..) => {
                let rotated = rotate_right(value, &mut registers.status);
                registers.accumulator = add(registers.accumulator, rotated, &mut registers.status);
                rotated
            }
            Self::DecrementCompare(..) => {
                let decremented = decrement(value, &mut registers.status);
                compare(registers.accumulator, decremented, &mut registers.status);
                decremented
            }
            Self::IncrementSubtract(..) => {
                let incremented = increment(value, &mut registers.status);
                registers.accumulator =
                    subtract(registers.accumulator, incremented, &mut registers.status);
                incremented
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum RegistersInstruction {
    // CLC
    ClearCarryFlag,
    // CLD
    ClearDecimalFlag,
    // CLI
    ClearInterruptDisable,
    // CLV
    ClearOverflowFlag,
    // DEX / DEY
    Decrement(CpuRegister),
    // INX / INY
    Increment(CpuRegister),
    // NOP
    NoOp,
    // SEC
    SetCarryFlag,
    // SED
    SetDecimalFlag,
    // SEI
    SetInterruptDisable,
    // TAX / TAY / TSX / TXA / TXS / TYA
    Transfer { to: CpuRegister, from: CpuRegister },
}

impl RegistersInstruction {
    fn execute(self, registers: &mut CpuRegisters) {
        match self {
            Self::ClearCarryFlag => {
                registers.status.carry = false;
            }
            Self::ClearDecimalFlag => {
                registers.status.decimal = false;
            }
            Self::ClearInterruptDisable => {
                registers.status.interrupt_disable = false;
            }
            Self::ClearOverflowFlag => {
                registers.status.overflow = false;
            }
            Self::Decrement(register) => {
                let value = read_register(registers, register).wrapping_sub(1);
                write_register(registers, register, value);
                set_nz(&mut registers.status, value);
            }
            Self::Increment(register) => {
                let value = read_register(registers, register).wrapping_add(1);
                write_register(registers, register, value);
                set_nz(&mut registers.status, value);
            }
            Self::NoOp => {}
            Self::SetCarryFlag => {
                registers.status.carry = true;
            }
            Self::SetDecimalFlag => {
                registers.status.decimal = true;
            }
            Self::SetInterruptDisable => {
                registers.status.interrupt_disable = true;
            }
            Self::Transfer { to, from } => {
                let value = read_register(registers, from);
                write_register(registers, to, value);
                // TXS is the one transfer that does not touch the flags
                if to != CpuRegister::S {
                    set_nz(&mut registers.status, value);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum BranchCondition {
    // BCC
    CarryClear,
    // BCS
    CarrySet,
    // BEQ
    Equal,
    // BMI
    Minus,
    // BNE
    NotEqual,
    // BPL
    Positive,
    // BVC
    OverflowClear,
    // BVS
    OverflowSet,
}

impl BranchCondition {
    fn check(self, flags: StatusFlags) -> bool {
        match self {
            Self::CarryClear => !flags.carry,
            Self::CarrySet => flags.carry,
            Self::Equal => flags.zero,
            Self::Minus => flags.negative,
            Self::NotEqual => !flags.zero,
            Self::Positive => !flags.negative,
            Self::OverflowClear => !flags.overflow,
            Self::OverflowSet => flags.overflow,
        }
    }
}

pub(crate) type OpVec = ArrayVec<[CycleOp; 7]>;

/// Scratch state for the instruction currently in flight: the remaining
/// micro-step sequence, the index into it, the operand and pointer bytes
/// accumulated so far, and the value byte carried between the cycles of a
/// read-modify-write.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct InstructionState {
    #[bincode(with_serde)]
    pub ops: OpVec,
    pub op_index: u8,
    pub operand_low: u8,
    pub operand_high: u8,
    pub pointer_low: u8,
    pub pointer_high: u8,
    pub value: u8,
    pub interrupt_vector: u16,
}

impl InstructionState {
    pub(crate) fn from_ops(ops: OpVec) -> Self {
        Self {
            ops,
            op_index: 0,
            operand_low: 0,
            operand_high: 0,
            pointer_low: 0,
            pointer_high: 0,
            value: 0,
            interrupt_vector: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum Index {
    X,
    Y,
}

impl Index {
    fn get(self, registers: &CpuRegisters) -> u8 {
        match self {
            Self::X => registers.x,
            Self::Y => registers.y,
        }
    }
}

/// Where a memory op's effective address comes from. The operand bytes are
/// what the instruction stream supplied; the pointer bytes were fetched from
/// zero page by the indirect modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum MemoryTarget {
    ZeroPage,
    ZeroPageIndexed(Index),
    Absolute,
    AbsoluteIndexed(Index),
    Pointer,
    PointerIndexed,
}

impl MemoryTarget {
    /// The fully formed effective address.
    fn address(self, state: &InstructionState, registers: &CpuRegisters) -> u16 {
        match self {
            Self::ZeroPage => state.operand_low.into(),
            Self::ZeroPageIndexed(index) => {
                state.operand_low.wrapping_add(index.get(registers)).into()
            }
            Self::Absolute => u16::from_le_bytes([state.operand_low, state.operand_high]),
            Self::AbsoluteIndexed(index) => {
                u16::from_le_bytes([state.operand_low, state.operand_high])
                    .wrapping_add(index.get(registers).into())
            }
            Self::Pointer => u16::from_le_bytes([state.pointer_low, state.pointer_high]),
            Self::PointerIndexed => u16::from_le_bytes([state.pointer_low, state.pointer_high])
                .wrapping_add(registers.y.into()),
        }
    }

    /// The address driven on the bus while the address is still being
    /// formed, and whether the indexing actually crossed a page. Indexed
    /// absolute/pointer targets have the index added to the low byte only;
    /// zero-page indexed targets expose the base address (the hardware reads
    /// it during the cycle that adds the index). Everything else is already
    /// correct.
    fn unfixed_address(self, state: &InstructionState, registers: &CpuRegisters) -> (u16, bool) {
        match self {
            Self::ZeroPageIndexed(..) => (state.operand_low.into(), false),
            Self::AbsoluteIndexed(index) => {
                let (low, crossed) = state.operand_low.overflowing_add(index.get(registers));
                (u16::from_le_bytes([low, state.operand_high]), crossed)
            }
            Self::PointerIndexed => {
                let (low, crossed) = state.pointer_low.overflowing_add(registers.y);
                (u16::from_le_bytes([low, state.pointer_high]), crossed)
            }
            Self::ZeroPage | Self::Absolute | Self::Pointer => {
                (self.address(state, registers), false)
            }
        }
    }

    /// Whether forming this address can cross a page, which costs reads a
    /// conditional fix-up cycle and makes stores/modifies always pay it.
    fn has_page_crossing_penalty(self) -> bool {
        matches!(self, Self::AbsoluteIndexed(..) | Self::PointerIndexed)
    }

    /// The high byte of the base address, before indexing. Only meaningful
    /// for the targets the unstable stores use.
    fn base_high_byte(self, state: &InstructionState) -> u8 {
        match self {
            Self::AbsoluteIndexed(..) => state.operand_high,
            Self::PointerIndexed => state.pointer_high,
            _ => panic!("unstable store against non-indexed target: {self:?}"),
        }
    }
}

/// How the zero-page pointer address is formed for the indirect modes:
/// ($nn,X) indexes the pointer location itself, ($nn),Y fetches it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum PointerLocation {
    Direct,
    XIndexed,
}

impl PointerLocation {
    /// The zero-page address of the pointer byte at `offset`; both the
    /// indexing and the offset wrap within page zero.
    fn address(self, state: &InstructionState, registers: &CpuRegisters, offset: u8) -> u16 {
        let base = match self {
            Self::Direct => state.operand_low,
            Self::XIndexed => state.operand_low.wrapping_add(registers.x),
        };
        base.wrapping_add(offset).into()
    }
}

/// One CPU cycle of an instruction. Each op performs exactly one bus access
/// at phi2 (real 6502s access the bus on every cycle, even the "internal"
/// ones) and then advances the micro-step index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum CycleOp {
    /// Read the next instruction byte into the operand low byte.
    FetchOperand1,
    /// Read the next instruction byte into the operand high byte.
    FetchOperand2,
    /// Re-read the byte at PC without consuming it.
    DummyPcRead,
    /// Read the top of the stack without moving S.
    DummyStackRead,
    /// Read the target's not-yet-formed address and throw the result away.
    DummyRead(MemoryTarget),
    /// Read one byte of a zero-page pointer.
    FetchPointerLow(PointerLocation),
    FetchPointerHigh(PointerLocation),
    /// Read the target into the scratch value byte (the first cycle of a
    /// read-modify-write's read/write-back/write tail).
    FetchTarget(MemoryTarget),
    /// Write the unmodified scratch value back to the target.
    WriteBack(MemoryTarget),
    Read(MemoryTarget, ReadInstruction),
    /// Read at the unfixed address; when no page was crossed the value is
    /// used and the fix-up cycle that follows is skipped.
    ReadOptimistic(MemoryTarget, ReadInstruction),
    Store(MemoryTarget, StorableRegister),
    /// Modify the scratch value and write the result to the target.
    Modify(MemoryTarget, ModifyInstruction),
    UnstableStore(MemoryTarget, UnstableStore),
    ImmediateRead(ReadInstruction),
    AccumulatorModify(ModifyInstruction),
    RegistersOnly(RegistersInstruction),
    CheckBranchCondition(BranchCondition),
    /// Apply the branch offset if it stays within the page; otherwise fall
    /// through to the fix-up cycle.
    TakeBranchSamePage,
    TakeBranchFixHighByte,
    JumpAbsolute,
    JumpIndirect,
    Push(PushableRegister),
    Pull(PushableRegister),
    PushPCHigh,
    PushPCLow,
    PullPCLow,
    PullPCHigh,
    /// Push status and commit to an interrupt vector (NMI can hijack here).
    InterruptPushStatus(StatusReadContext),
    InterruptVectorLow,
    InterruptVectorHigh,
    /// A reset-suppressed stack push: the bus sees a read, S still moves.
    ResetDummyStackRead,
}

// Needed for ArrayVec
impl Default for CycleOp {
    fn default() -> Self {
        Self::FetchOperand1
    }
}

fn stack_address(registers: &CpuRegisters) -> u16 {
    bus::CPU_STACK_START | u16::from(registers.sp)
}

fn stack_push(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>, value: u8) {
    bus.write_address(stack_address(registers), value);
    registers.sp = registers.sp.wrapping_sub(1);
}

fn stack_pull(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>) -> u8 {
    registers.sp = registers.sp.wrapping_add(1);
    bus.read_address(stack_address(registers))
}

/// A branch offset is signed and relative to the PC after the operand fetch.
fn branch_target(pc: u16, offset: u8) -> u16 {
    pc.wrapping_add(offset as i8 as u16)
}

fn poll_interrupt_lines(registers: &CpuRegisters, interrupts: &mut InterruptState) {
    if interrupts.nmi_detected {
        interrupts.handle_nmi = true;
    } else {
        interrupts.handle_irq =
            !registers.status.interrupt_disable && interrupts.irq_status_phi1;
    }
}

impl CycleOp {
    pub(crate) fn execute(
        self,
        mut state: InstructionState,
        registers: &mut CpuRegisters,
        interrupts: &mut InterruptState,
        config: CpuConfig,
        bus: &mut CpuBus<'_>,
    ) -> InstructionState {
        // Interrupts are polled at the end of the second-to-last cycle of
        // most instructions, which is here, before the final op executes
        // (the final op could modify the I flag). Branches poll at the
        // condition-check cycle instead, and a taken branch that crosses a
        // page does not poll on its fix-up cycle at all. Optimistic indexed
        // reads poll on the cycle that is last when no page is crossed.
        let is_poll_cycle = (usize::from(state.op_index) == state.ops.len() - 1
            && !matches!(self, Self::TakeBranchFixHighByte))
            || matches!(
                self,
                Self::CheckBranchCondition(..) | Self::ReadOptimistic(..)
            );
        if is_poll_cycle {
            poll_interrupt_lines(registers, interrupts);
        }

        match self {
            Self::FetchOperand1 => {
                state.operand_low = bus.read_address(registers.pc);
                registers.pc = registers.pc.wrapping_add(1);
            }
            Self::FetchOperand2 => {
                state.operand_high = bus.read_address(registers.pc);
                registers.pc = registers.pc.wrapping_add(1);
            }
            Self::DummyPcRead => {
                bus.read_address(registers.pc);
            }
            Self::DummyStackRead => {
                bus.read_address(stack_address(registers));
            }
            Self::DummyRead(target) => {
                let (address, _) = target.unfixed_address(&state, registers);
                bus.read_address(address);
            }
            Self::FetchPointerLow(location) => {
                let address = location.address(&state, registers, 0);
                state.pointer_low = bus.read_address(address);
            }
            Self::FetchPointerHigh(location) => {
                let address = location.address(&state, registers, 1);
                state.pointer_high = bus.read_address(address);
            }
            Self::FetchTarget(target) => {
                let address = target.address(&state, registers);
                state.value = bus.read_address(address);
            }
            Self::WriteBack(target) => {
                let address = target.address(&state, registers);
                bus.write_address(address, state.value);
            }
            Self::Read(target, instruction) => {
                let value = bus.read_address(target.address(&state, registers));
                instruction.execute(value, registers, config);
            }
            Self::ReadOptimistic(target, instruction) => {
                let (address, crossed) = target.unfixed_address(&state, registers);
                let value = bus.read_address(address);

                if crossed {
                    log::trace!("  ReadOptimistic: page crossed, taking the fix-up cycle");
                } else {
                    instruction.execute(value, registers, config);

                    // Skip the fix-up cycle
                    state.op_index += 1;
                }
            }
            Self::Store(target, register) => {
                let address = target.address(&state, registers);
                bus.write_address(address, register.read(registers));
            }
            Self::Modify(target, instruction) => {
                let result = instruction.execute(state.value, registers);
                let address = target.address(&state, registers);
                bus.write_address(address, result);
            }
            Self::UnstableStore(target, register) => {
                // The stored value is ANDed with the high byte of the base
                // address plus one; when the indexing crosses a page, the
                // corrupted value also replaces the high byte of the
                // effective address
                let (unfixed_address, crossed) = target.unfixed_address(&state, registers);

                if register == UnstableStore::Shs {
                    registers.sp = registers.accumulator & registers.x;
                }

                let value = register.read(registers) & target.base_high_byte(&state).wrapping_add(1);
                let address = if crossed {
                    u16::from_le_bytes([(unfixed_address & 0x00FF) as u8, value])
                } else {
                    unfixed_address
                };

                bus.write_address(address, value);
            }
            Self::ImmediateRead(instruction) => {
                let operand = bus.read_address(registers.pc);
                registers.pc = registers.pc.wrapping_add(1);

                instruction.execute(operand, registers, config);
            }
            Self::AccumulatorModify(instruction) => {
                bus.read_address(registers.pc);

                registers.accumulator = instruction.execute(registers.accumulator, registers);
            }
            Self::RegistersOnly(instruction) => {
                bus.read_address(registers.pc);

                instruction.execute(registers);
            }
            Self::CheckBranchCondition(condition) => {
                state.operand_low = bus.read_address(registers.pc);
                registers.pc = registers.pc.wrapping_add(1);

                if !condition.check(registers.status) {
                    // Fall straight through to the next instruction
                    state.op_index += 2;
                }
            }
            Self::TakeBranchSamePage => {
                bus.read_address(registers.pc);

                let target = branch_target(registers.pc, state.operand_low);
                if registers.pc & 0xFF00 == target & 0xFF00 {
                    registers.pc = target;
                    state.op_index += 1;
                } else {
                    log::trace!(
                        "  TakeBranchSamePage: branch crossed a page, taking the fix-up cycle"
                    );
                }
            }
            Self::TakeBranchFixHighByte => {
                let target = branch_target(registers.pc, state.operand_low);

                // The read goes to the target with the not-yet-fixed high byte
                bus.read_address((registers.pc & 0xFF00) | (target & 0x00FF));

                registers.pc = target;
            }
            Self::JumpAbsolute => {
                let msb = bus.read_address(registers.pc);
                registers.pc = u16::from_le_bytes([state.operand_low, msb]);
            }
            Self::JumpIndirect => {
                // The pointer's low byte wraps within its page rather than
                // carrying into the high byte
                let second_byte_address = u16::from_le_bytes([
                    state.operand_low.wrapping_add(1),
                    state.operand_high,
                ]);
                let msb = bus.read_address(second_byte_address);

                registers.pc = u16::from_le_bytes([state.value, msb]);
            }
            Self::Push(register) => {
                let value = match register {
                    PushableRegister::A => registers.accumulator,
                    PushableRegister::P => registers.status.to_byte(StatusReadContext::PushStack),
                };
                stack_push(registers, bus, value);
            }
            Self::Pull(register) => {
                let value = stack_pull(registers, bus);
                match register {
                    PushableRegister::A => {
                        registers.accumulator = value;
                        set_nz(&mut registers.status, value);
                    }
                    PushableRegister::P => {
                        registers.status = StatusFlags::from_byte(value);
                    }
                }
            }
            Self::PushPCHigh => {
                stack_push(registers, bus, (registers.pc >> 8) as u8);
            }
            Self::PushPCLow => {
                stack_push(registers, bus, (registers.pc & 0x00FF) as u8);
            }
            Self::PullPCLow => {
                let lsb = stack_pull(registers, bus);
                registers.pc = lsb.into();
            }
            Self::PullPCHigh => {
                let msb = stack_pull(registers, bus);
                registers.pc |= u16::from(msb) << 8;
            }
            Self::InterruptPushStatus(read_ctx) => {
                let status = registers.status.to_byte(read_ctx);
                stack_push(registers, bus, status);

                // RESET > NMI > IRQ/BRK; an NMI edge that arrives before this
                // cycle hijacks a BRK or IRQ sequence already in flight
                state.interrupt_vector = if interrupts.nmi_detected {
                    log::trace!("  InterruptPushStatus: jumping to NMI vector");

                    interrupts.nmi_detected = false;
                    bus::CPU_NMI_VECTOR
                } else {
                    bus::CPU_IRQ_VECTOR
                };
            }
            Self::InterruptVectorLow => {
                registers.pc = u16::from(bus.read_address(state.interrupt_vector));
                registers.status.interrupt_disable = true;
            }
            Self::InterruptVectorHigh => {
                let msb = bus.read_address(state.interrupt_vector.wrapping_add(1));
                registers.pc |= u16::from(msb) << 8;
            }
            Self::ResetDummyStackRead => {
                // During reset the stack pushes are suppressed into reads,
                // but S still decrements
                bus.read_address(stack_address(registers));
                registers.sp = registers.sp.wrapping_sub(1);
            }
        }

        state.op_index += 1;
        state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Read(ReadInstruction),
    Modify(ModifyInstruction),
    RegistersOnly(RegistersInstruction),
    Branch(BranchCondition),
    // STA / STX / STY / SAX (SAX == unofficial STA + STX)
    StoreRegister(StorableRegister, AddressingMode),
    // SHA / SHS / SHX / SHY (unstable high-address stores)
    UnstableStore(UnstableStore, AddressingMode),
    // BRK
    ForceInterrupt,
    // JMP
    Jump(AddressingMode),
    // JSR
    JumpToSubroutine,
    // PHA / PHP
    PushStack(PushableRegister),
    // PLA / PLP
    PullStack(PushableRegister),
    // RTI
    ReturnFromInterrupt,
    // RTS
    ReturnFromSubroutine,
}

impl Instruction {
    pub(crate) fn cycle_ops(self) -> OpVec {
        match self {
            Self::Read(instruction) => read_cycle_ops(instruction),
            Self::Modify(instruction) => modify_cycle_ops(instruction),
            Self::StoreRegister(register, addressing_mode) => {
                let (mut ops, target) = address_ops(addressing_mode);
                if target.has_page_crossing_penalty() {
                    // Stores always pay the fix-up cycle
                    ops.push(CycleOp::DummyRead(target));
                }
                ops.push(CycleOp::Store(target, register));
                ops
            }
            Self::UnstableStore(register, addressing_mode) => {
                let (mut ops, target) = address_ops(addressing_mode);
                assert!(
                    target.has_page_crossing_penalty(),
                    "invalid unstable store addressing mode: {addressing_mode:?}"
                );
                ops.push(CycleOp::DummyRead(target));
                ops.push(CycleOp::UnstableStore(target, register));
                ops
            }
            Self::RegistersOnly(instruction) => {
                [CycleOp::RegistersOnly(instruction)].into_iter().collect()
            }
            Self::Branch(condition) => [
                CycleOp::CheckBranchCondition(condition),
                CycleOp::TakeBranchSamePage,
                CycleOp::TakeBranchFixHighByte,
            ]
            .into_iter()
            .collect(),
            Self::Jump(AddressingMode::Absolute) => {
                [CycleOp::FetchOperand1, CycleOp::JumpAbsolute]
                    .into_iter()
                    .collect()
            }
            Self::Jump(AddressingMode::Indirect) => [
                CycleOp::FetchOperand1,
                CycleOp::FetchOperand2,
                CycleOp::FetchTarget(MemoryTarget::Absolute),
                CycleOp::JumpIndirect,
            ]
            .into_iter()
            .collect(),
            Self::Jump(addressing_mode) => {
                panic!("invalid jump addressing mode: {addressing_mode:?}")
            }
            Self::PushStack(register) => [CycleOp::DummyPcRead, CycleOp::Push(register)]
                .into_iter()
                .collect(),
            Self::PullStack(register) => [
                CycleOp::DummyPcRead,
                CycleOp::DummyStackRead,
                CycleOp::Pull(register),
            ]
            .into_iter()
            .collect(),
            Self::JumpToSubroutine => [
                CycleOp::FetchOperand1,
                CycleOp::DummyStackRead,
                CycleOp::PushPCHigh,
                CycleOp::PushPCLow,
                CycleOp::JumpAbsolute,
            ]
            .into_iter()
            .collect(),
            Self::ReturnFromSubroutine => [
                CycleOp::DummyPcRead,
                CycleOp::DummyStackRead,
                CycleOp::PullPCLow,
                CycleOp::PullPCHigh,
                CycleOp::FetchOperand1,
            ]
            .into_iter()
            .collect(),
            Self::ReturnFromInterrupt => [
                CycleOp::DummyPcRead,
                CycleOp::DummyStackRead,
                CycleOp::Pull(PushableRegister::P),
                CycleOp::PullPCLow,
                CycleOp::PullPCHigh,
            ]
            .into_iter()
            .collect(),
            Self::ForceInterrupt => [
                CycleOp::FetchOperand1,
                CycleOp::PushPCHigh,
                CycleOp::PushPCLow,
                CycleOp::InterruptPushStatus(StatusReadContext::Brk),
                CycleOp::InterruptVectorLow,
                CycleOp::InterruptVectorHigh,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub(crate) fn from_opcode(opcode: u8) -> Option<Self> {
        use AddressingMode as AM;
        use ModifyInstruction as MI;
        use ReadInstruction as RI;

        match opcode {
            0x00 => Some(Self::ForceInterrupt),
            0x01 => Some(Self::Read(RI::InclusiveOr(AM::IndirectX))),
            0x03 => Some(Self::Modify(MI::ShiftLeftOr(AM::IndirectX))),
            0x04 | 0x44 | 0x64 => Some(Self::Read(RI::NoOp(AM::ZeroPage))),
            0x05 => Some(Self::Read(RI::InclusiveOr(AM::ZeroPage))),
            0x06 => Some(Self::Modify(MI::ShiftLeft(AM::ZeroPage))),
            0x07 => Some(Self::Modify(MI::ShiftLeftOr(AM::ZeroPage))),
            0x08 => Some(Self::PushStack(PushableRegister::P)),
            0x09 => Some(Self::Read(RI::InclusiveOr(AM::Immediate))),
            0x0A => Some(Self::Modify(MI::ShiftLeft(AM::Accumulator))),
            0x0B | 0x2B => Some(Self::Read(RI::AndWithShiftLeft)),
            0x0C => Some(Self::Read(RI::NoOp(AM::Absolute))),
            0x0D => Some(Self::Read(RI::InclusiveOr(AM::Absolute))),
            0x0E => Some(Self::Modify(MI::ShiftLeft(AM::Absolute))),
            0x0F => Some(Self::Modify(MI::ShiftLeftOr(AM::Absolute))),
            0x10 => Some(Self::Branch(BranchCondition::Positive)),
            0x11 => Some(Self::Read(RI::InclusiveOr(AM::IndirectY))),
            0x13 => Some(Self::Modify(MI::ShiftLeftOr(AM::IndirectY))),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => Some(Self::Read(RI::NoOp(AM::ZeroPageX))),
            0x15 => Some(Self::Read(RI::InclusiveOr(AM::ZeroPageX))),
            0x16 => Some(Self::Modify(MI::ShiftLeft(AM::ZeroPageX))),
            0x17 => Some(Self::Modify(MI::ShiftLeftOr(AM::ZeroPageX))),
            0x18 => Some(Self::RegistersOnly(RegistersInstruction::ClearCarryFlag)),
            0x19 => Some(Self::Read(RI::InclusiveOr(AM::AbsoluteY))),
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xEA | 0xFA => {
                Some(Self::RegistersOnly(RegistersInstruction::NoOp))
            }
            0x1B => Some(Self::Modify(MI::ShiftLeftOr(AM::AbsoluteY))),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => Some(Self::Read(RI::NoOp(AM::AbsoluteX))),
            0x1D => Some(Self::Read(RI::InclusiveOr(AM::AbsoluteX))),
            0x1E => Some(Self::Modify(MI::ShiftLeft(AM::AbsoluteX))),
            0x1F => Some(Self::Modify(MI::ShiftLeftOr(AM::AbsoluteX))),
            0x20 => Some(Self::JumpToSubroutine),
            0x21 => Some(Self::Read(RI::And(AM::IndirectX))),
            0x23 => Some(Self::Modify(MI::RotateLeftAnd(AM::IndirectX))),
            0x24 => Some(Self::Read(RI::BitTest(AM::ZeroPage))),
            0x25 => Some(Self::Read(RI::And(AM::ZeroPage))),
            0x26 => Some(Self::Modify(MI::RotateLeft(AM::ZeroPage))),
            0x27 => Some(Self::Modify(MI::RotateLeftAnd(AM::ZeroPage))),
            0x28 => Some(Self::PullStack(PushableRegister::P)),
            0x29 => Some(Self::Read(RI::And(AM::Immediate))),
            0x2A => Some(Self::Modify(MI::RotateLeft(AM::Accumulator))),
            0x2C => Some(Self::Read(RI::BitTest(AM::Absolute))),
            0x2D => Some(Self::Read(RI::And(AM::Absolute))),
            0x2E => Some(Self::Modify(MI::RotateLeft(AM::Absolute))),
            0x2F => Some(Self::Modify(MI::RotateLeftAnd(AM::Absolute))),
            0x30 => Some(Self::Branch(BranchCondition::Minus)),
            0x31 => Some(Self::Read(RI::And(AM::IndirectY))),
            0x33 => Some(Self::Modify(MI::RotateLeftAnd(AM::IndirectY))),
            0x35 => Some(Self::Read(RI::And(AM::ZeroPageX))),
            0x36 => Some(Self::Modify(MI::RotateLeft(AM::ZeroPageX))),
            0x37 => Some(Self::Modify(MI::RotateLeftAnd(AM::ZeroPageX))),
            0x38 => Some(Self::RegistersOnly(RegistersInstruction::SetCarryFlag)),
            0x39 => Some(Self::Read(RI::And(AM::AbsoluteY))),
            0x3B => Some(Self::Modify(MI::RotateLeftAnd(AM::AbsoluteY))),
            0x3D => Some(Self::Read(RI::And(AM::AbsoluteX))),
            0x3E => Some(Self::Modify(MI::RotateLeft(AM::AbsoluteX))),
            0x3F => Some(Self::Modify(MI::RotateLeftAnd(AM::AbsoluteX))),
            0x40 => Some(Self::ReturnFromInterrupt),
            0x41 => Some(Self::Read(RI::ExclusiveOr(AM::IndirectX))),
            0x43 => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::IndirectX))),
            0x45 => Some(Self::Read(RI::ExclusiveOr(AM::ZeroPage))),
            0x46 => Some(Self::Modify(MI::LogicalShiftRight(AM::ZeroPage))),
            0x47 => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::ZeroPage))),
            0x48 => Some(Self::PushStack(PushableRegister::A)),
            0x49 => Some(Self::Read(RI::ExclusiveOr(AM::Immediate))),
            0x4A => Some(Self::Modify(MI::LogicalShiftRight(AM::Accumulator))),
            0x4B => Some(Self::Read(RI::AndWithShiftRight)),
            0x4C => Some(Self::Jump(AM::Absolute)),
            0x4D => Some(Self::Read(RI::ExclusiveOr(AM::Absolute))),
            0x4E => Some(Self::Modify(MI::LogicalShiftRight(AM::Absolute))),
            0x4F => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::Absolute))),
            0x50 => Some(Self::Branch(BranchCondition::OverflowClear)),
            0x51 => Some(Self::Read(RI::ExclusiveOr(AM::IndirectY))),
            0x53 => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::IndirectY))),
            0x55 => Some(Self::Read(RI::ExclusiveOr(AM::ZeroPageX))),
            0x56 => Some(Self::Modify(MI::LogicalShiftRight(AM::ZeroPageX))),
            0x57 => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::ZeroPageX))),
            0x58 => Some(Self::RegistersOnly(
                RegistersInstruction::ClearInterruptDisable,
            )),
            0x59 => Some(Self::Read(RI::ExclusiveOr(AM::AbsoluteY))),
            0x5B => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::AbsoluteY))),
            0x5D => Some(Self::Read(RI::ExclusiveOr(AM::AbsoluteX))),
            0x5E => Some(Self::Modify(MI::LogicalShiftRight(AM::AbsoluteX))),
            0x5F => Some(Self::Modify(MI::ShiftRightExclusiveOr(AM::AbsoluteX))),
            0x60 => Some(Self::ReturnFromSubroutine),
            0x61 => Some(Self::Read(RI::AddWithCarry(AM::IndirectX))),
            0x63 => Some(Self::Modify(MI::RotateRightAdd(AM::IndirectX))),
            0x65 => Some(Self::Read(RI::AddWithCarry(AM::ZeroPage))),
            0x66 => Some(Self::Modify(MI::RotateRight(AM::ZeroPage))),
            0x67 => Some(Self::Modify(MI::RotateRightAdd(AM::ZeroPage))),
            0x68 => Some(Self::PullStack(PushableRegister::A)),
            0x69 => Some(Self::Read(RI::AddWithCarry(AM::Immediate))),
            0x6A => Some(Self::Modify(MI::RotateRight(AM::Accumulator))),
            0x6B => Some(Self::Read(RI::AndWithRotateRight)),
            0x6C => Some(Self::Jump(AM::Indirect)),
            0x6D => Some(Self::Read(RI::AddWithCarry(AM::Absolute))),
            0x6E => Some(Self::Modify(MI::RotateRight(AM::Absolute))),
            0x6F => Some(Self::Modify(MI::RotateRightAdd(AM::Absolute))),
            0x70 => Some(Self::Branch(BranchCondition::OverflowSet)),
            0x71 => Some(Self::Read(RI::AddWithCarry(AM::IndirectY))),
            0x73 => Some(Self::Modify(MI::RotateRightAdd(AM::IndirectY))),
            0x75 => Some(Self::Read(RI::AddWithCarry(AM::ZeroPageX))),
            0x76 => Some(Self::Modify(MI::RotateRight(AM::ZeroPageX))),
            0x77 => Some(Self::Modify(MI::RotateRightAdd(AM::ZeroPageX))),
            0x78 => Some(Self::RegistersOnly(
                RegistersInstruction::SetInterruptDisable,
            )),
            0x79 => Some(Self::Read(RI::AddWithCarry(AM::AbsoluteY))),
            0x7B => Some(Self::Modify(MI::RotateRightAdd(AM::AbsoluteY))),
            0x7D => Some(Self::Read(RI::AddWithCarry(AM::AbsoluteX))),
            0x7E => Some(Self::Modify(MI::RotateRight(AM::AbsoluteX))),
            0x7F => Some(Self::Modify(MI::RotateRightAdd(AM::AbsoluteX))),
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => Some(Self::Read(RI::NoOp(AM::Immediate))),
            0x81 => Some(Self::StoreRegister(StorableRegister::A, AM::IndirectX)),
            0x83 => Some(Self::StoreRegister(StorableRegister::AX, AM::IndirectX)),
            0x84 => Some(Self::StoreRegister(StorableRegister::Y, AM::ZeroPage)),
            0x85 => Some(Self::StoreRegister(StorableRegister::A, AM::ZeroPage)),
            0x86 => Some(Self::StoreRegister(StorableRegister::X, AM::ZeroPage)),
            0x87 => Some(Self::StoreRegister(StorableRegister::AX, AM::ZeroPage)),
            0x88 => Some(Self::RegistersOnly(RegistersInstruction::Decrement(
                CpuRegister::Y,
            ))),
            0x8A => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::A,
                from: CpuRegister::X,
            })),
            0x8B => Some(Self::Read(RI::AneImmediate)),
            0x8C => Some(Self::StoreRegister(StorableRegister::Y, AM::Absolute)),
            0x8D => Some(Self::StoreRegister(StorableRegister::A, AM::Absolute)),
            0x8E => Some(Self::StoreRegister(StorableRegister::X, AM::Absolute)),
            0x8F => Some(Self::StoreRegister(StorableRegister::AX, AM::Absolute)),
            0x90 => Some(Self::Branch(BranchCondition::CarryClear)),
            0x91 => Some(Self::StoreRegister(StorableRegister::A, AM::IndirectY)),
            0x93 => Some(Self::UnstableStore(UnstableStore::Sha, AM::IndirectY)),
            0x94 => Some(Self::StoreRegister(StorableRegister::Y, AM::ZeroPageX)),
            0x95 => Some(Self::StoreRegister(StorableRegister::A, AM::ZeroPageX)),
            0x96 => Some(Self::StoreRegister(StorableRegister::X, AM::ZeroPageY)),
            0x97 => Some(Self::StoreRegister(StorableRegister::AX, AM::ZeroPageY)),
            0x98 => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::A,
                from: CpuRegister::Y,
            })),
            0x99 => Some(Self::StoreRegister(StorableRegister::A, AM::AbsoluteY)),
            0x9A => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::S,
                from: CpuRegister::X,
            })),
            0x9B => Some(Self::UnstableStore(UnstableStore::Shs, AM::AbsoluteY)),
            0x9C => Some(Self::UnstableStore(UnstableStore::Shy, AM::AbsoluteX)),
            0x9D => Some(Self::StoreRegister(StorableRegister::A, AM::AbsoluteX)),
            0x9E => Some(Self::UnstableStore(UnstableStore::Shx, AM::AbsoluteY)),
            0x9F => Some(Self::UnstableStore(UnstableStore::Sha, AM::AbsoluteY)),
            0xA0 => Some(Self::Read(RI::Load(CpuRegister::Y, AM::Immediate))),
            0xA1 => Some(Self::Read(RI::Load(CpuRegister::A, AM::IndirectX))),
            0xA2 => Some(Self::Read(RI::Load(CpuRegister::X, AM::Immediate))),
            0xA3 => Some(Self::Read(RI::LoadTransferAX(AM::IndirectX))),
            0xA4 => Some(Self::Read(RI::Load(CpuRegister::Y, AM::ZeroPage))),
            0xA5 => Some(Self::Read(RI::Load(CpuRegister::A, AM::ZeroPage))),
            0xA6 => Some(Self::Read(RI::Load(CpuRegister::X, AM::ZeroPage))),
            0xA7 => Some(Self::Read(RI::LoadTransferAX(AM::ZeroPage))),
            0xA8 => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::Y,
                from: CpuRegister::A,
            })),
            0xA9 => Some(Self::Read(RI::Load(CpuRegister::A, AM::Immediate))),
            0xAA => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::X,
                from: CpuRegister::A,
            })),
            0xAB => Some(Self::Read(RI::LxaImmediate)),
            0xAC => Some(Self::Read(RI::Load(CpuRegister::Y, AM::Absolute))),
            0xAD => Some(Self::Read(RI::Load(CpuRegister::A, AM::Absolute))),
            0xAE => Some(Self::Read(RI::Load(CpuRegister::X, AM::Absolute))),
            0xAF => Some(Self::Read(RI::LoadTransferAX(AM::Absolute))),
            0xB0 => Some(Self::Branch(BranchCondition::CarrySet)),
            0xB1 => Some(Self::Read(RI::Load(CpuRegister::A, AM::IndirectY))),
            0xB3 => Some(Self::Read(RI::LoadTransferAX(AM::IndirectY))),
            0xB4 => Some(Self::Read(RI::Load(CpuRegister::Y, AM::ZeroPageX))),
            0xB5 => Some(Self::Read(RI::Load(CpuRegister::A, AM::ZeroPageX))),
            0xB6 => Some(Self::Read(RI::Load(CpuRegister::X, AM::ZeroPageY))),
            0xB7 => Some(Self::Read(RI::LoadTransferAX(AM::ZeroPageY))),
            0xB8 => Some(Self::RegistersOnly(RegistersInstruction::ClearOverflowFlag)),
            0xB9 => Some(Self::Read(RI::Load(CpuRegister::A, AM::AbsoluteY))),
            0xBA => Some(Self::RegistersOnly(RegistersInstruction::Transfer {
                to: CpuRegister::X,
                from: CpuRegister::S,
            })),
            0xBB => Some(Self::Read(RI::Las)),
            0xBC => Some(Self::Read(RI::Load(CpuRegister::Y, AM::AbsoluteX))),
            0xBD => Some(Self::Read(RI::Load(CpuRegister::A, AM::AbsoluteX))),
            0xBE => Some(Self::Read(RI::Load(CpuRegister::X, AM::AbsoluteY))),
            0xBF => Some(Self::Read(RI::LoadTransferAX(AM::AbsoluteY))),
            0xC0 => Some(Self::Read(RI::Compare(CpuRegister::Y, AM::Immediate))),
            0xC1 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::IndirectX))),
            0xC3 => Some(Self::Modify(MI::DecrementCompare(AM::IndirectX))),
            0xC4 => Some(Self::Read(RI::Compare(CpuRegister::Y, AM::ZeroPage))),
            0xC5 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::ZeroPage))),
            0xC6 => Some(Self::Modify(MI::Decrement(AM::ZeroPage))),
            0xC7 => Some(Self::Modify(MI::DecrementCompare(AM::ZeroPage))),
            0xC8 => Some(Self::RegistersOnly(RegistersInstruction::Increment(
                CpuRegister::Y,
            ))),
            0xC9 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::Immediate))),
            0xCA => Some(Self::RegistersOnly(RegistersInstruction::Decrement(
                CpuRegister::X,
            ))),
            0xCB => Some(Self::Read(RI::AXSubtract)),
            0xCC => Some(Self::Read(RI::Compare(CpuRegister::Y, AM::Absolute))),
            0xCD => Some(Self::Read(RI::Compare(CpuRegister::A, AM::Absolute))),
            0xCE => Some(Self::Modify(MI::Decrement(AM::Absolute))),
            0xCF => Some(Self::Modify(MI::DecrementCompare(AM::Absolute))),
            0xD0 => Some(Self::Branch(BranchCondition::NotEqual)),
            0xD1 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::IndirectY))),
            0xD3 => Some(Self::Modify(MI::DecrementCompare(AM::IndirectY))),
            0xD5 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::ZeroPageX))),
            0xD6 => Some(Self::Modify(MI::Decrement(AM::ZeroPageX))),
            0xD7 => Some(Self::Modify(MI::DecrementCompare(AM::ZeroPageX))),
            0xD8 => Some(Self::RegistersOnly(RegistersInstruction::ClearDecimalFlag)),
            0xD9 => Some(Self::Read(RI::Compare(CpuRegister::A, AM::AbsoluteY))),
            0xDB => Some(Self::Modify(MI::DecrementCompare(AM::AbsoluteY))),
            0xDD => Some(Self::Read(RI::Compare(CpuRegister::A, AM::AbsoluteX))),
            0xDE => Some(Self::Modify(MI::Decrement(AM::AbsoluteX))),
            0xDF => Some(Self::Modify(MI::DecrementCompare(AM::AbsoluteX))),
            0xE0 => Some(Self::Read(RI::Compare(CpuRegister::X, AM::Immediate))),
            0xE1 => Some(Self::Read(RI::SubtractWithCarry(AM::IndirectX))),
            0xE3 => Some(Self::Modify(MI::IncrementSubtract(AM::IndirectX))),
            0xE4 => Some(Self::Read(RI::Compare(CpuRegister::X, AM::ZeroPage))),
            0xE5 => Some(Self::Read(RI::SubtractWithCarry(AM::ZeroPage))),
            0xE6 => Some(Self::Modify(MI::Increment(AM::ZeroPage))),
            0xE7 => Some(Self::Modify(MI::IncrementSubtract(AM::ZeroPage))),
            0xE8 => Some(Self::RegistersOnly(RegistersInstruction::Increment(
                CpuRegister::X,
            ))),
            0xE9 | 0xEB => Some(Self::Read(RI::SubtractWithCarry(AM::Immediate))),
            0xEC => Some(Self::Read(RI::Compare(CpuRegister::X, AM::Absolute))),
            0xED => Some(Self::Read(RI::SubtractWithCarry(AM::Absolute))),
            0xEE => Some(Self::Modify(MI::Increment(AM::Absolute))),
            0xEF => Some(Self::Modify(MI::IncrementSubtract(AM::Absolute))),
            0xF0 => Some(Self::Branch(BranchCondition::Equal)),
            0xF1 => Some(Self::Read(RI::SubtractWithCarry(AM::IndirectY))),
            0xF3 => Some(Self::Modify(MI::IncrementSubtract(AM::IndirectY))),
            0xF5 => Some(Self::Read(RI::SubtractWithCarry(AM::ZeroPageX))),
            0xF6 => Some(Self::Modify(MI::Increment(AM::ZeroPageX))),
            0xF7 => Some(Self::Modify(MI::IncrementSubtract(AM::ZeroPageX))),
            0xF8 => Some(Self::RegistersOnly(RegistersInstruction::SetDecimalFlag)),
            0xF9 => Some(Self::Read(RI::SubtractWithCarry(AM::AbsoluteY))),
            0xFB => Some(Self::Modify(MI::IncrementSubtract(AM::AbsoluteY))),
            0xFD => Some(Self::Read(RI::SubtractWithCarry(AM::AbsoluteX))),
            0xFE => Some(Self::Modify(MI::Increment(AM::AbsoluteX))),
            0xFF => Some(Self::Modify(MI::IncrementSubtract(AM::AbsoluteX))),
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
                // JAM: the CPU halts until reset
                None
            }
        }
    }
}

/// The hardware interrupt service routine, shared by NMI and IRQ. The vector
/// is chosen at the status-push cycle; status is pushed with B clear.
pub(crate) const INTERRUPT_HANDLER_OPS: [CycleOp; 6] = [
    CycleOp::DummyPcRead,
    CycleOp::PushPCHigh,
    CycleOp::PushPCLow,
    CycleOp::InterruptPushStatus(StatusReadContext::HardwareInterruptHandler),
    CycleOp::InterruptVectorLow,
    CycleOp::InterruptVectorHigh,
];

/// The reset sequence: the same shape as the interrupt handler, but the three
/// stack pushes are suppressed into reads (S still decrements by 3).
pub(crate) const RESET_OPS: [CycleOp; 6] = [
    CycleOp::DummyPcRead,
    CycleOp::ResetDummyStackRead,
    CycleOp::ResetDummyStackRead,
    CycleOp::ResetDummyStackRead,
    CycleOp::InterruptVectorLow,
    CycleOp::InterruptVectorHigh,
];

/// The address-formation cycles for a memory addressing mode, and the target
/// that the instruction's final read/store/modify cycles resolve against.
fn address_ops(addressing_mode: AddressingMode) -> (OpVec, MemoryTarget) {
    match addressing_mode {
        AddressingMode::ZeroPage => (
            [CycleOp::FetchOperand1].into_iter().collect(),
            MemoryTarget::ZeroPage,
        ),
        AddressingMode::ZeroPageX => {
            let target = MemoryTarget::ZeroPageIndexed(Index::X);
            (
                [CycleOp::FetchOperand1, CycleOp::DummyRead(target)]
                    .into_iter()
                    .collect(),
                target,
            )
        }
        AddressingMode::ZeroPageY => {
            let target = MemoryTarget::ZeroPageIndexed(Index::Y);
            (
                [CycleOp::FetchOperand1, CycleOp::DummyRead(target)]
                    .into_iter()
                    .collect(),
                target,
            )
        }
        AddressingMode::Absolute => (
            [CycleOp::FetchOperand1, CycleOp::FetchOperand2]
                .into_iter()
                .collect(),
            MemoryTarget::Absolute,
        ),
        AddressingMode::AbsoluteX => (
            [CycleOp::FetchOperand1, CycleOp::FetchOperand2]
                .into_iter()
                .collect(),
            MemoryTarget::AbsoluteIndexed(Index::X),
        ),
        AddressingMode::AbsoluteY => (
            [CycleOp::FetchOperand1, CycleOp::FetchOperand2]
                .into_iter()
                .collect(),
            MemoryTarget::AbsoluteIndexed(Index::Y),
        ),
        AddressingMode::IndirectX => (
            [
                CycleOp::FetchOperand1,
                // The base is read while the index is added to it
                CycleOp::DummyRead(MemoryTarget::ZeroPageIndexed(Index::X)),
                CycleOp::FetchPointerLow(PointerLocation::XIndexed),
                CycleOp::FetchPointerHigh(PointerLocation::XIndexed),
            ]
            .into_iter()
            .collect(),
            MemoryTarget::Pointer,
        ),
        AddressingMode::IndirectY => (
            [
                CycleOp::FetchOperand1,
                CycleOp::FetchPointerLow(PointerLocation::Direct),
                CycleOp::FetchPointerHigh(PointerLocation::Direct),
            ]
            .into_iter()
            .collect(),
            MemoryTarget::PointerIndexed,
        ),
        AddressingMode::Accumulator | AddressingMode::Immediate | AddressingMode::Indirect => {
            panic!("no memory operand for addressing mode: {addressing_mode:?}")
        }
    }
}

fn read_cycle_ops(instruction: ReadInstruction) -> OpVec {
    if instruction.addressing_mode() == AddressingMode::Immediate {
        return [CycleOp::ImmediateRead(instruction)].into_iter().collect();
    }

    let (mut ops, target) = address_ops(instruction.addressing_mode());
    if target.has_page_crossing_penalty() {
        ops.push(CycleOp::ReadOptimistic(target, instruction));
    }
    ops.push(CycleOp::Read(target, instruction));
    ops
}

fn modify_cycle_ops(instruction: ModifyInstruction) -> OpVec {
    if instruction.addressing_mode() == AddressingMode::Accumulator {
        return [CycleOp::AccumulatorModify(instruction)].into_iter().collect();
    }

    let (mut ops, target) = address_ops(instruction.addressing_mode());
    if target.has_page_crossing_penalty() {
        // Unlike reads, the fix-up cycle is unconditional
        ops.push(CycleOp::DummyRead(target));
    }
    ops.push(CycleOp::FetchTarget(target));
    ops.push(CycleOp::WriteBack(target));
    ops.push(CycleOp::Modify(target, instruction));
    ops
}

fn read_register(registers: &CpuRegisters, register: CpuRegister) -> u8 {
    match register {
        CpuRegister::A => registers.accumulator,
        CpuRegister::X => registers.x,
        CpuRegister::Y => registers.y,
        CpuRegister::S => registers.sp,
    }
}

fn write_register(registers: &mut CpuRegisters, register: CpuRegister, value: u8) {
    let field = match register {
        CpuRegister::A => &mut registers.accumulator,
        CpuRegister::X => &mut registers.x,
        CpuRegister::Y => &mut registers.y,
        CpuRegister::S => &mut registers.sp,
    };
    *field = value;
}

fn set_nz(flags: &mut StatusFlags, value: u8) {
    flags.set_negative(value.bit(7)).set_zero(value == 0);
}

fn add(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let sum = u16::from(accumulator) + u16::from(value) + u16::from(flags.carry);
    let result = sum as u8;

    // Signed overflow: the operands agree in sign and the result does not
    let overflow = !(accumulator ^ value) & (accumulator ^ result) & 0x80 != 0;

    flags.set_overflow(overflow).set_carry(sum > 0xFF);
    set_nz(flags, result);
    result
}

fn subtract(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // SBC is ADC with the operand inverted; the carry doubles as not-borrow
    add(accumulator, value ^ 0xFF, flags)
}

fn and(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator & value;
    set_nz(flags, result);
    result
}

fn or(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator | value;
    set_nz(flags, result);
    result
}

fn xor(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator ^ value;
    set_nz(flags, result);
    result
}

fn compare(register: u8, value: u8, flags: &mut StatusFlags) {
    flags.set_carry(register >= value);
    set_nz(flags, register.wrapping_sub(value));
}

fn bit_test(accumulator: u8, value: u8, flags: &mut StatusFlags) {
    flags
        .set_negative(value.bit(7))
        .set_overflow(value.bit(6))
        .set_zero(accumulator & value == 0);
}

fn increment(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value.wrapping_add(1);
    set_nz(flags, result);
    result
}

fn decrement(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value.wrapping_sub(1);
    set_nz(flags, result);
    result
}

fn shift_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value << 1;
    flags.set_carry(value.bit(7));
    set_nz(flags, result);
    result
}

fn logical_shift_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value >> 1;
    flags.set_carry(value.bit(0));
    set_nz(flags, result);
    result
}

fn rotate_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = (value << 1) | u8::from(flags.carry);
    flags.set_carry(value.bit(7));
    set_nz(flags, result);
    result
}

fn rotate_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = (value >> 1) | (u8::from(flags.carry) << 7);
    flags.set_carry(value.bit(0));
    set_nz(flags, result);
    result
}
