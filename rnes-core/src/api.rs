use crate::bus::cartridge::{CartridgeError, Mapper, RomImage};
use crate::bus::{Bus, InterruptLines};
use crate::cpu::{CpuConfig, CpuRegisters, CpuState};
use crate::input::JoypadState;
use crate::serialize::{self, SaveStateError};
use crate::cpu;
use std::io::{Read, Write};

/// The CPU/bus/mapper core wired together.
///
/// The host owns the master clock: it calls [`Emulator::tick`] (or the two
/// half-cycle ticks) once per CPU cycle and is responsible for pacing.
/// External collaborators (PPU, APU, input pollers) interact through the
/// interrupt lines, the joypad state setters, and the bus's memory map.
pub struct Emulator {
    bus: Bus,
    cpu_state: CpuState,
}

impl Emulator {
    /// Create an emulator from decoded cartridge contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM's mapper number is unsupported or its PRG
    /// ROM is malformed.
    pub fn create(rom: RomImage, config: CpuConfig) -> Result<Self, CartridgeError> {
        let mapper = Mapper::from_rom(rom)?;
        let mut bus = Bus::from_cartridge(mapper);

        let cpu_registers = CpuRegisters::create(&mut bus.cpu());
        let cpu_state = CpuState::with_config(cpu_registers, config);

        Ok(Self { bus, cpu_state })
    }

    /// Run one master cycle: phi1 then phi2.
    pub fn tick(&mut self) {
        self.tick_phi1();
        self.tick_phi2();
    }

    /// First half-cycle: internal work (IRQ snapshot, mapper tick, DMA
    /// arbitration). Exposed separately so hosts can interleave PPU/APU work
    /// between the two halves.
    pub fn tick_phi1(&mut self) {
        cpu::tick_phi1(&mut self.cpu_state, &mut self.bus.cpu());
    }

    /// Second half-cycle: the bus access and interrupt-line sampling.
    pub fn tick_phi2(&mut self) {
        cpu::tick_phi2(&mut self.cpu_state, &mut self.bus.cpu());
    }

    /// Reset to known state: power-on registers, PC from the reset vector,
    /// and the 7-cycle reset sequence pending.
    pub fn reset(&mut self) {
        self.cpu_state.reset(&mut self.bus.cpu());
    }

    /// The NMI/IRQ lines, for the PPU, APU, and any other interrupt source
    /// the host wires up.
    pub fn interrupt_lines(&mut self) -> &mut InterruptLines {
        self.bus.interrupt_lines()
    }

    pub fn update_p1_joypad_state(&mut self, joypad_state: JoypadState) {
        self.bus.update_p1_joypad_state(joypad_state);
    }

    pub fn update_p2_joypad_state(&mut self, joypad_state: JoypadState) {
        self.bus.update_p2_joypad_state(joypad_state);
    }

    #[must_use]
    pub fn cpu_registers(&self) -> &CpuRegisters {
        &self.cpu_state.registers
    }

    /// Whether the CPU is partway through an instruction or halted for DMA.
    #[must_use]
    pub fn is_mid_instruction(&self) -> bool {
        self.cpu_state.is_mid_instruction()
    }

    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.cpu_state.total_cycles()
    }

    pub fn bus(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Serialize the full emulation state (minus ROM bytes) to a writer.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn save_state<W: Write>(&self, writer: &mut W) -> Result<(), SaveStateError> {
        serialize::save_state(&self.bus, &self.cpu_state, writer)
    }

    /// Replace the emulation state with one previously saved. ROM bytes are
    /// not part of the stream; they are moved over from the current state.
    ///
    /// # Errors
    ///
    /// Propagates deserialization failures; the current state is left
    /// untouched on error.
    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), SaveStateError> {
        let (mut bus, cpu_state) = serialize::load_state(reader)?;

        bus.move_rom_from(&mut self.bus);
        self.bus = bus;
        self.cpu_state = cpu_state;

        Ok(())
    }
}
