//! Cycle-level emulation core for the NES's 2A03 CPU side: the 6502 cycle
//! engine, the CPU bus and memory map, the cartridge mapper layer, interrupt
//! lines, and OAM DMA. The PPU, APU, and all frontend concerns live outside
//! this crate and integrate through the bus and the interrupt lines.

#![forbid(unsafe_code)]

pub mod api;
pub mod bus;
pub mod cpu;
mod input;
mod num;
mod serialize;

pub use api::Emulator;
pub use bus::cartridge::{CartridgeError, NametableMirroring, RomImage};
pub use bus::{Bus, BusOp, InterruptLines, IrqSource};
pub use cpu::{CpuConfig, CpuRegisters, CpuState, StatusFlags, StatusReadContext};
pub use input::JoypadState;
pub use serialize::SaveStateError;
