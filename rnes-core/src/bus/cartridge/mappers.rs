mod nrom;

use crate::bus::cartridge::Cartridge;
use bincode::{Decode, Encode};

pub(crate) use nrom::{Nrom, Un1rom};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ChrType {
    ROM,
    RAM,
}

impl ChrType {
    fn to_map_result(self, address: u32) -> PpuMapResult {
        match self {
            Self::ROM => PpuMapResult::ChrROM(address),
            Self::RAM => PpuMapResult::ChrRAM(address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum NametableMirroring {
    Horizontal,
    Vertical,
    SingleScreenBank0,
    SingleScreenBank1,
}

impl NametableMirroring {
    fn map_to_vram(self, address: u16) -> u16 {
        assert!((0x2000..=0x3EFF).contains(&address));

        let relative_addr = address & 0x0FFF;

        match self {
            Self::Horizontal => ((relative_addr & 0x0800) >> 1) | (relative_addr & 0x03FF),
            Self::Vertical => relative_addr & 0x07FF,
            Self::SingleScreenBank0 => relative_addr & 0x03FF,
            Self::SingleScreenBank1 => 0x0400 | (relative_addr & 0x03FF),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BankSizeKb {
    Sixteen,
}

impl BankSizeKb {
    fn size_bytes(self) -> u32 {
        match self {
            Self::Sixteen => 16 * 1024,
        }
    }

    fn address_mask(self) -> u16 {
        match self {
            Self::Sixteen => 0x3FFF,
        }
    }

    pub(crate) fn to_absolute_address<B: Into<u32>>(self, bank_number: B, address: u16) -> u32 {
        bank_number.into() * self.size_bytes() + u32::from(address & self.address_mask())
    }

    pub(crate) fn to_absolute_address_last_bank(self, memory_len: u32, address: u16) -> u32 {
        (memory_len - self.size_bytes()) + u32::from(address & self.address_mask())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PpuMapResult {
    ChrROM(u32),
    ChrRAM(u32),
    Vram(u16),
}

impl PpuMapResult {
    pub(crate) fn read(self, cartridge: &Cartridge, vram: &[u8; 2048]) -> u8 {
        match self {
            Self::ChrROM(address) => cartridge.get_chr_rom(address),
            Self::ChrRAM(address) => cartridge.get_chr_ram(address),
            Self::Vram(address) => vram[usize::from(address)],
        }
    }

    pub(crate) fn write(self, value: u8, cartridge: &mut Cartridge, vram: &mut [u8; 2048]) {
        match self {
            Self::ChrROM(_) => {}
            Self::ChrRAM(address) => {
                cartridge.set_chr_ram(address, value);
            }
            Self::Vram(address) => {
                vram[usize::from(address)] = value;
            }
        }
    }
}
