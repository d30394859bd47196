mod mappers;

use crate::bus::cartridge::mappers::{ChrType, Nrom, PpuMapResult, Un1rom};
use crate::bus::MemoryMap;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use std::mem;
use thiserror::Error;

pub use mappers::NametableMirroring;

/// Cartridge contents as parsed by the host. File-format handling (iNES,
/// NES 2.0, zipped ROMs, .sav files) lives outside the core; this is the
/// already-decoded result.
#[derive(Debug, Clone)]
pub struct RomImage {
    pub prg_rom: Vec<u8>,
    pub chr_rom: Vec<u8>,
    pub prg_ram_size: u32,
    pub chr_ram_size: u32,
    pub mapper_number: u16,
    pub nametable_mirroring: NametableMirroring,
}

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("unsupported mapper: {mapper_number}")]
    UnsupportedMapper { mapper_number: u16 },
    #[error("PRG ROM size {size} is not a multiple of 16KiB")]
    InvalidPrgRomSize { size: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct Cartridge {
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr_rom: Vec<u8>,
    chr_ram: Vec<u8>,
}

// Encode and Decode are implemented explicitly instead of using derive in
// order to avoid serializing ROM bytes as part of save states
impl Encode for Cartridge {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.prg_ram.encode(encoder)?;
        self.chr_ram.encode(encoder)?;

        Ok(())
    }
}

impl<Context> Decode<Context> for Cartridge {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let prg_ram = Decode::decode(decoder)?;
        let chr_ram = Decode::decode(decoder)?;

        Ok(Self {
            prg_rom: vec![],
            prg_ram,
            chr_rom: vec![],
            chr_ram,
        })
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Cartridge {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let prg_ram = BorrowDecode::borrow_decode(decoder)?;
        let chr_ram = BorrowDecode::borrow_decode(decoder)?;

        Ok(Self {
            prg_rom: vec![],
            prg_ram,
            chr_rom: vec![],
            chr_ram,
        })
    }
}

impl Cartridge {
    fn get_prg_rom(&self, address: u32) -> u8 {
        self.prg_rom[(address as usize) & (self.prg_rom.len() - 1)]
    }

    fn get_prg_ram(&self, address: u32) -> u8 {
        if !self.prg_ram.is_empty() {
            self.prg_ram[(address as usize) & (self.prg_ram.len() - 1)]
        } else {
            0xFF
        }
    }

    fn set_prg_ram(&mut self, address: u32, value: u8) {
        if !self.prg_ram.is_empty() {
            let prg_ram_len = self.prg_ram.len();
            self.prg_ram[(address as usize) & (prg_ram_len - 1)] = value;
        }
    }

    fn get_chr_rom(&self, address: u32) -> u8 {
        self.chr_rom[(address as usize) & (self.chr_rom.len() - 1)]
    }

    fn get_chr_ram(&self, address: u32) -> u8 {
        self.chr_ram[(address as usize) & (self.chr_ram.len() - 1)]
    }

    fn set_chr_ram(&mut self, address: u32, value: u8) {
        let chr_ram_len = self.chr_ram.len();
        self.chr_ram[(address as usize) & (chr_ram_len - 1)] = value;
    }

    /// Move cartridge ROM fields from another instance. Save states do not
    /// contain ROM bytes, so a freshly decoded `Cartridge` steals them from
    /// the live one.
    fn move_rom_from(&mut self, other: &mut Self) {
        self.prg_rom = mem::take(&mut other.prg_rom);
        self.chr_rom = mem::take(&mut other.chr_rom);
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct MapperImpl<MapperData> {
    cartridge: Cartridge,
    data: MapperData,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) enum Mapper {
    Nrom(MapperImpl<Nrom>),
    Un1rom(MapperImpl<Un1rom>),
}

impl Mapper {
    /// Build a mapper from decoded cartridge contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM specifies a mapper number this core does
    /// not implement, or if the PRG ROM size is malformed.
    pub(crate) fn from_rom(rom: RomImage) -> Result<Self, CartridgeError> {
        if rom.prg_rom.is_empty() || rom.prg_rom.len() % (16 * 1024) != 0 {
            return Err(CartridgeError::InvalidPrgRomSize {
                size: rom.prg_rom.len(),
            });
        }

        let chr_type = if rom.chr_rom.is_empty() {
            ChrType::RAM
        } else {
            ChrType::ROM
        };

        let cartridge = Cartridge {
            prg_rom: rom.prg_rom,
            prg_ram: vec![0; rom.prg_ram_size as usize],
            chr_rom: rom.chr_rom,
            chr_ram: vec![0; rom.chr_ram_size as usize],
        };

        let mapper = match rom.mapper_number {
            0 => Self::Nrom(MapperImpl {
                cartridge,
                data: Nrom::new(chr_type, rom.nametable_mirroring),
            }),
            94 => Self::Un1rom(MapperImpl {
                cartridge,
                data: Un1rom::new(rom.nametable_mirroring),
            }),
            mapper_number => {
                return Err(CartridgeError::UnsupportedMapper { mapper_number });
            }
        };

        log::info!("Mapper number: {} ({})", rom.mapper_number, mapper.name());
        log::info!("PRG ROM size: {}", mapper.cartridge().prg_rom.len());
        log::info!("PRG RAM size: {}", mapper.cartridge().prg_ram.len());
        log::info!("CHR ROM size: {}", mapper.cartridge().chr_rom.len());
        log::info!("CHR RAM size: {}", mapper.cartridge().chr_ram.len());
        log::info!(
            "Hardwired nametable mirroring: {:?}",
            mapper.nametable_mirroring()
        );

        Ok(mapper)
    }

    /// Retrieve the mapper's user-readable name. Only used for logging output.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Nrom(..) => "NROM",
            Self::Un1rom(..) => "UN1ROM",
        }
    }

    fn cartridge(&self) -> &Cartridge {
        match self {
            Self::Nrom(nrom) => &nrom.cartridge,
            Self::Un1rom(un1rom) => &un1rom.cartridge,
        }
    }

    fn cartridge_mut(&mut self) -> &mut Cartridge {
        match self {
            Self::Nrom(nrom) => &mut nrom.cartridge,
            Self::Un1rom(un1rom) => &mut un1rom.cartridge,
        }
    }

    /// Install this board's PRG windows and bank-select write traps into the
    /// CPU-side memory map. Called from `Bus::apply_map` at every ROM load;
    /// boards that re-wire on bank switches can request another pass.
    pub(crate) fn populate_cpu_map(&self, map: &mut MemoryMap) {
        match self {
            Self::Nrom(nrom) => nrom.populate_cpu_map(map),
            Self::Un1rom(un1rom) => un1rom.populate_cpu_map(map),
        }
    }

    /// Read a value from the given address in the CPU address space.
    pub(crate) fn read_cpu_address(&mut self, address: u16) -> u8 {
        match self {
            Self::Nrom(nrom) => nrom.read_cpu_address(address),
            Self::Un1rom(un1rom) => un1rom.read_cpu_address(address),
        }
    }

    /// Write a value to the given address in the CPU address space.
    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match self {
            Self::Nrom(nrom) => nrom.write_cpu_address(address, value),
            Self::Un1rom(un1rom) => un1rom.write_cpu_address(address, value),
        }
    }

    pub(crate) fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match self {
            Self::Nrom(nrom) => nrom.map_ppu_address(address),
            Self::Un1rom(un1rom) => un1rom.map_ppu_address(address),
        }
    }

    pub(crate) fn read_ppu_address(&self, address: u16, vram: &[u8; 2048]) -> u8 {
        self.map_ppu_address(address).read(self.cartridge(), vram)
    }

    pub(crate) fn write_ppu_address(&mut self, address: u16, value: u8, vram: &mut [u8; 2048]) {
        let map_result = self.map_ppu_address(address);
        map_result.write(value, self.cartridge_mut(), vram);
    }

    /// Perform any processing that should be performed once per CPU cycle,
    /// during phi1 before the CPU's micro-step. Boards with cycle-counter
    /// IRQs clock them here; the discrete-logic boards have nothing to do.
    pub(crate) fn tick_cpu(&mut self) {
        match self {
            Self::Nrom(..) | Self::Un1rom(..) => {}
        }
    }

    /// Return whether this board is currently asserting the IRQ line.
    pub(crate) fn interrupt_flag(&self) -> bool {
        match self {
            Self::Nrom(..) | Self::Un1rom(..) => false,
        }
    }

    /// Retrieve the current nametable mirroring for the PPU's routing.
    pub(crate) fn nametable_mirroring(&self) -> NametableMirroring {
        match self {
            Self::Nrom(nrom) => nrom.nametable_mirroring(),
            Self::Un1rom(un1rom) => un1rom.nametable_mirroring(),
        }
    }

    /// Move cartridge ROM fields from another `Mapper` instance. Used when
    /// loading save states.
    pub(crate) fn move_rom_from(&mut self, other: &mut Self) {
        self.cartridge_mut().move_rom_from(other.cartridge_mut());
    }
}
