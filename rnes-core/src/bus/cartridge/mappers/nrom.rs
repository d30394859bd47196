use crate::bus::cartridge::mappers::{BankSizeKb, ChrType, NametableMirroring, PpuMapResult};
use crate::bus::cartridge::MapperImpl;
use crate::bus::{MemoryMap, ReadHandler, WriteHandler};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Nrom {
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
}

impl Nrom {
    pub(crate) fn new(chr_type: ChrType, nametable_mirroring: NametableMirroring) -> Self {
        Self {
            chr_type,
            nametable_mirroring,
        }
    }
}

impl MapperImpl<Nrom> {
    pub(crate) fn populate_cpu_map(&self, map: &mut MemoryMap) {
        if !self.cartridge.prg_ram.is_empty() {
            for address in 0x6000..=0x7FFF {
                map.set_read(address, ReadHandler::Cartridge);
                map.set_write(address, WriteHandler::Cartridge);
            }
        }

        for address in 0x8000..=0xFFFF {
            map.set_read(address, ReadHandler::Cartridge);
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16) -> u8 {
        match address {
            0x6000..=0x7FFF => self.cartridge.get_prg_ram(u32::from(address & 0x1FFF)),
            0x8000..=0xFFFF => self.cartridge.get_prg_rom(u32::from(address & 0x7FFF)),
            _ => panic!("invalid CPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x6000..=0x7FFF => {
                self.cartridge.set_prg_ram(u32::from(address & 0x1FFF), value);
            }
            _ => panic!("invalid CPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self.data.chr_type.to_map_result(address.into()),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => panic!("invalid PPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn nametable_mirroring(&self) -> NametableMirroring {
        self.data.nametable_mirroring
    }
}

/// Mapper 94 (UN1ROM): a discrete-logic board with a switchable 16 KiB PRG
/// window at $8000 and the last 16 KiB bank fixed at $C000. Writes anywhere
/// in $8000-$FFFF select the low window from bits 4-2 of the value; CHR is
/// 8 KiB of RAM.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Un1rom {
    prg_bank: u8,
    nametable_mirroring: NametableMirroring,
}

impl Un1rom {
    pub(crate) fn new(nametable_mirroring: NametableMirroring) -> Self {
        Self {
            prg_bank: 0,
            nametable_mirroring,
        }
    }
}

impl MapperImpl<Un1rom> {
    pub(crate) fn populate_cpu_map(&self, map: &mut MemoryMap) {
        for address in 0x8000..=0xFFFF {
            map.set_read(address, ReadHandler::Cartridge);
            map.set_write(address, WriteHandler::Cartridge);
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16) -> u8 {
        match address {
            0x8000..=0xBFFF => {
                let prg_rom_addr =
                    BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address);
                self.cartridge.get_prg_rom(prg_rom_addr)
            }
            0xC000..=0xFFFF => {
                let prg_rom_addr = BankSizeKb::Sixteen
                    .to_absolute_address_last_bank(self.cartridge.prg_rom.len() as u32, address);
                self.cartridge.get_prg_rom(prg_rom_addr)
            }
            _ => panic!("invalid CPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0xFFFF => {
                // The selector is only 3 bits, but the modulo runs at full
                // width so that bank counts above 255 don't wrap
                let bank_count = self.cartridge.prg_rom.len() / (16 * 1024);
                self.data.prg_bank = (usize::from((value & 0x1C) >> 2) % bank_count) as u8;
            }
            _ => panic!("invalid CPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => PpuMapResult::ChrRAM(address.into()),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => panic!("invalid PPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn nametable_mirroring(&self) -> NametableMirroring {
        self.data.nametable_mirroring
    }
}

#[cfg(test)]
mod tests {
    use crate::bus::cartridge::{Mapper, RomImage};
    use crate::bus::cartridge::mappers::NametableMirroring;

    fn un1rom_with_banks(bank_count: usize) -> Mapper {
        let mut prg_rom = vec![0; bank_count * 16 * 1024];
        for bank in 0..bank_count {
            prg_rom[bank * 16 * 1024] = bank as u8;
        }

        Mapper::from_rom(RomImage {
            prg_rom,
            chr_rom: Vec::new(),
            prg_ram_size: 0,
            chr_ram_size: 8192,
            mapper_number: 94,
            nametable_mirroring: NametableMirroring::Vertical,
        })
        .unwrap()
    }

    #[test]
    fn un1rom_bank_select() {
        let mut mapper = un1rom_with_banks(4);

        // Bank 0 selected at power-on, last bank fixed
        assert_eq!(mapper.read_cpu_address(0x8000), 0);
        assert_eq!(mapper.read_cpu_address(0xC000), 3);

        // Bank number comes from bits 4-2 of the written value
        mapper.write_cpu_address(0x8000, 0x02 << 2);
        assert_eq!(mapper.read_cpu_address(0x8000), 2);
        assert_eq!(mapper.read_cpu_address(0xC000), 3);

        // Bits outside the mask are ignored
        mapper.write_cpu_address(0xFFFF, 0xE1 | (0x01 << 2));
        assert_eq!(mapper.read_cpu_address(0x8000), 1);
    }

    #[test]
    fn un1rom_bank_select_wraps_to_bank_count() {
        let mut mapper = un1rom_with_banks(2);

        mapper.write_cpu_address(0x8000, 0x07 << 2);
        assert_eq!(mapper.read_cpu_address(0x8000), 1);

        mapper.write_cpu_address(0x8000, 0x06 << 2);
        assert_eq!(mapper.read_cpu_address(0x8000), 0);
    }

    #[test]
    fn un1rom_bank_select_with_256_banks() {
        // A 4 MiB PRG ROM has a bank count that does not fit in a byte; bank
        // selection must still work
        let mut mapper = un1rom_with_banks(256);

        mapper.write_cpu_address(0x8000, 0x03 << 2);
        assert_eq!(mapper.read_cpu_address(0x8000), 3);
        assert_eq!(mapper.read_cpu_address(0xC000), 255);
    }
}
