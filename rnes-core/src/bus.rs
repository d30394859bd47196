pub mod cartridge;

use crate::bus::cartridge::Mapper;
use crate::input::{JoypadState, Joypads};
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use std::fmt::{Display, Formatter};

pub const CPU_RAM_START: u16 = 0x0000;
pub const CPU_RAM_END: u16 = 0x1FFF;
pub const CPU_RAM_MASK: u16 = 0x07FF;

pub const CPU_PPU_REGISTERS_START: u16 = 0x2000;
pub const CPU_PPU_REGISTERS_END: u16 = 0x3FFF;
pub const CPU_PPU_REGISTERS_MASK: u16 = 0x0007;

pub const CPU_OAM_DMA_REGISTER: u16 = 0x4014;
pub const CPU_APU_STATUS_REGISTER: u16 = 0x4015;
pub const CPU_JOYPAD_1_REGISTER: u16 = 0x4016;
pub const CPU_JOYPAD_2_REGISTER: u16 = 0x4017;

pub const CPU_CARTRIDGE_START: u16 = 0x4020;

pub const CPU_STACK_START: u16 = 0x0100;
pub const CPU_NMI_VECTOR: u16 = 0xFFFA;
pub const CPU_RESET_VECTOR: u16 = 0xFFFC;
pub const CPU_IRQ_VECTOR: u16 = 0xFFFE;

const OAM_ADDR_RELATIVE: u16 = 0x03;
const OAM_DATA_RELATIVE: u16 = 0x04;

const ADDRESS_SPACE_LEN: usize = 1 << 16;

/// Per-address read dispatch. The original hardware model is a pair of raw
/// function pointers per bus cell; an enum of handler kinds dispatched by
/// match preserves the per-address specialization without indirect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHandler {
    /// Internal 2 KiB RAM (64 KiB in the flat test layout); the payload is
    /// the pre-masked RAM index, which is how mirroring is installed.
    Ram { index: u16 },
    /// OAMDATA ($2004 and mirrors): reads the PPU OAM byte under OAMADDR.
    OamData,
    /// APU status ($4015). The APU proper is external; the port is driven
    /// low and fully masked so polling software sees stable values.
    ApuStatus,
    /// Controller port 1 ($4016): next bit of the latched shift register.
    Joypad1,
    /// Controller port 2 ($4017).
    Joypad2,
    /// Delegate to the installed mapper with the full address.
    Cartridge,
    /// Nothing drives the pins; the read returns the open-bus latch.
    OpenBus,
}

/// Per-address write dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteHandler {
    Ram { index: u16 },
    /// OAMADDR ($2003 and mirrors).
    OamAddr,
    /// OAMDATA ($2004 and mirrors): writes OAM and increments OAMADDR.
    OamData,
    /// $4014: latches the source page and requests an OAM DMA transfer.
    OamDmaTrigger,
    /// $4016 bit 0: controller strobe.
    JoypadStrobe,
    /// Delegate to the installed mapper (PRG RAM, bank-select traps).
    Cartridge,
    /// Write-only in the sense of the open bus: the value still updates the
    /// bus latch, but no device stores it.
    Ignored,
}

/// One entry of the optional bus tape: every read and write with the value
/// that was actually on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read(u16, u8),
    Write(u16, u8),
}

impl Display for BusOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(address, value) => write!(f, "read of {value:02X} from {address:04X}"),
            Self::Write(address, value) => write!(f, "write of {value:02X} to {address:04X}"),
        }
    }
}

/// The 65,536 read slots, 65,536 write slots, and per-address float masks.
///
/// A float mask selects which bits of the open-bus latch leak through on a
/// read from that address; mapped addresses default to 0x00 (fully driven)
/// and unmapped addresses to 0xFF.
pub struct MemoryMap {
    read: Box<[ReadHandler; ADDRESS_SPACE_LEN]>,
    write: Box<[WriteHandler; ADDRESS_SPACE_LEN]>,
    float_masks: Box<[u8; ADDRESS_SPACE_LEN]>,
}

impl MemoryMap {
    fn new() -> Self {
        let mut map = Self {
            read: vec![ReadHandler::OpenBus; ADDRESS_SPACE_LEN]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
            write: vec![WriteHandler::Ignored; ADDRESS_SPACE_LEN]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
            float_masks: vec![0xFF; ADDRESS_SPACE_LEN]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
        };
        map.reset_to_defaults();
        map
    }

    pub fn set_read(&mut self, address: u16, handler: ReadHandler) {
        self.read[usize::from(address)] = handler;
        self.float_masks[usize::from(address)] = match handler {
            ReadHandler::OpenBus => 0xFF,
            _ => 0x00,
        };
    }

    pub fn set_write(&mut self, address: u16, handler: WriteHandler) {
        self.write[usize::from(address)] = handler;
    }

    pub fn set_float_mask(&mut self, address: u16, mask: u8) {
        self.float_masks[usize::from(address)] = mask;
    }

    /// Reset every slot to the default CPU memory map: mirrored internal RAM,
    /// the OAM ports in the PPU register window, the DMA trigger, the APU
    /// status port, the controller ports, and open bus everywhere else.
    fn reset_to_defaults(&mut self) {
        for address in 0..=u16::MAX {
            self.set_read(address, ReadHandler::OpenBus);
            self.set_write(address, WriteHandler::Ignored);
        }

        for address in CPU_RAM_START..=CPU_RAM_END {
            let index = address & CPU_RAM_MASK;
            self.set_read(address, ReadHandler::Ram { index });
            self.set_write(address, WriteHandler::Ram { index });
        }

        // Only the OAM ports are mapped out of the box; a PPU implementation
        // installs the rest of $2000-$3FFF itself.
        for address in CPU_PPU_REGISTERS_START..=CPU_PPU_REGISTERS_END {
            match address & CPU_PPU_REGISTERS_MASK {
                OAM_ADDR_RELATIVE => {
                    self.set_write(address, WriteHandler::OamAddr);
                }
                OAM_DATA_RELATIVE => {
                    self.set_read(address, ReadHandler::OamData);
                    self.set_write(address, WriteHandler::OamData);
                }
                _ => {}
            }
        }

        self.set_write(CPU_OAM_DMA_REGISTER, WriteHandler::OamDmaTrigger);

        self.set_read(CPU_APU_STATUS_REGISTER, ReadHandler::ApuStatus);
        self.set_float_mask(CPU_APU_STATUS_REGISTER, 0x00);

        // Controllers drive bits 0-4; the rest float.
        self.set_read(CPU_JOYPAD_1_REGISTER, ReadHandler::Joypad1);
        self.set_write(CPU_JOYPAD_1_REGISTER, WriteHandler::JoypadStrobe);
        self.set_float_mask(CPU_JOYPAD_1_REGISTER, 0xE0);
        self.set_read(CPU_JOYPAD_2_REGISTER, ReadHandler::Joypad2);
        self.set_float_mask(CPU_JOYPAD_2_REGISTER, 0xE0);
    }

    /// A 64 KiB flat RAM layout for CPU test harnesses: every address is RAM,
    /// nothing floats, no registers.
    fn reset_to_flat_ram(&mut self) {
        for address in 0..=u16::MAX {
            self.read[usize::from(address)] = ReadHandler::Ram { index: address };
            self.write[usize::from(address)] = WriteHandler::Ram { index: address };
            self.float_masks[usize::from(address)] = 0x00;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum IrqSource {
    ApuDmc,
    ApuFrameCounter,
    Mapper,
}

impl IrqSource {
    fn to_low_pull_bit(self) -> u8 {
        match self {
            Self::ApuDmc => 0x01,
            Self::ApuFrameCounter => 0x02,
            Self::Mapper => 0x04,
        }
    }
}

/// The NMI and IRQ input lines as seen by the CPU.
///
/// NMI is a single line the PPU drives high/low; the CPU latches its rising
/// edge. IRQ is level-sensitive and wire-OR'd: each source pulls the line low
/// independently, and the line reads low while any pull is active.
#[derive(Debug, Clone, Encode, Decode)]
pub struct InterruptLines {
    nmi_line: bool,
    irq_low_pulls: u8,
}

impl InterruptLines {
    fn new() -> Self {
        Self {
            nmi_line: false,
            irq_low_pulls: 0x00,
        }
    }

    /// Assert or release the NMI line. The PPU asserts at the start of
    /// v-blank and releases at the end; edge detection is the CPU's job.
    pub fn set_nmi_line(&mut self, asserted: bool) {
        self.nmi_line = asserted;
    }

    pub fn nmi_line(&self) -> bool {
        self.nmi_line
    }

    pub fn pull_irq_low(&mut self, source: IrqSource) {
        self.irq_low_pulls |= source.to_low_pull_bit();
    }

    pub fn release_irq_low_pull(&mut self, source: IrqSource) {
        self.irq_low_pulls &= !source.to_low_pull_bit();
    }

    pub fn irq_line(&self) -> bool {
        self.irq_low_pulls != 0
    }
}

pub struct Bus {
    mapper: Option<Mapper>,
    map: MemoryMap,
    ram: Vec<u8>,
    ram_mask: u16,
    ppu_vram: [u8; 2048],
    ppu_oam: [u8; 256],
    oam_addr: u8,
    joypads: Joypads,
    interrupt_lines: InterruptLines,
    open_bus: u8,
    pending_oam_dma: Option<u8>,
    op_log: Option<Vec<BusOp>>,
}

impl Bus {
    fn with_layout(mapper: Option<Mapper>, ram_len: usize) -> Self {
        let mut bus = Self {
            mapper,
            map: MemoryMap::new(),
            ram: vec![0; ram_len],
            ram_mask: (ram_len - 1) as u16,
            ppu_vram: [0; 2048],
            ppu_oam: [0; 256],
            oam_addr: 0,
            joypads: Joypads::new(),
            interrupt_lines: InterruptLines::new(),
            open_bus: 0,
            pending_oam_dma: None,
            op_log: None,
        };
        bus.apply_map();
        bus
    }

    /// A bus with a cartridge installed: the default memory map plus whatever
    /// windows the mapper populates.
    pub(crate) fn from_cartridge(mapper: Mapper) -> Self {
        Self::with_layout(Some(mapper), usize::from(CPU_RAM_MASK) + 1)
    }

    /// A bus with no cartridge: everything above the fixed registers reads
    /// open bus. Reset vectors read as the open-bus latch.
    #[must_use]
    pub fn new() -> Self {
        Self::with_layout(None, usize::from(CPU_RAM_MASK) + 1)
    }

    /// A bus that is 64 KiB of flat RAM with no registers, for driving the
    /// CPU against the community single-step test files.
    #[must_use]
    pub fn with_flat_ram() -> Self {
        Self::with_layout(None, ADDRESS_SPACE_LEN)
    }

    fn is_flat_layout(&self) -> bool {
        self.ram_mask == u16::MAX
    }

    /// Reset every bus slot to its default handler and let the installed
    /// mapper repopulate its windows. Runs at ROM load and again on demand
    /// for mappers that re-wire after bank switches.
    pub fn apply_map(&mut self) {
        if self.is_flat_layout() {
            self.map.reset_to_flat_ram();
            return;
        }

        self.map.reset_to_defaults();
        if let Some(mapper) = &self.mapper {
            mapper.populate_cpu_map(&mut self.map);
        }
    }

    pub fn cpu(&mut self) -> CpuBus<'_> {
        CpuBus(self)
    }

    pub fn ppu(&mut self) -> PpuBus<'_> {
        PpuBus(self)
    }

    pub fn memory_map(&mut self) -> &mut MemoryMap {
        &mut self.map
    }

    pub fn interrupt_lines(&mut self) -> &mut InterruptLines {
        &mut self.interrupt_lines
    }

    pub fn update_p1_joypad_state(&mut self, joypad_state: JoypadState) {
        self.joypads.set_p1(joypad_state);
    }

    pub fn update_p2_joypad_state(&mut self, joypad_state: JoypadState) {
        self.joypads.set_p2(joypad_state);
    }

    /// Start recording every bus access. The log grows without bound, so this
    /// is only meant for test harnesses driving bounded cycle counts.
    pub fn set_op_log_enabled(&mut self, enabled: bool) {
        self.op_log = enabled.then(Vec::new);
    }

    pub fn take_op_log(&mut self) -> Vec<BusOp> {
        match &mut self.op_log {
            Some(log) => std::mem::take(log),
            None => Vec::new(),
        }
    }

    /// Read RAM directly, bypassing handlers, the open-bus latch, and the op
    /// log. Non-RAM addresses return the current open-bus value.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        match self.map.read[usize::from(address)] {
            ReadHandler::Ram { index } => self.ram[usize::from(index)],
            _ => self.open_bus,
        }
    }

    /// Write RAM directly, bypassing handlers, the open-bus latch, and the op
    /// log. Writes to non-RAM addresses are dropped.
    pub fn poke(&mut self, address: u16, value: u8) {
        if let WriteHandler::Ram { index } = self.map.write[usize::from(address)] {
            self.ram[usize::from(index)] = value;
        }
    }

    pub(crate) fn move_rom_from(&mut self, other: &mut Bus) {
        if let (Some(mapper), Some(other_mapper)) = (&mut self.mapper, &mut other.mapper) {
            mapper.move_rom_from(other_mapper);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

// The handler tables and the op log are omitted from save states; decoding
// rebuilds them through apply_map.
impl Encode for Bus {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.mapper.encode(encoder)?;
        self.ram.encode(encoder)?;
        self.ppu_vram.encode(encoder)?;
        self.ppu_oam.encode(encoder)?;
        self.oam_addr.encode(encoder)?;
        self.joypads.encode(encoder)?;
        self.interrupt_lines.encode(encoder)?;
        self.open_bus.encode(encoder)?;
        self.pending_oam_dma.encode(encoder)?;

        Ok(())
    }
}

impl<Context> Decode<Context> for Bus {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let mapper = Decode::decode(decoder)?;
        let ram: Vec<u8> = Decode::decode(decoder)?;
        if !ram.len().is_power_of_two() || ram.len() > ADDRESS_SPACE_LEN {
            return Err(DecodeError::Other("invalid RAM length in saved state"));
        }
        let ppu_vram = Decode::decode(decoder)?;
        let ppu_oam = Decode::decode(decoder)?;
        let oam_addr = Decode::decode(decoder)?;
        let joypads = Decode::decode(decoder)?;
        let interrupt_lines = Decode::decode(decoder)?;
        let open_bus = Decode::decode(decoder)?;
        let pending_oam_dma = Decode::decode(decoder)?;

        let ram_mask = (ram.len() - 1) as u16;
        let mut bus = Self {
            mapper,
            map: MemoryMap::new(),
            ram,
            ram_mask,
            ppu_vram,
            ppu_oam,
            oam_addr,
            joypads,
            interrupt_lines,
            open_bus,
            pending_oam_dma,
            op_log: None,
        };
        bus.apply_map();
        Ok(bus)
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Bus {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Decode::decode(decoder)
    }
}

pub struct CpuBus<'a>(&'a mut Bus);

impl<'a> CpuBus<'a> {
    /// Dispatch a read through the installed handler, mix in open-bus bits
    /// through the address's float mask, and update the open-bus latch.
    pub fn read_address(&mut self, address: u16) -> u8 {
        let raw = match self.0.map.read[usize::from(address)] {
            ReadHandler::Ram { index } => self.0.ram[usize::from(index)],
            ReadHandler::OamData => self.0.ppu_oam[usize::from(self.0.oam_addr)],
            ReadHandler::ApuStatus => 0x00,
            ReadHandler::Joypad1 => self.0.joypads.read_p1(),
            ReadHandler::Joypad2 => self.0.joypads.read_p2(),
            ReadHandler::Cartridge => match &mut self.0.mapper {
                Some(mapper) => mapper.read_cpu_address(address),
                None => self.0.open_bus,
            },
            ReadHandler::OpenBus => self.0.open_bus,
        };

        let float_mask = self.0.map.float_masks[usize::from(address)];
        let value = (raw & !float_mask) | (self.0.open_bus & float_mask);
        self.0.open_bus = value;

        if let Some(op_log) = &mut self.0.op_log {
            op_log.push(BusOp::Read(address, value));
        }

        value
    }

    /// Update the open-bus latch and dispatch the write through the installed
    /// handler.
    pub fn write_address(&mut self, address: u16, value: u8) {
        self.0.open_bus = value;

        if let Some(op_log) = &mut self.0.op_log {
            op_log.push(BusOp::Write(address, value));
        }

        match self.0.map.write[usize::from(address)] {
            WriteHandler::Ram { index } => {
                self.0.ram[usize::from(index)] = value;
            }
            WriteHandler::OamAddr => {
                self.0.oam_addr = value;
            }
            WriteHandler::OamData => {
                self.0.ppu_oam[usize::from(self.0.oam_addr)] = value;
                self.0.oam_addr = self.0.oam_addr.wrapping_add(1);
            }
            WriteHandler::OamDmaTrigger => {
                self.0.pending_oam_dma = Some(value);
            }
            WriteHandler::JoypadStrobe => {
                self.0.joypads.write_strobe(value);
            }
            WriteHandler::Cartridge => {
                if let Some(mapper) = &mut self.0.mapper {
                    mapper.write_cpu_address(address, value);
                }
            }
            WriteHandler::Ignored => {}
        }
    }

    pub fn interrupt_lines(&mut self) -> &mut InterruptLines {
        &mut self.0.interrupt_lines
    }

    /// The mapper's per-CPU-cycle hook; runs during phi1 before the CPU's
    /// micro-step.
    pub(crate) fn tick_mapper(&mut self) {
        if let Some(mapper) = &mut self.0.mapper {
            mapper.tick_cpu();
        }
    }

    pub(crate) fn take_pending_oam_dma(&mut self) -> Option<u8> {
        self.0.pending_oam_dma.take()
    }

    pub(crate) fn nmi_line(&self) -> bool {
        self.0.interrupt_lines.nmi_line()
    }

    /// The IRQ level as the CPU samples it at phi2: any low pull on the
    /// shared line, including the mapper's own IRQ output.
    pub(crate) fn irq_line(&self) -> bool {
        self.0.interrupt_lines.irq_line()
            || self
                .0
                .mapper
                .as_ref()
                .is_some_and(Mapper::interrupt_flag)
    }
}

pub struct PpuBus<'a>(&'a mut Bus);

impl<'a> PpuBus<'a> {
    /// Read from the PPU address space. Pattern tables and nametables are
    /// routed through the mapper; palette RAM is internal to the PPU, and
    /// accesses in its range fall through to the nametable space underneath.
    pub fn read_address(&self, address: u16) -> u8 {
        let address = mask_ppu_address(address);
        match &self.0.mapper {
            Some(mapper) => mapper.read_ppu_address(address, &self.0.ppu_vram),
            None => 0xFF,
        }
    }

    pub fn write_address(&mut self, address: u16, value: u8) {
        let address = mask_ppu_address(address);
        if let Some(mapper) = &mut self.0.mapper {
            mapper.write_ppu_address(address, value, &mut self.0.ppu_vram);
        }
    }
}

/// The PPU bus is 14 bits wide, and the palette range overlays the top of
/// nametable space.
fn mask_ppu_address(address: u16) -> u16 {
    let address = address & 0x3FFF;
    if address >= 0x3F00 {
        address & 0x2FFF
    } else {
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_ram_is_mirrored() {
        let mut bus = Bus::new();

        bus.cpu().write_address(0x0002, 0x55);
        assert_eq!(bus.cpu().read_address(0x0802), 0x55);
        assert_eq!(bus.cpu().read_address(0x1002), 0x55);
        assert_eq!(bus.cpu().read_address(0x1802), 0x55);

        bus.cpu().write_address(0x1FFF, 0xAA);
        assert_eq!(bus.cpu().read_address(0x07FF), 0xAA);
    }

    #[test]
    fn unmapped_reads_return_open_bus() {
        let mut bus = Bus::new();

        bus.cpu().write_address(0x0000, 0xAB);
        assert_eq!(bus.cpu().read_address(0x4018), 0xAB);

        // Reads refresh the latch too
        bus.cpu().read_address(0x0000);
        assert_eq!(bus.cpu().read_address(0x5000), 0xAB);

        bus.cpu().write_address(0x4020, 0x13);
        assert_eq!(bus.cpu().read_address(0x8000), 0x13);
    }

    #[test]
    fn apu_status_is_fully_driven() {
        let mut bus = Bus::new();

        bus.cpu().write_address(0x0000, 0xFF);
        assert_eq!(bus.cpu().read_address(0x4015), 0x00);
    }

    #[test]
    fn float_mask_mixes_open_bus_bits() {
        let mut bus = Bus::new();

        // Upper 3 bits of $4016 float
        bus.cpu().write_address(0x0000, 0xFF);
        let value = bus.cpu().read_address(0x4016);
        assert_eq!(value & 0xE0, 0xE0);
        assert_eq!(value & 0x01, 0x00);
    }

    #[test]
    fn joypad_shift_register() {
        let mut bus = Bus::new();

        bus.update_p1_joypad_state(JoypadState {
            a: true,
            start: true,
            ..JoypadState::default()
        });

        // Strobe high then low to latch
        bus.cpu().write_address(0x4016, 0x01);
        bus.cpu().write_address(0x4016, 0x00);

        // A, B, Select, Start, Up, Down, Left, Right
        let expected_bits = [1, 0, 0, 1, 0, 0, 0, 0];
        for (i, &expected) in expected_bits.iter().enumerate() {
            let value = bus.cpu().read_address(0x4016) & 0x01;
            assert_eq!(value, expected, "bit {i} mismatch");
        }

        // Exhausted shift registers return 1s
        assert_eq!(bus.cpu().read_address(0x4016) & 0x01, 0x01);
        assert_eq!(bus.cpu().read_address(0x4016) & 0x01, 0x01);
    }

    #[test]
    fn oam_data_port_increments_oam_addr() {
        let mut bus = Bus::new();

        bus.cpu().write_address(0x2003, 0x10);
        bus.cpu().write_address(0x2004, 0xAA);
        bus.cpu().write_address(0x2004, 0xBB);

        bus.cpu().write_address(0x2003, 0x10);
        assert_eq!(bus.cpu().read_address(0x2004), 0xAA);

        // Register window is mirrored every 8 bytes
        bus.cpu().write_address(0x2003, 0x11);
        assert_eq!(bus.cpu().read_address(0x200C), 0xBB);
        assert_eq!(bus.cpu().read_address(0x3FFC), 0xBB);
    }

    #[test]
    fn op_log_records_reads_and_writes() {
        let mut bus = Bus::new();
        bus.set_op_log_enabled(true);

        bus.cpu().write_address(0x0010, 0x42);
        bus.cpu().read_address(0x0010);

        let log = bus.take_op_log();
        assert_eq!(
            log,
            vec![BusOp::Write(0x0010, 0x42), BusOp::Read(0x0010, 0x42)]
        );
    }
}
