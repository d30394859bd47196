use crate::bus::Bus;
use crate::cpu::CpuState;
use bincode::config::Configuration;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error serializing emulation state: {source}")]
    Serialization {
        #[from]
        source: bincode::error::EncodeError,
    },
    #[error("error deserializing emulation state: {source}")]
    Deserialization {
        #[from]
        source: bincode::error::DecodeError,
    },
}

fn bincode_config() -> Configuration {
    bincode::config::standard()
}

/// Write the bus and CPU state to the given writer. Cartridge ROM bytes and
/// the bus's handler tables are not serialized; loading rebuilds the tables
/// and re-attaches the ROM from the live state.
pub(crate) fn save_state<W: Write>(
    bus: &Bus,
    cpu_state: &CpuState,
    writer: &mut W,
) -> Result<(), SaveStateError> {
    bincode::encode_into_std_write(bus, writer, bincode_config())?;
    bincode::encode_into_std_write(cpu_state, writer, bincode_config())?;

    Ok(())
}

pub(crate) fn load_state<R: Read>(reader: &mut R) -> Result<(Bus, CpuState), SaveStateError> {
    let bus = bincode::decode_from_std_read(reader, bincode_config())?;
    let cpu_state = bincode::decode_from_std_read(reader, bincode_config())?;

    Ok((bus, cpu_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuRegisters;

    #[test]
    fn save_state_round_trip() {
        let mut bus = Bus::new();
        let mut cpu_state = CpuState::new(CpuRegisters::create(&mut bus.cpu()));

        cpu_state.registers.accumulator = 0x5A;
        cpu_state.registers.pc = 0x8123;
        bus.cpu().write_address(0x0042, 0x99);

        let mut buffer = Vec::new();
        save_state(&bus, &cpu_state, &mut buffer).unwrap();

        let (mut loaded_bus, loaded_cpu_state) = load_state(&mut buffer.as_slice()).unwrap();

        assert_eq!(loaded_cpu_state.registers.accumulator, 0x5A);
        assert_eq!(loaded_cpu_state.registers.pc, 0x8123);
        assert_eq!(loaded_bus.cpu().read_address(0x0042), 0x99);
    }
}
