//! Enhanced-midrange ("new" PIC16) command encoding.
//!
//! Commands are 8 bits, most significant first. Payload-carrying commands
//! append a 24-clock field: the payload shifted left one place, so the
//! stream reads as 9 leading zero bits, the 14 data bits MSB first, and a
//! stop bit. PC-load commands carry wider addresses in the same 24-clock
//! frame.

use crate::device::DeviceInfo;
use crate::sequence::{bit_sequence_msb, init_sequence, Handshake, TimedSequence, TimedStep};

/// The 8-bit enhanced-midrange command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pic16NewCommand {
    LoadPc = 0x80,
    BulkErase = 0x18,
    RowErase = 0xf0,
    LoadDataInc = 0x02,
    ReadDataInc = 0xfe,
    BeginProgrammingInt = 0xe0,
}

/// Word address the first chip-erase pass targets (configuration space, so
/// program memory and user IDs are covered).
const ERASE_PC_PROGRAM: u32 = 0x8000;
/// Word address of data memory for the second chip-erase pass.
const ERASE_PC_DATA: u32 = 0xf000;

pub struct Pic16NewSequenceGenerator {
    handshake: Handshake,
}

impl Pic16NewSequenceGenerator {
    pub fn new(handshake: Handshake) -> Self {
        Pic16NewSequenceGenerator { handshake }
    }

    /// Encode a command with its 24-clock payload frame.
    pub fn command_sequence(&self, command: Pic16NewCommand, payload: u32) -> Vec<u8> {
        let mut result = bit_sequence_msb(command as u32, 8);
        result.extend_from_slice(&bit_sequence_msb(payload << 1, 24));
        result
    }

    /// Encode a command with no payload frame.
    pub fn command_only(&self, command: Pic16NewCommand) -> Vec<u8> {
        bit_sequence_msb(command as u32, 8)
    }

    pub fn init_sequence(&self) -> TimedSequence {
        init_sequence(self.handshake)
    }

    /// Chip erase always covers program memory (via the configuration-space
    /// PC) and, when present, data memory.
    pub fn chip_erase_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        let mut result = vec![self.erase_step(ERASE_PC_PROGRAM, device_info)];
        if device_info.eeprom_size > 0 {
            result.push(self.erase_step(ERASE_PC_DATA, device_info));
        }
        result
    }

    /// The internally timed write pulse issued after the latches are loaded.
    pub fn write_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        vec![TimedStep {
            data: self.command_only(Pic16NewCommand::BeginProgrammingInt),
            sleep: device_info.block_write_timing,
        }]
    }

    /// Row erase pulse; the controller loads the PC first.
    pub fn row_erase_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        vec![TimedStep {
            data: self.command_only(Pic16NewCommand::RowErase),
            sleep: device_info.bulk_erase_timing,
        }]
    }

    fn erase_step(&self, pc: u32, device_info: &DeviceInfo) -> TimedStep {
        let mut data = self.command_sequence(Pic16NewCommand::LoadPc, pc);
        data.extend_from_slice(&self.command_only(Pic16NewCommand::BulkErase));
        TimedStep {
            data,
            sleep: device_info.bulk_erase_timing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::Pins;
    use crate::sequence::test_util::assert_clocked_pairs;
    use std::time::Duration;

    fn generator() -> Pic16NewSequenceGenerator {
        Pic16NewSequenceGenerator::new(Handshake::Lvp)
    }

    fn pgd_bits(seq: &[u8]) -> Vec<u8> {
        seq.chunks(2)
            .map(|pair| (pair[0] & Pins::PGD.bits() != 0) as u8)
            .collect()
    }

    #[test]
    fn payload_frame_is_nine_zeros_data_and_stop_bit() {
        let seq = generator().command_sequence(Pic16NewCommand::LoadDataInc, 0x2aaa);
        // 2 * (8 command + 24 payload clocks).
        assert_eq!(seq.len(), 64);
        assert_clocked_pairs(&seq);
        let bits = pgd_bits(&seq);
        // Command 0x02, MSB first.
        assert_eq!(&bits[..8], &[0, 0, 0, 0, 0, 0, 1, 0]);
        // Nine leading zeros.
        assert_eq!(&bits[8..17], &[0; 9]);
        // 14 data bits of 0x2aaa, MSB first.
        assert_eq!(
            &bits[17..31],
            &[1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0]
        );
        // Stop bit.
        assert_eq!(bits[31], 0);
    }

    #[test]
    fn load_pc_carries_configuration_addresses() {
        let seq = generator().command_sequence(Pic16NewCommand::LoadPc, 0x8005);
        let bits = pgd_bits(&seq);
        // 0x8005 << 1 = 0x1000A in a 24-bit MSB-first frame.
        let mut value: u32 = 0;
        for bit in &bits[8..] {
            value = value << 1 | *bit as u32;
        }
        assert_eq!(value, 0x8005 << 1);
    }

    #[test]
    fn chip_erase_covers_data_memory_only_when_present() {
        let mut info = DeviceInfo {
            bulk_erase_timing: Duration::from_millis(8),
            ..DeviceInfo::default()
        };
        assert_eq!(generator().chip_erase_sequence(&info).len(), 1);
        info.eeprom_size = 0x200;
        let seq = generator().chip_erase_sequence(&info);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].sleep, Duration::from_millis(8));
        // Each step is a LOAD_PC (64 bytes) plus a bare BULK_ERASE (16).
        assert_eq!(seq[0].data.len(), 80);
    }
}
