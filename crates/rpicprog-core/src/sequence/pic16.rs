//! PIC16 midrange/baseline command encoding: 6 command bits, LSB first;
//! payload commands add a start bit, 14 payload bits and a stop bit.
//!
//! Device-specific erase and write pulses are stored in the catalogue as
//! word strings over this opcode set, with two markers: `0xFF` cuts a timed
//! step with the context's delay, `0xFE` is followed by a count and expands
//! to that many INCREMENT_ADDRESS commands.

use std::time::Duration;

use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::sequence::{bit_sequence_lsb, init_sequence, Handshake, TimedSequence, TimedStep};

/// Marker: cut a timed step here with the programming delay.
pub const DELAY_MARKER: u16 = 0xff;
/// Marker: the next word is an INCREMENT_ADDRESS repeat count.
pub const INCREMENT_MARKER: u16 = 0xfe;

/// The 6-bit midrange/baseline serial opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pic16Command {
    LoadConfiguration = 0,
    LoadProgMemory = 2,
    LoadDataMemory = 3,
    ReadProgMemory = 4,
    ReadDataMemory = 5,
    IncrementAddress = 6,
    BeginProgrammingInt = 8,
    BulkEraseProgram = 9,
    EndProgrammingNew = 10,
    BulkEraseData = 11,
    EndProgrammingOld = 14,
    RowEraseProgram = 17,
    BeginProgrammingExt = 24,
}

const VALID_OPCODES: [u16; 13] = [0, 2, 3, 4, 5, 6, 8, 9, 10, 11, 14, 17, 24];

pub struct Pic16SequenceGenerator {
    handshake: Handshake,
}

impl Pic16SequenceGenerator {
    pub fn new(handshake: Handshake) -> Self {
        Pic16SequenceGenerator { handshake }
    }

    /// Encode a load/read command: 6 command bits, a start bit, 14 payload
    /// bits and a stop bit.
    pub fn command_sequence(&self, command: Pic16Command, payload: u16) -> Vec<u8> {
        let mut result = bit_sequence_lsb(command as u32, 6);
        result.extend_from_slice(&bit_sequence_lsb(0, 1));
        result.extend_from_slice(&bit_sequence_lsb(payload as u32, 14));
        result.extend_from_slice(&bit_sequence_lsb(0, 1));
        result
    }

    /// Encode a bare command: 6 command bits, no payload.
    pub fn command_only(&self, command: Pic16Command) -> Vec<u8> {
        self.raw_command(command as u16)
    }

    fn raw_command(&self, opcode: u16) -> Vec<u8> {
        bit_sequence_lsb(opcode as u32, 6)
    }

    pub fn init_sequence(&self) -> TimedSequence {
        init_sequence(self.handshake)
    }

    /// Chip erase: the catalogue sequence, or bulk program erase plus (when
    /// EEPROM is present) bulk data erase.
    pub fn chip_erase_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        let default = self.default_chip_erase(device_info);
        let words = if device_info.chip_erase_sequence.is_empty() {
            &default
        } else {
            &device_info.chip_erase_sequence
        };
        self.expand(words, device_info.bulk_erase_timing)
    }

    /// EEPROM section erase.
    pub fn eeprom_erase_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        let default = vec![Pic16Command::BulkEraseData as u16, DELAY_MARKER];
        let words = if device_info.eeprom_erase_sequence.is_empty() {
            &default
        } else {
            &device_info.eeprom_erase_sequence
        };
        self.expand(words, device_info.bulk_erase_timing)
    }

    /// Write pulse issued after the data latches are loaded.
    pub fn write_data_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        let default = vec![Pic16Command::BeginProgrammingInt as u16, DELAY_MARKER];
        let words = if device_info.block_write_sequence.is_empty() {
            &default
        } else {
            &device_info.block_write_sequence
        };
        self.expand(words, device_info.block_write_timing)
    }

    /// Single-row erase pulse; the controller positions the PC first.
    pub fn row_erase_sequence(&self, device_info: &DeviceInfo) -> TimedSequence {
        let default = vec![Pic16Command::RowEraseProgram as u16, DELAY_MARKER];
        let words = if device_info.flash_erase_sequence.is_empty() {
            &default
        } else {
            &device_info.flash_erase_sequence
        };
        self.expand(words, device_info.bulk_erase_timing)
    }

    fn default_chip_erase(&self, device_info: &DeviceInfo) -> Vec<u16> {
        let mut words = vec![Pic16Command::BulkEraseProgram as u16, DELAY_MARKER];
        if device_info.eeprom_size > 0 {
            words.push(Pic16Command::BulkEraseData as u16);
            words.push(DELAY_MARKER);
        }
        words
    }

    /// Expand a catalogue word string into a concrete timed sequence:
    /// opcodes accumulate into the current step, a delay marker cuts the
    /// step with `delay`, and an increment marker repeats INCREMENT_ADDRESS.
    fn expand(&self, words: &[u16], delay: Duration) -> TimedSequence {
        let mut result = TimedSequence::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut iter = words.iter().copied();
        while let Some(word) = iter.next() {
            match word {
                DELAY_MARKER => {
                    result.push(TimedStep {
                        data: std::mem::take(&mut pending),
                        sleep: delay,
                    });
                }
                INCREMENT_MARKER => {
                    let count = iter.next().unwrap_or(0);
                    for _ in 0..count {
                        pending.extend_from_slice(
                            &self.raw_command(Pic16Command::IncrementAddress as u16),
                        );
                    }
                }
                opcode => pending.extend_from_slice(&self.raw_command(opcode)),
            }
        }
        if !pending.is_empty() {
            result.push(TimedStep {
                data: pending,
                sleep: Duration::ZERO,
            });
        }
        result
    }

    /// Check a catalogue word string against the opcode vocabulary. Used as
    /// the family's database sequence validator.
    pub fn validate_sequence(words: &[u16]) -> Result<()> {
        let mut iter = words.iter().copied();
        while let Some(word) = iter.next() {
            match word {
                DELAY_MARKER => {}
                INCREMENT_MARKER => {
                    if iter.next().is_none() {
                        return Err(Error::Parse(
                            "increment marker FEh requires a repeat count".into(),
                        ));
                    }
                }
                opcode if VALID_OPCODES.contains(&opcode) => {}
                opcode => {
                    return Err(Error::Parse(format!(
                        "invalid opcode {opcode:02X}h in device sequence"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::Pins;
    use crate::sequence::test_util::assert_clocked_pairs;

    fn generator() -> Pic16SequenceGenerator {
        Pic16SequenceGenerator::new(Handshake::Lvp)
    }

    #[test]
    fn payload_commands_are_framed_with_start_and_stop_bits() {
        let seq = generator().command_sequence(Pic16Command::LoadProgMemory, 0x3fff);
        // 2 * (6 + 1 + 14 + 1).
        assert_eq!(seq.len(), 44);
        assert_clocked_pairs(&seq);
        // Start bit (byte 12) and stop bit (byte 42) are zero.
        assert_eq!(seq[12] & Pins::PGD.bits(), 0);
        assert_eq!(seq[42] & Pins::PGD.bits(), 0);
        // All 14 payload bits of 0x3fff are ones.
        for i in 0..14 {
            assert_ne!(seq[14 + 2 * i] & Pins::PGD.bits(), 0);
        }
    }

    #[test]
    fn bare_commands_are_six_bits() {
        let seq = generator().command_only(Pic16Command::IncrementAddress);
        assert_eq!(seq.len(), 12);
        assert_clocked_pairs(&seq);
    }

    #[test]
    fn expansion_cuts_steps_at_delay_markers() {
        let info = DeviceInfo {
            bulk_erase_timing: Duration::from_millis(6),
            chip_erase_sequence: vec![9, DELAY_MARKER, 11, DELAY_MARKER],
            ..DeviceInfo::default()
        };
        let seq = generator().chip_erase_sequence(&info);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].data.len(), 12);
        assert_eq!(seq[0].sleep, Duration::from_millis(6));
        assert_eq!(seq[1].sleep, Duration::from_millis(6));
    }

    #[test]
    fn increment_marker_repeats_increment_address() {
        let info = DeviceInfo {
            bulk_erase_timing: Duration::from_millis(5),
            chip_erase_sequence: vec![INCREMENT_MARKER, 3, 9, DELAY_MARKER],
            ..DeviceInfo::default()
        };
        let seq = generator().chip_erase_sequence(&info);
        assert_eq!(seq.len(), 1);
        // 3 increments + 1 bulk erase, 12 bytes each.
        assert_eq!(seq[0].data.len(), 48);
    }

    #[test]
    fn default_chip_erase_skips_data_memory_when_absent() {
        let mut info = DeviceInfo {
            bulk_erase_timing: Duration::from_millis(6),
            ..DeviceInfo::default()
        };
        assert_eq!(generator().chip_erase_sequence(&info).len(), 1);
        info.eeprom_size = 0x100;
        assert_eq!(generator().chip_erase_sequence(&info).len(), 2);
    }

    #[test]
    fn validator_accepts_markers_and_known_opcodes() {
        assert!(Pic16SequenceGenerator::validate_sequence(&[]).is_ok());
        assert!(Pic16SequenceGenerator::validate_sequence(&[9, 0xff, 0xfe, 4, 11, 0xff]).is_ok());
    }

    #[test]
    fn validator_rejects_unknown_opcodes_and_bare_increment_marker() {
        assert!(Pic16SequenceGenerator::validate_sequence(&[0x20]).is_err());
        assert!(Pic16SequenceGenerator::validate_sequence(&[0xfe]).is_err());
    }
}
