//! PIC24 command encoding.
//!
//! Only two serial commands exist. SIX (control nibble 0) clocks in and
//! executes one arbitrary 24-bit instruction; REGOUT (control nibble 1)
//! clocks out the VISI register during its 24 data clocks. Everything else
//! is expressed as instruction streams built by the controller.

use crate::sequence::{bit_sequence_lsb, init_sequence, Handshake, TimedSequence, TimedStep};
use std::time::Duration;

/// Bit slots one SIX or REGOUT command occupies (4 control + 24 data).
pub const COMMAND_BITS: usize = 28;
/// Bit offset of the 16 VISI bits within a REGOUT command.
pub const REGOUT_DATA_OFFSET: usize = 12;

pub struct Pic24SequenceGenerator {
    handshake: Handshake,
}

impl Pic24SequenceGenerator {
    pub fn new(handshake: Handshake) -> Self {
        Pic24SequenceGenerator { handshake }
    }

    /// SIX: execute one 24-bit instruction.
    pub fn write_command_sequence(&self, payload: u32) -> Vec<u8> {
        let mut result = bit_sequence_lsb(0, 4);
        result.extend_from_slice(&bit_sequence_lsb(payload, 24));
        result
    }

    /// REGOUT: clock out VISI. The 16 data bits appear in clocks 8..24 of
    /// the data field, i.e. at [`REGOUT_DATA_OFFSET`] bits into the command.
    pub fn read_command_sequence(&self) -> Vec<u8> {
        let mut result = bit_sequence_lsb(1, 4);
        result.extend_from_slice(&bit_sequence_lsb(0, 24));
        result
    }

    /// Programming-mode entry. The first SIX after entry needs 9 leading
    /// clocks instead of 4, so five extra idle clocks are appended here and
    /// the controllers never have to special-case it.
    pub fn init_sequence(&self) -> TimedSequence {
        let mut result = init_sequence(self.handshake);
        result.push(TimedStep {
            data: bit_sequence_lsb(0, 5),
            sleep: Duration::ZERO,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::Pins;
    use crate::sequence::test_util::assert_clocked_pairs;

    fn generator() -> Pic24SequenceGenerator {
        Pic24SequenceGenerator::new(Handshake::Lvp)
    }

    #[test]
    fn six_is_four_zero_control_bits_plus_payload() {
        let seq = generator().write_command_sequence(0x040200);
        assert_eq!(seq.len(), 2 * COMMAND_BITS);
        assert_clocked_pairs(&seq);
        for byte in &seq[..8] {
            assert_eq!(byte & Pins::PGD.bits(), 0, "control bits must be zero");
        }
        // Payload LSB first: 0x040200 has bit 9 set.
        assert_ne!(seq[8 + 2 * 9] & Pins::PGD.bits(), 0);
        assert_eq!(seq[8 + 2 * 8] & Pins::PGD.bits(), 0);
    }

    #[test]
    fn regout_control_nibble_is_one() {
        let seq = generator().read_command_sequence();
        assert_eq!(seq.len(), 2 * COMMAND_BITS);
        assert_ne!(seq[0] & Pins::PGD.bits(), 0);
        for byte in &seq[2..] {
            assert_eq!(byte & Pins::PGD.bits(), 0);
        }
    }

    #[test]
    fn entry_appends_five_extra_clocks_for_the_first_six() {
        let init = generator().init_sequence();
        let extra = init.last().unwrap();
        assert_eq!(extra.data.len(), 10);
        assert_clocked_pairs(&extra.data);
    }
}
