//! Device families and their per-family parameterisation.

use crate::controller::{
    Controller, Pic16Controller, Pic16NewController, Pic16Variant, Pic18Controller,
    Pic24Controller,
};
use crate::device::{DeviceDb, SequenceValidator};
use crate::driver::Driver;
use crate::error::Result;
use crate::sequence::{
    Handshake, Pic16NewSequenceGenerator, Pic16SequenceGenerator, Pic18SequenceGenerator,
    Pic24SequenceGenerator,
};

/// The controller families. Several CLI family names (pic10, pic12, pic16)
/// map onto one controller family; they differ only in which catalogue file
/// is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Pic18,
    Pic16Midrange,
    Pic16Baseline,
    Pic16Enhanced,
    Pic24,
}

fn accept_any_sequence(_: &[u16]) -> Result<()> {
    Ok(())
}

impl Family {
    /// Scale factor from catalogue units to 8-bit image units. Families
    /// that count 16-bit words store halved addresses and sizes.
    pub fn unit_factor(self) -> u32 {
        match self {
            Family::Pic18 => 1,
            _ => 2,
        }
    }

    /// The erased-state byte pattern, repeated across filler regions.
    pub fn block_filler(self) -> &'static [u8] {
        match self {
            Family::Pic18 => &[0xff],
            Family::Pic16Midrange | Family::Pic16Enhanced => &[0xff, 0x3f],
            Family::Pic16Baseline => &[0xff, 0x0f],
            Family::Pic24 => &[0xff, 0xff, 0xff, 0x00],
        }
    }

    /// Validator applied to catalogue opcode sequences. Only the 6-bit
    /// PIC16 opcode vocabulary is checkable; the other families store raw
    /// register values in their sequences.
    pub fn sequence_validator(self) -> SequenceValidator {
        match self {
            Family::Pic16Midrange | Family::Pic16Baseline => {
                Pic16SequenceGenerator::validate_sequence
            }
            _ => accept_any_sequence,
        }
    }

    /// An empty device database parameterised for this family.
    pub fn device_db(self) -> DeviceDb {
        DeviceDb::new(
            self.unit_factor(),
            self.block_filler().to_vec(),
            self.sequence_validator(),
        )
    }

    /// Build the family controller on top of a transport.
    pub fn controller<D: Driver + 'static>(
        self,
        driver: D,
        handshake: Handshake,
    ) -> Box<dyn Controller> {
        match self {
            Family::Pic18 => Box::new(Pic18Controller::new(
                driver,
                Pic18SequenceGenerator::new(handshake),
            )),
            Family::Pic16Midrange => Box::new(Pic16Controller::new(
                driver,
                Pic16SequenceGenerator::new(handshake),
                Pic16Variant::Midrange,
            )),
            Family::Pic16Baseline => Box::new(Pic16Controller::new(
                driver,
                Pic16SequenceGenerator::new(handshake),
                Pic16Variant::Baseline,
            )),
            Family::Pic16Enhanced => Box::new(Pic16NewController::new(
                driver,
                Pic16NewSequenceGenerator::new(handshake),
            )),
            Family::Pic24 => Box::new(Pic24Controller::new(
                driver,
                Pic24SequenceGenerator::new(handshake),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_families_double_their_units() {
        assert_eq!(Family::Pic18.unit_factor(), 1);
        assert_eq!(Family::Pic16Midrange.unit_factor(), 2);
        assert_eq!(Family::Pic24.unit_factor(), 2);
    }

    #[test]
    fn fillers_match_the_erased_word_width() {
        assert_eq!(Family::Pic16Midrange.block_filler(), &[0xff, 0x3f]);
        assert_eq!(Family::Pic16Baseline.block_filler(), &[0xff, 0x0f]);
        assert_eq!(Family::Pic18.block_filler(), &[0xff]);
    }

    #[test]
    fn only_pic16_families_validate_sequences() {
        let validate = Family::Pic16Midrange.sequence_validator();
        assert!(validate(&[0x20]).is_err());
        let accept = Family::Pic18.sequence_validator();
        assert!(accept(&[0x3f3f, 0x8f8f]).is_ok());
    }
}
