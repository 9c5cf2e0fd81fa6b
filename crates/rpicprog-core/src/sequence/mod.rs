//! Pin-pattern sequence generation.
//!
//! Each family has its own command framing; all of them share the same
//! low-level encoding: every transmitted bit becomes two pin-pattern bytes,
//! clock-high then clock-low, with the data line stable across the pair so
//! PGD only ever changes while PGC is low.

mod pic16;
mod pic16new;
mod pic18;
mod pic24;

pub use pic16::{Pic16Command, Pic16SequenceGenerator};
pub use pic16new::{Pic16NewCommand, Pic16NewSequenceGenerator};
pub use pic18::{Pic18Command, Pic18SequenceGenerator, Pic18TimedSequenceKind};
pub use pic24::{Pic24SequenceGenerator, COMMAND_BITS, REGOUT_DATA_OFFSET};

use std::time::Duration;

use crate::pins::{Pins, BASE};

/// A pin-pattern string plus the delay the transport must observe after
/// flushing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedStep {
    pub data: Vec<u8>,
    pub sleep: Duration,
}

/// An ordered list of timed steps.
pub type TimedSequence = Vec<TimedStep>;

/// How programming mode is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Low-voltage entry: clock the MCHP key with nMCLR held low.
    Lvp,
    /// High-voltage entry, raising nMCLR before PGM.
    NmclrFirst,
    /// High-voltage entry, raising PGM before nMCLR.
    PgmFirst,
}

/// Encode `bits` bits of `data`, least significant first. Each bit becomes a
/// clock-high byte followed by a clock-low byte on top of the session base
/// (nMCLR and PGM asserted).
pub(crate) fn bit_sequence_lsb(data: u32, bits: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(2 * bits as usize);
    for i in 0..bits {
        let pgd = if data >> i & 1 != 0 { Pins::PGD.bits() } else { 0 };
        result.push(BASE | Pins::PGC.bits() | pgd);
        result.push(BASE | pgd);
    }
    result
}

/// Encode `bits` bits of `data`, most significant first.
pub(crate) fn bit_sequence_msb(data: u32, bits: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(2 * bits as usize);
    for i in (0..bits).rev() {
        let pgd = if data >> i & 1 != 0 { Pins::PGD.bits() } else { 0 };
        result.push(BASE | Pins::PGC.bits() | pgd);
        result.push(BASE | pgd);
    }
    result
}

/// Programming-mode entry sequence.
///
/// The LVP variant drives everything low, clocks the 32-bit "MCHP" key with
/// nMCLR low (raw bit stream, clock-low byte before clock-high so the key
/// bit is stable on the rising edge), asserts PGM for at least 20 us and
/// finally raises nMCLR. The high-voltage variant simply raises the two
/// control pins in the configured order.
pub(crate) fn init_sequence(handshake: Handshake) -> TimedSequence {
    match handshake {
        Handshake::Lvp => {
            let mut result = vec![TimedStep {
                data: vec![0, Pins::NMCLR.bits(), 0],
                sleep: Duration::from_millis(10),
            }];
            let mut magic = Vec::with_capacity(65);
            let key: u32 = 0x4D43_4850; // MCHP
            for i in (0..32).rev() {
                let pgd = if key >> i & 1 != 0 { Pins::PGD.bits() } else { 0 };
                magic.push(pgd);
                magic.push(Pins::PGC.bits() | pgd);
            }
            // Held for 40 ns in the three-pin entry, several microseconds in
            // the two-pin one; 20 us satisfies both.
            magic.push(Pins::PGM.bits());
            result.push(TimedStep {
                data: magic,
                sleep: Duration::from_micros(20),
            });
            result.push(TimedStep {
                data: vec![Pins::PGM.bits() | Pins::NMCLR.bits()],
                sleep: Duration::from_micros(400),
            });
            result
        }
        Handshake::NmclrFirst | Handshake::PgmFirst => {
            let first = if handshake == Handshake::NmclrFirst {
                Pins::NMCLR.bits()
            } else {
                Pins::PGM.bits()
            };
            vec![
                TimedStep {
                    data: vec![0],
                    sleep: Duration::from_millis(10),
                },
                TimedStep {
                    data: vec![first],
                    sleep: Duration::from_micros(100),
                },
                TimedStep {
                    data: vec![Pins::NMCLR.bits() | Pins::PGM.bits()],
                    sleep: Duration::from_micros(100),
                },
            ]
        }
    }
}
