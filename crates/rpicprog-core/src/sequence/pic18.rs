//! PIC18 command encoding: 4 command bits then 16 payload bits, LSB first.

use std::time::Duration;

use crate::device::DeviceInfo;
use crate::pins::{Pins, BASE};
use crate::sequence::{bit_sequence_lsb, init_sequence, Handshake, TimedSequence, TimedStep};

/// The PIC18 serial instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pic18Command {
    CoreInst = 0,
    ShiftOutTablat = 2,
    TableRead = 8,
    TableReadPostInc = 9,
    TableReadPostDec = 10,
    TableReadPreInc = 11,
    TableWrite = 12,
    TableWritePostInc2 = 13,
    TableWritePostInc2StartPgm = 14,
    TableWriteStartPgm = 15,
}

/// Timed sequences the PIC18 controller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pic18TimedSequenceKind {
    Init,
    BulkErase,
    Write,
    WriteConfig,
}

pub struct Pic18SequenceGenerator {
    handshake: Handshake,
}

impl Pic18SequenceGenerator {
    pub fn new(handshake: Handshake) -> Self {
        Pic18SequenceGenerator { handshake }
    }

    /// Encode one command with its 16-bit payload.
    pub fn command_sequence(&self, command: Pic18Command, payload: u16) -> Vec<u8> {
        let mut result = bit_sequence_lsb(command as u32, 4);
        result.extend_from_slice(&bit_sequence_lsb(payload as u32, 16));
        result
    }

    /// A timed sequence, parameterised by the device where timings are
    /// chip-specific. The erase and write variants interleave a short clock
    /// burst (holding PGD low while the device programs) with the mandated
    /// pulse duration, then clock out 16 dummy payload bits.
    pub fn timed_sequence(
        &self,
        kind: Pic18TimedSequenceKind,
        device_info: Option<&DeviceInfo>,
    ) -> TimedSequence {
        let pgc = BASE | Pins::PGC.bits();
        match kind {
            Pic18TimedSequenceKind::Init => init_sequence(self.handshake),
            Pic18TimedSequenceKind::BulkErase => vec![
                TimedStep {
                    data: vec![pgc, BASE, pgc, BASE, pgc, BASE, pgc, BASE],
                    sleep: device_info
                        .map(|d| d.bulk_erase_timing)
                        .unwrap_or(Duration::from_millis(500)),
                },
                TimedStep {
                    data: bit_sequence_lsb(0, 16),
                    sleep: Duration::ZERO,
                },
            ],
            Pic18TimedSequenceKind::Write | Pic18TimedSequenceKind::WriteConfig => {
                let sleep = match kind {
                    Pic18TimedSequenceKind::Write => device_info
                        .map(|d| d.block_write_timing)
                        .unwrap_or(Duration::from_millis(1)),
                    _ => device_info
                        .map(|d| d.config_write_timing)
                        .unwrap_or(Duration::from_millis(1)),
                };
                vec![
                    // The fourth clock is held high for the programming time.
                    TimedStep {
                        data: vec![pgc, BASE, pgc, BASE, pgc, BASE, pgc],
                        sleep,
                    },
                    TimedStep {
                        data: vec![BASE],
                        sleep: Duration::from_micros(200),
                    },
                    TimedStep {
                        data: bit_sequence_lsb(0, 16),
                        sleep: Duration::ZERO,
                    },
                ]
            }
        }
    }
}
