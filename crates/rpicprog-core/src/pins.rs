//! Logical programming pins.
//!
//! Every byte the sequence generators emit is a combination of these four
//! bits. Translation to physical FTDI GPIO lines happens exactly once, in
//! the transport's translate table, so the protocol code never sees a
//! physical pin number.

use bitflags::bitflags;

bitflags! {
    /// One logical pin-pattern byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Pins: u8 {
        /// Inverted master clear / reset.
        const NMCLR = 1 << 0;
        /// Programming-mode enable (three-pin entry only).
        const PGM = 1 << 1;
        /// Programming clock.
        const PGC = 1 << 2;
        /// Programming data.
        const PGD = 1 << 3;
    }
}

/// Number of distinct logical pin combinations; the transport's translate
/// table has one entry per combination.
pub const PIN_COMBINATIONS: usize = 16;

/// nMCLR and PGM are held asserted for the whole programming session; every
/// command bit is clocked on top of this base.
pub const BASE: u8 = Pins::NMCLR.bits() | Pins::PGM.bits();
