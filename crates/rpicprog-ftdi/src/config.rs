//! Configuration for opening an FTDI bridge in synchronous bit-bang mode.

use rpicprog_core::error::{Error, Result};

/// Default FTDI vendor ID.
pub const DEFAULT_VENDOR_ID: u16 = 0x0403;
/// Default FT232 product ID.
pub const DEFAULT_PRODUCT_ID: u16 = 0x6001;

/// The eight bit-bang GPIO lines of an FT232-class bridge, by their UART
/// names, plus `Nc` for a pin that is not wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinName {
    TxD,
    RxD,
    Rts,
    Cts,
    Dtr,
    Dsr,
    Dcd,
    Ri,
    Nc,
}

impl PinName {
    /// The bit this line occupies in a bit-bang byte; 0 for `Nc`.
    pub fn mask(self) -> u8 {
        match self {
            PinName::TxD => 1 << 0,
            PinName::RxD => 1 << 1,
            PinName::Rts => 1 << 2,
            PinName::Cts => 1 << 3,
            PinName::Dtr => 1 << 4,
            PinName::Dsr => 1 << 5,
            PinName::Dcd => 1 << 6,
            PinName::Ri => 1 << 7,
            PinName::Nc => 0,
        }
    }
}

/// Which physical line carries each logical programming pin.
///
/// The defaults match the reference programmer wiring; PGD input and
/// output default to the same line (open-collector style with a series
/// resistor), but can be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAssignment {
    pub nmclr: PinName,
    pub pgc: PinName,
    pub pgd_in: PinName,
    pub pgd_out: PinName,
    pub pgm: PinName,
}

impl Default for PinAssignment {
    fn default() -> Self {
        PinAssignment {
            nmclr: PinName::TxD,
            pgc: PinName::Dtr,
            pgd_in: PinName::RxD,
            pgd_out: PinName::RxD,
            pgm: PinName::Cts,
        }
    }
}

impl PinAssignment {
    /// Clock and data must be wired; nMCLR and PGM may be absent.
    pub fn validate(&self) -> Result<()> {
        if self.pgc == PinName::Nc {
            return Err(Error::InitFailed("PGC cannot be unconnected".into()));
        }
        if self.pgd_out == PinName::Nc || self.pgd_in == PinName::Nc {
            return Err(Error::InitFailed("PGD cannot be unconnected".into()));
        }
        Ok(())
    }
}

/// USB selection and wiring for one programmer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtdiConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product description to narrow device listings.
    pub description: Option<String>,
    /// Serial number to narrow device listings.
    pub serial: Option<String>,
    pub pins: PinAssignment,
    /// Bit-bang symbol rate. Each target clock takes two symbols, so the
    /// default yields a ~50 kHz programming clock; lower it for parts that
    /// cannot keep up at low Vdd.
    pub baud_rate: u32,
}

impl Default for FtdiConfig {
    fn default() -> Self {
        FtdiConfig {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            description: None,
            serial: None,
            pins: PinAssignment::default(),
            baud_rate: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_masks_are_distinct_bits() {
        let pins = [
            PinName::TxD,
            PinName::RxD,
            PinName::Rts,
            PinName::Cts,
            PinName::Dtr,
            PinName::Dsr,
            PinName::Dcd,
            PinName::Ri,
        ];
        let mut seen = 0u8;
        for pin in pins {
            assert_eq!(pin.mask().count_ones(), 1);
            assert_eq!(seen & pin.mask(), 0);
            seen |= pin.mask();
        }
        assert_eq!(seen, 0xff);
        assert_eq!(PinName::Nc.mask(), 0);
    }

    #[test]
    fn clock_and_data_must_be_wired() {
        let mut pins = PinAssignment::default();
        assert!(pins.validate().is_ok());
        pins.pgc = PinName::Nc;
        assert!(pins.validate().is_err());
        pins.pgc = PinName::Dtr;
        pins.pgd_in = PinName::Nc;
        assert!(pins.validate().is_err());
    }
}
