//! Per-family ICSP controllers.
//!
//! A controller adapts the generic read/write/erase contract to one
//! family's protocol, translating operations into command sequences and
//! driving them through the transport.

mod pic16;
mod pic16new;
mod pic18;
mod pic24;

pub use pic16::{Pic16Controller, Pic16Variant};
pub use pic16new::Pic16NewController;
pub use pic18::Pic18Controller;
pub use pic24::Pic24Controller;

use crate::device::{DeviceInfo, Section};
use crate::error::{Error, Result};

/// Family-independent programming operations.
///
/// All addresses and lengths are in 8-bit units of the device's flat image
/// space. `SyncLost` errors surface unchanged for the high-level programmer
/// to recover from.
pub trait Controller {
    /// Open the transport and enter programming mode.
    fn open(&mut self) -> Result<()>;

    /// Leave programming mode and release the transport.
    fn close(&mut self);

    /// Read the device ID and silicon revision.
    fn read_device_id(&mut self) -> Result<(u16, u16)>;

    /// Read `[start_address, end_address)` of a section.
    fn read(
        &mut self,
        section: Section,
        start_address: u32,
        end_address: u32,
        device_info: &DeviceInfo,
    ) -> Result<Vec<u8>>;

    /// Write `data` to a section at `address`.
    fn write(
        &mut self,
        section: Section,
        address: u32,
        data: &[u8],
        device_info: &DeviceInfo,
    ) -> Result<()>;

    /// Erase the whole chip.
    fn chip_erase(&mut self, device_info: &DeviceInfo) -> Result<()>;

    /// Erase one section.
    fn section_erase(&mut self, section: Section, device_info: &DeviceInfo) -> Result<()>;

    /// Erase a single flash row at `address`.
    fn row_erase(&mut self, address: u32, device_info: &DeviceInfo) -> Result<()> {
        let _ = (address, device_info);
        Err(Error::Unimplemented(
            "row erase is not supported for this family".into(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    //! A scripted transport for exercising controllers without hardware.

    use std::collections::VecDeque;

    use crate::driver::Driver;
    use crate::error::{Error, Result};

    /// Records written pin bytes and replays queued read results.
    #[derive(Default)]
    pub struct ScriptedDriver {
        /// When set, every pin byte written is kept for inspection.
        pub record_writes: bool,
        written: Vec<u8>,
        reads: VecDeque<Vec<u16>>,
    }

    impl ScriptedDriver {
        /// Queue the words one `read_with_sequence` call will return.
        pub fn push_read_words(&mut self, words: Vec<u16>) {
            self.reads.push_back(words);
        }

        pub fn written(&self) -> &[u8] {
            &self.written
        }
    }

    impl Driver for ScriptedDriver {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn list(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn set_pins(&mut self, pins: u8) -> Result<()> {
            if self.record_writes {
                self.written.push(pins);
            }
            Ok(())
        }

        fn flush_output(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_with_sequence(
            &mut self,
            _sequence: &[u8],
            _bit_offsets: &[usize],
            _bit_count: usize,
            _count: u32,
            _lsb_first: bool,
        ) -> Result<Vec<u16>> {
            self.reads
                .pop_front()
                .ok_or_else(|| Error::SyncLost("scripted driver has no more data".into()))
        }
    }
}
