//! The synchronous bit-bang driver.

use std::io::{Read, Write};
use std::time::Duration;

use ftdi::BitMode;
use rpicprog_core::driver::{decode_read_words, sleep_at_least, Driver};
use rpicprog_core::error::{Error, Result};
use rpicprog_core::pins::{Pins, PIN_COMBINATIONS};

use crate::config::FtdiConfig;

/// Maximum bytes per USB write. Larger chunks make the FTDI drop read
/// reports, so 128 is the empirical ceiling for reliable reads.
const WRITE_CHUNK: usize = 128;
/// How far the drain may trail the writes, letting the USB round trips
/// pipeline instead of strictly alternating.
const DRAIN_LAG: isize = 256;
/// Zero-length reads tolerated before a drain is considered short.
const DRAIN_RETRIES: u32 = 10;

/// Product IDs probed when listing programmers.
const LIST_PRODUCT_IDS: [u16; 5] = [0x6001, 0x6010, 0x6011, 0x6014, 0x6015];

/// Driver for FTDI bridges in synchronous bit-bang mode.
///
/// Logical pin bytes are translated to wire bytes through a 16-entry
/// table built at open time; that table is the only place the physical
/// pin mapping exists.
pub struct FtdiBitbang {
    config: FtdiConfig,
    device: Option<ftdi::Device>,
    translate: [u8; PIN_COMBINATIONS],
    pgd_in_mask: u8,
    output_buffer: Vec<u8>,
    received_bits: Vec<u8>,
    received_bit_offset: usize,
    write_mode: bool,
}

impl FtdiBitbang {
    pub fn new(config: FtdiConfig) -> Self {
        FtdiBitbang {
            config,
            device: None,
            translate: [0; PIN_COMBINATIONS],
            pgd_in_mask: 0,
            output_buffer: Vec::new(),
            received_bits: Vec::new(),
            received_bit_offset: 0,
            write_mode: true,
        }
    }

    fn drain_input(&mut self, expected: usize) -> Result<()> {
        let mut buffer = [0u8; 256];
        let mut total = 0;
        let mut retries = 0;
        while total < expected {
            let want = (expected - total).min(buffer.len());
            let read = {
                let device = self
                    .device
                    .as_mut()
                    .ok_or_else(|| Error::InitFailed("device is not open".into()))?;
                device.read(&mut buffer[..want])
            };
            match read {
                Ok(0) => {
                    retries += 1;
                    if retries >= DRAIN_RETRIES {
                        break;
                    }
                }
                Ok(n) => {
                    if !self.write_mode {
                        self.record_input(&buffer[..n]);
                    }
                    total += n;
                }
                Err(_) => break,
            }
        }
        drain_outcome(total, expected, !self.write_mode)
    }

    /// Pack the PGD input bit of every mirrored byte into the received
    /// bitstream, LSB first within each stored byte.
    fn record_input(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.received_bit_offset == 8 {
                self.received_bits.push(0);
                self.received_bit_offset = 0;
            }
            let bit = (byte & self.pgd_in_mask != 0) as u8;
            *self
                .received_bits
                .last_mut()
                .expect("record buffer is never empty") |= bit << self.received_bit_offset;
            self.received_bit_offset += 1;
        }
    }
}

/// A short drain in record mode means real data loss; in write mode it is
/// an artefact of the FTDI's read reporting and is ignored.
fn drain_outcome(total: usize, expected: usize, record_mode: bool) -> Result<()> {
    if total < expected && record_mode {
        return Err(Error::SyncLost(format!(
            "did not receive the expected number of bytes ({total} instead of {expected})"
        )));
    }
    Ok(())
}

impl Driver for FtdiBitbang {
    fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Err(Error::InitFailed("device already open".into()));
        }
        self.config.pins.validate()?;

        let mut device = ftdi::find_by_vid_pid(self.config.vendor_id, self.config.product_id)
            .interface(ftdi::Interface::A)
            .open()
            .map_err(|e| Error::InitFailed(format!("couldn't open FTDI device: {e}")))?;

        // Raising the rate beyond 100k gains nothing: reads round-trip
        // through the small receive buffer and dominate the throughput.
        device
            .set_baud_rate(self.config.baud_rate)
            .map_err(|e| Error::InitFailed(format!("couldn't set baud rate: {e}")))?;
        device
            .usb_purge_buffers()
            .map_err(|e| Error::InitFailed(format!("could not purge USB buffers: {e}")))?;

        let pins = &self.config.pins;
        let single = [
            (Pins::NMCLR.bits(), pins.nmclr.mask()),
            (Pins::PGC.bits(), pins.pgc.mask()),
            (Pins::PGD.bits(), pins.pgd_out.mask()),
            (Pins::PGM.bits(), pins.pgm.mask()),
        ];
        let mut translate = [0u8; PIN_COMBINATIONS];
        for (combination, wire) in translate.iter_mut().enumerate() {
            for (logical, mask) in single {
                if combination as u8 & logical != 0 {
                    *wire |= mask;
                }
            }
        }
        self.translate = translate;
        self.pgd_in_mask = pins.pgd_in.mask();

        // All control lines are outputs; PGD input stays an input.
        let directions = pins.nmclr.mask() | pins.pgc.mask() | pins.pgd_out.mask() | pins.pgm.mask();
        device
            .set_bitmode(directions, BitMode::SyncBB)
            .map_err(|e| Error::InitFailed(format!("couldn't set bitbang mode: {e}")))?;
        device
            .set_latency_timer(1)
            .map_err(|e| Error::InitFailed(format!("couldn't set latency timer: {e}")))?;

        self.device = Some(device);
        self.output_buffer.clear();
        self.write_mode = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.device.is_none() {
            return;
        }
        // Drop the pins before letting go so the target is not left with
        // PGC or PGD driven.
        let _ = self.set_pins(0);
        let _ = self.flush_output();
        sleep_at_least(Duration::from_millis(100));
        if let Some(mut device) = self.device.take() {
            let _ = device.set_bitmode(0, BitMode::SyncBB);
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let devices = nusb::list_devices()
            .map_err(|e| Error::InitFailed(format!("could not list USB devices: {e}")))?;
        let mut result = Vec::new();
        for info in devices {
            if info.vendor_id() != self.config.vendor_id
                || !LIST_PRODUCT_IDS.contains(&info.product_id())
            {
                continue;
            }
            let description = info.product_string().unwrap_or("");
            let serial = info.serial_number().unwrap_or("");
            if let Some(wanted) = &self.config.description {
                if wanted != description {
                    continue;
                }
            }
            if let Some(wanted) = &self.config.serial {
                if wanted != serial {
                    continue;
                }
            }
            result.push(format!(
                "Vendor ID: 0x{:04X}\nProduct ID: 0x{:04X}\nDescription: {}\nSerial: {}\n",
                info.vendor_id(),
                info.product_id(),
                description,
                serial,
            ));
        }
        Ok(result)
    }

    fn set_pins(&mut self, pins: u8) -> Result<()> {
        self.output_buffer
            .push(self.translate[(pins & 0x0f) as usize]);
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        let mut status: Result<()> = Ok(());
        let mut drain_size: isize = -DRAIN_LAG;
        while !self.output_buffer.is_empty() {
            let size = WRITE_CHUNK.min(self.output_buffer.len());
            log::trace!("writing {:02X?}", &self.output_buffer[..size]);
            let device = self
                .device
                .as_mut()
                .ok_or_else(|| Error::InitFailed("device is not open".into()))?;
            device
                .write_all(&self.output_buffer[..size])
                .map_err(|e| Error::UsbWrite(format!("write failed: {e}")))?;
            self.output_buffer.drain(..size);
            drain_size += size as isize;
            if drain_size > 0 {
                let drained = self.drain_input(drain_size as usize);
                if status.is_ok() {
                    status = drained;
                }
                drain_size = 0;
            }
        }
        drain_size += DRAIN_LAG;
        if drain_size > 0 {
            let drained = self.drain_input(drain_size as usize);
            if status.is_ok() {
                status = drained;
            }
        }
        status
    }

    fn read_with_sequence(
        &mut self,
        sequence: &[u8],
        bit_offsets: &[usize],
        bit_count: usize,
        count: u32,
        lsb_first: bool,
    ) -> Result<Vec<u16>> {
        self.flush_output()?;
        self.received_bits.clear();
        self.received_bits.push(0);
        self.received_bit_offset = 0;
        self.write_mode = false;
        let issued = (|| {
            for _ in 0..count {
                self.write_datastring(sequence)?;
            }
            self.flush_output()
        })();
        self.write_mode = true;
        issued?;

        log::trace!("got bits {:02X?}", self.received_bits);
        Ok(decode_read_words(
            &self.received_bits,
            sequence.len(),
            bit_offsets,
            bit_count,
            count,
            lsb_first,
        ))
    }
}

impl Drop for FtdiBitbang {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PinAssignment, PinName};

    fn translate_table(pins: &PinAssignment) -> [u8; PIN_COMBINATIONS] {
        let single = [
            (Pins::NMCLR.bits(), pins.nmclr.mask()),
            (Pins::PGC.bits(), pins.pgc.mask()),
            (Pins::PGD.bits(), pins.pgd_out.mask()),
            (Pins::PGM.bits(), pins.pgm.mask()),
        ];
        let mut translate = [0u8; PIN_COMBINATIONS];
        for (combination, wire) in translate.iter_mut().enumerate() {
            for (logical, mask) in single {
                if combination as u8 & logical != 0 {
                    *wire |= mask;
                }
            }
        }
        translate
    }

    #[test]
    fn translate_table_composes_single_pin_masks() {
        let table = translate_table(&PinAssignment::default());
        assert_eq!(table[0], 0);
        // nMCLR -> TxD (bit 0), PGC -> DTR (bit 4).
        assert_eq!(table[Pins::NMCLR.bits() as usize], 0x01);
        assert_eq!(table[Pins::PGC.bits() as usize], 0x10);
        assert_eq!(
            table[(Pins::NMCLR | Pins::PGC).bits() as usize],
            0x11
        );
        // PGD out on RxD (bit 1), PGM on CTS (bit 3).
        assert_eq!(
            table[(Pins::PGD | Pins::PGM).bits() as usize],
            0x0a
        );
    }

    #[test]
    fn unconnected_pins_translate_to_nothing() {
        let pins = PinAssignment {
            pgm: PinName::Nc,
            ..PinAssignment::default()
        };
        let table = translate_table(&pins);
        assert_eq!(table[Pins::PGM.bits() as usize], 0);
        assert_eq!(
            table[(Pins::PGM | Pins::PGC).bits() as usize],
            table[Pins::PGC.bits() as usize]
        );
    }

    #[test]
    fn short_drain_is_sync_loss_only_in_record_mode() {
        // Eight bytes written, four drained.
        let err = drain_outcome(4, 8, true).unwrap_err();
        assert!(matches!(&err, Error::SyncLost(m) if m.contains("4 instead of 8")));
        assert!(drain_outcome(4, 8, false).is_ok());
        assert!(drain_outcome(8, 8, true).is_ok());
    }

    #[test]
    fn recorded_bits_pack_lsb_first() {
        let mut driver = FtdiBitbang::new(FtdiConfig::default());
        driver.pgd_in_mask = PinName::RxD.mask();
        driver.received_bits.push(0);
        driver.write_mode = false;
        // Samples: low, high, low, high -> 0b1010.
        driver.record_input(&[0x00, 0x02, 0x00, 0x02]);
        assert_eq!(driver.received_bits, vec![0b1010]);
        // Nine further samples spill into a second byte.
        driver.record_input(&[0x02; 9]);
        assert_eq!(driver.received_bits, vec![0b1111_1010, 0b0001_1111]);
    }
}
