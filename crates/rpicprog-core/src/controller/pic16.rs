//! PIC16 midrange and baseline controller.
//!
//! Both variants share the word-at-a-time read/write machinery and differ
//! only in how the program counter is positioned. The controller tracks the
//! device PC in `last_address` so sequential accesses avoid needless
//! re-entry of programming mode.

use crate::controller::Controller;
use crate::device::{DeviceInfo, Section};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::sequence::{Pic16Command, Pic16SequenceGenerator, TimedSequence};

/// Midrange parts position with LOAD_CONFIGURATION; baseline parts reach
/// the configuration word only through a reset that parks the PC one
/// location before address 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pic16Variant {
    Midrange,
    Baseline,
}

/// Sentinel for the baseline post-reset PC ("address minus one"); the first
/// increment from here lands on address 0.
const CONFIGURATION_ADDRESS: u32 = u32::MAX - 1;

const READ_RETRIES: u32 = 3;

pub struct Pic16Controller<D> {
    driver: D,
    generator: Pic16SequenceGenerator,
    variant: Pic16Variant,
    last_address: u32,
    /// Set when an increment would have carried the PC into configuration
    /// space; the device state is undefined past that point, so the next
    /// positioning must re-enter programming mode.
    pending_reset: bool,
}

impl<D: Driver> Pic16Controller<D> {
    pub fn new(driver: D, generator: Pic16SequenceGenerator, variant: Pic16Variant) -> Self {
        let last_address = match variant {
            Pic16Variant::Midrange => 0,
            Pic16Variant::Baseline => CONFIGURATION_ADDRESS,
        };
        Pic16Controller {
            driver,
            generator,
            variant,
            last_address,
            pending_reset: false,
        }
    }

    fn write_command(&mut self, command: Pic16Command, payload: u16) -> Result<()> {
        self.driver
            .write_datastring(&self.generator.command_sequence(command, payload))
    }

    fn write_command_only(&mut self, command: Pic16Command) -> Result<()> {
        self.driver
            .write_datastring(&self.generator.command_only(command))
    }

    fn read_with_command(&mut self, command: Pic16Command) -> Result<u16> {
        let sequence = self.generator.command_sequence(command, 0);
        // The 14 data bits follow the command and start bit.
        let words = self.driver.read_with_sequence(&sequence, &[7], 14, 1, true)?;
        Ok(words[0])
    }

    fn write_timed(&mut self, sequence: TimedSequence) -> Result<()> {
        self.driver.write_timed_sequence(&sequence)
    }

    /// Re-enter programming mode, resetting the device PC.
    fn reset_device(&mut self) -> Result<()> {
        let init = self.generator.init_sequence();
        self.driver.write_timed_sequence(&init)?;
        self.last_address = match self.variant {
            Pic16Variant::Midrange => 0,
            Pic16Variant::Baseline => CONFIGURATION_ADDRESS,
        };
        self.pending_reset = false;
        Ok(())
    }

    fn increment_pc(&mut self, device_info: &DeviceInfo) -> Result<()> {
        self.write_command_only(Pic16Command::IncrementAddress)?;
        match self.variant {
            Pic16Variant::Midrange => {
                let was_config = self.last_address >= device_info.config_offset;
                self.last_address += 2;
                // The PC must not clock through into configuration space;
                // the device is in an undefined state past this point, so
                // the next load_address re-enters programming mode.
                if self.last_address >= device_info.config_offset && !was_config {
                    self.last_address = 0;
                    self.pending_reset = true;
                }
            }
            Pic16Variant::Baseline => {
                if self.last_address == CONFIGURATION_ADDRESS {
                    self.last_address = 0;
                } else {
                    self.last_address += 2;
                }
            }
        }
        Ok(())
    }

    /// Position the device PC on `address` for an access to `section`.
    fn load_address(
        &mut self,
        section: Section,
        address: u32,
        device_info: &DeviceInfo,
    ) -> Result<()> {
        if self.pending_reset {
            self.reset_device()?;
        }
        let target = match self.variant {
            Pic16Variant::Midrange => match section {
                Section::Configuration => {
                    if address < self.last_address
                        || self.last_address < device_info.config_offset
                    {
                        self.write_command(Pic16Command::LoadConfiguration, 0)?;
                        self.last_address = device_info.config_offset;
                    }
                    address
                }
                // User IDs on these parts are catalogued as part of the
                // configuration section; the user-ID path is only taken for
                // flash-resident words such as the oscillator calibration.
                Section::Flash | Section::UserId => {
                    if address < self.last_address {
                        self.reset_device()?;
                    }
                    address
                }
                Section::Eeprom => {
                    let local = address.checked_sub(device_info.eeprom_offset).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "EEPROM address {address:06X} precedes the EEPROM base"
                        ))
                    })?;
                    if local < self.last_address {
                        self.reset_device()?;
                    }
                    local
                }
            },
            Pic16Variant::Baseline => match section {
                Section::Configuration => {
                    // Only reachable immediately after a reset.
                    if self.last_address != CONFIGURATION_ADDRESS {
                        self.reset_device()?;
                    }
                    return Ok(());
                }
                _ => {
                    if self.last_address != CONFIGURATION_ADDRESS && address < self.last_address {
                        self.reset_device()?;
                    }
                    if self.last_address == CONFIGURATION_ADDRESS {
                        self.increment_pc(device_info)?;
                    }
                    address
                }
            },
        };

        if self.last_address > target {
            return Err(Error::InvalidArgument(format!(
                "cannot step backwards from {:06X} to {:06X}",
                self.last_address, target
            )));
        }
        while self.last_address < target {
            self.increment_pc(device_info)?;
        }
        Ok(())
    }

    fn read_word(&mut self, section: Section) -> Result<u16> {
        let command = if section == Section::Eeprom {
            Pic16Command::ReadDataMemory
        } else {
            Pic16Command::ReadProgMemory
        };
        // Tolerate transient sync loss; the PC has not advanced yet so an
        // immediate retry reads the same word.
        let mut result = Err(Error::SyncLost("unattempted".into()));
        for _ in 0..READ_RETRIES {
            result = self.read_with_command(command);
            if !matches!(result, Err(Error::SyncLost(_))) {
                break;
            }
        }
        result
    }
}

impl<D: Driver> Controller for Pic16Controller<D> {
    fn open(&mut self) -> Result<()> {
        self.driver.open()?;
        self.reset_device()
    }

    fn close(&mut self) {
        self.driver.close();
    }

    fn read_device_id(&mut self) -> Result<(u16, u16)> {
        if self.variant == Pic16Variant::Baseline {
            return Err(Error::Unimplemented(
                "baseline parts carry no device ID".into(),
            ));
        }
        self.write_command(Pic16Command::LoadConfiguration, 0)?;
        for _ in 0..5 {
            self.write_command_only(Pic16Command::IncrementAddress)?;
        }
        // Two ID layouts exist: one keeps everything in configuration word
        // 6, the other splits revision (word 5, tagged 10b) from device ID
        // (word 6, tagged 11b).
        let location5 = self.read_with_command(Pic16Command::ReadProgMemory)?;
        self.write_command_only(Pic16Command::IncrementAddress)?;
        let location6 = self.read_with_command(Pic16Command::ReadProgMemory)?;
        log::debug!("device ID words: {location5:04X} {location6:04X}");
        let (device_id, revision) =
            if location6 & 0x3000 == 0x3000 && location5 & 0x3000 == 0x2000 {
                (location6, location5)
            } else {
                (location6 >> 5, location6 & 0x1f)
            };
        self.reset_device()?;
        Ok((device_id, revision))
    }

    fn read(
        &mut self,
        section: Section,
        start_address: u32,
        end_address: u32,
        device_info: &DeviceInfo,
    ) -> Result<Vec<u8>> {
        self.load_address(section, start_address, device_info)?;

        // Reading word-at-a-time is slower than the multi-word read modes,
        // but on sync loss the PC has not moved past the failed word, so
        // the retry can happen right here.
        let mut result = Vec::with_capacity((end_address - start_address) as usize);
        let mut remaining = end_address.saturating_sub(start_address) as i64;
        while remaining > 0 {
            let word = self.read_word(section)?;
            self.increment_pc(device_info)?;
            result.push(word as u8);
            result.push((word >> 8) as u8 & 0x3f);
            remaining -= 2;
        }
        Ok(result)
    }

    fn write(
        &mut self,
        section: Section,
        address: u32,
        data: &[u8],
        device_info: &DeviceInfo,
    ) -> Result<()> {
        self.load_address(section, address, device_info)?;

        if section == Section::Flash {
            let block_size = device_info.write_block_size as usize;
            if address as usize % block_size != 0 {
                return Err(Error::InvalidArgument(
                    "address is not a multiple of the write block size".into(),
                ));
            }
            if data.len() % block_size != 0 {
                return Err(Error::InvalidArgument(
                    "data size is not a multiple of the write block size".into(),
                ));
            }
            for block in data.chunks(block_size) {
                for (i, pair) in block.chunks(2).enumerate() {
                    let datum = (pair[1] as u16) << 8 | pair[0] as u16;
                    self.write_command(Pic16Command::LoadProgMemory, datum)?;
                    if (i + 1) * 2 != block_size {
                        self.increment_pc(device_info)?;
                    }
                }
                self.write_timed(self.generator.write_data_sequence(device_info))?;
                self.increment_pc(device_info)?;
            }
        } else {
            if address % 2 != 0 || data.len() % 2 != 0 {
                return Err(Error::InvalidArgument(
                    "write address and size must be word aligned".into(),
                ));
            }
            let command = if section == Section::Eeprom {
                Pic16Command::LoadDataMemory
            } else {
                Pic16Command::LoadProgMemory
            };
            for pair in data.chunks(2) {
                let datum = (pair[1] as u16) << 8 | pair[0] as u16;
                self.write_command(command, datum)?;
                self.write_timed(self.generator.write_data_sequence(device_info))?;
                self.increment_pc(device_info)?;
            }
        }
        Ok(())
    }

    fn chip_erase(&mut self, device_info: &DeviceInfo) -> Result<()> {
        // A factory-calibrated oscillator word would be destroyed by the
        // erase; read it first and put it back afterwards.
        let calibration = if device_info.calibration_word_address != 0 {
            Some(self.read(
                Section::UserId,
                device_info.calibration_word_address,
                device_info.calibration_word_address + 2,
                device_info,
            )?)
        } else {
            None
        };
        self.reset_device()?;
        self.write_timed(self.generator.chip_erase_sequence(device_info))?;
        self.reset_device()?;
        if let Some(word) = calibration {
            self.write(
                Section::UserId,
                device_info.calibration_word_address,
                &word,
                device_info,
            )?;
        }
        Ok(())
    }

    fn section_erase(&mut self, section: Section, device_info: &DeviceInfo) -> Result<()> {
        if section == Section::Eeprom && self.variant == Pic16Variant::Midrange {
            self.reset_device()?;
            return self.write_timed(self.generator.eeprom_erase_sequence(device_info));
        }
        Err(Error::Unimplemented(format!(
            "section erase is not supported for the {section} section"
        )))
    }

    fn row_erase(&mut self, address: u32, device_info: &DeviceInfo) -> Result<()> {
        if self.variant == Pic16Variant::Baseline {
            return Err(Error::Unimplemented(
                "baseline parts cannot erase single rows".into(),
            ));
        }
        self.load_address(Section::Flash, address, device_info)?;
        self.write_timed(self.generator.row_erase_sequence(device_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_util::ScriptedDriver;
    use crate::sequence::Handshake;

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "PIC16F628A".into(),
            device_id: 0x1060,
            program_memory_size: 0x1000,
            config_size: 0x12,
            config_offset: 0x4000,
            eeprom_size: 0x100,
            eeprom_offset: 0x4200,
            write_block_size: 16,
            erase_block_size: 64,
            ..DeviceInfo::default()
        }
    }

    fn controller(variant: Pic16Variant) -> Pic16Controller<ScriptedDriver> {
        Pic16Controller::new(
            ScriptedDriver::default(),
            Pic16SequenceGenerator::new(Handshake::Lvp),
            variant,
        )
    }

    #[test]
    fn read_emits_low_byte_then_masked_high_byte() {
        let mut c = controller(Pic16Variant::Midrange);
        c.driver.push_read_words(vec![0x3fff]);
        let data = c.read(Section::Flash, 0, 2, &device()).unwrap();
        assert_eq!(data, vec![0xff, 0x3f]);
    }

    #[test]
    fn read_propagates_sync_loss_after_exhausting_retries() {
        let mut c = controller(Pic16Variant::Midrange);
        c.driver.push_read_words(vec![0x1234]);
        let data = c.read(Section::Flash, 0, 2, &device()).unwrap();
        assert_eq!(data, vec![0x34, 0x12]);
        // Nothing scripted: every retry loses sync and the error surfaces.
        let err = c.read(Section::Flash, 2, 4, &device()).unwrap_err();
        assert!(matches!(err, Error::SyncLost(_)));
    }

    #[test]
    fn forward_read_does_not_reset() {
        let mut c = controller(Pic16Variant::Midrange);
        c.driver.push_read_words(vec![1]);
        c.driver.push_read_words(vec![2]);
        c.read(Section::Flash, 0, 2, &device()).unwrap();
        assert_eq!(c.last_address, 2);
        c.read(Section::Flash, 2, 4, &device()).unwrap();
        assert_eq!(c.last_address, 4);
    }

    #[test]
    fn crossing_into_configuration_space_forces_a_reset_on_the_next_load() {
        let mut c = controller(Pic16Variant::Midrange);
        let info = device();
        c.last_address = info.config_offset - 2;
        c.increment_pc(&info).unwrap();
        assert!(c.pending_reset, "the crossing must flag a reset");

        c.driver.record_writes = true;
        c.load_address(Section::Flash, 0, &info).unwrap();
        assert!(!c.pending_reset);
        assert_eq!(c.last_address, 0);
        // The re-entry sequence (the clocked key with nMCLR low) must have
        // gone out on the wire, not just a bookkeeping wrap.
        let init = c.generator.init_sequence();
        let magic = &init[1].data;
        assert!(
            c.driver
                .written()
                .windows(magic.len())
                .any(|w| w == magic.as_slice()),
            "load_address after the crossing must re-enter programming mode"
        );
    }

    #[test]
    fn device_id_two_word_format() {
        let mut c = controller(Pic16Variant::Midrange);
        // Location 5 tagged 10b (revision), location 6 tagged 11b (ID).
        c.driver.push_read_words(vec![0x2043]);
        c.driver.push_read_words(vec![0x3055]);
        let (id, revision) = c.read_device_id().unwrap();
        assert_eq!(id, 0x3055);
        assert_eq!(revision, 0x2043);
    }

    #[test]
    fn device_id_packed_format() {
        let mut c = controller(Pic16Variant::Midrange);
        c.driver.push_read_words(vec![0x0000]);
        c.driver.push_read_words(vec![0x0c25]);
        let (id, revision) = c.read_device_id().unwrap();
        assert_eq!(id, 0x0c25 >> 5);
        assert_eq!(revision, 0x05);
    }

    #[test]
    fn baseline_has_no_device_id() {
        let mut c = controller(Pic16Variant::Baseline);
        assert!(matches!(
            c.read_device_id(),
            Err(Error::Unimplemented(_))
        ));
    }

    #[test]
    fn baseline_configuration_requires_a_fresh_reset() {
        let mut c = controller(Pic16Variant::Baseline);
        let info = device();
        // Post-reset, the PC sits on the configuration word.
        c.driver.push_read_words(vec![0x0fef]);
        let data = c.read(Section::Configuration, 0x4000, 0x4002, &info).unwrap();
        assert_eq!(data, vec![0xef, 0x0f]);
        // After moving into program memory, configuration needs a reset.
        c.driver.push_read_words(vec![0x0001]);
        c.read(Section::Flash, 0, 2, &info).unwrap();
        c.driver.push_read_words(vec![0x0fee]);
        c.read(Section::Configuration, 0x4000, 0x4002, &info).unwrap();
        assert_eq!(c.last_address, 0);
    }

    #[test]
    fn baseline_first_increment_lands_on_address_zero() {
        let mut c = controller(Pic16Variant::Baseline);
        let info = device();
        c.driver.push_read_words(vec![0x0abc]);
        c.read(Section::Flash, 0, 2, &info).unwrap();
        assert_eq!(c.last_address, 2);
    }

    #[test]
    fn unaligned_flash_write_is_rejected() {
        let mut c = controller(Pic16Variant::Midrange);
        let err = c
            .write(Section::Flash, 2, &vec![0u8; 16], &device())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn chip_erase_preserves_the_calibration_word() {
        let mut c = controller(Pic16Variant::Midrange);
        let mut info = device();
        info.calibration_word_address = 0xffe;
        // The calibration read returns 0x3468 (a RETLW with the trim value).
        c.driver.push_read_words(vec![0x3468]);
        c.driver.record_writes = true;
        c.chip_erase(&info).unwrap();
        // The restore write must reload the same word.
        let generator = Pic16SequenceGenerator::new(Handshake::Lvp);
        let reload = generator.command_sequence(Pic16Command::LoadProgMemory, 0x3468);
        let written = c.driver.written();
        assert!(
            written.windows(reload.len()).any(|w| w == reload.as_slice()),
            "calibration word must be written back after the erase"
        );
    }
}
