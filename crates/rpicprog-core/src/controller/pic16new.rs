//! Enhanced-midrange controller.
//!
//! These parts take absolute PC loads, so there is no reset/increment
//! bookkeeping: every operation starts with LOAD_PC. Reads stream through
//! READ_DATA_INC; writes fill the latches with LOAD_DATA_INC and trigger
//! the internally timed programming command.

use crate::controller::Controller;
use crate::device::{DeviceInfo, Section};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::sequence::{Pic16NewCommand, Pic16NewSequenceGenerator};

/// Word address of the revision/device ID pair.
const DEVICE_ID_PC: u32 = 0x8005;

pub struct Pic16NewController<D> {
    driver: D,
    generator: Pic16NewSequenceGenerator,
}

impl<D: Driver> Pic16NewController<D> {
    pub fn new(driver: D, generator: Pic16NewSequenceGenerator) -> Self {
        Pic16NewController { driver, generator }
    }

    fn load_pc(&mut self, pc: u32) -> Result<()> {
        self.driver
            .write_datastring(&self.generator.command_sequence(Pic16NewCommand::LoadPc, pc))
    }

    fn read_words(&mut self, count: u32) -> Result<Vec<u16>> {
        let sequence = self
            .generator
            .command_sequence(Pic16NewCommand::ReadDataInc, 0);
        // 14 data bits follow the 8 command bits and 9 leading zeros,
        // most significant bit first.
        self.driver.read_with_sequence(&sequence, &[17], 14, count, false)
    }
}

impl<D: Driver> Controller for Pic16NewController<D> {
    fn open(&mut self) -> Result<()> {
        self.driver.open()?;
        self.driver.write_timed_sequence(&self.generator.init_sequence())
    }

    fn close(&mut self) {
        self.driver.close();
    }

    fn read_device_id(&mut self) -> Result<(u16, u16)> {
        self.load_pc(DEVICE_ID_PC)?;
        let words = self.read_words(2)?;
        Ok((words[1], words[0] & 0xfff))
    }

    fn read(
        &mut self,
        _section: Section,
        start_address: u32,
        end_address: u32,
        _device_info: &DeviceInfo,
    ) -> Result<Vec<u8>> {
        self.load_pc(start_address / 2)?;
        let words = self.read_words((end_address - start_address) / 2)?;
        let mut result = Vec::with_capacity(words.len() * 2);
        for word in words {
            result.push(word as u8);
            result.push((word >> 8) as u8);
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
        let block_size = if section == Section::Flash {
            device_info.write_block_size as usize
        } else {
            2
        };
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
        self.load_pc(address / 2)?;

        for block in data.chunks(block_size) {
            for pair in block.chunks(2) {
                let datum = (pair[1] as u16) << 8 | pair[0] as u16;
                self.driver.write_datastring(
                    &self
                        .generator
                        .command_sequence(Pic16NewCommand::LoadDataInc, datum as u32),
                )?;
            }
            self.driver
                .write_timed_sequence(&self.generator.write_sequence(device_info))?;
        }
        Ok(())
    }

    fn chip_erase(&mut self, device_info: &DeviceInfo) -> Result<()> {
        self.driver
            .write_timed_sequence(&self.generator.chip_erase_sequence(device_info))
    }

    fn section_erase(&mut self, section: Section, _device_info: &DeviceInfo) -> Result<()> {
        Err(Error::Unimplemented(format!(
            "section erase is not supported for the {section} section"
        )))
    }

    fn row_erase(&mut self, address: u32, device_info: &DeviceInfo) -> Result<()> {
        self.load_pc(address / 2)?;
        self.driver
            .write_timed_sequence(&self.generator.row_erase_sequence(device_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_util::ScriptedDriver;
    use crate::sequence::Handshake;

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "PIC16F18855".into(),
            device_id: 0x306c,
            program_memory_size: 0x4000,
            user_id_size: 8,
            user_id_offset: 0x10000,
            config_size: 10,
            config_offset: 0x1000e,
            eeprom_size: 0x200,
            eeprom_offset: 0x1e000,
            write_block_size: 64,
            erase_block_size: 64,
            ..DeviceInfo::default()
        }
    }

    fn controller() -> Pic16NewController<ScriptedDriver> {
        Pic16NewController::new(
            ScriptedDriver::default(),
            Pic16NewSequenceGenerator::new(Handshake::Lvp),
        )
    }

    #[test]
    fn device_id_is_the_second_word_revision_the_first() {
        let mut c = controller();
        c.driver.push_read_words(vec![0x2101, 0x306c]);
        let (id, revision) = c.read_device_id().unwrap();
        assert_eq!(id, 0x306c);
        assert_eq!(revision, 0x101);
    }

    #[test]
    fn read_halves_byte_addresses_into_pc_units() {
        let mut c = controller();
        c.driver.record_writes = true;
        c.driver.push_read_words(vec![0x3e55, 0x0180]);
        let data = c.read(Section::Flash, 0x100, 0x104, &device()).unwrap();
        assert_eq!(data, vec![0x55, 0x3e, 0x80, 0x01]);
        let generator = Pic16NewSequenceGenerator::new(Handshake::Lvp);
        let expected = generator.command_sequence(Pic16NewCommand::LoadPc, 0x80);
        assert!(c
            .driver
            .written()
            .windows(expected.len())
            .any(|w| w == expected.as_slice()));
    }

    #[test]
    fn non_flash_writes_are_word_sized() {
        let mut c = controller();
        let err = c
            .write(Section::Configuration, 0x1000e, &[1, 2, 3], &device())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn flash_write_loads_latches_then_programs() {
        let mut c = controller();
        c.driver.record_writes = true;
        c.write(Section::Flash, 0, &[0u8; 64], &device()).unwrap();
        let generator = Pic16NewSequenceGenerator::new(Handshake::Lvp);
        let begin = generator.command_only(Pic16NewCommand::BeginProgrammingInt);
        assert!(c
            .driver
            .written()
            .windows(begin.len())
            .any(|w| w == begin.as_slice()));
    }
}
