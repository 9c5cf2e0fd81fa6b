//! PIC24 controller.
//!
//! Everything is expressed as 24-bit instructions pushed through SIX, with
//! REGOUT pulling results back out of the VISI register. A GOTO 0x0200 is
//! folded into every address load so the PC can never run into the reset
//! vector. Program memory is imaged as four bytes per instruction word
//! (the fourth being the phantom byte).

use crate::controller::Controller;
use crate::device::{DeviceInfo, Section};
use crate::driver::{sleep_at_least, Driver};
use crate::error::{Error, Result};
use crate::sequence::Pic24SequenceGenerator;
use crate::sequence::{COMMAND_BITS, REGOUT_DATA_OFFSET};
use std::time::Duration;

const NOP: u32 = 0x000000;
/// GOTO 0x0200.
const GOTO_0200: u32 = 0x040200;
/// MOV W0, TBLPAG.
const MOV_W0_TBLPAG: u32 = 0x880190;
/// MOV W0, NVMCON.
const MOV_W0_NVMCON: u32 = 0x883b00;
/// MOV NVMCON, W0.
const MOV_NVMCON_W0: u32 = 0x803b00;
/// MOV W0, VISI.
const MOV_W0_VISI: u32 = 0x883c20;
/// MOV #VISI, W7.
const MOV_VISI_W7: u32 = 0x207847;
/// BSET NVMCON, #WR.
const BSET_NVMCON_WR: u32 = 0xa8e761;
/// TBLRDL [W6], [W7].
const TBLRDL_W6_W7: u32 = 0xba0b96;
/// TBLRDL [W6++], [W7].
const TBLRDL_W6_INC_W7: u32 = 0xba0bb6;
/// TBLRDH [W6++], [W7].
const TBLRDH_W6_INC_W7: u32 = 0xba8bb6;
/// TBLWTL W0, [W6].
const TBLWTL_W0_W6: u32 = 0xbb0b00;
/// TBLWTH W0, [W6++].
const TBLWTH_W0_W6_INC: u32 = 0xbb9b00;

/// TBLPAG:W6 target for the bulk-erase dummy table write.
const ERASE_ADDRESS: u32 = 0x800000;

const WR_POLL_LIMIT: u32 = 1000;

pub struct Pic24Controller<D> {
    driver: D,
    generator: Pic24SequenceGenerator,
}

impl<D: Driver> Pic24Controller<D> {
    pub fn new(driver: D, generator: Pic24SequenceGenerator) -> Self {
        Pic24Controller { driver, generator }
    }

    fn write_command(&mut self, payload: u32) -> Result<()> {
        self.driver
            .write_datastring(&self.generator.write_command_sequence(payload))
    }

    fn read_visi(&mut self) -> Result<u16> {
        let sequence = self.generator.read_command_sequence();
        let words = self
            .driver
            .read_with_sequence(&sequence, &[REGOUT_DATA_OFFSET], 16, 1, true)?;
        Ok(words[0])
    }

    /// MOV #lit16, Wnd.
    fn mov_literal(value: u16, register: u8) -> u32 {
        0x200000 | (value as u32) << 4 | register as u32
    }

    /// Force a known PC.
    fn reset_pc(&mut self) -> Result<()> {
        self.write_command(GOTO_0200)?;
        self.write_command(NOP)
    }

    /// Pack a 24-bit table address into TBLPAG:W6.
    fn load_address(&mut self, address: u32) -> Result<()> {
        self.reset_pc()?;
        self.write_command(Self::mov_literal((address >> 16) as u16 & 0xff, 0))?;
        self.write_command(MOV_W0_TBLPAG)?;
        self.write_command(Self::mov_literal(address as u16, 6))?;
        self.write_command(NOP)
    }

    /// Point W7 at VISI so table reads land somewhere REGOUT can see.
    fn load_visi_address(&mut self) -> Result<()> {
        self.write_command(MOV_VISI_W7)?;
        self.write_command(NOP)
    }

    fn load_nvmcon(&mut self, value: u16) -> Result<()> {
        self.write_command(Self::mov_literal(value, 0))?;
        self.write_command(MOV_W0_NVMCON)?;
        self.write_command(NOP)
    }

    /// Start the NVM operation and poll NVMCON.WR through VISI until the
    /// device clears it.
    fn start_nvm_and_wait(&mut self) -> Result<()> {
        self.write_command(NOP)?;
        self.write_command(BSET_NVMCON_WR)?;
        self.write_command(NOP)?;
        self.write_command(NOP)?;
        self.load_visi_address()?;
        for _ in 0..WR_POLL_LIMIT {
            self.write_command(MOV_NVMCON_W0)?;
            self.write_command(MOV_W0_VISI)?;
            self.write_command(NOP)?;
            let nvmcon = self.read_visi()?;
            if nvmcon & 0x8000 == 0 {
                return Ok(());
            }
            sleep_at_least(Duration::from_micros(500));
        }
        Err(Error::Verification("NVMCON.WR did not clear".into()))
    }

    fn nvm_command(sequence: &[u16], what: &str) -> Result<u16> {
        sequence.first().copied().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "device database does not define the {what} NVMCON command"
            ))
        })
    }
}

impl<D: Driver> Controller for Pic24Controller<D> {
    fn open(&mut self) -> Result<()> {
        self.driver.open()?;
        self.driver
            .write_timed_sequence(&self.generator.init_sequence())
    }

    fn close(&mut self) {
        self.driver.close();
    }

    fn read_device_id(&mut self) -> Result<(u16, u16)> {
        self.load_address(0xff0000)?;
        self.load_visi_address()?;
        let mut words = [0u16; 2];
        for word in &mut words {
            self.write_command(TBLRDL_W6_INC_W7)?;
            self.write_command(NOP)?;
            self.write_command(NOP)?;
            *word = self.read_visi()?;
        }
        Ok((words[0], words[1]))
    }

    fn read(
        &mut self,
        _section: Section,
        start_address: u32,
        end_address: u32,
        _device_info: &DeviceInfo,
    ) -> Result<Vec<u8>> {
        if start_address % 4 != 0 || (end_address - start_address) % 4 != 0 {
            return Err(Error::InvalidArgument(
                "PIC24 reads must cover whole instruction words".into(),
            ));
        }
        let count = (end_address - start_address) / 4;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.load_address(start_address / 2)?;
        self.load_visi_address()?;

        // One stitched pattern per instruction word: read the low word and
        // the high byte, each funnelled through VISI. The transport samples
        // both REGOUT slots per repetition.
        let mut pattern = Vec::new();
        for half in [TBLRDL_W6_W7, TBLRDH_W6_INC_W7] {
            for instruction in [half, NOP, NOP] {
                pattern.extend_from_slice(&self.generator.write_command_sequence(instruction));
            }
            pattern.extend_from_slice(&self.generator.read_command_sequence());
        }
        let offsets = [
            3 * COMMAND_BITS + REGOUT_DATA_OFFSET,
            7 * COMMAND_BITS + REGOUT_DATA_OFFSET,
        ];
        let words = self
            .driver
            .read_with_sequence(&pattern, &offsets, 16, count, true)?;

        let mut result = Vec::with_capacity(count as usize * 4);
        for pair in words.chunks(2) {
            let (low, high) = (pair[0], pair[1]);
            result.push(low as u8);
            result.push((low >> 8) as u8);
            result.push(high as u8);
            // Phantom byte.
            result.push((high >> 8) as u8);
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
            4
        };
        if block_size % 4 != 0 || block_size == 0 {
            return Err(Error::InvalidArgument(
                "write block size must cover whole instruction words".into(),
            ));
        }
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
        let nvmcon = Self::nvm_command(&device_info.block_write_sequence, "write")?;

        for (i, block) in data.chunks(block_size).enumerate() {
            self.load_nvmcon(nvmcon)?;
            self.load_address((address as usize + i * block_size) as u32 / 2)?;
            for word in block.chunks(4) {
                let low = (word[1] as u16) << 8 | word[0] as u16;
                let high = word[2] as u16;
                self.write_command(Self::mov_literal(low, 0))?;
                self.write_command(TBLWTL_W0_W6)?;
                self.write_command(NOP)?;
                self.write_command(NOP)?;
                self.write_command(Self::mov_literal(high, 0))?;
                self.write_command(TBLWTH_W0_W6_INC)?;
                self.write_command(NOP)?;
                self.write_command(NOP)?;
            }
            self.start_nvm_and_wait()?;
        }
        Ok(())
    }

    fn chip_erase(&mut self, device_info: &DeviceInfo) -> Result<()> {
        let nvmcon = Self::nvm_command(&device_info.chip_erase_sequence, "chip erase")?;
        self.load_nvmcon(nvmcon)?;
        self.load_address(ERASE_ADDRESS)?;
        // A dummy table write selects the erase target.
        self.write_command(TBLWTL_W0_W6)?;
        self.write_command(NOP)?;
        self.write_command(NOP)?;
        self.start_nvm_and_wait()
    }

    fn section_erase(&mut self, section: Section, _device_info: &DeviceInfo) -> Result<()> {
        Err(Error::Unimplemented(format!(
            "section erase is not supported for the {section} section"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_util::ScriptedDriver;
    use crate::sequence::Handshake;

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "PIC24FJ64GA002".into(),
            device_id: 0x0447,
            program_memory_size: 0x157f8,
            config_size: 8,
            config_offset: 0x157f8,
            write_block_size: 256,
            erase_block_size: 2048,
            block_write_sequence: vec![0x4001],
            chip_erase_sequence: vec![0x404f],
            ..DeviceInfo::default()
        }
    }

    fn controller() -> Pic24Controller<ScriptedDriver> {
        Pic24Controller::new(
            ScriptedDriver::default(),
            Pic24SequenceGenerator::new(Handshake::Lvp),
        )
    }

    #[test]
    fn mov_literal_encodes_value_and_register() {
        assert_eq!(Pic24Controller::<ScriptedDriver>::mov_literal(0x0784, 7), 0x207847);
        assert_eq!(Pic24Controller::<ScriptedDriver>::mov_literal(0xffff, 6), 0x2ffff6);
    }

    #[test]
    fn device_id_reads_two_words_through_visi() {
        let mut c = controller();
        c.driver.push_read_words(vec![0x0447]);
        c.driver.push_read_words(vec![0x3003]);
        let (id, revision) = c.read_device_id().unwrap();
        assert_eq!(id, 0x0447);
        assert_eq!(revision, 0x3003);
    }

    #[test]
    fn read_expands_words_to_four_image_bytes() {
        let mut c = controller();
        // One repetition yields the low word and the high byte.
        c.driver.push_read_words(vec![0x1234, 0x0056]);
        let data = c.read(Section::Flash, 0, 4, &device()).unwrap();
        assert_eq!(data, vec![0x34, 0x12, 0x56, 0x00]);
    }

    #[test]
    fn reads_must_cover_whole_instruction_words() {
        let mut c = controller();
        assert!(matches!(
            c.read(Section::Flash, 0, 6, &device()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn write_requires_the_nvmcon_command_from_the_catalogue() {
        let mut c = controller();
        let mut info = device();
        info.block_write_sequence.clear();
        let err = c
            .write(Section::Flash, 0, &[0u8; 256], &info)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(m) if m.contains("NVMCON")));
    }

    #[test]
    fn write_polls_wr_until_clear() {
        let mut c = controller();
        // Two polls with WR set, then clear.
        c.driver.push_read_words(vec![0xc001]);
        c.driver.push_read_words(vec![0xc001]);
        c.driver.push_read_words(vec![0x4001]);
        let mut info = device();
        info.write_block_size = 4;
        c.write(Section::Flash, 0, &[0xaa, 0xbb, 0xcc, 0x00], &info)
            .unwrap();
    }

    #[test]
    fn chip_erase_uses_the_erase_command() {
        let mut c = controller();
        c.driver.record_writes = true;
        c.driver.push_read_words(vec![0x0000]);
        c.chip_erase(&device()).unwrap();
        let generator = Pic24SequenceGenerator::new(Handshake::Lvp);
        let expected = generator.write_command_sequence(
            Pic24Controller::<ScriptedDriver>::mov_literal(0x404f, 0),
        );
        assert!(c
            .driver
            .written()
            .windows(expected.len())
            .any(|w| w == expected.as_slice()));
    }
}
