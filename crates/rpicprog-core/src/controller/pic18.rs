//! PIC18 controller.
//!
//! Flash and user ID are written through the table-write latches a block at
//! a time; configuration bytes one at a time with the byte duplicated into
//! both halves of the payload (the device latches the half matching the
//! address parity); EEPROM through EECON1 with completion polling. Erases
//! go through writes to the 3C0004h/3C0005h erase-option registers.

use crate::controller::Controller;
use crate::device::{DeviceInfo, Section};
use crate::driver::{sleep_at_least, Driver};
use crate::error::{Error, Result};
use crate::sequence::{Pic18Command, Pic18SequenceGenerator, Pic18TimedSequenceKind};
use std::time::Duration;

// Core instructions executed through CORE_INST.
const BSF_EECON1_EEPGD: u16 = 0x8ea6;
const BCF_EECON1_EEPGD: u16 = 0x9ea6;
const BSF_EECON1_CFGS: u16 = 0x8ca6;
const BCF_EECON1_CFGS: u16 = 0x9ca6;
const BSF_EECON1_WREN: u16 = 0x84a6;
const BCF_EECON1_WREN: u16 = 0x94a6;
const BSF_EECON1_RD: u16 = 0x80a6;
const BSF_EECON1_WR: u16 = 0x82a6;
const MOVF_EEDATA_W: u16 = 0x50a8;
const MOVF_EECON1_W: u16 = 0x50a6;
const MOVWF_TABLAT: u16 = 0x6ef5;
const MOVWF_TBLPTRU: u16 = 0x6ef8;
const MOVWF_TBLPTRH: u16 = 0x6ef7;
const MOVWF_TBLPTRL: u16 = 0x6ef6;
const MOVWF_EEADR: u16 = 0x6ea9;
const MOVWF_EEADRH: u16 = 0x6eaa;
const MOVWF_EEDATA: u16 = 0x6ea8;
const MOVLW: u16 = 0x0e00;
const NOP: u16 = 0x0000;

/// Address of the erase-option registers.
const ERASE_OPTION_HIGH: u32 = 0x3c0005;
const ERASE_OPTION_LOW: u32 = 0x3c0004;

const EEPROM_POLL_LIMIT: u32 = 1000;

pub struct Pic18Controller<D> {
    driver: D,
    generator: Pic18SequenceGenerator,
}

impl<D: Driver> Pic18Controller<D> {
    pub fn new(driver: D, generator: Pic18SequenceGenerator) -> Self {
        Pic18Controller { driver, generator }
    }

    fn write_command(&mut self, command: Pic18Command, payload: u16) -> Result<()> {
        self.driver
            .write_datastring(&self.generator.command_sequence(command, payload))
    }

    fn read_with_command(&mut self, command: Pic18Command, count: u32) -> Result<Vec<u8>> {
        let sequence = self.generator.command_sequence(command, 0);
        // The response byte occupies the upper half of the payload clocks.
        let words = self
            .driver
            .read_with_sequence(&sequence, &[12], 8, count, true)?;
        Ok(words.into_iter().map(|w| w as u8).collect())
    }

    fn write_timed_sequence(
        &mut self,
        kind: Pic18TimedSequenceKind,
        device_info: Option<&DeviceInfo>,
    ) -> Result<()> {
        self.driver
            .write_timed_sequence(&self.generator.timed_sequence(kind, device_info))
    }

    /// Load TBLPTRU/H/L with the three address bytes.
    fn load_address(&mut self, address: u32) -> Result<()> {
        self.write_command(Pic18Command::CoreInst, MOVLW | (address >> 16) as u16 & 0xff)?;
        self.write_command(Pic18Command::CoreInst, MOVWF_TBLPTRU)?;
        self.write_command(Pic18Command::CoreInst, MOVLW | (address >> 8) as u16 & 0xff)?;
        self.write_command(Pic18Command::CoreInst, MOVWF_TBLPTRH)?;
        self.write_command(Pic18Command::CoreInst, MOVLW | address as u16 & 0xff)?;
        self.write_command(Pic18Command::CoreInst, MOVWF_TBLPTRL)
    }

    fn load_eeprom_address(&mut self, address: u32) -> Result<()> {
        self.write_command(Pic18Command::CoreInst, MOVLW | address as u16 & 0xff)?;
        self.write_command(Pic18Command::CoreInst, MOVWF_EEADR)?;
        self.write_command(Pic18Command::CoreInst, MOVLW | (address >> 8) as u16 & 0xff)?;
        self.write_command(Pic18Command::CoreInst, MOVWF_EEADRH)
    }

    fn write_block(
        &mut self,
        address: u32,
        block: &[u8],
        device_info: &DeviceInfo,
    ) -> Result<()> {
        let block_size = block.len();
        self.write_command(Pic18Command::CoreInst, BSF_EECON1_EEPGD)?;
        self.write_command(Pic18Command::CoreInst, BCF_EECON1_CFGS)?;
        self.write_command(Pic18Command::CoreInst, BSF_EECON1_WREN)?;
        self.load_address(address)?;
        for pair in block[..block_size - 2].chunks(2) {
            self.write_command(
                Pic18Command::TableWritePostInc2,
                (pair[1] as u16) << 8 | pair[0] as u16,
            )?;
        }
        self.write_command(
            Pic18Command::TableWritePostInc2StartPgm,
            (block[block_size - 1] as u16) << 8 | block[block_size - 2] as u16,
        )?;
        self.write_timed_sequence(Pic18TimedSequenceKind::Write, Some(device_info))
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut address = address;
        for &byte in data {
            self.write_command(Pic18Command::CoreInst, BCF_EECON1_EEPGD)?;
            self.write_command(Pic18Command::CoreInst, BCF_EECON1_CFGS)?;
            self.load_eeprom_address(address)?;
            self.write_command(Pic18Command::CoreInst, MOVLW | byte as u16)?;
            self.write_command(Pic18Command::CoreInst, MOVWF_EEDATA)?;
            self.write_command(Pic18Command::CoreInst, BSF_EECON1_WREN)?;
            self.write_command(Pic18Command::CoreInst, BSF_EECON1_WR)?;
            self.write_command(Pic18Command::CoreInst, NOP)?;
            self.write_command(Pic18Command::CoreInst, NOP)?;

            let mut polls = 0;
            loop {
                self.write_command(Pic18Command::CoreInst, MOVF_EECON1_W)?;
                self.write_command(Pic18Command::CoreInst, MOVWF_TABLAT)?;
                self.write_command(Pic18Command::CoreInst, NOP)?;
                let value = self.read_with_command(Pic18Command::ShiftOutTablat, 1)?;
                if value[0] & 0x02 == 0 {
                    break;
                }
                polls += 1;
                if polls >= EEPROM_POLL_LIMIT {
                    return Err(Error::Verification(
                        "EECON1.WR did not clear after EEPROM write".into(),
                    ));
                }
            }
            // 200 us is the datasheet minimum hold; leave some margin.
            sleep_at_least(Duration::from_micros(500));
            address += 1;
        }
        self.write_command(Pic18Command::CoreInst, BCF_EECON1_WREN)
    }

    fn execute_bulk_erase(&mut self, sequence: &[u16], device_info: &DeviceInfo) -> Result<()> {
        for &value in sequence {
            self.load_address(ERASE_OPTION_HIGH)?;
            let upper = value & 0xff00 | value >> 8;
            self.write_command(Pic18Command::TableWrite, upper)?;
            self.load_address(ERASE_OPTION_LOW)?;
            let lower = value & 0x00ff | value << 8;
            self.write_command(Pic18Command::TableWrite, lower)?;
            self.write_command(Pic18Command::CoreInst, NOP)?;
            // Hold PGD low until the erase completes.
            self.write_timed_sequence(Pic18TimedSequenceKind::BulkErase, Some(device_info))?;
        }
        Ok(())
    }
}

impl<D: Driver> Controller for Pic18Controller<D> {
    fn open(&mut self) -> Result<()> {
        self.driver.open()?;
        self.write_timed_sequence(Pic18TimedSequenceKind::Init, None)
    }

    fn close(&mut self) {
        self.driver.close();
    }

    fn read_device_id(&mut self) -> Result<(u16, u16)> {
        self.load_address(0x3ffffe)?;
        let bytes = self.read_with_command(Pic18Command::TableReadPostInc, 2)?;
        let word = bytes[0] as u16 | (bytes[1] as u16) << 8;
        Ok((word & 0xffe0, word & 0x1f))
    }

    fn read(
        &mut self,
        section: Section,
        start_address: u32,
        end_address: u32,
        _device_info: &DeviceInfo,
    ) -> Result<Vec<u8>> {
        if section != Section::Eeprom {
            self.load_address(start_address)?;
            return self.read_with_command(
                Pic18Command::TableReadPostInc,
                end_address - start_address,
            );
        }

        let mut result = Vec::with_capacity((end_address - start_address) as usize);
        self.write_command(Pic18Command::CoreInst, BCF_EECON1_EEPGD)?;
        self.write_command(Pic18Command::CoreInst, BCF_EECON1_CFGS)?;
        for address in start_address..end_address {
            self.load_eeprom_address(address)?;
            self.write_command(Pic18Command::CoreInst, BSF_EECON1_RD)?;
            self.write_command(Pic18Command::CoreInst, MOVF_EEDATA_W)?;
            self.write_command(Pic18Command::CoreInst, MOVWF_TABLAT)?;
            self.write_command(Pic18Command::CoreInst, NOP)?;
            let byte = self.read_with_command(Pic18Command::ShiftOutTablat, 1)?;
            result.push(byte[0]);
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
        match section {
            Section::Flash | Section::UserId => {
                let block_size = if section == Section::Flash {
                    device_info.write_block_size
                } else {
                    device_info.user_id_size
                };
                if block_size % 2 != 0 || block_size < 2 {
                    return Err(Error::InvalidArgument(
                        "block size for writing must be a multiple of 2".into(),
                    ));
                }
                if section == Section::Flash && address % block_size != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "address {address:06X} is not a multiple of the write block size ({block_size})"
                    )));
                }
                if data.len() % block_size as usize != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "data must be a multiple of the block size ({} / {block_size})",
                        data.len()
                    )));
                }
                for (i, block) in data.chunks(block_size as usize).enumerate() {
                    self.write_block(address + i as u32 * block_size, block, device_info)?;
                }
                Ok(())
            }
            Section::Configuration => {
                let mut address = address;
                for &byte in data {
                    self.write_command(Pic18Command::CoreInst, BSF_EECON1_EEPGD)?;
                    self.write_command(Pic18Command::CoreInst, BSF_EECON1_CFGS)?;
                    self.write_command(Pic18Command::CoreInst, BSF_EECON1_WREN)?;
                    self.load_address(address)?;
                    // Only the half matching the address parity is latched.
                    self.write_command(
                        Pic18Command::TableWritePostInc2StartPgm,
                        (byte as u16) << 8 | byte as u16,
                    )?;
                    self.write_timed_sequence(
                        Pic18TimedSequenceKind::WriteConfig,
                        Some(device_info),
                    )?;
                    address += 1;
                }
                Ok(())
            }
            Section::Eeprom => self.write_eeprom(address, data),
        }
    }

    fn chip_erase(&mut self, device_info: &DeviceInfo) -> Result<()> {
        self.execute_bulk_erase(&device_info.chip_erase_sequence, device_info)
    }

    fn section_erase(&mut self, section: Section, device_info: &DeviceInfo) -> Result<()> {
        let sequence = device_info.erase_sequence(section);
        if sequence.is_empty() {
            return Err(Error::Unimplemented(format!(
                "no erase sequence for the {section} section"
            )));
        }
        self.execute_bulk_erase(sequence, device_info)
    }
}
