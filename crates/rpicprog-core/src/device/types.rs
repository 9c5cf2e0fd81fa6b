//! Per-chip parameter record and the memory-section vocabulary.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interval::{Interval, IntervalSet};

/// One of the four programmable memory regions of a PIC device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Flash,
    UserId,
    Configuration,
    Eeprom,
}

impl Section {
    /// All sections in write order.
    pub const ALL: [Section; 4] = [
        Section::Flash,
        Section::UserId,
        Section::Configuration,
        Section::Eeprom,
    ];
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Flash => "flash",
            Section::UserId => "user ID",
            Section::Configuration => "configuration",
            Section::Eeprom => "EEPROM",
        };
        f.write_str(name)
    }
}

/// How the write path clears memory before programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    Chip,
    Section,
    Row,
    None,
}

/// Per-chip programming parameters, loaded from the device catalogue.
///
/// All addresses and sizes are in 8-bit units after the family's unit factor
/// has been applied by the database loader. A region size of 0 means the
/// region is absent. Entries are immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    /// 16-bit device ID; 0 for parts that have none (name-only lookup).
    pub device_id: u16,
    pub program_memory_size: u32,
    pub user_id_size: u32,
    pub user_id_offset: u32,
    pub config_size: u32,
    pub config_offset: u32,
    pub eeprom_size: u32,
    pub eeprom_offset: u32,
    /// Smallest programmable unit of flash.
    pub write_block_size: u32,
    /// Row-erase granularity; defaults to the write block size.
    pub erase_block_size: u32,
    /// Device-specific write-pulse opcode string (PIC16 families) or the
    /// NVMCON write command (PIC24).
    pub block_write_sequence: Vec<u16>,
    pub chip_erase_sequence: Vec<u16>,
    pub flash_erase_sequence: Vec<u16>,
    pub user_id_erase_sequence: Vec<u16>,
    pub config_erase_sequence: Vec<u16>,
    pub eeprom_erase_sequence: Vec<u16>,
    pub bulk_erase_timing: Duration,
    pub block_write_timing: Duration,
    pub config_write_timing: Duration,
    /// Factory oscillator trim word to preserve across chip erase; 0 if the
    /// part has none.
    pub calibration_word_address: u32,
    /// Addresses of unimplemented configuration bytes, stripped from images.
    pub missing_locations: Vec<u32>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            name: String::new(),
            device_id: 0,
            program_memory_size: 0,
            user_id_size: 0,
            user_id_offset: 0,
            config_size: 0,
            config_offset: 0,
            eeprom_size: 0,
            eeprom_offset: 0,
            write_block_size: 0,
            erase_block_size: 0,
            block_write_sequence: Vec::new(),
            chip_erase_sequence: Vec::new(),
            flash_erase_sequence: Vec::new(),
            user_id_erase_sequence: Vec::new(),
            config_erase_sequence: Vec::new(),
            eeprom_erase_sequence: Vec::new(),
            bulk_erase_timing: Duration::ZERO,
            block_write_timing: Duration::from_millis(1),
            config_write_timing: Duration::from_millis(5),
            calibration_word_address: 0,
            missing_locations: Vec::new(),
        }
    }
}

impl DeviceInfo {
    /// Base address of a section.
    pub fn section_offset(&self, section: Section) -> u32 {
        match section {
            Section::Flash => 0,
            Section::UserId => self.user_id_offset,
            Section::Configuration => self.config_offset,
            Section::Eeprom => self.eeprom_offset,
        }
    }

    /// Size of a section in 8-bit units; 0 when absent.
    pub fn section_size(&self, section: Section) -> u32 {
        match section {
            Section::Flash => self.program_memory_size,
            Section::UserId => self.user_id_size,
            Section::Configuration => self.config_size,
            Section::Eeprom => self.eeprom_size,
        }
    }

    /// Address interval covered by a section (empty when absent).
    pub fn section_interval(&self, section: Section) -> Interval {
        let offset = self.section_offset(section);
        Interval::new(offset, offset + self.section_size(section))
    }

    /// The section an address falls into, if any.
    pub fn section_of(&self, address: u32) -> Option<Section> {
        Section::ALL.into_iter().find(|&s| {
            let interval = self.section_interval(s);
            !interval.is_empty() && address >= interval.start() && address < interval.end()
        })
    }

    /// Erase word sequence for one section.
    pub fn erase_sequence(&self, section: Section) -> &[u16] {
        match section {
            Section::Flash => &self.flash_erase_sequence,
            Section::UserId => &self.user_id_erase_sequence,
            Section::Configuration => &self.config_erase_sequence,
            Section::Eeprom => &self.eeprom_erase_sequence,
        }
    }

    /// Check the geometry invariants: program memory present, erase block a
    /// multiple of the write block, and the four regions pairwise disjoint.
    pub fn validate(&self) -> Result<()> {
        if self.program_memory_size == 0 {
            return Err(Error::Parse(format!(
                "{}: program memory must be larger than 0",
                self.name
            )));
        }
        if self.write_block_size != 0
            && self.erase_block_size % self.write_block_size != 0
        {
            return Err(Error::Parse(format!(
                "{}: erase block size must be a multiple of the write block size",
                self.name
            )));
        }

        let mut used = IntervalSet::new();
        used.add(Interval::new(0, self.program_memory_size));
        for section in [Section::UserId, Section::Configuration, Section::Eeprom] {
            let interval = self.section_interval(section);
            if interval.is_empty() {
                continue;
            }
            if used.overlaps(&interval) {
                return Err(Error::Parse(format!(
                    "{}: {} overlaps with other segments",
                    self.name, section
                )));
            }
            used.add(interval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "TEST".into(),
            device_id: 0x1234,
            program_memory_size: 0x1000,
            user_id_size: 8,
            user_id_offset: 0x4000,
            config_size: 4,
            config_offset: 0x400e,
            eeprom_size: 0x100,
            eeprom_offset: 0x4200,
            write_block_size: 8,
            erase_block_size: 32,
            ..DeviceInfo::default()
        }
    }

    #[test]
    fn valid_geometry_passes() {
        assert!(device().validate().is_ok());
    }

    #[test]
    fn regions_are_pairwise_disjoint() {
        let mut info = device();
        info.eeprom_offset = 0x4008;
        let err = info.validate().unwrap_err();
        assert!(matches!(err, Error::Parse(m) if m.contains("EEPROM overlaps")));
    }

    #[test]
    fn region_overlapping_flash_is_rejected() {
        let mut info = device();
        info.user_id_offset = 0xffe;
        let err = info.validate().unwrap_err();
        assert!(matches!(err, Error::Parse(m) if m.contains("user ID overlaps")));
    }

    #[test]
    fn zero_program_memory_is_rejected() {
        let mut info = device();
        info.program_memory_size = 0;
        assert!(info.validate().is_err());
    }

    #[test]
    fn section_of_maps_addresses_to_regions() {
        let info = device();
        assert_eq!(info.section_of(0), Some(Section::Flash));
        assert_eq!(info.section_of(0x4004), Some(Section::UserId));
        assert_eq!(info.section_of(0x400f), Some(Section::Configuration));
        assert_eq!(info.section_of(0x42ff), Some(Section::Eeprom));
        assert_eq!(info.section_of(0x2000), None);
    }
}
