//! Device catalogue loader.
//!
//! The catalogue is an INI-like text file: `[DeviceName]` section headers
//! followed by `key = value` lines, with `#` starting an end-of-line comment.
//! Numeric values are decimal or hex with a trailing `h`; durations take a
//! `ms` or `us` suffix; sequences are whitespace-separated numerics.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::device::types::DeviceInfo;

/// Validates a device-specific opcode sequence for the owning family.
pub type SequenceValidator = fn(&[u16]) -> Result<()>;

/// The loaded catalogue for one device family.
///
/// The family supplies the unit factor (families that count 16-bit words
/// store halved addresses and sizes), the erased-state filler pattern, and a
/// validator for the device-specific opcode sequences.
pub struct DeviceDb {
    devices: BTreeMap<String, DeviceInfo>,
    id_index: HashMap<u16, String>,
    unit_factor: u32,
    block_filler: Vec<u8>,
    sequence_validator: SequenceValidator,
}

impl DeviceDb {
    pub fn new(unit_factor: u32, block_filler: Vec<u8>, validator: SequenceValidator) -> Self {
        DeviceDb {
            devices: BTreeMap::new(),
            id_index: HashMap::new(),
            unit_factor,
            block_filler,
            sequence_validator: validator,
        }
    }

    /// The erased-state byte pattern for this family.
    pub fn block_filler(&self) -> &[u8] {
        &self.block_filler
    }

    pub fn unit_factor(&self) -> u32 {
        self.unit_factor
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Load and parse a catalogue file, adding its entries to the database.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(format!("could not open device DB '{}': {e}", path.display()))
            } else {
                Error::Parse(format!("could not read device DB '{}': {e}", path.display()))
            }
        })?;
        self.load_str(&text)
    }

    /// Parse catalogue text. Each completed section is validated and
    /// unit-scaled before insertion.
    pub fn load_str(&mut self, text: &str) -> Result<()> {
        let mut current: Option<DeviceInfo> = None;
        for (idx, raw_line) in text.lines().enumerate() {
            let line_number = idx + 1;
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = parse_section_header(line) {
                if let Some(info) = current.take() {
                    self.insert(info)?;
                }
                current = Some(DeviceInfo {
                    name: name.to_string(),
                    ..DeviceInfo::default()
                });
            } else if let Some((key, value)) = parse_key_value(line) {
                let info = current.as_mut().ok_or_else(|| {
                    Error::Parse(format!(
                        "device database has a value outside any section on line {line_number}"
                    ))
                })?;
                apply_key(info, key, value)
                    .map_err(|e| e.with_context(&format!(" in device database at line {line_number}")))?;
            } else {
                return Err(Error::Parse(format!(
                    "device database read error on line {line_number}"
                )));
            }
        }
        if let Some(info) = current.take() {
            self.insert(info)?;
        }
        Ok(())
    }

    /// Look up a device by its ID.
    pub fn by_id(&self, device_id: u16) -> Result<&DeviceInfo> {
        self.id_index
            .get(&device_id)
            .and_then(|name| self.devices.get(name))
            .ok_or_else(|| {
                Error::DeviceNotFound(format!("device with ID {device_id:04X} not found"))
            })
    }

    /// Look up a device by its exact catalogue name.
    pub fn by_name(&self, name: &str) -> Result<&DeviceInfo> {
        self.devices
            .get(name)
            .ok_or_else(|| Error::DeviceNotFound(format!("device '{name}' not found")))
    }

    /// Iterate over all devices in name order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    fn insert(&mut self, mut info: DeviceInfo) -> Result<()> {
        if info.erase_block_size == 0 {
            info.erase_block_size = info.write_block_size;
        }
        info.validate()?;
        for sequence in [
            &info.block_write_sequence,
            &info.chip_erase_sequence,
            &info.flash_erase_sequence,
            &info.user_id_erase_sequence,
            &info.config_erase_sequence,
            &info.eeprom_erase_sequence,
        ] {
            (self.sequence_validator)(sequence)
                .map_err(|e| e.with_context(&format!(" ({})", info.name)))?;
        }

        if self.devices.contains_key(&info.name) {
            return Err(Error::Parse(format!("duplicate device name {}", info.name)));
        }
        if info.device_id != 0 {
            if let Some(existing) = self.id_index.get(&info.device_id) {
                return Err(Error::Parse(format!(
                    "Duplicate device ID {:04X} ({}, {})",
                    info.device_id, info.name, existing
                )));
            }
        }

        multiply_units(&mut info, self.unit_factor);
        if info.device_id != 0 {
            self.id_index.insert(info.device_id, info.name.clone());
        }
        self.devices.insert(info.name.clone(), info);
        Ok(())
    }
}

/// Scale all byte-unit fields by the family unit factor. Each missing
/// location expands to `unit_factor` consecutive byte addresses.
fn multiply_units(info: &mut DeviceInfo, unit_factor: u32) {
    info.program_memory_size *= unit_factor;
    info.user_id_size *= unit_factor;
    info.user_id_offset *= unit_factor;
    info.config_size *= unit_factor;
    info.config_offset *= unit_factor;
    info.eeprom_size *= unit_factor;
    info.eeprom_offset *= unit_factor;
    info.write_block_size *= unit_factor;
    info.erase_block_size *= unit_factor;
    info.calibration_word_address *= unit_factor;
    let mut missing = Vec::with_capacity(info.missing_locations.len() * unit_factor as usize);
    for &location in &info.missing_locations {
        for i in 0..unit_factor {
            missing.push(location * unit_factor + i);
        }
    }
    info.missing_locations = missing;
}

fn parse_section_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    if !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/')
    {
        Some(inner)
    } else {
        None
    }
}

fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some((key, value.trim()))
    } else {
        None
    }
}

fn apply_key(info: &mut DeviceInfo, key: &str, value: &str) -> Result<()> {
    match key {
        "device_id" => {
            info.device_id = u16::try_from(numeric_value(value)?)
                .map_err(|_| Error::Parse("value out of range".into()))?
        }
        "program_memory_size" => info.program_memory_size = numeric_value(value)?,
        "user_id_size" => info.user_id_size = numeric_value(value)?,
        "user_id_offset" => info.user_id_offset = numeric_value(value)?,
        "config_size" => info.config_size = numeric_value(value)?,
        "config_offset" => info.config_offset = numeric_value(value)?,
        "eeprom_size" => info.eeprom_size = numeric_value(value)?,
        "eeprom_offset" => info.eeprom_offset = numeric_value(value)?,
        "write_block_size" => info.write_block_size = numeric_value(value)?,
        "erase_block_size" => info.erase_block_size = numeric_value(value)?,
        "block_write_sequence" => info.block_write_sequence = sequence_value(value)?,
        "chip_erase_sequence" => info.chip_erase_sequence = sequence_value(value)?,
        "flash_erase_sequence" => info.flash_erase_sequence = sequence_value(value)?,
        "user_id_erase_sequence" => info.user_id_erase_sequence = sequence_value(value)?,
        "config_erase_sequence" => info.config_erase_sequence = sequence_value(value)?,
        "eeprom_erase_sequence" => info.eeprom_erase_sequence = sequence_value(value)?,
        "bulk_erase_timing" => info.bulk_erase_timing = duration_value(value)?,
        "block_write_timing" => info.block_write_timing = duration_value(value)?,
        "config_write_timing" => info.config_write_timing = duration_value(value)?,
        "calibration_word_address" => info.calibration_word_address = numeric_value(value)?,
        "missing_locations" => {
            info.missing_locations = value
                .split_ascii_whitespace()
                .map(numeric_value)
                .collect::<Result<_>>()?
        }
        _ => return Err(Error::Parse(format!("unknown key '{key}'"))),
    }
    Ok(())
}

/// Parse a decimal number, or hex with a trailing `h`.
fn numeric_value(value: &str) -> Result<u32> {
    if let Some(hex) = value.strip_suffix('h') {
        u32::from_str_radix(hex, 16).map_err(|_| Error::Parse("invalid hex value".into()))
    } else {
        value
            .parse::<u32>()
            .map_err(|_| Error::Parse("invalid value".into()))
    }
}

fn sequence_value(value: &str) -> Result<Vec<u16>> {
    value
        .split_ascii_whitespace()
        .map(|word| {
            let parsed = numeric_value(word)?;
            u16::try_from(parsed).map_err(|_| Error::Parse("value out of range".into()))
        })
        .collect()
}

/// Parse `Nms` or `Nus`.
fn duration_value(value: &str) -> Result<Duration> {
    if value.len() < 3 {
        return Err(Error::Parse("invalid time value".into()));
    }
    let (number, unit) = value.split_at(value.len() - 2);
    let amount = numeric_value(number)? as u64;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "us" => Ok(Duration::from_micros(amount)),
        _ => Err(Error::Parse("invalid time unit".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all(_: &[u16]) -> Result<()> {
        Ok(())
    }

    fn db() -> DeviceDb {
        DeviceDb::new(2, vec![0xff, 0x3f], accept_all)
    }

    const SIMPLE: &str = "\
# test catalogue
[PIC16F628A]
device_id = 1060h
program_memory_size = 800h
user_id_size = 4
user_id_offset = 2000h
config_size = 1   # one configuration word
config_offset = 2007h
eeprom_size = 80h
eeprom_offset = 2100h
write_block_size = 8
bulk_erase_timing = 6ms
block_write_timing = 4ms
";

    #[test]
    fn parses_and_scales_by_unit_factor() {
        let mut db = db();
        db.load_str(SIMPLE).unwrap();
        let info = db.by_id(0x1060).unwrap();
        assert_eq!(info.name, "PIC16F628A");
        assert_eq!(info.program_memory_size, 0x1000);
        assert_eq!(info.user_id_offset, 0x4000);
        assert_eq!(info.config_offset, 0x400e);
        assert_eq!(info.write_block_size, 16);
        assert_eq!(info.erase_block_size, 16);
        assert_eq!(info.bulk_erase_timing, Duration::from_millis(6));
        assert_eq!(db.by_name("PIC16F628A").unwrap().device_id, 0x1060);
    }

    #[test]
    fn duplicate_device_id_is_rejected() {
        let mut db = db();
        let text = "\
[PIC16F1933]
device_id = 5C60h
program_memory_size = 1000h
[PIC16F1934]
device_id = 5C60h
program_memory_size = 1000h
";
        let err = db.load_str(text).unwrap_err();
        assert!(
            matches!(&err, Error::Parse(m) if m.contains("Duplicate device ID 5C60")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn id_zero_devices_are_name_only() {
        let mut db = db();
        let text = "\
[PIC10F200]
program_memory_size = 100h
[PIC10F202]
program_memory_size = 200h
";
        db.load_str(text).unwrap();
        assert!(db.by_name("PIC10F202").is_ok());
        assert!(db.by_id(0).is_err());
    }

    #[test]
    fn value_errors_carry_the_line_number() {
        let mut db = db();
        let text = "[X]\nprogram_memory_size = zzz\n";
        let err = db.load_str(text).unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("at line 2")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut db = db();
        let err = db.load_str("[X]\nbogus_key = 1\n").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("unknown key")));
    }

    #[test]
    fn missing_locations_expand_with_the_unit_factor() {
        let mut db = db();
        let text = "\
[PIC16F88]
device_id = 0760h
program_memory_size = 1000h
config_size = 2
config_offset = 2007h
missing_locations = 2008h
";
        db.load_str(text).unwrap();
        let info = db.by_id(0x0760).unwrap();
        assert_eq!(info.missing_locations, vec![0x4010, 0x4011]);
    }

    #[test]
    fn duration_units_are_validated() {
        assert!(duration_value("10ms").is_ok());
        assert!(duration_value("200us").is_ok());
        assert!(duration_value("5s").is_err());
        assert!(duration_value("ms").is_err());
    }

    #[test]
    fn sequences_run_through_the_family_validator() {
        fn reject_all(_: &[u16]) -> Result<()> {
            Err(Error::Parse("bad opcode".into()))
        }
        let mut db = DeviceDb::new(2, vec![0xff, 0x3f], reject_all);
        let text = "\
[X]
program_memory_size = 100h
chip_erase_sequence = 9 255
";
        assert!(db.load_str(text).is_err());
    }
}
