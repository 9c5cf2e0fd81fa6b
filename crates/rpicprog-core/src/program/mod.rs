//! Sparse program image and the operations that reconcile it against a
//! device's memory geometry.

mod ihex;

pub use ihex::{read_ihex, write_ihex, DEFAULT_BYTES_PER_LINE};

use std::collections::BTreeMap;

use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::interval::Interval;

/// A sparse image: contiguous byte blocks keyed by their start address, in
/// ascending order. Blocks must not overlap and must not be empty.
pub type Program = BTreeMap<u32, Vec<u8>>;

/// Merge adjacent blocks unless the junction coincides with a region
/// boundary, then check that every block is fully contained in one device
/// region.
///
/// Overlapping blocks and blocks outside the device memory map are
/// [`Error::InvalidProgram`].
pub fn merge_program_blocks(program: &mut Program, device_info: &DeviceInfo) -> Result<()> {
    let boundaries = [
        device_info.user_id_offset,
        device_info.config_offset,
        device_info.eeprom_offset,
    ];

    let blocks = std::mem::take(program);
    let mut merged: Vec<(u32, Vec<u8>)> = Vec::with_capacity(blocks.len());
    for (start, data) in blocks {
        if let Some((last_start, last_data)) = merged.last_mut() {
            let last_end = *last_start + last_data.len() as u32;
            if last_end > start {
                return Err(Error::InvalidProgram(
                    "overlapping sections in program".into(),
                ));
            }
            if last_end == start && !boundaries.contains(&start) {
                last_data.extend_from_slice(&data);
                continue;
            }
        }
        merged.push((start, data));
    }

    for (start, data) in &merged {
        let block = Interval::new(*start, *start + data.len() as u32);
        let contained = crate::device::Section::ALL
            .into_iter()
            .map(|s| device_info.section_interval(s))
            .any(|region| region.contains(&block));
        if !contained {
            return Err(Error::InvalidProgram(format!(
                "data outside device memory or crossing section boundaries: {:06X}-{:06X}",
                block.start(),
                block.end()
            )));
        }
    }

    *program = merged.into_iter().collect();
    Ok(())
}

/// Split blocks so that every address listed as missing in the device info
/// is absent from the image. Each removal leaves at most two blocks around
/// the stripped byte.
pub fn remove_missing_config_bytes(program: &mut Program, device_info: &DeviceInfo) {
    for &missing in &device_info.missing_locations {
        let covering = program
            .range(..=missing)
            .next_back()
            .filter(|(start, data)| missing < *start + data.len() as u32)
            .map(|(start, _)| *start);
        let Some(start) = covering else { continue };

        let data = program.remove(&start).expect("block disappeared");
        let split = (missing - start) as usize;
        let (head, rest) = data.split_at(split);
        let tail = &rest[1..];
        if !head.is_empty() {
            program.insert(start, head.to_vec());
        }
        if !tail.is_empty() {
            program.insert(missing + 1, tail.to_vec());
        }
    }
}
