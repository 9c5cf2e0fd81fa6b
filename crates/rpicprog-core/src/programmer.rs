//! High-level programming operations.
//!
//! The [`Programmer`] owns a family controller and the device catalogue and
//! implements the user-visible operations: identify, read, write (with its
//! alignment, erase-planning and verify phases) and erase. Every entry
//! point closes the device on all exit paths.

use std::collections::BTreeSet;

use crate::controller::Controller;
use crate::device::{DeviceDb, DeviceInfo, EraseMode, Section};
use crate::error::{Error, Result};
use crate::program::{merge_program_blocks, remove_missing_config_bytes, Program};
use crate::progress::Progress;

/// Attempts at opening the device and reading a usable ID.
const OPEN_RETRIES: u32 = 10;
/// Attempts at re-reading the device ID while recovering from sync loss.
const RECOVERY_ID_RETRIES: u32 = 10;
/// Bytes per controller read call.
const READ_CHUNK: u32 = 128;

/// Result of an identify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub device_id: u16,
    pub revision: u16,
}

pub struct Programmer {
    controller: Box<dyn Controller>,
    device_db: DeviceDb,
    device_name: Option<String>,
    device_info: Option<DeviceInfo>,
    revision: u16,
    device_open: bool,
}

impl Programmer {
    pub fn new(controller: Box<dyn Controller>, device_db: DeviceDb) -> Self {
        Programmer {
            controller,
            device_db,
            device_name: None,
            device_info: None,
            revision: 0,
            device_open: false,
        }
    }

    /// Force a device by catalogue name instead of probing by ID.
    pub fn set_device(&mut self, name: &str) {
        self.device_name = Some(name.to_string());
    }

    /// Read the requested sections into a sparse image.
    pub fn read_program(
        &mut self,
        sections: &[Section],
        progress: &mut dyn Progress,
    ) -> Result<Program> {
        let result = self.read_program_inner(sections, progress);
        self.close_device();
        result
    }

    /// Write an image, erasing per `erase_mode` and verifying every block.
    pub fn write_program(
        &mut self,
        sections: &[Section],
        program: &Program,
        erase_mode: EraseMode,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let result = self.write_program_inner(sections, program, erase_mode, progress);
        self.close_device();
        result
    }

    /// Erase the whole chip.
    pub fn chip_erase(&mut self) -> Result<()> {
        let result = self.chip_erase_inner();
        self.close_device();
        result
    }

    /// Erase individual sections.
    pub fn section_erase(&mut self, sections: &[Section]) -> Result<()> {
        let result = self.section_erase_inner(sections);
        self.close_device();
        result
    }

    /// Open the device and report what was found.
    pub fn identify(&mut self) -> Result<DeviceSummary> {
        let result = self.identify_inner();
        self.close_device();
        result
    }

    fn identify_inner(&mut self) -> Result<DeviceSummary> {
        self.init_device()?;
        let info = self.info();
        Ok(DeviceSummary {
            name: info.name.clone(),
            device_id: info.device_id,
            revision: self.revision,
        })
    }

    fn read_program_inner(
        &mut self,
        sections: &[Section],
        progress: &mut dyn Progress,
    ) -> Result<Program> {
        self.init_device()?;
        log::info!("initialized device [{}]", self.info().name);

        let requested: BTreeSet<Section> = sections.iter().copied().collect();
        let mut program = Program::new();
        for section in Section::ALL {
            if !requested.contains(&section) {
                continue;
            }
            let info = self.info().clone();
            let size = info.section_size(section);
            if size == 0 {
                continue;
            }
            log::info!("reading {section} data");
            let offset = info.section_offset(section);
            let data = self.read_data(
                &format!("reading {section}"),
                section,
                offset,
                size,
                progress,
            )?;
            program.insert(offset, data);
            if section == Section::Configuration {
                remove_missing_config_bytes(&mut program, &info);
            }
        }
        Ok(program)
    }

    fn write_program_inner(
        &mut self,
        sections: &[Section],
        program: &Program,
        erase_mode: EraseMode,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let write_sections: BTreeSet<Section> = sections.iter().copied().collect();
        self.init_device()?;
        let info = self.info().clone();
        log::info!("initialized device [{}]", info.name);

        // Phase 1: align the image to whole blocks. Under row erase the
        // retained device contents are spliced in; otherwise the erased
        // filler pattern completes partial blocks.
        let filler = self.device_db.block_filler().to_vec();
        let mut aligned = program.clone();
        let block_size = if erase_mode == EraseMode::Row {
            info.erase_block_size
        } else {
            info.write_block_size
        };
        if block_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "{} has no write block size configured",
                info.name
            )));
        }

        for (first, second) in missing_flash_ranges(program, &info)? {
            let lower = (first + block_size - 1) / block_size * block_size;
            let higher = second / block_size * block_size;
            let mut complete = |this: &mut Self, at: u32, len: u32| -> Result<()> {
                if len == 0 {
                    return Ok(());
                }
                if erase_mode == EraseMode::Row {
                    let data =
                        this.read_data("reading back", Section::Flash, at, len, progress)?;
                    aligned.insert(at, data);
                } else {
                    let block = aligned.entry(at).or_default();
                    block.extend((0..len as usize).map(|i| filler[i % filler.len()]));
                }
                Ok(())
            };
            if lower < higher {
                complete(self, first, lower - first)?;
                complete(self, higher, second - higher)?;
            } else {
                complete(self, first, second - first)?;
            }
        }

        // Phase 2: merge and strip unimplemented configuration bytes.
        merge_program_blocks(&mut aligned, &info)?;
        remove_missing_config_bytes(&mut aligned, &info);
        for (&start, data) in &aligned {
            log::debug!("aligned block {:06X}-{:06X}", start, start + data.len() as u32);
        }

        // Phase 3: erase what is both present in the image and requested.
        let mut erase_sections: BTreeSet<Section> = aligned
            .keys()
            .filter_map(|&address| info.section_of(address))
            .collect();
        erase_sections.retain(|s| write_sections.contains(s));
        match erase_mode {
            EraseMode::Chip => {
                log::info!("starting chip erase");
                self.controller.chip_erase(&info)?;
            }
            EraseMode::Section | EraseMode::Row => {
                let mut plan = erase_sections.clone();
                if erase_mode == EraseMode::Row {
                    // Rows exist for flash only; everything else (EEPROM
                    // included, which cannot be row-erased) falls back to
                    // section erase.
                    plan.remove(&Section::Flash);
                    if erase_sections.contains(&Section::Flash) {
                        for (&start, data) in &aligned {
                            if info.section_of(start) != Some(Section::Flash) {
                                continue;
                            }
                            let end = start + data.len() as u32;
                            for row in (start..end).step_by(info.erase_block_size as usize) {
                                self.controller.row_erase(row, &info)?;
                            }
                        }
                    }
                }
                for section in Section::ALL {
                    if plan.contains(&section) {
                        log::info!("starting {section} erase");
                        self.controller.section_erase(section, &info)?;
                    }
                }
            }
            EraseMode::None => {}
        }

        // Phase 4: write and read back every block.
        for (&start, data) in &aligned {
            let Some(section) = info.section_of(start) else {
                continue;
            };
            if !write_sections.contains(&section) {
                continue;
            }
            log::info!(
                "writing {section} data {:06X}-{:06X}",
                start,
                start + data.len() as u32
            );
            progress.begin(&format!("writing {section}"), data.len() as u64);
            self.controller.write(section, start, data, &info)?;
            progress.finish();
            log::info!("verifying written {section} data");
            self.verify_data(section, data, start, progress)?;
        }
        Ok(())
    }

    fn chip_erase_inner(&mut self) -> Result<()> {
        self.init_device()?;
        let info = self.info().clone();
        log::info!("initialized device [{}]", info.name);
        self.controller.chip_erase(&info)
    }

    fn section_erase_inner(&mut self, sections: &[Section]) -> Result<()> {
        self.init_device()?;
        let info = self.info().clone();
        for &section in sections {
            self.controller.section_erase(section, &info)?;
        }
        Ok(())
    }

    fn info(&self) -> &DeviceInfo {
        self.device_info
            .as_ref()
            .expect("device_info is set once the device is open")
    }

    fn init_device(&mut self) -> Result<()> {
        if self.device_open {
            return Ok(());
        }
        if let Some(name) = &self.device_name {
            self.device_info = Some(self.device_db.by_name(name)?.clone());
        }

        let mut last_error: Option<Error> = None;
        for _ in 0..OPEN_RETRIES {
            if let Err(e) = self.controller.open() {
                last_error = Some(e);
                self.controller.close();
                continue;
            }

            // Parts without an ID are taken on faith from the forced name.
            if let Some(info) = &self.device_info {
                if info.device_id == 0 {
                    self.device_open = true;
                    return Ok(());
                }
            }

            let (device_id, revision) = match self.controller.read_device_id() {
                Ok(pair) => pair,
                Err(e) => {
                    last_error = Some(e);
                    self.controller.close();
                    continue;
                }
            };
            if device_id == 0 {
                last_error = Some(Error::InitFailed(
                    "failed to read a valid device ID".into(),
                ));
                self.controller.close();
                continue;
            }
            self.revision = revision;

            if let Some(info) = &self.device_info {
                if info.device_id != device_id {
                    return Err(Error::Verification(format!(
                        "device reports different ID ({device_id:04X}) than selected device ({:04X})",
                        info.device_id
                    )));
                }
            } else {
                self.device_info = Some(self.device_db.by_id(device_id)?.clone());
            }
            self.device_open = true;
            return Ok(());
        }
        Err(last_error
            .unwrap_or_else(|| Error::InitFailed("failed to read a valid device ID".into())))
    }

    fn close_device(&mut self) {
        self.device_open = false;
        self.controller.close();
    }

    /// Chunked read with sync-loss recovery: on SYNC_LOST the device is
    /// re-identified (itself retried, as that read can also lose sync) and,
    /// if the ID still matches, the read resumes from the current offset.
    fn read_data(
        &mut self,
        phase: &str,
        section: Section,
        base_address: u32,
        target_size: u32,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        let info = self.info().clone();
        let mut data: Vec<u8> = Vec::with_capacity(target_size as usize);
        progress.begin(phase, target_size as u64);
        while (data.len() as u32) < target_size {
            progress.advance(data.len() as u64);
            let start = base_address + data.len() as u32;
            let length = READ_CHUNK.min(target_size - data.len() as u32);
            match self
                .controller
                .read(section, start, start + length, &info)
            {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(Error::SyncLost(message)) => {
                    log::debug!("sync lost, re-identifying device: {message}");
                    let mut id_result: Result<(u16, u16)> =
                        Err(Error::SyncLost(message.clone()));
                    for _ in 0..RECOVERY_ID_RETRIES {
                        id_result = self.controller.read_device_id();
                        if !matches!(id_result, Err(Error::SyncLost(_))) {
                            break;
                        }
                    }
                    match id_result {
                        Ok((device_id, _)) if device_id == info.device_id => continue,
                        _ => return Err(Error::SyncLost(message)),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        progress.finish();
        Ok(data)
    }

    fn verify_data(
        &mut self,
        section: Section,
        data: &[u8],
        base_address: u32,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let written = self.read_data(
            &format!("verifying {section}"),
            section,
            base_address,
            data.len() as u32,
            progress,
        )?;
        if written != data {
            log::debug!("data written: {}", hex_string(data));
            log::debug!("data read   : {}", hex_string(&written));
            return Err(Error::Verification(
                "data read back is not what was written".into(),
            ));
        }
        Ok(())
    }
}

/// Gaps in the program's coverage of flash, as (start, end) pairs.
fn missing_flash_ranges(program: &Program, info: &DeviceInfo) -> Result<Vec<(u32, u32)>> {
    let mut ranges = Vec::new();
    let mut last_end = 0u32;
    for (&start, data) in program {
        if start >= info.program_memory_size {
            break;
        }
        if last_end != start {
            if last_end > start {
                return Err(Error::InvalidProgram(
                    "program has overlapping sections".into(),
                ));
            }
            ranges.push((last_end, start));
        }
        last_end = start + data.len() as u32;
    }
    if last_end < info.program_memory_size {
        ranges.push((last_end, info.program_memory_size));
    }
    Ok(ranges)
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}
