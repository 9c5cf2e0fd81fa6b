//! CLI command implementations.

mod progress;

use progress::IndicatifProgress;
use rpicprog_core::device::{EraseMode, Section};
use rpicprog_core::driver::Driver;
use rpicprog_core::program::{read_ihex, write_ihex, Program, DEFAULT_BYTES_PER_LINE};
use rpicprog_core::programmer::Programmer;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub fn identify(programmer: &mut Programmer) -> Result<(), Box<dyn std::error::Error>> {
    let summary = programmer.identify()?;
    println!("Device {}, revision {}", summary.name, summary.revision);
    Ok(())
}

pub fn dump_program(
    programmer: &mut Programmer,
    sections: &[Section],
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = IndicatifProgress::new();
    let program = programmer.read_program(sections, &mut progress)?;
    let file = File::create(output)
        .map_err(|e| format!("could not open file '{}': {e}", output.display()))?;
    let mut writer = BufWriter::new(file);
    write_ihex(&program, &mut writer, DEFAULT_BYTES_PER_LINE)?;
    Ok(())
}

pub fn write_program(
    programmer: &mut Programmer,
    sections: &[Section],
    input: &Path,
    erase_mode: EraseMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input)
        .map_err(|e| format!("could not open file '{}': {e}", input.display()))?;
    let program: Program = read_ihex(BufReader::new(file))?;
    let mut progress = IndicatifProgress::new();
    programmer.write_program(sections, &program, erase_mode, &mut progress)?;
    println!("Write complete");
    Ok(())
}

pub fn chip_erase(programmer: &mut Programmer) -> Result<(), Box<dyn std::error::Error>> {
    programmer.chip_erase()?;
    println!("Chip erased");
    Ok(())
}

pub fn section_erase(
    programmer: &mut Programmer,
    sections: &[Section],
) -> Result<(), Box<dyn std::error::Error>> {
    programmer.section_erase(sections)?;
    println!("Sections erased");
    Ok(())
}

pub fn list_programmers(driver: &dyn Driver) -> Result<(), Box<dyn std::error::Error>> {
    let devices = driver.list()?;
    if devices.is_empty() {
        println!("No programmers found");
    }
    for device in devices {
        println!("Device:\n{device}");
    }
    Ok(())
}
