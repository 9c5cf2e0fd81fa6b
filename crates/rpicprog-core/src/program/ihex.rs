//! Intel HEX reader and writer.
//!
//! Accepted record types: 00 (data), 01 (end of file), 04 (extended linear
//! address). The writer emits 04 records whenever the upper 16 address bits
//! change and never lets a data record cross a 64 KiB boundary.

use std::io::{self, BufRead, Write};

use crate::error::{Error, Result};
use crate::program::Program;

/// Default data-record payload width for the writer.
pub const DEFAULT_BYTES_PER_LINE: usize = 16;

/// Running two's-complement checksum over record bytes.
#[derive(Default)]
struct IhexChecksum(i32);

impl IhexChecksum {
    fn add(&mut self, byte: u8) -> &mut Self {
        self.0 += byte as i32;
        self
    }

    fn get(&self) -> u8 {
        (-self.0 & 0xff) as u8
    }
}

fn hex_nibble(c: u8, line_number: usize) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Parse(format!(
            "unexpected character {:?} at line {line_number}",
            c as char
        ))),
    }
}

/// One ASCII byte pair from the record body.
fn take_byte(bytes: &[u8], pos: &mut usize, line_number: usize) -> Result<u8> {
    if *pos + 2 > bytes.len() {
        return Err(Error::Parse(format!(
            "unexpected end-of-line at line {line_number}"
        )));
    }
    let hi = hex_nibble(bytes[*pos], line_number)?;
    let lo = hex_nibble(bytes[*pos + 1], line_number)?;
    *pos += 2;
    Ok(hi << 4 | lo)
}

/// Parse an Intel HEX stream into a sparse program image.
///
/// Returns once the end-of-file record has been seen; anything but trailing
/// whitespace after it only produces a warning. All malformed input becomes
/// [`Error::Parse`] with the offending line number.
pub fn read_ihex<R: BufRead>(input: R) -> Result<Program> {
    let mut program = Program::new();
    let mut high_address: u32 = 0;
    let mut lines = input.lines().enumerate();
    let mut line_number = 0;

    loop {
        let Some((idx, line)) = lines.next() else {
            return Err(Error::Parse(format!(
                "unexpected end-of-file at line {}",
                line_number + 1
            )));
        };
        line_number = idx + 1;
        let line =
            line.map_err(|e| Error::Parse(format!("error reading file at line {line_number}: {e}")))?;
        let bytes = line.trim_end_matches('\r').as_bytes();

        if bytes.first() != Some(&b':') {
            return Err(Error::Parse(format!(
                "did not find : at start of line {line_number}"
            )));
        }

        let mut pos = 1;
        let mut checksum = IhexChecksum::default();
        let byte_count = take_byte(bytes, &mut pos, line_number)?;
        checksum.add(byte_count);
        let offset_high = take_byte(bytes, &mut pos, line_number)?;
        checksum.add(offset_high);
        let offset_low = take_byte(bytes, &mut pos, line_number)?;
        checksum.add(offset_low);
        let offset = (offset_high as u16) << 8 | offset_low as u16;
        let record_type = take_byte(bytes, &mut pos, line_number)?;
        checksum.add(record_type);

        let mut data = Vec::with_capacity(byte_count as usize);
        for _ in 0..byte_count {
            let byte = take_byte(bytes, &mut pos, line_number)?;
            checksum.add(byte);
            data.push(byte);
        }
        let expected = checksum.get();
        let found = take_byte(bytes, &mut pos, line_number)?;
        if expected != found {
            return Err(Error::Parse(format!(
                "checksum incorrect at line {line_number} (found {found:02X}, calculated {expected:02X})"
            )));
        }
        if pos != bytes.len() {
            return Err(Error::Parse(format!(
                "trailing characters at line {line_number}"
            )));
        }

        match record_type {
            0x00 => {
                if !data.is_empty() {
                    program.insert(high_address + offset as u32, data);
                }
            }
            0x01 => {
                for (_, rest) in lines {
                    let rest = rest.unwrap_or_default();
                    if !rest.trim().is_empty() {
                        log::warn!("extra data after EOF record in IHEX file");
                        break;
                    }
                }
                check_no_overlap(&program)?;
                return Ok(program);
            }
            0x04 => {
                if data.len() != 2 {
                    return Err(Error::Parse(format!(
                        "invalid size for type 04 (extended linear address) at line {line_number} ({} instead of 2)",
                        data.len()
                    )));
                }
                high_address = ((data[0] as u32) << 8 | data[1] as u32) << 16;
            }
            other => {
                return Err(Error::Parse(format!(
                    "unsupported record type {other:02X} at line {line_number}"
                )));
            }
        }
    }
}

fn check_no_overlap(program: &Program) -> Result<()> {
    let mut last: Option<(u32, u32)> = None;
    for (&start, data) in program {
        let end = start + data.len() as u32;
        if let Some((last_start, last_end)) = last {
            if last_end > start {
                return Err(Error::Parse(format!(
                    "overlapping program parts in IHEX file ({last_start:08X}-{last_end:08X} and {start:08X}-{end:08X})"
                )));
            }
        }
        last = Some((start, end));
    }
    Ok(())
}

/// Write a program image as Intel HEX.
///
/// `bytes_per_line` is clamped to 1..=255; records never cross a 64 KiB
/// boundary and a type-04 record precedes any change of the upper address
/// half.
pub fn write_ihex<W: Write>(program: &Program, out: &mut W, bytes_per_line: usize) -> io::Result<()> {
    let bytes_per_line = bytes_per_line.clamp(1, 255) as u32;

    let mut last_address = u32::MAX;
    for (&start, data) in program {
        let mut idx = 0u32;
        while idx < data.len() as u32 {
            let next_offset = start + idx;
            if (next_offset >> 16) != (last_address >> 16) {
                let mut checksum = IhexChecksum::default();
                checksum
                    .add(2)
                    .add(4)
                    .add((next_offset >> 24) as u8)
                    .add((next_offset >> 16) as u8);
                writeln!(out, ":02000004{:04X}{:02X}", next_offset >> 16, checksum.get())?;
            }

            let to_boundary = ((next_offset + 0x10000) & 0xffff_0000) - next_offset;
            let remaining = data.len() as u32 - idx;
            let line_length = bytes_per_line.min(to_boundary).min(remaining);

            let mut checksum = IhexChecksum::default();
            checksum
                .add(line_length as u8)
                .add((next_offset >> 8) as u8)
                .add(next_offset as u8);
            write!(out, ":{:02X}{:04X}00", line_length, next_offset & 0xffff)?;
            for i in 0..line_length {
                let byte = data[(idx + i) as usize];
                checksum.add(byte);
                write!(out, "{byte:02X}")?;
            }
            writeln!(out, "{:02X}", checksum.get())?;

            last_address = next_offset;
            idx += line_length;
        }
    }
    writeln!(out, ":00000001FF")?;
    Ok(())
}
