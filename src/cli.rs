//! CLI argument parsing.

use clap::{Parser, ValueEnum};
use rpicprog_core::device::{EraseMode, Section};
use rpicprog_core::family::Family;
use rpicprog_core::sequence::Handshake;
use rpicprog_ftdi::{FtdiConfig, PinAssignment, PinName};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpicprog")]
#[command(author, version, about = "In-circuit programmer for Microchip PIC microcontrollers", long_about = None)]
pub struct Cli {
    /// Action to perform. For dump-program and write-program an empty
    /// --sections means all sections; erase requires an explicit
    /// --sections (use "all" for a chip erase).
    #[arg(long, value_enum)]
    pub action: Action,

    /// Device family to use.
    #[arg(long, value_enum)]
    pub family: Option<FamilyArg>,

    /// Exact device name. Required for devices that don't provide a device
    /// ID; parts with an ID are detected by the identify action.
    #[arg(long)]
    pub device: Option<String>,

    /// Comma-separated list of sections to operate on.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub sections: Vec<SectionArg>,

    /// Erase mode for writing.
    #[arg(long = "erase_mode", value_enum, default_value = "chip")]
    pub erase_mode: EraseModeArg,

    /// Intel HEX file to read and program (write-program).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// File to write the Intel HEX data to (dump-program).
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Device DB file to load. Defaults to device_db/<family>.lst next to
    /// the binary.
    #[arg(long = "device_db")]
    pub device_db: Option<PathBuf>,

    /// Vendor ID of the FTDI device to open.
    #[arg(long = "ftdi_vendor_id", value_parser = parse_number, default_value = "0403h")]
    pub ftdi_vendor_id: u16,

    /// Product ID of the FTDI device to open.
    #[arg(long = "ftdi_product_id", value_parser = parse_number, default_value = "6001h")]
    pub ftdi_product_id: u16,

    /// Product description to select which FTDI device to use.
    #[arg(long = "ftdi_description")]
    pub ftdi_description: Option<String>,

    /// Serial number to select which FTDI device to use.
    #[arg(long = "ftdi_serial")]
    pub ftdi_serial: Option<String>,

    /// Pin to use for inverted MCLR.
    #[arg(long = "ftdi_nMCLR", value_parser = parse_pin, default_value = "TxD")]
    pub ftdi_nmclr: PinName,

    /// Pin to use for PGC.
    #[arg(long = "ftdi_PGC", value_parser = parse_pin, default_value = "DTR")]
    pub ftdi_pgc: PinName,

    /// Pin to use for PGD input. Should differ from PGD output only when
    /// the data signal is split.
    #[arg(long = "ftdi_PGD_in", value_parser = parse_pin, default_value = "RxD")]
    pub ftdi_pgd_in: PinName,

    /// Pin to use for PGD output.
    #[arg(long = "ftdi_PGD_out", value_parser = parse_pin, default_value = "RxD")]
    pub ftdi_pgd_out: PinName,

    /// Pin to use for PGM.
    #[arg(long = "ftdi_PGM", value_parser = parse_pin, default_value = "CTS")]
    pub ftdi_pgm: PinName,

    /// Programming-mode entry handshake.
    #[arg(long, value_enum, default_value = "lvp")]
    pub handshake: HandshakeArg,

    /// Verbosity level: 0 quiet, 1 normal, 2 debug, 3 trace.
    #[arg(long, default_value_t = 1)]
    pub verbosity: u32,
}

impl Cli {
    pub fn ftdi_config(&self) -> FtdiConfig {
        FtdiConfig {
            vendor_id: self.ftdi_vendor_id,
            product_id: self.ftdi_product_id,
            description: self.ftdi_description.clone(),
            serial: self.ftdi_serial.clone(),
            pins: PinAssignment {
                nmclr: self.ftdi_nmclr,
                pgc: self.ftdi_pgc,
                pgd_in: self.ftdi_pgd_in,
                pgd_out: self.ftdi_pgd_out,
                pgm: self.ftdi_pgm,
            },
            ..FtdiConfig::default()
        }
    }

    /// The sections to operate on; empty or "all" selects everything.
    pub fn section_list(&self) -> Vec<Section> {
        if self.sections.is_empty() || self.sections.contains(&SectionArg::All) {
            return vec![
                Section::Flash,
                Section::UserId,
                Section::Configuration,
                Section::Eeprom,
            ];
        }
        let mut sections = Vec::new();
        for arg in &self.sections {
            let section = match arg {
                SectionArg::Flash => Section::Flash,
                SectionArg::UserId => Section::UserId,
                SectionArg::Config => Section::Configuration,
                SectionArg::Eeprom => Section::Eeprom,
                SectionArg::All => unreachable!(),
            };
            if !sections.contains(&section) {
                sections.push(section);
            }
        }
        sections
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Identify,
    DumpProgram,
    WriteProgram,
    Erase,
    ListProgrammers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FamilyArg {
    Pic10,
    Pic10Small,
    Pic10Baseline,
    Pic12,
    Pic12Small,
    Pic16,
    Pic16Small,
    Pic16New,
    Pic16Enhanced,
    Pic18,
    Pic24,
}

impl FamilyArg {
    pub fn family(self) -> Family {
        match self {
            FamilyArg::Pic10 | FamilyArg::Pic12 | FamilyArg::Pic16 => Family::Pic16Midrange,
            FamilyArg::Pic10Small
            | FamilyArg::Pic10Baseline
            | FamilyArg::Pic12Small
            | FamilyArg::Pic16Small => Family::Pic16Baseline,
            FamilyArg::Pic16New | FamilyArg::Pic16Enhanced => Family::Pic16Enhanced,
            FamilyArg::Pic18 => Family::Pic18,
            FamilyArg::Pic24 => Family::Pic24,
        }
    }

    /// Stem of the default catalogue file for this family name.
    pub fn db_stem(self) -> &'static str {
        match self {
            FamilyArg::Pic10 => "pic10",
            FamilyArg::Pic10Small | FamilyArg::Pic10Baseline => "pic10-small",
            FamilyArg::Pic12 => "pic12",
            FamilyArg::Pic12Small => "pic12-small",
            FamilyArg::Pic16 => "pic16",
            FamilyArg::Pic16Small => "pic16-small",
            FamilyArg::Pic16New | FamilyArg::Pic16Enhanced => "pic16-new",
            FamilyArg::Pic18 => "pic18",
            FamilyArg::Pic24 => "pic24",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SectionArg {
    Flash,
    UserId,
    Config,
    Eeprom,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EraseModeArg {
    Chip,
    Section,
    Row,
    None,
}

impl EraseModeArg {
    pub fn erase_mode(self) -> EraseMode {
        match self {
            EraseModeArg::Chip => EraseMode::Chip,
            EraseModeArg::Section => EraseMode::Section,
            EraseModeArg::Row => EraseMode::Row,
            EraseModeArg::None => EraseMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HandshakeArg {
    Lvp,
    NmclrFirst,
    PgmFirst,
}

impl HandshakeArg {
    pub fn handshake(self) -> Handshake {
        match self {
            HandshakeArg::Lvp => Handshake::Lvp,
            HandshakeArg::NmclrFirst => Handshake::NmclrFirst,
            HandshakeArg::PgmFirst => Handshake::PgmFirst,
        }
    }
}

/// Accept decimal, `0x` hex or trailing-`h` hex.
fn parse_number(value: &str) -> Result<u16, String> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or(value.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else if let Some(hex) = value.strip_suffix('h') {
        u16::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| format!("invalid number '{value}'"))
}

/// The FTDI bit-bang lines by their UART names.
fn parse_pin(value: &str) -> Result<PinName, String> {
    match value {
        "TxD" => Ok(PinName::TxD),
        "RxD" => Ok(PinName::RxD),
        "RTS" => Ok(PinName::Rts),
        "CTS" => Ok(PinName::Cts),
        "DTR" => Ok(PinName::Dtr),
        "DSR" => Ok(PinName::Dsr),
        "DCD" => Ok(PinName::Dcd),
        "RI" => Ok(PinName::Ri),
        "NC" => Ok(PinName::Nc),
        _ => Err(format!(
            "no pin named {value} available (one of TxD, RxD, RTS, CTS, DTR, DSR, DCD, RI, NC)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_number("0x0403"), Ok(0x0403));
        assert_eq!(parse_number("6001h"), Ok(0x6001));
        assert_eq!(parse_number("1027"), Ok(1027));
        assert!(parse_number("zzz").is_err());
    }

    #[test]
    fn family_aliases_share_a_controller_and_catalogue() {
        assert_eq!(FamilyArg::Pic10Baseline.family(), Family::Pic16Baseline);
        assert_eq!(FamilyArg::Pic10Baseline.db_stem(), "pic10-small");
        assert_eq!(FamilyArg::Pic16Enhanced.db_stem(), "pic16-new");
        assert_eq!(FamilyArg::Pic12.family(), Family::Pic16Midrange);
    }

    #[test]
    fn cli_parses_a_write_invocation() {
        let cli = Cli::try_parse_from([
            "rpicprog",
            "--action",
            "write-program",
            "--family",
            "pic18",
            "--input",
            "firmware.hex",
            "--sections",
            "flash,config",
            "--erase_mode",
            "section",
        ])
        .unwrap();
        assert_eq!(cli.action, Action::WriteProgram);
        assert_eq!(
            cli.section_list(),
            vec![Section::Flash, Section::Configuration]
        );
        assert_eq!(cli.erase_mode.erase_mode(), EraseMode::Section);
    }

    #[test]
    fn empty_sections_select_everything() {
        let cli =
            Cli::try_parse_from(["rpicprog", "--action", "identify", "--family", "pic16"])
                .unwrap();
        assert_eq!(cli.section_list().len(), 4);
    }
}
