//! rpicprog - an in-circuit programmer for Microchip PIC flash
//! microcontrollers driven through an FTDI bridge in synchronous bit-bang
//! mode.

mod cli;
mod commands;

use clap::Parser;
use cli::{Action, Cli};
use rpicprog_core::programmer::Programmer;
use rpicprog_ftdi::FtdiBitbang;
use std::path::PathBuf;

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let driver = FtdiBitbang::new(cli.ftdi_config());

    if cli.action == Action::ListProgrammers {
        commands::list_programmers(&driver)?;
        return Ok(());
    }

    let family_arg = cli.family.ok_or("--family must be specified")?;
    let family = family_arg.family();

    let mut device_db = family.device_db();
    let db_path = match &cli.device_db {
        Some(path) => path.clone(),
        None => default_db_path(family_arg.db_stem()),
    };
    device_db.load(&db_path)?;
    log::debug!(
        "loaded {} device definitions from {}",
        device_db.len(),
        db_path.display()
    );

    let controller = family.controller(driver, cli.handshake.handshake());
    let mut programmer = Programmer::new(controller, device_db);
    if let Some(device) = &cli.device {
        programmer.set_device(device);
    }

    match cli.action {
        Action::Identify => commands::identify(&mut programmer)?,
        Action::DumpProgram => {
            let output = cli.output.as_deref().ok_or("--output is required for action dump-program")?;
            commands::dump_program(&mut programmer, &cli.section_list(), output)?;
        }
        Action::WriteProgram => {
            let input = cli.input.as_deref().ok_or("--input is required for action write-program")?;
            commands::write_program(
                &mut programmer,
                &cli.section_list(),
                input,
                cli.erase_mode.erase_mode(),
            )?;
        }
        Action::Erase => {
            if cli.sections.is_empty() {
                return Err("erase requires setting --sections".into());
            }
            if cli.sections.contains(&cli::SectionArg::All) {
                commands::chip_erase(&mut programmer)?;
            } else {
                commands::section_erase(&mut programmer, &cli.section_list())?;
            }
        }
        Action::ListProgrammers => unreachable!("handled before the device DB is loaded"),
    }
    Ok(())
}

/// `device_db/<stem>.lst` next to the binary, falling back to the working
/// directory when the executable path is unavailable.
fn default_db_path(stem: &str) -> PathBuf {
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("device_db").join(format!("{stem}.lst"))
}
