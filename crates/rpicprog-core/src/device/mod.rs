//! Device database: per-chip parameters and the catalogue file parser.

mod database;
mod types;

pub use database::{DeviceDb, SequenceValidator};
pub use types::{DeviceInfo, EraseMode, Section};
