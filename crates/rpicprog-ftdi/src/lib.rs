//! Synchronous bit-bang transport for FTDI bridges (FT232R and friends).
//!
//! In synchronous bit-bang mode the bridge clocks one byte of GPIO output
//! per baud tick and mirrors one byte of the input pins into its receive
//! FIFO at the same rate. This crate keeps those two streams in lock-step
//! and implements the [`rpicprog_core::driver::Driver`] contract on top.

mod config;
mod device;

pub use config::{FtdiConfig, PinAssignment, PinName};
pub use device::FtdiBitbang;
