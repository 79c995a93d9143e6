use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::measure::MeasureCommand;
use crate::register::RegisterCommand;
use crate::util;

/// CLI for an AD5940 impedance front end behind a serial register bridge
///
/// Register commands talk to the chip as-is. Measurement commands first
/// reset and identify the chip, then calibrate the TIA gain resistor before
/// measuring, so every run starts from a known state.
///
/// Measurement settings come from the defaults, then the JSON file given
/// with --config, then the individual flags, in that order.
#[derive(Debug, Parser)]
#[command(version, about)]
pub(crate) struct Cli {
    /// Serial port the bridge is attached to, e.g. /dev/ttyUSB0 or COM3.
    pub(crate) port: String,
    /// Serial baud rate.
    #[arg(short, long, default_value_t = ad5940_serial::transport::DEFAULT_BAUD_RATE)]
    pub(crate) baud: u32,
    /// Time to wait for each reply, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub(crate) timeout_ms: u64,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    ///
    /// RUST_LOG takes precedence when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Write the log to this file instead of standard error.
    #[arg(long, global = true)]
    pub(crate) log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Commands {
    /// Hardware reset of the AFE.
    Reset,
    #[command(flatten)]
    Register(RegisterCommand),
    #[command(flatten)]
    Measure(MeasureCommand),
}

/// Measurement settings that can be given on the command line.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct MeasureArgs {
    /// JSON file with measurement settings. Missing keys keep their defaults.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Excitation frequency in Hz.
    #[arg(long)]
    pub(crate) frequency: Option<f64>,
    /// Excitation amplitude in mV peak-to-peak.
    #[arg(long)]
    pub(crate) amplitude: Option<f64>,
    /// How DFT completion is detected.
    #[arg(long)]
    pub(crate) acquisition: Option<Acquisition>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum Acquisition {
    /// Poll the DFT result registers (bounded).
    Polling,
    /// Wait for the DFT-ready interrupt flag.
    Interrupt,
}

/// Register address in hexadecimal.
pub(crate) fn address(value: &str) -> Result<u16, std::num::ParseIntError> {
    util::u16_from_hex(value)
}

/// Register value or mask in hexadecimal.
pub(crate) fn word(value: &str) -> Result<u32, std::num::ParseIntError> {
    util::u32_from_hex(value)
}
