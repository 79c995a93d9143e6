use std::fs;

use ad5940_serial::dft::{AcquisitionMode, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_US};
use ad5940_serial::sweep::{Spacing, SweepPlan};
use ad5940_serial::{Ad5940, AppConfig, ImpedanceApp, Transport};
use anyhow::Context;

use crate::cli::{Acquisition, MeasureArgs};

#[derive(Debug, clap::Subcommand)]
pub(crate) enum MeasureCommand {
    /// Calibrate the TIA gain resistor and print its complex value.
    Calibrate {
        /// Print magnitude and phase instead of real and imaginary parts.
        #[arg(long)]
        polar: bool,
        #[command(flatten)]
        settings: MeasureArgs,
    },
    /// Measure the impedance of the cell.
    Measure {
        /// Number of measurements to take.
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        #[command(flatten)]
        settings: MeasureArgs,
    },
    /// Measure the cell over a range of frequencies.
    Sweep {
        /// First frequency in Hz.
        start: f64,
        /// Last frequency in Hz.
        stop: f64,
        /// Number of points, including both ends.
        points: u32,
        /// Space the points logarithmically instead of linearly.
        #[arg(long)]
        log: bool,
        #[command(flatten)]
        settings: MeasureArgs,
    },
}

impl MeasureCommand {
    fn settings(&self) -> &MeasureArgs {
        match self {
            MeasureCommand::Calibrate { settings, .. }
            | MeasureCommand::Measure { settings, .. }
            | MeasureCommand::Sweep { settings, .. } => settings,
        }
    }
}

/// Build the measurement settings: defaults, then the config file, then flags.
pub(crate) fn app_config(args: &MeasureArgs) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => AppConfig::default(),
    };
    if let Some(frequency) = args.frequency {
        config.sin_freq_hz = frequency;
    }
    if let Some(amplitude) = args.amplitude {
        config.vout_pp_mv = amplitude;
    }
    match args.acquisition {
        Some(Acquisition::Polling) => {
            config.acquisition = AcquisitionMode::Polling {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            }
        }
        Some(Acquisition::Interrupt) => {
            config.acquisition = AcquisitionMode::Interrupt {
                poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            }
        }
        None => {}
    }
    log::debug!("measurement settings: {config:?}");
    Ok(config)
}

pub(crate) fn action<T: Transport>(
    afe: &mut Ad5940<T>,
    command: MeasureCommand,
) -> anyhow::Result<()> {
    let mut app = ImpedanceApp::new(app_config(command.settings())?);
    let calibration = app.calibrate(afe).context("Rtia calibration failed")?;

    match command {
        MeasureCommand::Calibrate { polar, .. } => {
            if polar {
                println!(
                    "Rtia = {:.3} Ω at {:.5} rad",
                    calibration.magnitude(),
                    calibration.phase()
                );
            } else {
                println!(
                    "Rtia = {:.3} {:+.3}i Ω",
                    calibration.value.re, calibration.value.im
                );
            }
        }
        MeasureCommand::Measure { repeat, .. } => {
            app.configure(afe)?;
            for _ in 0..repeat {
                let z = app.measure(afe)?;
                println!("|Z| = {:.3} Ω, phase = {:.5} rad", z.norm(), z.arg());
            }
        }
        MeasureCommand::Sweep {
            start,
            stop,
            points,
            log: logarithmic,
            ..
        } => {
            let spacing = if logarithmic {
                Spacing::Logarithmic
            } else {
                Spacing::Linear
            };
            let mut failed = 0;
            println!("frequency_hz,magnitude_ohm,phase_rad");
            for point in app.sweep(afe, SweepPlan::new(start, stop, points, spacing))? {
                match point.result {
                    Ok(z) => println!("{:.3},{:.3},{:.5}", point.frequency_hz, z.norm(), z.arg()),
                    Err(e) => {
                        log::error!("{:.3} Hz: {e}", point.frequency_hz);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {points} sweep points failed");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = MeasureArgs {
            config: None,
            frequency: Some(2_500.0),
            amplitude: None,
            acquisition: Some(Acquisition::Interrupt),
        };
        let config = app_config(&args).unwrap();
        assert_eq!(config.sin_freq_hz, 2_500.0);
        assert_eq!(config.vout_pp_mv, AppConfig::default().vout_pp_mv);
        assert_eq!(
            config.acquisition,
            AcquisitionMode::Interrupt {
                poll_interval_us: DEFAULT_POLL_INTERVAL_US
            }
        );
    }
}
