use std::fs::File;
use std::process::ExitCode;
use std::time::Duration;

use ad5940_serial::Ad5940;
use anyhow::Context;
use clap::Parser;

use cli::{Cli, Commands};

mod cli;
mod measure;
mod register;
mod util;

const EXIT_FAILURE: u8 = 1;
const EXIT_INIT_FAILURE: u8 = 2;

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();
    if let Some(path) = &cli.log_file {
        let file =
            File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let timeout = Duration::from_millis(cli.timeout_ms);
    let mut afe = match Ad5940::connect_with_timeout(&cli.port, cli.baud, timeout) {
        Ok(afe) => afe,
        Err(e) => {
            log::error!("could not open {}: {e}", cli.port);
            eprintln!("Error: could not open {}: {e}", cli.port);
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    let result = match cli.command {
        Commands::Reset => afe.reset().map_err(anyhow::Error::from),
        Commands::Register(command) => register::action(&mut afe, command),
        Commands::Measure(command) => {
            if let Err(e) = afe.initialize() {
                log::error!("AD5940 initialisation failed: {e}");
                eprintln!("Error: AD5940 initialisation failed: {e}");
                return ExitCode::from(EXIT_INIT_FAILURE);
            }
            measure::action(&mut afe, command)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

#[cfg(test)]
mod test {
    use crate::cli::Cli;

    use clap::CommandFactory;

    #[test]
    fn check_cli_debug_asserts() {
        Cli::command().debug_assert();
    }
}
