//! hawkbit-agent - hawkBit DDI update agent for RAUC-updated devices
//!
//! Thin binary around the `hawkbit_agent` library: argument parsing,
//! logging bring-up and exit-code mapping. In normal operation the agent
//! polls forever; with `--run-once` a single poll cycle (including any
//! triggered download and installation) decides the exit code.

mod error;

use clap::Parser;
use error::CliError;
use hawkbit_agent::config::AgentConfig;
use hawkbit_agent::service;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hawkbit-agent", disable_version_flag = true)]
#[command(about = "hawkBit DDI client driving RAUC installations", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config-file", value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Version information
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable debug output
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Check and install new software and exit
    #[arg(short = 'r', long = "run-once")]
    run_once: bool,

    /// Enable output to systemd journal
    #[arg(short = 's', long = "output-systemd")]
    output_systemd: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprint!("{e}");
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(e) => e.exit(),
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    if cli.version {
        println!("Version {}", hawkbit_agent::VERSION);
        return Ok(ExitCode::SUCCESS);
    }

    let path = cli.config_file.ok_or(CliError::NoConfigFile)?;
    if !path.exists() {
        return Err(CliError::ConfigFileNotFound(path));
    }
    let config = AgentConfig::load_from(&path).map_err(CliError::InvalidConfig)?;

    init_logging(&config, cli.debug, cli.output_systemd)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let success = runtime
        .block_on(service::run(config, cli.run_once))
        .map_err(CliError::Agent)?;

    if cli.run_once && !success {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing output.
///
/// `--debug` overrides the configured level; `--output-systemd` routes the
/// log stream to the journal when compiled with the `systemd` feature.
fn init_logging(config: &AgentConfig, debug: bool, output_systemd: bool) -> Result<(), CliError> {
    let directive = if debug {
        "debug"
    } else {
        config.log_level.as_filter_directive()
    };
    let filter = EnvFilter::new(directive);

    if output_systemd {
        #[cfg(feature = "systemd")]
        {
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;

            let journald = tracing_journald::layer()
                .map_err(|e| CliError::LoggingInit(format!("journald unavailable: {e}")))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(journald)
                .init();
            return Ok(());
        }
        #[cfg(not(feature = "systemd"))]
        eprintln!("systemd support not compiled in, logging to stdout");
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
