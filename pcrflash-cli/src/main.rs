//! pcrflash CLI - Command-line tool for updating EasyPCR controller firmware.
//!
//! ## Features
//!
//! - Upload Intel HEX or raw binary firmware over YMODEM
//! - Convert Intel HEX files to flat binaries
//! - Inspect firmware images
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;
mod config;

use config::Config;

/// Baud rate used when neither the command line nor the config sets one.
const DEFAULT_BAUD: u32 = 115200;

/// Errors that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid or missing user input.
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// pcrflash - Upload firmware to EasyPCR controllers over a serial link.
///
/// Environment variables:
///   PCRFLASH_PORT   - Default serial port
///   PCRFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "pcrflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port the controller's boot loader listens on.
    #[arg(short, long, global = true, env = "PCRFLASH_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "PCRFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware file (Intel HEX or raw binary) via YMODEM.
    Upload {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// File name announced to the boot loader (defaults to the file's name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Convert an Intel HEX file to a flat binary.
    Convert {
        /// Path to the Intel HEX file.
        hex: PathBuf,

        /// Output path (defaults to the input with a .bin extension).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show information about a firmware image.
    Info {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Print machine-readable JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        shell: Shell,
    },
}

impl Cli {
    /// Serial port from the command line, environment or config file.
    fn resolve_port(&self, config: &Config) -> Result<String, CliError> {
        self.port
            .clone()
            .or_else(|| config.connection.serial.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "no serial port given; use --port, PCRFLASH_PORT or [connection] serial in \
                     the config file"
                        .to_string(),
                )
            })
    }

    fn resolve_baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD)
    }
}

/// Check if animations should be used (stderr is a TTY and colors are enabled).
pub(crate) fn use_fancy_output() -> bool {
    console::Term::stderr().is_term() && console::colors_enabled_stderr()
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Upload { firmware, name } => {
            let config = match &cli.config_path {
                Some(path) => Config::load_from_path(path),
                None => Config::load(),
            };
            commands::upload::cmd_upload(cli, &config, firmware, name.as_deref())
        },
        Commands::Convert { hex, output } => {
            commands::convert::cmd_convert(cli, hex, output.as_deref())
        },
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

fn main() {
    if env::var_os("NO_COLOR").is_some() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "pcrflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}
