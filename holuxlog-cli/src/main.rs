//! holuxlog CLI - Command-line tool for Holux GPS data loggers.
//!
//! ## Features
//!
//! - Download the track log and export it as GPX or KML
//! - Decode a saved flash dump offline
//! - Query device information and send raw debug commands
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use holuxlog::port::{DataBits, FlowControl, Parity, StopBits};
use holuxlog::{DeviceFamily, SerialConfig};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod export;
mod serial;

use config::Config;
use export::ExportFormat;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or unusable environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration (exit code 3).
    #[error("{0}")]
    Config(String),
    /// The logger could not be reached or misbehaved (exit code 4).
    #[error("{0}")]
    Device(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Device(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<holuxlog::Error>() {
        Some(holuxlog::Error::Config(_)) => 3,
        Some(holuxlog::Error::DeviceNotFound) => 4,
        _ => 1,
    }
}

/// holuxlog - Download and decode track logs from Holux GPS loggers.
///
/// Environment variables:
///   HOLUXLOG_PORT              - Default serial port
///   HOLUXLOG_BAUD              - Baud rate (default: the device's rate)
///   HOLUXLOG_DEVICE            - Logger model (m241, gr245)
///   HOLUXLOG_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "holuxlog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    holuxlog list-ports\n  \
    holuxlog --port /dev/ttyUSB0 upload -o track.gpx\n  \
    holuxlog decode dump.bin --format kml -o track.kml")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "HOLUXLOG_PORT")]
    port: Option<String>,

    /// Baud rate (defaults to the logger model's rate).
    #[arg(short, long, global = true, env = "HOLUXLOG_BAUD")]
    baud: Option<u32>,

    /// Logger model.
    #[arg(short, long, global = true, env = "HOLUXLOG_DEVICE")]
    device: Option<Device>,

    /// Data bits (5-8).
    #[arg(long, global = true, default_value = "8")]
    data_bits: DataBits,

    /// Parity (none, odd, even).
    #[arg(long, global = true, default_value = "none")]
    parity: Parity,

    /// Stop bits (1, 2).
    #[arg(long, global = true, default_value = "1")]
    stop_bits: StopBits,

    /// Flow control (none, hardware, software).
    #[arg(long, global = true, default_value = "none")]
    flow_control: FlowControl,

    /// Reply timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HOLUXLOG_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported logger models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Device {
    /// Holux M-241.
    M241,
    /// Holux GR-245.
    Gr245,
}

impl From<Device> for DeviceFamily {
    fn from(device: Device) -> Self {
        match device {
            Device::M241 => Self::HoluxM241,
            Device::Gr245 => Self::HoluxGr245,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Connect and show firmware and log status.
    Info {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Send a raw command sentence and print the reply.
    Debug {
        /// Data field to send, without `$` and checksum (e.g. PMTK182,2,2).
        command: String,

        /// Reply prefix to wait for (e.g. PMTK182,3,2).
        #[arg(short, long)]
        expect: Option<String>,
    },

    /// Download the track log and export it.
    Upload {
        /// Output file (default: holux-<date>.<format>).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format.
        #[arg(short, long, value_enum)]
        format: Option<ExportFormat>,

        /// Also save the raw flash dump.
        #[arg(long, value_name = "FILE")]
        raw: Option<PathBuf>,
    },

    /// Decode a saved flash dump.
    Decode {
        /// Raw dump file.
        dump: PathBuf,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format.
        #[arg(short, long, value_enum)]
        format: Option<ExportFormat>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Option<Shell>,

        /// Install completions for the current shell.
        #[arg(long)]
        install: bool,
    },
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

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

    debug!(
        "holuxlog v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::list_ports::cmd_list_ports(*json),
        Commands::Info { json } => commands::info::cmd_info(cli, &mut config, *json),
        Commands::Debug { command, expect } => {
            commands::debug::cmd_debug(cli, &mut config, command, expect.as_deref())
        },
        Commands::Upload {
            output,
            format,
            raw,
        } => commands::upload::cmd_upload(
            cli,
            &mut config,
            output.as_deref(),
            *format,
            raw.as_deref(),
        ),
        Commands::Decode {
            dump,
            output,
            format,
        } => commands::decode::cmd_decode(cli, &config, dump, output.as_deref(), *format),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: holuxlog completions bash \
                         (or use --install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Logger model from CLI, then config, then the default.
fn resolve_family(cli: &Cli, config: &Config) -> Result<DeviceFamily> {
    if let Some(device) = cli.device {
        return Ok(device.into());
    }
    match config.port.connection.device.as_deref() {
        Some(name) => DeviceFamily::from_name(name).ok_or_else(|| {
            CliError::Config(format!("unknown device '{name}' in configuration")).into()
        }),
        None => Ok(DeviceFamily::default()),
    }
}

/// Export format from CLI, then config, then GPX.
fn resolve_format(arg: Option<ExportFormat>, config: &Config) -> Result<ExportFormat> {
    if let Some(format) = arg {
        return Ok(format);
    }
    match config.export.format.as_deref() {
        Some(name) => ExportFormat::from_name(name).ok_or_else(|| {
            CliError::Config(format!("unknown export format '{name}' in configuration")).into()
        }),
        None => Ok(ExportFormat::default()),
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && options.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Serial settings for `port_name`.
fn serial_config(cli: &Cli, config: &Config, family: DeviceFamily, port_name: String) -> SerialConfig {
    let baud = cli
        .baud
        .or(config.port.connection.baud)
        .unwrap_or_else(|| family.default_baud());
    SerialConfig {
        data_bits: cli.data_bits,
        parity: cli.parity,
        stop_bits: cli.stop_bits,
        flow_control: cli.flow_control,
        ..SerialConfig::new(port_name, baud)
    }
}
