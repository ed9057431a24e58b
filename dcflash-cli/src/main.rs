//! dcflash CLI - firmware updater for Doppelgänger readers.
//!
//! ## Features
//!
//! - Guided update: identity check, flash, boot verification, recovery
//! - Serial port listing with target classification
//! - Stand-alone identity check and boot verification
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Args, Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    dcflash::{FlashFrequency, FlashMode},
    env_logger::Env,
    log::debug,
    rust_i18n::t,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
    thiserror::Error,
};

mod commands;
mod config;
mod serial;
mod ui;

use config::Config;

rust_i18n::i18n!("locales", fallback = "en");

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors classified by exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// dcflash - update Doppelgänger readers over USB serial.
///
/// Environment variables:
///   DCFLASH_PORT              - Serial port to use
///   DCFLASH_TOOL              - esptool executable
///   DCFLASH_FIRMWARE_DIR      - Directory holding the firmware images
///   DCFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "dcflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (asked for if not specified).
    #[arg(short, long, global = true, env = "DCFLASH_PORT")]
    port: Option<String>,

    /// esptool executable (searched for if not specified).
    #[arg(long, global = true, env = "DCFLASH_TOOL", value_name = "PATH")]
    tool: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (never prompt).
    #[arg(long, global = true, env = "DCFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options of the update flow.
#[derive(Args, Debug, Clone, Default)]
struct UpdateArgs {
    /// Directory holding the five firmware images.
    #[arg(long, env = "DCFLASH_FIRMWARE_DIR", value_name = "DIR")]
    firmware_dir: Option<PathBuf>,

    /// Build metadata JSON with flash offsets.
    #[arg(long, value_name = "FILE")]
    metadata: Option<PathBuf>,

    /// Directory the images are staged into for flashing.
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Flash mode of the first write attempt.
    #[arg(long, value_name = "MODE")]
    flash_mode: Option<FlashMode>,

    /// Flash frequency of the first write attempt.
    #[arg(long, value_name = "FREQ")]
    flash_freq: Option<FlashFrequency>,

    /// Baud rate of the first write attempt.
    #[arg(long, value_name = "BAUD")]
    flash_baud: Option<u32>,

    /// Use the esptool RAM stub for the first write attempt.
    #[arg(long)]
    stub: bool,

    /// Answer yes to confirmations in non-interactive mode.
    #[arg(short, long)]
    yes: bool,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Update the reader firmware (identity check, flash, verification).
    Update(UpdateArgs),

    /// List serial ports, likely targets first.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the device and check that it identifies as a Doppelgänger.
    Check,

    /// Reset the device and classify its boot log.
    Verify,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
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
    init_logging(cli.verbose, cli.quiet);
    debug!(
        "dcflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: give up on cleanup.
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        debug!("Ctrl-C handler not installed: {e}");
    }
    dcflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Commands::Update(args) => commands::update::cmd_update(cli, &config, args),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Check => commands::check::cmd_check(cli, &config),
        Commands::Verify => commands::check::cmd_verify(cli, &config),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<dcflash::Error>() {
        Some(dcflash::Error::Interrupted) => 130,
        _ => 1,
    }
}

fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", style(t!("error.prefix")).red().bold());
    if let Some(hint) = err
        .downcast_ref::<dcflash::Error>()
        .and_then(dcflash::Error::remediation)
    {
        eprintln!("{} {hint}", style(t!("error.hint")).yellow());
    }
}
