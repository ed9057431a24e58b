//! External flash tool adapter.
//!
//! The updater never speaks the ROM bootloader protocol itself. It drives
//! `esptool` as a subprocess, so this module knows how to name the tool's
//! sub-commands and flags for the two dialects it ships with, how to check
//! its version, and how to run it through a [`ToolRunner`].

mod process;

pub use process::ProcessRunner;

use {
    crate::{
        error::{Error, Result},
        host::HostOs,
    },
    log::{debug, info, trace, warn},
    regex::Regex,
    semver::Version,
    std::sync::LazyLock,
};

/// Chip identifier passed to every invocation.
pub const CHIP: &str = "esp32s3";

/// Oldest esptool release the updater supports.
pub const MIN_VERSION: Version = Version::new(4, 5, 0);

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\besptool(?:\.py)?\s+v?(\d+\.\d+\.\d+)").expect("valid version regex")
});

/// Argument naming style exposed by an esptool installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `write_flash`, `--flash_mode`, `default_reset` (esptool.py era).
    Legacy,
    /// `write-flash`, `--flash-mode`, `default-reset` (esptool 5 and later).
    Modern,
}

/// Dialect-specific spellings of everything the updater passes to the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectArgs {
    /// `--before` value.
    pub before_reset: &'static str,
    /// `--after` value.
    pub after_reset: &'static str,
    /// Write sub-command.
    pub write_cmd: &'static str,
    /// Full-chip erase sub-command.
    pub erase_cmd: &'static str,
    /// Flash interface mode flag, without leading dashes.
    pub mode_flag: &'static str,
    /// Flash frequency flag, without leading dashes.
    pub freq_flag: &'static str,
    /// Flash size flag, without leading dashes.
    pub size_flag: &'static str,
    /// Chip identification sub-command, used to reset the board.
    pub chip_id_cmd: &'static str,
}

const LEGACY_ARGS: DialectArgs = DialectArgs {
    before_reset: "default_reset",
    after_reset: "hard_reset",
    write_cmd: "write_flash",
    erase_cmd: "erase_flash",
    mode_flag: "flash_mode",
    freq_flag: "flash_freq",
    size_flag: "flash_size",
    chip_id_cmd: "chip_id",
};

const MODERN_ARGS: DialectArgs = DialectArgs {
    before_reset: "default-reset",
    after_reset: "hard-reset",
    write_cmd: "write-flash",
    erase_cmd: "erase-flash",
    mode_flag: "flash-mode",
    freq_flag: "flash-freq",
    size_flag: "flash-size",
    chip_id_cmd: "chip-id",
};

impl Dialect {
    /// Pick the dialect from the tool reference and host OS.
    ///
    /// The tool is not queried: Python launchers and the Windows/macOS
    /// package names ship the legacy spelling.
    #[must_use]
    pub fn detect(tool: &str, os: HostOs) -> Self {
        if tool.contains("esptool.py") || tool.ends_with(".py") {
            return Self::Legacy;
        }
        let legacy = match os {
            HostOs::Windows => tool.ends_with("esptool.exe") || tool.ends_with("esptool"),
            HostOs::MacOs => !(tool == "esptool" || tool.ends_with("/esptool")),
            HostOs::Linux => false,
        };
        if legacy { Self::Legacy } else { Self::Modern }
    }

    /// Spellings for this dialect.
    #[must_use]
    pub fn args(self) -> DialectArgs {
        match self {
            Self::Legacy => LEGACY_ARGS,
            Self::Modern => MODERN_ARGS,
        }
    }
}

/// A resolved tool executable together with its argument dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRef {
    program: String,
    dialect: Dialect,
}

impl ToolRef {
    /// Resolve the dialect for `program` on `os`.
    pub fn new(program: impl Into<String>, os: HostOs) -> Self {
        let program = program.into();
        let dialect = Dialect::detect(&program, os);
        debug!("Using {program} with {dialect:?} argument dialect");
        Self { program, dialect }
    }

    /// Executable path or name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Dialect spellings.
    pub fn args(&self) -> DialectArgs {
        self.dialect
            .args()
    }
}

/// Exit status and merged output of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolExit {
    /// Process exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Merged stdout and stderr, one line per entry.
    pub output: String,
}

impl ToolExit {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of a failed exit, for error messages.
    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs the external tool.
///
/// `on_line` receives every line of merged stdout/stderr while the process
/// runs. Spawn failures are reported as [`Error::ToolMissing`]; a non-zero
/// exit is not an error at this level.
pub trait ToolRunner {
    /// Run `program` with `args` and wait for it to exit.
    fn run(&self, program: &str, args: &[String], on_line: &mut dyn FnMut(&str))
    -> Result<ToolExit>;
}

/// Check that `tool` is an esptool of at least [`MIN_VERSION`].
pub fn check_version(runner: &dyn ToolRunner, tool: &ToolRef) -> Result<Version> {
    let exit = runner.run(tool.program(), &["version".to_string()], &mut |line| {
        trace!("esptool: {line}");
    })?;

    if !exit.success() {
        return Err(Error::ToolIncompatible {
            tool: tool
                .program()
                .to_string(),
            reason: format!("`version` failed with {}", exit.describe()),
        });
    }

    if !exit
        .output
        .to_lowercase()
        .contains("esptool")
    {
        return Err(Error::ToolIncompatible {
            tool: tool
                .program()
                .to_string(),
            reason: "version output does not mention esptool".to_string(),
        });
    }

    let version = parse_version(&exit.output).ok_or_else(|| Error::ToolIncompatible {
        tool: tool
            .program()
            .to_string(),
        reason: "no version number in output".to_string(),
    })?;

    if version < MIN_VERSION {
        return Err(Error::VersionTooOld {
            found: version.to_string(),
            required: MIN_VERSION.to_string(),
        });
    }

    info!("esptool version {version} detected");
    Ok(version)
}

/// Extract the version from an `esptool v X.Y.Z` or `esptool.py vX.Y.Z` line.
pub fn parse_version(output: &str) -> Option<Version> {
    VERSION_RE
        .captures(output)
        .and_then(|caps| Version::parse(&caps[1]).ok())
}

/// Reset the board by asking the tool for its chip ID.
///
/// The tool routinely reports an error here even though the reset worked,
/// so every failure is logged and swallowed.
pub fn trigger_reset(runner: &dyn ToolRunner, tool: &ToolRef, port: &str) {
    let args = [
        "--chip".to_string(),
        CHIP.to_string(),
        "--port".to_string(),
        port.to_string(),
        tool.args()
            .chip_id_cmd
            .to_string(),
    ];
    debug!("Triggering reboot: {} {}", tool.program(), args.join(" "));

    match runner.run(tool.program(), &args, &mut |line| trace!("esptool: {line}")) {
        Ok(exit) if exit.success() => debug!("Reboot trigger completed"),
        Ok(exit) => debug!("Reboot trigger reported {} (expected)", exit.describe()),
        Err(e) => warn!("Reboot trigger could not run: {e}"),
    }
}
