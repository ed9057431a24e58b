//! Flash transaction engine.
//!
//! All five images go to the device in one tool invocation. A failed write
//! is retried exactly once at [`FlashParams::SAFE`]; a failure at those
//! parameters is final.

use {
    crate::{
        error::{Error, Result},
        image::{FLASH_SIZE, FlashLayout, ImageKind, StagedImages},
        tool::{CHIP, ToolExit, ToolRef, ToolRunner},
    },
    log::{debug, info, trace, warn},
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr, sync::LazyLock},
};

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Writing at (0x[0-9a-fA-F]+)\D*?(\d+)(?:\.\d+)?\s*%").expect("valid progress regex")
});

/// SPI flash interface mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    /// Quad I/O.
    Qio,
    /// Quad output.
    Qout,
    /// Dual I/O.
    Dio,
    /// Dual output.
    Dout,
}

impl FlashMode {
    /// Tool spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qio => "qio",
            Self::Qout => "qout",
            Self::Dio => "dio",
            Self::Dout => "dout",
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlashMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "qio" => Ok(Self::Qio),
            "qout" => Ok(Self::Qout),
            "dio" => Ok(Self::Dio),
            "dout" => Ok(Self::Dout),
            other => Err(format!(
                "unknown flash mode `{other}` (expected qio, qout, dio or dout)"
            )),
        }
    }
}

/// SPI flash clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashFrequency {
    /// 80 MHz.
    #[serde(rename = "80m")]
    F80m,
    /// 40 MHz.
    #[serde(rename = "40m")]
    F40m,
    /// 26 MHz.
    #[serde(rename = "26m")]
    F26m,
    /// 20 MHz.
    #[serde(rename = "20m")]
    F20m,
}

impl FlashFrequency {
    /// Tool spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F80m => "80m",
            Self::F40m => "40m",
            Self::F26m => "26m",
            Self::F20m => "20m",
        }
    }
}

impl fmt::Display for FlashFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlashFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "80m" => Ok(Self::F80m),
            "40m" => Ok(Self::F40m),
            "26m" => Ok(Self::F26m),
            "20m" => Ok(Self::F20m),
            other => Err(format!(
                "unknown flash frequency `{other}` (expected 80m, 40m, 26m or 20m)"
            )),
        }
    }
}

/// Parameters of one write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashParams {
    /// Interface mode.
    pub mode: FlashMode,
    /// Clock frequency.
    pub frequency: FlashFrequency,
    /// Serial baud rate.
    pub baud: u32,
    /// Run the tool's RAM stub loader.
    pub use_stub: bool,
}

impl FlashParams {
    /// Conservative baseline that works on every board seen so far.
    pub const SAFE: Self = Self {
        mode: FlashMode::Dio,
        frequency: FlashFrequency::F40m,
        baud: 115_200,
        use_stub: false,
    };

    /// Whether these are the safe baseline parameters.
    pub fn is_safe(&self) -> bool {
        *self == Self::SAFE
    }
}

impl Default for FlashParams {
    fn default() -> Self {
        Self::SAFE
    }
}

impl fmt::Display for FlashParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} freq={} baud={} stub={}",
            self.mode,
            self.frequency,
            self.baud,
            if self.use_stub { "yes" } else { "no" }
        )
    }
}

/// Progress notifications from a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent<'a> {
    /// Full-chip erase started.
    Erasing,
    /// A write attempt started.
    Writing {
        /// Parameters of this attempt.
        params: FlashParams,
        /// Whether this is the safe-parameter retry.
        retry: bool,
    },
    /// The tool reported write progress.
    Progress {
        /// Image being written, if the address maps to one.
        image: Option<ImageKind>,
        /// Percentage of the current image.
        percent: u8,
    },
    /// A raw line of tool output.
    Output(&'a str),
    /// The first attempt failed; retrying at safe parameters.
    Retrying {
        /// Parameters that failed.
        failed: FlashParams,
    },
}

/// Parse a `Writing at 0x… (NN %)` progress line.
pub fn parse_progress(line: &str) -> Option<(u32, u8)> {
    let caps = PROGRESS_RE.captures(line)?;
    let address = u32::from_str_radix(caps[1].trim_start_matches("0x"), 16).ok()?;
    let percent = caps[2]
        .parse::<u8>()
        .ok()?
        .min(100);
    Some((address, percent))
}

/// Builds and runs write and erase transactions.
pub struct FlashEngine<'a> {
    runner: &'a dyn ToolRunner,
    tool: &'a ToolRef,
}

impl<'a> FlashEngine<'a> {
    /// Engine driving `tool` through `runner`.
    pub fn new(runner: &'a dyn ToolRunner, tool: &'a ToolRef) -> Self {
        Self { runner, tool }
    }

    fn base_args(&self, port: &str, baud: u32) -> Vec<String> {
        let args = self.tool.args();
        vec![
            "--chip".to_string(),
            CHIP.to_string(),
            "--port".to_string(),
            port.to_string(),
            "--baud".to_string(),
            baud.to_string(),
            "--before".to_string(),
            args.before_reset.to_string(),
            "--after".to_string(),
            args.after_reset.to_string(),
        ]
    }

    /// Argument vector of a write transaction.
    pub fn write_args(
        &self,
        port: &str,
        layout: &FlashLayout,
        images: &StagedImages,
        params: FlashParams,
    ) -> Vec<String> {
        let dialect = self.tool.args();
        let mut args = self.base_args(port, params.baud);
        if !params.use_stub {
            args.push("--no-stub".into());
        }
        args.push(dialect.write_cmd.into());
        args.push("-z".into());
        args.extend([
            format!("--{}", dialect.mode_flag),
            params.mode.to_string(),
            format!("--{}", dialect.freq_flag),
            params.frequency.to_string(),
            format!("--{}", dialect.size_flag),
            FLASH_SIZE.to_string(),
        ]);
        for kind in ImageKind::ALL {
            args.push(layout.offset_arg(kind));
            args.push(
                images
                    .path(kind)
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        args
    }

    /// Argument vector of a full-chip erase.
    pub fn erase_args(&self, port: &str, baud: u32) -> Vec<String> {
        let mut args = self.base_args(port, baud);
        args.push(
            self.tool
                .args()
                .erase_cmd
                .into(),
        );
        args
    }

    /// Write all five images, erasing the chip first if asked.
    ///
    /// Returns the parameters that succeeded. Erase failures are final;
    /// a write failure above the safe baseline is retried once at it.
    pub fn flash_all(
        &self,
        port: &str,
        layout: &FlashLayout,
        images: &StagedImages,
        erase_first: bool,
        params: FlashParams,
        on_event: &mut dyn FnMut(FlashEvent<'_>),
    ) -> Result<FlashParams> {
        images.ensure_present()?;
        debug!("Flash layout: {layout}");

        if erase_first {
            self.erase(port, params.baud, on_event)?;
        }

        let mut attempt = params;
        let mut retry = false;
        loop {
            on_event(FlashEvent::Writing {
                params: attempt,
                retry,
            });
            info!("Writing firmware ({attempt})");

            let args = self.write_args(port, layout, images, attempt);
            let exit = self.run(&args, layout, on_event)?;
            if exit.success() {
                info!("Write transaction completed");
                return Ok(attempt);
            }

            if attempt.is_safe() {
                return Err(Error::WriteFailed {
                    command: self
                        .tool
                        .args()
                        .write_cmd
                        .to_string(),
                    reason: exit.describe(),
                });
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            warn!(
                "Write failed with {} at {attempt}, retrying with safe parameters",
                exit.describe()
            );
            on_event(FlashEvent::Retrying { failed: attempt });
            attempt = FlashParams::SAFE;
            retry = true;
        }
    }

    fn erase(
        &self,
        port: &str,
        baud: u32,
        on_event: &mut dyn FnMut(FlashEvent<'_>),
    ) -> Result<()> {
        on_event(FlashEvent::Erasing);
        info!("Erasing entire flash");

        let args = self.erase_args(port, baud);
        let exit = self.run(&args, &FlashLayout::defaults(), on_event)?;
        if exit.success() {
            Ok(())
        } else {
            Err(Error::EraseFailed {
                command: self
                    .tool
                    .args()
                    .erase_cmd
                    .to_string(),
                reason: exit.describe(),
            })
        }
    }

    fn run(
        &self,
        args: &[String],
        layout: &FlashLayout,
        on_event: &mut dyn FnMut(FlashEvent<'_>),
    ) -> Result<ToolExit> {
        debug!("Executing: {} {}", self.tool.program(), args.join(" "));
        self.runner
            .run(self.tool.program(), args, &mut |line| {
                trace!("esptool: {line}");
                on_event(FlashEvent::Output(line));
                if let Some((address, percent)) = parse_progress(line) {
                    on_event(FlashEvent::Progress {
                        image: layout.image_at(address),
                        percent,
                    });
                }
            })
    }
}
