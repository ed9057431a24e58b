//! Terminal front end of the update flow.

use {
    crate::{serial, use_fancy_output},
    console::style,
    dcflash::{
        CapturePhase, Confirmation, DetectedPort, FlashEvent, Interaction, State, UpdateEvent,
    },
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{debug, info, trace, warn},
    rust_i18n::t,
    std::time::Duration,
};

/// Prompting and rendering settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UiOptions {
    /// Suppress status lines.
    pub quiet: bool,
    /// Echo serial output and tool output.
    pub verbose: bool,
    /// Never prompt.
    pub non_interactive: bool,
    /// Answer yes to confirmations in non-interactive mode.
    pub assume_yes: bool,
}

/// [`Interaction`] backed by the terminal.
pub struct ConsoleInteraction {
    options: UiOptions,
    bar: Option<ProgressBar>,
    no_target: bool,
}

impl ConsoleInteraction {
    pub fn new(options: UiOptions) -> Self {
        Self {
            options,
            bar: None,
            no_target: false,
        }
    }

    /// Whether a non-interactive port choice found no likely target.
    pub fn found_no_target(&self) -> bool {
        self.no_target
    }

    /// Print a status line unless quiet.
    pub fn status(&self, icon: &str, message: &str) {
        if self.options.quiet {
            return;
        }
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(format!("{icon} {message}")),
            _ => eprintln!("{icon} {message}"),
        }
    }

    fn bar(&mut self) -> &ProgressBar {
        let hidden = self.options.quiet || !use_fancy_output();
        self.bar
            .get_or_insert_with(|| {
                if hidden {
                    return ProgressBar::hidden();
                }
                let bar = ProgressBar::new(100);
                #[allow(clippy::unwrap_used)] // Static template string
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                        .unwrap()
                        .progress_chars("#>-"),
                );
                bar.set_draw_target(ProgressDrawTarget::stderr());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            })
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self
            .bar
            .take()
        {
            bar.finish_and_clear();
        }
    }

    fn on_state(&mut self, state: State) {
        debug!("State: {state:?}");
        match state {
            State::PreFlashCapture => {
                self.status(&style("⏳").yellow().to_string(), &t!("update.checking_device"));
            },
            State::Validated => {
                self.status(&style("✓").green().to_string(), &t!("update.validated"));
            },
            State::Unvalidated => {
                self.status(&style("⚠").yellow().to_string(), &t!("update.unvalidated"));
            },
            State::PostFlashCapture | State::RecoveryVerify => {
                self.finish_bar();
                self.status(&style("🔄").cyan().to_string(), &t!("update.verifying"));
            },
            State::Success => {
                self.status(
                    &style("🎉").green().bold().to_string(),
                    &t!("update.success"),
                );
            },
            State::BootLoop => {
                self.status(&style("✗").red().bold().to_string(), &t!("update.boot_loop"));
            },
            State::Unknown => {
                self.status(&style("?").yellow().bold().to_string(), &t!("update.unknown"));
            },
            State::Done => self.finish_bar(),
            _ => {},
        }
    }

    fn on_flash(&mut self, event: FlashEvent<'_>) {
        match event {
            FlashEvent::Erasing => {
                let bar = self.bar();
                bar.set_position(0);
                bar.set_message(t!("flash.erasing").to_string());
            },
            FlashEvent::Writing { params, retry } => {
                info!("Writing firmware ({params})");
                let bar = self.bar();
                bar.set_position(0);
                bar.set_message(if retry {
                    t!("flash.writing_safe").to_string()
                } else {
                    t!("flash.writing").to_string()
                });
            },
            FlashEvent::Progress { image, percent } => {
                let bar = self.bar();
                bar.set_position(u64::from(percent));
                if let Some(image) = image {
                    bar.set_message(image.progress_message());
                }
            },
            FlashEvent::Output(line) => {
                trace!("esptool: {line}");
                if self.options.verbose && !self.options.quiet {
                    match &self.bar {
                        Some(bar) if !bar.is_hidden() => bar.println(style(line).dim().to_string()),
                        _ => eprintln!("{}", style(line).dim()),
                    }
                }
            },
            FlashEvent::Retrying { failed } => {
                warn!("Write failed with {failed}, retrying with safe settings");
                self.status(&style("⚠").yellow().to_string(), &t!("flash.retrying"));
            },
        }
    }
}

impl Interaction for ConsoleInteraction {
    fn choose_port(&mut self, ports: &[DetectedPort]) -> dcflash::Result<Option<String>> {
        if self.options.non_interactive {
            let port = serial::first_target(ports);
            self.no_target = port.is_none();
            return Ok(port);
        }
        serial::select_port(ports)
    }

    fn confirm(&mut self, question: Confirmation) -> dcflash::Result<bool> {
        let prompt = match question {
            Confirmation::FlashUnvalidated => t!("confirm.flash_unvalidated"),
            Confirmation::RecoveryReflash => t!("confirm.recovery_reflash"),
        };
        if self.options.non_interactive {
            let answer = self.options.assume_yes;
            info!("{prompt} {}", if answer { "yes" } else { "no" });
            return Ok(answer);
        }
        serial::confirm(&prompt)
    }

    fn notify(&mut self, event: UpdateEvent<'_>) {
        match event {
            UpdateEvent::State(state) => self.on_state(state),
            UpdateEvent::ToolChecked { program, version } => {
                self.status(
                    &style("🔧").cyan().to_string(),
                    &t!("update.tool", version = version, program = program),
                );
            },
            UpdateEvent::Serial(text) => {
                if self.options.verbose && !self.options.quiet {
                    eprint!("{}", style(text).dim());
                }
            },
            UpdateEvent::Captured {
                phase,
                transcript,
                timed_out,
            } => {
                debug!(
                    "{phase:?} capture finished ({} bytes{})",
                    transcript.len(),
                    if timed_out { ", timed out" } else { "" }
                );
                if timed_out && phase != CapturePhase::PreFlash {
                    self.status(&style("⌛").yellow().to_string(), &t!("update.capture_timeout"));
                }
            },
            UpdateEvent::Flash(event) => self.on_flash(event),
        }
    }
}

impl Drop for ConsoleInteraction {
    fn drop(&mut self) {
        self.finish_bar();
    }
}
