//! Update orchestration.
//!
//! ```text
//! Idle -> ToolReady -> PortSelected -> PreFlashCapture -+-> Validated ---+
//!                                                       |                |
//!                                                       +-> Unvalidated -+-> (declined) Done
//!                                                                        v
//!        Done <- {Success | Unknown} <- PostFlashCapture <------- Flashing
//!                      ^                         |
//!                      |                      BootLoop -> RecoveryConfirm -> (declined) Done
//!                      |                                        |
//!                      +------ RecoveryVerify <- RecoveryFlashing
//! ```
//!
//! Every decision that needs a human goes through [`Interaction`]. Staged
//! images are removed and capture logs deleted on every exit path.

use {
    crate::{
        capture::{
            self, BootClassifier, BootMarkers, CaptureOptions, FlashOutcome, LineLimit,
            POST_FLASH_TIMEOUT, PRE_FLASH_LINES, PRE_FLASH_TIMEOUT, validate_identity,
        },
        device::{self, DetectedPort},
        error::{Error, Result},
        flash::{FlashEngine, FlashEvent, FlashParams},
        host::Platform,
        image::{FlashLayout, StagedImages},
        port::{CAPTURE_BAUD, SerialOpener},
        tool::{self, ToolRef, ToolRunner},
    },
    log::{debug, info, warn},
    semver::Version,
    serde::Serialize,
    std::{
        path::PathBuf,
        thread,
        time::{Duration, Instant},
    },
};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    /// Nothing done yet.
    Idle,
    /// The flash tool passed its version check.
    ToolReady,
    /// A port was chosen.
    PortSelected,
    /// Listening to the boot log before flashing.
    PreFlashCapture,
    /// The device identified itself.
    Validated,
    /// The device did not identify itself.
    Unvalidated,
    /// Writing the images.
    Flashing,
    /// Listening to the boot log after flashing.
    PostFlashCapture,
    /// The firmware came up.
    Success,
    /// The firmware resets repeatedly or faulted.
    BootLoop,
    /// Nothing conclusive was heard.
    Unknown,
    /// Asking whether to run a recovery reflash.
    RecoveryConfirm,
    /// Erasing and rewriting at safe parameters.
    RecoveryFlashing,
    /// Listening to the boot log after recovery.
    RecoveryVerify,
    /// Cleanup finished.
    Done,
}

impl From<FlashOutcome> for State {
    fn from(outcome: FlashOutcome) -> Self {
        match outcome {
            FlashOutcome::Success => Self::Success,
            FlashOutcome::BootLoop => Self::BootLoop,
            FlashOutcome::Unknown => Self::Unknown,
        }
    }
}

/// Questions the orchestrator asks before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Flash a device that did not identify itself.
    FlashUnvalidated,
    /// Erase the chip and reflash at safe parameters.
    RecoveryReflash,
}

/// Which capture produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    /// Identity check before flashing.
    PreFlash,
    /// Health check after flashing.
    PostFlash,
    /// Health check after a recovery reflash.
    Recovery,
}

/// Progress notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent<'a> {
    /// The state machine moved.
    State(State),
    /// The tool version was accepted.
    ToolChecked {
        /// Tool executable.
        program: &'a str,
        /// Reported version.
        version: &'a Version,
    },
    /// Boot output as it arrives.
    Serial(&'a str),
    /// A capture finished.
    Captured {
        /// Which capture.
        phase: CapturePhase,
        /// Whole transcript as display text.
        transcript: &'a str,
        /// Whether it hit its time bound.
        timed_out: bool,
    },
    /// Flash transaction progress.
    Flash(FlashEvent<'a>),
}

/// The human (or policy) in the loop.
pub trait Interaction {
    /// Pick a port from `ports`, likely targets first. `None` cancels.
    fn choose_port(&mut self, ports: &[DetectedPort]) -> Result<Option<String>>;

    /// Answer an escalation question.
    fn confirm(&mut self, question: Confirmation) -> Result<bool>;

    /// Receive a progress notification.
    fn notify(&mut self, event: UpdateEvent<'_>);
}

/// Delays and bounds of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait after the reset trigger before the pre-flash capture.
    pub pre_flash_settle: Duration,
    /// Wait after the reset trigger before a post-flash capture.
    pub post_flash_settle: Duration,
    /// Bound on the pre-flash capture.
    pub pre_flash_timeout: Duration,
    /// Bound on a post-flash capture.
    pub post_flash_timeout: Duration,
    /// Lines read for pre-flash validation.
    pub pre_flash_lines: usize,
    /// Grace period for a capture reader to release the port.
    pub reader_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pre_flash_settle: Duration::from_secs(3),
            post_flash_settle: Duration::from_secs(2),
            pre_flash_timeout: PRE_FLASH_TIMEOUT,
            post_flash_timeout: POST_FLASH_TIMEOUT,
            pre_flash_lines: PRE_FLASH_LINES,
            reader_grace: Duration::from_millis(500),
        }
    }
}

/// Options of an update run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Port to use without asking.
    pub port: Option<String>,
    /// Parameters of the first write attempt.
    pub params: FlashParams,
    /// Delays and bounds.
    pub timing: Timing,
    /// Boot markers.
    pub markers: BootMarkers,
    /// Directory for capture log artifacts, `None` disables them.
    pub log_dir: Option<PathBuf>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            port: None,
            params: FlashParams::SAFE,
            timing: Timing::default(),
            markers: BootMarkers::default(),
            log_dir: Some(std::env::temp_dir()),
        }
    }
}

/// Why a run stopped without flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// No port was chosen.
    NoPortChosen,
    /// Flashing an unvalidated device was declined.
    UnvalidatedDeclined,
}

/// What happened after a boot loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "recovery", rename_all = "kebab-case")]
pub enum Recovery {
    /// The first verification did not find a boot loop.
    NotNeeded,
    /// The recovery reflash was declined.
    Declined,
    /// The recovery reflash ran; this is its verification outcome.
    Performed {
        /// Outcome after recovery.
        outcome: FlashOutcome,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UpdateStatus {
    /// Stopped before flashing.
    Cancelled {
        /// Reason.
        reason: CancelReason,
    },
    /// Flashed and verified.
    Finished {
        /// Outcome of the first verification.
        first: FlashOutcome,
        /// Recovery path taken.
        recovery: Recovery,
    },
}

impl UpdateStatus {
    /// Final outcome, after recovery if one ran.
    pub fn outcome(&self) -> Option<FlashOutcome> {
        match self {
            Self::Cancelled { .. } => None,
            Self::Finished {
                recovery: Recovery::Performed { outcome },
                ..
            } => Some(*outcome),
            Self::Finished { first, .. } => Some(*first),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// Port used, if one was chosen.
    pub port: Option<String>,
    /// Pre-flash validation result, if it ran.
    pub validated: Option<bool>,
    /// How the run ended.
    pub status: UpdateStatus,
    /// States visited, in order.
    pub trail: Vec<State>,
}

/// Drives one device through the update flow.
pub struct Updater<'a> {
    platform: &'a dyn Platform,
    runner: &'a dyn ToolRunner,
    opener: &'a dyn SerialOpener,
    tool: ToolRef,
    options: UpdateOptions,
    trail: Vec<State>,
}

impl<'a> Updater<'a> {
    /// Updater with the given collaborators.
    pub fn new(
        platform: &'a dyn Platform,
        runner: &'a dyn ToolRunner,
        opener: &'a dyn SerialOpener,
        tool: ToolRef,
        options: UpdateOptions,
    ) -> Self {
        Self {
            platform,
            runner,
            opener,
            tool,
            options,
            trail: vec![State::Idle],
        }
    }

    /// States visited so far.
    pub fn trail(&self) -> &[State] {
        &self.trail
    }

    /// Run the full flow. Images are cleaned up whatever the result.
    pub fn run(
        &mut self,
        images: &mut StagedImages,
        layout: &FlashLayout,
        interaction: &mut dyn Interaction,
    ) -> Result<UpdateReport> {
        let started = Instant::now();
        let result = self.run_flow(images, layout, interaction);

        images.cleanup();
        self.enter(State::Done, interaction);
        info!("Update flow finished in {:?}", started.elapsed());

        let (port, validated, status) = result?;
        Ok(UpdateReport {
            port,
            validated,
            status,
            trail: self
                .trail
                .clone(),
        })
    }

    fn run_flow(
        &mut self,
        images: &StagedImages,
        layout: &FlashLayout,
        interaction: &mut dyn Interaction,
    ) -> Result<(Option<String>, Option<bool>, UpdateStatus)> {
        self.prepare_tool(interaction)?;

        let Some(port) = self.select_port(interaction)? else {
            return Ok((
                None,
                None,
                UpdateStatus::Cancelled {
                    reason: CancelReason::NoPortChosen,
                },
            ));
        };

        let validated = self.pre_flash(&port, interaction)?;
        if !validated && !interaction.confirm(Confirmation::FlashUnvalidated)? {
            info!("Flashing an unvalidated device was declined");
            return Ok((
                Some(port),
                Some(false),
                UpdateStatus::Cancelled {
                    reason: CancelReason::UnvalidatedDeclined,
                },
            ));
        }

        checkpoint()?;
        self.enter(State::Flashing, interaction);
        self.flash(&port, layout, images, false, self.options.params, interaction)?;

        checkpoint()?;
        self.enter(State::PostFlashCapture, interaction);
        let first = self.verify(&port, CapturePhase::PostFlash, interaction)?;
        self.enter(first.into(), interaction);

        let recovery = match first {
            FlashOutcome::Success | FlashOutcome::Unknown => Recovery::NotNeeded,
            FlashOutcome::BootLoop => self.recover(&port, layout, images, interaction)?,
        };

        Ok((
            Some(port),
            Some(validated),
            UpdateStatus::Finished { first, recovery },
        ))
    }

    fn recover(
        &mut self,
        port: &str,
        layout: &FlashLayout,
        images: &StagedImages,
        interaction: &mut dyn Interaction,
    ) -> Result<Recovery> {
        self.enter(State::RecoveryConfirm, interaction);
        if !interaction.confirm(Confirmation::RecoveryReflash)? {
            info!("Recovery reflash declined");
            return Ok(Recovery::Declined);
        }

        checkpoint()?;
        self.enter(State::RecoveryFlashing, interaction);
        self.flash(port, layout, images, true, FlashParams::SAFE, interaction)?;

        checkpoint()?;
        self.enter(State::RecoveryVerify, interaction);
        let outcome = self.verify(port, CapturePhase::Recovery, interaction)?;
        self.enter(outcome.into(), interaction);

        Ok(Recovery::Performed { outcome })
    }

    /// Check the flash tool version.
    pub fn prepare_tool(&mut self, interaction: &mut dyn Interaction) -> Result<Version> {
        let version = tool::check_version(self.runner, &self.tool)?;
        interaction.notify(UpdateEvent::ToolChecked {
            program: self
                .tool
                .program(),
            version: &version,
        });
        self.enter(State::ToolReady, interaction);
        Ok(version)
    }

    /// Use the configured port, or let `interaction` pick one.
    ///
    /// Returns `None` when no port was chosen.
    pub fn select_port(&mut self, interaction: &mut dyn Interaction) -> Result<Option<String>> {
        let port = match self
            .options
            .port
            .clone()
        {
            Some(port) => port,
            None => {
                let ports = device::list_candidate_ports(self.platform)?;
                match interaction.choose_port(&ports)? {
                    Some(port) => port,
                    None => return Ok(None),
                }
            },
        };

        self.platform
            .check_access(&port)?;
        info!("Using port {port}");
        self.enter(State::PortSelected, interaction);
        Ok(Some(port))
    }

    /// Reset the device and look for its identity in the boot log.
    ///
    /// A port that cannot be opened here is fatal.
    pub fn pre_flash(&mut self, port: &str, interaction: &mut dyn Interaction) -> Result<bool> {
        checkpoint()?;
        self.enter(State::PreFlashCapture, interaction);
        let timing = self.options.timing;

        tool::trigger_reset(self.runner, &self.tool, port);
        settle(timing.pre_flash_settle)?;

        let options = self.capture_options(timing.pre_flash_timeout);
        let mut watcher = LineLimit::new(timing.pre_flash_lines);
        let mut session = capture::capture(
            self.opener,
            port,
            &options,
            &mut watcher,
            &mut |text| interaction.notify(UpdateEvent::Serial(text)),
        )?;

        let validated = validate_identity(&session.transcript, &self.options.markers);
        interaction.notify(UpdateEvent::Captured {
            phase: CapturePhase::PreFlash,
            transcript: &session.text(),
            timed_out: session.timed_out(),
        });
        session.discard_log();

        debug!("Pre-flash validation: {validated} ({} lines)", watcher.seen());
        self.enter(
            if validated {
                State::Validated
            } else {
                State::Unvalidated
            },
            interaction,
        );
        Ok(validated)
    }

    /// Reset the device and classify its boot log.
    ///
    /// An unusable port counts as [`FlashOutcome::Unknown`].
    pub fn verify(
        &mut self,
        port: &str,
        phase: CapturePhase,
        interaction: &mut dyn Interaction,
    ) -> Result<FlashOutcome> {
        let timing = self.options.timing;

        tool::trigger_reset(self.runner, &self.tool, port);
        settle(timing.post_flash_settle)?;

        let options = self.capture_options(timing.post_flash_timeout);
        let mut classifier = BootClassifier::new(
            self.options
                .markers
                .clone(),
        );
        let captured = capture::capture(
            self.opener,
            port,
            &options,
            &mut classifier,
            &mut |text| interaction.notify(UpdateEvent::Serial(text)),
        );
        let mut session = match captured {
            Ok(session) => session,
            Err(e) if e.is_port_unavailable() => {
                warn!("Cannot read {port} for verification: {e}");
                return Ok(FlashOutcome::Unknown);
            },
            Err(e) => return Err(e),
        };

        let outcome = session.outcome();
        interaction.notify(UpdateEvent::Captured {
            phase,
            transcript: &session.text(),
            timed_out: session.timed_out(),
        });
        session.discard_log();

        info!("Post-flash verification: {outcome:?}");
        Ok(outcome)
    }

    fn flash(
        &self,
        port: &str,
        layout: &FlashLayout,
        images: &StagedImages,
        erase_first: bool,
        params: FlashParams,
        interaction: &mut dyn Interaction,
    ) -> Result<FlashParams> {
        FlashEngine::new(self.runner, &self.tool).flash_all(
            port,
            layout,
            images,
            erase_first,
            params,
            &mut |event| interaction.notify(UpdateEvent::Flash(event)),
        )
    }

    fn capture_options(&self, timeout: Duration) -> CaptureOptions {
        CaptureOptions {
            baud: CAPTURE_BAUD,
            timeout,
            grace: self
                .options
                .timing
                .reader_grace,
            log_dir: self
                .options
                .log_dir
                .clone(),
            ..CaptureOptions::default()
        }
    }

    fn enter(&mut self, state: State, interaction: &mut dyn Interaction) {
        debug!("State: {state:?}");
        self.trail
            .push(state);
        interaction.notify(UpdateEvent::State(state));
    }
}

fn checkpoint() -> Result<()> {
    if crate::is_interrupted_requested() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Sleep for `delay`, waking early to honour interrupt requests.
fn settle(delay: Duration) -> Result<()> {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + delay;
    loop {
        checkpoint()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(step));
    }
}
