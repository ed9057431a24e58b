//! # dcflash
//!
//! A library for provisioning Doppelgänger readers (ESP32-S3) through
//! `esptool`.
//!
//! The crate covers everything between "a board is plugged in" and "the new
//! firmware is confirmed running":
//!
//! - Serial port discovery and target classification
//! - esptool resolution, dialect detection and version check
//! - Flash layout with build-metadata overrides and image staging
//! - Bounded boot-log capture and classification
//! - The write transaction with a single safe-parameter retry
//! - The update state machine with its recovery reflash path
//!
//! ## Features
//!
//! - `native` (default): serial ports through the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use dcflash::{
//!     Confirmation, DetectedPort, FlashLayout, Interaction, NativeOpener, ProcessRunner,
//!     StagedImages, ToolRef, UpdateEvent, UpdateOptions, Updater, host,
//! };
//! use std::path::Path;
//!
//! struct Yes;
//!
//! impl Interaction for Yes {
//!     fn choose_port(&mut self, ports: &[DetectedPort]) -> dcflash::Result<Option<String>> {
//!         Ok(ports.first().map(|p| p.name.clone()))
//!     }
//!
//!     fn confirm(&mut self, _question: Confirmation) -> dcflash::Result<bool> {
//!         Ok(true)
//!     }
//!
//!     fn notify(&mut self, event: UpdateEvent<'_>) {
//!         println!("{event:?}");
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = host::current();
//!     let tool = ToolRef::new(platform.resolve_tool(), platform.os());
//!     let mut images = StagedImages::stage(Path::new("firmware"), Path::new("work"))?;
//!     let layout = FlashLayout::with_build_metadata(Path::new("idedata.json"));
//!
//!     let runner = ProcessRunner;
//!     let opener = NativeOpener;
//!     let mut updater = Updater::new(
//!         platform.as_ref(),
//!         &runner,
//!         &opener,
//!         tool,
//!         UpdateOptions::default(),
//!     );
//!     let report = updater.run(&mut images, &layout, &mut Yes)?;
//!     println!("{:?}", report.status);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod capture;
pub mod device;
pub mod error;
pub mod flash;
pub mod host;
pub mod image;
pub mod port;
pub mod tool;
pub mod update;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Captures and
/// settle delays poll it; the update flow checks it between phases.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePortEnumerator};
pub use {
    capture::{BootMarkers, BootVerdict, CaptureOptions, CaptureSession, FlashOutcome},
    device::{DetectedPort, DeviceKind, MatchReason, list_candidate_ports},
    error::{Error, Result},
    flash::{FlashEngine, FlashEvent, FlashFrequency, FlashMode, FlashParams},
    host::{HostOs, Platform},
    image::{DeviceProfile, FlashLayout, ImageKind, StagedImages},
    port::{PortEnumerator, PortInfo, SerialConfig, SerialOpener},
    tool::{Dialect, ProcessRunner, ToolExit, ToolRef, ToolRunner},
    update::{
        CancelReason, CapturePhase, Confirmation, Interaction, Recovery, State, Timing,
        UpdateEvent, UpdateOptions, UpdateReport, UpdateStatus, Updater,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
