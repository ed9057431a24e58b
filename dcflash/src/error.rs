//! Error types for dcflash.
//!
//! Only conditions that stop a run are errors. What the device printed
//! after a flash (boot loop, silence, a crash signature) is reported as
//! [`FlashOutcome`](crate::capture::FlashOutcome) data instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for dcflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dcflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (log artifacts, image staging).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error raised by the native backend.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The host reported no serial devices at all.
    #[error("No serial ports found")]
    NoPortsFound,

    /// The selected serial port could not be opened.
    #[error("Serial port {port} is unavailable: {reason}")]
    PortUnavailable {
        /// Port name/path.
        port: String,
        /// Reason reported by the operating system.
        reason: String,
    },

    /// The current user may not open the serial device.
    #[error("Permission denied accessing {0}")]
    PermissionDenied(String),

    /// The external flash tool could not be started.
    #[error("Flash tool `{tool}` could not be started: {reason}")]
    ToolMissing {
        /// Tool reference that was invoked.
        tool: String,
        /// Reason reported when spawning.
        reason: String,
    },

    /// The external flash tool answered, but not like a supported esptool.
    #[error("Flash tool `{tool}` is not a compatible esptool: {reason}")]
    ToolIncompatible {
        /// Tool reference that was invoked.
        tool: String,
        /// What was wrong with its answer.
        reason: String,
    },

    /// The external flash tool is older than the supported floor.
    #[error("esptool version is {found}. Version {required} or later is required")]
    VersionTooOld {
        /// Version reported by the tool.
        found: String,
        /// Minimum supported version.
        required: String,
    },

    /// A firmware image required for the transaction is absent or empty.
    #[error("Required image missing: {}", .0.display())]
    MissingImage(PathBuf),

    /// Full-chip erase failed.
    #[error("{command} failed: {reason}")]
    EraseFailed {
        /// Dialect-specific erase sub-command.
        command: String,
        /// Exit status or spawn failure.
        reason: String,
    },

    /// The write transaction failed at the safe baseline parameters.
    #[error("{command} failed with safe settings: {reason}")]
    WriteFailed {
        /// Dialect-specific write sub-command.
        command: String,
        /// Exit status or spawn failure.
        reason: String,
    },

    /// Build metadata could not be parsed.
    #[error("Invalid build metadata: {0}")]
    Metadata(String),

    /// The embedding application requested a stop.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Remediation hint shown to the user before the process exits.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::NoPortsFound => Some("Please ensure your ESP32 device is connected via USB."),
            Self::PortUnavailable { .. } => {
                Some("Close any serial monitor using the port and reconnect the device.")
            },
            Self::PermissionDenied(_) => Some(
                "You need to be in the dialout group to access serial ports. Run `newgrp dialout` \
                 or log out and back in, then run the updater again.",
            ),
            Self::ToolMissing { .. } => Some(
                "Install esptool (`pip install esptool`, `brew install esptool` or your package \
                 manager) or pass its location with --tool.",
            ),
            Self::ToolIncompatible { .. } | Self::VersionTooOld { .. } => {
                Some("Upgrade esptool to 4.5.0 or later: `pip install --upgrade esptool`.")
            },
            Self::MissingImage(_) => {
                Some("This firmware bundle may have been built incorrectly. Re-download it.")
            },
            Self::EraseFailed { .. } | Self::WriteFailed { .. } => Some(
                "Hold BOOT while plugging the device in to force download mode, then try again.",
            ),
            _ => None,
        }
    }

    /// Whether the error means the serial port could not be used.
    pub fn is_port_unavailable(&self) -> bool {
        matches!(self, Self::PortUnavailable { .. } | Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_carry_remediation() {
        assert!(Error::NoPortsFound.remediation().is_some());
        assert!(
            Error::MissingImage(PathBuf::from("bootloader.bin"))
                .remediation()
                .is_some()
        );
        assert!(
            Error::VersionTooOld {
                found: "4.2.1".into(),
                required: "4.5.0".into(),
            }
            .remediation()
            .is_some()
        );
        assert!(Error::Interrupted.remediation().is_none());
    }

    #[test]
    fn test_write_failed_message_names_command() {
        let err = Error::WriteFailed {
            command: "write-flash".into(),
            reason: "exit status: 2".into(),
        };
        assert_eq!(
            err.to_string(),
            "write-flash failed with safe settings: exit status: 2"
        );
    }

    #[test]
    fn test_port_unavailable_classification() {
        let err = Error::PortUnavailable {
            port: "/dev/ttyACM0".into(),
            reason: "busy".into(),
        };
        assert!(err.is_port_unavailable());
        assert!(!Error::NoPortsFound.is_port_unavailable());
    }
}
