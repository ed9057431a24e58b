//! Port abstraction for serial capture.
//!
//! The capture reader only ever consumes bytes from the device, so the
//! abstraction here is read-side: a [`SerialOpener`] hands out
//! a boxed [`std::io::Read`] for one capture session, and a
//! [`PortEnumerator`] lists what the host can see.
//!
//! ```text
//! +-------------------+        +-------------------+
//! |  capture session  |        |  device::classify |
//! +---------+---------+        +---------+---------+
//!           |                            |
//!           v                            v
//! +---------+---------+        +---------+---------+
//! |   SerialOpener    |        |  PortEnumerator   |
//! +---------+---------+        +---------+---------+
//!           |                            |
//!           v                            v
//! +---------+---------+        +---------+---------+
//! |   NativeOpener    |        | NativeEnumerator  |
//! |   (serialport)    |        |   (serialport)    |
//! +-------------------+        +-------------------+
//! ```
//!
//! Tests substitute scripted byte streams for the opener.

#[cfg(feature = "native")]
pub mod native;

use std::io::Read;
use std::time::Duration;

use crate::error::Result;

/// Baud rate used for every boot-log capture.
pub const CAPTURE_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// Captures always run at 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout. Kept short so readers can observe stop requests.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: CAPTURE_BAUD,
            timeout: Duration::from_millis(250),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the per-read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Raw serial port information as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Create port info carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Human-readable description used for keyword classification.
    ///
    /// Prefers the USB product string and falls back to the manufacturer.
    pub fn description(&self) -> Option<&str> {
        self.product
            .as_deref()
            .or(self.manufacturer.as_deref())
            .filter(|d| !d.trim().is_empty())
    }
}

/// Byte stream handed to a capture session.
pub type SerialStream = Box<dyn Read + Send>;

/// Opens a serial device for reading.
///
/// One stream is opened per capture session and dropped when the session's
/// reader finishes, so the same physical port can be reopened afterwards.
pub trait SerialOpener: Send + Sync {
    /// Open the device described by `config`.
    ///
    /// Failures are reported as [`Error::PortUnavailable`](crate::Error::PortUnavailable).
    fn open(&self, config: &SerialConfig) -> Result<SerialStream>;
}

/// Trait for listing available serial ports.
///
/// This is separated from [`SerialOpener`] because it's a static operation
/// that doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePortEnumerator};
