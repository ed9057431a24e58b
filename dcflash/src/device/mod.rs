//! Serial port discovery and target classification.
//!
//! Every enumeration call produces fresh [`DetectedPort`] values. Ports that
//! look like an ESP32-S3 reader (or a USB-UART bridge commonly wired to one)
//! are ordered first; everything else follows in discovery order.

use {
    crate::{
        error::{Error, Result},
        host::Platform,
        port::PortInfo,
    },
    log::{debug, trace},
    serde::Serialize,
};

/// Known USB bridge/device kinds commonly wired to ESP32 boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Espressif native USB (USB-Serial/JTAG or TinyUSB CDC).
    Espressif,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// WCH CH340/CH341/CH9102 USB-to-Serial converter.
    Ch34x,
    /// Raspberry Pi RP2040 CDC device, sometimes used as a bridge.
    RaspberryPi,
    /// Unknown device.
    Unknown,
}

/// Vendor IDs that mark a port as a likely target on their own.
const KNOWN_VENDORS: &[(u16, DeviceKind)] = &[
    (0x303A, DeviceKind::Espressif),
    (0x10C4, DeviceKind::Cp210x),
    (0x0403, DeviceKind::Ftdi),
    (0x1A86, DeviceKind::Ch34x),
    (0x2E8A, DeviceKind::RaspberryPi),
];

/// Description keywords, matched case-insensitively, with the kind they imply.
const KNOWN_KEYWORDS: &[(&str, DeviceKind)] = &[
    ("esp32", DeviceKind::Espressif),
    ("esp-32", DeviceKind::Espressif),
    ("espressif", DeviceKind::Espressif),
    ("cp210", DeviceKind::Cp210x),
    ("silicon labs", DeviceKind::Cp210x),
    ("ch340", DeviceKind::Ch34x),
    ("ch341", DeviceKind::Ch34x),
    ("ch9102", DeviceKind::Ch34x),
    ("ftdi", DeviceKind::Ftdi),
    ("usb-serial", DeviceKind::Unknown),
    ("uart bridge", DeviceKind::Unknown),
    ("communication device class", DeviceKind::Unknown),
    ("cdc", DeviceKind::Unknown),
];

/// Port-name fragments, matched case-insensitively, typical of USB serial nodes.
const NAME_PATTERNS: &[&str] = &[
    "usbmodem",
    "usbserial",
    "ttyusb",
    "ttyacm",
    "cu.wchusbserial",
    "cu.slab_usbtouart",
];

/// Phrase that hosts use for generic CDC-ACM devices.
const GENERIC_USB_SERIAL: &str = "usb serial";

impl DeviceKind {
    /// Classify by USB vendor ID alone.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        KNOWN_VENDORS
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Espressif => "Espressif USB",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Ch34x => "CH34x",
            Self::RaspberryPi => "Raspberry Pi USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Which heuristic marked a port as a likely target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    /// Vendor ID is on the allow-list.
    VendorId,
    /// Description contains a chipset or vendor keyword.
    Keyword,
    /// Generic "USB serial" description without any vendor ID.
    GenericUsbSerial,
    /// Port name looks like a USB serial node.
    NamePattern,
}

/// Discovered serial port with its classification.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Description used for classification (if available).
    pub description: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
    /// Heuristic that matched, `None` for "other" ports.
    pub matched: Option<MatchReason>,
}

impl DetectedPort {
    /// Classify a raw port.
    #[must_use]
    pub fn classify(info: PortInfo) -> Self {
        let description = info
            .description()
            .map(str::to_owned);
        let (device, matched) = classify_parts(&info.name, info.vid, description.as_deref());

        trace!(
            "Classified {} (VID: {:?}, description: {:?}) as {:?} via {:?}",
            info.name, info.vid, description, device, matched
        );

        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            description,
            serial: info.serial_number,
            matched,
        }
    }

    /// Whether this port is likely the target device.
    pub fn is_likely_target(&self) -> bool {
        self.matched
            .is_some()
    }
}

fn classify_parts(
    name: &str,
    vid: Option<u16>,
    description: Option<&str>,
) -> (DeviceKind, Option<MatchReason>) {
    if let Some(vid) = vid {
        let kind = DeviceKind::from_vid(vid);
        if kind.is_known() {
            return (kind, Some(MatchReason::VendorId));
        }
    }

    if let Some(description) = description {
        let lower = description.to_lowercase();

        if let Some((_, kind)) = KNOWN_KEYWORDS
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
        {
            return (*kind, Some(MatchReason::Keyword));
        }

        if vid.is_none() && lower.contains(GENERIC_USB_SERIAL) {
            return (DeviceKind::Unknown, Some(MatchReason::GenericUsbSerial));
        }
    }

    let name = name.to_lowercase();
    if NAME_PATTERNS
        .iter()
        .any(|pattern| name.contains(pattern))
    {
        return (DeviceKind::Unknown, Some(MatchReason::NamePattern));
    }

    (DeviceKind::Unknown, None)
}

/// Order ports with likely targets first, keeping discovery order in each group.
#[must_use]
pub fn order_candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    let (mut targets, others): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(DetectedPort::is_likely_target);
    targets.extend(others);
    targets
}

/// List serial ports on the host, likely targets first.
///
/// Fails with [`Error::NoPortsFound`] when the host reports no devices.
pub fn list_candidate_ports(platform: &dyn Platform) -> Result<Vec<DetectedPort>> {
    let raw = platform.enumerate_ports()?;
    if raw.is_empty() {
        return Err(Error::NoPortsFound);
    }

    let ports = order_candidates(
        raw.into_iter()
            .map(DetectedPort::classify)
            .collect(),
    );
    debug!(
        "Found {} serial port(s), {} likely target(s)",
        ports.len(),
        ports
            .iter()
            .filter(|p| p.is_likely_target())
            .count()
    );
    Ok(ports)
}
