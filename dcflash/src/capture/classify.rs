//! Boot-log classification.
//!
//! Watchers see every chunk as it arrives and may end a capture early.
//! Post-flash markers are scanned over the new chunk plus a short tail of
//! what came before, so a marker split across two reads is still found.

use {log::debug, serde::Serialize};

/// Bytes of previous output kept in front of each new chunk.
pub const SCAN_WINDOW: usize = 256;

/// Lines read before pre-flash validation stops listening.
pub const PRE_FLASH_LINES: usize = 34;

/// Marker strings recognised in boot output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootMarkers {
    /// Any of these in the pre-flash transcript validates the device.
    pub valid_device: Vec<String>,
    /// First line printed by the ESP32-S3 ROM on every reset.
    pub rom_banner: String,
    /// ROM banners needed to call it a boot loop.
    pub loop_threshold: usize,
    /// Product identity marker.
    pub identity: String,
    /// Product variant marker, required together with `identity`.
    pub product: String,
    /// Printed once the application is up.
    pub ready: Vec<String>,
    /// Runtime fault signatures.
    pub faults: Vec<String>,
}

impl Default for BootMarkers {
    fn default() -> Self {
        Self {
            valid_device: vec!["Core".into(), "D_Core".into()],
            rom_banner: "ESP-ROM:esp32s3".into(),
            loop_threshold: 3,
            identity: "Doppelgänger".into(),
            product: "Core".into(),
            ready: vec!["WEBSERVER".into(), "WiFi Access Point".into()],
            faults: vec!["Guru Meditation".into(), "abort()".into()],
        }
    }
}

/// Observes capture chunks and decides when to stop.
pub trait Watcher {
    /// Why the watcher stopped the capture.
    type Verdict;

    /// Inspect the next chunk. Returning `Some` ends the capture.
    fn observe(&mut self, chunk: &[u8]) -> Option<Self::Verdict>;
}

/// Stops after a fixed number of line terminators.
#[derive(Debug, Clone)]
pub struct LineLimit {
    limit: usize,
    seen: usize,
}

/// The line limit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinesReached(pub usize);

impl LineLimit {
    /// Stop after `limit` lines.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, seen: 0 }
    }

    /// Lines seen so far.
    pub fn seen(&self) -> usize {
        self.seen
    }
}

impl Watcher for LineLimit {
    type Verdict = LinesReached;

    fn observe(&mut self, chunk: &[u8]) -> Option<LinesReached> {
        for &byte in chunk {
            if byte == b'\n' {
                self.seen += 1;
                if self.seen >= self.limit {
                    return Some(LinesReached(self.seen));
                }
            }
        }
        None
    }
}

/// Whether the pre-flash transcript shows a supported device.
pub fn validate_identity(transcript: &[u8], markers: &BootMarkers) -> bool {
    markers
        .valid_device
        .iter()
        .any(|m| contains_fresh(transcript, m.as_bytes(), 0))
}

/// What the post-flash classifier recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BootVerdict {
    /// The ROM banner repeated this many times.
    BootLoop {
        /// Banners counted.
        banners: usize,
    },
    /// Product identity and variant markers were printed.
    Identified,
    /// An application-ready marker was printed.
    Ready {
        /// The marker that matched.
        marker: String,
    },
    /// A runtime fault signature was printed.
    Fault {
        /// The marker that matched.
        marker: String,
    },
}

/// Result of post-flash verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashOutcome {
    /// The firmware came up.
    Success,
    /// The device resets repeatedly or hit a fatal fault.
    BootLoop,
    /// Nothing conclusive was read before the capture ended.
    Unknown,
}

impl From<&BootVerdict> for FlashOutcome {
    fn from(verdict: &BootVerdict) -> Self {
        match verdict {
            BootVerdict::Identified | BootVerdict::Ready { .. } => Self::Success,
            BootVerdict::BootLoop { .. } | BootVerdict::Fault { .. } => Self::BootLoop,
        }
    }
}

/// Post-flash classifier.
///
/// Rules are checked in priority order on each chunk: ROM banner count,
/// identity, ready markers, fault markers. The first match wins. A match
/// counts only when it ends inside the newly read bytes.
#[derive(Debug, Clone)]
pub struct BootClassifier {
    markers: BootMarkers,
    tail: Vec<u8>,
    banners: usize,
}

impl BootClassifier {
    /// Classifier for `markers`.
    #[must_use]
    pub fn new(markers: BootMarkers) -> Self {
        Self {
            markers,
            tail: Vec::with_capacity(SCAN_WINDOW),
            banners: 0,
        }
    }

    /// ROM banners counted so far.
    pub fn banners(&self) -> usize {
        self.banners
    }

    fn classify(&mut self, scan: &[u8], carried: usize) -> Option<BootVerdict> {
        let banner = self
            .markers
            .rom_banner
            .as_bytes();
        let fresh = find_fresh(scan, banner, carried).count();
        if fresh > 0 {
            self.banners += fresh;
            debug!("ROM banner seen ({} so far)", self.banners);
            if self.banners >= self.markers.loop_threshold {
                return Some(BootVerdict::BootLoop {
                    banners: self.banners,
                });
            }
        }

        if contains_fresh(scan, self.markers.identity.as_bytes(), carried)
            && contains_fresh(scan, self.markers.product.as_bytes(), carried)
        {
            return Some(BootVerdict::Identified);
        }

        if let Some(marker) = first_fresh(scan, &self.markers.ready, carried) {
            return Some(BootVerdict::Ready { marker });
        }

        first_fresh(scan, &self.markers.faults, carried).map(|marker| BootVerdict::Fault { marker })
    }
}

impl Watcher for BootClassifier {
    type Verdict = BootVerdict;

    fn observe(&mut self, chunk: &[u8]) -> Option<BootVerdict> {
        let carried = self.tail.len();
        let mut scan = std::mem::take(&mut self.tail);
        scan.extend_from_slice(chunk);

        let verdict = self.classify(&scan, carried);

        let keep_from = scan
            .len()
            .saturating_sub(SCAN_WINDOW);
        scan.drain(..keep_from);
        self.tail = scan;

        verdict
    }
}

fn first_fresh(haystack: &[u8], markers: &[String], carried: usize) -> Option<String> {
    markers
        .iter()
        .find(|m| contains_fresh(haystack, m.as_bytes(), carried))
        .cloned()
}

fn contains_fresh(haystack: &[u8], needle: &[u8], carried: usize) -> bool {
    find_fresh(haystack, needle, carried)
        .next()
        .is_some()
}

/// Occurrences of `needle` that end past the first `carried` bytes.
///
/// A marker lying wholly inside the carried window was already seen with an
/// earlier chunk and must not match again.
fn find_fresh<'a>(
    haystack: &'a [u8],
    needle: &'a [u8],
    carried: usize,
) -> impl Iterator<Item = usize> + 'a {
    find_all(haystack, needle).filter(move |start| start + needle.len() > carried)
}

/// Start offsets of every occurrence of `needle` in `haystack`.
fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let len = needle
        .len()
        .max(1);
    haystack
        .windows(len)
        .enumerate()
        .filter(move |(_, w)| !needle.is_empty() && *w == needle)
        .map(|(i, _)| i)
}
