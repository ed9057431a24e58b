//! Flash offsets, with optional overrides from build metadata.

use {
    super::ImageKind,
    crate::error::{Error, Result},
    log::debug,
    serde::Deserialize,
    std::{fs, path::Path},
};

/// Immutable offset for each of the five images.
///
/// Built once before a transaction and passed by reference; overrides are
/// applied to a copy and only take effect if every entry parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    offsets: [u32; 5],
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Deserialize)]
struct BuildMetadata {
    #[serde(default)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
struct Extra {
    #[serde(default)]
    flash_images: Vec<FlashImageEntry>,
    #[serde(default)]
    application_offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlashImageEntry {
    offset: String,
    path: String,
}

impl FlashLayout {
    /// Built-in offsets.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            offsets: ImageKind::ALL.map(ImageKind::default_offset),
        }
    }

    /// Defaults overridden by a build metadata file, if it can be used.
    ///
    /// A missing or malformed file leaves the defaults in place.
    #[must_use]
    pub fn with_build_metadata(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!(
                    "{} not readable ({e}), using default offsets",
                    path.display()
                );
                return Self::defaults();
            },
        };

        match Self::from_build_metadata(&text) {
            Ok(layout) => {
                debug!("Using offsets from {}: {layout}", path.display());
                layout
            },
            Err(e) => {
                debug!("{e}, using default offsets");
                Self::defaults()
            },
        }
    }

    /// Parse build metadata JSON and apply its overrides to the defaults.
    ///
    /// Entries are matched to images by file-name suffix of `path`;
    /// `extra.application_offset` overrides the application image.
    pub fn from_build_metadata(json: &str) -> Result<Self> {
        let metadata: BuildMetadata =
            serde_json::from_str(json).map_err(|e| Error::Metadata(e.to_string()))?;

        let mut offsets = Self::defaults().offsets;
        for entry in &metadata
            .extra
            .flash_images
        {
            let Some(kind) = ImageKind::ALL
                .into_iter()
                .find(|k| {
                    entry
                        .path
                        .ends_with(k.file_name())
                })
            else {
                continue;
            };
            offsets[kind.index()] = parse_offset(&entry.offset)?;
        }

        if let Some(app) = metadata
            .extra
            .application_offset
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            offsets[ImageKind::Application.index()] = parse_offset(app)?;
        }

        Ok(Self { offsets })
    }

    /// Offset of `kind`.
    pub fn offset(&self, kind: ImageKind) -> u32 {
        self.offsets[kind.index()]
    }

    /// Offset of `kind` formatted for the tool command line.
    pub fn offset_arg(&self, kind: ImageKind) -> String {
        format!("{:#06x}", self.offset(kind))
    }

    /// Image whose region contains `address`, i.e. the one with the
    /// highest offset not above it.
    pub fn image_at(&self, address: u32) -> Option<ImageKind> {
        ImageKind::ALL
            .into_iter()
            .filter(|k| self.offset(*k) <= address)
            .max_by_key(|k| self.offset(*k))
    }
}

impl std::fmt::Display for FlashLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = ImageKind::ALL
            .iter()
            .map(|k| format!("{}={}", k.file_name(), self.offset_arg(*k)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

fn parse_offset(text: &str) -> Result<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16)
        .map_err(|e| Error::Metadata(format!("offset `{text}` is not hexadecimal: {e}")))
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn test_defaults_format_like_tool_arguments() {
        let layout = FlashLayout::defaults();
        assert_eq!(layout.offset_arg(ImageKind::Bootloader), "0x0000");
        assert_eq!(layout.offset_arg(ImageKind::Partitions), "0x8000");
        assert_eq!(layout.offset_arg(ImageKind::AppSelector), "0xe000");
        assert_eq!(layout.offset_arg(ImageKind::Application), "0x10000");
        assert_eq!(layout.offset_arg(ImageKind::Filesystem), "0x670000");
    }

    #[test]
    fn test_image_at() {
        let layout = FlashLayout::defaults();
        assert_eq!(layout.image_at(0x0), Some(ImageKind::Bootloader));
        assert_eq!(layout.image_at(0x8400), Some(ImageKind::Partitions));
        assert_eq!(layout.image_at(0x1_2000), Some(ImageKind::Application));
        assert_eq!(layout.image_at(0x70_0000), Some(ImageKind::Filesystem));

        let shifted =
            FlashLayout::from_build_metadata(r#"{"extra": {"flash_images": [{"offset": "0x1000", "path": "bootloader.bin"}]}}"#)
                .unwrap();
        assert_eq!(shifted.image_at(0x800), None);
    }

    #[test]
    fn test_bootloader_override_keeps_other_defaults() {
        let json = r#"{
            "extra": {
                "flash_images": [
                    {"offset": "0x1000", "path": "/build/esp32-s3/bootloader.bin"}
                ]
            }
        }"#;
        let layout = FlashLayout::from_build_metadata(json).unwrap();

        assert_eq!(layout.offset(ImageKind::Bootloader), 0x1000);
        for kind in &ImageKind::ALL[1..] {
            assert_eq!(layout.offset(*kind), kind.default_offset());
        }
    }

    #[test]
    fn test_application_offset_overrides_firmware() {
        let json = r#"{
            "extra": {
                "flash_images": [
                    {"offset": "0x8000", "path": "partitions.bin"},
                    {"offset": "0xe000", "path": "boot_app0.bin"}
                ],
                "application_offset": "0x20000"
            }
        }"#;
        let layout = FlashLayout::from_build_metadata(json).unwrap();
        assert_eq!(layout.offset(ImageKind::Application), 0x20000);
        assert_eq!(layout.offset(ImageKind::Filesystem), 0x670000);
    }

    #[test]
    fn test_unrelated_entries_are_ignored() {
        let json = r#"{"extra": {"flash_images": [{"offset": "0x9000", "path": "nvs.bin"}]}}"#;
        assert_eq!(
            FlashLayout::from_build_metadata(json).unwrap(),
            FlashLayout::defaults()
        );
    }

    #[test]
    fn test_override_is_all_or_nothing() {
        let json = r#"{
            "extra": {
                "flash_images": [
                    {"offset": "0x1000", "path": "bootloader.bin"},
                    {"offset": "zz", "path": "partitions.bin"}
                ]
            }
        }"#;
        assert!(matches!(
            FlashLayout::from_build_metadata(json),
            Err(Error::Metadata(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes())
            .unwrap();
        assert_eq!(
            FlashLayout::with_build_metadata(file.path()),
            FlashLayout::defaults()
        );
    }

    #[test]
    fn test_missing_or_garbage_metadata_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            FlashLayout::with_build_metadata(&dir.path().join("idedata.json")),
            FlashLayout::defaults()
        );

        assert!(FlashLayout::from_build_metadata("not json").is_err());
    }
}
