//! Firmware images and where they go in flash.
//!
//! A provisioning run always writes the same five images. Their offsets
//! come from [`FlashLayout`], their files from [`StagedImages`].

mod layout;
mod stage;

pub use {
    layout::FlashLayout,
    stage::{DeviceProfile, StagedImages},
};

/// Flash size passed to the tool.
pub const FLASH_SIZE: &str = "8MB";

/// The five images of a provisioning run, in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Second-stage bootloader.
    Bootloader,
    /// Partition table.
    Partitions,
    /// OTA app-selector stub.
    AppSelector,
    /// Application firmware.
    Application,
    /// LittleFS filesystem image.
    Filesystem,
}

impl ImageKind {
    /// All images in write order.
    pub const ALL: [Self; 5] = [
        Self::Bootloader,
        Self::Partitions,
        Self::AppSelector,
        Self::Application,
        Self::Filesystem,
    ];

    /// File name of the image inside a firmware bundle.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader.bin",
            Self::Partitions => "partitions.bin",
            Self::AppSelector => "boot_app0.bin",
            Self::Application => "firmware.bin",
            Self::Filesystem => "LittleFS.bin",
        }
    }

    /// Built-in flash offset.
    pub fn default_offset(self) -> u32 {
        match self {
            Self::Bootloader => 0x0000,
            Self::Partitions => 0x8000,
            Self::AppSelector => 0xe000,
            Self::Application => 0x1_0000,
            Self::Filesystem => 0x67_0000,
        }
    }

    /// Status message shown while the tool writes this image.
    pub fn progress_message(self) -> &'static str {
        match self {
            Self::Bootloader => "Flashing bootloader...",
            Self::Partitions => "Flashing partition table...",
            Self::AppSelector => "Flashing boot app selector...",
            Self::Application => "Flashing application firmware...",
            Self::Filesystem => "Flashing filesystem...",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Bootloader => 0,
            Self::Partitions => 1,
            Self::AppSelector => 2,
            Self::Application => 3,
            Self::Filesystem => 4,
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_order_and_indices_agree() {
        for (i, kind) in ImageKind::ALL
            .iter()
            .enumerate()
        {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(ImageKind::ALL[0], ImageKind::Bootloader);
        assert_eq!(ImageKind::ALL[4], ImageKind::Filesystem);
    }

    #[test]
    fn test_default_offsets() {
        assert_eq!(ImageKind::Bootloader.default_offset(), 0x0);
        assert_eq!(ImageKind::Partitions.default_offset(), 0x8000);
        assert_eq!(ImageKind::AppSelector.default_offset(), 0xe000);
        assert_eq!(ImageKind::Application.default_offset(), 0x10000);
        assert_eq!(ImageKind::Filesystem.default_offset(), 0x670000);
    }
}
