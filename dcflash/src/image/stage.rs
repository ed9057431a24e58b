//! Staging of firmware images into a working directory.

use {
    super::ImageKind,
    crate::error::{Error, Result},
    log::{debug, warn},
    std::{
        fs, io,
        path::{Path, PathBuf},
    },
};

/// The five images copied into a working directory for one run.
///
/// Staged copies are removed by [`StagedImages::cleanup`] or, failing that,
/// when the value is dropped.
#[derive(Debug)]
pub struct StagedImages {
    dir: PathBuf,
    owned: bool,
    cleaned: bool,
}

impl StagedImages {
    /// Copy the five images from `source_dir` into `work_dir`.
    ///
    /// A missing or empty image fails with [`Error::MissingImage`] and
    /// leaves nothing behind. When both directories are the same, the
    /// images are used in place and never deleted.
    pub fn stage(source_dir: &Path, work_dir: &Path) -> Result<Self> {
        fs::create_dir_all(work_dir)?;
        let owned = !same_dir(source_dir, work_dir);
        let mut staged = Self {
            dir: work_dir.to_path_buf(),
            owned,
            cleaned: false,
        };

        for kind in ImageKind::ALL {
            let src = source_dir.join(kind.file_name());
            let len = fs::metadata(&src).map_or(0, |m| m.len());
            if len == 0 {
                staged.cleanup();
                return Err(Error::MissingImage(src));
            }
            if owned {
                fs::copy(&src, staged.path(kind))?;
            }
            debug!("Staged {} ({len} bytes)", kind.file_name());
        }

        Ok(staged)
    }

    /// Use images already present in `dir` without taking ownership.
    pub fn in_place(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            owned: false,
            cleaned: false,
        }
    }

    /// Directory holding the images.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one image.
    pub fn path(&self, kind: ImageKind) -> PathBuf {
        self.dir
            .join(kind.file_name())
    }

    /// Fail with [`Error::MissingImage`] unless all five images exist.
    pub fn ensure_present(&self) -> Result<()> {
        for kind in ImageKind::ALL {
            let path = self.path(kind);
            if !fs::metadata(&path).is_ok_and(|m| m.is_file() && m.len() > 0) {
                return Err(Error::MissingImage(path));
            }
        }
        Ok(())
    }

    /// Raw bytes of the application image.
    pub fn application_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(ImageKind::Application))?)
    }

    /// Delete the staged copies. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if !self.owned {
            return;
        }

        for kind in ImageKind::ALL {
            let path = self.path(kind);
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => warn!("Failed to remove {}: {e}", path.display()),
            }
        }
    }

    /// Whether [`StagedImages::cleanup`] already ran.
    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }
}

impl Drop for StagedImages {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Product variant, recognised from the application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Doppelgänger Core.
    Core,
    /// Doppelgänger Stealth v2, the baseline profile.
    StealthV2,
}

const CORE_DECLARATION: &[u8] = br#"device = "Core""#;

impl DeviceProfile {
    /// Scan the raw application image for the Core device declaration.
    #[must_use]
    pub fn detect(app_image: &[u8]) -> Self {
        if app_image
            .windows(CORE_DECLARATION.len())
            .any(|w| w == CORE_DECLARATION)
        {
            Self::Core
        } else {
            Self::StealthV2
        }
    }

    /// Product name for banners.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Core => "Doppelgänger Core",
            Self::StealthV2 => "Doppelgänger Stealth v2",
        }
    }
}
