//! Host platform services.
//!
//! Enumeration, tool lookup and port access checks differ per operating
//! system. Each OS gets one [`Platform`] implementation, chosen once at
//! startup through [`current`].

use {
    crate::{error::Result, port::PortInfo},
    std::{
        env,
        path::{Path, PathBuf},
    },
};

/// Operating system family the updater runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    /// Linux and other Unix-likes with a Linux-style layout.
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
}

impl HostOs {
    /// The OS this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// Per-OS capabilities used by the updater.
pub trait Platform {
    /// Short platform name for logs.
    fn name(&self) -> &'static str;

    /// OS family, used to pick the tool argument dialect.
    fn os(&self) -> HostOs;

    /// List the raw serial ports the host can see.
    fn enumerate_ports(&self) -> Result<Vec<PortInfo>>;

    /// Locate the esptool executable.
    ///
    /// Returns the first existing candidate, or a bare fallback name left
    /// for the OS to resolve when nothing was found.
    fn resolve_tool(&self) -> String;

    /// Verify the current user may open `port`.
    fn check_access(&self, port: &str) -> Result<()>;
}

/// Where to look for the esptool executable.
#[derive(Debug, Clone, Copy)]
enum ToolCandidate {
    /// Program name searched on `PATH`.
    OnPath(&'static str),
    /// Path relative to the user's home directory.
    InHome(&'static str),
    /// Absolute path.
    Absolute(&'static str),
}

const LINUX_TOOL: &[ToolCandidate] = &[
    ToolCandidate::OnPath("esptool"),
    ToolCandidate::InHome(".local/bin/esptool"),
    ToolCandidate::Absolute("/usr/bin/esptool"),
    ToolCandidate::Absolute("/usr/local/bin/esptool"),
    ToolCandidate::Absolute("/bin/esptool"),
];

const MAC_TOOL: &[ToolCandidate] = &[
    ToolCandidate::OnPath("esptool"),
    ToolCandidate::OnPath("esptool.py"),
    ToolCandidate::Absolute("/opt/homebrew/bin/esptool"),
    ToolCandidate::Absolute("/usr/local/bin/esptool"),
];

const WINDOWS_TOOL: &[ToolCandidate] = &[
    ToolCandidate::OnPath("esptool.exe"),
    ToolCandidate::OnPath("esptool.py"),
];

/// Find `program` in the directories listed by `PATH`.
#[must_use]
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn resolve_candidates(
    candidates: &[ToolCandidate],
    fallback: &str,
    lookup: impl Fn(&str) -> Option<PathBuf>,
    home: Option<&Path>,
    exists: impl Fn(&Path) -> bool,
) -> String {
    for candidate in candidates {
        let hit = match *candidate {
            ToolCandidate::OnPath(name) => lookup(name),
            ToolCandidate::InHome(rel) => home
                .map(|h| h.join(rel))
                .filter(|p| exists(p)),
            ToolCandidate::Absolute(abs) => Some(PathBuf::from(abs)).filter(|p| exists(p)),
        };
        if let Some(path) = hit {
            log::debug!("Resolved esptool at {}", path.display());
            return path
                .to_string_lossy()
                .into_owned();
        }
    }
    log::debug!("No esptool found, falling back to `{fallback}`");
    fallback.to_string()
}

fn resolve_on_host(candidates: &[ToolCandidate], fallback: &str) -> String {
    let home = env::var_os("HOME").map(PathBuf::from);
    resolve_candidates(
        candidates,
        fallback,
        find_in_path,
        home.as_deref(),
        Path::is_file,
    )
}

#[cfg(feature = "native")]
fn native_ports() -> Result<Vec<PortInfo>> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    NativePortEnumerator::list_ports()
}

#[cfg(not(feature = "native"))]
fn native_ports() -> Result<Vec<PortInfo>> {
    Ok(Vec::new())
}

/// Linux host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxHost;

impl Platform for LinuxHost {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn os(&self) -> HostOs {
        HostOs::Linux
    }

    fn enumerate_ports(&self) -> Result<Vec<PortInfo>> {
        native_ports()
    }

    fn resolve_tool(&self) -> String {
        resolve_on_host(LINUX_TOOL, "esptool")
    }

    #[cfg(feature = "native")]
    fn check_access(&self, port: &str) -> Result<()> {
        use crate::error::Error;

        match serialport::new(port, crate::port::CAPTURE_BAUD).open() {
            Ok(_) => Ok(()),
            Err(e) if is_permission_denied(&e) => Err(Error::PermissionDenied(port.to_string())),
            Err(e) => {
                log::debug!("Access probe on {port} failed: {e}");
                Ok(())
            },
        }
    }

    #[cfg(not(feature = "native"))]
    fn check_access(&self, _port: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "native")]
fn is_permission_denied(err: &serialport::Error) -> bool {
    matches!(
        err.kind(),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
    ) || err
        .to_string()
        .to_lowercase()
        .contains("permission denied")
}

/// macOS host.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacHost;

impl Platform for MacHost {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn os(&self) -> HostOs {
        HostOs::MacOs
    }

    fn enumerate_ports(&self) -> Result<Vec<PortInfo>> {
        native_ports()
    }

    fn resolve_tool(&self) -> String {
        resolve_on_host(MAC_TOOL, "esptool.py")
    }

    fn check_access(&self, _port: &str) -> Result<()> {
        Ok(())
    }
}

/// Windows host.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsHost;

impl Platform for WindowsHost {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn os(&self) -> HostOs {
        HostOs::Windows
    }

    fn enumerate_ports(&self) -> Result<Vec<PortInfo>> {
        native_ports()
    }

    fn resolve_tool(&self) -> String {
        resolve_on_host(WINDOWS_TOOL, "esptool.exe")
    }

    fn check_access(&self, _port: &str) -> Result<()> {
        Ok(())
    }
}

/// Platform services for the OS this binary was built for.
#[must_use]
pub fn current() -> Box<dyn Platform> {
    match HostOs::current() {
        HostOs::Linux => Box::new(LinuxHost),
        HostOs::MacOs => Box::new(MacHost),
        HostOs::Windows => Box::new(WindowsHost),
    }
}
