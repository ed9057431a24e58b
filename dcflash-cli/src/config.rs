//! Configuration file support for dcflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (DCFLASH_*)
//! 3. Local config file (./dcflash.toml)
//! 4. Global config file (~/.config/dcflash/config.toml)

use {
    dcflash::{FlashFrequency, FlashMode, FlashParams},
    directories::ProjectDirs,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Local config file name.
const LOCAL_CONFIG: &str = "dcflash.toml";

/// `[port]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
}

/// `[tool]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Explicit esptool executable; skips the platform search.
    pub path: Option<String>,
}

/// `[firmware]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Directory holding the five images.
    pub dir: Option<PathBuf>,
    /// Build metadata JSON with flash offsets.
    pub metadata: Option<PathBuf>,
    /// Directory the images are staged into.
    pub work_dir: Option<PathBuf>,
}

/// `[flash]` section: parameters of the first write attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Flash mode.
    pub mode: Option<FlashMode>,
    /// Flash frequency.
    pub frequency: Option<FlashFrequency>,
    /// Write baud rate.
    pub baud: Option<u32>,
    /// Use the RAM stub.
    pub stub: Option<bool>,
}

impl FlashConfig {
    /// Apply the configured values on top of `base`.
    pub fn apply(&self, base: FlashParams) -> FlashParams {
        FlashParams {
            mode: self
                .mode
                .unwrap_or(base.mode),
            frequency: self
                .frequency
                .unwrap_or(base.frequency),
            baud: self
                .baud
                .unwrap_or(base.baud),
            use_stub: self
                .stub
                .unwrap_or(base.use_stub),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Tool configuration.
    #[serde(default)]
    pub tool: ToolConfig,
    /// Firmware bundle configuration.
    #[serde(default)]
    pub firmware: FirmwareConfig,
    /// Flash parameter configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dcflash").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.port.serial, other.port.serial);
        take(&mut self.tool.path, other.tool.path);
        take(&mut self.firmware.dir, other.firmware.dir);
        take(&mut self.firmware.metadata, other.firmware.metadata);
        take(&mut self.firmware.work_dir, other.firmware.work_dir);
        take(&mut self.flash.mode, other.flash.mode);
        take(&mut self.flash.frequency, other.flash.frequency);
        take(&mut self.flash.baud, other.flash.baud);
        take(&mut self.flash.stub, other.flash.stub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.serial.is_none());
        assert!(config.tool.path.is_none());
        assert!(config.firmware.dir.is_none());
        assert!(config.flash.mode.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port]
serial = "/dev/ttyACM0"

[tool]
path = "/opt/esp/bin/esptool"

[firmware]
dir = "firmware"
metadata = "firmware/idedata.json"

[flash]
mode = "qio"
frequency = "80m"
baud = 460800
stub = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.tool.path.as_deref(), Some("/opt/esp/bin/esptool"));
        assert_eq!(config.firmware.dir, Some(PathBuf::from("firmware")));
        assert_eq!(config.flash.mode, Some(FlashMode::Qio));
        assert_eq!(config.flash.frequency, Some(FlashFrequency::F80m));
        assert_eq!(config.flash.baud, Some(460_800));
        assert_eq!(config.flash.stub, Some(true));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[flash]\nbaud = 230400\n").unwrap();
        assert!(config.port.serial.is_none());
        assert_eq!(config.flash.baud, Some(230_400));
        assert!(config.flash.mode.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_flash_mode() {
        assert!(toml::from_str::<Config>("[flash]\nmode = \"octal\"\n").is_err());
    }

    #[test]
    fn test_config_merge_overrides_only_set_values() {
        let mut base = Config::default();
        base.port.serial = Some("/dev/ttyUSB0".to_string());
        base.flash.baud = Some(115_200);

        let mut other = Config::default();
        other.flash.baud = Some(921_600);
        other.tool.path = Some("esptool.py".to_string());
        base.merge(other);

        assert_eq!(base.port.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.flash.baud, Some(921_600));
        assert_eq!(base.tool.path.as_deref(), Some("esptool.py"));
    }

    #[test]
    fn test_flash_config_apply() {
        let flash = FlashConfig {
            mode: Some(FlashMode::Qio),
            baud: Some(460_800),
            ..FlashConfig::default()
        };
        let params = flash.apply(FlashParams::SAFE);
        assert_eq!(params.mode, FlashMode::Qio);
        assert_eq!(params.frequency, FlashParams::SAFE.frequency);
        assert_eq!(params.baud, 460_800);
        assert!(!params.use_stub);
        assert!(!params.is_safe());

        assert!(
            FlashConfig::default()
                .apply(FlashParams::SAFE)
                .is_safe()
        );
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcflash.toml");
        fs::write(&path, "[port]\nserial = \"/dev/ttyACM1\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.serial.as_deref(), Some("/dev/ttyACM1"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcflash.toml");
        fs::write(&path, "[port\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.serial.is_none());
    }

    #[test]
    fn test_global_config_path_is_named_after_the_tool() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("dcflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
