//! Persistent configuration for Optimager
//!
//! Settings are stored in a TOML configuration file, looked up in order:
//! - an explicit path (`--config`)
//! - Linux/macOS: `~/.config/optimager/optimager_config.toml`
//! - system-wide: `/etc/optimager/optimager_config.toml`
//!
//! Unlike most tools, a missing or incomplete file is an error: the
//! `[device]`, `[output]` and `[imaging]` sections carry values the
//! acquisition cannot guess, so runs are blocked until the file is repaired
//! (or created with `optimager config --init`).
//!
//! # Example Configuration
//!
//! ```toml
//! [device]
//! path = "/dev/sr0"
//!
//! [output]
//! default_dir = "/home/archivist/discs"
//! prefix = "disc"
//! extension = "iso"
//! log_file = "optimager.log"
//! checksum_file = "checksums.sha512"
//! metadata_file = "metadata.json"
//!
//! [imaging]
//! retries = 4
//! direct_disc_mode = false
//! timezone = "Europe/Amsterdam"
//!
//! [tools]
//! read_command = "readom"
//! rescue_command = "ddrescue"
//! umount_command = "umount"
//!
//! [timing]
//! startup_delay_ms = 2000
//! finish_delay_ms = 2000
//! poll_interval_ms = 100
//! termination_grace_ms = 5000
//! ```

use crate::pipeline::Tunables;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "optimager_config.toml";

/// Application name for config directory
const APP_NAME: &str = "optimager";

/// System-wide configuration directory
const SYSTEM_CONFIG_DIR: &str = "/etc/optimager";

/// Default number of read retries
pub const DEFAULT_RETRIES: u32 = 4;

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Optical device settings
    pub device: DeviceSettings,

    /// Output naming settings
    pub output: OutputSettings,

    /// Imaging behaviour
    pub imaging: ImagingSettings,

    /// External tool names or paths
    #[serde(default)]
    pub tools: ToolSettings,

    /// Delays and polling intervals
    #[serde(default)]
    pub timing: TimingSettings,
}

/// Settings for the optical device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    /// Default device node (e.g. `/dev/sr0`)
    pub path: String,
}

/// Settings for output files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSettings {
    /// Directory offered when none is given
    pub default_dir: PathBuf,

    /// Image file name prefix
    pub prefix: String,

    /// Image file extension (without the dot)
    pub extension: String,

    /// Name of the per-run log file
    pub log_file: String,

    /// Name of the checksum manifest
    pub checksum_file: String,

    /// Name of the metadata file
    pub metadata_file: String,
}

/// Settings for the imaging run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagingSettings {
    /// Maximum number of read retries
    pub retries: u32,

    /// Use direct disc access with ddrescue
    pub direct_disc_mode: bool,

    /// IANA timezone for acquisition timestamps
    pub timezone: String,
}

/// External tools invoked by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    /// readom executable
    pub read_command: String,

    /// ddrescue executable
    pub rescue_command: String,

    /// umount executable
    pub umount_command: String,
}

/// Delays around process supervision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    /// Pause after launching the imaging tool before reading its output
    pub startup_delay_ms: u64,

    /// Pause before a finished run is published
    pub finish_delay_ms: u64,

    /// How often the CLI polls run state and drains logs
    pub poll_interval_ms: u64,

    /// How long an interrupted tool gets to exit after SIGTERM
    pub termination_grace_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: "/dev/sr0".to_string(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            default_dir: dirs_next::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            prefix: "disc".to_string(),
            extension: "iso".to_string(),
            log_file: "optimager.log".to_string(),
            checksum_file: "checksums.sha512".to_string(),
            metadata_file: "metadata.json".to_string(),
        }
    }
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            direct_disc_mode: false,
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            read_command: "readom".to_string(),
            rescue_command: "ddrescue".to_string(),
            umount_command: "umount".to_string(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            startup_delay_ms: 2000,
            finish_delay_ms: 2000,
            poll_interval_ms: 100,
            termination_grace_ms: 5000,
        }
    }
}

impl TimingSettings {
    /// Startup delay as a duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// Finish delay as a duration
    pub fn finish_delay(&self) -> Duration {
        Duration::from_millis(self.finish_delay_ms)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Termination grace as a duration
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

impl Settings {
    /// Load settings, using `explicit` when given and the standard
    /// locations otherwise
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, SettingsError> {
        Self::load_from_path(Self::resolve_path(explicit))
    }

    /// Load settings from a specific path
    ///
    /// Every failure is reported: there is no fallback to defaults.
    pub fn load_from_path(path: Option<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if !path.exists() {
            return Err(SettingsError::NotFound(path));
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        let settings: Self = toml::from_str(&contents).map_err(SettingsError::Deserialize)?;
        settings.validate()?;

        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Check values that parse but cannot be used
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.timezone()?;

        if self.output.prefix.trim().is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "output.prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.output.extension.trim().is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "output.extension".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        for (key, name) in [
            ("output.log_file", &self.output.log_file),
            ("output.checksum_file", &self.output.checksum_file),
            ("output.metadata_file", &self.output.metadata_file),
        ] {
            if name.is_empty() || name.contains('/') {
                return Err(SettingsError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}' is not a plain file name", name),
                });
            }
        }

        Ok(())
    }

    /// Delays for the acquisition pipeline
    pub fn tunables(&self) -> Tunables {
        Tunables::from(&self.timing)
    }

    /// Parse the configured timezone
    pub fn timezone(&self) -> Result<Tz, SettingsError> {
        self.imaging
            .timezone
            .parse::<Tz>()
            .map_err(|e| SettingsError::InvalidValue {
                key: "imaging.timezone".to_string(),
                message: e.to_string(),
            })
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Pick the configuration file to use
    ///
    /// An explicit path always wins. Otherwise the per-user file is used if
    /// it exists, then the system-wide one.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
        if explicit.is_some() {
            return explicit;
        }
        match Self::config_path() {
            Some(user) if user.exists() => Some(user),
            _ => Some(Self::system_config_path()),
        }
    }

    /// Get the path to the per-user configuration file
    pub fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Get the path to the per-user configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Get the path to the system-wide configuration file
    pub fn system_config_path() -> PathBuf {
        Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Check if a configuration file exists in a standard location
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists()) || Self::system_config_path().exists()
    }

    /// Generate a default configuration file content as a string
    pub fn default_config_string() -> String {
        let default = Self::default();
        toml::to_string_pretty(&default)
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Configuration file does not exist
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Failed to read or write config file
    #[error("I/O error for {}: {source}", path.display())]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// Failed to deserialize settings (syntax error or missing key)
    #[error("Failed to parse settings: {0}")]
    Deserialize(toml::de::Error),

    /// A value parsed but is unusable
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Dotted key path
        key: String,
        /// What is wrong with it
        message: String,
    },
}
