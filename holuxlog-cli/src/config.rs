//! Configuration file support for holuxlog.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HOLUXLOG_*)
//! 3. Local config file (./holuxlog.toml)
//! 4. Global config file (~/.config/holuxlog/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "holuxlog.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate. Defaults to the logger family's rate.
    pub baud: Option<u32>,
    /// Logger family name (`m241`, `gr245`).
    pub device: Option<String>,
}

/// Port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// USB devices remembered for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Session engine tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reply timeout in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Bytes requested per log read.
    pub chunk_size: Option<u32>,
}

/// Upload/export defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Default export format (`gpx`, `kml`, `json`).
    pub format: Option<String>,
    /// Directory for exported files.
    pub output_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Export configuration.
    #[serde(default)]
    pub export: ExportConfig,
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

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
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
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
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
        ProjectDirs::from("", "", "holuxlog").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let conn = other.port.connection;
        if conn.serial.is_some() {
            self.port.connection.serial = conn.serial;
        }
        if conn.baud.is_some() {
            self.port.connection.baud = conn.baud;
        }
        if conn.device.is_some() {
            self.port.connection.device = conn.device;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        if other.session.response_timeout_ms.is_some() {
            self.session.response_timeout_ms = other.session.response_timeout_ms;
        }
        if other.session.chunk_size.is_some() {
            self.session.chunk_size = other.session.chunk_size;
        }

        if other.export.format.is_some() {
            self.export.format = other.export.format;
        }
        if other.export.output_dir.is_some() {
            self.export.output_dir = other.export.output_dir;
        }
    }

    /// Remember a USB device for future auto-detection.
    ///
    /// Written to the local config when one exists, otherwise to the global one.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        let mut on_disk = Self::load_from_file(&path).unwrap_or_default();
        if !on_disk.port.usb_device.contains(&device) {
            on_disk.port.usb_device.push(device.clone());
        }
        self.port.usb_device.push(device);

        fs::write(&path, toml::to_string_pretty(&on_disk)?)?;
        info!("Saved USB device to {}", path.display());
        Ok(())
    }
}
