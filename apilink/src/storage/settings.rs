//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::LinkError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Service settings, every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON formatted stdout logs
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily log file under the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Management HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Link scheduler
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Outgoing HTTP requests
    #[serde(default)]
    pub http: HttpSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            server: ServerSettings::default(),
            scheduler: SchedulerSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file does not exist
    pub async fn load(file: &File) -> Result<Self, LinkError> {
        if !file.is_file().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// Management HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    5341
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long shutdown waits for in-flight cycles
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Outgoing HTTP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Timeout for every source fetch and dial call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
