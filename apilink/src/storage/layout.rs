//! Storage layout configuration

use std::path::PathBuf;

use tracing::info;

use crate::errors::LinkError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the default data directory
pub const DATA_PATH_ENV: &str = "APILINK_DATA_PATH";

/// Storage layout for the service
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Layout from an explicit directory, else `APILINK_DATA_PATH`, else the
    /// platform default
    pub fn resolve(explicit: Option<&str>) -> Self {
        if let Some(dir) = explicit.filter(|d| !d.is_empty()) {
            return Self::new(dir);
        }
        match std::env::var(DATA_PATH_ENV) {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Directory holding one TOML file per link
    pub fn links_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("links"))
    }

    /// Directory holding dial face images
    pub fn images_dir(&self) -> Dir {
        self.links_dir().subdir("images")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), LinkError> {
        self.links_dir().create().await?;
        self.images_dir().create().await?;
        self.logs_dir().create().await?;
        info!("Using data directory {}", self.base_dir.display());
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/apilink");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".apilink");

        Self::new(base_dir)
    }
}
