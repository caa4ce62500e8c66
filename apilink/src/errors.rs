//! Error types for the API link service

use thiserror::Error;

/// Main error type for the API link service
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Source API unreachable, timed out or answered with a non-2xx status
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Source API body is not valid JSON
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// Field path did not resolve to a usable value
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// Transform step names a function that does not exist
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// A dial phase (value, backlight or image) failed
    #[error("Dial update error: {0}")]
    DialUpdate(String),

    /// Configured dial face image is not in the image store
    #[error("Image missing: {0}")]
    ImageMissing(String),

    /// Link definition rejected at load time
    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for LinkError {
    fn from(err: anyhow::Error) -> Self {
        LinkError::Internal(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigValidation(err.message().to_string())
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(err: toml::ser::Error) -> Self {
        LinkError::Storage(err.to_string())
    }
}
