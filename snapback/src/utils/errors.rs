//! Custom error types for snapback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapbackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("Manifest write error: {0}")]
    ManifestWrite(#[from] toml::ser::Error),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("No saved job for {0}")]
    JobNotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, SnapbackError>;
