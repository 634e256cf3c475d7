//! Error types for the Optimager core library

use crate::request::ValidationProblem;
use crate::settings::SettingsError;
use thiserror::Error;

/// Main error type for Optimager operations
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed one or more validation checks
    #[error("Validation failed: {}", describe_problems(.0))]
    Validation(Vec<ValidationProblem>),

    /// Optical device missing or not a block device
    #[error("Cannot access optical device: {0}")]
    DeviceNotAccessible(String),

    /// IO error during checksum or metadata operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be serialized or parsed
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Request parameters are inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration is unavailable or invalid
    #[error("Configuration unavailable: {0}")]
    Config(#[from] SettingsError),

    /// Checksum manifest could not be parsed
    #[error("Invalid checksum manifest: {0}")]
    InvalidManifest(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The pipeline thread ended abnormally
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the Optimager error type
pub type Result<T> = std::result::Result<T, Error>;

fn describe_problems(problems: &[ValidationProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
