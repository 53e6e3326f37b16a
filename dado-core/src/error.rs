//! Error types for dado-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the dado-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera API error (connection, protocol, bad payload)
    #[error("camera error: {0}")]
    Camera(String),

    /// Thumbnail could not be decoded or compared
    #[error("image error: {0}")]
    Image(String),

    /// ffmpeg concatenation failed
    #[error("merge error: {0}")]
    Merge(String),

    /// Marker file name did not describe a usable time range
    #[error("invalid manual request {}: {message}", path.display())]
    ManualRequest { path: PathBuf, message: String },
}

/// Result type alias for dado-core
pub type Result<T> = std::result::Result<T, Error>;
