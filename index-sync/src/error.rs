//! Error types for the index sync engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for index sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while setting up or driving the sync engine.
///
/// The engine's query/mutation surface never returns these: store failures
/// are reported through the failure hook instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// A change record could not be derived from a path.
    #[error("cannot generate record for {path}: {reason}")]
    RecordGeneration { path: PathBuf, reason: String },

    /// The index store rejected or failed a mutation.
    #[error("index store error: {0}")]
    Store(String),

    /// The mount table could not be reloaded.
    #[error("mount table error: {0}")]
    Mounts(String),

    /// The publish endpoint refused the identity.
    #[error("publish error: {0}")]
    Publish(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
