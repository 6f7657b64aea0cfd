use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// A model, tokenizer or worker executable is missing on disk
    #[error("Required {kind} file not found: {path}")]
    ModelFileMissing { kind: &'static str, path: PathBuf },

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Two vectors with different dimensions were compared
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single worker request failed (spawn, IO, crash)
    #[error("Worker error: {0}")]
    Worker(String),

    /// Every handle in the pool is unhealthy and could not be replaced
    #[error("No healthy workers available")]
    NoHealthyWorkers,

    /// The pool was disposed
    #[error("Worker pool has been disposed")]
    PoolDisposed,

    /// The caller stopped waiting for a pool slot
    #[error("Operation cancelled while waiting for a worker")]
    Cancelled,

    /// The worker ran but no assistant response could be located in its output
    #[error("Worker produced no recognizable response")]
    EmptyResponse,

    /// Fragment not found in storage
    #[error("Fragment not found: {id}")]
    FragmentNotFound { id: i64 },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;
