//! Mastiff Error Types

use thiserror::Error;

/// Result type alias for mastiff operations
pub type Result<T> = std::result::Result<T, Error>;

/// Mastiff error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Store error: {0}")]
    Store(#[from] etcd_client::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Compare-and-swap lost on {key}")]
    StoreConflict { key: String },

    #[error("Malformed record at {key}")]
    RecordMalformed { key: String },

    // Probe errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Probe failed for {node}: {reason}")]
    ProbeFailed { node: String, reason: String },

    // Proxy errors
    #[error("Proxy admin error: {0}")]
    Proxy(String),

    #[error("Proxy unreachable at {address}: {reason}")]
    ProxyUnreachable { address: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::StoreUnavailable(_)
                | Error::StoreConflict { .. }
                | Error::Database(_)
                | Error::ProbeFailed { .. }
                | Error::Proxy(_)
                | Error::ProxyUnreachable { .. }
        )
    }

    /// Check if this error is unrecoverable at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}
