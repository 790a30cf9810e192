//! Error types for the orchestrator.
//!
//! Inference failures are not represented here: capabilities return
//! `anyhow::Result` and every failure degrades the corresponding signal.

use thiserror::Error;

/// Rejected input. Raised by the transport layer before the core is reached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("text cannot be empty or whitespace")]
    EmptyText,

    #[error("text too long ({len} characters, max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("texts list cannot be empty")]
    EmptyBatch,

    #[error("batch too large ({len} texts, max {max})")]
    BatchTooLarge { len: usize, max: usize },

    #[error("text at index {index} cannot be empty")]
    EmptyBatchItem { index: usize },

    #[error("text at index {index} too long ({len} characters, max {max})")]
    BatchItemTooLong { index: usize, len: usize, max: usize },
}

/// Cache operation could not be performed. Callers treat it as a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("{cache} cache lock not acquired within {waited_ms}ms")]
    LockTimeout { cache: &'static str, waited_ms: u64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} out of range: {value}")]
    OutOfRange { key: &'static str, value: String },
}
