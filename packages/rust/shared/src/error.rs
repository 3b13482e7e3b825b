//! Error types for judgeloop.
//!
//! Library crates use [`JudgeloopError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all judgeloop operations.
#[derive(Debug, thiserror::Error)]
pub enum JudgeloopError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input file could not be parsed (batch JSON, department list, CSV).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (bad argument, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A generator produced output that could not be used.
    #[error("generation error: {0}")]
    Generation(String),

    /// Network or service failure talking to a generator or store.
    #[error("transport error: {0}")]
    Transport(String),

    /// An external call did not answer within its deadline.
    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// A processed record could not be persisted to the result sink.
    #[error("sink write error: {0}")]
    Sink(String),

    /// A referenced entity (user, course) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, JudgeloopError>;

impl JudgeloopError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
