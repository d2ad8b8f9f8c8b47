use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a single query. The batch logs them and moves on.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: u32 },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl QueryError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Transport { .. } => "transport",
            Self::Storage { .. } => "storage",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// A payload that was persisted but could not be read back as a table.
/// Never fatal: it ends up in `ResultMetadata::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ReadbackError {
    pub message: String,
}

impl ReadbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
