//! Engine error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Configuration error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Codec probe timed out after {timeout:?}: {url}")]
    ProbeTimeout { url: String, timeout: Duration },

    #[error("Codec probe failed for {url}: {reason}")]
    ProbeError { url: String, reason: String },

    #[error("Failed to launch worker for {source_name}: {reason}")]
    Launch { source_name: String, reason: String },

    #[error("Worker for {source_name} exited: {exit}")]
    RuntimeExit { source_name: String, exit: String },

    #[error("{hidden_count} source(s) exceed {capacity} display slots and stay hidden: {}", hidden.join(", "))]
    PlacementOverflow {
        capacity: usize,
        hidden_count: usize,
        hidden: Vec<String>,
    },

    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DisplayError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn launch(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn probe(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProbeError {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Only configuration problems and resource exhaustion stop the whole wall
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DisplayError::Config { .. } | DisplayError::ResourceExhausted { .. } | DisplayError::SharedError(_)
        )
    }
}

pub type DisplayResult<T> = Result<T, DisplayError>;
