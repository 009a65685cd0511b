//! Shared error types for the camera wall

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Failed to read configuration {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    #[error("Invalid stream URL for camera {camera}: {reason}")]
    InvalidUrl { camera: String, reason: String },
}

impl SharedError {
    pub fn invalid(field: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
