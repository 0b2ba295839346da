use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single request against the measurement API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FetchError::Transport(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Errors decoding a shareable view descriptor.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("descriptor is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("descriptor is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("descriptor must be a JSON object")]
    NotAnObject,
}
