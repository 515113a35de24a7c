use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Required settings are absent or empty. Never retried.
    #[error("missing required configuration: {}", missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("failed to read configuration: {0}")]
    Config(#[from] config::ConfigError),

    /// DNS, connect and timeout failures talking to the labeling service.
    #[error("{operation}: request failed: {source}")]
    Connectivity {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{operation}: service answered {status}: {body}")]
    Remote {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{operation}: unexpected response body: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn request(operation: &'static str, source: reqwest::Error) -> Self {
        if source.is_decode() {
            Error::Decode { operation, source }
        } else {
            Error::Connectivity { operation, source }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry policy may try the failed operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connectivity { .. } => true,
            Error::Remote { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
