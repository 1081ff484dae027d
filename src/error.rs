//! Error types for the trailing stop-loss monitor

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the monitor
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing API credentials: {0}")]
    MissingCredentials(String),

    // Platform errors
    #[error("{}", format_api_error(.status, .msg))]
    Api {
        status: Option<u16>,
        msg: Option<String>,
    },

    #[error("Platform returned no data for {0}")]
    NoData(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    // Deal store errors
    #[error("Deal store error: {0}")]
    Store(String),

    #[error("Deal store {0} is locked by another running instance")]
    StoreLocked(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn format_api_error(status: &Option<u16>, msg: &Option<String>) -> String {
    match (status, msg) {
        (Some(status), Some(msg)) => format!("Platform request failed ({}): {}", status, msg),
        (Some(status), None) => format!("Platform request failed ({})", status),
        (None, Some(msg)) => format!("Platform request failed: {}", msg),
        (None, None) => "Platform request failed".to_string(),
    }
}

impl Error {
    /// Build a platform error that only carries a message
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api {
            status: None,
            msg: Some(msg.into()),
        }
    }

    /// Human readable message attached to a platform error, if any
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Error::Api { msg, .. } => msg.as_deref(),
            _ => None,
        }
    }

    /// Store failures abort the remaining writes of a cycle
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_) | Error::StoreLocked(_))
    }

    /// Request failures only skip the current bot or deal until the next cycle
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Error::Api { .. } | Error::NoData(_) | Error::Deserialization(_) | Error::Signing(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Error::StoreLocked(e.to_string())
            }
            other => Error::Store(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Error::Deserialization(e.to_string());
        }
        Error::Api {
            status: e.status().map(|s| s.as_u16()),
            msg: Some(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
