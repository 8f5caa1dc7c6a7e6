// src/error.rs
use thiserror::Error;

/// Failures surfaced by the CT client's two RFC 6962 operations.
///
/// These are deliberately distinct variants (not a single `anyhow::Error`)
/// because the scheduler persists a stable error *code* per variant when it
/// records a failed cycle.
#[derive(Debug, Error)]
pub enum CtError {
    #[error("timed out talking to CT log")]
    Timeout,

    #[error("connection error talking to CT log: {0}")]
    ConnectionError(String),

    #[error("CT log returned HTTP {0}")]
    HttpError(u16),

    #[error("invalid JSON from CT log: {0}")]
    InvalidJson(String),
}

impl CtError {
    /// Stable error code persisted on `monitor_state`/`monitor_run`.
    pub fn code(&self) -> &'static str {
        match self {
            CtError::Timeout => "CT_TIMEOUT",
            CtError::ConnectionError(_) => "CT_CONNECTION_ERROR",
            CtError::HttpError(_) => "CT_FETCH_ERROR",
            CtError::InvalidJson(_) => "CT_INVALID_JSON",
        }
    }
}

impl From<reqwest::Error> for CtError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CtError::Timeout
        } else if let Some(status) = err.status() {
            CtError::HttpError(status.as_u16())
        } else if err.is_decode() {
            CtError::InvalidJson(err.to_string())
        } else {
            CtError::ConnectionError(err.to_string())
        }
    }
}

/// Per-entry parse failure kinds (§4.2). Always paired with the CT log index
/// of the offending entry so the scheduler can log which entry misbehaved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("leaf input is malformed or too short")]
    InvalidLeafInput,

    #[error("entry carries no certificate bytes")]
    NoCertificate,

    #[error("certificate bytes failed to parse as X.509")]
    ParseFailed,
}
