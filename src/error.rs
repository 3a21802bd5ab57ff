//! Error kinds surfaced by the core (see §7 of the design doc).
//!
//! Fingerprinting and parsing failures never reach this type — they degrade
//! silently at the call site (return input unchanged / treat as a zero
//! checkpoint). `CoreError` only covers operations with a genuine failure
//! mode: bad checkpoint names, malformed tool arguments, and "no data yet".

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("checkpoint name must be non-empty and at most 50 characters")]
    InvalidName,
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("no data available: {0}")]
    NoData(String),
}

/// JSON-RPC-friendly rendering of a `CoreError`. `Transient` (buffer-at-cap
/// eviction) never surfaces as an error — it has no variant here because it
/// is not observable as a failure, only as silently-evicted history.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        let code = match err {
            CoreError::InvalidName => -32001,
            CoreError::InvalidParam(_) => -32002,
            CoreError::NoData(_) => -32003,
        };
        ErrorBody {
            code,
            message: err.to_string(),
        }
    }
}
