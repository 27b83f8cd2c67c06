//! Error types for cvsync-enrich
//!
//! Two layers:
//! - [`ProbeError`]: failures at the probe boundary. Always converted into a
//!   `ProbeResult` with `Error` status so the strategy chain can fall through.
//! - [`EnrichError`]: run-level failures. Store I/O errors are fatal because
//!   continuing would silently lose progress.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probe-boundary failure taxonomy
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    /// Request exceeded its deadline
    #[error("timeout")]
    Timeout,

    /// Connection, DNS, TLS or other HTTP-layer failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response
    #[error("HTTP {0}")]
    HttpStatus(u16),

    /// Response did not contain the expected structure
    #[error("parse error: {0}")]
    Parse(String),
}

impl ProbeError {
    /// Short machine-readable kind, used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Timeout => "timeout",
            ProbeError::Transport(_) => "transport",
            ProbeError::HttpStatus(_) => "http_status",
            ProbeError::Parse(_) => "parse",
        }
    }

    /// HTTP status carried by the error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProbeError::HttpStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Run-level error
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Checkpoint or cache could not be read or persisted (fatal)
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration or chain composition
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input dataset could not be loaded
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Report output could not be written
    #[error("Report error: {0}")]
    Report(String),

    /// cvsync-common error
    #[error("Common error: {0}")]
    Common(#[from] cvsync_common::Error),
}

impl EnrichError {
    pub(crate) fn store(context: &str, err: impl std::fmt::Display) -> Self {
        EnrichError::Store(format!("{}: {}", context, err))
    }
}

/// Result type for run-level operations
pub type EnrichResult<T> = Result<T, EnrichError>;
