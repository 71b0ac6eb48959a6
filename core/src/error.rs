use std::path::PathBuf;
use thiserror::Error;

/// Every failure the monitor can report. None of them are fatal: a failed
/// decode or merge leaves previously merged state untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The report file could not be turned into a decoded report.
    #[error("failed to decode report {source_name}: {reason}")]
    Decode { source_name: String, reason: String },

    /// The report is still being written (no closing `</nmaprun>` yet).
    #[error("report {0} is incomplete")]
    IncompleteReport(String),

    /// A service report named an address that no discovery report has produced.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("invalid directory {}: {reason}", path.display())]
    InvalidDirectory { path: PathBuf, reason: String },

    /// One host of a batch was rejected; the rest of the batch still applies.
    #[error("malformed host {address:?}: {reason}")]
    MalformedHost { address: String, reason: String },

    #[error("invalid scan request: {0}")]
    InvalidScanRequest(String),

    #[error("invalid port key: {0}")]
    InvalidPortKey(String),
}

impl MonitorError {
    pub fn decode(source_name: impl Into<String>, reason: impl ToString) -> Self {
        MonitorError::Decode { source_name: source_name.into(), reason: reason.to_string() }
    }

    pub fn malformed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::MalformedHost { address: address.into(), reason: reason.into() }
    }
}
