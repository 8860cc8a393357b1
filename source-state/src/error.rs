//! Error types for source-state

use chrono::{DateTime, Utc};

use source_api::ApiError;

/// Result type for source-state operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors returned by the synchronization engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Command or status pull failed at the backend boundary
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Classification of problems observed by the engine
///
/// Only transport failures and repeated drift are ever surfaced to the user;
/// the rest are absorbed and kept as diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Event delivery or a command call failed
    Transport,
    /// Malformed or unrecognised payload
    Protocol,
    /// An event implied a transition the state machine did not expect
    StateConflict,
    /// The position clock stopped advancing while playing
    DriftDetected,
}

/// A recorded, non-fatal problem
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}
