//! Error types for event decoding

/// Result type for decoding operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Why an inbound message could not be turned into an event
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, or not an object with a kind tag
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The kind tag names no known event
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    /// The source tag names no known source
    #[error("Unknown source '{source_tag}' on {kind} event")]
    UnknownSource { kind: String, source_tag: String },

    /// The payload is missing required fields or has the wrong shape
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(kind: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        DecodeError::MalformedPayload {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}
