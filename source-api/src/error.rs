use thiserror::Error;

/// Errors raised while talking to the backend
///
/// A command the backend understood but refused is not an error; it comes
/// back as [`crate::CommandOutcome::Rejected`]. These variants cover the
/// cases where no usable answer was obtained at all.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (connection refused, timeout, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a server-side failure status
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// The configured base URL or a derived route is not a valid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A name that does not denote a known source
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// A lifecycle phase string that is not recognised
    #[error("Unknown lifecycle phase: {0}")]
    UnknownPhase(String),
}

impl ApiError {
    /// True if the failure happened below the backend's application layer
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Http { .. })
    }
}

/// Type alias for results that can return an ApiError
pub type Result<T> = std::result::Result<T, ApiError>;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}
