//! Raw wire envelope

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, Result};

/// A pushed message before classification
///
/// `{"type": "...", "source": "...", "data": {...}, "timestamp": 1712345678.9}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type", alias = "event", alias = "kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default)]
    pub data: Value,

    /// Seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl WireEnvelope {
    pub fn new(kind: impl Into<String>, source: Option<&str>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            source: source.map(str::to_string),
            data,
            timestamp: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| DecodeError::InvalidEnvelope(e.to_string()))
    }

    /// Source tag from the envelope, falling back to `data.source`
    ///
    /// Blank tags count as absent.
    pub fn source_tag(&self) -> Option<&str> {
        self.source
            .as_deref()
            .or_else(|| self.data.get("source").and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(epoch_seconds)
    }
}

/// Convert fractional epoch seconds into a UTC timestamp
pub(crate) fn epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64).single()
}
