//! Closed inbound event union

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use source_api::{DiscoveredEndpoint, MetadataPatch, PendingConnection, SourceId, StateSnapshot};

use crate::envelope::WireEnvelope;
use crate::error::{DecodeError, Result};

// ============================================================================
// EventKind
// ============================================================================

/// Every event kind the backend pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    VolumeChanged,
    MetadataUpdated,
    StatusUpdated,
    Seek,
    Error,
    DiscoveryResult,
    ConnectionRequest,
    ConnectionRejected,
    MonitorConnected,
    MonitorDisconnected,
    ServerDisappeared,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "state_changed" | "audio_state_changed" => EventKind::StateChanged,
            "volume_changed" => EventKind::VolumeChanged,
            "metadata_updated" | "audio_metadata_updated" => EventKind::MetadataUpdated,
            "status_updated" | "audio_status_updated" => EventKind::StatusUpdated,
            "seek" | "seek_event" => EventKind::Seek,
            "error" => EventKind::Error,
            "discovery_result" | "discovery" => EventKind::DiscoveryResult,
            "connection_request" => EventKind::ConnectionRequest,
            "connection_rejected" => EventKind::ConnectionRejected,
            "monitor_connected" => EventKind::MonitorConnected,
            "monitor_disconnected" => EventKind::MonitorDisconnected,
            "server_disappeared" => EventKind::ServerDisappeared,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChanged => "state_changed",
            EventKind::VolumeChanged => "volume_changed",
            EventKind::MetadataUpdated => "metadata_updated",
            EventKind::StatusUpdated => "status_updated",
            EventKind::Seek => "seek",
            EventKind::Error => "error",
            EventKind::DiscoveryResult => "discovery_result",
            EventKind::ConnectionRequest => "connection_request",
            EventKind::ConnectionRejected => "connection_rejected",
            EventKind::MonitorConnected => "monitor_connected",
            EventKind::MonitorDisconnected => "monitor_disconnected",
            EventKind::ServerDisappeared => "server_disappeared",
        }
    }

    /// Kinds that describe the whole system rather than one source
    ///
    /// These are meaningful without a source tag.
    pub fn is_system_level(&self) -> bool {
        matches!(
            self,
            EventKind::VolumeChanged
                | EventKind::Error
                | EventKind::DiscoveryResult
                | EventKind::ConnectionRequest
                | EventKind::ConnectionRejected
                | EventKind::ServerDisappeared
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EventPayload
// ============================================================================

/// Typed payload of an inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    StateChanged(StateSnapshot),
    VolumeChanged {
        volume: u8,
    },
    MetadataUpdated(MetadataPatch),
    StatusUpdated {
        status: Option<String>,
        plugin_state: Option<String>,
        fields: MetadataPatch,
    },
    Seek {
        position_ms: u64,
        duration_ms: Option<u64>,
    },
    Error {
        message: String,
    },
    DiscoveryResult {
        endpoints: Vec<DiscoveredEndpoint>,
    },
    ConnectionRequest(PendingConnection),
    ConnectionRejected {
        host: String,
        reason: Option<String>,
    },
    MonitorConnected {
        host: Option<String>,
    },
    MonitorDisconnected {
        host: Option<String>,
        reason: Option<String>,
    },
    ServerDisappeared {
        host: String,
    },
}

#[derive(Deserialize)]
struct StatusPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    plugin_state: Option<String>,
    #[serde(flatten)]
    fields: MetadataPatch,
}

#[derive(Deserialize)]
struct HostPayload {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::StateChanged(_) => EventKind::StateChanged,
            EventPayload::VolumeChanged { .. } => EventKind::VolumeChanged,
            EventPayload::MetadataUpdated(_) => EventKind::MetadataUpdated,
            EventPayload::StatusUpdated { .. } => EventKind::StatusUpdated,
            EventPayload::Seek { .. } => EventKind::Seek,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::DiscoveryResult { .. } => EventKind::DiscoveryResult,
            EventPayload::ConnectionRequest(_) => EventKind::ConnectionRequest,
            EventPayload::ConnectionRejected { .. } => EventKind::ConnectionRejected,
            EventPayload::MonitorConnected { .. } => EventKind::MonitorConnected,
            EventPayload::MonitorDisconnected { .. } => EventKind::MonitorDisconnected,
            EventPayload::ServerDisappeared { .. } => EventKind::ServerDisappeared,
        }
    }

    /// Decode the payload of a known kind
    pub fn decode(kind: EventKind, data: &Value) -> Result<Self> {
        let payload = match kind {
            EventKind::StateChanged => EventPayload::StateChanged(from_data(kind, data)?),
            EventKind::VolumeChanged => EventPayload::VolumeChanged {
                volume: decode_volume(data).ok_or_else(|| {
                    DecodeError::malformed(kind, "missing or non-numeric volume")
                })?,
            },
            EventKind::MetadataUpdated => {
                // Plugins publish `{source, metadata: {...}}`; older senders flatten it
                let fields = data
                    .get("metadata")
                    .filter(|inner| inner.is_object())
                    .unwrap_or(data);
                let patch: MetadataPatch = from_data(kind, fields)?;
                EventPayload::MetadataUpdated(patch)
            }
            EventKind::StatusUpdated => {
                let status: StatusPayload = from_data(kind, data)?;
                EventPayload::StatusUpdated {
                    status: status.status.map(|s| s.trim().to_ascii_lowercase()),
                    plugin_state: status.plugin_state,
                    fields: status.fields,
                }
            }
            EventKind::Seek => {
                let patch: MetadataPatch = from_data(kind, data)?;
                let position_ms = patch
                    .position_ms
                    .ok_or_else(|| DecodeError::malformed(kind, "missing position"))?;
                EventPayload::Seek {
                    position_ms,
                    duration_ms: patch.duration_ms,
                }
            }
            EventKind::Error => {
                let message = match data {
                    Value::String(s) => Some(s.as_str()),
                    _ => data
                        .get("error")
                        .or_else(|| data.get("message"))
                        .and_then(Value::as_str),
                };
                EventPayload::Error {
                    message: message
                        .ok_or_else(|| DecodeError::malformed(kind, "missing error message"))?
                        .to_string(),
                }
            }
            EventKind::DiscoveryResult => {
                let servers = match data {
                    Value::Array(_) => data,
                    _ => data
                        .get("servers")
                        .ok_or_else(|| DecodeError::malformed(kind, "missing servers"))?,
                };
                EventPayload::DiscoveryResult {
                    endpoints: from_data(kind, servers)?,
                }
            }
            EventKind::ConnectionRequest => EventPayload::ConnectionRequest(from_data(kind, data)?),
            EventKind::ConnectionRejected => {
                let payload: HostPayload = from_data(kind, data)?;
                EventPayload::ConnectionRejected {
                    host: payload
                        .host
                        .ok_or_else(|| DecodeError::malformed(kind, "missing host"))?,
                    reason: payload.reason,
                }
            }
            EventKind::MonitorConnected => {
                let payload: HostPayload = from_optional_data(kind, data)?;
                EventPayload::MonitorConnected { host: payload.host }
            }
            EventKind::MonitorDisconnected => {
                let payload: HostPayload = from_optional_data(kind, data)?;
                EventPayload::MonitorDisconnected {
                    host: payload.host,
                    reason: payload.reason,
                }
            }
            EventKind::ServerDisappeared => {
                let payload: HostPayload = from_data(kind, data)?;
                EventPayload::ServerDisappeared {
                    host: payload
                        .host
                        .ok_or_else(|| DecodeError::malformed(kind, "missing host"))?,
                }
            }
        };
        Ok(payload)
    }

    /// Source implied by the payload when the envelope carries no tag
    fn implied_source(&self) -> Option<SourceId> {
        match self {
            EventPayload::StateChanged(snapshot) if !snapshot.active_source.is_none() => {
                Some(snapshot.active_source)
            }
            EventPayload::MonitorConnected { .. } | EventPayload::MonitorDisconnected { .. } => {
                Some(SourceId::MultiroomClient)
            }
            _ => None,
        }
    }
}

fn from_data<T: for<'de> Deserialize<'de>>(kind: EventKind, data: &Value) -> Result<T> {
    if data.is_null() {
        return Err(DecodeError::malformed(kind, "missing payload"));
    }
    serde_json::from_value(data.clone()).map_err(|e| DecodeError::malformed(kind, e.to_string()))
}

fn from_optional_data<T: for<'de> Deserialize<'de>>(kind: EventKind, data: &Value) -> Result<T> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data.clone()
    };
    serde_json::from_value(data).map_err(|e| DecodeError::malformed(kind, e.to_string()))
}

fn decode_volume(data: &Value) -> Option<u8> {
    let raw = match data {
        Value::Number(_) => data,
        _ => data.get("volume")?,
    };
    let volume = raw.as_f64()?;
    if !volume.is_finite() {
        return None;
    }
    Some(volume.round().clamp(0.0, 100.0) as u8)
}

// ============================================================================
// InboundEvent
// ============================================================================

/// A decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Source the event is addressed to; `None` for untagged events
    pub source: Option<SourceId>,
    /// Backend timestamp, if the envelope carried one
    pub sent_at: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn new(source: Option<SourceId>, payload: EventPayload) -> Self {
        Self {
            source,
            sent_at: None,
            payload,
        }
    }

    /// Convenience for an event tagged with `source`
    pub fn tagged(source: SourceId, payload: EventPayload) -> Self {
        Self::new(Some(source), payload)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn from_envelope(envelope: WireEnvelope) -> Result<Self> {
        let kind = EventKind::from_name(&envelope.kind)
            .ok_or_else(|| DecodeError::UnknownKind(envelope.kind.clone()))?;

        let tag = match envelope.source_tag() {
            Some(tag) => Some(tag.parse::<SourceId>().map_err(|_| {
                DecodeError::UnknownSource {
                    kind: kind.to_string(),
                    source_tag: tag.to_string(),
                }
            })?),
            None => None,
        };

        let payload = EventPayload::decode(kind, &envelope.data)?;
        let source = tag.or_else(|| payload.implied_source());

        Ok(Self {
            source,
            sent_at: envelope.sent_at(),
            payload,
        })
    }
}
