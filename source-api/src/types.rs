//! Values shared between the backend and its clients

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ApiError;

/// Port a multiroom server listens on when discovery does not report one
pub const DEFAULT_ENDPOINT_PORT: u16 = 1704;

// ============================================================================
// SourceId
// ============================================================================

/// Identity of an audio source
///
/// Exactly one source is active at a time; [`SourceId::None`] is the idle
/// state. Wire names follow the backend's plugin names, and the descriptive
/// names are accepted as aliases when parsing. New backend plugins may add
/// variants, so matches outside this crate need a wildcard arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum SourceId {
    #[default]
    None,
    /// Networked streaming client (`librespot`)
    StreamClient,
    Bluetooth,
    /// Multiroom client (`snapclient`)
    MultiroomClient,
    /// Low-latency network audio receiver (`roc`)
    NetworkReceiver,
    WebRadio,
}

impl SourceId {
    /// All selectable sources, excluding `None`
    pub const SELECTABLE: [SourceId; 5] = [
        SourceId::StreamClient,
        SourceId::Bluetooth,
        SourceId::MultiroomClient,
        SourceId::NetworkReceiver,
        SourceId::WebRadio,
    ];

    /// Name used on the wire and in backend routes
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::None => "none",
            SourceId::StreamClient => "librespot",
            SourceId::Bluetooth => "bluetooth",
            SourceId::MultiroomClient => "snapclient",
            SourceId::NetworkReceiver => "roc",
            SourceId::WebRadio => "webradio",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SourceId::None)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(SourceId::None),
            "librespot" | "spotify" | "stream-client" | "stream_client" => Ok(SourceId::StreamClient),
            "bluetooth" | "bt" => Ok(SourceId::Bluetooth),
            "snapclient" | "macos" | "multiroom" | "multiroom-client" | "multiroom_client" => {
                Ok(SourceId::MultiroomClient)
            }
            "roc" | "network-receiver" | "network_receiver" => Ok(SourceId::NetworkReceiver),
            "webradio" | "web-radio" | "web_radio" => Ok(SourceId::WebRadio),
            other => Err(ApiError::UnknownSource(other.to_string())),
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The backend reports an idle system as either "none" or null
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(name) => name.parse().map_err(serde::de::Error::custom),
            None => Ok(SourceId::None),
        }
    }
}

// ============================================================================
// LifecyclePhase
// ============================================================================

/// Per-source lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecyclePhase {
    #[default]
    Inactive,
    /// Discoverable or waiting for a peer
    Ready,
    Connected,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Inactive => "inactive",
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::Connected => "connected",
        }
    }

    /// Map a backend plugin state onto a lifecycle phase
    ///
    /// Plugin states carry more detail than the three phases (`ready_to_connect`,
    /// `device_change_requested`, `error`); unknown strings yield `None`.
    pub fn from_plugin_state(state: &str) -> Option<Self> {
        match state.trim().to_ascii_lowercase().as_str() {
            "inactive" | "error" | "stopped" => Some(LifecyclePhase::Inactive),
            "ready" | "ready_to_connect" | "device_change_requested" => Some(LifecyclePhase::Ready),
            "connected" => Some(LifecyclePhase::Connected),
            _ => None,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecyclePhase {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_plugin_state(s).ok_or_else(|| ApiError::UnknownPhase(s.to_string()))
    }
}

impl Serialize for LifecyclePhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LifecyclePhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Metadata patch
// ============================================================================

/// A partial metadata payload as reported by the backend
///
/// Every field is optional: the backend sends whatever subset it has, and
/// absent fields mean "unchanged", not "cleared".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, alias = "album_art", skip_serializing_if = "Option::is_none")]
    pub album_art_url: Option<String>,
    #[serde(
        default,
        alias = "duration",
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
    #[serde(
        default,
        alias = "position",
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub position_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(
        default,
        rename = "deviceConnected",
        alias = "device_connected",
        skip_serializing_if = "Option::is_none"
    )]
    pub device_connected: Option<bool>,
}

impl MetadataPatch {
    /// True if the patch carries no fields at all
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }

    /// Combined connection flag
    ///
    /// `Some(false)` if either flag is explicitly false, `Some(true)` if at
    /// least one is true and none is false, `None` when neither is present.
    pub fn connection_flag(&self) -> Option<bool> {
        match (self.connected, self.device_connected) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (None, None) => None,
            _ => Some(true),
        }
    }

    /// True if the patch touches any track-describing field
    pub fn has_track_fields(&self) -> bool {
        self.title.is_some()
            || self.artist.is_some()
            || self.album.is_some()
            || self.album_art_url.is_some()
            || self.duration_ms.is_some()
    }
}

/// Accepts integer, float or numeric-string milliseconds; negatives and
/// garbage become `None`.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let from_f64 = |f: f64| {
        if f.is_finite() && f >= 0.0 {
            Some(f.round() as u64)
        } else {
            None
        }
    };
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().and_then(from_f64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().and_then(from_f64),
        _ => None,
    })
}

// ============================================================================
// Discovery and connection requests
// ============================================================================

/// A multiroom server found by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredEndpoint {
    pub host: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_ENDPOINT_PORT
}

impl DiscoveredEndpoint {
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
            port: DEFAULT_ENDPOINT_PORT,
        }
    }

    /// Human readable label, falling back to the host
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }
}

/// An inbound connection request awaiting the user's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConnection {
    pub request_id: String,
    pub host: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ============================================================================
// StateSnapshot
// ============================================================================

/// Full system state as returned by the status-pull route and carried by
/// `state_changed` events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub active_source: SourceId,
    #[serde(default)]
    pub plugin_state: Option<String>,
    #[serde(default)]
    pub transitioning: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: MetadataPatch,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub routing_mode: Option<String>,
    #[serde(default)]
    pub equalizer_enabled: Option<bool>,
    #[serde(default)]
    pub volume: Option<u8>,
}

impl StateSnapshot {
    /// Lifecycle phase reported for the active source, if recognisable
    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.plugin_state
            .as_deref()
            .and_then(LifecyclePhase::from_plugin_state)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
