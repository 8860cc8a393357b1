//! Event normalization
//!
//! Turns a decoded [`InboundEvent`] into one [`SemanticUpdate`] or a
//! [`DiscardReason`]. This is the only place that interprets overloaded
//! status strings and connection flags, and the only defense against late
//! events from a deselected source: without sequence numbers, the source
//! tag is all there is.

use std::fmt;

use tracing::trace;

use source_api::{
    DiscoveredEndpoint, LifecyclePhase, MetadataPatch, PendingConnection, SourceId, StateSnapshot,
};
use source_events::{EventKind, EventPayload, InboundEvent};

use crate::error::ErrorKind;
use crate::source_machine::SourceMachine;

/// Statuses that imply a live peer
const POSITIVE_STATUSES: [&str; 4] = ["connected", "playing", "paused", "active"];

/// A normalized state update
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticUpdate {
    /// Backend reports `source` as the active source
    SourceConfirmed {
        source: SourceId,
        phase: LifecyclePhase,
        snapshot: StateSnapshot,
    },
    /// Backend reports no active source
    SourceCleared { snapshot: StateSnapshot },
    /// The source lost its peer; its metadata is void
    Disconnect { source: SourceId },
    ConnectivityConfirmed {
        source: SourceId,
        /// Playing state implied by the status, if any
        playing: Option<bool>,
        patch: MetadataPatch,
    },
    PhaseReported {
        source: SourceId,
        phase: LifecyclePhase,
    },
    Playback {
        source: SourceId,
        is_playing: bool,
        patch: MetadataPatch,
    },
    Metadata {
        source: SourceId,
        patch: MetadataPatch,
    },
    Seek {
        source: SourceId,
        position_ms: u64,
        duration_ms: Option<u64>,
    },
    Volume(u8),
    Failure {
        source: Option<SourceId>,
        message: String,
    },
    Discovery(Vec<DiscoveredEndpoint>),
    ConnectionRequested(PendingConnection),
    ConnectionRejected { host: String, reason: Option<String> },
    EndpointLost { host: String },
}

/// Why an event was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Tagged for a source that is neither displayed nor the switch target
    InactiveSource { kind: EventKind, source: SourceId },
    /// A source-scoped event without a source tag
    Untagged { kind: EventKind },
    /// Snapshot taken mid-switch
    IntermediateState,
    /// Snapshot still showing the previous source while a switch is pending
    SwitchNotStarted { reported: SourceId },
    /// Snapshot names a source the state machine did not expect
    StateConflict { reported: SourceId, expected: SourceId },
    /// Nothing actionable in the payload
    Empty { kind: EventKind },
}

impl DiscardReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscardReason::InactiveSource { .. }
            | DiscardReason::SwitchNotStarted { .. }
            | DiscardReason::StateConflict { .. } => ErrorKind::StateConflict,
            DiscardReason::Untagged { .. }
            | DiscardReason::IntermediateState
            | DiscardReason::Empty { .. } => ErrorKind::Protocol,
        }
    }

    /// Whether local state may have diverged from the backend
    pub fn warrants_resync(&self) -> bool {
        matches!(self, DiscardReason::StateConflict { .. })
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::InactiveSource { kind, source } => {
                write!(f, "{} event for inactive source {}", kind, source)
            }
            DiscardReason::Untagged { kind } => write!(f, "{} event without source tag", kind),
            DiscardReason::IntermediateState => write!(f, "intermediate state snapshot"),
            DiscardReason::SwitchNotStarted { reported } => {
                write!(f, "snapshot still reports {} while switching", reported)
            }
            DiscardReason::StateConflict { reported, expected } => {
                write!(f, "snapshot reports {} but expected {}", reported, expected)
            }
            DiscardReason::Empty { kind } => write!(f, "{} event carries nothing actionable", kind),
        }
    }
}

/// Outcome of normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Apply(SemanticUpdate),
    Discard(DiscardReason),
}

/// Classify `event` against the current source state
pub fn normalize(event: &InboundEvent, machine: &SourceMachine) -> Normalized {
    let kind = event.kind();

    if let EventPayload::StateChanged(snapshot) = &event.payload {
        return normalize_snapshot(snapshot, machine);
    }

    let scope = match event.source {
        Some(source) if machine.accepts(source) => Some(source),
        Some(source) => {
            trace!(%kind, %source, "Discarding event for inactive source");
            return Normalized::Discard(DiscardReason::InactiveSource { kind, source });
        }
        None if kind.is_system_level() => None,
        None => return Normalized::Discard(DiscardReason::Untagged { kind }),
    };

    match &event.payload {
        EventPayload::StateChanged(snapshot) => normalize_snapshot(snapshot, machine),
        EventPayload::VolumeChanged { volume } => Normalized::Apply(SemanticUpdate::Volume(*volume)),
        EventPayload::Error { message } => Normalized::Apply(SemanticUpdate::Failure {
            source: scope,
            message: message.clone(),
        }),
        EventPayload::DiscoveryResult { endpoints } => {
            Normalized::Apply(SemanticUpdate::Discovery(endpoints.clone()))
        }
        EventPayload::ConnectionRequest(request) => {
            Normalized::Apply(SemanticUpdate::ConnectionRequested(request.clone()))
        }
        EventPayload::ConnectionRejected { host, reason } => {
            Normalized::Apply(SemanticUpdate::ConnectionRejected {
                host: host.clone(),
                reason: reason.clone(),
            })
        }
        EventPayload::ServerDisappeared { host } => {
            Normalized::Apply(SemanticUpdate::EndpointLost { host: host.clone() })
        }
        // Everything below is source-scoped and has a tag
        payload => match scope {
            Some(source) => normalize_scoped(source, payload),
            None => Normalized::Discard(DiscardReason::Untagged { kind }),
        },
    }
}

fn normalize_snapshot(snapshot: &StateSnapshot, machine: &SourceMachine) -> Normalized {
    if snapshot.transitioning {
        return Normalized::Discard(DiscardReason::IntermediateState);
    }

    let reported = snapshot.active_source;
    if reported.is_none() {
        return Normalized::Apply(SemanticUpdate::SourceCleared {
            snapshot: snapshot.clone(),
        });
    }

    if reported == machine.requested() {
        return Normalized::Apply(SemanticUpdate::SourceConfirmed {
            source: reported,
            phase: snapshot.phase().unwrap_or(LifecyclePhase::Ready),
            snapshot: snapshot.clone(),
        });
    }

    if machine.is_transitioning() && reported == machine.displayed() {
        return Normalized::Discard(DiscardReason::SwitchNotStarted { reported });
    }

    Normalized::Discard(DiscardReason::StateConflict {
        reported,
        expected: machine.requested(),
    })
}

fn normalize_scoped(source: SourceId, payload: &EventPayload) -> Normalized {
    let update = match payload {
        EventPayload::StatusUpdated {
            status,
            plugin_state,
            fields,
        } => return normalize_status(source, status.as_deref(), plugin_state.as_deref(), fields),
        EventPayload::MetadataUpdated(patch) => {
            if patch.connection_flag() == Some(false) {
                SemanticUpdate::Disconnect { source }
            } else if patch.is_empty() {
                return Normalized::Discard(DiscardReason::Empty {
                    kind: EventKind::MetadataUpdated,
                });
            } else {
                SemanticUpdate::Metadata {
                    source,
                    patch: patch.clone(),
                }
            }
        }
        EventPayload::Seek {
            position_ms,
            duration_ms,
        } => SemanticUpdate::Seek {
            source,
            position_ms: *position_ms,
            duration_ms: *duration_ms,
        },
        EventPayload::MonitorConnected { host } => SemanticUpdate::ConnectivityConfirmed {
            source,
            playing: None,
            patch: MetadataPatch {
                host: host.clone(),
                connected: Some(true),
                ..Default::default()
            },
        },
        EventPayload::MonitorDisconnected { .. } => SemanticUpdate::Disconnect { source },
        other => {
            return Normalized::Discard(DiscardReason::Empty { kind: other.kind() });
        }
    };
    Normalized::Apply(update)
}

/// Status translation; disconnection beats every other field
fn normalize_status(
    source: SourceId,
    status: Option<&str>,
    plugin_state: Option<&str>,
    fields: &MetadataPatch,
) -> Normalized {
    let flag = fields.connection_flag();
    if status == Some("disconnected") || flag == Some(false) {
        return Normalized::Apply(SemanticUpdate::Disconnect { source });
    }

    let phase = plugin_state.and_then(LifecyclePhase::from_plugin_state);
    let status_playing = match status {
        Some("playing") => Some(true),
        Some("paused") | Some("stopped") => Some(false),
        _ => None,
    };

    let positive = status.is_some_and(|s| POSITIVE_STATUSES.contains(&s))
        || phase == Some(LifecyclePhase::Connected)
        || flag == Some(true)
        || fields.is_playing == Some(true);

    if positive {
        return Normalized::Apply(SemanticUpdate::ConnectivityConfirmed {
            source,
            playing: status_playing.or(fields.is_playing),
            patch: fields.clone(),
        });
    }

    if let Some(is_playing) = status_playing {
        return Normalized::Apply(SemanticUpdate::Playback {
            source,
            is_playing,
            patch: fields.clone(),
        });
    }

    if let Some(phase) = phase {
        return Normalized::Apply(SemanticUpdate::PhaseReported { source, phase });
    }

    if fields.is_empty() {
        Normalized::Discard(DiscardReason::Empty {
            kind: EventKind::StatusUpdated,
        })
    } else {
        Normalized::Apply(SemanticUpdate::Metadata {
            source,
            patch: fields.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Instant;

    fn active(source: SourceId) -> SourceMachine {
        let mut machine = SourceMachine::new();
        machine.confirm(source, LifecyclePhase::Connected);
        machine
    }

    fn status(source: SourceId, status: &str, fields: MetadataPatch) -> InboundEvent {
        InboundEvent::tagged(
            source,
            EventPayload::StatusUpdated {
                status: Some(status.to_string()),
                plugin_state: None,
                fields,
            },
        )
    }

    fn snapshot(source: SourceId, plugin_state: &str) -> InboundEvent {
        InboundEvent::tagged(
            source,
            EventPayload::StateChanged(StateSnapshot {
                active_source: source,
                plugin_state: Some(plugin_state.to_string()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_disconnect_beats_connected_flag() {
        let machine = active(SourceId::Bluetooth);
        let event = status(
            SourceId::Bluetooth,
            "disconnected",
            MetadataPatch {
                connected: Some(true),
                title: Some("Song".into()),
                ..Default::default()
            },
        );

        assert_eq!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::Disconnect {
                source: SourceId::Bluetooth
            })
        );
    }

    #[test]
    fn test_false_device_flag_is_disconnect() {
        let machine = active(SourceId::Bluetooth);
        let event = status(
            SourceId::Bluetooth,
            "playing",
            MetadataPatch {
                connected: Some(true),
                device_connected: Some(false),
                ..Default::default()
            },
        );
        assert!(matches!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::Disconnect { .. })
        ));
    }

    #[rstest]
    #[case("playing", Some(true))]
    #[case("paused", Some(false))]
    #[case("connected", None)]
    #[case("active", None)]
    fn test_positive_statuses_confirm_connectivity(
        #[case] word: &str,
        #[case] expected: Option<bool>,
    ) {
        let machine = active(SourceId::StreamClient);
        let event = status(SourceId::StreamClient, word, MetadataPatch::default());
        match normalize(&event, &machine) {
            Normalized::Apply(SemanticUpdate::ConnectivityConfirmed { playing, .. }) => {
                assert_eq!(playing, expected, "status {}", word)
            }
            other => panic!("status {} normalized to {:?}", word, other),
        }
    }

    #[test]
    fn test_playing_flag_confirms_connectivity() {
        let machine = active(SourceId::StreamClient);
        let event = status(
            SourceId::StreamClient,
            "unknown",
            MetadataPatch {
                is_playing: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::ConnectivityConfirmed {
                source: SourceId::StreamClient,
                playing: Some(true),
                patch: MetadataPatch {
                    is_playing: Some(true),
                    ..Default::default()
                },
            })
        );
    }

    #[test]
    fn test_stopped_is_playback_update() {
        let machine = active(SourceId::WebRadio);
        let event = status(SourceId::WebRadio, "stopped", MetadataPatch::default());
        assert!(matches!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::Playback {
                is_playing: false,
                ..
            })
        ));
    }

    #[test]
    fn test_events_for_inactive_source_are_discarded() {
        let machine = active(SourceId::Bluetooth);
        let event = InboundEvent::tagged(
            SourceId::StreamClient,
            EventPayload::Seek {
                position_ms: 1000,
                duration_ms: None,
            },
        );

        assert_eq!(
            normalize(&event, &machine),
            Normalized::Discard(DiscardReason::InactiveSource {
                kind: EventKind::Seek,
                source: SourceId::StreamClient
            })
        );
    }

    #[test]
    fn test_untagged_scoped_event_is_discarded() {
        let machine = active(SourceId::Bluetooth);
        let event = InboundEvent::new(None, EventPayload::MetadataUpdated(MetadataPatch::default()));
        assert_eq!(
            normalize(&event, &machine),
            Normalized::Discard(DiscardReason::Untagged {
                kind: EventKind::MetadataUpdated
            })
        );

        let event = InboundEvent::new(None, EventPayload::VolumeChanged { volume: 20 });
        assert_eq!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::Volume(20))
        );
    }

    #[test]
    fn test_confirmation_for_target() {
        let mut machine = active(SourceId::StreamClient);
        machine.request(SourceId::Bluetooth, Instant::now());

        let normalized = normalize(&snapshot(SourceId::Bluetooth, "ready"), &machine);
        assert!(matches!(
            normalized,
            Normalized::Apply(SemanticUpdate::SourceConfirmed {
                source: SourceId::Bluetooth,
                phase: LifecyclePhase::Ready,
                ..
            })
        ));
    }

    #[test]
    fn test_superseded_confirmation_is_a_conflict() {
        let mut machine = active(SourceId::StreamClient);
        machine.request(SourceId::Bluetooth, Instant::now());
        machine.request(SourceId::WebRadio, Instant::now());

        let normalized = normalize(&snapshot(SourceId::Bluetooth, "ready"), &machine);
        assert_eq!(
            normalized,
            Normalized::Discard(DiscardReason::StateConflict {
                reported: SourceId::Bluetooth,
                expected: SourceId::WebRadio
            })
        );

        let normalized = normalize(&snapshot(SourceId::StreamClient, "connected"), &machine);
        assert_eq!(
            normalized,
            Normalized::Discard(DiscardReason::SwitchNotStarted {
                reported: SourceId::StreamClient
            })
        );
    }

    #[test]
    fn test_intermediate_snapshot_is_ignored() {
        let machine = active(SourceId::StreamClient);
        let event = InboundEvent::new(
            None,
            EventPayload::StateChanged(StateSnapshot {
                active_source: SourceId::Bluetooth,
                transitioning: true,
                ..Default::default()
            }),
        );
        assert_eq!(
            normalize(&event, &machine),
            Normalized::Discard(DiscardReason::IntermediateState)
        );
    }

    #[test]
    fn test_none_snapshot_clears() {
        let machine = active(SourceId::WebRadio);
        let event = InboundEvent::new(None, EventPayload::StateChanged(StateSnapshot::default()));
        assert!(matches!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::SourceCleared { .. })
        ));
    }

    #[test]
    fn test_plugin_ready_reports_phase() {
        let machine = active(SourceId::Bluetooth);
        let event = InboundEvent::tagged(
            SourceId::Bluetooth,
            EventPayload::StatusUpdated {
                status: None,
                plugin_state: Some("ready_to_connect".into()),
                fields: MetadataPatch::default(),
            },
        );
        assert_eq!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::PhaseReported {
                source: SourceId::Bluetooth,
                phase: LifecyclePhase::Ready
            })
        );
    }

    #[test]
    fn test_monitor_events() {
        let machine = active(SourceId::MultiroomClient);
        let event = InboundEvent::tagged(
            SourceId::MultiroomClient,
            EventPayload::MonitorDisconnected {
                host: Some("10.0.0.4".into()),
                reason: None,
            },
        );
        assert!(matches!(
            normalize(&event, &machine),
            Normalized::Apply(SemanticUpdate::Disconnect { .. })
        ));
    }
}
