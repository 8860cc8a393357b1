//! Consolidated view and change notifications

use source_api::{DiscoveredEndpoint, LifecyclePhase, PendingConnection, SourceId};

use super::{ErrorState, Metadata};

/// Everything a consumer needs to render "now playing"
///
/// `source` is the confirmed source; while `transitioning` is set,
/// `requested_source` names the switch target and the metadata still
/// belongs to `source`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncView {
    pub source: SourceId,
    pub requested_source: SourceId,
    pub transitioning: bool,
    pub phase: LifecyclePhase,
    pub metadata: Metadata,
    pub has_valid_metadata: bool,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
    pub volume: Option<u8>,
    pub error: Option<ErrorState>,
    pub discovered: Vec<DiscoveredEndpoint>,
    pub pending_connections: Vec<PendingConnection>,
    pub routing_mode: Option<String>,
    pub equalizer_enabled: Option<bool>,
}

/// A change between two published views
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    Source { from: SourceId, to: SourceId },
    Transition { requested: SourceId, transitioning: bool },
    Phase(LifecyclePhase),
    Metadata,
    Position { position_ms: u64 },
    Playing(bool),
    Volume(Option<u8>),
    Error(Option<ErrorState>),
    Discovery,
    Connections,
    Settings,
}

impl ViewChange {
    /// Changes needed to go from `old` to `new`
    pub fn diff(old: &SyncView, new: &SyncView) -> Vec<ViewChange> {
        let mut changes = Vec::new();

        if old.source != new.source {
            changes.push(ViewChange::Source {
                from: old.source,
                to: new.source,
            });
        }
        if old.requested_source != new.requested_source || old.transitioning != new.transitioning {
            changes.push(ViewChange::Transition {
                requested: new.requested_source,
                transitioning: new.transitioning,
            });
        }
        if old.phase != new.phase {
            changes.push(ViewChange::Phase(new.phase));
        }
        if old.metadata != new.metadata || old.has_valid_metadata != new.has_valid_metadata {
            changes.push(ViewChange::Metadata);
        }
        if old.position_ms != new.position_ms || old.duration_ms != new.duration_ms {
            changes.push(ViewChange::Position {
                position_ms: new.position_ms,
            });
        }
        if old.is_playing != new.is_playing {
            changes.push(ViewChange::Playing(new.is_playing));
        }
        if old.volume != new.volume {
            changes.push(ViewChange::Volume(new.volume));
        }
        if old.error != new.error {
            changes.push(ViewChange::Error(new.error.clone()));
        }
        if old.discovered != new.discovered {
            changes.push(ViewChange::Discovery);
        }
        if old.pending_connections != new.pending_connections {
            changes.push(ViewChange::Connections);
        }
        if old.routing_mode != new.routing_mode || old.equalizer_enabled != new.equalizer_enabled {
            changes.push(ViewChange::Settings);
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_views_have_no_changes() {
        let view = SyncView::default();
        assert!(ViewChange::diff(&view, &view.clone()).is_empty());
    }

    #[test]
    fn test_diff_reports_each_section() {
        let old = SyncView::default();
        let new = SyncView {
            source: SourceId::Bluetooth,
            requested_source: SourceId::Bluetooth,
            phase: LifecyclePhase::Ready,
            position_ms: 1200,
            volume: Some(30),
            ..Default::default()
        };

        let changes = ViewChange::diff(&old, &new);
        assert!(changes.contains(&ViewChange::Source {
            from: SourceId::None,
            to: SourceId::Bluetooth
        }));
        assert!(changes.contains(&ViewChange::Phase(LifecyclePhase::Ready)));
        assert!(changes.contains(&ViewChange::Position { position_ms: 1200 }));
        assert!(changes.contains(&ViewChange::Volume(Some(30))));
        assert!(!changes.contains(&ViewChange::Metadata));
    }
}
