//! Metadata reconciliation
//!
//! Per source the reconciler keeps the merged current record plus a
//! last-known-good snapshot. Applying an update is split into [`plan`] and
//! [`commit`] so the caller can reset the position estimator for a track
//! change *before* the new record becomes visible.
//!
//! [`plan`]: MetadataReconciler::plan
//! [`commit`]: MetadataReconciler::commit

use std::collections::HashMap;

use tracing::{debug, trace};

use source_api::{MetadataPatch, SourceId};

use crate::model::Metadata;
use crate::source_machine::SourceMachine;

/// A new track was detected in an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackChange {
    pub title: String,
    /// Position embedded in the update, else 0
    pub position_ms: u64,
}

/// A merge that has been computed but not applied
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub source: SourceId,
    pub merged: Metadata,
    pub track_change: Option<TrackChange>,
}

#[derive(Debug, Clone, Default)]
struct SourceRecord {
    current: Metadata,
    last_known_good: Option<Metadata>,
}

#[derive(Debug, Default)]
pub struct MetadataReconciler {
    records: HashMap<SourceId, SourceRecord>,
}

impl MetadataReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into the record for `scope`
    ///
    /// Dropped (returns `None`) unless `machine` accepts `scope`. When the
    /// update starts a new track, `on_track_change` runs before the merged
    /// record is stored.
    pub fn apply_update<F>(
        &mut self,
        machine: &SourceMachine,
        scope: SourceId,
        patch: &MetadataPatch,
        on_track_change: F,
    ) -> Option<Metadata>
    where
        F: FnOnce(&TrackChange),
    {
        if !machine.accepts(scope) {
            trace!(%scope, "Dropping metadata for inactive source");
            return None;
        }

        let plan = self.plan(scope, patch);
        if let Some(change) = &plan.track_change {
            on_track_change(change);
        }
        Some(self.commit(plan).clone())
    }

    /// Compute the merge of `patch` into `source`'s record
    pub fn plan(&self, source: SourceId, patch: &MetadataPatch) -> MergePlan {
        let record = self.records.get(&source);
        let current = record.map(|r| r.current.clone()).unwrap_or_default();
        let merged = current.merged(patch);

        let previous_title = record.and_then(|r| {
            r.current
                .track_title()
                .or_else(|| r.last_known_good.as_ref().and_then(Metadata::track_title))
        });

        let track_change = patch
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty() && Some(*title) != previous_title)
            .map(|title| TrackChange {
                title: title.to_string(),
                position_ms: patch.position_ms.unwrap_or(0),
            });

        MergePlan {
            source,
            merged,
            track_change,
        }
    }

    /// Store a planned merge, snapshotting it as last-known-good if valid
    pub fn commit(&mut self, plan: MergePlan) -> &Metadata {
        let record = self.records.entry(plan.source).or_default();
        if let Some(change) = &plan.track_change {
            debug!(source = %plan.source, title = %change.title, "Track changed");
        }
        if plan.merged.is_valid() {
            record.last_known_good = Some(plan.merged.clone());
        }
        record.current = plan.merged;
        &record.current
    }

    /// Explicit disconnect: forget everything about `source`
    pub fn disconnect(&mut self, source: SourceId) {
        if self.records.remove(&source).is_some() {
            debug!(%source, "Cleared metadata on disconnect");
        }
    }

    /// Drop every record except `keep`'s
    pub fn reset_except(&mut self, keep: SourceId) {
        self.records.retain(|source, _| *source == keep);
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
    }

    pub fn current(&self, source: SourceId) -> Option<&Metadata> {
        self.records.get(&source).map(|r| &r.current)
    }

    pub fn last_known_good(&self, source: SourceId) -> Option<&Metadata> {
        self.records
            .get(&source)
            .and_then(|r| r.last_known_good.as_ref())
    }

    /// Record to show for `source`
    ///
    /// The current record if valid; otherwise last-known-good with the
    /// current record's filled fields on top, so a transient empty update
    /// never blanks the display.
    pub fn displayed(&self, source: SourceId) -> Metadata {
        let Some(record) = self.records.get(&source) else {
            return Metadata::default();
        };
        if record.current.is_valid() {
            return record.current.clone();
        }
        match &record.last_known_good {
            Some(lkg) => record.current.overlay(lkg),
            None => record.current.clone(),
        }
    }

    pub fn has_valid(&self, source: SourceId) -> bool {
        self.records
            .get(&source)
            .is_some_and(|r| r.current.is_valid() || r.last_known_good.is_some())
    }
}
