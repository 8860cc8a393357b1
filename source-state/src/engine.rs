//! Synchronization façade
//!
//! [`SyncEngine`] is the single entry point for the rest of the application:
//! submit inbound events, issue commands, read or watch the consolidated
//! view. All mutation runs under one mutex and runs to completion before the
//! lock is released; the lock is never held across an await.
//!
//! ```text
//! inbound event ──▶ normalize ──▶ { SourceMachine, MetadataReconciler, PositionEstimator }
//!                                                   │
//!                      tick (100ms) ────────────────┤
//!                                                   ▼
//!                                     watch<SyncView> + broadcast<ViewChange>
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use source_api::{
    BackendClient, Command, CommandOutcome, ConnectionTarget, DiscoveredEndpoint, LifecyclePhase,
    MetadataPatch, OperationClass, PendingConnection, SourceId, StateSnapshot,
};
use source_events::{DecodeError, InboundEvent};

use crate::config::SyncConfig;
use crate::error::{Diagnostic, ErrorKind, Result};
use crate::model::{ErrorState, Metadata, SyncView, ViewChange};
use crate::normalizer::{normalize, DiscardReason, Normalized, SemanticUpdate};
use crate::position::{Clock, PositionEstimator, SystemClock, Ticker};
use crate::reconciler::MetadataReconciler;
use crate::source_machine::{SelectOutcome, SourceMachine};

const UNRESPONSIVE_MESSAGE: &str = "Source unresponsive";

// ============================================================================
// Public types
// ============================================================================

/// Messages from the (external) push-event transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// A raw pushed message
    Event(String),
    /// The transport reconnected; events may have been lost
    Reconnected,
    /// The transport shut down
    Closed,
}

/// What happened to a submitted event
#[derive(Debug, Clone, PartialEq)]
pub enum EventDisposition {
    Applied,
    Discarded(DiscardReason),
    Malformed(DecodeError),
}

impl EventDisposition {
    pub fn is_applied(&self) -> bool {
        matches!(self, EventDisposition::Applied)
    }
}

// ============================================================================
// EngineState
// ============================================================================

struct EngineState {
    machine: SourceMachine,
    reconciler: MetadataReconciler,
    estimator: PositionEstimator,
    ticker: Ticker,

    last_tick_position: u64,
    last_tick_advance: Instant,
    drift_restarts: u32,
    drift_reported: bool,

    error: Option<ErrorState>,
    discovered: Vec<DiscoveredEndpoint>,
    pending_connections: Vec<PendingConnection>,
    volume: Option<u8>,
    routing_mode: Option<String>,
    equalizer_enabled: Option<bool>,

    transition_timer: Option<JoinHandle<()>>,
    transition_seq: u64,
    last_conflict_resync: Option<Instant>,

    diagnostics: VecDeque<Diagnostic>,
}

impl EngineState {
    fn set_error(&mut self, operation: OperationClass, message: impl Into<String>) {
        self.error = Some(ErrorState::new(operation, message));
    }

    fn clear_error(&mut self, operation: OperationClass) {
        if self.error.as_ref().is_some_and(|e| e.operation == operation) {
            self.error = None;
        }
    }

    fn record(&mut self, diagnostic: Diagnostic, capacity: usize) {
        self.diagnostics.push_back(diagnostic);
        while self.diagnostics.len() > capacity {
            self.diagnostics.pop_front();
        }
    }

    /// Stop interpolation and forget the anchor and every window
    fn reset_playback(&mut self) {
        self.ticker.stop();
        self.estimator.reset();
        self.last_tick_position = 0;
        self.drift_restarts = 0;
        self.drift_reported = false;
    }

    fn cancel_transition_timer(&mut self) {
        if let Some(handle) = self.transition_timer.take() {
            handle.abort();
        }
    }

    fn apply_settings(&mut self, snapshot: &StateSnapshot) {
        if snapshot.routing_mode.is_some() {
            self.routing_mode = snapshot.routing_mode.clone();
        }
        if snapshot.equalizer_enabled.is_some() {
            self.equalizer_enabled = snapshot.equalizer_enabled;
        }
        if snapshot.volume.is_some() {
            self.volume = snapshot.volume;
        }
    }

    fn remove_pending_connection(&mut self, target: &ConnectionTarget) {
        self.pending_connections.retain(|pending| match target {
            ConnectionTarget::RequestId(id) => &pending.request_id != id,
            ConnectionTarget::Host(host) => &pending.host != host,
        });
    }

    fn view(&self) -> SyncView {
        let source = self.machine.displayed();
        let (metadata, has_valid_metadata) = if source.is_none() {
            (Metadata::default(), false)
        } else {
            (
                self.reconciler.displayed(source),
                self.reconciler.has_valid(source),
            )
        };
        let (position_ms, is_playing) = if source.is_none() {
            (0, false)
        } else {
            (
                self.estimator.estimate_now(),
                self.estimator.is_effectively_playing(),
            )
        };

        SyncView {
            source,
            requested_source: self.machine.requested(),
            transitioning: self.machine.is_transitioning(),
            phase: self.machine.phase(),
            metadata,
            has_valid_metadata,
            position_ms,
            duration_ms: self.estimator.duration_ms(),
            is_playing,
            volume: self.volume,
            error: self.error.clone(),
            discovered: self.discovered.clone(),
            pending_connections: self.pending_connections.clone(),
            routing_mode: self.routing_mode.clone(),
            equalizer_enabled: self.equalizer_enabled,
        }
    }
}

// ============================================================================
// EngineInner
// ============================================================================

struct EngineInner {
    state: Mutex<EngineState>,
    backend: Arc<dyn BackendClient>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    view_tx: watch::Sender<SyncView>,
    changes_tx: broadcast::Sender<ViewChange>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_transition_timer();
        state.ticker.stop();
    }
}

impl EngineInner {
    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    fn submit_event(self: &Arc<Self>, event: &InboundEvent) -> EventDisposition {
        let mut resync = false;
        let disposition = {
            let mut state = self.state.lock();
            let disposition = match normalize(event, &state.machine) {
                Normalized::Apply(update) => {
                    debug!(kind = %event.kind(), "Applying {:?}", update);
                    self.apply_update(&mut state, update);
                    self.sync_ticker(&mut state);
                    EventDisposition::Applied
                }
                Normalized::Discard(reason) => {
                    if reason.warrants_resync() {
                        warn!(%reason, "Discarding conflicting event");
                        resync = self.config.resync_on_conflict && self.conflict_resync_due(&mut state);
                    } else {
                        debug!(%reason, "Discarding event");
                    }
                    state.record(
                        Diagnostic::new(reason.kind(), reason.to_string()),
                        self.config.diagnostics_capacity,
                    );
                    EventDisposition::Discarded(reason)
                }
            };
            // Every inbound event doubles as a stall check, even with no view reader
            self.check_drift(&mut state);
            self.publish(&state);
            disposition
        };

        if resync {
            self.spawn_resync();
        }
        disposition
    }

    fn conflict_resync_due(&self, state: &mut EngineState) -> bool {
        let now = self.clock.now();
        let due = state
            .last_conflict_resync
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.resync_cooldown);
        if due {
            state.last_conflict_resync = Some(now);
        }
        due
    }

    fn apply_update(self: &Arc<Self>, state: &mut EngineState, update: SemanticUpdate) {
        match update {
            SemanticUpdate::SourceConfirmed {
                source,
                phase,
                snapshot,
            } => self.confirm_source(state, source, phase, &snapshot),
            SemanticUpdate::SourceCleared { snapshot } => {
                let previous = state.machine.clear();
                if !previous.is_none() {
                    info!(%previous, "No active source");
                }
                if !state.machine.is_transitioning() {
                    state.cancel_transition_timer();
                }
                state.reset_playback();
                state.reconciler.clear_all();
                state.discovered.clear();
                state.pending_connections.clear();
                state.apply_settings(&snapshot);
            }
            SemanticUpdate::Disconnect { source } => {
                info!(%source, "Source disconnected");
                state.reconciler.disconnect(source);
                if source == state.machine.displayed() {
                    state.machine.set_phase(source, LifecyclePhase::Ready);
                    state.reset_playback();
                }
            }
            SemanticUpdate::ConnectivityConfirmed {
                source,
                playing,
                patch,
            } => {
                state.machine.set_phase(source, LifecyclePhase::Connected);
                self.apply_metadata(state, source, &patch);
                if let Some(is_playing) = playing {
                    if source == state.machine.displayed() {
                        state.estimator.on_play_state_change(is_playing);
                    }
                }
            }
            SemanticUpdate::PhaseReported { source, phase } => {
                if state.machine.set_phase(source, phase) && phase != LifecyclePhase::Connected {
                    state.estimator.on_play_state_change(false);
                }
            }
            SemanticUpdate::Playback {
                source,
                is_playing,
                patch,
            } => {
                self.apply_metadata(state, source, &patch);
                if source == state.machine.displayed() {
                    state.estimator.on_play_state_change(is_playing);
                }
            }
            SemanticUpdate::Metadata { source, patch } => {
                self.apply_metadata(state, source, &patch);
            }
            SemanticUpdate::Seek {
                source,
                position_ms,
                duration_ms,
            } => {
                let patch = MetadataPatch {
                    position_ms: Some(position_ms),
                    duration_ms,
                    ..Default::default()
                };
                self.apply_metadata(state, source, &patch);
                if source == state.machine.displayed() {
                    debug!(%source, position_ms, "Seek");
                    state.estimator.on_seek(position_ms, duration_ms);
                }
            }
            SemanticUpdate::Volume(volume) => state.volume = Some(volume),
            SemanticUpdate::Failure { source, message } => {
                warn!(source = ?source, %message, "Backend reported an error");
                state.set_error(OperationClass::Backend, message);
            }
            SemanticUpdate::Discovery(endpoints) => {
                debug!(count = endpoints.len(), "Discovery result");
                state.discovered = endpoints;
                state.clear_error(OperationClass::Discovery);
            }
            SemanticUpdate::ConnectionRequested(request) => {
                if !state
                    .pending_connections
                    .iter()
                    .any(|p| p.request_id == request.request_id)
                {
                    info!(host = %request.host, "Inbound connection request");
                    state.pending_connections.push(request);
                }
            }
            SemanticUpdate::ConnectionRejected { host, reason } => {
                debug!(%host, reason = ?reason, "Connection rejected");
                state.pending_connections.retain(|p| p.host != host);
            }
            SemanticUpdate::EndpointLost { host } => {
                state.discovered.retain(|e| e.host != host);
            }
        }
    }

    fn confirm_source(
        self: &Arc<Self>,
        state: &mut EngineState,
        source: SourceId,
        phase: LifecyclePhase,
        snapshot: &StateSnapshot,
    ) {
        let confirmation = state.machine.confirm(source, phase);
        state.cancel_transition_timer();

        if confirmation.switched {
            info!(from = %confirmation.previous, to = %source, %phase, "Source switch confirmed");
            state.reconciler.reset_except(source);
            state.reset_playback();
            state.discovered.clear();
            state.pending_connections.clear();
            state.error = None;

            // Metadata buffered for the target during the switch
            if let Some(record) = state.reconciler.current(source) {
                let (position, duration, playing) =
                    (record.position_ms.unwrap_or(0), record.duration_ms, record.is_playing);
                state.estimator.on_anchor_update(position, duration, playing);
            }
        }

        if !snapshot.metadata.is_empty() {
            self.apply_metadata(state, source, &snapshot.metadata);
        }
        state.apply_settings(snapshot);
        match &snapshot.error {
            Some(message) => state.set_error(OperationClass::Backend, message.clone()),
            None => state.clear_error(OperationClass::Backend),
        }
    }

    /// Merge a patch and keep the estimator in step for the displayed source
    fn apply_metadata(&self, state: &mut EngineState, source: SourceId, patch: &MetadataPatch) {
        let displayed = source == state.machine.displayed();
        let EngineState {
            machine,
            reconciler,
            estimator,
            ..
        } = state;

        let merged = reconciler.apply_update(machine, source, patch, |change| {
            if displayed {
                estimator.on_track_change(change.position_ms);
            }
        });
        if merged.is_none() || !displayed {
            return;
        }

        if let Some(position) = patch.position_ms {
            estimator.on_anchor_update(position, patch.duration_ms, patch.is_playing);
        } else {
            if patch.duration_ms.is_some() {
                estimator.set_duration(patch.duration_ms);
            }
            if let Some(is_playing) = patch.is_playing {
                estimator.on_playing_hint(is_playing);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Tick and drift
    // ------------------------------------------------------------------------

    /// Run the tick exactly while playback is effective
    fn sync_ticker(self: &Arc<Self>, state: &mut EngineState) {
        let should_run =
            !state.machine.displayed().is_none() && state.estimator.is_effectively_playing();
        if should_run {
            if !state.ticker.is_running() {
                self.start_ticker(state);
            }
        } else {
            state.ticker.stop();
        }
    }

    fn start_ticker(self: &Arc<Self>, state: &mut EngineState) {
        let weak: Weak<EngineInner> = Arc::downgrade(self);
        let started = state
            .ticker
            .start(self.config.tick_interval, move |generation| match weak.upgrade() {
                Some(inner) => inner.on_tick(generation),
                None => false,
            });

        if started {
            state.last_tick_position = state.estimator.estimate_now();
            state.last_tick_advance = self.clock.now();
        }
    }

    fn on_tick(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if !state.ticker.is_running() || state.ticker.generation() != generation {
            return false;
        }

        if state.machine.displayed().is_none() || !state.estimator.is_effectively_playing() {
            state.ticker.mark_exited(generation);
            self.publish(&state);
            return false;
        }

        let position = state.estimator.estimate_now();
        if position != state.last_tick_position {
            state.last_tick_position = position;
            state.last_tick_advance = self.clock.now();
            state.drift_restarts = 0;
            if state.drift_reported {
                state.drift_reported = false;
                state.clear_error(OperationClass::Playback);
            }
        }

        self.publish(&state);
        true
    }

    /// Restart a stalled tick; report the source after repeated restarts
    fn check_drift(self: &Arc<Self>, state: &mut EngineState) {
        if state.machine.displayed().is_none()
            || !state.estimator.is_effectively_playing()
            || state.estimator.at_end()
        {
            return;
        }

        let stalled_for = self
            .clock
            .now()
            .saturating_duration_since(state.last_tick_advance);
        if stalled_for <= self.config.stall_threshold {
            return;
        }

        state.drift_restarts += 1;
        debug!(
            restarts = state.drift_restarts,
            ?stalled_for,
            "Position tick stalled, restarting"
        );
        state.record(
            Diagnostic::new(
                ErrorKind::DriftDetected,
                format!("position stalled for {:?}", stalled_for),
            ),
            self.config.diagnostics_capacity,
        );

        if state.drift_restarts > self.config.max_drift_restarts && !state.drift_reported {
            warn!(restarts = state.drift_restarts, "Position tick keeps stalling");
            state.drift_reported = true;
            state.set_error(OperationClass::Playback, UNRESPONSIVE_MESSAGE);
        }

        state.ticker.stop();
        self.start_ticker(state);
        // Without a runtime the tick cannot start; count from now regardless
        state.last_tick_advance = self.clock.now();
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    fn publish(&self, state: &EngineState) {
        let view = state.view();
        let mut changes = Vec::new();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            changes = ViewChange::diff(current, &view);
            *current = view.clone();
            true
        });
        for change in changes {
            // No receivers is fine
            let _ = self.changes_tx.send(change);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Local bookkeeping before a command is sent; false means no-op
    fn prepare_command(self: &Arc<Self>, command: &Command) -> bool {
        let mut state = self.state.lock();
        match command {
            Command::SelectSource(target) => {
                match state.machine.request(*target, self.clock.now()) {
                    SelectOutcome::NoOp => return false,
                    SelectOutcome::Started { target } => {
                        info!(from = %state.machine.displayed(), to = %target, "Source switch requested");
                        self.arm_transition_timer(&mut state, target);
                    }
                    SelectOutcome::Superseded { previous, target } => {
                        info!(%previous, to = %target, "Source switch superseded");
                        self.arm_transition_timer(&mut state, target);
                    }
                }
                self.publish(&state);
            }
            Command::ConnectEndpoint { host } => {
                let already_connected = !state.machine.is_transitioning()
                    && state.machine.displayed() == SourceId::MultiroomClient
                    && state.machine.phase() == LifecyclePhase::Connected
                    && state
                        .reconciler
                        .current(SourceId::MultiroomClient)
                        .and_then(|m| m.host.as_deref())
                        == Some(host.as_str());
                if already_connected {
                    return false;
                }
            }
            _ => {}
        }
        true
    }

    fn arm_transition_timer(self: &Arc<Self>, state: &mut EngineState, target: SourceId) {
        state.cancel_transition_timer();
        state.transition_seq += 1;
        let seq = state.transition_seq;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let timeout = self.config.transition_timeout;
        state.transition_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.transition_timed_out(seq, target).await;
            }
        }));
    }

    async fn transition_timed_out(self: &Arc<Self>, seq: u64, target: SourceId) {
        {
            let mut state = self.state.lock();
            if state.transition_seq != seq || !state.machine.abort_if_target(target) {
                return;
            }
            // This task is the timer; drop the handle without aborting it
            state.transition_timer.take();
            warn!(%target, "Source switch not confirmed in time");
            state.set_error(
                OperationClass::SourceSelection,
                format!("Switching to {} timed out", target),
            );
            state.record(
                Diagnostic::new(
                    ErrorKind::StateConflict,
                    format!("no confirmation for {}", target),
                ),
                self.config.diagnostics_capacity,
            );
            self.publish(&state);
        }
        self.resync_best_effort().await;
    }

    fn command_accepted(&self, command: &Command, outcome: &CommandOutcome) {
        let mut state = self.state.lock();
        state.clear_error(command.class());
        match command {
            Command::DiscoverEndpoints => {
                if let Some(endpoints) = outcome.discovered_endpoints() {
                    state.discovered = endpoints;
                }
            }
            Command::AcceptConnection(target) | Command::RejectConnection(target) => {
                state.remove_pending_connection(target);
            }
            _ => {}
        }
        self.publish(&state);
    }

    fn command_failed(&self, command: &Command, kind: ErrorKind, reason: &str) {
        let mut state = self.state.lock();
        warn!(command = command.name(), %reason, "Command failed");
        state.set_error(command.class(), reason);
        state.record(
            Diagnostic::new(kind, format!("{}: {}", command.name(), reason)),
            self.config.diagnostics_capacity,
        );
        if let Command::SelectSource(target) = command {
            if state.machine.abort_if_target(*target) {
                state.cancel_transition_timer();
            }
        }
        self.publish(&state);
    }

    // ------------------------------------------------------------------------
    // Resync
    // ------------------------------------------------------------------------

    async fn resync(self: &Arc<Self>) -> Result<()> {
        let snapshot = match self.backend.fetch_state().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let mut state = self.state.lock();
                warn!(error = %err, "Status pull failed");
                if state.error.is_none() {
                    state.set_error(OperationClass::StatusPull, err.to_string());
                }
                state.record(
                    Diagnostic::new(ErrorKind::Transport, err.to_string()),
                    self.config.diagnostics_capacity,
                );
                self.publish(&state);
                return Err(err.into());
            }
        };

        let mut state = self.state.lock();
        info!(source = %snapshot.active_source, "Resynchronized with backend");
        self.apply_snapshot(&mut state, snapshot);
        state.clear_error(OperationClass::StatusPull);
        self.sync_ticker(&mut state);
        self.check_drift(&mut state);
        self.publish(&state);
        Ok(())
    }

    async fn resync_best_effort(self: &Arc<Self>) {
        // Failures are already recorded
        let _ = self.resync().await;
    }

    fn spawn_resync(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move { inner.resync_best_effort().await });
    }

    /// Apply pulled state, bypassing the source filter
    fn apply_snapshot(self: &Arc<Self>, state: &mut EngineState, snapshot: StateSnapshot) {
        if snapshot.transitioning {
            debug!("Backend is mid-switch; keeping local transition state");
            state.apply_settings(&snapshot);
            return;
        }

        if snapshot.active_source.is_none() {
            self.apply_update(state, SemanticUpdate::SourceCleared { snapshot });
            return;
        }

        let source = snapshot.active_source;
        if state.machine.is_transitioning() && state.machine.requested() != source {
            if let Some(target) = state.machine.abort_pending() {
                info!(%target, %source, "Backend settled on a different source");
            }
        }
        let phase = snapshot.phase().unwrap_or(LifecyclePhase::Ready);
        self.confirm_source(state, source, phase, &snapshot);
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Client-side playback state synchronization engine
///
/// Cheap to clone; all clones share one state.
///
/// ```rust,ignore
/// let backend = Arc::new(HttpBackendClient::new(ClientConfig::default())?);
/// let engine = SyncEngine::new(backend, SyncConfig::default())?;
///
/// engine.submit_raw(r#"{"type": "state_changed", "data": {"active_source": "librespot"}}"#);
/// engine.issue_command(Command::SelectSource(SourceId::Bluetooth)).await?;
///
/// let view = engine.current_view();
/// println!("{} @ {}ms", view.source, view.position_ms);
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn BackendClient>, config: SyncConfig) -> Result<Self> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create an engine reading time from `clock`
    pub fn with_clock(
        backend: Arc<dyn BackendClient>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let estimator = PositionEstimator::new(
            Arc::clone(&clock),
            config.seek_grace_window,
            config.playing_signal_window,
        );
        let state = EngineState {
            machine: SourceMachine::new(),
            reconciler: MetadataReconciler::new(),
            estimator,
            ticker: Ticker::new(),
            last_tick_position: 0,
            last_tick_advance: clock.now(),
            drift_restarts: 0,
            drift_reported: false,
            error: None,
            discovered: Vec::new(),
            pending_connections: Vec::new(),
            volume: None,
            routing_mode: None,
            equalizer_enabled: None,
            transition_timer: None,
            transition_seq: 0,
            last_conflict_resync: None,
            diagnostics: VecDeque::with_capacity(config.diagnostics_capacity),
        };

        let (view_tx, _) = watch::channel(SyncView::default());
        let (changes_tx, _) = broadcast::channel(config.change_buffer);

        Ok(Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(state),
                backend,
                clock,
                config,
                view_tx,
                changes_tx,
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Submit a decoded inbound event
    pub fn submit_event(&self, event: InboundEvent) -> EventDisposition {
        self.inner.submit_event(&event)
    }

    /// Decode and submit a raw pushed message
    ///
    /// Malformed messages are logged and recorded, never applied.
    pub fn submit_raw(&self, raw: &str) -> EventDisposition {
        match source_events::decode(raw) {
            Ok(event) => self.inner.submit_event(&event),
            Err(err) => {
                warn!(error = %err, "Discarding malformed event");
                let mut state = self.inner.state.lock();
                state.record(
                    Diagnostic::new(ErrorKind::Protocol, err.to_string()),
                    self.inner.config.diagnostics_capacity,
                );
                EventDisposition::Malformed(err)
            }
        }
    }

    /// Send a command to the backend
    ///
    /// Only the transition flag changes locally; the effect is confirmed by
    /// a later inbound event. Selecting the already active source is a no-op
    /// that makes no backend call. A rejected or failed command raises an
    /// [`ErrorState`] and triggers a status pull.
    pub async fn issue_command(&self, command: Command) -> Result<CommandOutcome> {
        if !self.inner.prepare_command(&command) {
            debug!(command = command.name(), "Command is a no-op");
            return Ok(CommandOutcome::accepted());
        }

        match self.inner.backend.execute(&command).await {
            Ok(outcome @ CommandOutcome::Accepted { .. }) => {
                self.inner.command_accepted(&command, &outcome);
                Ok(outcome)
            }
            Ok(CommandOutcome::Rejected { reason }) => {
                self.inner
                    .command_failed(&command, ErrorKind::StateConflict, &reason);
                self.inner.resync_best_effort().await;
                Ok(CommandOutcome::Rejected { reason })
            }
            Err(err) => {
                self.inner
                    .command_failed(&command, ErrorKind::Transport, &err.to_string());
                self.inner.resync_best_effort().await;
                Err(err.into())
            }
        }
    }

    /// Fire-and-forget variant of [`issue_command`](Self::issue_command)
    pub fn dispatch(&self, command: Command) -> JoinHandle<Result<CommandOutcome>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.issue_command(command).await })
    }

    /// Pull full state from the backend and apply it authoritatively
    pub async fn resync(&self) -> Result<()> {
        self.inner.resync().await
    }

    /// Current consolidated view
    ///
    /// Also checks for a stalled position tick and restarts it.
    pub fn current_view(&self) -> SyncView {
        let mut state = self.inner.state.lock();
        self.inner.check_drift(&mut state);
        state.view()
    }

    /// Receiver that always holds the last published view
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.inner.view_tx.subscribe()
    }

    /// Stream of individual view changes
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ViewChange> {
        self.inner.changes_tx.subscribe()
    }

    /// Recently absorbed problems, oldest first
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.state.lock().diagnostics.iter().cloned().collect()
    }

    /// Whether the position tick is currently scheduled
    pub fn is_ticking(&self) -> bool {
        self.inner.state.lock().ticker.is_running()
    }

    /// Feed transport messages into the engine in arrival order
    pub fn spawn_event_pump(&self, mut rx: mpsc::Receiver<TransportMessage>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    TransportMessage::Event(raw) => {
                        engine.submit_raw(&raw);
                    }
                    TransportMessage::Reconnected => {
                        info!("Transport reconnected, resynchronizing");
                        engine.inner.resync_best_effort().await;
                    }
                    TransportMessage::Closed => break,
                }
            }
            debug!("Event pump stopped");
        })
    }

    /// Resynchronize every `period` until the engine is dropped
    pub fn spawn_periodic_resync(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.resync_best_effort().await;
            }
        })
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SyncEngine")
            .field("source", &state.machine.state())
            .field("estimator", &state.estimator)
            .field("ticking", &state.ticker.is_running())
            .finish()
    }
}
