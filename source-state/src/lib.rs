//! Source Sync State
//!
//! Client-side state synchronization for a multi-source audio playback
//! backend. The engine consolidates pushed events, command outcomes and
//! pulled snapshots into one consistent view of the active source, its
//! metadata and its playback position.
//!
//! # Features
//!
//! - **Source lifecycle**: the displayed source only changes once the backend
//!   confirms a switch; stale events from other sources are dropped
//! - **Metadata reconciliation**: partial updates merge, a last-known-good
//!   record survives transient empty updates
//! - **Position estimation**: smooth position between sparse server anchors
//!   with seek grace and drift recovery
//! - **Reactive view**: `tokio::sync::watch` for the latest view plus a
//!   broadcast stream of [`ViewChange`]s
//!
//! # Architecture
//!
//! ```text
//! push transport ─▶ decode ─▶ normalize ─▶ SyncEngine ─▶ watch<SyncView>
//!                                 ▲            │
//!                                 │            ▼
//!                           status pull ◀── BackendClient (commands)
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use source_state::{Command, HttpBackendClient, ClientConfig, SourceId, SyncConfig, SyncEngine};
//!
//! let backend = Arc::new(HttpBackendClient::new(ClientConfig::default())?);
//! let engine = SyncEngine::new(backend, SyncConfig::default())?;
//! engine.resync().await?;
//!
//! // Feed pushed messages from whatever transport the host uses
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! engine.spawn_event_pump(rx);
//!
//! engine.issue_command(Command::SelectSource(SourceId::Bluetooth)).await?;
//!
//! let mut view = engine.watch();
//! while view.changed().await.is_ok() {
//!     let current = view.borrow().clone();
//!     println!("{} {}ms", current.source, current.position_ms);
//! }
//! ```

// Core modules
pub mod model;
pub mod normalizer;
pub mod position;
pub mod reconciler;
pub mod source_machine;

// Engine façade
pub mod engine;

// Configuration and errors
pub mod config;
pub mod error;

// Logging infrastructure
pub mod logging;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{EventDisposition, SyncEngine, TransportMessage};

pub use config::SyncConfig;

pub use model::{ErrorState, Metadata, SyncView, ViewChange};

pub use normalizer::{normalize, DiscardReason, Normalized, SemanticUpdate};

pub use position::{Clock, ManualClock, PlaybackAnchor, PositionEstimator, SystemClock};

pub use reconciler::{MetadataReconciler, TrackChange};

pub use source_machine::{SelectOutcome, SourceMachine, SourceState};

// Backend and wire types, so hosts need only one dependency
pub use source_api::{
    BackendClient, ClientConfig, Command, CommandOutcome, ConnectionTarget, DiscoveredEndpoint,
    HttpBackendClient, LifecyclePhase, MetadataPatch, OperationClass, PendingConnection, SourceId,
    StateSnapshot,
};
pub use source_events::{DecodeError, EventKind, EventPayload, InboundEvent};

// ============================================================================
// Re-exports - Error types
// ============================================================================

pub use error::{Diagnostic, ErrorKind, Result, SyncError};

// ============================================================================
// Re-exports - Logging
// ============================================================================

pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
