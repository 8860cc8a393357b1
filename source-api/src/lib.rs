//! Typed boundary to the audio backend
//!
//! The backend process owns the ground truth for every audio source on the
//! device. This crate describes the values that cross that boundary and the
//! two outbound interfaces the synchronization engine relies on:
//!
//! - the **command** interface ("select source", "seek", "connect to endpoint", ...)
//! - the **status-pull** interface (full state fetch used for resynchronization)
//!
//! Both are expressed by the [`BackendClient`] trait so the engine can be
//! driven by the real HTTP backend or by a test double.
//!
//! ```rust,ignore
//! use source_api::{BackendClient, ClientConfig, Command, HttpBackendClient, SourceId};
//!
//! let client = HttpBackendClient::new(ClientConfig::default())?;
//! let outcome = client.execute(&Command::SelectSource(SourceId::Bluetooth)).await?;
//! assert!(outcome.is_accepted());
//! ```

pub mod client;
pub mod command;
pub mod error;
pub mod types;

pub use client::{BackendClient, ClientConfig, HttpBackendClient};
pub use command::{Command, CommandOutcome, CommandRequest, ConnectionTarget, OperationClass};
pub use error::{ApiError, Result};
pub use types::{
    DiscoveredEndpoint, LifecyclePhase, MetadataPatch, PendingConnection, SourceId, StateSnapshot,
    DEFAULT_ENDPOINT_PORT,
};
