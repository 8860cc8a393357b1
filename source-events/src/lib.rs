//! Inbound event boundary
//!
//! The backend pushes loosely-typed JSON messages (a kind tag, an optional
//! source tag and a free-form payload). This crate turns them into the closed
//! [`InboundEvent`] union so nothing downstream has to probe for optional
//! fields:
//!
//! ```rust,ignore
//! let event = source_events::decode(r#"{"type": "seek", "source": "librespot",
//!     "data": {"position_ms": 30000, "duration_ms": 200000}}"#)?;
//! assert_eq!(event.kind(), EventKind::Seek);
//! ```
//!
//! Decoding never yields partial events: anything unrecognised or malformed
//! is a [`DecodeError`].

pub mod envelope;
pub mod error;
pub mod event;

pub use envelope::WireEnvelope;
pub use error::{DecodeError, Result};
pub use event::{EventKind, EventPayload, InboundEvent};

/// Decode a raw JSON message into an [`InboundEvent`]
pub fn decode(raw: &str) -> Result<InboundEvent> {
    let envelope = WireEnvelope::parse(raw)?;
    InboundEvent::from_envelope(envelope)
}
