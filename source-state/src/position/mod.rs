//! Playback position estimation
//!
//! The backend reports position only now and then. Between reports the
//! [`PositionEstimator`] projects it from the last anchor and an injected
//! [`Clock`]; the [`Ticker`] republishes the projection on a fixed cadence
//! while playback is effective.

mod clock;
mod estimator;
mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use estimator::{PlaybackAnchor, PositionEstimator};
pub use ticker::Ticker;
