//! Data types exposed by the engine

mod error_state;
mod metadata;
mod view;

pub use error_state::ErrorState;
pub use metadata::Metadata;
pub use view::{SyncView, ViewChange};
