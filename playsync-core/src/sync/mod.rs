//! Sync Model
//!
//! The authoritative playback state, the position extrapolator, and the
//! messages carried over the session topic.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
