//! Client side
//!
//! The [`Reconciler`] applies coordinator state to a local [`MediaPlayer`],
//! [`LocalControls`] turn user actions into intents, and [`ClientSession`]
//! runs both against the session topic.

mod controls;
mod player;
mod reconciler;
mod session;
mod suppressor;

pub use controls::{LocalControls, UserAction};
pub use player::{MediaPlayer, PlayerCall, PlayerError, SimulatedPlayer};
pub use reconciler::{
    Adjustments, ApplyOutcome, Reconciler, ReconcilerConfig, ReconcilerState, DEFAULT_EPSILON,
};
pub use session::{
    ClientConfig, ClientHandle, ClientObserver, ClientSession, NoopObserver, SyncStatus,
};
pub use suppressor::{LoopbackSuppressor, Verdict, DEFAULT_SUPPRESSION_WINDOW};
