//! Coordinator
//!
//! [`Coordinator`] is the pure state machine owning the authoritative
//! playback state; [`CoordinatorService`] runs it on the session topic.

mod config;
mod engine;
mod service;

pub use config::{CoordinatorConfig, DEFAULT_CATALOG_REFRESH_INTERVAL, DEFAULT_HEARTBEAT_INTERVAL};
pub use engine::{Coordinator, IntentError};
pub use service::{CoordinatorEvent, CoordinatorService};
