//! playsync - Core Library
//!
//! Keeps many media players in lockstep with one authoritative coordinator
//! over a libp2p gossipsub session topic.

pub mod catalog;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod latency;
pub mod network;
pub mod sync;

// Re-exports for convenience
pub use catalog::{CatalogSource, Playlist, Track, TrackCatalog};
pub use client::{ClientConfig, ClientHandle, ClientSession, MediaPlayer, UserAction};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorEvent, CoordinatorService};
pub use error::CoreError;
pub use network::{NetworkConfig, NetworkManager, SessionCode};
pub use sync::{Intent, PlaybackState, SyncMessage};
