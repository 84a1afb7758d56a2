//! Crate-level error type

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::client::PlayerError;
use crate::network::NetworkError;

/// Errors surfaced by playsync sessions and services
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Not synced with the coordinator yet")]
    NotSynced,

    #[error("No track loaded")]
    NoTrack,

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),
}
