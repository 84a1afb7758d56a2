//! Coordinator state machine
//!
//! Single owner of the authoritative [`PlaybackState`]. Every operation takes
//! the current wall-clock time explicitly and returns the broadcast it produced;
//! sending it is the service's job.

use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::TrackCatalog;
use crate::sync::{clamp_position, Intent, IntentTag, PlaybackState, SyncMessage};

/// Reasons the coordinator rejects an intent (state is left untouched)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntentError {
    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("No track selected")]
    NoTrackSelected,

    #[error("Catalog has no track to move to")]
    NothingToResolve,

    #[error("Track {reported} already ended (current: {current:?})")]
    StaleTrackEnded {
        reported: String,
        current: Option<String>,
    },

    #[error("Duration reported for {reported}, but {current:?} is loaded")]
    DurationForOtherTrack {
        reported: String,
        current: Option<String>,
    },

    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),
}

/// Authoritative playback coordinator
pub struct Coordinator {
    state: PlaybackState,
    catalog: Box<dyn TrackCatalog>,
}

impl Coordinator {
    pub fn new(catalog: Box<dyn TrackCatalog>) -> Self {
        Self {
            state: PlaybackState::new(),
            catalog,
        }
    }

    /// Current authoritative state
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn catalog(&self) -> &dyn TrackCatalog {
        self.catalog.as_ref()
    }

    /// Swap in a freshly loaded catalog. The current track keeps playing even
    /// if it disappeared; only new `Play` intents are validated against it.
    pub fn replace_catalog(&mut self, catalog: Box<dyn TrackCatalog>) {
        self.catalog = catalog;
    }

    /// Apply a client intent, tagging the resulting broadcast with its origin.
    ///
    /// `Ok(None)` means the intent was accepted but produced no broadcast
    /// (duration reports).
    pub fn handle_intent(
        &mut self,
        tag: Option<IntentTag>,
        intent: Intent,
        now_ms: u64,
    ) -> Result<Option<SyncMessage>, IntentError> {
        let msg = match intent {
            Intent::Play { track_id, at_position } => self.play(&track_id, at_position, now_ms)?,
            Intent::Pause => self.pause(now_ms),
            Intent::Seek { position } => self.seek(position, now_ms)?,
            Intent::Next => self.next(now_ms)?,
            Intent::Previous => self.previous(now_ms)?,
            Intent::TrackEnded { track_id } => self.track_ended(&track_id, now_ms)?,
            Intent::ReportDuration { track_id, duration } => {
                self.report_duration(&track_id, duration)?;
                return Ok(None);
            }
        };
        Ok(Some(msg.with_cause(tag)))
    }

    /// Select a track and start playing at `at_position`
    pub fn play(
        &mut self,
        track_id: &str,
        at_position: f64,
        now_ms: u64,
    ) -> Result<SyncMessage, IntentError> {
        if !at_position.is_finite() {
            return Err(IntentError::InvalidPosition(at_position));
        }
        let track = self
            .catalog
            .get(track_id)
            .ok_or_else(|| IntentError::UnknownTrack(track_id.to_string()))?;

        // Keep a duration learned from clients when replaying the same track
        let duration = if self.state.track_id.as_deref() == Some(track_id) {
            self.state.duration.or(track.duration)
        } else {
            track.duration
        };

        self.state = PlaybackState {
            track_id: Some(track_id.to_string()),
            anchor_position: clamp_position(at_position, duration),
            anchor_timestamp_ms: now_ms,
            is_playing: true,
            revision: self.state.revision + 1,
            duration,
        };
        info!(
            "Play {} at {:.2}s (revision {})",
            track_id, self.state.anchor_position, self.state.revision
        );

        Ok(SyncMessage::Play {
            track_id: track_id.to_string(),
            revision: self.state.revision,
            anchor_position: self.state.anchor_position,
            anchor_timestamp_ms: now_ms,
            duration,
            cause: None,
        })
    }

    /// Halt playback where it is now. Bumps the revision even when already paused.
    pub fn pause(&mut self, now_ms: u64) -> SyncMessage {
        if !self.state.is_playing {
            debug!("Pause while already paused (revision {})", self.state.revision);
        }
        self.state.anchor_position = self.state.position_at(now_ms);
        self.state.anchor_timestamp_ms = now_ms;
        self.state.is_playing = false;
        self.state.revision += 1;
        info!(
            "Pause at {:.2}s (revision {})",
            self.state.anchor_position, self.state.revision
        );

        SyncMessage::Pause {
            revision: self.state.revision,
            anchor_position: self.state.anchor_position,
            anchor_timestamp_ms: now_ms,
            cause: None,
        }
    }

    /// Jump to `target`, clamped to the track, keeping play state
    pub fn seek(&mut self, target: f64, now_ms: u64) -> Result<SyncMessage, IntentError> {
        if !target.is_finite() {
            return Err(IntentError::InvalidPosition(target));
        }
        if self.state.track_id.is_none() {
            return Err(IntentError::NoTrackSelected);
        }
        self.state.anchor_position = self.state.clamp(target);
        self.state.anchor_timestamp_ms = now_ms;
        self.state.revision += 1;
        info!(
            "Seek to {:.2}s (requested {:.2}s, revision {})",
            self.state.anchor_position, target, self.state.revision
        );

        Ok(SyncMessage::Seek {
            revision: self.state.revision,
            anchor_position: self.state.anchor_position,
            anchor_timestamp_ms: now_ms,
            cause: None,
        })
    }

    /// Record a client-reported duration for the loaded track. Metadata only:
    /// no revision bump, no broadcast.
    pub fn report_duration(&mut self, track_id: &str, duration: f64) -> Result<(), IntentError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(IntentError::InvalidDuration(duration));
        }
        if self.state.track_id.as_deref() != Some(track_id) {
            return Err(IntentError::DurationForOtherTrack {
                reported: track_id.to_string(),
                current: self.state.track_id.clone(),
            });
        }
        if self.state.duration != Some(duration) {
            debug!("Duration of {} is {:.2}s", track_id, duration);
            self.state.duration = Some(duration);
        }
        Ok(())
    }

    /// Advance after `track_id` finished. Reports for anything but the current
    /// track are stale (another client already advanced).
    pub fn track_ended(&mut self, track_id: &str, now_ms: u64) -> Result<SyncMessage, IntentError> {
        if self.state.track_id.as_deref() != Some(track_id) {
            return Err(IntentError::StaleTrackEnded {
                reported: track_id.to_string(),
                current: self.state.track_id.clone(),
            });
        }
        self.next(now_ms)
    }

    /// Skip to the next catalog track
    pub fn next(&mut self, now_ms: u64) -> Result<SyncMessage, IntentError> {
        let next_id = self
            .catalog
            .resolve_next(self.state.track_id.as_deref())
            .map(|t| t.id.clone())
            .ok_or(IntentError::NothingToResolve)?;
        self.play(&next_id, 0.0, now_ms)
    }

    /// Go back to the previous catalog track
    pub fn previous(&mut self, now_ms: u64) -> Result<SyncMessage, IntentError> {
        let prev_id = self
            .catalog
            .resolve_previous(self.state.track_id.as_deref())
            .map(|t| t.id.clone())
            .ok_or(IntentError::NothingToResolve)?;
        self.play(&prev_id, 0.0, now_ms)
    }

    /// Periodic full snapshot, evaluated at `now_ms`
    pub fn heartbeat(&self, now_ms: u64) -> SyncMessage {
        SyncMessage::Heartbeat(self.state.evaluated_at(now_ms))
    }

    /// Bootstrap snapshot for one newly connected client
    pub fn bootstrap(&self, target: &str, now_ms: u64) -> SyncMessage {
        SyncMessage::Snapshot {
            target: target.to_string(),
            state: self.state.evaluated_at(now_ms),
        }
    }
}
