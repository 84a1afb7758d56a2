//! Client Reconciler
//!
//! Applies coordinator broadcasts to the local player, correcting only
//! discrepancies above epsilon. The reconciler only consumes messages: it has
//! no handle to the network and cannot produce intents.

use tracing::{debug, info, warn};

use super::player::{MediaPlayer, PlayerError};
use super::suppressor::{LoopbackSuppressor, Verdict};
use crate::sync::{PlaybackState, SyncMessage};

/// Default drift tolerance in seconds
pub const DEFAULT_EPSILON: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerConfig {
    /// Drift (seconds) tolerated before a hard seek
    pub epsilon: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// No full snapshot adopted yet; local controls are disabled
    Initializing,
    Synced,
    /// A corrective seek was issued and has not been confirmed yet
    Correcting,
}

/// Player calls made while applying one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adjustments {
    /// Track loaded for a structural change
    pub loaded: Option<String>,
    /// Position the player was sought to
    pub seeked_to: Option<f64>,
    /// Play state set on the player (`true` = play)
    pub set_playing: Option<bool>,
}

impl Adjustments {
    pub fn is_empty(&self) -> bool {
        self.loaded.is_none() && self.seeked_to.is_none() && self.set_playing.is_none()
    }
}

/// Result of [`Reconciler::apply`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Revision older than the adopted one; dropped
    Stale,
    /// Carries no applicable state, or follows a revision this client missed
    Ignored,
    /// Explained by a pending local action; no player calls
    Suppressed,
    /// Adopted; `Adjustments` lists the player calls made
    Applied(Adjustments),
    /// Adopted, but the local engine failed; the player was paused
    Failed { track_id: Option<String>, error: PlayerError },
}

/// Per-connection reconciliation state
pub struct Reconciler {
    config: ReconcilerConfig,
    state: ReconcilerState,
    /// Last adopted full state
    shadow: Option<PlaybackState>,
    /// (track, revision) the engine failed on; not retried
    failed: Option<(Option<String>, u64)>,
    /// Local minus coordinator position at the last same-track comparison
    last_drift: Option<f64>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            state: ReconcilerState::Initializing,
            shadow: None,
            failed: None,
            last_drift: None,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// Last adopted coordinator state
    pub fn shadow(&self) -> Option<&PlaybackState> {
        self.shadow.as_ref()
    }

    /// Revision of the last adopted state
    pub fn revision(&self) -> Option<u64> {
        self.shadow.as_ref().map(|s| s.revision)
    }

    pub fn last_drift(&self) -> Option<f64> {
        self.last_drift
    }

    /// Back to INITIALIZING (reconnect)
    pub fn reset(&mut self) {
        info!("Reconciler reset, waiting for a snapshot");
        self.state = ReconcilerState::Initializing;
        self.shadow = None;
        self.failed = None;
        self.last_drift = None;
    }

    /// Apply one coordinator message received at `received_at_ms`
    pub fn apply(
        &mut self,
        msg: &SyncMessage,
        received_at_ms: u64,
        player: &mut dyn MediaPlayer,
        suppressor: &mut LoopbackSuppressor,
    ) -> ApplyOutcome {
        let Some(revision) = msg.revision() else {
            return ApplyOutcome::Ignored;
        };

        if let Some(shadow) = &self.shadow {
            if revision < shadow.revision {
                debug!(
                    "Dropping stale message (revision {} < {})",
                    revision, shadow.revision
                );
                return ApplyOutcome::Stale;
            }
        }

        let Some(target) = msg.implied_state(self.shadow.as_ref()) else {
            match &self.shadow {
                Some(shadow) => debug!(
                    "Revision {} skips past {}; waiting for the next heartbeat",
                    revision, shadow.revision
                ),
                None => debug!("No state to apply {:?} onto yet", msg),
            }
            return ApplyOutcome::Ignored;
        };

        match suppressor.classify(msg, &target, received_at_ms) {
            Verdict::Echo => {
                debug!("Echo of a local action at revision {}", revision);
                self.adopt(target);
                return ApplyOutcome::Suppressed;
            }
            Verdict::Predates => {
                debug!("Revision {} predates a pending local action", revision);
                return ApplyOutcome::Suppressed;
            }
            Verdict::Foreign => {}
        }

        let failed_key = (target.track_id.clone(), target.revision);
        if self.failed.as_ref() == Some(&failed_key) {
            debug!("Not retrying {:?} at revision {}", failed_key.0, failed_key.1);
            self.adopt(target);
            return ApplyOutcome::Ignored;
        }

        match self.reconcile(&target, received_at_ms, player) {
            Ok(adjustments) => {
                self.failed = None;
                self.adopt(target);
                ApplyOutcome::Applied(adjustments)
            }
            Err(error) => {
                warn!(
                    "Playback engine failed on {:?}: {}; pausing locally",
                    target.track_id, error
                );
                if let Err(e) = player.pause() {
                    warn!("Could not pause after the failure: {}", e);
                }
                self.failed = Some(failed_key);
                let track_id = target.track_id.clone();
                self.adopt(target);
                // Nothing left to confirm on a paused fallback
                self.state = ReconcilerState::Synced;
                ApplyOutcome::Failed { track_id, error }
            }
        }
    }

    fn adopt(&mut self, state: PlaybackState) {
        if self.state == ReconcilerState::Initializing {
            info!("Synced at revision {}", state.revision);
            self.state = ReconcilerState::Synced;
        }
        self.shadow = Some(state);
    }

    /// Leave CORRECTING once the player sits within epsilon of the adopted state
    pub fn confirm(&mut self, now_ms: u64, player: &dyn MediaPlayer) -> bool {
        if self.state != ReconcilerState::Correcting {
            return false;
        }
        let Some(shadow) = &self.shadow else {
            return false;
        };
        if shadow.track_id != player.current_track() {
            return false;
        }
        let drift = player.position() - shadow.position_at(now_ms);
        if drift.abs() > self.config.epsilon {
            return false;
        }
        debug!("Correction landed ({:+.3}s)", drift);
        self.last_drift = Some(drift);
        self.state = ReconcilerState::Synced;
        true
    }

    fn reconcile(
        &mut self,
        target: &PlaybackState,
        now_ms: u64,
        player: &mut dyn MediaPlayer,
    ) -> Result<Adjustments, PlayerError> {
        let mut adjustments = Adjustments::default();
        let server_pos = target.position_at(now_ms);

        if target.track_id != player.current_track() {
            let Some(track_id) = &target.track_id else {
                // Coordinator has nothing selected: stop whatever is loaded
                if player.is_playing() {
                    player.pause()?;
                    adjustments.set_playing = Some(false);
                }
                self.state = ReconcilerState::Synced;
                return Ok(adjustments);
            };

            info!("Loading {} at {:.2}s", track_id, server_pos);
            player.load(track_id)?;
            adjustments.loaded = Some(track_id.clone());
            self.last_drift = None;
            self.state = ReconcilerState::Synced;
            if server_pos > 0.0 {
                player.seek(server_pos)?;
                adjustments.seeked_to = Some(server_pos);
            }
        } else {
            let drift = player.position() - server_pos;
            self.last_drift = Some(drift);
            if drift.abs() > self.config.epsilon {
                debug!("Drift {:+.3}s exceeds epsilon, seeking to {:.2}s", drift, server_pos);
                self.state = ReconcilerState::Correcting;
                player.seek(server_pos)?;
                adjustments.seeked_to = Some(server_pos);
            } else {
                self.state = ReconcilerState::Synced;
            }
        }

        if target.is_playing != player.is_playing() {
            if target.is_playing {
                player.play()?;
            } else {
                player.pause()?;
            }
            adjustments.set_playing = Some(target.is_playing);
        }

        Ok(adjustments)
    }
}
