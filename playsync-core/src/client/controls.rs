//! Local user actions
//!
//! Turns a user action into a tagged intent: applies it to the player right
//! away and opens a suppression window so the coordinator's echo is not
//! mistaken for a correction.

use tracing::debug;

use super::player::MediaPlayer;
use super::reconciler::{Reconciler, ReconcilerState};
use super::suppressor::LoopbackSuppressor;
use crate::error::CoreError;
use crate::sync::{Intent, IntentTag, PlaybackState, SyncMessage};

/// Something the local user (or local engine) asked for
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Play `track_id` from `at_position`
    Play { track_id: String, at_position: f64 },
    /// Continue the loaded track from where the player is
    Resume,
    Pause,
    Seek(f64),
    Next,
    Previous,
    /// The loaded track played to its end
    TrackEnded,
    /// The engine learned the loaded track's length
    ReportDuration(f64),
}

/// Issues intents on behalf of one client
pub struct LocalControls {
    client_id: String,
    next_seq: u64,
}

impl LocalControls {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            next_seq: 1,
        }
    }

    fn next_tag(&mut self) -> IntentTag {
        let tag = IntentTag {
            client_id: self.client_id.clone(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        tag
    }

    /// Apply `action` locally and return the intent message to publish
    pub fn perform(
        &mut self,
        action: UserAction,
        now_ms: u64,
        reconciler: &Reconciler,
        player: &mut dyn MediaPlayer,
        suppressor: &mut LoopbackSuppressor,
    ) -> Result<SyncMessage, CoreError> {
        let shadow = match (reconciler.state(), reconciler.shadow()) {
            (ReconcilerState::Initializing, _) | (_, None) => return Err(CoreError::NotSynced),
            (_, Some(shadow)) => shadow,
        };

        // Predicted post-action state; `None` when only the catalog can tell
        let (intent, predicted) = match action {
            UserAction::Play { track_id, at_position } => {
                let at_position = at_position.max(0.0);
                if player.current_track().as_deref() != Some(track_id.as_str()) {
                    player.load(&track_id)?;
                }
                player.seek(at_position)?;
                player.play()?;
                let duration = shadow
                    .duration
                    .filter(|_| shadow.track_id.as_deref() == Some(track_id.as_str()));
                let predicted = PlaybackState {
                    track_id: Some(track_id.clone()),
                    anchor_position: at_position,
                    anchor_timestamp_ms: now_ms,
                    is_playing: true,
                    revision: shadow.revision + 1,
                    duration,
                };
                (Intent::Play { track_id, at_position }, Some(predicted))
            }

            UserAction::Resume => {
                let track_id = player
                    .current_track()
                    .or_else(|| shadow.track_id.clone())
                    .ok_or(CoreError::NoTrack)?;
                let at_position = player.position();
                player.play()?;
                let predicted = PlaybackState {
                    track_id: Some(track_id.clone()),
                    anchor_position: at_position,
                    anchor_timestamp_ms: now_ms,
                    is_playing: true,
                    revision: shadow.revision + 1,
                    duration: shadow.duration,
                };
                (Intent::Play { track_id, at_position }, Some(predicted))
            }

            UserAction::Pause => {
                player.pause()?;
                let predicted = PlaybackState {
                    anchor_position: player.position(),
                    anchor_timestamp_ms: now_ms,
                    is_playing: false,
                    revision: shadow.revision + 1,
                    ..shadow.clone()
                };
                (Intent::Pause, Some(predicted))
            }

            UserAction::Seek(position) => {
                if shadow.track_id.is_none() {
                    return Err(CoreError::NoTrack);
                }
                let position = shadow.clamp(position);
                player.seek(position)?;
                let predicted = PlaybackState {
                    anchor_position: position,
                    anchor_timestamp_ms: now_ms,
                    revision: shadow.revision + 1,
                    ..shadow.clone()
                };
                (Intent::Seek { position }, Some(predicted))
            }

            UserAction::Next => (Intent::Next, None),
            UserAction::Previous => (Intent::Previous, None),

            UserAction::TrackEnded => {
                let track_id = player.current_track().ok_or(CoreError::NoTrack)?;
                (Intent::TrackEnded { track_id }, None)
            }

            UserAction::ReportDuration(duration) => {
                let track_id = player.current_track().ok_or(CoreError::NoTrack)?;
                (Intent::ReportDuration { track_id, duration }, None)
            }
        };

        let tag = self.next_tag();
        if let Some(predicted) = predicted {
            suppressor.open(intent.kind(), tag.seq, shadow.revision, predicted, now_ms);
        }
        debug!("Issuing {:?} (seq {})", intent, tag.seq);

        Ok(SyncMessage::Intent { tag, intent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::player::test_clock::TestClock;
    use crate::client::player::{PlayerCall, SimulatedPlayer};
    use crate::client::reconciler::{ApplyOutcome, ReconcilerConfig};
    use crate::client::suppressor::DEFAULT_SUPPRESSION_WINDOW;

    const T: u64 = 1_700_000_000_000;

    struct Rig {
        clock: TestClock,
        player: SimulatedPlayer,
        suppressor: LoopbackSuppressor,
        reconciler: Reconciler,
        controls: LocalControls,
    }

    impl Rig {
        fn synced(track: &str, position: f64, playing: bool) -> Self {
            let mut rig = Self::initializing();
            let snapshot = SyncMessage::Snapshot {
                target: "me".to_string(),
                state: PlaybackState {
                    track_id: Some(track.to_string()),
                    anchor_position: position,
                    anchor_timestamp_ms: T,
                    is_playing: playing,
                    revision: 4,
                    duration: Some(200.0),
                },
            };
            rig.receive(&snapshot);
            rig.player.clear_calls();
            rig
        }

        fn initializing() -> Self {
            let clock = TestClock::at(T);
            Self {
                player: clock.player(),
                clock,
                suppressor: LoopbackSuppressor::new("me", DEFAULT_SUPPRESSION_WINDOW, 0.3),
                reconciler: Reconciler::new(ReconcilerConfig::default()),
                controls: LocalControls::new("me"),
            }
        }

        fn perform(&mut self, action: UserAction) -> Result<SyncMessage, CoreError> {
            self.controls.perform(
                action,
                self.clock.now(),
                &self.reconciler,
                &mut self.player,
                &mut self.suppressor,
            )
        }

        fn receive(&mut self, msg: &SyncMessage) -> ApplyOutcome {
            self.reconciler
                .apply(msg, self.clock.now(), &mut self.player, &mut self.suppressor)
        }
    }

    #[test]
    fn test_actions_rejected_while_initializing() {
        let mut rig = Rig::initializing();
        assert!(matches!(rig.perform(UserAction::Pause), Err(CoreError::NotSynced)));
        assert!(rig.player.calls().is_empty());
    }

    #[test]
    fn test_pause_applies_optimistically_and_tags_intent() {
        let mut rig = Rig::synced("A", 10.0, true);
        rig.clock.advance(1_000);

        let msg = rig.perform(UserAction::Pause).unwrap();
        assert_eq!(
            msg,
            SyncMessage::Intent {
                tag: IntentTag { client_id: "me".to_string(), seq: 1 },
                intent: Intent::Pause,
            }
        );
        assert_eq!(rig.player.calls(), vec![PlayerCall::Pause]);
        assert!(rig.suppressor.is_active(rig.clock.now()));
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut rig = Rig::synced("A", 10.0, true);
        let first = rig.perform(UserAction::Seek(20.0)).unwrap();
        let second = rig.perform(UserAction::Seek(30.0)).unwrap();
        match (first, second) {
            (SyncMessage::Intent { tag: a, .. }, SyncMessage::Intent { tag: b, .. }) => {
                assert_eq!(a.seq + 1, b.seq);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_seek_is_clamped_locally() {
        let mut rig = Rig::synced("A", 10.0, true);
        let msg = rig.perform(UserAction::Seek(500.0)).unwrap();
        assert!(matches!(
            msg,
            SyncMessage::Intent { intent: Intent::Seek { position }, .. } if position == 200.0
        ));
        assert_eq!(rig.player.calls(), vec![PlayerCall::Seek(200.0)]);
    }

    #[test]
    fn test_resume_plays_current_track_from_player_position() {
        let mut rig = Rig::synced("A", 42.0, false);
        let msg = rig.perform(UserAction::Resume).unwrap();
        match msg {
            SyncMessage::Intent { intent: Intent::Play { track_id, at_position }, .. } => {
                assert_eq!(track_id, "A");
                assert!((at_position - 42.0).abs() < 1e-9);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rig.player.is_playing());
    }

    #[test]
    fn test_next_waits_for_coordinator() {
        let mut rig = Rig::synced("A", 10.0, true);
        let msg = rig.perform(UserAction::Next).unwrap();
        assert!(matches!(msg, SyncMessage::Intent { intent: Intent::Next, .. }));
        assert!(rig.player.calls().is_empty());
        assert!(!rig.suppressor.is_active(rig.clock.now()));
    }

    #[test]
    fn test_track_ended_names_loaded_track() {
        let mut rig = Rig::synced("A", 10.0, true);
        let msg = rig.perform(UserAction::TrackEnded).unwrap();
        assert!(matches!(
            msg,
            SyncMessage::Intent { intent: Intent::TrackEnded { track_id }, .. } if track_id == "A"
        ));
    }

    /// Local pause, echo comes back: nothing is re-applied
    #[test]
    fn test_no_feedback_loop() {
        let mut rig = Rig::synced("A", 10.0, true);
        rig.clock.advance(2_000);
        let msg = rig.perform(UserAction::Pause).unwrap();
        let SyncMessage::Intent { tag, .. } = msg else {
            panic!("expected intent");
        };
        rig.player.clear_calls();

        // Heartbeat from before the pause reached the coordinator
        rig.clock.advance(50);
        let before = SyncMessage::Heartbeat(PlaybackState {
            track_id: Some("A".to_string()),
            anchor_position: 12.05,
            anchor_timestamp_ms: rig.clock.now(),
            is_playing: true,
            revision: 4,
            duration: Some(200.0),
        });
        assert_eq!(rig.receive(&before), ApplyOutcome::Suppressed);

        // The echo itself
        rig.clock.advance(50);
        let echo = SyncMessage::Pause {
            revision: 5,
            anchor_position: 12.03,
            anchor_timestamp_ms: rig.clock.now() - 20,
            cause: Some(tag),
        };
        assert_eq!(rig.receive(&echo), ApplyOutcome::Suppressed);
        assert!(rig.player.calls().is_empty());
        assert!(!rig.player.is_playing());
        assert_eq!(rig.reconciler.revision(), Some(5));
    }

    #[test]
    fn test_foreign_change_of_other_kind_applies_during_window() {
        let mut rig = Rig::synced("A", 10.0, true);
        rig.perform(UserAction::Seek(50.0)).unwrap();
        let echo_of_other_kind = SyncMessage::Pause {
            revision: 5,
            anchor_position: 50.0,
            anchor_timestamp_ms: T,
            cause: None,
        };
        // Foreign pause during our seek window still pauses the player
        assert!(matches!(rig.receive(&echo_of_other_kind), ApplyOutcome::Applied(_)));
        assert!(!rig.player.is_playing());
    }
}
