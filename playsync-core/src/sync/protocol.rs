//! Sync Protocol Messages

use serde::{Deserialize, Serialize};

use super::state::PlaybackState;

/// Kind of a client intent (also used to key loopback suppression windows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Play,
    Pause,
    Seek,
    Next,
    Previous,
    TrackEnded,
    ReportDuration,
}

/// Locally generated tag identifying one client intent.
///
/// The coordinator copies it into the broadcast the intent produced, so the
/// issuing client can recognise its own echo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentTag {
    /// Issuing client (its peer ID)
    pub client_id: String,
    /// Per-client sequence number
    pub seq: u64,
}

/// A client-originated request to change playback state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    /// Select a track and start playing it
    Play {
        track_id: String,
        #[serde(default)]
        at_position: f64,
    },
    /// Halt playback at the current position
    Pause,
    /// Jump to a position, keeping play state
    Seek { position: f64 },
    /// Skip to the next track in the catalog
    Next,
    /// Go back to the previous track
    Previous,
    /// The local player reached the end of `track_id`
    TrackEnded { track_id: String },
    /// The local player learned the length of `track_id`
    ReportDuration { track_id: String, duration: f64 },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Play { .. } => IntentKind::Play,
            Intent::Pause => IntentKind::Pause,
            Intent::Seek { .. } => IntentKind::Seek,
            Intent::Next => IntentKind::Next,
            Intent::Previous => IntentKind::Previous,
            Intent::TrackEnded { .. } => IntentKind::TrackEnded,
            Intent::ReportDuration { .. } => IntentKind::ReportDuration,
        }
    }
}

/// Messages exchanged over the session topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    // === Coordinator -> clients ===
    /// Evaluated state for one newly connected client
    Snapshot {
        target: String,
        state: PlaybackState,
    },

    /// Structural change or resumed playback
    Play {
        track_id: String,
        revision: u64,
        anchor_position: f64,
        anchor_timestamp_ms: u64,
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        cause: Option<IntentTag>,
    },

    /// Playback halted at the given position
    Pause {
        revision: u64,
        anchor_position: f64,
        anchor_timestamp_ms: u64,
        #[serde(default)]
        cause: Option<IntentTag>,
    },

    /// Position jump, play state unchanged
    Seek {
        revision: u64,
        anchor_position: f64,
        anchor_timestamp_ms: u64,
        #[serde(default)]
        cause: Option<IntentTag>,
    },

    /// Periodic full evaluated state for self-healing
    Heartbeat(PlaybackState),

    /// Pong for RTT calculation, addressed to the pinging client
    Pong {
        target: String,
        ping_sent_at_ms: u64,
        received_at_ms: u64,
    },

    // === Clients -> coordinator ===
    /// Ask for a bootstrap snapshot (sent until the first snapshot arrives)
    Hello,

    /// Request a playback change
    Intent { tag: IntentTag, intent: Intent },

    /// Ping for measuring round-trip time
    Ping { sent_at_ms: u64 },
}

impl SyncMessage {
    /// Whether only the coordinator may send this message
    pub fn is_from_coordinator(&self) -> bool {
        matches!(
            self,
            SyncMessage::Snapshot { .. }
                | SyncMessage::Play { .. }
                | SyncMessage::Pause { .. }
                | SyncMessage::Seek { .. }
                | SyncMessage::Heartbeat(_)
                | SyncMessage::Pong { .. }
        )
    }

    /// Revision carried by a state-bearing message
    pub fn revision(&self) -> Option<u64> {
        match self {
            SyncMessage::Snapshot { state, .. } | SyncMessage::Heartbeat(state) => {
                Some(state.revision)
            }
            SyncMessage::Play { revision, .. }
            | SyncMessage::Pause { revision, .. }
            | SyncMessage::Seek { revision, .. } => Some(*revision),
            _ => None,
        }
    }

    /// Intent kind a mutation broadcast corresponds to
    pub fn broadcast_kind(&self) -> Option<IntentKind> {
        match self {
            SyncMessage::Play { .. } => Some(IntentKind::Play),
            SyncMessage::Pause { .. } => Some(IntentKind::Pause),
            SyncMessage::Seek { .. } => Some(IntentKind::Seek),
            _ => None,
        }
    }

    /// Tag of the intent that produced this broadcast
    pub fn cause(&self) -> Option<&IntentTag> {
        match self {
            SyncMessage::Play { cause, .. }
            | SyncMessage::Pause { cause, .. }
            | SyncMessage::Seek { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// Attach the originating intent's tag to a mutation broadcast
    pub fn with_cause(mut self, tag: Option<IntentTag>) -> Self {
        match &mut self {
            SyncMessage::Play { cause, .. }
            | SyncMessage::Pause { cause, .. }
            | SyncMessage::Seek { cause, .. } => *cause = tag,
            _ => {}
        }
        self
    }

    /// Recipient of a targeted message (`None` means everyone)
    pub fn target(&self) -> Option<&str> {
        match self {
            SyncMessage::Snapshot { target, .. } | SyncMessage::Pong { target, .. } => {
                Some(target.as_str())
            }
            _ => None,
        }
    }

    /// Merge this message into the last known state, producing the full state it implies.
    ///
    /// `Pause` and `Seek` only carry the anchor, so they need a previous state to
    /// build on, and only the one directly before them: after a missed revision
    /// the track they refer to is unknown. Returns `None` when the message
    /// carries no playback state or when a delta has no such state to follow.
    pub fn implied_state(&self, previous: Option<&PlaybackState>) -> Option<PlaybackState> {
        match self {
            SyncMessage::Snapshot { state, .. } | SyncMessage::Heartbeat(state) => {
                Some(state.clone())
            }
            SyncMessage::Play {
                track_id,
                revision,
                anchor_position,
                anchor_timestamp_ms,
                duration,
                ..
            } => Some(PlaybackState {
                track_id: Some(track_id.clone()),
                anchor_position: *anchor_position,
                anchor_timestamp_ms: *anchor_timestamp_ms,
                is_playing: true,
                revision: *revision,
                duration: *duration,
            }),
            SyncMessage::Pause {
                revision,
                anchor_position,
                anchor_timestamp_ms,
                ..
            } => follows(previous, *revision).map(|prev| PlaybackState {
                anchor_position: *anchor_position,
                anchor_timestamp_ms: *anchor_timestamp_ms,
                is_playing: false,
                revision: *revision,
                ..prev.clone()
            }),
            SyncMessage::Seek {
                revision,
                anchor_position,
                anchor_timestamp_ms,
                ..
            } => follows(previous, *revision).map(|prev| PlaybackState {
                anchor_position: *anchor_position,
                anchor_timestamp_ms: *anchor_timestamp_ms,
                revision: *revision,
                ..prev.clone()
            }),
            _ => None,
        }
    }
}

/// `previous`, if a delta at `revision` directly follows it
fn follows(previous: Option<&PlaybackState>, revision: u64) -> Option<&PlaybackState> {
    previous.filter(|prev| revision <= prev.revision + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PlaybackState {
        PlaybackState {
            track_id: Some("A".to_string()),
            anchor_position: 12.0,
            anchor_timestamp_ms: 1_000,
            is_playing: true,
            revision: 4,
            duration: Some(180.0),
        }
    }

    #[test]
    fn test_pause_delta_keeps_track_and_duration() {
        let msg = SyncMessage::Pause {
            revision: 5,
            anchor_position: 20.0,
            anchor_timestamp_ms: 9_000,
            cause: None,
        };
        let state = msg.implied_state(Some(&base())).unwrap();

        assert_eq!(state.track_id.as_deref(), Some("A"));
        assert_eq!(state.duration, Some(180.0));
        assert!(!state.is_playing);
        assert_eq!(state.revision, 5);
        assert_eq!(state.anchor_position, 20.0);
    }

    #[test]
    fn test_seek_delta_keeps_play_state() {
        let msg = SyncMessage::Seek {
            revision: 5,
            anchor_position: 60.0,
            anchor_timestamp_ms: 9_000,
            cause: None,
        };
        let state = msg.implied_state(Some(&base())).unwrap();
        assert!(state.is_playing);
        assert_eq!(state.anchor_position, 60.0);
    }

    #[test]
    fn test_delta_without_previous_state_implies_nothing() {
        let msg = SyncMessage::Seek {
            revision: 5,
            anchor_position: 60.0,
            anchor_timestamp_ms: 9_000,
            cause: None,
        };
        assert!(msg.implied_state(None).is_none());
        assert!(SyncMessage::Hello.implied_state(Some(&base())).is_none());
    }

    #[test]
    fn test_delta_after_missed_revision_implies_nothing() {
        // base() is revision 4; revision 5 (maybe a track change) never arrived
        let seek = SyncMessage::Seek {
            revision: 6,
            anchor_position: 10.0,
            anchor_timestamp_ms: 9_000,
            cause: None,
        };
        let pause = SyncMessage::Pause {
            revision: 6,
            anchor_position: 10.0,
            anchor_timestamp_ms: 9_000,
            cause: None,
        };
        assert!(seek.implied_state(Some(&base())).is_none());
        assert!(pause.implied_state(Some(&base())).is_none());

        // A redelivered delta at the current revision still merges
        let again = SyncMessage::Seek {
            revision: 4,
            anchor_position: 12.0,
            anchor_timestamp_ms: 1_000,
            cause: None,
        };
        assert_eq!(again.implied_state(Some(&base())), Some(base()));
    }

    #[test]
    fn test_with_cause_only_touches_mutations() {
        let tag = IntentTag { client_id: "peer".to_string(), seq: 3 };
        let pause = SyncMessage::Pause {
            revision: 1,
            anchor_position: 0.0,
            anchor_timestamp_ms: 0,
            cause: None,
        }
        .with_cause(Some(tag.clone()));
        assert_eq!(pause.cause(), Some(&tag));

        let heartbeat = SyncMessage::Heartbeat(base()).with_cause(Some(tag));
        assert_eq!(heartbeat.cause(), None);
    }

    #[test]
    fn test_play_intent_defaults_position() {
        let json = r#"{"Intent":{"tag":{"client_id":"p","seq":1},"intent":{"Play":{"track_id":"song.mp3"}}}}"#;
        let msg: SyncMessage = serde_json::from_str(json).unwrap();
        match msg {
            SyncMessage::Intent { intent: Intent::Play { track_id, at_position }, .. } => {
                assert_eq!(track_id, "song.mp3");
                assert_eq!(at_position, 0.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
