//! Playback State and Position Extrapolation

use serde::{Deserialize, Serialize};

/// Authoritative playback state, as held by the coordinator and carried in snapshots.
///
/// `anchor_position` and `anchor_timestamp_ms` always travel together: the
/// position at any other instant is derived with [`position_at`], never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Currently selected track, if any
    pub track_id: Option<String>,
    /// Playback offset in seconds at `anchor_timestamp_ms`
    pub anchor_position: f64,
    /// Coordinator wall clock (ms since UNIX epoch) when `anchor_position` was true
    pub anchor_timestamp_ms: u64,
    /// Whether playback is running
    pub is_playing: bool,
    /// Bumped on every playback mutation
    pub revision: u64,
    /// Track length in seconds; `None` means unknown (no upper clamp)
    pub duration: Option<f64>,
}

impl PlaybackState {
    /// Initial state: nothing selected, paused, revision 0
    pub fn new() -> Self {
        Self {
            track_id: None,
            anchor_position: 0.0,
            anchor_timestamp_ms: 0,
            is_playing: false,
            revision: 0,
            duration: None,
        }
    }

    /// Where playback is at `now_ms`
    pub fn position_at(&self, now_ms: u64) -> f64 {
        position_at(self, now_ms)
    }

    /// Clamp a position into this track's valid range
    pub fn clamp(&self, position: f64) -> f64 {
        clamp_position(position, self.duration)
    }

    /// Copy of this state re-anchored at `now_ms`.
    ///
    /// Used for heartbeats and bootstrap snapshots so a receiver gets a usable
    /// position without trusting the original anchor.
    pub fn evaluated_at(&self, now_ms: u64) -> Self {
        Self {
            anchor_position: self.position_at(now_ms),
            anchor_timestamp_ms: now_ms,
            ..self.clone()
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Project a snapshot to `now_ms`.
///
/// `now_ms` may precede the anchor when clocks disagree; the projection then
/// runs backwards and is clamped at zero.
pub fn position_at(state: &PlaybackState, now_ms: u64) -> f64 {
    if !state.is_playing {
        return state.anchor_position;
    }
    let elapsed_ms = now_ms as i128 - state.anchor_timestamp_ms as i128;
    let elapsed_secs = elapsed_ms as f64 / 1000.0;
    clamp_position(state.anchor_position + elapsed_secs, state.duration)
}

/// Clamp to `[0, duration]`, treating an unknown duration as unbounded
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    if position.is_nan() {
        return 0.0;
    }
    let upper = duration.unwrap_or(f64::INFINITY).max(0.0);
    position.clamp(0.0, upper)
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000_000;

    fn anchored(position: f64, is_playing: bool) -> PlaybackState {
        PlaybackState {
            track_id: Some("A".to_string()),
            anchor_position: position,
            anchor_timestamp_ms: T,
            is_playing,
            revision: 1,
            duration: None,
        }
    }

    #[test]
    fn test_playing_extrapolates_forward() {
        let state = anchored(10.0, true);
        assert!((state.position_at(T + 5000) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_paused_does_not_move() {
        let state = anchored(10.0, false);
        assert_eq!(state.position_at(T + 5000), 10.0);
    }

    #[test]
    fn test_clamps_to_duration() {
        let mut state = anchored(195.0, true);
        state.duration = Some(200.0);
        assert_eq!(state.position_at(T + 60_000), 200.0);
    }

    #[test]
    fn test_backwards_projection_clamps_at_zero() {
        // Receiver clock is 3s behind the coordinator
        let state = anchored(1.0, true);
        assert!((state.position_at(T - 500) - 0.5).abs() < 1e-9);
        assert_eq!(state.position_at(T - 3000), 0.0);
    }

    #[test]
    fn test_evaluated_snapshot_keeps_same_trajectory() {
        let state = anchored(10.0, true);
        let evaluated = state.evaluated_at(T + 2000);

        assert_eq!(evaluated.anchor_timestamp_ms, T + 2000);
        assert!((evaluated.anchor_position - 12.0).abs() < 1e-9);
        assert_eq!(evaluated.revision, state.revision);
        // Both snapshots agree about any later instant
        let later = T + 7000;
        assert!((evaluated.position_at(later) - state.position_at(later)).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_position() {
        assert_eq!(clamp_position(-5.0, Some(200.0)), 0.0);
        assert_eq!(clamp_position(500.0, Some(200.0)), 200.0);
        assert_eq!(clamp_position(500.0, None), 500.0);
        assert_eq!(clamp_position(f64::NAN, None), 0.0);
    }
}
