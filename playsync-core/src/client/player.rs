//! Local playback engine seam

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::sync::{clamp_position, current_time_ms};

/// Errors reported by the local playback engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    #[error("Track unavailable: {0}")]
    TrackUnavailable(String),

    #[error("No track loaded")]
    NoTrackLoaded,

    #[error("Playback engine error: {0}")]
    Engine(String),
}

/// The local media player a client drives.
///
/// Calls are synchronous: a `seek` that returns `Ok` has completed.
pub trait MediaPlayer: Send {
    /// Load a track, paused at position 0
    fn load(&mut self, track_id: &str) -> Result<(), PlayerError>;
    fn seek(&mut self, position: f64) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    /// Current position in seconds
    fn position(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn current_track(&self) -> Option<String>;
    /// Length of the loaded track, once the engine knows it
    fn duration(&self) -> Option<f64> {
        None
    }
}

/// A call made on a [`SimulatedPlayer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Load(String),
    Seek(f64),
    Play,
    Pause,
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Default)]
struct SimulatedState {
    track: Option<String>,
    anchor_position: f64,
    anchor_ms: u64,
    playing: bool,
    calls: Vec<PlayerCall>,
    durations: HashMap<String, f64>,
    unavailable: HashSet<String>,
}

/// Clock-driven virtual player.
///
/// Clones share state, so a test (or the headless listener) can keep one
/// clone to inspect what the session did with another.
#[derive(Clone)]
pub struct SimulatedPlayer {
    state: Arc<Mutex<SimulatedState>>,
    clock: Clock,
}

impl SimulatedPlayer {
    /// Player driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(current_time_ms)
    }

    /// Player driven by a custom millisecond clock
    pub fn with_clock(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState::default())),
            clock: Arc::new(clock),
        }
    }

    /// Report `duration` seconds for `track_id` once it is loaded
    pub fn set_duration(&self, track_id: &str, duration: f64) {
        self.state
            .lock()
            .durations
            .insert(track_id.to_string(), duration);
    }

    /// Make loading `track_id` fail
    pub fn mark_unavailable(&self, track_id: &str) {
        self.state.lock().unavailable.insert(track_id.to_string());
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedState {
    fn position_at(&self, now_ms: u64) -> f64 {
        let duration = self.track.as_ref().and_then(|t| self.durations.get(t)).copied();
        if !self.playing {
            return clamp_position(self.anchor_position, duration);
        }
        let elapsed = now_ms.saturating_sub(self.anchor_ms) as f64 / 1000.0;
        clamp_position(self.anchor_position + elapsed, duration)
    }

    fn reanchor(&mut self, now_ms: u64) {
        self.anchor_position = self.position_at(now_ms);
        self.anchor_ms = now_ms;
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn load(&mut self, track_id: &str) -> Result<(), PlayerError> {
        let now = self.now();
        let mut s = self.state.lock();
        s.calls.push(PlayerCall::Load(track_id.to_string()));
        if s.unavailable.contains(track_id) {
            s.track = None;
            s.playing = false;
            return Err(PlayerError::TrackUnavailable(track_id.to_string()));
        }
        s.track = Some(track_id.to_string());
        s.anchor_position = 0.0;
        s.anchor_ms = now;
        s.playing = false;
        Ok(())
    }

    fn seek(&mut self, position: f64) -> Result<(), PlayerError> {
        let now = self.now();
        let mut s = self.state.lock();
        s.calls.push(PlayerCall::Seek(position));
        if s.track.is_none() {
            return Err(PlayerError::NoTrackLoaded);
        }
        s.anchor_position = position.max(0.0);
        s.anchor_ms = now;
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        let now = self.now();
        let mut s = self.state.lock();
        s.calls.push(PlayerCall::Play);
        if s.track.is_none() {
            return Err(PlayerError::NoTrackLoaded);
        }
        if !s.playing {
            s.reanchor(now);
            s.playing = true;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        let now = self.now();
        let mut s = self.state.lock();
        s.calls.push(PlayerCall::Pause);
        if s.playing {
            s.reanchor(now);
            s.playing = false;
        }
        Ok(())
    }

    fn position(&self) -> f64 {
        let now = self.now();
        self.state.lock().position_at(now)
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn current_track(&self) -> Option<String> {
        self.state.lock().track.clone()
    }

    fn duration(&self) -> Option<f64> {
        let s = self.state.lock();
        s.track.as_ref().and_then(|t| s.durations.get(t)).copied()
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Manually advanced millisecond clock
    #[derive(Clone)]
    pub struct TestClock(Arc<AtomicU64>);

    impl TestClock {
        pub fn at(ms: u64) -> Self {
            Self(Arc::new(AtomicU64::new(ms)))
        }

        pub fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }

        pub fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn player(&self) -> super::SimulatedPlayer {
            let clock = self.clone();
            super::SimulatedPlayer::with_clock(move || clock.now())
        }
    }
}
