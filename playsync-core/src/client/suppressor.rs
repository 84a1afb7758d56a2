//! Loopback suppression
//!
//! A local action is applied to the player before the coordinator confirms
//! it. When the confirming broadcast comes back it must not be treated as a
//! foreign correction, and state that predates the action must not undo it.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::sync::{IntentKind, PlaybackState, SyncMessage};

/// Default suppression window per action
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_millis(500);

/// How an inbound coordinator message relates to pending local actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not explained by a local action; reconcile normally
    Foreign,
    /// Confirms what the player already does; skip player calls
    Echo,
    /// Older than a pending local action; applying it would undo that action
    Predates,
}

#[derive(Debug, Clone)]
struct PendingAction {
    seq: u64,
    /// Revision the client had adopted when it acted
    base_revision: u64,
    /// Expected state once the coordinator applies the action
    predicted: PlaybackState,
    until_ms: u64,
}

/// Per-client loopback guard, one window per intent kind
#[derive(Debug)]
pub struct LoopbackSuppressor {
    client_id: String,
    window_ms: u64,
    epsilon: f64,
    pending: HashMap<IntentKind, PendingAction>,
}

impl LoopbackSuppressor {
    pub fn new(client_id: impl Into<String>, window: Duration, epsilon: f64) -> Self {
        Self {
            client_id: client_id.into(),
            window_ms: window.as_millis() as u64,
            epsilon,
            pending: HashMap::new(),
        }
    }

    /// Open (or supersede) the window for `kind`
    pub fn open(
        &mut self,
        kind: IntentKind,
        seq: u64,
        base_revision: u64,
        predicted: PlaybackState,
        now_ms: u64,
    ) {
        debug!("Suppressing {:?} echoes until {} (seq {})", kind, now_ms + self.window_ms, seq);
        self.pending.insert(
            kind,
            PendingAction {
                seq,
                base_revision,
                predicted,
                until_ms: now_ms + self.window_ms,
            },
        );
    }

    /// Whether any window is still open at `now_ms`
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.pending.values().any(|p| p.until_ms > now_ms)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Classify a coordinator message whose full implied state is `implied`
    pub fn classify(&mut self, msg: &SyncMessage, implied: &PlaybackState, now_ms: u64) -> Verdict {
        self.pending.retain(|_, p| p.until_ms > now_ms);
        if self.pending.is_empty() {
            return Verdict::Foreign;
        }

        if let Some(cause) = msg.cause().filter(|c| c.client_id == self.client_id) {
            return self.classify_own(cause.seq, implied, now_ms);
        }

        if self
            .pending
            .values()
            .any(|p| implied.revision <= p.base_revision)
        {
            return Verdict::Predates;
        }

        // Someone else did what we just did
        if let Some(pending) = msg.broadcast_kind().and_then(|k| self.pending.get(&k)) {
            if self.consistent(&pending.predicted, implied, now_ms) {
                return Verdict::Echo;
            }
        }

        Verdict::Foreign
    }

    fn classify_own(&mut self, seq: u64, implied: &PlaybackState, now_ms: u64) -> Verdict {
        let matching = self
            .pending
            .iter()
            .find(|(_, p)| p.seq == seq)
            .map(|(kind, p)| (*kind, p.predicted.clone()));

        if let Some((kind, predicted)) = matching {
            self.pending.remove(&kind);
            return if self.consistent(&predicted, implied, now_ms) {
                Verdict::Echo
            } else {
                // The coordinator adjusted our action (clamped, or merged with another)
                Verdict::Foreign
            };
        }

        // Echo of an action a newer one already replaced: the newer action's
        // baseline now includes this revision
        let mut superseded = false;
        for pending in self.pending.values_mut().filter(|p| p.seq > seq) {
            pending.base_revision = pending.base_revision.max(implied.revision);
            superseded = true;
        }
        if superseded {
            Verdict::Predates
        } else {
            Verdict::Foreign
        }
    }

    fn consistent(&self, predicted: &PlaybackState, implied: &PlaybackState, now_ms: u64) -> bool {
        predicted.track_id == implied.track_id
            && predicted.is_playing == implied.is_playing
            && (predicted.position_at(now_ms) - implied.position_at(now_ms)).abs() <= self.epsilon
    }
}
