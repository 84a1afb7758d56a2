//! Latency tracking to the coordinator
//!
//! Measures round-trip time (RTT) with Ping/Pong messages. The estimate is
//! diagnostic only: reconciliation extrapolates from receipt time and never
//! adds a latency offset.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::sync::current_time_ms;

/// Number of RTT samples to keep for averaging
const RTT_SAMPLE_COUNT: usize = 5;

/// Pings unanswered for this long are forgotten
const PING_EXPIRY: Duration = Duration::from_secs(10);

/// Tracks RTT to the coordinator
#[derive(Default)]
pub struct LatencyTracker {
    /// Pending pings awaiting pong, keyed by the timestamp they carry
    pending_pings: HashMap<u64, Instant>,
    /// Recent RTT samples in milliseconds
    samples: VecDeque<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything (coordinator changed or connection reset)
    pub fn clear(&mut self) {
        self.pending_pings.clear();
        self.samples.clear();
    }

    /// Create a ping to send. Returns the timestamp to include in the Ping message.
    pub fn create_ping(&mut self) -> u64 {
        let mut timestamp_ms = current_time_ms();
        // Two pings within the same millisecond need distinct keys
        while self.pending_pings.contains_key(&timestamp_ms) {
            timestamp_ms += 1;
        }
        self.pending_pings.insert(timestamp_ms, Instant::now());
        self.pending_pings
            .retain(|_, sent_at| sent_at.elapsed() < PING_EXPIRY);

        timestamp_ms
    }

    /// Handle a pong. Returns the measured RTT if it answers one of our pings.
    pub fn handle_pong(&mut self, ping_sent_at_ms: u64) -> Option<u64> {
        let sent_at = self.pending_pings.remove(&ping_sent_at_ms)?;
        let rtt_ms = sent_at.elapsed().as_millis() as u64;
        self.add_sample(rtt_ms);

        tracing::debug!(
            "Coordinator RTT={}ms, avg={:?}ms, one-way={:?}ms",
            rtt_ms,
            self.average_rtt_ms(),
            self.one_way_latency_ms()
        );
        Some(rtt_ms)
    }

    fn add_sample(&mut self, rtt_ms: u64) {
        if self.samples.len() >= RTT_SAMPLE_COUNT {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    /// Average RTT over the recent samples, if any
    pub fn average_rtt_ms(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<u64>() / self.samples.len() as u64)
    }

    /// Estimated one-way latency (RTT / 2)
    pub fn one_way_latency_ms(&self) -> Option<u64> {
        self.average_rtt_ms().map(|rtt| rtt / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracker_basics() {
        let mut tracker = LatencyTracker::new();
        assert_eq!(tracker.one_way_latency_ms(), None);

        let ts = tracker.create_ping();
        std::thread::sleep(Duration::from_millis(50));
        let rtt = tracker.handle_pong(ts).unwrap();
        assert!(rtt >= 50);
        assert!(tracker.one_way_latency_ms().unwrap() >= 25);

        // Same pong twice is ignored
        assert!(tracker.handle_pong(ts).is_none());
    }

    #[test]
    fn test_unknown_pong_is_ignored() {
        let mut tracker = LatencyTracker::new();
        assert!(tracker.handle_pong(42).is_none());
        assert_eq!(tracker.average_rtt_ms(), None);
    }

    #[test]
    fn test_averaging_keeps_last_five() {
        let mut tracker = LatencyTracker::new();
        for rtt in [1000, 100, 200, 150, 100, 200] {
            tracker.add_sample(rtt);
        }
        // The 1000ms outlier has aged out: (100+200+150+100+200)/5 = 150
        assert_eq!(tracker.average_rtt_ms(), Some(150));
        assert_eq!(tracker.one_way_latency_ms(), Some(75));

        tracker.clear();
        assert_eq!(tracker.average_rtt_ms(), None);
    }

    #[test]
    fn test_back_to_back_pings_get_distinct_keys() {
        let mut tracker = LatencyTracker::new();
        let a = tracker.create_ping();
        let b = tracker.create_ping();
        assert_ne!(a, b);
        assert!(tracker.handle_pong(a).is_some());
        assert!(tracker.handle_pong(b).is_some());
    }
}
