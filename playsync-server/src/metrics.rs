//! Metrics tracking for the coordinator server

use chrono::{DateTime, Local};
use playsync_core::coordinator::CoordinatorEvent;
use playsync_core::sync::{current_time_ms, IntentKind, PlaybackState};
use std::collections::VecDeque;

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Client,
    Sync,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Client => "CLIENT",
            LogLevel::Sync => "SYNC",
        }
    }
}

#[derive(Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub joined_at: DateTime<Local>,
    /// Intents accepted from this client
    pub intents: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServerStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// Server metrics
pub struct ServerMetrics {
    pub start_time: DateTime<Local>,
    pub status: ServerStatus,

    pub peer_id: Option<String>,
    pub session_code: Option<String>,
    pub tcp_port: u16,
    pub quic_port: u16,
    pub listen_addrs: Vec<String>,

    /// Clients currently in the session
    pub connected_clients: usize,
    /// Distinct joins since start
    pub total_clients: u64,
    pub peak_clients: usize,
    pub client_list: Vec<ClientInfo>,

    pub intents_accepted: u64,
    pub intents_rejected: u64,
    /// Mutation broadcasts sent
    pub broadcasts: u64,
    pub heartbeats: u64,

    pub catalog_tracks: usize,
    /// Latest authoritative state
    pub playback: Option<PlaybackState>,

    pub logs: VecDeque<LogEntry>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            status: ServerStatus::Starting,
            peer_id: None,
            session_code: None,
            tcp_port: 4001,
            quic_port: 4001,
            listen_addrs: Vec::new(),
            connected_clients: 0,
            total_clients: 0,
            peak_clients: 0,
            client_list: Vec::new(),
            intents_accepted: 0,
            intents_rejected: 0,
            broadcasts: 0,
            heartbeats: 0,
            catalog_tracks: 0,
            playback: None,
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Fold one coordinator event into the metrics
    pub fn record(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Ready {
                peer_id,
                session_code,
            } => {
                self.status = ServerStatus::Running;
                self.log(
                    LogLevel::Info,
                    format!("Coordinating session {}", session_code),
                );
                self.peer_id = Some(peer_id);
                self.session_code = Some(session_code.to_string());
            }
            CoordinatorEvent::Listening { address } => {
                self.log(LogLevel::Info, format!("Listening: {}", address));
                self.listen_addrs.push(address);
            }
            CoordinatorEvent::ClientJoined { client_id } => self.client_joined(client_id),
            CoordinatorEvent::ClientLeft { client_id } => self.client_left(&client_id),
            CoordinatorEvent::IntentApplied {
                client_id,
                kind,
                broadcast,
                state,
            } => self.intent_applied(&client_id, kind, broadcast, state),
            CoordinatorEvent::IntentRejected {
                client_id,
                kind,
                reason,
            } => {
                self.intents_rejected += 1;
                self.log(
                    LogLevel::Warning,
                    format!(
                        "Rejected {:?} from {}: {}",
                        kind,
                        truncate_peer_id(&client_id),
                        reason
                    ),
                );
            }
            CoordinatorEvent::Heartbeat { state, .. } => {
                self.heartbeats += 1;
                self.playback = Some(state);
            }
            CoordinatorEvent::CatalogLoaded { tracks } => {
                if tracks != self.catalog_tracks {
                    self.log(LogLevel::Info, format!("Catalog: {} tracks", tracks));
                }
                self.catalog_tracks = tracks;
            }
            CoordinatorEvent::CatalogFailed { error } => {
                self.log(LogLevel::Warning, format!("Catalog refresh failed: {}", error));
            }
            CoordinatorEvent::Error(e) => {
                self.log(LogLevel::Error, e);
            }
        }
    }

    /// Record a client joining (only counts unique clients)
    pub fn client_joined(&mut self, client_id: String) {
        if self.client_list.iter().any(|c| c.client_id == client_id) {
            return;
        }

        self.connected_clients += 1;
        self.total_clients += 1;
        self.peak_clients = self.peak_clients.max(self.connected_clients);

        let short_id = truncate_peer_id(&client_id);
        self.client_list.push(ClientInfo {
            client_id,
            joined_at: Local::now(),
            intents: 0,
        });
        self.log(LogLevel::Client, format!("Joined: {}", short_id));
    }

    /// Record a client leaving (only if it was tracked)
    pub fn client_left(&mut self, client_id: &str) {
        if !self.client_list.iter().any(|c| c.client_id == client_id) {
            return;
        }

        self.connected_clients = self.connected_clients.saturating_sub(1);
        self.client_list.retain(|c| c.client_id != client_id);
        self.log(
            LogLevel::Client,
            format!("Left: {}", truncate_peer_id(client_id)),
        );
    }

    fn intent_applied(
        &mut self,
        client_id: &str,
        kind: IntentKind,
        broadcast: bool,
        state: PlaybackState,
    ) {
        self.intents_accepted += 1;
        if let Some(client) = self.client_list.iter_mut().find(|c| c.client_id == client_id) {
            client.intents += 1;
        }

        if broadcast {
            self.broadcasts += 1;
            let track = state.track_id.as_deref().unwrap_or("-");
            self.log(
                LogLevel::Sync,
                format!(
                    "{:?} by {} -> {} @ {:.1}s (rev {})",
                    kind,
                    truncate_peer_id(client_id),
                    track,
                    state.anchor_position,
                    state.revision
                ),
            );
        }
        self.playback = Some(state);
    }

    /// Authoritative position right now, if a track is selected
    pub fn current_position(&self) -> Option<f64> {
        let state = self.playback.as_ref()?;
        state.track_id.as_ref()?;
        Some(state.position_at(current_time_ms()))
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate peer ID for display (show first and last few chars)
pub fn truncate_peer_id(peer_id: &str) -> String {
    if peer_id.len() > 16 {
        format!("{}...{}", &peer_id[..8], &peer_id[peer_id.len() - 4..])
    } else {
        peer_id.to_string()
    }
}

/// Format seconds as m:ss
pub fn format_position(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(track: &str, revision: u64) -> PlaybackState {
        PlaybackState {
            track_id: Some(track.to_string()),
            anchor_position: 12.0,
            anchor_timestamp_ms: current_time_ms(),
            is_playing: false,
            revision,
            duration: None,
        }
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let mut m = ServerMetrics::new();
        for i in 0..(MAX_LOG_ENTRIES + 20) {
            m.log(LogLevel::Info, format!("entry {}", i));
        }
        assert_eq!(m.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(m.logs.front().unwrap().message, "entry 20");
    }

    #[test]
    fn test_clients_are_counted_once() {
        let mut m = ServerMetrics::new();
        m.client_joined("a".to_string());
        m.client_joined("a".to_string());
        m.client_joined("b".to_string());
        assert_eq!(m.connected_clients, 2);
        assert_eq!(m.total_clients, 2);

        m.client_left("a");
        m.client_left("a");
        m.client_left("unknown");
        assert_eq!(m.connected_clients, 1);
        assert_eq!(m.peak_clients, 2);

        m.client_joined("a".to_string());
        assert_eq!(m.total_clients, 3);
    }

    #[test]
    fn test_records_intents_and_playback() {
        let mut m = ServerMetrics::new();
        m.client_joined("a".to_string());

        m.record(CoordinatorEvent::IntentApplied {
            client_id: "a".to_string(),
            kind: IntentKind::Play,
            broadcast: true,
            state: state("song.mp3", 1),
        });
        m.record(CoordinatorEvent::IntentApplied {
            client_id: "a".to_string(),
            kind: IntentKind::ReportDuration,
            broadcast: false,
            state: state("song.mp3", 1),
        });
        m.record(CoordinatorEvent::IntentRejected {
            client_id: "a".to_string(),
            kind: IntentKind::Seek,
            reason: "No track selected".to_string(),
        });

        assert_eq!(m.intents_accepted, 2);
        assert_eq!(m.intents_rejected, 1);
        assert_eq!(m.broadcasts, 1);
        assert_eq!(m.client_list[0].intents, 2);
        assert_eq!(m.current_position(), Some(12.0));
        assert_eq!(
            m.playback.as_ref().and_then(|p| p.track_id.as_deref()),
            Some("song.mp3")
        );
    }

    #[test]
    fn test_heartbeat_updates_snapshot() {
        let mut m = ServerMetrics::new();
        m.record(CoordinatorEvent::Heartbeat {
            state: state("x", 7),
            clients: 0,
        });
        assert_eq!(m.heartbeats, 1);
        assert_eq!(m.playback.unwrap().revision, 7);
    }

    #[test]
    fn test_truncate_peer_id() {
        assert_eq!(truncate_peer_id("short"), "short");
        assert_eq!(
            truncate_peer_id("12D3KooWAbcdefghijklmnop"),
            "12D3KooW...mnop"
        );
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "0:00");
        assert_eq!(format_position(125.7), "2:05");
        assert_eq!(format_position(-3.0), "0:00");
    }
}
