//! Client session
//!
//! One task per client: joins the session topic, bootstraps from the
//! coordinator, feeds its broadcasts to the [`Reconciler`] and turns local
//! [`UserAction`]s into intents.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::controls::{LocalControls, UserAction};
use super::player::MediaPlayer;
use super::reconciler::{ApplyOutcome, Reconciler, ReconcilerConfig, ReconcilerState};
use super::suppressor::{LoopbackSuppressor, DEFAULT_SUPPRESSION_WINDOW};
use crate::error::CoreError;
use crate::latency::LatencyTracker;
use crate::network::{NetworkConfig, NetworkEvent, NetworkHandle, NetworkManager, SessionCode};
use crate::sync::{current_time_ms, SyncMessage};

/// A track counts as finished this close to its end
const END_TOLERANCE_SECS: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session_code: SessionCode,
    pub reconciler: ReconcilerConfig,
    /// How long a local action's echo is suppressed
    pub suppression_window: Duration,
    /// Hello is re-sent at this interval until a snapshot arrives
    pub hello_interval: Duration,
    pub ping_interval: Duration,
    /// Coordinator silence after which the client resynchronises
    pub stale_timeout: Duration,
    /// How often the local player is checked for track end and duration
    pub watch_interval: Duration,
}

impl ClientConfig {
    pub fn new(session_code: SessionCode) -> Self {
        Self {
            session_code,
            reconciler: ReconcilerConfig::default(),
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
            hello_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(2),
            stale_timeout: Duration::from_secs(5),
            watch_interval: Duration::from_millis(250),
        }
    }
}

/// Sync status reported to observers
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: ReconcilerState,
    pub coordinator_id: Option<String>,
    /// Revision of the last adopted state
    pub revision: Option<u64>,
    pub track_id: Option<String>,
    /// Local minus coordinator position (seconds) at the last check
    pub drift: Option<f64>,
    pub rtt_ms: Option<u64>,
    pub one_way_latency_ms: Option<u64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: ReconcilerState::Initializing,
            coordinator_id: None,
            revision: None,
            track_id: None,
            drift: None,
            rtt_ms: None,
            one_way_latency_ms: None,
        }
    }
}

/// Callbacks from a running session. Called from the session task.
pub trait ClientObserver: Send + Sync {
    fn on_state_changed(&self, _state: ReconcilerState) {}
    fn on_track_changed(&self, _track_id: Option<String>) {}
    fn on_sync_status(&self, _status: SyncStatus) {}
    fn on_connected(&self, _coordinator_id: String) {}
    fn on_disconnected(&self) {}
    fn on_error(&self, _message: String) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}

enum SessionCommand {
    Perform {
        action: UserAction,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Shutdown,
}

/// Handle to a running [`ClientSession`]
#[derive(Clone)]
pub struct ClientHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    status: Arc<RwLock<SyncStatus>>,
    local_peer_id: String,
}

impl ClientHandle {
    /// Apply a local action and send it to the coordinator
    pub async fn perform(&self, action: UserAction) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Perform { action, reply })
            .map_err(|_| CoreError::SessionClosed)?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Our client id (the local peer id)
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
    }
}

/// Per-client session state, owned by the session task
pub struct ClientSession {
    config: ClientConfig,
    network: NetworkHandle,
    player: Box<dyn MediaPlayer>,
    observer: Arc<dyn ClientObserver>,
    reconciler: Reconciler,
    suppressor: LoopbackSuppressor,
    controls: LocalControls,
    latency: LatencyTracker,
    status: Arc<RwLock<SyncStatus>>,
    coordinator_id: Option<String>,
    last_heard: Option<Instant>,
    /// Last state and track reported to the observer
    reported_state: ReconcilerState,
    reported_track: Option<String>,
    /// (track, revision) a TrackEnded was already sent for
    ended_sent: Option<(String, u64)>,
    /// Track a duration was already reported for
    duration_sent: Option<String>,
}

impl ClientSession {
    /// Start the transport and the session task
    pub fn start(
        config: ClientConfig,
        network_config: NetworkConfig,
        player: Box<dyn MediaPlayer>,
        observer: Arc<dyn ClientObserver>,
    ) -> Result<ClientHandle, CoreError> {
        let manager = NetworkManager::with_config(network_config)?;
        let (network, network_rx) = manager.start()?;
        Ok(Self::spawn(config, network, network_rx, player, observer))
    }

    /// Run a session over an already started transport
    pub fn spawn(
        config: ClientConfig,
        network: NetworkHandle,
        network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        player: Box<dyn MediaPlayer>,
        observer: Arc<dyn ClientObserver>,
    ) -> ClientHandle {
        let client_id = network.local_peer_id.clone();
        let status = Arc::new(RwLock::new(SyncStatus::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = Self {
            reconciler: Reconciler::new(config.reconciler),
            suppressor: LoopbackSuppressor::new(
                client_id.clone(),
                config.suppression_window,
                config.reconciler.epsilon,
            ),
            controls: LocalControls::new(client_id.clone()),
            latency: LatencyTracker::new(),
            status: Arc::clone(&status),
            coordinator_id: None,
            last_heard: None,
            reported_state: ReconcilerState::Initializing,
            reported_track: None,
            ended_sent: None,
            duration_sent: None,
            config,
            network,
            player,
            observer,
        };

        tokio::spawn(session.run(network_rx, command_rx));

        ClientHandle {
            command_tx,
            status,
            local_peer_id: client_id,
        }
    }

    async fn run(
        mut self,
        mut network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        if let Err(e) = self.network.join_session(&self.config.session_code) {
            warn!("Failed to join session {}: {}", self.config.session_code, e);
            self.observer.on_error(e.to_string());
            return;
        }
        info!("Joined session {}", self.config.session_code);

        let start = Instant::now();
        let mut hello = interval(self.config.hello_interval);
        hello.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping = interval_at(start + self.config.ping_interval, self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut watch = interval(self.config.watch_interval);
        watch.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Perform { action, reply }) => {
                            let result = self.perform(action);
                            let _ = reply.send(result);
                        }
                        Some(SessionCommand::Shutdown) | None => {
                            info!("Client session shutting down");
                            break;
                        }
                    }
                }

                event = network_rx.recv() => {
                    let Some(event) = event else {
                        warn!("Network event stream ended");
                        self.observer.on_disconnected();
                        break;
                    };
                    self.handle_network_event(event);
                }

                _ = hello.tick() => {
                    if self.reconciler.state() == ReconcilerState::Initializing {
                        debug!("Sending Hello");
                        if let Err(e) = self.network.broadcast(SyncMessage::Hello) {
                            debug!("Hello not sent: {}", e);
                        }
                    }
                }

                _ = ping.tick() => {
                    if self.coordinator_id.is_some() {
                        let sent_at_ms = self.latency.create_ping();
                        if let Err(e) = self.network.broadcast(SyncMessage::Ping { sent_at_ms }) {
                            debug!("Ping not sent: {}", e);
                        }
                    }
                }

                _ = watch.tick() => {
                    self.check_stale();
                    if self.reconciler.confirm(current_time_ms(), self.player.as_ref()) {
                        self.publish_status();
                    }
                    self.watch_player();
                }
            }
        }

        let _ = self.network.leave_session();
        self.network.shutdown();
    }

    fn perform(&mut self, action: UserAction) -> Result<(), CoreError> {
        let msg = self.controls.perform(
            action,
            current_time_ms(),
            &self.reconciler,
            self.player.as_mut(),
            &mut self.suppressor,
        )?;
        self.network.broadcast(msg)?;
        self.publish_status();
        Ok(())
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Ready { peer_id } => {
                debug!("Network ready as {}", peer_id);
            }

            NetworkEvent::Listening { address } => {
                debug!("Listening on {}", address);
            }

            NetworkEvent::PeerSubscribed { peer_id } => {
                debug!("Peer {} subscribed", peer_id);
            }

            NetworkEvent::PeerUnsubscribed { peer_id } => {
                if self.coordinator_id.as_deref() == Some(peer_id.as_str()) {
                    self.reset_connection("coordinator left the session");
                }
            }

            NetworkEvent::Message {
                from,
                message,
                received_at_ms,
            } => self.handle_message(from, message, received_at_ms),

            NetworkEvent::Error(e) => {
                warn!("Network error: {}", e);
                self.observer.on_error(e);
            }
        }
    }

    fn handle_message(&mut self, from: String, message: SyncMessage, received_at_ms: u64) {
        // Other clients' hellos, intents and pings
        if !message.is_from_coordinator() {
            return;
        }

        match &self.coordinator_id {
            Some(id) if *id != from => {
                warn!("Ignoring {} publishing coordinator messages; following {}", from, id);
                return;
            }
            Some(_) => {}
            None => {
                info!("Following coordinator {}", from);
                self.coordinator_id = Some(from.clone());
                self.latency.clear();
                self.observer.on_connected(from);
            }
        }
        self.last_heard = Some(Instant::now());

        if let Some(target) = message.target() {
            if target != self.network.local_peer_id {
                return;
            }
        }

        if let SyncMessage::Pong { ping_sent_at_ms, .. } = message {
            if self.latency.handle_pong(ping_sent_at_ms).is_some() {
                self.publish_status();
            }
            return;
        }

        let outcome = self.reconciler.apply(
            &message,
            received_at_ms,
            self.player.as_mut(),
            &mut self.suppressor,
        );
        match &outcome {
            ApplyOutcome::Failed { track_id, error } => {
                self.observer.on_error(format!(
                    "Cannot play {}: {}",
                    track_id.as_deref().unwrap_or("track"),
                    error
                ));
            }
            ApplyOutcome::Applied(adjustments) if !adjustments.is_empty() => {
                debug!("Applied {:?}", adjustments);
            }
            _ => {}
        }
        self.publish_status();
    }

    /// Coordinator gone: drop everything learned from it and bootstrap again
    fn reset_connection(&mut self, reason: &str) {
        warn!("Resynchronising: {}", reason);
        self.reconciler.reset();
        self.suppressor.clear();
        self.latency.clear();
        self.coordinator_id = None;
        self.last_heard = None;
        self.ended_sent = None;
        self.duration_sent = None;
        self.observer.on_disconnected();
        self.publish_status();
    }

    fn check_stale(&mut self) {
        let Some(last_heard) = self.last_heard else {
            return;
        };
        if last_heard.elapsed() >= self.config.stale_timeout {
            self.reset_connection("coordinator went silent");
        }
    }

    /// Report track end and newly learned durations to the coordinator
    fn watch_player(&mut self) {
        let Some(shadow) = self.reconciler.shadow().cloned() else {
            return;
        };
        let Some(track_id) = self.player.current_track() else {
            return;
        };
        if shadow.track_id.as_deref() != Some(track_id.as_str()) {
            return;
        }

        if shadow.duration.is_none() && self.duration_sent.as_deref() != Some(track_id.as_str()) {
            if let Some(duration) = self.player.duration() {
                self.duration_sent = Some(track_id.clone());
                self.send_action(UserAction::ReportDuration(duration));
            }
        }

        let Some(duration) = self.player.duration().or(shadow.duration) else {
            return;
        };
        if !shadow.is_playing || self.player.position() < duration - END_TOLERANCE_SECS {
            return;
        }
        let key = (track_id, shadow.revision);
        if self.ended_sent.as_ref() != Some(&key) {
            info!("Track {} ended", key.0);
            self.ended_sent = Some(key);
            self.send_action(UserAction::TrackEnded);
        }
    }

    fn send_action(&mut self, action: UserAction) {
        if let Err(e) = self.perform(action) {
            debug!("Local report not sent: {}", e);
        }
    }

    fn publish_status(&mut self) {
        let state = self.reconciler.state();
        let track_id = self.reconciler.shadow().and_then(|s| s.track_id.clone());

        if state != self.reported_state {
            self.reported_state = state;
            self.observer.on_state_changed(state);
        }
        if track_id != self.reported_track {
            self.reported_track = track_id.clone();
            self.observer.on_track_changed(track_id.clone());
        }

        let status = SyncStatus {
            state,
            coordinator_id: self.coordinator_id.clone(),
            revision: self.reconciler.revision(),
            track_id,
            drift: self.reconciler.last_drift(),
            rtt_ms: self.latency.average_rtt_ms(),
            one_way_latency_ms: self.latency.one_way_latency_ms(),
        };
        *self.status.write() = status.clone();
        self.observer.on_sync_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_playlist;
    use crate::client::player::{PlayerCall, SimulatedPlayer};
    use crate::coordinator::{CoordinatorConfig, CoordinatorService};
    use crate::network::NetworkCommand;
    use crate::sync::{Intent, PlaybackState};
    use parking_lot::Mutex;
    use tokio::time::{sleep, timeout};

    /// In-memory topic: every broadcast reaches every other attached peer
    #[derive(Clone, Default)]
    struct Bus {
        peers: Arc<Mutex<Vec<(String, mpsc::UnboundedSender<NetworkEvent>)>>>,
    }

    impl Bus {
        fn attach(&self, id: &str) -> (NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>) {
            let (handle, mut commands) = NetworkHandle::channel(id);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            self.peers.lock().push((id.to_string(), events_tx));

            let bus = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                while let Some(command) = commands.recv().await {
                    match command {
                        NetworkCommand::JoinSession { .. } => {
                            bus.deliver(&id, || NetworkEvent::PeerSubscribed { peer_id: id.clone() })
                        }
                        NetworkCommand::LeaveSession => {
                            bus.deliver(&id, || NetworkEvent::PeerUnsubscribed { peer_id: id.clone() })
                        }
                        NetworkCommand::Broadcast { message } => bus.deliver(&id, || {
                            NetworkEvent::Message {
                                from: id.clone(),
                                message: message.clone(),
                                received_at_ms: current_time_ms(),
                            }
                        }),
                        NetworkCommand::DialPeer { .. } => {}
                        NetworkCommand::Shutdown => break,
                    }
                }
            });

            (handle, events_rx)
        }

        fn deliver(&self, from: &str, event: impl Fn() -> NetworkEvent) {
            for (id, tx) in self.peers.lock().iter() {
                if id != from {
                    let _ = tx.send(event());
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn count(&self, name: &str) -> usize {
            self.events.lock().iter().filter(|e| *e == name).count()
        }
    }

    impl ClientObserver for Recorder {
        fn on_state_changed(&self, state: ReconcilerState) {
            self.events.lock().push(format!("{:?}", state));
        }
        fn on_connected(&self, _coordinator_id: String) {
            self.events.lock().push("connected".to_string());
        }
        fn on_disconnected(&self) {
            self.events.lock().push("disconnected".to_string());
        }
        fn on_error(&self, _message: String) {
            self.events.lock().push("error".to_string());
        }
    }

    fn code() -> SessionCode {
        SessionCode::parse("ABCD-EFGH").unwrap()
    }

    fn client_config() -> ClientConfig {
        ClientConfig {
            hello_interval: Duration::from_millis(100),
            watch_interval: Duration::from_millis(20),
            ..ClientConfig::new(code())
        }
    }

    fn start_coordinator(bus: &Bus) -> oneshot::Sender<()> {
        let (handle, events) = bus.attach("coordinator");
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_millis(100),
            catalog_refresh_interval: Duration::from_secs(3600),
            session_code: code(),
            ..CoordinatorConfig::default()
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let service = CoordinatorService::new(config, Box::new(test_playlist(&["A", "B"])), handle);
        tokio::spawn(service.run(events, shutdown_rx));
        shutdown_tx
    }

    fn start_client(
        bus: &Bus,
        id: &str,
        config: ClientConfig,
    ) -> (ClientHandle, SimulatedPlayer, Arc<Recorder>) {
        let (handle, events) = bus.attach(id);
        let player = SimulatedPlayer::new();
        let recorder = Arc::new(Recorder::default());
        let client = ClientSession::spawn(
            config,
            handle,
            events,
            Box::new(player.clone()),
            recorder.clone(),
        );
        (client, player, recorder)
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        let waited = timeout(Duration::from_secs(3), async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {}", what);
    }

    async fn synced(client: &ClientHandle) {
        eventually("sync", || client.status().state == ReconcilerState::Synced).await;
    }

    #[tokio::test]
    async fn test_actions_need_a_snapshot_first() {
        let bus = Bus::default();
        let (client, _player, _) = start_client(&bus, "client-1", client_config());

        let err = client.perform(UserAction::Pause).await.unwrap_err();
        assert!(matches!(err, CoreError::NotSynced));
        client.shutdown();
    }

    #[tokio::test]
    async fn test_late_joiner_converges_to_playing_session() {
        let bus = Bus::default();
        let _coordinator = start_coordinator(&bus);
        let (first, first_player, _) = start_client(&bus, "client-1", client_config());
        synced(&first).await;

        first
            .perform(UserAction::Play { track_id: "A".to_string(), at_position: 30.0 })
            .await
            .unwrap();
        sleep(Duration::from_millis(300)).await;

        let (second, second_player, _) = start_client(&bus, "client-2", client_config());
        synced(&second).await;
        eventually("second player to play", || second_player.is_playing()).await;

        assert_eq!(second_player.current_track().as_deref(), Some("A"));
        let drift = (second_player.position() - first_player.position()).abs();
        assert!(drift < 0.3, "drift {}", drift);
        assert_eq!(second.status().revision, first.status().revision);
    }

    #[tokio::test]
    async fn test_own_action_is_not_reapplied() {
        let bus = Bus::default();
        let _coordinator = start_coordinator(&bus);
        let (client, player, _) = start_client(&bus, "client-1", client_config());
        synced(&client).await;

        client
            .perform(UserAction::Play { track_id: "B".to_string(), at_position: 10.0 })
            .await
            .unwrap();
        eventually("echo", || client.status().revision == Some(1)).await;
        player.clear_calls();

        client.perform(UserAction::Pause).await.unwrap();
        // Echo plus several heartbeats
        sleep(Duration::from_millis(400)).await;

        assert_eq!(player.calls(), vec![PlayerCall::Pause]);
        assert_eq!(client.status().revision, Some(2));
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_remote_seek_reaches_other_client() {
        let bus = Bus::default();
        let _coordinator = start_coordinator(&bus);
        let (first, _, _) = start_client(&bus, "client-1", client_config());
        let (second, second_player, second_events) =
            start_client(&bus, "client-2", client_config());
        synced(&first).await;
        synced(&second).await;

        first
            .perform(UserAction::Play { track_id: "A".to_string(), at_position: 0.0 })
            .await
            .unwrap();
        eventually("second to play", || second_player.is_playing()).await;

        first.perform(UserAction::Seek(50.0)).await.unwrap();
        eventually("second to seek", || (second_player.position() - 50.0).abs() < 0.3).await;

        // The jump is reported as a correction, then confirmed by the watch
        eventually("correction", || second_events.count("Correcting") >= 1).await;
        synced(&second).await;
    }

    /// Raw coordinator node for driving a client by hand
    struct FakeCoordinator {
        handle: NetworkHandle,
        events: mpsc::UnboundedReceiver<NetworkEvent>,
    }

    impl FakeCoordinator {
        fn attach(bus: &Bus) -> Self {
            let (handle, events) = bus.attach("coordinator");
            Self { handle, events }
        }

        fn snapshot(&self, target: &str, state: PlaybackState) {
            self.handle
                .broadcast(SyncMessage::Snapshot { target: target.to_string(), state })
                .unwrap();
        }

        fn drain(&mut self) {
            while self.events.try_recv().is_ok() {}
        }

        /// Messages received within `window`
        async fn collect(&mut self, window: Duration) -> Vec<SyncMessage> {
            let mut messages = Vec::new();
            let _ = timeout(window, async {
                while let Some(event) = self.events.recv().await {
                    if let NetworkEvent::Message { message, .. } = event {
                        messages.push(message);
                    }
                }
            })
            .await;
            messages
        }
    }

    fn playing(track: &str, position: f64, duration: Option<f64>) -> PlaybackState {
        PlaybackState {
            track_id: Some(track.to_string()),
            anchor_position: position,
            anchor_timestamp_ms: current_time_ms(),
            is_playing: true,
            revision: 3,
            duration,
        }
    }

    #[tokio::test]
    async fn test_snapshot_for_another_client_is_ignored() {
        let bus = Bus::default();
        let fake = FakeCoordinator::attach(&bus);
        let (client, player, _) = start_client(&bus, "client-1", client_config());

        fake.snapshot("client-2", playing("A", 5.0, None));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(client.status().state, ReconcilerState::Initializing);
        assert!(player.calls().is_empty());

        fake.snapshot("client-1", playing("A", 5.0, None));
        synced(&client).await;
        assert_eq!(player.current_track().as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_second_coordinator_is_ignored() {
        let bus = Bus::default();
        let fake = FakeCoordinator::attach(&bus);
        let (intruder, _) = bus.attach("intruder");
        let (client, player, _) = start_client(&bus, "client-1", client_config());

        fake.snapshot("client-1", playing("A", 5.0, None));
        synced(&client).await;

        let mut hijack = playing("B", 0.0, None);
        hijack.revision = 9;
        intruder.broadcast(SyncMessage::Heartbeat(hijack)).unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(client.status().revision, Some(3));
        assert_eq!(player.current_track().as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_silent_coordinator_triggers_rebootstrap() {
        let bus = Bus::default();
        let mut fake = FakeCoordinator::attach(&bus);
        let config = ClientConfig {
            stale_timeout: Duration::from_millis(200),
            ..client_config()
        };
        let (client, _, recorder) = start_client(&bus, "client-1", config);

        fake.snapshot("client-1", playing("A", 5.0, None));
        synced(&client).await;

        eventually("reset", || client.status().state == ReconcilerState::Initializing).await;
        assert_eq!(recorder.count("connected"), 1);
        assert_eq!(recorder.count("disconnected"), 1);

        // Hello goes out again
        fake.drain();
        let messages = fake.collect(Duration::from_millis(300)).await;
        assert!(messages.contains(&SyncMessage::Hello));
    }

    #[tokio::test]
    async fn test_coordinator_leaving_resets_client() {
        let bus = Bus::default();
        let shutdown = start_coordinator(&bus);
        let (client, _, recorder) = start_client(&bus, "client-1", client_config());
        synced(&client).await;

        shutdown.send(()).unwrap();
        eventually("reset", || client.status().state == ReconcilerState::Initializing).await;
        assert_eq!(recorder.count("disconnected"), 1);
        assert_eq!(client.status().coordinator_id, None);
    }

    #[tokio::test]
    async fn test_track_end_reported_once() {
        let bus = Bus::default();
        let mut fake = FakeCoordinator::attach(&bus);
        let (client, player, _) = start_client(&bus, "client-1", client_config());
        player.set_duration("A", 1.0);

        fake.snapshot("client-1", playing("A", 0.9, Some(1.0)));
        synced(&client).await;

        let ended = fake
            .collect(Duration::from_millis(500))
            .await
            .into_iter()
            .filter(|m| {
                matches!(
                    m,
                    SyncMessage::Intent { intent: Intent::TrackEnded { track_id }, .. } if track_id == "A"
                )
            })
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn test_learned_duration_is_reported() {
        let bus = Bus::default();
        let mut fake = FakeCoordinator::attach(&bus);
        let (client, player, _) = start_client(&bus, "client-1", client_config());
        player.set_duration("A", 240.0);

        fake.snapshot("client-1", playing("A", 0.0, None));
        synced(&client).await;

        let reports: Vec<_> = fake
            .collect(Duration::from_millis(300))
            .await
            .into_iter()
            .filter_map(|m| match m {
                SyncMessage::Intent { intent: Intent::ReportDuration { track_id, duration }, .. } => {
                    Some((track_id, duration))
                }
                _ => None,
            })
            .collect();
        assert_eq!(reports, vec![("A".to_string(), 240.0)]);
    }

    #[tokio::test]
    async fn test_unavailable_track_reports_error() {
        let bus = Bus::default();
        let fake = FakeCoordinator::attach(&bus);
        let (client, player, recorder) = start_client(&bus, "client-1", client_config());
        player.mark_unavailable("A");

        fake.snapshot("client-1", playing("A", 5.0, None));
        synced(&client).await;
        eventually("error", || recorder.count("error") == 1).await;
        assert!(!player.is_playing());
    }
}
