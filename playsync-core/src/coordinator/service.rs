//! Coordinator service loop
//!
//! Owns the [`Coordinator`] and drives it from one task: heartbeat ticks,
//! catalog refreshes and network events are all handled in a single
//! `select!`, so intents are applied one at a time in arrival order.

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use super::engine::Coordinator;
use crate::catalog::{CatalogError, Playlist, TrackCatalog};
use crate::error::CoreError;
use crate::network::{NetworkEvent, NetworkHandle, SessionCode};
use crate::sync::{current_time_ms, IntentKind, PlaybackState, SyncMessage};

/// What the coordinator did, for dashboards and logs
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Joined the session topic
    Ready {
        peer_id: String,
        session_code: SessionCode,
    },
    /// Transport listen address
    Listening { address: String },
    ClientJoined { client_id: String },
    ClientLeft { client_id: String },
    IntentApplied {
        client_id: String,
        kind: IntentKind,
        /// Whether the intent produced a broadcast
        broadcast: bool,
        state: PlaybackState,
    },
    IntentRejected {
        client_id: String,
        kind: IntentKind,
        reason: String,
    },
    Heartbeat { state: PlaybackState, clients: usize },
    CatalogLoaded { tracks: usize },
    CatalogFailed { error: String },
    Error(String),
}

/// Runs a [`Coordinator`] against the session topic
pub struct CoordinatorService {
    config: CoordinatorConfig,
    coordinator: Coordinator,
    network: NetworkHandle,
    /// Peers known to be in the session
    clients: HashSet<String>,
    observer: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
}

impl CoordinatorService {
    pub fn new(
        config: CoordinatorConfig,
        catalog: Box<dyn TrackCatalog>,
        network: NetworkHandle,
    ) -> Self {
        Self {
            config,
            coordinator: Coordinator::new(catalog),
            network,
            clients: HashSet::new(),
            observer: None,
        }
    }

    /// Receive [`CoordinatorEvent`]s on `tx`
    pub fn with_observer(mut self, tx: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        self.observer = Some(tx);
        self
    }

    fn emit(&self, event: CoordinatorEvent) {
        if let Some(tx) = &self.observer {
            let _ = tx.send(event);
        }
    }

    /// Run until `shutdown` fires or the network goes away
    pub async fn run(
        mut self,
        mut network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), CoreError> {
        self.network.join_session(&self.config.session_code)?;
        info!(
            "Coordinating session {} with {} tracks",
            self.config.session_code,
            self.coordinator.catalog().list_tracks().len()
        );
        self.emit(CoordinatorEvent::Ready {
            peer_id: self.network.local_peer_id.clone(),
            session_code: self.config.session_code.clone(),
        });

        let start = Instant::now();
        let mut heartbeat = interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = interval_at(
            start + self.config.catalog_refresh_interval,
            self.config.catalog_refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (catalog_tx, mut catalog_rx) = mpsc::unbounded_channel();
        let mut refresh_in_flight = false;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Coordinator shutting down");
                    break;
                }

                _ = heartbeat.tick() => {
                    self.send_heartbeat();
                }

                _ = refresh.tick() => {
                    if refresh_in_flight {
                        debug!("Catalog refresh still running, skipping tick");
                        continue;
                    }
                    refresh_in_flight = true;
                    let source = self.config.catalog.clone();
                    let tx = catalog_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(source.load().await);
                    });
                }

                Some(result) = catalog_rx.recv() => {
                    refresh_in_flight = false;
                    self.apply_catalog(result);
                }

                event = network_rx.recv() => {
                    let Some(event) = event else {
                        warn!("Network event stream ended");
                        break;
                    };
                    self.handle_network_event(event);
                }
            }
        }

        let _ = self.network.leave_session();
        Ok(())
    }

    fn send_heartbeat(&self) {
        let msg = self.coordinator.heartbeat(current_time_ms());
        if let Err(e) = self.network.broadcast(msg) {
            debug!("Heartbeat not sent: {}", e);
        }
        self.emit(CoordinatorEvent::Heartbeat {
            state: self.coordinator.state().clone(),
            clients: self.clients.len(),
        });
    }

    fn apply_catalog(&mut self, result: Result<Playlist, CatalogError>) {
        match result {
            Ok(playlist) => {
                let tracks = playlist.len();
                if playlist.list_tracks() != self.coordinator.catalog().list_tracks() {
                    info!("Catalog updated: {} tracks", tracks);
                }
                self.coordinator.replace_catalog(Box::new(playlist));
                self.emit(CoordinatorEvent::CatalogLoaded { tracks });
            }
            Err(e) => {
                warn!("Catalog refresh failed, keeping previous playlist: {}", e);
                self.emit(CoordinatorEvent::CatalogFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Ready { peer_id } => {
                debug!("Network ready as {}", peer_id);
            }

            NetworkEvent::Listening { address } => {
                self.emit(CoordinatorEvent::Listening { address });
            }

            NetworkEvent::PeerSubscribed { peer_id } => {
                self.client_seen(&peer_id);
                self.send_bootstrap(&peer_id);
            }

            NetworkEvent::PeerUnsubscribed { peer_id } => {
                if self.clients.remove(&peer_id) {
                    info!("Client {} left", peer_id);
                    self.emit(CoordinatorEvent::ClientLeft { client_id: peer_id });
                }
            }

            NetworkEvent::Message {
                from,
                message,
                received_at_ms,
            } => self.handle_message(from, message, received_at_ms),

            NetworkEvent::Error(e) => {
                warn!("Network error: {}", e);
                self.emit(CoordinatorEvent::Error(e));
            }
        }
    }

    fn handle_message(&mut self, from: String, message: SyncMessage, received_at_ms: u64) {
        match message {
            SyncMessage::Hello => {
                self.client_seen(&from);
                self.send_bootstrap(&from);
            }

            SyncMessage::Ping { sent_at_ms } => {
                let pong = SyncMessage::Pong {
                    target: from,
                    ping_sent_at_ms: sent_at_ms,
                    received_at_ms,
                };
                if let Err(e) = self.network.broadcast(pong) {
                    debug!("Pong not sent: {}", e);
                }
            }

            SyncMessage::Intent { tag, intent } => {
                self.client_seen(&from);
                let kind = intent.kind();

                // The tag names whose suppressor the echo satisfies
                if tag.client_id != from {
                    warn!(
                        "Rejecting {:?} from {}: tagged as {}",
                        kind, from, tag.client_id
                    );
                    self.emit(CoordinatorEvent::IntentRejected {
                        client_id: from,
                        kind,
                        reason: "intent tag names another client".to_string(),
                    });
                    return;
                }

                match self
                    .coordinator
                    .handle_intent(Some(tag), intent, current_time_ms())
                {
                    Ok(broadcast) => {
                        let sent = broadcast.is_some();
                        if let Some(msg) = broadcast {
                            if let Err(e) = self.network.broadcast(msg) {
                                warn!("Failed to broadcast {:?}: {}", kind, e);
                            }
                        }
                        self.emit(CoordinatorEvent::IntentApplied {
                            client_id: from,
                            kind,
                            broadcast: sent,
                            state: self.coordinator.state().clone(),
                        });
                    }
                    Err(e) => {
                        info!("Rejected {:?} from {}: {}", kind, from, e);
                        self.emit(CoordinatorEvent::IntentRejected {
                            client_id: from,
                            kind,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            other if other.is_from_coordinator() => {
                warn!(
                    "Another coordinator ({}) is publishing on this session; ignoring it",
                    from
                );
            }

            other => {
                debug!("Ignoring {:?} from {}", other, from);
            }
        }
    }

    fn client_seen(&mut self, client_id: &str) {
        if client_id == self.network.local_peer_id {
            return;
        }
        if self.clients.insert(client_id.to_string()) {
            info!("Client {} joined", client_id);
            self.emit(CoordinatorEvent::ClientJoined {
                client_id: client_id.to_string(),
            });
        }
    }

    fn send_bootstrap(&self, client_id: &str) {
        let snapshot = self.coordinator.bootstrap(client_id, current_time_ms());
        debug!("Bootstrapping {} at revision {:?}", client_id, snapshot.revision());
        if let Err(e) = self.network.broadcast(snapshot) {
            warn!("Failed to bootstrap {}: {}", client_id, e);
        }
    }
}
