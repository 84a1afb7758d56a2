//! libp2p Network Behaviour
//!
//! Carries [`SyncMessage`]s between the coordinator and its clients:
//! - gossipsub topic per session (signed messages)
//! - mDNS for local network discovery
//! - TCP + QUIC transports, plus explicit dialing for routed setups
//! - identify to keep non-playsync peers off the mesh

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping, swarm::NetworkBehaviour, swarm::SwarmEvent,
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::SessionCode;
use crate::sync::{current_time_ms, SyncMessage};

/// Identify protocol version advertised by every playsync node
const PROTOCOL_VERSION: &str = "/playsync/1.0.0";

/// Prefix a peer's identify version must carry to stay connected
const PROTOCOL_PREFIX: &str = "/playsync/";

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP listen port (0 = ephemeral)
    pub tcp_port: u16,
    /// QUIC listen port (0 = ephemeral)
    pub quic_port: u16,
    /// Multiaddrs dialed at startup (coordinator address when mDNS can't reach it)
    pub dial_addrs: Vec<String>,
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
    /// Where to persist the node identity; `None` generates a fresh one per run
    pub keypair_path: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: 0,
            quic_port: 0,
            dial_addrs: Vec::new(),
            enable_mdns: true,
            keypair_path: None,
        }
    }
}

impl NetworkConfig {
    /// Read `TCP_PORT`, `QUIC_PORT`, `PLAYSYNC_DIAL` and `KEYPAIR_PATH`,
    /// falling back to `default_port` for unset ports
    pub fn from_env(default_port: u16) -> Self {
        let port = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port)
        };
        let dial_addrs = std::env::var("PLAYSYNC_DIAL")
            .map(|v| parse_dial_list(&v))
            .unwrap_or_default();

        Self {
            tcp_port: port("TCP_PORT"),
            quic_port: port("QUIC_PORT"),
            dial_addrs,
            enable_mdns: true,
            keypair_path: std::env::var("KEYPAIR_PATH").ok().map(PathBuf::from),
        }
    }
}

fn parse_dial_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Failed to load keypair from {path}: {reason}")]
    Keypair { path: PathBuf, reason: String },

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Not in a session")]
    NotInSession,

    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Network task closed")]
    Closed,
}

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct PlaysyncBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// mDNS for local network discovery
    mdns: libp2p::swarm::behaviour::toggle::Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    identify: identify::Behaviour,
    /// Pub/sub for session messages
    gossipsub: gossipsub::Behaviour,
}

/// Events emitted by the network manager
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Network is ready (listening)
    Ready { peer_id: String },
    /// A new listen address is available
    Listening { address: String },
    /// Received a sync message
    Message {
        /// Originating peer
        from: String,
        message: SyncMessage,
        /// Local wall clock when the message was received
        received_at_ms: u64,
    },
    /// A peer subscribed to our session topic
    PeerSubscribed { peer_id: String },
    /// A peer unsubscribed from our session topic
    PeerUnsubscribed { peer_id: String },
    /// Error occurred
    Error(String),
}

/// Commands sent to the network manager
#[derive(Debug)]
pub enum NetworkCommand {
    /// Subscribe to a session's topic
    JoinSession { code: SessionCode },
    /// Leave the current session
    LeaveSession,
    /// Publish a message to the session
    Broadcast { message: SyncMessage },
    /// Dial a peer directly by multiaddr
    DialPeer { multiaddr: String },
    /// Shutdown the network
    Shutdown,
}

/// Handle to communicate with the running network
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    /// Handle not backed by a swarm; commands arrive on the returned receiver
    pub fn channel(
        local_peer_id: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            command_tx,
            local_peer_id: local_peer_id.into(),
        };
        (handle, command_rx)
    }

    fn send(&self, command: NetworkCommand) -> Result<(), NetworkError> {
        self.command_tx
            .send(command)
            .map_err(|_| NetworkError::Closed)
    }

    pub fn join_session(&self, code: &SessionCode) -> Result<(), NetworkError> {
        self.send(NetworkCommand::JoinSession { code: code.clone() })
    }

    pub fn leave_session(&self) -> Result<(), NetworkError> {
        self.send(NetworkCommand::LeaveSession)
    }

    pub fn broadcast(&self, message: SyncMessage) -> Result<(), NetworkError> {
        self.send(NetworkCommand::Broadcast { message })
    }

    pub fn dial_peer(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.send(NetworkCommand::DialPeer {
            multiaddr: multiaddr.to_string(),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    /// Our local peer ID
    local_peer_id: PeerId,
    /// Our keypair
    keypair: identity::Keypair,
    /// Network configuration
    config: NetworkConfig,
    /// Current session topic (if joined)
    session_topic: Option<gossipsub::IdentTopic>,
    /// Peers subscribed to our session topic
    session_peers: HashSet<PeerId>,
    /// Peers that identified as playsync nodes
    verified_peers: HashSet<PeerId>,
}

impl NetworkManager {
    /// Create a new network manager with default config
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Result<Self, NetworkError> {
        let keypair = match &config.keypair_path {
            Some(path) => load_or_create_keypair(path)?,
            None => identity::Keypair::generate_ed25519(),
        };
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);
        info!(
            "Network config: TCP:{} QUIC:{} mDNS:{} dial:{}",
            config.tcp_port,
            config.quic_port,
            config.enable_mdns,
            config.dial_addrs.len()
        );

        Ok(Self {
            local_peer_id,
            keypair,
            config,
            session_topic: None,
            session_peers: HashSet::new(),
            verified_peers: HashSet::new(),
        })
    }

    /// Get our local peer ID
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Start the network and return a handle for communication
    pub fn start(
        self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>), NetworkError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        let swarm = self.create_swarm()?;

        tokio::spawn(async move {
            let error_tx = event_tx.clone();
            if let Err(e) = self.run(swarm, event_tx, command_rx).await {
                warn!("Network task error: {}", e);
                let _ = error_tx.send(NetworkEvent::Error(e.to_string()));
            }
        });

        Ok((handle, event_rx))
    }

    /// Create the libp2p swarm
    fn create_swarm(&self) -> Result<Swarm<PlaysyncBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| {
                // Ping for keep-alive (every 15 seconds)
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                // Gossipsub config - tuned for small networks
                // Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(3)
                    .mesh_n_high(6)
                    .gossip_lazy(3)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    PROTOCOL_VERSION.into(),
                    keypair.public(),
                ));

                Ok(PlaysyncBehaviour {
                    ping,
                    mdns: mdns.into(),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    fn listen(&self, swarm: &mut Swarm<PlaysyncBehaviour>) -> Result<(), NetworkError> {
        let tcp_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", self.config.tcp_port)
            .parse()
            .map_err(|e: libp2p::multiaddr::Error| NetworkError::Transport(e.to_string()))?;
        let quic_addr: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", self.config.quic_port)
            .parse()
            .map_err(|e: libp2p::multiaddr::Error| NetworkError::Transport(e.to_string()))?;

        swarm
            .listen_on(tcp_addr)
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        // QUIC is optional: TCP alone is enough to join the mesh
        if let Err(e) = swarm.listen_on(quic_addr) {
            warn!("Failed to listen on QUIC: {}", e);
        }
        Ok(())
    }

    /// Run the network event loop
    async fn run(
        mut self,
        mut swarm: Swarm<PlaysyncBehaviour>,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        self.listen(&mut swarm)?;

        for addr in self.config.dial_addrs.clone() {
            self.dial(&mut swarm, &addr);
        }

        let _ = event_tx.send(NetworkEvent::Ready {
            peer_id: self.local_peer_id.to_string(),
        });

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("All network handles dropped, shutting down");
                        break;
                    };
                    match cmd {
                        NetworkCommand::JoinSession { code } => {
                            if let Err(e) = self.join_session(&mut swarm, &code) {
                                let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
                            }
                        }
                        NetworkCommand::LeaveSession => {
                            self.leave_session(&mut swarm);
                        }
                        NetworkCommand::Broadcast { message } => {
                            if let Err(e) = self.broadcast(&mut swarm, &message) {
                                debug!("Broadcast error (may be no peers yet): {}", e);
                            }
                        }
                        NetworkCommand::DialPeer { multiaddr } => {
                            self.dial(&mut swarm, &multiaddr);
                        }
                        NetworkCommand::Shutdown => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn dial(&self, swarm: &mut Swarm<PlaysyncBehaviour>, multiaddr: &str) {
        match multiaddr.parse::<Multiaddr>() {
            Ok(addr) => {
                info!("Dialing peer at {}", addr);
                if let Err(e) = swarm.dial(addr) {
                    warn!("Failed to dial peer: {}", e);
                }
            }
            Err(e) => {
                warn!("{}: {}", NetworkError::InvalidAddress(multiaddr.to_string()), e);
            }
        }
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<PlaysyncBehaviour>,
        event: SwarmEvent<PlaysyncBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let full_addr = format!("{}/p2p/{}", address, self.local_peer_id);
                info!("Listening on {}", full_addr);
                let _ = event_tx.send(NetworkEvent::Listening { address: full_addr });
            }

            // mDNS discovered peers (local network)
            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id == self.local_peer_id {
                        continue;
                    }
                    debug!("mDNS discovered peer: {} at {}", peer_id, addr);
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    if swarm.dial(addr).is_ok() {
                        debug!("Dialing discovered peer {}", peer_id);
                    }
                }
            }

            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }

            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Gossipsub(
                gossipsub::Event::Message {
                    propagation_source,
                    message,
                    ..
                },
            )) => {
                let received_at_ms = current_time_ms();
                // Signed messages name their originator; relayed ones arrive via a mesh peer
                let from = message.source.unwrap_or(propagation_source);
                match serde_json::from_slice::<SyncMessage>(&message.data) {
                    Ok(sync_msg) => {
                        debug!("Received message from {}: {:?}", from, sync_msg);
                        let _ = event_tx.send(NetworkEvent::Message {
                            from: from.to_string(),
                            message: sync_msg,
                            received_at_ms,
                        });
                    }
                    Err(e) => {
                        debug!("Dropping undecodable message from {}: {}", from, e);
                    }
                }
            }

            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if self.is_session_topic(&topic) && self.session_peers.insert(peer_id) {
                    info!("Peer {} subscribed to session", peer_id);
                    let _ = event_tx.send(NetworkEvent::PeerSubscribed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.is_session_topic(&topic) {
                    self.peer_left_session(peer_id, event_tx);
                }
            }

            SwarmEvent::Behaviour(PlaysyncBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                if self.verified_peers.contains(&peer_id) {
                    return;
                }
                if info.protocol_version.starts_with(PROTOCOL_PREFIX) {
                    debug!("Identified playsync peer {} ({})", peer_id, info.protocol_version);
                    self.verified_peers.insert(peer_id);
                } else {
                    warn!(
                        "Disconnecting non-playsync peer {} ({})",
                        peer_id, info.protocol_version
                    );
                    swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                    let _ = swarm.disconnect_peer_id(peer_id);
                }
            }

            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 {
                    self.verified_peers.remove(&peer_id);
                    self.peer_left_session(peer_id, event_tx);
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(peer) = peer_id {
                    warn!("Failed to connect to {}: {}", peer, error);
                } else {
                    warn!("Outgoing connection error: {}", error);
                }
            }

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    fn is_session_topic(&self, topic: &gossipsub::TopicHash) -> bool {
        self.session_topic
            .as_ref()
            .is_some_and(|ours| *topic == ours.hash())
    }

    fn peer_left_session(&mut self, peer_id: PeerId, event_tx: &mpsc::UnboundedSender<NetworkEvent>) {
        if self.session_peers.remove(&peer_id) {
            info!("Peer {} left session", peer_id);
            let _ = event_tx.send(NetworkEvent::PeerUnsubscribed {
                peer_id: peer_id.to_string(),
            });
        }
    }

    /// Subscribe to a session's topic
    fn join_session(
        &mut self,
        swarm: &mut Swarm<PlaysyncBehaviour>,
        code: &SessionCode,
    ) -> Result<(), NetworkError> {
        if self.session_topic.is_some() {
            return Err(NetworkError::AlreadyInSession);
        }

        let topic = gossipsub::IdentTopic::new(code.topic());
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        info!("Joined session {}", code);
        self.session_topic = Some(topic);
        self.session_peers.clear();
        Ok(())
    }

    /// Leave the current session
    fn leave_session(&mut self, swarm: &mut Swarm<PlaysyncBehaviour>) {
        if let Some(topic) = self.session_topic.take() {
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            info!("Left session");
        }
        self.session_peers.clear();
    }

    /// Publish a message to the session
    fn broadcast(
        &self,
        swarm: &mut Swarm<PlaysyncBehaviour>,
        message: &SyncMessage,
    ) -> Result<(), NetworkError> {
        let topic = self.session_topic.as_ref().ok_or(NetworkError::NotInSession)?;

        let data = serde_json::to_vec(message).map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), data)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        Ok(())
    }
}

/// Load an existing keypair or generate and persist a new one
fn load_or_create_keypair(path: &Path) -> Result<identity::Keypair, NetworkError> {
    let keypair_err = |reason: String| NetworkError::Keypair {
        path: path.to_path_buf(),
        reason,
    };

    if path.exists() {
        let bytes = fs::read(path).map_err(|e| keypair_err(e.to_string()))?;
        let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| keypair_err(e.to_string()))?;
        info!("Loaded existing keypair from {}", path.display());
        Ok(keypair)
    } else {
        let keypair = identity::Keypair::generate_ed25519();
        let bytes = keypair
            .to_protobuf_encoding()
            .map_err(|e| keypair_err(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| keypair_err(e.to_string()))?;
        }
        fs::write(path, bytes).map_err(|e| keypair_err(e.to_string()))?;
        info!("Generated new keypair, saved to {}", path.display());
        Ok(keypair)
    }
}
