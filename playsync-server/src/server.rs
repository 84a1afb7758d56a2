//! Coordinator process: transport, coordinator service and metrics wiring

use crate::metrics::{LogLevel, ServerMetrics, ServerStatus};
use parking_lot::RwLock;
use playsync_core::catalog::Playlist;
use playsync_core::coordinator::{CoordinatorConfig, CoordinatorService};
use playsync_core::network::{NetworkConfig, NetworkManager};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Default listen port for TCP and QUIC
pub const DEFAULT_PORT: u16 = 4001;

/// Default keypair file name
const KEYPAIR_FILE: &str = "keypair.bin";

/// Keypair next to the executable, or in the current dir
fn default_keypair_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(KEYPAIR_FILE)
}

/// Run the coordinator until `shutdown` fires
pub async fn run(
    metrics: Arc<RwLock<ServerMetrics>>,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), Box<dyn Error>> {
    let config = CoordinatorConfig::from_env()?;
    let mut network_config = NetworkConfig::from_env(DEFAULT_PORT);
    network_config
        .keypair_path
        .get_or_insert_with(default_keypair_path);

    info!("playsync coordinator starting...");
    {
        let mut m = metrics.write();
        m.tcp_port = network_config.tcp_port;
        m.quic_port = network_config.quic_port;
        m.session_code = Some(config.session_code.to_string());
    }

    // Initial catalog; later refreshes happen inside the service
    let playlist = match config.catalog.load().await {
        Ok(playlist) => {
            info!("Loaded {} tracks from {}", playlist.len(), config.catalog);
            let mut m = metrics.write();
            m.catalog_tracks = playlist.len();
            m.log(
                LogLevel::Info,
                format!("Catalog: {} tracks from {}", playlist.len(), config.catalog),
            );
            playlist
        }
        Err(e) => {
            warn!("Could not load catalog from {}: {}", config.catalog, e);
            metrics
                .write()
                .log(LogLevel::Warning, format!("Catalog unavailable: {}", e));
            Playlist::default()
        }
    };

    let manager = match NetworkManager::with_config(network_config) {
        Ok(manager) => manager,
        Err(e) => {
            let mut m = metrics.write();
            m.status = ServerStatus::Error;
            m.log(LogLevel::Error, format!("Network setup failed: {}", e));
            return Err(e.into());
        }
    };
    let (handle, network_rx) = manager.start()?;
    {
        let mut m = metrics.write();
        m.peer_id = Some(handle.local_peer_id.clone());
        m.log(LogLevel::Info, format!("Peer ID: {}", handle.local_peer_id));
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let service = CoordinatorService::new(config, Box::new(playlist), handle.clone())
        .with_observer(event_tx);
    let service_task = tokio::spawn(service.run(network_rx, shutdown));

    // Ends once the service drops its observer
    while let Some(event) = event_rx.recv().await {
        metrics.write().record(event);
    }

    let result = service_task.await;
    handle.shutdown();

    let mut m = metrics.write();
    match result {
        Ok(Ok(())) => {
            m.status = ServerStatus::Stopped;
            m.log(LogLevel::Info, "Coordinator stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            m.status = ServerStatus::Error;
            m.log(LogLevel::Error, format!("Coordinator failed: {}", e));
            Err(e.into())
        }
        Err(e) => {
            m.status = ServerStatus::Error;
            Err(e.into())
        }
    }
}

/// Initialize tracing for plain logging mode
pub fn init_logging() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playsync_server=info".parse()?)
                .add_directive("playsync_core=info".parse()?)
                .add_directive("libp2p_gossipsub=warn".parse()?)
                .add_directive("libp2p_mdns=info".parse()?),
        )
        .init();
    Ok(())
}

/// Run with plain logging (no dashboard) until Ctrl-C
pub async fn run_with_logging(metrics: Arc<RwLock<ServerMetrics>>) -> Result<(), Box<dyn Error>> {
    init_logging()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        let _ = shutdown_tx.send(());
    });

    run(metrics, shutdown_rx).await
}
