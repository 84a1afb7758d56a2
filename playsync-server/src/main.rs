//! playsync - Coordinator Server
//!
//! Runs the authoritative coordinator for one session, with a terminal dashboard.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --no-dashboard       # Plain logging mode
//!   cargo run --release -- --listen ABCD-EFGH   # Headless listener with a simulated player

mod dashboard;
mod listener;
mod metrics;
mod server;

use std::sync::Arc;
use parking_lot::RwLock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if let Some(idx) = args.iter().position(|a| a == "--listen") {
        let code = args.get(idx + 1).ok_or("--listen needs a session code")?;
        server::init_logging()?;
        return listener::run(code).await;
    }

    let use_dashboard = !args.contains(&"--no-dashboard".to_string());

    // Shared metrics state
    let metrics = Arc::new(RwLock::new(metrics::ServerMetrics::new()));

    if use_dashboard {
        dashboard::run(metrics).await
    } else {
        server::run_with_logging(metrics).await
    }
}
