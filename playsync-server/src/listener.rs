//! Headless listener: joins a session with a simulated player
//!
//! Commands are read from stdin, one per line:
//! `play <track> [pos]`, `resume`, `pause`, `seek <pos>`, `next`, `prev`,
//! `status`.

use playsync_core::client::{
    ClientConfig, ClientObserver, ClientSession, ReconcilerState, SimulatedPlayer, SyncStatus,
    UserAction,
};
use playsync_core::network::{NetworkConfig, SessionCode};
use std::error::Error;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Logs what the session does
struct LogObserver;

impl ClientObserver for LogObserver {
    fn on_state_changed(&self, state: ReconcilerState) {
        info!("Sync state: {:?}", state);
    }

    fn on_track_changed(&self, track_id: Option<String>) {
        info!("Track: {}", track_id.as_deref().unwrap_or("(none)"));
    }

    fn on_connected(&self, coordinator_id: String) {
        info!("Connected to coordinator {}", coordinator_id);
    }

    fn on_disconnected(&self) {
        warn!("Lost the coordinator, resynchronising");
    }

    fn on_error(&self, message: String) {
        warn!("{}", message);
    }
}

/// Parsed stdin line
#[derive(Debug, PartialEq)]
enum Command {
    Action(UserAction),
    Status,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_lowercase();
    let position = |arg: Option<&str>| arg.and_then(|p| p.parse::<f64>().ok());

    let action = match verb.as_str() {
        "play" => {
            let track_id = parts.next()?.to_string();
            let at_position = position(parts.next()).unwrap_or(0.0);
            UserAction::Play {
                track_id,
                at_position,
            }
        }
        "resume" => UserAction::Resume,
        "pause" => UserAction::Pause,
        "seek" => UserAction::Seek(position(parts.next())?),
        "next" => UserAction::Next,
        "prev" | "previous" => UserAction::Previous,
        "status" => return Some(Command::Status),
        _ => return None,
    };
    Some(Command::Action(action))
}

fn describe(status: &SyncStatus) -> String {
    format!(
        "{:?} rev={:?} track={} drift={} rtt={}",
        status.state,
        status.revision,
        status.track_id.as_deref().unwrap_or("-"),
        status
            .drift
            .map(|d| format!("{:+.3}s", d))
            .unwrap_or_else(|| "-".to_string()),
        status
            .rtt_ms
            .map(|r| format!("{}ms", r))
            .unwrap_or_else(|| "-".to_string()),
    )
}

/// Join `code` and follow the coordinator until stdin closes or Ctrl-C
pub async fn run(code: &str) -> Result<(), Box<dyn Error>> {
    let session_code: SessionCode = code.parse()?;
    info!("Listening to session {}", session_code);

    let client = ClientSession::start(
        ClientConfig::new(session_code),
        NetworkConfig::from_env(0),
        Box::new(SimulatedPlayer::new()),
        Arc::new(LogObserver),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Some(Command::Action(action)) => {
                        if let Err(e) = client.perform(action).await {
                            warn!("{}", e);
                        }
                    }
                    Some(Command::Status) => info!("{}", describe(&client.status())),
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
        }
    }

    client.shutdown();
    Ok(())
}
