//! Terminal dashboard for the coordinator server

use crate::metrics::{format_position, truncate_peer_id, LogLevel, ServerMetrics, ServerStatus};
use crate::server;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Dashboard state for scrolling etc.
struct DashboardState {
    /// Log scroll position (0 = most recent at bottom)
    log_scroll: usize,
    /// Whether auto-scroll is enabled (follows new logs)
    auto_scroll: bool,
    /// Log count at the last frame
    seen_logs: usize,
}

/// Run the dashboard
pub async fn run(metrics: Arc<RwLock<ServerMetrics>>) -> Result<(), Box<dyn std::error::Error>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Start the coordinator in background
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let metrics_for_server = Arc::clone(&metrics);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::run(Arc::clone(&metrics_for_server), shutdown_rx).await {
            let mut m = metrics_for_server.write();
            m.status = ServerStatus::Error;
            m.log(LogLevel::Error, format!("Server error: {}", e));
        }
    });

    let mut state = DashboardState {
        log_scroll: 0,
        auto_scroll: true,
        seen_logs: 0,
    };

    // Main loop
    let tick_rate = Duration::from_millis(100);
    let mut should_quit = false;

    while !should_quit {
        // New entries came in, scroll to bottom if auto-scroll enabled
        let log_count = metrics.read().logs.len();
        if log_count != state.seen_logs {
            state.seen_logs = log_count;
            if state.auto_scroll {
                state.log_scroll = 0;
            }
        }

        terminal.draw(|f| draw(f, &metrics, &state))?;

        // Handle input
        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => should_quit = true,
                        KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                            should_quit = true
                        }
                        code => handle_scroll_key(&mut state, code, log_count),
                    }
                }
            }
        }
    }

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(2), server_task).await;

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

fn handle_scroll_key(state: &mut DashboardState, code: KeyCode, log_count: usize) {
    match code {
        // Scroll up (older logs)
        KeyCode::Up | KeyCode::Char('k') => {
            if log_count > 0 {
                state.log_scroll = (state.log_scroll + 1).min(log_count.saturating_sub(1));
                state.auto_scroll = false;
            }
        }
        // Scroll down (newer logs)
        KeyCode::Down | KeyCode::Char('j') => {
            state.log_scroll = state.log_scroll.saturating_sub(1);
            if state.log_scroll == 0 {
                state.auto_scroll = true;
            }
        }
        KeyCode::PageUp => {
            if log_count > 0 {
                state.log_scroll = (state.log_scroll + 10).min(log_count.saturating_sub(1));
                state.auto_scroll = false;
            }
        }
        KeyCode::PageDown => {
            state.log_scroll = state.log_scroll.saturating_sub(10);
            if state.log_scroll == 0 {
                state.auto_scroll = true;
            }
        }
        // Home - oldest logs
        KeyCode::Home => {
            if log_count > 0 {
                state.log_scroll = log_count.saturating_sub(1);
                state.auto_scroll = false;
            }
        }
        // End - newest logs (enable auto-scroll)
        KeyCode::End => {
            state.log_scroll = 0;
            state.auto_scroll = true;
        }
        KeyCode::Char('a') => {
            state.auto_scroll = !state.auto_scroll;
            if state.auto_scroll {
                state.log_scroll = 0;
            }
        }
        _ => {}
    }
}

/// Draw the dashboard
fn draw(f: &mut Frame, metrics: &Arc<RwLock<ServerMetrics>>, state: &DashboardState) {
    let m = metrics.read();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(9),  // Panels
            Constraint::Min(10),    // Logs
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], &m);
    draw_panels(f, chunks[1], &m);
    draw_logs(f, chunks[2], &m, state);
    draw_footer(f, chunks[3], state);
}

fn draw_header(f: &mut Frame, area: Rect, m: &ServerMetrics) {
    let (status_text, status_color) = match m.status {
        ServerStatus::Starting => ("STARTING", Color::Yellow),
        ServerStatus::Running => ("RUNNING", Color::Green),
        ServerStatus::Stopped => ("STOPPED", Color::DarkGray),
        ServerStatus::Error => ("ERROR", Color::Red),
    };

    let title = vec![Line::from(vec![
        Span::styled("playsync coordinator", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  │  Status: "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  Session: "),
        Span::styled(
            m.session_code.clone().unwrap_or_else(|| "...".to_string()),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  │  Uptime: "),
        Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
    ])];

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_panels(f: &mut Frame, area: Rect, m: &ServerMetrics) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(area);

    draw_server(f, chunks[0], m);
    draw_clients(f, chunks[1], m);
    draw_playback(f, chunks[2], m);
}

fn draw_server(f: &mut Frame, area: Rect, m: &ServerMetrics) {
    let peer_id_short = m.peer_id.as_deref()
        .map(truncate_peer_id)
        .unwrap_or_else(|| "...".to_string());

    let server_info = vec![
        Line::from(vec![
            Span::raw("Peer ID: "),
            Span::styled(peer_id_short, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Ports: "),
            Span::styled(format!("TCP:{} QUIC:{}", m.tcp_port, m.quic_port), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Listening: "),
            Span::styled(m.listen_addrs.len().to_string(), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Catalog: "),
            Span::styled(format!("{} tracks", m.catalog_tracks), Style::default().fg(Color::Magenta)),
        ]),
        Line::from(vec![
            Span::raw("Heartbeats: "),
            Span::styled(m.heartbeats.to_string(), Style::default().fg(Color::White)),
        ]),
    ];

    let server_block = Paragraph::new(server_info)
        .block(Block::default().borders(Borders::ALL).title(" Server "));
    f.render_widget(server_block, area);
}

fn draw_clients(f: &mut Frame, area: Rect, m: &ServerMetrics) {
    let mut lines = vec![Line::from(vec![
        Span::raw("Active: "),
        Span::styled(
            m.connected_clients.to_string(),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  Total: "),
        Span::styled(m.total_clients.to_string(), Style::default().fg(Color::White)),
        Span::raw("  Peak: "),
        Span::styled(m.peak_clients.to_string(), Style::default().fg(Color::Magenta)),
    ])];

    let room = area.height.saturating_sub(3) as usize;
    for client in m.client_list.iter().take(room) {
        lines.push(Line::from(vec![
            Span::styled(truncate_peer_id(&client.client_id), Style::default().fg(Color::Yellow)),
            Span::styled(
                format!(" since {}", client.joined_at.format("%H:%M:%S")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw(format!("  {} intents", client.intents)),
        ]));
    }

    let clients_block = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Clients "));
    f.render_widget(clients_block, area);
}

fn draw_playback(f: &mut Frame, area: Rect, m: &ServerMetrics) {
    let (track, state_text, state_color, revision) = match &m.playback {
        Some(p) => (
            p.track_id.clone().unwrap_or_else(|| "(none)".to_string()),
            if p.is_playing { "PLAYING" } else { "PAUSED" },
            if p.is_playing { Color::Green } else { Color::Yellow },
            p.revision.to_string(),
        ),
        None => ("(none)".to_string(), "IDLE", Color::DarkGray, "-".to_string()),
    };

    let position = match (m.current_position(), m.playback.as_ref().and_then(|p| p.duration)) {
        (Some(pos), Some(duration)) => format!("{} / {}", format_position(pos), format_position(duration)),
        (Some(pos), None) => format_position(pos),
        (None, _) => "-".to_string(),
    };

    let playback_info = vec![
        Line::from(vec![
            Span::raw("Track: "),
            Span::styled(track, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![
            Span::raw("State: "),
            Span::styled(state_text, Style::default().fg(state_color)),
            Span::raw("  Rev: "),
            Span::styled(revision, Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Position: "),
            Span::styled(position, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Intents: "),
            Span::styled(m.intents_accepted.to_string(), Style::default().fg(Color::Green)),
            Span::raw(" ok / "),
            Span::styled(m.intents_rejected.to_string(), Style::default().fg(Color::Red)),
            Span::raw(" rejected"),
        ]),
        Line::from(vec![
            Span::raw("Broadcasts: "),
            Span::styled(m.broadcasts.to_string(), Style::default().fg(Color::Magenta)),
        ]),
    ];

    let playback_block = Paragraph::new(playback_info)
        .block(Block::default().borders(Borders::ALL).title(" Playback "));
    f.render_widget(playback_block, area);
}

fn draw_logs(f: &mut Frame, area: Rect, m: &ServerMetrics, state: &DashboardState) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total_logs = m.logs.len();

    let log_items: Vec<ListItem> = m.logs
        .iter()
        .rev()
        .skip(state.log_scroll)
        .take(visible_height)
        .map(|entry| {
            let level_style = match entry.level {
                LogLevel::Info => Style::default().fg(Color::Blue),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Error => Style::default().fg(Color::Red),
                LogLevel::Client => Style::default().fg(Color::Green),
                LogLevel::Sync => Style::default().fg(Color::Magenta),
            };

            let time = entry.timestamp.format("%H:%M:%S").to_string();

            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", time), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("[{}] ", entry.level.as_str()), level_style),
                Span::raw(&entry.message),
            ]))
        })
        .collect();

    let scroll_indicator = if state.auto_scroll {
        " [AUTO] ".to_string()
    } else if total_logs > 0 {
        format!(" [{}/{}] ", total_logs - state.log_scroll, total_logs)
    } else {
        String::new()
    };

    let logs = List::new(log_items)
        .block(Block::default().borders(Borders::ALL).title(format!(" Activity Log{}", scroll_indicator)));

    f.render_widget(logs, area);

    if total_logs > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));

        let mut scrollbar_state = ScrollbarState::new(total_logs)
            .position(total_logs.saturating_sub(state.log_scroll + visible_height));

        f.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin { vertical: 1, horizontal: 0 }),
            &mut scrollbar_state,
        );
    }
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let auto_text = if state.auto_scroll { "ON " } else { "OFF" };
    let auto_color = if state.auto_scroll { Color::Green } else { Color::Yellow };
    let key = Style::default().fg(Color::Black).bg(Color::White);

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Q ", key),
        Span::raw(" Quit  "),
        Span::styled(" ↑↓ ", key),
        Span::raw(" Scroll  "),
        Span::styled(" PgUp/Dn ", key),
        Span::raw(" Page  "),
        Span::styled(" Home/End ", key),
        Span::raw(" Oldest/Newest  "),
        Span::styled(" A ", key),
        Span::raw(" Auto-scroll: "),
        Span::styled(auto_text, Style::default().fg(auto_color)),
    ]));

    f.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DashboardState {
        DashboardState {
            log_scroll: 0,
            auto_scroll: true,
            seen_logs: 0,
        }
    }

    #[test]
    fn test_scrolling_up_disables_auto_scroll() {
        let mut s = state();
        handle_scroll_key(&mut s, KeyCode::Up, 50);
        assert_eq!(s.log_scroll, 1);
        assert!(!s.auto_scroll);

        handle_scroll_key(&mut s, KeyCode::Char('j'), 50);
        assert_eq!(s.log_scroll, 0);
        assert!(s.auto_scroll);
    }

    #[test]
    fn test_scroll_is_bounded_by_log_count() {
        let mut s = state();
        handle_scroll_key(&mut s, KeyCode::PageUp, 5);
        assert_eq!(s.log_scroll, 4);
        handle_scroll_key(&mut s, KeyCode::Home, 5);
        assert_eq!(s.log_scroll, 4);
        handle_scroll_key(&mut s, KeyCode::End, 5);
        assert_eq!(s.log_scroll, 0);
        assert!(s.auto_scroll);

        // Nothing to scroll
        handle_scroll_key(&mut s, KeyCode::Up, 0);
        assert_eq!(s.log_scroll, 0);
    }

    #[test]
    fn test_toggle_auto_scroll() {
        let mut s = state();
        handle_scroll_key(&mut s, KeyCode::Char('a'), 10);
        assert!(!s.auto_scroll);
        handle_scroll_key(&mut s, KeyCode::Char('a'), 10);
        assert!(s.auto_scroll);
        assert_eq!(s.log_scroll, 0);
    }
}
