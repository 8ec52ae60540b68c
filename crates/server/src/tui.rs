use std::collections::VecDeque;
use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use relay::{ConnectionId, ServerStats};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    started: Instant,
    max_clients: usize,
    log: VecDeque<(LogLevel, String)>,
    selected: usize,
    pending_kick: Option<ConnectionId>,
}

impl TuiState {
    pub fn new(max_clients: usize) -> Self {
        Self {
            started: Instant::now(),
            max_clients,
            log: VecDeque::new(),
            selected: 0,
            pending_kick: None,
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Error, message.into());
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, clients: usize) {
        if self.selected + 1 < clients {
            self.selected += 1;
        }
    }

    pub fn request_kick(&mut self, stats: &ServerStats) {
        self.pending_kick = stats.last_tick.get(self.selected).map(|r| r.conn);
    }

    pub fn take_pending_kick(&mut self) -> Option<ConnectionId> {
        self.pending_kick.take()
    }

    fn clamp_selection(&mut self, clients: usize) {
        self.selected = self.selected.min(clients.saturating_sub(1));
    }
}

pub fn render(frame: &mut Frame, state: &mut TuiState, stats: &ServerStats) {
    state.clamp_selection(stats.last_tick.len());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, stats);
    render_status(frame, chunks[1], state, stats);
    render_network(frame, chunks[2], stats);
    render_replication(frame, chunks[3], state, stats);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let uptime = format_duration(state.started.elapsed().as_secs());
    let title = format!(" Relay Server - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Frame: {}  |  Players: {}  |  Bodies: {} ({} dynamic)",
        stats.frame, stats.players, stats.world_bodies, stats.dynamic_bodies
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let max = state.max_clients.max(1);
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((stats.clients as f64 / max as f64).min(1.0))
        .label(format!("{}/{} clients", stats.clients, state.max_clients));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv / {} resent",
                    net.packets_sent, net.packets_received, net.packets_resent
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("RTT: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.1}ms (+/- {:.1}ms)", net.rtt_ms, net.rtt_variance),
                Style::default().fg(Color::White),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_replication(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let block = Block::default()
        .title(" Replication (last tick) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let mut lines = vec![Line::from(Span::styled(
        format!(
            "{:<10} {:<12} {:>7} {:>7} {:>7} {:>7}",
            "conn", "player", "bytes", "inputs", "avatars", "bodies"
        ),
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::BOLD),
    ))];

    for (i, report) in stats.last_tick.iter().enumerate() {
        let style = if i == state.selected {
            Style::default().fg(Color::Black).bg(Color::Magenta)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(Span::styled(
            format!(
                "{:<10} {:<12} {:>7} {:>7} {:>7} {:>7}",
                report.conn.to_string(),
                report.player.to_string(),
                report.bytes,
                report.inputs,
                report.avatars,
                report.bodies
            ),
            style,
        )));
    }

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.as_str(), Style::default().fg(color)))
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  |  Up/Down select client  |  k kick selected")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let mut state = TuiState::new(4);
        for i in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(|(_, m)| m.as_str()), Some("line 10"));
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_duration(3725), "01:02:05");
    }
}
