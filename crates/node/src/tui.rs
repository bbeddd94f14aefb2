use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

use lockstep::LevelStartStatus;

use crate::node::NodeStatus;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    logs: VecDeque<(LogLevel, String)>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            logs: VecDeque::with_capacity(MAX_LOG_LINES),
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, status: &NodeStatus) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], status);
    render_network(frame, chunks[1], status);
    render_players(frame, chunks[2], status);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, status: &NodeStatus) {
    let title = format!(
        " Lockstep Node {} - {} - Uptime: {} ",
        status.slot,
        status.map,
        format_duration(status.uptime_secs)
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let (level_text, level_color) = match status.level_status {
        _ if !status.started => ("starting".to_string(), Color::Yellow),
        LevelStartStatus::Waiting => ("waiting".to_string(), Color::Yellow),
        LevelStartStatus::Host => (format!("host +{}", status.level_delay), Color::Yellow),
        LevelStartStatus::Ready if status.level_delay > 0 => {
            (format!("ready +{}", status.level_delay), Color::Yellow)
        }
        LevelStartStatus::Ready => ("ready".to_string(), Color::Green),
    };

    let line = Line::from(vec![
        Span::raw(format!(
            "Tic: {}  |  Built: {}  |  Level: {}  |  Lobby: {}  |  {:?}, arbitrator {}  |  ",
            status.gametic, status.client_tic, status.level, status.lobby, status.role, status.arbitrator
        )),
        Span::styled(level_text, Style::default().fg(level_color)),
    ]);

    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn render_network(frame: &mut Frame, area: Rect, status: &NodeStatus) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &status.network;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv / {} dropped / {} rejected",
                    net.packets_sent, net.packets_received, net.packets_dropped, net.packets_rejected
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
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_players(frame: &mut Frame, area: Rect, status: &NodeStatus) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let header = Row::new(["Slot", "Address", "Sequence", "Ack", "Ping", "Position", "Sync"])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = status.players.iter().map(|p| {
        let me = p.slot == status.slot;
        let (sync, sync_color) = if p.inconsistent {
            ("DESYNC", Color::Red)
        } else {
            ("ok", Color::Green)
        };
        let slot = if me {
            format!("{} (you)", p.slot)
        } else {
            p.slot.to_string()
        };
        let ping = if me {
            "-".to_string()
        } else {
            format!("{}ms", p.latency_ms)
        };
        Row::new(vec![
            Span::raw(slot),
            Span::raw(p.addr.map_or_else(|| "-".to_string(), |a| a.to_string())),
            Span::raw(p.sequence.to_string()),
            Span::raw(p.ack.to_string()),
            Span::raw(ping),
            Span::raw(format!("{}, {}", p.position.x, p.position.y)),
            Span::styled(sync, Style::default().fg(sync_color)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(22),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(16),
            Constraint::Min(6),
        ],
    )
    .header(header)
    .block(block);

    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(state.logs.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.clone(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Arrows move  |  Space to wander  |  'q' or ESC to quit")
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
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
