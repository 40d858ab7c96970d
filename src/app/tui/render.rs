use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Gauge, Padding, Paragraph, Wrap};

use super::super::episode::{format_clock, truncate};
use super::super::tracking::{SessionState, SessionView};

pub(super) fn draw_watch(
    frame: &mut Frame,
    view: Option<&SessionView>,
    media_url: &str,
    status: &str,
) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let (state_text, state_color) = match view.map(|view| view.state) {
        Some(state) => (state.label(), state_color(state)),
        None => ("closed", Color::Rgb(185, 195, 210)),
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "EPWATCH",
            Style::default()
                .fg(Color::Rgb(110, 170, 255))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            view.and_then(|view| view.show_title.as_deref())
                .map(|title| truncate(title, 48))
                .unwrap_or_else(|| "-".to_string()),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(state_text.to_uppercase(), Style::default().fg(state_color)),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Now Playing"));
    frame.render_widget(header, chunks[0]);

    let details = Paragraph::new(details_lines(view, media_url))
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .wrap(Wrap { trim: true })
        .block(panel_block("Episode"));
    frame.render_widget(details, chunks[1]);

    let (ratio, label) = view.map_or((0.0, "0:00 / 0:00".to_string()), |view| {
        (
            view.progress_ratio(),
            format!(
                "{} / {}",
                format_clock(view.position_seconds),
                format_clock(view.duration_seconds)
            ),
        )
    });
    let progress = Gauge::default()
        .block(panel_block("Progress"))
        .gauge_style(
            Style::default()
                .fg(Color::Rgb(130, 190, 255))
                .bg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .label(label)
        .ratio(ratio);
    frame.render_widget(progress, chunks[2]);

    let command_bar = Paragraph::new(controls_line(view))
        .alignment(Alignment::Center)
        .block(panel_block("Controls"));
    frame.render_widget(command_bar, chunks[3]);

    let status_widget = Paragraph::new(status.to_string())
        .style(status_style(status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[4]);

    let popup = view.and_then(|view| {
        view.failure
            .as_ref()
            .map(|failure| ("Playback Unavailable", failure.clone()))
            .or_else(|| {
                view.notice
                    .as_ref()
                    .map(|notice| ("Notice", format!("{notice}\n\nPress any key to continue.")))
            })
    });
    if let Some((title, message)) = popup {
        let popup_area = popup_rect_for_text(frame.area(), &message);
        render_popup_shadow(frame, popup_area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(message)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block(title));
        frame.render_widget(popup, popup_area);
    }
}

fn details_lines(view: Option<&SessionView>, media_url: &str) -> Vec<Line<'static>> {
    let Some(view) = view else {
        return vec![Line::from("No episode loaded.")];
    };
    let muted = Style::default().fg(Color::Rgb(185, 195, 210));

    let mut lines = vec![
        Line::from(Span::styled(
            view.episode_label
                .clone()
                .unwrap_or_else(|| view.episode_id.clone()),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(truncate(media_url, 72), muted)),
    ];
    if let Some((ordinal, total)) = view.episode_ordinal {
        lines.push(Line::from(Span::styled(
            format!("Episode {ordinal} of {total}"),
            muted,
        )));
    }
    lines.push(Line::from(""));

    let visible: Vec<&str> = view
        .skip_affordances
        .iter()
        .filter(|affordance| affordance.visible)
        .map(|affordance| affordance.name.as_str())
        .collect();
    if !visible.is_empty() {
        let mut spans = Vec::new();
        for name in visible {
            spans.push(Span::styled(format!(" SKIP {} ", name.to_uppercase()), pill_active()));
            spans.push(Span::raw(" "));
        }
        lines.push(Line::from(spans));
    }

    if let Some(remaining) = view.autoplay_remaining {
        let next = view.next_episode_label.clone().unwrap_or_default();
        lines.push(Line::from(Span::styled(
            format!(
                "Next episode in {}s: {}  (c to cancel)",
                remaining.as_secs_f64().ceil() as u64,
                truncate(&next, 48)
            ),
            Style::default().fg(Color::Yellow),
        )));
    } else if let Some(next) = &view.next_episode_label {
        lines.push(Line::from(Span::styled(
            format!("Up next: {}", truncate(next, 56)),
            muted,
        )));
    } else if view.state != SessionState::Failed {
        lines.push(Line::from(Span::styled("Last episode of the show.", muted)));
    }

    if let Some(confirmed) = view.last_confirmed {
        lines.push(Line::from(Span::styled(
            format!(
                "Saved at {}{}",
                format_clock(confirmed.position_seconds),
                if confirmed.completed { " (watched)" } else { "" }
            ),
            muted,
        )));
    }
    lines
}

fn controls_line(view: Option<&SessionView>) -> Line<'static> {
    let playing = view.is_some_and(|view| view.state == SessionState::Playing);
    let next_available = view.is_some_and(|view| view.next_episode_available);
    Line::from(vec![
        Span::styled(
            if playing { " PAUSE " } else { " PLAY " },
            pill_active(),
        ),
        Span::styled(" ", Style::default()),
        Span::styled(
            " NEXT ",
            if next_available {
                pill_active()
            } else {
                pill_inactive()
            },
        ),
        Span::styled(
            "   space play/pause  ←/→ seek 10s  i/r/s skip  n next  c cancel  q quit",
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
    ])
}

fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Playing => Color::Rgb(140, 220, 150),
        SessionState::Paused | SessionState::Ready => Color::Yellow,
        SessionState::Failed => Color::Rgb(255, 145, 120),
        SessionState::Initializing | SessionState::Ended => Color::Rgb(185, 195, 210),
    }
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(160, 190, 235))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn pill_active() -> Style {
    Style::default()
        .bg(Color::Rgb(110, 170, 255))
        .fg(Color::Black)
        .add_modifier(Modifier::BOLD)
}

fn pill_inactive() -> Style {
    Style::default()
        .bg(Color::Rgb(72, 82, 96))
        .fg(Color::Rgb(230, 235, 242))
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let max_line_width = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let width = max_line_width
        .saturating_add(12)
        .clamp(40.min(available_width), 72.min(available_width));

    let available_height = area.height.saturating_sub(2).max(1);
    let height = line_count
        .saturating_add(6)
        .clamp(7.min(available_height), 16.min(available_height));

    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}
