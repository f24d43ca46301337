use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::app::{Mode, UiApp};
use crate::push::ConnectionState;
use crate::sync::BadgeTone;

pub mod help;
pub mod modals;
pub mod preview;
pub mod sidebar;
pub mod state;

pub fn draw(frame: &mut Frame, app: &UiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);

    // Main layout: agent list | detail
    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(chunks[1]);

    sidebar::draw_sidebar(frame, app, panels[0]);
    preview::draw_preview(frame, app, panels[1]);
    help::draw_help_bar(frame, app, chunks[2]);

    match &app.mode {
        Mode::ConfirmDelete(agent_id) => modals::draw_confirm_delete(frame, agent_id),
        Mode::ConfirmDeleteAll => modals::draw_confirm_delete_all(frame, app.sync.len()),
        Mode::Create => modals::draw_create_form(frame, app),
        Mode::Review => modals::draw_review_form(frame, app),
        Mode::Models => modals::draw_models_form(frame, app),
        Mode::Browse | Mode::Search => {}
    }
}

pub(crate) fn tone_color(tone: BadgeTone) -> Color {
    match tone {
        BadgeTone::Neutral => Color::Gray,
        BadgeTone::Active => Color::Cyan,
        BadgeTone::Success => Color::Green,
        BadgeTone::Warning => Color::Yellow,
        BadgeTone::Danger => Color::Red,
        BadgeTone::Muted => Color::DarkGray,
    }
}

fn connection_style(state: ConnectionState) -> Style {
    match state {
        ConnectionState::Connected => Style::default().fg(Color::Green),
        ConnectionState::Connecting => Style::default().fg(Color::Yellow),
        ConnectionState::Disconnected => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ConnectionState::Disabled => Style::default().fg(Color::DarkGray),
    }
}

fn draw_header(frame: &mut Frame, app: &UiApp, area: Rect) {
    let mut spans = vec![Span::styled(
        " fleetwatch ",
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    if let Some(url) = &app.repository_url {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(url.clone(), Style::default().fg(Color::Cyan)));
    }
    let count = app.sync.len();
    spans.push(Span::styled(
        format!("  {count} agent{}", if count == 1 { "" } else { "s" }),
        Style::default().add_modifier(Modifier::DIM),
    ));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);

    let indicator = Line::from(Span::styled(
        format!("● {} ", app.connection.label()),
        connection_style(app.connection),
    ));
    frame.render_widget(
        Paragraph::new(indicator).alignment(Alignment::Right),
        area,
    );
}
