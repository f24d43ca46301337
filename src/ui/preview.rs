use ansi_to_tui::IntoText;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Borders, Gauge, Paragraph, Wrap},
    Frame,
};

use crate::app::UiApp;
use crate::sync::{AgentCard, EffectKind, ScrollPanel};
use crate::text::{format_timestamp, split_fenced, Language};

use super::tone_color;

pub fn draw_preview(frame: &mut Frame, app: &UiApp, area: Rect) {
    let Some(card) = app.selected_card() else {
        app.output_area.set(Rect::default());
        app.trace_area.set(Rect::default());
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Agent ")
            .border_style(Style::default().fg(Color::Cyan));
        let hint = Paragraph::new("Select an agent to see its progress.")
            .style(Style::default().add_modifier(Modifier::DIM))
            .block(block);
        frame.render_widget(hint, area);
        return;
    };

    let gauge_height = if card.clone_percent.is_some() || card.clone_error.is_some() {
        3
    } else {
        0
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(gauge_height),
            Constraint::Min(3),
        ])
        .split(area);

    draw_summary(frame, app, card, chunks[0]);
    if gauge_height > 0 {
        draw_clone_gauge(frame, card, chunks[1]);
    }

    let (output_area, trace_area) = if app.show_trace {
        let split = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[2]);
        (split[0], split[1])
    } else {
        (chunks[2], Rect::default())
    };

    app.output_area.set(output_area);
    app.trace_area.set(trace_area);

    let flashing = app.has_effect(&card.id, EffectKind::OutputFlash);
    let output_border = if flashing {
        Style::default()
            .fg(Color::LightGreen)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Cyan)
    };
    draw_panel(
        frame,
        " Output ",
        &card.output,
        output_text(card.output.text()),
        output_border,
        output_area,
    );

    if app.show_trace {
        let trace = if card.trace.text().is_empty() {
            Text::from(Line::styled(
                "No reasoning history yet.",
                Style::default().add_modifier(Modifier::DIM),
            ))
        } else {
            Text::raw(card.trace.text().to_string())
        };
        draw_panel(
            frame,
            " Trace ",
            &card.trace,
            trace,
            Style::default().fg(Color::Magenta),
            trace_area,
        );
    }
}

fn field_line(label: &'static str, value: &str) -> Line<'static> {
    let shown = if value.trim().is_empty() { "—" } else { value };
    Line::from(vec![
        Span::styled(format!("{label:<9}"), Style::default().add_modifier(Modifier::DIM)),
        Span::raw(shown.to_string()),
    ])
}

fn draw_summary(frame: &mut Frame, app: &UiApp, card: &AgentCard, area: Rect) {
    let mut badge_style = Style::default()
        .fg(Color::Black)
        .bg(tone_color(card.badge.tone))
        .add_modifier(Modifier::BOLD);
    if app.has_effect(&card.id, EffectKind::StatusTransition) {
        badge_style = badge_style.add_modifier(Modifier::SLOW_BLINK);
    }
    let label = if card.badge.label.is_empty() {
        "…".to_string()
    } else {
        card.badge.label.clone()
    };

    let mut title = vec![
        Span::raw(" "),
        Span::styled(format!(" {label} "), badge_style),
        Span::styled(format!(" {} ", card.id), Style::default().add_modifier(Modifier::BOLD)),
    ];
    if let Some(raw) = &card.last_updated {
        let shown = format_timestamp(raw).unwrap_or_else(|| raw.clone());
        let mut style = Style::default().add_modifier(Modifier::DIM);
        if app.has_effect(&card.id, EffectKind::TimestampFlash) {
            style = Style::default().fg(Color::Yellow);
        }
        title.push(Span::styled(format!("updated {shown} "), style));
    }

    let shaking = app.has_effect(&card.id, EffectKind::ErrorShake) || card.error_state;
    let border_style = if shaking {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(if shaking {
            BorderType::Thick
        } else {
            BorderType::Plain
        })
        .title(Line::from(title))
        .border_style(border_style);

    let mut lines = vec![
        Line::from(Span::styled(
            card.task.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        field_line("progress", &card.progress),
        field_line("thought", &card.thought),
        field_line("next", &card.future),
    ];
    match (&card.last_error, &card.pr_url) {
        (Some(error), _) if card.error_state => lines.push(Line::from(vec![
            Span::styled(format!("{:<9}", "error"), Style::default().fg(Color::Red)),
            Span::styled(error.clone(), Style::default().fg(Color::Red)),
        ])),
        (_, Some(url)) => lines.push(Line::from(vec![
            Span::styled(format!("{:<9}", "PR"), Style::default().add_modifier(Modifier::DIM)),
            Span::styled(
                url.clone(),
                Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::UNDERLINED),
            ),
        ])),
        _ => lines.push(field_line("action", &card.last_action)),
    }

    let summary = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(summary, area);
}

fn draw_clone_gauge(frame: &mut Frame, card: &AgentCard, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Clone ");
    let gauge = match (&card.clone_error, card.clone_percent) {
        (Some(error), _) => Gauge::default()
            .block(block)
            .gauge_style(Style::default().fg(Color::Red))
            .percent(0)
            .label(format!("failed: {error}")),
        (None, percent) => {
            let percent = percent.unwrap_or(0).min(100);
            Gauge::default()
                .block(block)
                .gauge_style(Style::default().fg(Color::Cyan))
                .percent(u16::from(percent))
                .label(format!("{percent}%"))
        }
    };
    frame.render_widget(gauge, area);
}

fn draw_panel(
    frame: &mut Frame,
    title: &'static str,
    panel: &ScrollPanel,
    text: Text<'static>,
    border_style: Style,
    area: Rect,
) {
    let mut title = title.to_string();
    if panel.rows_below() > 0 {
        title.push_str(&format!("↓{} ", panel.rows_below()));
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(border_style);
    let scroll = u16::try_from(panel.scroll_top()).unwrap_or(u16::MAX);
    frame.render_widget(Paragraph::new(text).block(block).scroll((scroll, 0)), area);
}

fn code_style(language: Language) -> Style {
    let color = match language {
        Language::Python => Color::LightYellow,
        Language::JavaScript => Color::LightBlue,
        Language::Html => Color::LightMagenta,
        Language::Json => Color::LightGreen,
        Language::Css => Color::LightCyan,
        Language::Plain => Color::Gray,
    };
    Style::default().fg(color)
}

/// Decode one line of agent output, keeping its ANSI colors.
fn ansi_line(line: &str) -> Line<'static> {
    line.into_text()
        .ok()
        .and_then(|text| text.lines.into_iter().next())
        .unwrap_or_else(|| Line::raw(line.to_string()))
}

/// Render output with fenced code blocks highlighted. Fence lines are kept
/// as rule lines so rendered rows match the panel's line count.
pub fn output_text(output: &str) -> Text<'static> {
    let fences = output
        .lines()
        .filter(|l| l.trim_start().starts_with("```"))
        .count();
    let segments = split_fenced(output);
    let last = segments.len().saturating_sub(1);
    let rule = Style::default().fg(Color::DarkGray);

    let mut lines = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment.code {
            None => lines.extend(segment.lines.iter().map(|l| ansi_line(l))),
            Some(language) => {
                lines.push(Line::styled(format!("┌─ {}", language.name()), rule));
                let style = code_style(language);
                lines.extend(segment.lines.iter().map(|l| {
                    Line::from(vec![
                        Span::styled("│ ", rule),
                        Span::styled(l.to_string(), style),
                    ])
                }));
                let unterminated = i == last && fences % 2 == 1;
                if !unterminated {
                    lines.push(Line::styled("└─", rule));
                }
            }
        }
    }
    Text::from(lines)
}
