use ratatui::{
    layout::{Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use crate::app::{ActionKey, UiApp};
use crate::forms::Form;
use crate::models::ReviewKind;
use crate::text::{char_len, ellipsize};

pub(crate) fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

/// Append a form's fields to `lines`. Returns the focused cursor as
/// (column, row) within `lines`.
fn push_form(lines: &mut Vec<Line<'static>>, form: &Form) -> (u16, u16) {
    let mut cursor = (0, 0);
    for (i, field) in form.fields.iter().enumerate() {
        let focused = i == form.focus;
        let label_style = if focused {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(Span::styled(field.label, label_style)));

        if focused {
            let (row, col) = field.input.cursor();
            cursor = (2 + col as u16, (lines.len() + row) as u16);
        }
        for text in &field.input.lines {
            let shown = if field.secret {
                "•".repeat(char_len(text))
            } else {
                text.to_string()
            };
            lines.push(Line::from(format!("  {shown}")));
        }
    }
    cursor
}

fn push_footer(
    lines: &mut Vec<Line<'static>>,
    error: Option<&str>,
    busy: Option<&str>,
    hint: &'static str,
) {
    lines.push(Line::default());
    if let Some(error) = error {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(busy) = busy {
        lines.push(Line::from(Span::styled(
            busy.to_string(),
            Style::default().fg(Color::Magenta),
        )));
    }
    lines.push(Line::from(Span::styled(hint, dim())));
}

fn draw_modal(
    frame: &mut Frame,
    title: String,
    width: u16,
    lines: Vec<Line<'static>>,
    cursor: Option<(u16, u16)>,
) {
    let height = lines.len() as u16 + 2;
    let area = centered_rect(width, height, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    frame.render_widget(Paragraph::new(lines).block(block), area);

    if let Some((col, row)) = cursor {
        let pos = Position::new(inner.x + col, inner.y + row);
        if inner.contains(pos) {
            frame.set_cursor_position(pos);
        }
    }
}

pub fn draw_confirm_delete(frame: &mut Frame, agent_id: &str) {
    let area = centered_rect(44, 5, frame.area());
    frame.render_widget(Clear, area);

    let text = format!(" Delete agent {agent_id}? (y/n)");
    let confirm = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Confirm Delete ")
            .border_style(Style::default().fg(Color::Red)),
    );
    frame.render_widget(confirm, area);
}

pub fn draw_confirm_delete_all(frame: &mut Frame, count: usize) {
    let area = centered_rect(44, 5, frame.area());
    frame.render_widget(Clear, area);

    let text = format!(" Delete all {count} agents? (y/n)");
    let confirm = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Confirm Delete All ")
            .border_style(Style::default().fg(Color::Red)),
    );
    frame.render_widget(confirm, area);
}

pub fn draw_create_form(frame: &mut Frame, app: &UiApp) {
    let Some(create) = app.create_form.as_ref() else {
        return;
    };
    let width = 72u16;
    let mut lines = Vec::new();

    lines.push(Line::from(Span::styled(
        format!("Tasks ({})", create.drafts.len()),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )));
    if create.drafts.is_empty() {
        lines.push(Line::from(Span::styled("  none yet", dim())));
    }
    for (i, draft) in create.drafts.iter().enumerate().take(6) {
        let title = ellipsize(&draft.title, width as usize - 10);
        lines.push(Line::from(format!("  {}. {title}", i + 1)));
    }
    if create.drafts.len() > 6 {
        lines.push(Line::from(Span::styled(
            format!("  … {} more", create.drafts.len() - 6),
            dim(),
        )));
    }

    let cursor = push_form(&mut lines, &create.form);

    let busy = if app.pending.contains(&ActionKey::Create) {
        Some("Creating agents…")
    } else if app.pending.contains(&ActionKey::ImportIssues) {
        Some("Importing issues…")
    } else {
        None
    };
    push_footer(
        &mut lines,
        create.form.error.as_deref(),
        busy,
        "Tab next · C-a add task · C-x drop · C-g issues · C-s create · Esc",
    );

    draw_modal(
        frame,
        " New Agents ".to_string(),
        width,
        lines,
        Some(cursor),
    );
}

pub fn draw_review_form(frame: &mut Frame, app: &UiApp) {
    let Some(review) = app.review_form.as_ref() else {
        return;
    };
    let mut lines = vec![Line::from(
        ReviewKind::all()
            .iter()
            .flat_map(|kind| {
                let style = if *kind == review.kind {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    dim()
                };
                [Span::styled(format!(" {kind} "), style), Span::raw(" ")]
            })
            .collect::<Vec<_>>(),
    )];
    lines.push(Line::default());

    let cursor = push_form(&mut lines, &review.form);
    let busy = app
        .pending
        .contains(&ActionKey::Review(review.agent_id.clone()))
        .then_some("Submitting review…");
    push_footer(
        &mut lines,
        review.form.error.as_deref(),
        busy,
        "Tab: change type  C-s: submit  Esc: close",
    );

    draw_modal(
        frame,
        format!(" Review {} ", review.agent_id),
        64,
        lines,
        Some(cursor),
    );
}

pub fn draw_models_form(frame: &mut Frame, app: &UiApp) {
    let Some(models) = app.models_form.as_ref() else {
        return;
    };
    let mut lines = Vec::new();
    let cursor = push_form(&mut lines, &models.form);
    let busy = if app.pending.contains(&ActionKey::LoadModels) {
        Some("Loading current configuration…")
    } else if app.pending.contains(&ActionKey::SaveModels) {
        Some("Saving…")
    } else {
        None
    };
    push_footer(
        &mut lines,
        models.form.error.as_deref(),
        busy,
        "Tab: next  C-s: save  Esc: close",
    );

    draw_modal(
        frame,
        " Model Configuration ".to_string(),
        64,
        lines,
        Some(cursor),
    );
}
