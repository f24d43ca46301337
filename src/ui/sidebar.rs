use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::app::{ActionKey, Mode, UiApp};
use crate::sync::{AgentCard, EffectKind};
use crate::text::{char_len, ellipsize};

use super::tone_color;

fn list_title(app: &UiApp, shown: usize) -> String {
    let total = app.sync.len();
    if app.mode == Mode::Search {
        format!(" Agents /{}▏ ", app.search.input.text())
    } else if !app.search.query.is_empty() {
        format!(" Agents ({shown}/{total}) /{} ", app.search.query)
    } else {
        format!(" Agents ({total}) ")
    }
}

fn agent_row(app: &UiApp, card: &AgentCard, selected: bool, width: usize) -> ListItem<'static> {
    let tone = tone_color(card.badge.tone);
    let mut dot_style = Style::default().fg(tone);
    if app.has_effect(&card.id, EffectKind::StatusTransition) {
        dot_style = dot_style.add_modifier(Modifier::REVERSED);
    }

    let mut name_style = if selected {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    if app.has_effect(&card.id, EffectKind::ErrorShake) {
        name_style = name_style.fg(Color::Red);
    }
    let task_style = if card.is_abandoned() {
        Style::default().add_modifier(Modifier::DIM | Modifier::CROSSED_OUT)
    } else {
        Style::default().add_modifier(Modifier::DIM)
    };

    let marker = if selected { "› " } else { "  " };
    let mut suffix = String::new();
    if app.pending.contains(&ActionKey::Delete(card.id.clone())) {
        suffix.push_str(" deleting…");
    } else if card.pr_url.is_some() {
        suffix.push_str(" PR");
    }

    // marker + dot + id + gap + task + suffix
    let used = 2 + 2 + char_len(&card.id) + 2 + char_len(&suffix);
    let task = ellipsize(&card.task, width.saturating_sub(used));

    ListItem::new(Line::from(vec![
        Span::styled(marker, name_style),
        Span::styled("● ", dot_style),
        Span::styled(card.id.clone(), name_style),
        Span::raw("  "),
        Span::styled(task, task_style),
        Span::styled(suffix, Style::default().fg(Color::Magenta)),
    ]))
}

pub fn draw_sidebar(frame: &mut Frame, app: &UiApp, area: Rect) {
    app.list_area.set(area);

    let cards = app.visible_cards();
    let border_color = if app.mode == Mode::Search {
        Color::Yellow
    } else {
        Color::Cyan
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(list_title(app, cards.len()))
        .border_style(Style::default().fg(border_color));

    if cards.is_empty() {
        let message = if app.sync.is_empty() {
            "No agents yet. Press n to create some."
        } else {
            "No agents match the filter."
        };
        let placeholder = Paragraph::new(message)
            .style(Style::default().add_modifier(Modifier::DIM))
            .block(block);
        frame.render_widget(placeholder, area);
        app.list_offset.set(0);
        return;
    }

    let width = area.width.saturating_sub(2) as usize;
    let items: Vec<ListItem> = cards
        .iter()
        .enumerate()
        .map(|(i, card)| agent_row(app, card, i == app.selected, width))
        .collect();

    let list = List::new(items).block(block);
    let mut state = ListState::default();
    state.select(Some(app.selected));
    frame.render_stateful_widget(list, area, &mut state);
    app.list_offset.set(state.offset());
}
