use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::app::{Mode, ToastLevel, UiApp};

pub fn help_text(mode: &Mode) -> &'static str {
    match mode {
        Mode::Browse => {
            "j/k: nav  PgUp/Dn: scroll  t: trace  /: search  n: new  r: review  d/D: del  m: models  y: copy  q: quit"
        }
        Mode::Search => "type to filter  Enter: keep  Esc: clear",
        Mode::ConfirmDelete(_) | Mode::ConfirmDeleteAll => "y: confirm delete  Esc: cancel",
        Mode::Create => "C-s: create  C-a: add task  C-g: import issues  Esc: close (draft kept)",
        Mode::Review => "Tab: type  C-s: submit  Esc: close (draft kept)",
        Mode::Models => "C-s: save  Esc: close",
    }
}

fn toast_style(level: ToastLevel) -> Style {
    match level {
        ToastLevel::Info => Style::default().fg(Color::Black).bg(Color::White),
        ToastLevel::Success => Style::default().fg(Color::Black).bg(Color::Green),
        ToastLevel::Error => Style::default()
            .fg(Color::White)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD),
    }
}

pub fn draw_help_bar(frame: &mut Frame, app: &UiApp, area: Rect) {
    let bar_style = Style::default()
        .fg(Color::Black)
        .bg(Color::Cyan)
        .add_modifier(Modifier::BOLD);

    let mut spans = Vec::new();
    if let Some(toast) = &app.toast {
        spans.push(Span::styled(format!(" {} ", toast.message), toast_style(toast.level)));
    }

    let mut busy: Vec<&str> = app.pending.iter().map(|key| key.label()).collect();
    busy.sort_unstable();
    busy.dedup();
    if !busy.is_empty() {
        spans.push(Span::styled(
            format!(" ⟳ {} ", busy.join(", ")),
            Style::default().fg(Color::Black).bg(Color::Magenta),
        ));
    }

    spans.push(Span::styled(format!(" {}", help_text(&app.mode)), bar_style));

    let bar = Paragraph::new(Line::from(spans)).style(bar_style);
    frame.render_widget(bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browse_help_lists_core_keys() {
        insta::assert_snapshot!(
            help_text(&Mode::Browse),
            @"j/k: nav  PgUp/Dn: scroll  t: trace  /: search  n: new  r: review  d/D: del  m: models  y: copy  q: quit"
        );
    }

    #[test]
    fn confirm_modes_share_help() {
        assert_eq!(
            help_text(&Mode::ConfirmDelete("a1".to_string())),
            help_text(&Mode::ConfirmDeleteAll)
        );
    }
}
