use std::cell::Cell;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::{Position, Rect};
use tokio::sync::mpsc;

use crate::forms::{CreateForm, ModelsForm, ReviewForm};
use crate::models::{
    CreateAgentRequest, CreateAgentResponse, GithubIssue, HistoryEntry, ModelConfig,
    ReviewRequest, TasksDocument,
};
use crate::push::{ConnectionState, PushEvent};
use crate::sync::{AgentCard, AgentViewSynchronizer, EffectKind, SyncReport};
use crate::ui::state::TextInput;

pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Browse,
    Search,
    ConfirmDelete(String),
    ConfirmDeleteAll,
    Create,
    Review,
    Models,
}

/// Identifies an outstanding user action. While a key is pending, the
/// control that triggers it is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
    History(String),
    Delete(String),
    DeleteAll,
    Review(String),
    Create,
    LoadModels,
    SaveModels,
    ImportIssues,
}

impl ActionKey {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKey::History(_) => "History fetch",
            ActionKey::Delete(_) => "Delete",
            ActionKey::DeleteAll => "Delete all",
            ActionKey::Review(_) => "Review",
            ActionKey::Create => "Create agents",
            ActionKey::LoadModels => "Loading models",
            ActionKey::SaveModels => "Saving models",
            ActionKey::ImportIssues => "Issue import",
        }
    }
}

/// Command from UI → Backend.
#[derive(Debug)]
pub enum BackendCommand {
    /// Poll now instead of waiting for the next tick.
    Refresh,
    FetchHistory {
        agent_id: String,
    },
    DeleteAgent {
        agent_id: String,
    },
    DeleteAll {
        agent_ids: Vec<String>,
    },
    SubmitReview {
        agent_id: String,
        review: ReviewRequest,
    },
    CreateAgents {
        request: CreateAgentRequest,
    },
    LoadModels,
    SaveModels {
        config: ModelConfig,
    },
    FetchIssues {
        repo_url: String,
    },
    Quit,
}

#[derive(Debug)]
pub enum ActionResult {
    History(Vec<HistoryEntry>),
    Deleted {
        ids: Vec<String>,
        failed: Vec<(String, String)>,
    },
    Reviewed,
    Created(CreateAgentResponse),
    ModelsLoaded(ModelConfig),
    ModelsSaved(ModelConfig),
    Issues(Vec<GithubIssue>),
}

/// Event from Backend → UI, delivered in order over one channel.
#[derive(Debug)]
pub enum BackendEvent {
    Snapshot(TasksDocument),
    PollFailed {
        message: String,
        failures: u32,
    },
    Push(PushEvent),
    Connection(ConnectionState),
    ActionDone {
        key: ActionKey,
        result: Result<ActionResult, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

impl ToastLevel {
    pub fn duration(self) -> Duration {
        match self {
            ToastLevel::Info => Duration::from_secs(3),
            ToastLevel::Success => Duration::from_secs(4),
            ToastLevel::Error => Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEffect {
    pub agent_id: String,
    pub kind: EffectKind,
    pub until: Instant,
}

fn effect_duration(kind: EffectKind) -> Duration {
    match kind {
        EffectKind::StatusTransition => Duration::from_millis(1500),
        EffectKind::OutputFlash => Duration::from_millis(600),
        EffectKind::TimestampFlash => Duration::from_millis(1000),
        EffectKind::ErrorShake => Duration::from_millis(800),
    }
}

#[derive(Debug, Default)]
pub struct SearchState {
    pub input: TextInput,
    /// Applied filter; lags `input` by the debounce interval.
    pub query: String,
    edited_at: Option<Instant>,
}

impl SearchState {
    fn edited(&mut self, now: Instant) {
        self.edited_at = Some(now);
    }

    fn apply(&mut self) {
        self.query = self.input.text().trim().to_lowercase();
        self.edited_at = None;
    }

    fn clear(&mut self) {
        self.input.clear();
        self.query.clear();
        self.edited_at = None;
    }

    fn matches(&self, card: &AgentCard) -> bool {
        self.query.is_empty()
            || card.id.to_lowercase().contains(&self.query)
            || card.task.to_lowercase().contains(&self.query)
    }
}

/// UI-only application state, separated from I/O.
/// Receives backend events over a channel and sends commands back.
pub struct UiApp {
    pub sync: AgentViewSynchronizer,
    pub selected: usize,
    pub mode: Mode,
    pub should_quit: bool,
    pub needs_redraw: bool,
    pub show_trace: bool,
    pub connection: ConnectionState,
    pub repository_url: Option<String>,
    pub toast: Option<Toast>,
    pub effects: Vec<ActiveEffect>,
    pub search: SearchState,
    pub pending: HashSet<ActionKey>,
    pub create_form: Option<CreateForm>,
    pub review_form: Option<ReviewForm>,
    pub models_form: Option<ModelsForm>,

    // Set by the renderer each frame; read by mouse handling and viewport sync.
    pub list_area: Cell<Rect>,
    pub output_area: Cell<Rect>,
    pub trace_area: Cell<Rect>,
    /// First visible row of the agent list after the last render.
    pub list_offset: Cell<usize>,

    github_token: Option<String>,
    clipboard_request: Option<String>,

    cmd_tx: mpsc::Sender<BackendCommand>,
    event_rx: mpsc::Receiver<BackendEvent>,
}

impl UiApp {
    pub fn new(
        cmd_tx: mpsc::Sender<BackendCommand>,
        event_rx: mpsc::Receiver<BackendEvent>,
        near_bottom_rows: usize,
        github_token: Option<String>,
    ) -> Self {
        Self {
            sync: AgentViewSynchronizer::new(near_bottom_rows),
            selected: 0,
            mode: Mode::Browse,
            should_quit: false,
            needs_redraw: true,
            show_trace: false,
            connection: ConnectionState::default(),
            repository_url: None,
            toast: None,
            effects: Vec::new(),
            search: SearchState::default(),
            pending: HashSet::new(),
            create_form: None,
            review_form: None,
            models_form: None,
            list_area: Cell::new(Rect::default()),
            output_area: Cell::new(Rect::default()),
            trace_area: Cell::new(Rect::default()),
            list_offset: Cell::new(0),
            github_token,
            clipboard_request: None,
            cmd_tx,
            event_rx,
        }
    }

    /// Test constructor with dummy channels.
    #[cfg(test)]
    pub fn new_test() -> Self {
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let (_event_tx, event_rx) = mpsc::channel(1);
        Self::new(cmd_tx, event_rx, 3, None)
    }

    // ── Backend events ──────────────────────────────────────────────

    /// Apply every queued backend event. Call once per tick.
    pub fn poll_backend(&mut self, now: Instant) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.apply_backend_event(event, now);
        }
    }

    pub fn apply_backend_event(&mut self, event: BackendEvent, now: Instant) {
        self.needs_redraw = true;
        match event {
            BackendEvent::Snapshot(doc) => {
                if doc.repository_url.is_some() {
                    self.repository_url = doc.repository_url.clone();
                }
                let report = self.sync.reconcile(&doc.agents);
                if !report.created.is_empty() {
                    tracing::debug!(created = ?report.created, "new agents");
                }
                self.absorb_report(report, now);
                self.clamp_selection();
            }
            BackendEvent::PollFailed { message, failures } => {
                self.notify(ToastLevel::Error, format!("Refresh failed: {message}"), now);
                tracing::debug!(failures, "poll failure surfaced");
            }
            BackendEvent::Push(event) => {
                let report = self.sync.apply_push_event(&event);
                self.absorb_report(report, now);
            }
            BackendEvent::Connection(state) => {
                if state == ConnectionState::Disconnected
                    && self.connection == ConnectionState::Connected
                {
                    tracing::info!("push channel lost; polling continues");
                }
                self.connection = state;
            }
            BackendEvent::ActionDone { key, result } => {
                self.pending.remove(&key);
                match result {
                    Ok(done) => self.action_succeeded(key, done, now),
                    Err(message) => self.action_failed(key, message, now),
                }
            }
        }
    }

    fn action_succeeded(&mut self, key: ActionKey, result: ActionResult, now: Instant) {
        match result {
            ActionResult::History(history) => {
                if let ActionKey::History(agent_id) = key {
                    if let Some(report) = self.sync.apply_history(&agent_id, history) {
                        self.absorb_report(report, now);
                    }
                }
            }
            ActionResult::Deleted { ids, failed } => {
                for id in &ids {
                    self.sync.record_deletion(id);
                }
                self.clamp_selection();
                if failed.is_empty() {
                    let message = match ids.as_slice() {
                        [only] => format!("Deleted {only}"),
                        _ => format!("Deleted {} agents", ids.len()),
                    };
                    self.notify(ToastLevel::Success, message, now);
                } else {
                    let (id, error) = &failed[0];
                    let message = format!(
                        "Deleted {}, {} failed ({id}: {error})",
                        ids.len(),
                        failed.len()
                    );
                    self.notify(ToastLevel::Error, message, now);
                }
            }
            ActionResult::Reviewed => {
                if let ActionKey::Review(agent_id) = &key {
                    if self
                        .review_form
                        .as_ref()
                        .is_some_and(|f| &f.agent_id == agent_id)
                    {
                        self.review_form = None;
                        if self.mode == Mode::Review {
                            self.mode = Mode::Browse;
                        }
                    }
                    self.notify(ToastLevel::Success, format!("Review sent to {agent_id}"), now);
                }
            }
            ActionResult::Created(response) => {
                let message = response.message.clone().unwrap_or_else(|| {
                    format!("Created {} agent(s)", response.agent_ids.len())
                });
                self.create_form = None;
                if self.mode == Mode::Create {
                    self.mode = Mode::Browse;
                }
                self.notify(ToastLevel::Success, message, now);
                self.queue_command(BackendCommand::Refresh);
            }
            ActionResult::ModelsLoaded(config) => {
                if let Some(form) = self.models_form.as_mut() {
                    form.fill(&config);
                }
            }
            ActionResult::ModelsSaved(_) => {
                self.models_form = None;
                if self.mode == Mode::Models {
                    self.mode = Mode::Browse;
                }
                self.notify(ToastLevel::Success, "Model configuration saved".to_string(), now);
            }
            ActionResult::Issues(issues) => {
                if let Some(form) = self.create_form.as_mut() {
                    let count = form.import_issues(&issues);
                    self.notify(ToastLevel::Info, format!("Imported {count} issue(s)"), now);
                }
            }
        }
    }

    fn action_failed(&mut self, key: ActionKey, message: String, now: Instant) {
        tracing::warn!(action = key.label(), error = %message, "action failed");
        let form_error = match &key {
            ActionKey::Create | ActionKey::ImportIssues => {
                self.create_form.as_mut().map(|f| &mut f.form.error)
            }
            ActionKey::Review(_) => self.review_form.as_mut().map(|f| &mut f.form.error),
            ActionKey::LoadModels | ActionKey::SaveModels => {
                self.models_form.as_mut().map(|f| &mut f.form.error)
            }
            _ => None,
        };
        if let Some(slot) = form_error {
            *slot = Some(message.clone());
        }
        self.notify(ToastLevel::Error, format!("{} failed: {message}", key.label()), now);
    }

    fn absorb_report(&mut self, report: SyncReport, now: Instant) {
        for effect in report.effects {
            let until = now + effect_duration(effect.kind);
            self.effects.retain(|e| !(e.agent_id == effect.agent_id && e.kind == effect.kind));
            self.effects.push(ActiveEffect {
                agent_id: effect.agent_id,
                kind: effect.kind,
                until,
            });
        }
        if let Some(alert) = report.alerts.last() {
            self.notify(ToastLevel::Error, alert.clone(), now);
        }
    }

    pub fn notify(&mut self, level: ToastLevel, message: String, now: Instant) {
        self.toast = Some(Toast {
            message,
            level,
            expires_at: now + level.duration(),
        });
        self.needs_redraw = true;
    }

    /// Expire toasts and effects and apply a settled search. Call every tick.
    pub fn on_tick(&mut self, now: Instant) {
        self.poll_backend(now);

        if self.toast.as_ref().is_some_and(|t| t.expires_at <= now) {
            self.toast = None;
            self.needs_redraw = true;
        }

        let before = self.effects.len();
        self.effects.retain(|e| e.until > now);
        if before != self.effects.len() || !self.effects.is_empty() {
            self.needs_redraw = true;
        }

        if let Some(edited_at) = self.search.edited_at {
            if now.duration_since(edited_at) >= SEARCH_DEBOUNCE {
                self.search.apply();
                self.clamp_selection();
                self.needs_redraw = true;
            }
        }
    }

    pub fn has_effect(&self, agent_id: &str, kind: EffectKind) -> bool {
        self.effects
            .iter()
            .any(|e| e.agent_id == agent_id && e.kind == kind)
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Cards passing the search filter, in display order.
    pub fn visible_cards(&self) -> Vec<&AgentCard> {
        self.sync
            .cards()
            .filter(|card| self.search.matches(card))
            .collect()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.visible_cards()
            .get(self.selected)
            .map(|card| card.id.clone())
    }

    pub fn selected_card(&self) -> Option<&AgentCard> {
        self.visible_cards().get(self.selected).copied()
    }

    fn clamp_selection(&mut self) {
        let count = self.visible_cards().len();
        if count == 0 {
            self.selected = 0;
        } else if self.selected >= count {
            self.selected = count - 1;
        }
    }

    pub fn select_next(&mut self) {
        let count = self.visible_cards().len();
        if count > 0 {
            self.selected = (self.selected + 1) % count;
            self.on_selection_changed();
        }
    }

    pub fn select_prev(&mut self) {
        let count = self.visible_cards().len();
        if count > 0 {
            self.selected = if self.selected == 0 {
                count - 1
            } else {
                self.selected - 1
            };
            self.on_selection_changed();
        }
    }

    fn on_selection_changed(&mut self) {
        if self.show_trace {
            self.request_history();
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn queue_command(&mut self, command: BackendCommand) {
        match self.cmd_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                let tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("backend channel closed");
                self.should_quit = true;
            }
        }
    }

    /// Mark `key` pending and send `command`. Ignored while already pending.
    fn begin(&mut self, key: ActionKey, command: BackendCommand) -> bool {
        if !self.pending.insert(key) {
            return false;
        }
        self.queue_command(command);
        true
    }

    fn request_history(&mut self) {
        if let Some(agent_id) = self.selected_id() {
            self.begin(
                ActionKey::History(agent_id.clone()),
                BackendCommand::FetchHistory { agent_id },
            );
        }
    }

    /// Output the renderer should copy to the clipboard, if requested.
    pub fn take_clipboard_request(&mut self) -> Option<String> {
        self.clipboard_request.take()
    }

    /// Push the rendered panel heights into every card's scroll state.
    pub fn sync_viewports(&mut self) {
        let rows = |r: Rect| r.height.saturating_sub(2) as usize;
        self.sync
            .set_viewports(rows(self.output_area.get()), rows(self.trace_area.get()));
    }

    fn scroll_output(&mut self, f: impl FnOnce(&mut crate::sync::ScrollPanel)) {
        if let Some(id) = self.selected_id() {
            if let Some(card) = self.sync.card_mut(&id) {
                f(&mut card.output);
                self.needs_redraw = true;
            }
        }
    }

    // ── Keys ────────────────────────────────────────────────────────

    /// Handle a key event. Synchronous; I/O goes out as a BackendCommand.
    pub fn handle_key(&mut self, key: KeyEvent) {
        self.needs_redraw = true;
        match self.mode.clone() {
            Mode::Browse => self.handle_browse_key(key),
            Mode::Search => self.handle_search_key(key),
            Mode::ConfirmDelete(agent_id) => self.handle_confirm_delete_key(key.code, agent_id),
            Mode::ConfirmDeleteAll => self.handle_confirm_delete_all_key(key.code),
            Mode::Create => self.handle_create_key(key),
            Mode::Review => self.handle_review_key(key),
            Mode::Models => self.handle_models_key(key),
        }
    }

    fn handle_browse_key(&mut self, key: KeyEvent) {
        let page = self.output_area.get().height.saturating_sub(2).max(1) as usize;
        match key.code {
            KeyCode::Char('q') => {
                self.queue_command(BackendCommand::Quit);
                self.should_quit = true;
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.queue_command(BackendCommand::Quit);
                self.should_quit = true;
            }
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_prev(),
            KeyCode::PageUp => self.scroll_output(|p| p.scroll_up(page)),
            KeyCode::PageDown => self.scroll_output(|p| p.scroll_down(page)),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_output(|p| p.scroll_to_top()),
            KeyCode::Char('G') | KeyCode::End => self.scroll_output(|p| p.scroll_to_bottom()),
            KeyCode::Char('t') => {
                self.show_trace = !self.show_trace;
                if self.show_trace {
                    self.request_history();
                }
            }
            KeyCode::Char('/') => self.mode = Mode::Search,
            KeyCode::Esc if !self.search.query.is_empty() => {
                self.search.clear();
                self.clamp_selection();
            }
            KeyCode::Char('n') => self.open_create(),
            KeyCode::Char('d') => {
                if let Some(id) = self.selected_id() {
                    if !self.pending.contains(&ActionKey::Delete(id.clone())) {
                        self.mode = Mode::ConfirmDelete(id);
                    }
                }
            }
            KeyCode::Char('D') => {
                if !self.sync.is_empty() && !self.pending.contains(&ActionKey::DeleteAll) {
                    self.mode = Mode::ConfirmDeleteAll;
                }
            }
            KeyCode::Char('r') => {
                if let Some(id) = self.selected_id() {
                    if self.review_form.as_ref().map(|f| f.agent_id.as_str()) != Some(id.as_str())
                    {
                        self.review_form = Some(ReviewForm::new(&id));
                    }
                    self.mode = Mode::Review;
                }
            }
            KeyCode::Char('m') => {
                if self.models_form.is_none() {
                    self.models_form = Some(ModelsForm::new());
                }
                self.mode = Mode::Models;
                if !self.models_form.as_ref().is_some_and(|f| f.loaded) {
                    self.begin(ActionKey::LoadModels, BackendCommand::LoadModels);
                }
            }
            KeyCode::Char('y') => {
                if let Some(card) = self.selected_card() {
                    if !card.output.text().is_empty() {
                        self.clipboard_request = Some(card.output.text().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        let now = Instant::now();
        match key.code {
            KeyCode::Enter => {
                self.search.apply();
                self.clamp_selection();
                self.mode = Mode::Browse;
            }
            KeyCode::Esc => {
                self.search.clear();
                self.clamp_selection();
                self.mode = Mode::Browse;
            }
            KeyCode::Backspace => {
                self.search.input.backspace();
                self.search.edited(now);
            }
            KeyCode::Left => self.search.input.move_left(),
            KeyCode::Right => self.search.input.move_right(),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.search.input.insert_char(ch);
                self.search.edited(now);
            }
            _ => {}
        }
    }

    fn handle_confirm_delete_key(&mut self, code: KeyCode, agent_id: String) {
        match code {
            KeyCode::Char('y') => {
                self.begin(
                    ActionKey::Delete(agent_id.clone()),
                    BackendCommand::DeleteAgent { agent_id },
                );
                self.mode = Mode::Browse;
            }
            KeyCode::Esc | KeyCode::Char('n') => self.mode = Mode::Browse,
            _ => {}
        }
    }

    fn handle_confirm_delete_all_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('y') => {
                let agent_ids = self.sync.ids().to_vec();
                self.begin(ActionKey::DeleteAll, BackendCommand::DeleteAll { agent_ids });
                self.mode = Mode::Browse;
            }
            KeyCode::Esc | KeyCode::Char('n') => self.mode = Mode::Browse,
            _ => {}
        }
    }

    fn open_create(&mut self) {
        if self.create_form.is_none() {
            self.create_form = Some(CreateForm::new(
                self.repository_url.as_deref(),
                self.github_token.as_deref(),
            ));
        }
        self.mode = Mode::Create;
    }

    fn handle_create_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let Some(form) = self.create_form.as_mut() else {
            self.mode = Mode::Browse;
            return;
        };
        match key.code {
            KeyCode::Esc => self.mode = Mode::Browse,
            KeyCode::Char('a') if ctrl => {
                if let Err(e) = form.add_draft() {
                    form.form.error = Some(e);
                }
            }
            KeyCode::Char('x') if ctrl => {
                form.remove_last_draft();
            }
            KeyCode::Char('g') if ctrl => {
                let repo_url = form.repo_url();
                if repo_url.is_empty() {
                    form.form.error = Some("Please enter a repository URL first.".to_string());
                    return;
                }
                form.form.error = None;
                self.begin(ActionKey::ImportIssues, BackendCommand::FetchIssues { repo_url });
            }
            KeyCode::Char('s') if ctrl => match form.build_request() {
                Ok(request) => {
                    form.form.error = None;
                    self.begin(ActionKey::Create, BackendCommand::CreateAgents { request });
                }
                Err(e) => form.form.error = Some(e),
            },
            _ => {
                form.form.handle_edit_key(key);
            }
        }
    }

    fn handle_review_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let Some(form) = self.review_form.as_mut() else {
            self.mode = Mode::Browse;
            return;
        };
        match key.code {
            KeyCode::Esc => self.mode = Mode::Browse,
            KeyCode::Tab => form.kind = form.kind.next(),
            KeyCode::Char('s') if ctrl => match form.validate() {
                Ok(feedback) => {
                    form.form.error = None;
                    let agent_id = form.agent_id.clone();
                    let review = ReviewRequest {
                        feedback,
                        kind: form.kind,
                    };
                    self.begin(
                        ActionKey::Review(agent_id.clone()),
                        BackendCommand::SubmitReview { agent_id, review },
                    );
                }
                Err(e) => form.form.error = Some(e),
            },
            _ => {
                form.form.handle_edit_key(key);
            }
        }
    }

    fn handle_models_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let Some(form) = self.models_form.as_mut() else {
            self.mode = Mode::Browse;
            return;
        };
        match key.code {
            KeyCode::Esc => self.mode = Mode::Browse,
            KeyCode::Char('s') if ctrl => match form.build_config() {
                Ok(config) => {
                    form.form.error = None;
                    self.begin(ActionKey::SaveModels, BackendCommand::SaveModels { config });
                }
                Err(e) => form.form.error = Some(e),
            },
            _ => {
                form.form.handle_edit_key(key);
            }
        }
    }

    /// Bracketed paste goes to whichever input has focus.
    pub fn handle_paste(&mut self, text: String) {
        self.needs_redraw = true;
        let now = Instant::now();
        match self.mode {
            Mode::Search => {
                self.search.input.insert_text(&text);
                self.search.edited(now);
            }
            Mode::Create => {
                if let Some(form) = self.create_form.as_mut() {
                    form.form.paste(&text);
                }
            }
            Mode::Review => {
                if let Some(form) = self.review_form.as_mut() {
                    form.form.paste(&text);
                }
            }
            Mode::Models => {
                if let Some(form) = self.models_form.as_mut() {
                    form.form.paste(&text);
                }
            }
            _ => {}
        }
    }

    // ── Mouse ───────────────────────────────────────────────────────

    /// Handle mouse events. Synchronous.
    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.mode != Mode::Browse {
            return;
        }
        let pos = Position::new(mouse.column, mouse.row);
        let list = self.list_area.get();
        let output = self.output_area.get();
        match mouse.kind {
            MouseEventKind::ScrollUp if output.contains(pos) => {
                self.scroll_output(|p| p.scroll_up(3))
            }
            MouseEventKind::ScrollDown if output.contains(pos) => {
                self.scroll_output(|p| p.scroll_down(3))
            }
            MouseEventKind::ScrollUp if list.contains(pos) => self.select_prev(),
            MouseEventKind::ScrollDown if list.contains(pos) => self.select_next(),
            MouseEventKind::Down(MouseButton::Left) if list.contains(pos) => {
                // One row per agent inside the list border.
                let row = mouse.row.saturating_sub(list.y + 1) as usize + self.list_offset.get();
                if mouse.row > list.y && row < self.visible_cards().len() && row != self.selected
                {
                    self.selected = row;
                    self.on_selection_changed();
                }
            }
            _ => return,
        }
        self.needs_redraw = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentSnapshot, AgentStatus, ReviewKind};
    use std::collections::BTreeMap;

    fn make_app() -> (UiApp, mpsc::Receiver<BackendCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (_event_tx, event_rx) = mpsc::channel(16);
        (
            UiApp::new(cmd_tx, event_rx, 3, Some("ghp_test".to_string())),
            cmd_rx,
        )
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    fn document(agents: &[(&str, &str, &str)]) -> TasksDocument {
        let agents: BTreeMap<String, AgentSnapshot> = agents
            .iter()
            .map(|(id, task, output)| {
                let snapshot = AgentSnapshot {
                    status: AgentStatus::InProgress,
                    task: task.to_string(),
                    aider_output: output.to_string(),
                    ..AgentSnapshot::new(*id)
                };
                (id.to_string(), snapshot)
            })
            .collect();
        TasksDocument {
            agents,
            repository_url: Some("https://github.com/o/r".to_string()),
            ..TasksDocument::default()
        }
    }

    fn seeded() -> (UiApp, mpsc::Receiver<BackendCommand>) {
        let (mut app, rx) = make_app();
        app.apply_backend_event(
            BackendEvent::Snapshot(document(&[
                ("a1", "Fix login", "Hello"),
                ("a2", "Add tests", ""),
            ])),
            Instant::now(),
        );
        (app, rx)
    }

    #[test]
    fn snapshot_populates_cards_and_repo() {
        let (app, _rx) = seeded();
        assert_eq!(app.visible_cards().len(), 2);
        assert_eq!(app.selected_id().as_deref(), Some("a1"));
        assert_eq!(app.repository_url.as_deref(), Some("https://github.com/o/r"));
    }

    #[test]
    fn delete_flow_tombstones_card() {
        let (mut app, mut rx) = seeded();
        app.handle_key(key(KeyCode::Char('d')));
        assert_eq!(app.mode, Mode::ConfirmDelete("a1".to_string()));
        app.handle_key(key(KeyCode::Char('y')));
        assert_eq!(app.mode, Mode::Browse);
        match rx.try_recv() {
            Ok(BackendCommand::DeleteAgent { agent_id }) => assert_eq!(agent_id, "a1"),
            other => panic!("expected DeleteAgent, got {other:?}"),
        }
        assert!(app.pending.contains(&ActionKey::Delete("a1".to_string())));

        // Disabled while outstanding.
        app.handle_key(key(KeyCode::Char('d')));
        assert_eq!(app.mode, Mode::Browse);

        let now = Instant::now();
        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::Delete("a1".to_string()),
                result: Ok(ActionResult::Deleted {
                    ids: vec!["a1".to_string()],
                    failed: Vec::new(),
                }),
            },
            now,
        );
        assert!(app.pending.is_empty());
        assert!(app.sync.card("a1").is_none());
        assert_eq!(app.toast.as_ref().unwrap().level, ToastLevel::Success);

        // A stale poll still listing a1 does not bring it back.
        app.apply_backend_event(
            BackendEvent::Snapshot(document(&[("a1", "Fix login", "Hello"), ("a2", "Add tests", "")])),
            now,
        );
        assert!(app.sync.card("a1").is_none());
        assert_eq!(app.selected_id().as_deref(), Some("a2"));
    }

    #[test]
    fn failed_action_reenables_and_toasts() {
        let (mut app, _rx) = seeded();
        app.handle_key(key(KeyCode::Char('d')));
        app.handle_key(key(KeyCode::Char('y')));
        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::Delete("a1".to_string()),
                result: Err("Agent not found".to_string()),
            },
            Instant::now(),
        );
        assert!(app.pending.is_empty());
        assert!(app.sync.card("a1").is_some());
        let toast = app.toast.as_ref().unwrap();
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(toast.message, "Delete failed: Agent not found");
    }

    #[test]
    fn delete_all_sends_every_id() {
        let (mut app, mut rx) = seeded();
        app.handle_key(key(KeyCode::Char('D')));
        assert_eq!(app.mode, Mode::ConfirmDeleteAll);
        app.handle_key(key(KeyCode::Char('y')));
        match rx.try_recv() {
            Ok(BackendCommand::DeleteAll { agent_ids }) => {
                assert_eq!(agent_ids, vec!["a1".to_string(), "a2".to_string()])
            }
            other => panic!("expected DeleteAll, got {other:?}"),
        }
        app.handle_key(key(KeyCode::Char('D')));
        assert_eq!(app.mode, Mode::Browse);
    }

    #[test]
    fn search_is_debounced() {
        let (mut app, _rx) = seeded();
        app.handle_key(key(KeyCode::Char('/')));
        for ch in "test".chars() {
            app.handle_key(key(KeyCode::Char(ch)));
        }
        let typed_at = app.search.edited_at.unwrap();

        app.on_tick(typed_at + Duration::from_millis(100));
        assert_eq!(app.visible_cards().len(), 2);

        app.on_tick(typed_at + SEARCH_DEBOUNCE);
        assert_eq!(app.search.query, "test");
        let ids: Vec<&str> = app.visible_cards().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a2"]);
        assert_eq!(app.selected_id().as_deref(), Some("a2"));
    }

    #[test]
    fn search_escape_clears_filter() {
        let (mut app, _rx) = seeded();
        app.handle_key(key(KeyCode::Char('/')));
        app.handle_key(key(KeyCode::Char('a')));
        app.handle_key(key(KeyCode::Char('2')));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.visible_cards().len(), 1);
        assert_eq!(app.mode, Mode::Browse);

        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.visible_cards().len(), 2);
    }

    #[test]
    fn toast_expires() {
        let (mut app, _rx) = make_app();
        let now = Instant::now();
        app.notify(ToastLevel::Info, "hello".to_string(), now);
        app.on_tick(now + Duration::from_secs(1));
        assert!(app.toast.is_some());
        app.on_tick(now + ToastLevel::Info.duration());
        assert!(app.toast.is_none());
    }

    #[test]
    fn error_toasts_outlive_info() {
        assert!(ToastLevel::Error.duration() > ToastLevel::Info.duration());
    }

    #[test]
    fn output_growth_flashes_then_expires() {
        let (mut app, _rx) = seeded();
        let now = Instant::now();
        app.apply_backend_event(
            BackendEvent::Snapshot(document(&[("a1", "Fix login", "Hello world")])),
            now,
        );
        assert!(app.has_effect("a1", EffectKind::OutputFlash));
        app.on_tick(now + Duration::from_secs(2));
        assert!(!app.has_effect("a1", EffectKind::OutputFlash));
    }

    #[test]
    fn trace_toggle_fetches_history_once() {
        let (mut app, mut rx) = seeded();
        app.handle_key(key(KeyCode::Char('t')));
        assert!(app.show_trace);
        match rx.try_recv() {
            Ok(BackendCommand::FetchHistory { agent_id }) => assert_eq!(agent_id, "a1"),
            other => panic!("expected FetchHistory, got {other:?}"),
        }
        app.handle_key(key(KeyCode::Char('t')));
        app.handle_key(key(KeyCode::Char('t')));
        assert!(rx.try_recv().is_err());

        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::History("a1".to_string()),
                result: Ok(ActionResult::History(vec![HistoryEntry {
                    progress: "Cloned".to_string(),
                    ..HistoryEntry::default()
                }])),
            },
            Instant::now(),
        );
        assert_eq!(app.sync.card("a1").unwrap().trace.text(), "#1 Cloned\n");
    }

    #[test]
    fn history_for_deleted_card_is_dropped() {
        let (mut app, _rx) = seeded();
        app.sync.record_deletion("a1");
        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::History("a1".to_string()),
                result: Ok(ActionResult::History(vec![HistoryEntry::default()])),
            },
            Instant::now(),
        );
        assert!(app.sync.card("a1").is_none());
    }

    #[test]
    fn create_form_validates_before_sending() {
        let (mut app, mut rx) = seeded();
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(app.mode, Mode::Create);
        app.handle_key(ctrl('s'));
        assert_eq!(
            app.create_form.as_ref().unwrap().form.error.as_deref(),
            Some("Please add at least one task.")
        );
        assert!(rx.try_recv().is_err());

        // Focus the task title field and type.
        for _ in 0..4 {
            app.handle_key(key(KeyCode::Tab));
        }
        app.handle_paste("Fix the flaky test".to_string());
        app.handle_key(ctrl('a'));
        assert_eq!(app.create_form.as_ref().unwrap().drafts.len(), 1);

        app.handle_key(ctrl('s'));
        match rx.try_recv() {
            Ok(BackendCommand::CreateAgents { request }) => {
                assert_eq!(request.repo_url, "https://github.com/o/r");
                assert_eq!(request.github_token, "ghp_test");
                assert_eq!(request.tasks[0].title, "Fix the flaky test");
            }
            other => panic!("expected CreateAgents, got {other:?}"),
        }

        // Second submit while pending is ignored.
        app.handle_key(ctrl('s'));
        assert!(rx.try_recv().is_err());

        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::Create,
                result: Ok(ActionResult::Created(CreateAgentResponse {
                    success: true,
                    agent_ids: vec!["a3".to_string()],
                    ..CreateAgentResponse::default()
                })),
            },
            Instant::now(),
        );
        assert_eq!(app.mode, Mode::Browse);
        assert!(app.create_form.is_none());
        assert!(matches!(rx.try_recv(), Ok(BackendCommand::Refresh)));
    }

    #[test]
    fn review_cycles_kind_and_submits() {
        let (mut app, mut rx) = seeded();
        app.handle_key(key(KeyCode::Char('r')));
        assert_eq!(app.mode, Mode::Review);
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Tab));
        app.handle_paste("Ship it".to_string());
        app.handle_key(ctrl('s'));
        match rx.try_recv() {
            Ok(BackendCommand::SubmitReview { agent_id, review }) => {
                assert_eq!(agent_id, "a1");
                assert_eq!(review.kind, ReviewKind::Approve);
                assert_eq!(review.feedback, "Ship it");
            }
            other => panic!("expected SubmitReview, got {other:?}"),
        }
    }

    #[test]
    fn models_form_loads_once() {
        let (mut app, mut rx) = make_app();
        app.handle_key(key(KeyCode::Char('m')));
        assert!(matches!(rx.try_recv(), Ok(BackendCommand::LoadModels)));
        app.apply_backend_event(
            BackendEvent::ActionDone {
                key: ActionKey::LoadModels,
                result: Ok(ActionResult::ModelsLoaded(ModelConfig {
                    orchestrator_model: "o".to_string(),
                    aider_model: "a".to_string(),
                    agent_model: "g".to_string(),
                    aider_prompt_suffix: None,
                })),
            },
            Instant::now(),
        );
        app.handle_key(key(KeyCode::Esc));
        app.handle_key(key(KeyCode::Char('m')));
        assert!(rx.try_recv().is_err());
        assert!(app.models_form.as_ref().unwrap().loaded);
    }

    #[test]
    fn push_alert_and_connection_indicator() {
        let (mut app, _rx) = seeded();
        let now = Instant::now();
        app.apply_backend_event(BackendEvent::Connection(ConnectionState::Connected), now);
        app.apply_backend_event(BackendEvent::Connection(ConnectionState::Disconnected), now);
        assert_eq!(app.connection, ConnectionState::Disconnected);

        app.apply_backend_event(
            BackendEvent::Push(PushEvent::AgentError {
                agent_id: Some("a2".to_string()),
                error: "aider crashed".to_string(),
            }),
            now,
        );
        assert!(app.has_effect("a2", EffectKind::ErrorShake));
        assert_eq!(app.toast.as_ref().unwrap().message, "a2: aider crashed");
    }

    #[test]
    fn poll_failure_leaves_state() {
        let (mut app, _rx) = seeded();
        app.apply_backend_event(
            BackendEvent::PollFailed {
                message: "server unreachable".to_string(),
                failures: 1,
            },
            Instant::now(),
        );
        assert_eq!(app.visible_cards().len(), 2);
        assert_eq!(
            app.toast.as_ref().unwrap().message,
            "Refresh failed: server unreachable"
        );
    }

    #[test]
    fn copy_requests_selected_output() {
        let (mut app, _rx) = seeded();
        app.handle_key(key(KeyCode::Char('y')));
        assert_eq!(app.take_clipboard_request().as_deref(), Some("Hello"));
        assert_eq!(app.take_clipboard_request(), None);

        app.select_next();
        app.handle_key(key(KeyCode::Char('y')));
        assert_eq!(app.take_clipboard_request(), None);
    }

    #[test]
    fn quit_sends_command() {
        let (mut app, mut rx) = make_app();
        app.handle_key(key(KeyCode::Char('q')));
        assert!(app.should_quit);
        assert!(matches!(rx.try_recv(), Ok(BackendCommand::Quit)));
    }

    #[test]
    fn selection_wraps() {
        let (mut app, _rx) = seeded();
        app.select_prev();
        assert_eq!(app.selected_id().as_deref(), Some("a2"));
        app.select_next();
        assert_eq!(app.selected_id().as_deref(), Some("a1"));
    }

    #[test]
    fn list_click_selects_row() {
        let (mut app, _rx) = seeded();
        app.list_area.set(Rect::new(0, 0, 30, 10));
        app.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 5,
            row: 2,
            modifiers: KeyModifiers::NONE,
        });
        assert_eq!(app.selected_id().as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn poll_backend_drains_channel() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(4);
        let (event_tx, event_rx) = mpsc::channel(4);
        let mut app = UiApp::new(cmd_tx, event_rx, 3, None);
        event_tx
            .send(BackendEvent::Snapshot(document(&[("a1", "Fix login", "")])))
            .await
            .unwrap();
        event_tx
            .send(BackendEvent::Connection(ConnectionState::Connected))
            .await
            .unwrap();
        app.on_tick(Instant::now());
        assert_eq!(app.sync.len(), 1);
        assert_eq!(app.connection, ConnectionState::Connected);
    }
}
