//! Client-side agent view state and the reconciliation rules that keep it
//! in step with server snapshots and push events.
//!
//! Every update path (full snapshot, push event, history fetch) funnels
//! into [`apply_field_updates`], so the same field produces the same
//! mutation no matter which channel delivered it.

use std::collections::{HashMap, HashSet};

use crate::models::{percent_from_wire, AgentSnapshot, AgentStatus, HistoryEntry, StateInfo};
use crate::push::PushEvent;
use crate::text::{char_len, format_timestamp};

pub const PLACEHOLDER_THOUGHT: &str = "Thinking…";
pub const PLACEHOLDER_PROGRESS: &str = "Planning…";
pub const PLACEHOLDER_FUTURE: &str = "No next steps yet";
pub const PLACEHOLDER_ACTION: &str = "No actions yet";

/// A scrollable block of text. `scroll_top` is the first visible row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollPanel {
    text: String,
    line_count: usize,
    scroll_top: usize,
    viewport_rows: usize,
}

impl ScrollPanel {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn viewport_rows(&self) -> usize {
        self.viewport_rows
    }

    pub fn max_scroll(&self) -> usize {
        self.line_count.saturating_sub(self.viewport_rows)
    }

    /// Rows of content below the viewport.
    pub fn rows_below(&self) -> usize {
        self.line_count
            .saturating_sub(self.scroll_top)
            .saturating_sub(self.viewport_rows)
    }

    pub fn is_near_bottom(&self, threshold: usize) -> bool {
        self.rows_below() < threshold.max(1)
    }

    fn set_text(&mut self, text: String) {
        self.line_count = text.lines().count();
        self.text = text;
        self.scroll_top = self.scroll_top.min(self.max_scroll());
    }

    fn append(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        self.line_count = self.text.lines().count();
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.max_scroll();
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_top = 0;
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.scroll_top = self.scroll_top.saturating_sub(rows);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.scroll_top = (self.scroll_top + rows).min(self.max_scroll());
    }

    /// Resize the viewport. A panel pinned to the bottom stays pinned.
    pub fn set_viewport(&mut self, rows: usize) {
        if rows == self.viewport_rows {
            return;
        }
        let pinned = self.rows_below() == 0;
        self.viewport_rows = rows;
        if pinned {
            self.scroll_to_bottom();
        } else {
            self.scroll_top = self.scroll_top.min(self.max_scroll());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BadgeTone {
    #[default]
    Neutral,
    Active,
    Success,
    Warning,
    Danger,
    Muted,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusBadge {
    /// `None` until the first status arrives.
    pub status: Option<AgentStatus>,
    pub label: String,
    pub tone: BadgeTone,
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Badge label and tone for a status, refined by push state detail.
pub fn badge_for(status: &AgentStatus, info: Option<&StateInfo>) -> (String, BadgeTone) {
    if let Some(info) = info {
        if info.stream_active == Some(false) && *status != AgentStatus::Abandoned {
            return if info.last_error.as_deref().is_some_and(|e| !e.is_empty()) {
                ("Error".to_string(), BadgeTone::Danger)
            } else {
                ("Stalled".to_string(), BadgeTone::Warning)
            };
        }
    }
    match status {
        AgentStatus::Pending => ("Pending".to_string(), BadgeTone::Neutral),
        AgentStatus::InProgress => {
            let phase = info
                .and_then(|i| i.conversation_phase.as_deref())
                .map(|p| p.trim().replace('_', " "))
                .filter(|p| !p.is_empty());
            match phase {
                Some(phase) => (capitalize(&phase), BadgeTone::Active),
                None => ("In progress".to_string(), BadgeTone::Active),
            }
        }
        AgentStatus::Completed => ("Completed".to_string(), BadgeTone::Success),
        AgentStatus::Error => ("Error".to_string(), BadgeTone::Danger),
        AgentStatus::Abandoned => ("Abandoned".to_string(), BadgeTone::Muted),
        AgentStatus::Unknown => ("Unknown".to_string(), BadgeTone::Neutral),
    }
}

/// Everything the detail view shows for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCard {
    pub id: String,
    pub task: String,
    pub badge: StatusBadge,
    pub thought: String,
    pub progress: String,
    pub future: String,
    pub last_action: String,
    /// Display-formatted last update time.
    pub last_updated: Option<String>,
    /// Revealed once; never retracted.
    pub pr_url: Option<String>,
    /// `None` hides the clone progress bar.
    pub clone_percent: Option<u8>,
    pub clone_error: Option<String>,
    pub error_state: bool,
    pub last_error: Option<String>,
    /// Latest push detail for the current status.
    pub state_info: Option<StateInfo>,
    pub history: Vec<HistoryEntry>,
    pub output: ScrollPanel,
    /// Reasoning trace rendered from `history`.
    pub trace: ScrollPanel,
}

impl AgentCard {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            task: String::new(),
            badge: StatusBadge::default(),
            thought: String::new(),
            progress: String::new(),
            future: String::new(),
            last_action: String::new(),
            last_updated: None,
            pr_url: None,
            clone_percent: None,
            clone_error: None,
            error_state: false,
            last_error: None,
            state_info: None,
            history: Vec::new(),
            output: ScrollPanel::default(),
            trace: ScrollPanel::default(),
        }
    }

    pub fn status(&self) -> Option<&AgentStatus> {
        self.badge.status.as_ref()
    }

    pub fn is_abandoned(&self) -> bool {
        self.badge.status == Some(AgentStatus::Abandoned)
    }
}

/// Per-agent client state: the rendered card plus length bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientViewState {
    /// Characters of output currently rendered.
    pub last_rendered_output_length: usize,
    /// Characters of trace currently rendered.
    pub last_rendered_debug_length: usize,
    pub card: AgentCard,
}

impl ClientViewState {
    fn new(id: &str) -> Self {
        Self {
            last_rendered_output_length: 0,
            last_rendered_debug_length: 0,
            card: AgentCard::new(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputUpdate {
    /// Full cumulative output from a snapshot.
    Replace(String),
    /// Incremental output from a push event.
    Append(String),
}

/// Field updates for one agent, from any source. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentPatch {
    pub task: Option<String>,
    pub status: Option<AgentStatus>,
    pub state_info: Option<StateInfo>,
    pub thought: Option<String>,
    pub progress: Option<String>,
    pub future: Option<String>,
    pub last_action: Option<String>,
    pub output: Option<OutputUpdate>,
    pub pr_url: Option<String>,
    pub last_updated: Option<String>,
    pub clone_progress: Option<i32>,
    pub clone_error: Option<String>,
    pub error: Option<String>,
    pub history: Option<Vec<HistoryEntry>>,
}

impl From<&AgentSnapshot> for AgentPatch {
    fn from(snapshot: &AgentSnapshot) -> Self {
        Self {
            task: Some(snapshot.task.clone()),
            status: Some(snapshot.status.clone()),
            thought: Some(snapshot.thought.clone().unwrap_or_default()),
            progress: Some(snapshot.progress.clone().unwrap_or_default()),
            future: Some(snapshot.future.clone().unwrap_or_default()),
            last_action: Some(snapshot.last_action.clone().unwrap_or_default()),
            output: Some(OutputUpdate::Replace(snapshot.aider_output.clone())),
            pr_url: snapshot.pr_url.clone(),
            last_updated: snapshot.last_updated.clone(),
            clone_progress: snapshot.cloning_progress,
            history: snapshot.history.clone(),
            ..Self::default()
        }
    }
}

impl From<&PushEvent> for AgentPatch {
    fn from(event: &PushEvent) -> Self {
        match event {
            PushEvent::AgentOutputUpdate {
                new_output,
                timestamp,
                ..
            } => Self {
                output: Some(OutputUpdate::Append(new_output.clone())),
                last_updated: timestamp.clone(),
                ..Self::default()
            },
            PushEvent::AgentStatusUpdate {
                status,
                state_info,
                last_updated,
                ..
            } => Self {
                status: status.clone(),
                state_info: state_info.clone(),
                last_updated: last_updated.clone(),
                ..Self::default()
            },
            PushEvent::AgentError { error, .. } => Self {
                error: Some(error.clone()),
                ..Self::default()
            },
            PushEvent::CloneProgress { progress, .. } => Self {
                clone_progress: Some(*progress),
                ..Self::default()
            },
            PushEvent::CloneError { error, .. } => Self {
                clone_error: Some(error.clone()),
                ..Self::default()
            },
        }
    }
}

/// Transient visual cue requested by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    StatusTransition,
    OutputFlash,
    TimestampFlash,
    ErrorShake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEffect {
    pub agent_id: String,
    pub kind: EffectKind,
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Ids that got a card this pass, in first-seen order.
    pub created: Vec<String>,
    /// Visible field changes across all cards.
    pub mutations: usize,
    pub badge_updates: usize,
    pub effects: Vec<CardEffect>,
    /// Snapshot entries ignored because the agent was deleted locally.
    pub skipped_deleted: usize,
    /// Error messages to surface to the user.
    pub alerts: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.mutations == 0 && self.alerts.is_empty()
    }

    pub fn effects_of(&self, kind: EffectKind) -> usize {
        self.effects.iter().filter(|e| e.kind == kind).count()
    }

    fn merge(&mut self, other: SyncReport) {
        self.created.extend(other.created);
        self.mutations += other.mutations;
        self.badge_updates += other.badge_updates;
        self.effects.extend(other.effects);
        self.skipped_deleted += other.skipped_deleted;
        self.alerts.extend(other.alerts);
    }
}

struct Journal<'a> {
    agent_id: &'a str,
    animate: bool,
    report: &'a mut SyncReport,
}

impl Journal<'_> {
    fn changed(&mut self) {
        self.report.mutations += 1;
    }

    fn effect(&mut self, kind: EffectKind) {
        if self.animate {
            self.report.effects.push(CardEffect {
                agent_id: self.agent_id.to_string(),
                kind,
            });
        }
    }

    fn alert(&mut self, message: String) {
        self.report.alerts.push(message);
    }
}

fn set_field(slot: &mut String, value: &str, journal: &mut Journal<'_>) -> bool {
    if slot.as_str() == value {
        return false;
    }
    slot.clear();
    slot.push_str(value);
    journal.changed();
    true
}

fn set_placeholder_field(
    slot: &mut String,
    value: &str,
    placeholder: &str,
    journal: &mut Journal<'_>,
) {
    let shown = if value.trim().is_empty() {
        placeholder
    } else {
        value
    };
    set_field(slot, shown, journal);
}

/// Apply cumulative text to a panel using the rendered-length rule:
/// longer text replaces and may follow the bottom; identical text is a
/// no-op; shorter or equal-but-different text replaces without scrolling.
/// Returns true when the text grew.
fn replace_panel_text(
    panel: &mut ScrollPanel,
    rendered_len: &mut usize,
    text: &str,
    near_bottom_rows: usize,
    journal: &mut Journal<'_>,
) -> bool {
    let new_len = char_len(text);
    if new_len > *rendered_len {
        let follow = panel.is_near_bottom(near_bottom_rows);
        panel.set_text(text.to_string());
        *rendered_len = new_len;
        if follow {
            panel.scroll_to_bottom();
        }
        journal.changed();
        true
    } else if panel.text() != text {
        tracing::debug!(
            agent_id = journal.agent_id,
            rendered = *rendered_len,
            incoming = new_len,
            "text shrank or diverged; resetting rendered length"
        );
        panel.set_text(text.to_string());
        *rendered_len = new_len;
        journal.changed();
        false
    } else {
        false
    }
}

/// Plain-text rendering of a reasoning history for the trace panel.
pub fn render_trace(history: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in history.iter().enumerate() {
        out.push_str(&format!("#{} {}\n", i + 1, entry.progress.trim()));
        if !entry.thought.trim().is_empty() {
            out.push_str(&format!("  thought: {}\n", entry.thought.trim()));
        }
        if !entry.action.trim().is_empty() {
            out.push_str(&format!("  action: {}\n", entry.action.trim()));
        }
    }
    out
}

/// Apply one patch to one agent's view. All update channels go through here.
fn apply_field_updates(
    view: &mut ClientViewState,
    patch: &AgentPatch,
    near_bottom_rows: usize,
    journal: &mut Journal<'_>,
) {
    let card = &mut view.card;

    if let Some(task) = &patch.task {
        set_field(&mut card.task, task, journal);
    }

    if patch.status.is_some() || patch.state_info.is_some() {
        let status = patch.status.clone().or_else(|| card.badge.status.clone());
        let transitioned = status.is_some() && card.badge.status != status;
        // Push detail sticks until the status itself changes.
        match &patch.state_info {
            Some(info) => card.state_info = Some(info.clone()),
            None if transitioned => card.state_info = None,
            None => {}
        }
        if let Some(status) = status {
            let (label, tone) = badge_for(&status, card.state_info.as_ref());
            if transitioned || card.badge.label != label || card.badge.tone != tone {
                card.badge = StatusBadge {
                    status: Some(status),
                    label,
                    tone,
                };
                journal.changed();
                journal.report.badge_updates += 1;
                if transitioned {
                    journal.effect(EffectKind::StatusTransition);
                }
            }
        }
        if let Some(err) = patch
            .state_info
            .as_ref()
            .and_then(|info| info.last_error.as_ref())
            .filter(|e| !e.is_empty())
        {
            if card.last_error.as_ref() != Some(err) {
                card.last_error = Some(err.clone());
                card.error_state = true;
                journal.changed();
                journal.alert(format!("{}: {err}", card.id));
            }
        }
    }

    if let Some(thought) = &patch.thought {
        set_placeholder_field(&mut card.thought, thought, PLACEHOLDER_THOUGHT, journal);
    }
    if let Some(progress) = &patch.progress {
        set_placeholder_field(&mut card.progress, progress, PLACEHOLDER_PROGRESS, journal);
    }
    if let Some(future) = &patch.future {
        set_placeholder_field(&mut card.future, future, PLACEHOLDER_FUTURE, journal);
    }
    if let Some(action) = &patch.last_action {
        set_placeholder_field(&mut card.last_action, action, PLACEHOLDER_ACTION, journal);
    }

    match &patch.output {
        Some(OutputUpdate::Replace(text)) => {
            let grew = replace_panel_text(
                &mut card.output,
                &mut view.last_rendered_output_length,
                text,
                near_bottom_rows,
                journal,
            );
            if grew {
                journal.effect(EffectKind::OutputFlash);
            }
        }
        Some(OutputUpdate::Append(chunk)) if !chunk.is_empty() => {
            let follow = card.output.is_near_bottom(near_bottom_rows);
            // Chunks are line-oriented: break the open line before appending.
            let rendered = card.output.text();
            let open_line = !rendered.is_empty() && !rendered.ends_with('\n');
            if open_line && !chunk.starts_with('\n') {
                card.output.append("\n");
            }
            card.output.append(chunk);
            view.last_rendered_output_length = char_len(card.output.text());
            if follow {
                card.output.scroll_to_bottom();
            }
            journal.changed();
            journal.effect(EffectKind::OutputFlash);
        }
        _ => {}
    }

    if let Some(url) = patch.pr_url.as_ref().map(|u| u.trim()).filter(|u| !u.is_empty()) {
        if card.pr_url.is_none() {
            card.pr_url = Some(url.to_string());
            journal.changed();
        }
    }

    if let Some(formatted) = patch.last_updated.as_deref().and_then(format_timestamp) {
        if card.last_updated.as_ref() != Some(&formatted) {
            card.last_updated = Some(formatted);
            journal.changed();
            journal.effect(EffectKind::TimestampFlash);
        }
    }

    if let Some(raw) = patch.clone_progress {
        let percent = percent_from_wire(raw);
        if card.clone_percent != percent {
            card.clone_percent = percent;
            journal.changed();
        }
    }

    if let Some(err) = &patch.clone_error {
        if card.clone_error.as_ref() != Some(err) {
            card.clone_error = Some(err.clone());
            card.clone_percent = None;
            journal.changed();
            journal.alert(format!("{}: clone failed: {err}", card.id));
        }
    }

    if let Some(err) = &patch.error {
        if !card.error_state || card.last_error.as_ref() != Some(err) {
            card.error_state = true;
            card.last_error = Some(err.clone());
            journal.changed();
        }
        journal.effect(EffectKind::ErrorShake);
        journal.alert(format!("{}: {err}", card.id));
    }

    if let Some(history) = &patch.history {
        if card.history != *history {
            card.history = history.clone();
            journal.changed();
        }
        let trace = render_trace(&card.history);
        replace_panel_text(
            &mut card.trace,
            &mut view.last_rendered_debug_length,
            &trace,
            near_bottom_rows,
            journal,
        );
    }
}

/// Owns every agent's client view state and reconciles it against
/// snapshots, push events and history fetches.
#[derive(Debug, Clone)]
pub struct AgentViewSynchronizer {
    views: HashMap<String, ClientViewState>,
    /// Card order: first-seen.
    order: Vec<String>,
    /// Ids deleted locally; snapshot entries and push events for them are ignored.
    deleted: HashSet<String>,
    near_bottom_rows: usize,
    output_rows: usize,
    trace_rows: usize,
}

impl Default for AgentViewSynchronizer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl AgentViewSynchronizer {
    pub fn new(near_bottom_rows: usize) -> Self {
        Self {
            views: HashMap::new(),
            order: Vec::new(),
            deleted: HashSet::new(),
            near_bottom_rows: near_bottom_rows.max(1),
            output_rows: 0,
            trace_rows: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn view(&self, id: &str) -> Option<&ClientViewState> {
        self.views.get(id)
    }

    pub fn card(&self, id: &str) -> Option<&AgentCard> {
        self.views.get(id).map(|v| &v.card)
    }

    pub fn card_mut(&mut self, id: &str) -> Option<&mut AgentCard> {
        self.views.get_mut(id).map(|v| &mut v.card)
    }

    /// Cards in display order.
    pub fn cards(&self) -> impl Iterator<Item = &AgentCard> {
        self.order
            .iter()
            .filter_map(move |id| self.views.get(id).map(|v| &v.card))
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// Viewport sizes of the output and trace panels, applied to every card.
    pub fn set_viewports(&mut self, output_rows: usize, trace_rows: usize) {
        self.output_rows = output_rows;
        self.trace_rows = trace_rows;
        for view in self.views.values_mut() {
            view.card.output.set_viewport(output_rows);
            view.card.trace.set_viewport(trace_rows);
        }
    }

    fn ensure_view(&mut self, id: &str, report: &mut SyncReport) -> bool {
        if self.views.contains_key(id) {
            return false;
        }
        let mut view = ClientViewState::new(id);
        view.card.output.set_viewport(self.output_rows);
        view.card.trace.set_viewport(self.trace_rows);
        self.views.insert(id.to_string(), view);
        self.order.push(id.to_string());
        report.created.push(id.to_string());
        true
    }

    fn apply_patch(&mut self, id: &str, patch: &AgentPatch, animate: bool) -> SyncReport {
        let mut report = SyncReport::default();
        let near_bottom_rows = self.near_bottom_rows;
        if let Some(view) = self.views.get_mut(id) {
            let mut journal = Journal {
                agent_id: id,
                animate,
                report: &mut report,
            };
            apply_field_updates(view, patch, near_bottom_rows, &mut journal);
        }
        report
    }

    /// Reconcile a full status snapshot. Unseen ids get a card (without
    /// transition effects); ids absent from the snapshot are left as is.
    pub fn reconcile<'a, I>(&mut self, snapshots: I) -> SyncReport
    where
        I: IntoIterator<Item = (&'a String, &'a AgentSnapshot)>,
    {
        let mut report = SyncReport::default();
        for (id, snapshot) in snapshots {
            if self.deleted.contains(id) {
                report.skipped_deleted += 1;
                continue;
            }
            let created = self.ensure_view(id, &mut report);
            let patch = AgentPatch::from(snapshot);
            let pass = self.apply_patch(id, &patch, !created);
            report.merge(pass);
        }
        report
    }

    /// Apply a push event. Events for unknown or deleted agents are dropped;
    /// an `agent_error` without an id only raises an alert.
    pub fn apply_push_event(&mut self, event: &PushEvent) -> SyncReport {
        let Some(id) = event.agent_id() else {
            let mut report = SyncReport::default();
            if let PushEvent::AgentError { error, .. } = event {
                report.alerts.push(error.clone());
            }
            return report;
        };
        if self.deleted.contains(id) || !self.views.contains_key(id) {
            tracing::debug!(agent_id = id, event = event.name(), "dropping push event for unknown agent");
            return SyncReport::default();
        }
        let id = id.to_string();
        self.apply_patch(&id, &AgentPatch::from(event), true)
    }

    /// Apply a fetched history. Returns `None` when the card is gone.
    pub fn apply_history(&mut self, id: &str, history: Vec<HistoryEntry>) -> Option<SyncReport> {
        if self.deleted.contains(id) || !self.views.contains_key(id) {
            tracing::debug!(agent_id = id, "discarding history for missing card");
            return None;
        }
        let patch = AgentPatch {
            history: Some(history),
            ..AgentPatch::default()
        };
        Some(self.apply_patch(id, &patch, true))
    }

    /// Drop an agent's view state. Idempotent.
    pub fn evict_agent(&mut self, id: &str) -> bool {
        let removed = self.views.remove(id).is_some();
        if removed {
            self.order.retain(|known| known != id);
        }
        removed
    }

    /// Evict an agent and ignore it in all later snapshots and push events.
    pub fn record_deletion(&mut self, id: &str) -> bool {
        self.deleted.insert(id.to_string());
        self.evict_agent(id)
    }
}
