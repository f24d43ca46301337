use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `cloning_progress` value meaning "not currently cloning".
pub const NOT_CLONING: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
    Abandoned,
    #[serde(other)]
    Unknown,
}

impl AgentStatus {
    /// Parse the backend's status string. Unrecognised values map to `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pending" => AgentStatus::Pending,
            "in_progress" | "in-progress" | "running" => AgentStatus::InProgress,
            "completed" | "complete" | "done" => AgentStatus::Completed,
            "error" | "failed" => AgentStatus::Error,
            "abandoned" => AgentStatus::Abandoned,
            _ => AgentStatus::Unknown,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::InProgress => "in_progress",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
            AgentStatus::Abandoned => "abandoned",
            AgentStatus::Unknown => "unknown",
        }
    }

    /// Terminal statuses no longer produce output.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::Abandoned
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One step of an agent's reasoning trace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub progress: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thought: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: String,
}

/// Server-reported state of a single agent.
///
/// Decoding is permissive: absent or `null` text fields become empty,
/// unknown statuses decode to [`AgentStatus::Unknown`], and a malformed
/// `cloning_progress` falls back to [`NOT_CLONING`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: AgentStatus,
    #[serde(default, deserialize_with = "lenient_string")]
    pub task: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub thought: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub progress: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub future: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub last_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub aider_output: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub pr_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub last_updated: Option<String>,
    /// `None` when the document carries no clone state for this agent.
    #[serde(default, deserialize_with = "lenient_opt_progress")]
    pub cloning_progress: Option<i32>,
    /// `None` when the document carries no history; the trace is then
    /// owned by `/agent/{id}/history` fetches.
    #[serde(default, deserialize_with = "lenient_opt_history")]
    pub history: Option<Vec<HistoryEntry>>,
}

impl Default for AgentSnapshot {
    fn default() -> Self {
        Self {
            id: String::new(),
            status: AgentStatus::Pending,
            task: String::new(),
            thought: None,
            progress: None,
            future: None,
            last_action: None,
            aider_output: String::new(),
            pr_url: None,
            last_updated: None,
            cloning_progress: None,
            history: None,
        }
    }
}

impl AgentSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Clone percentage while a clone is running.
    pub fn clone_percent(&self) -> Option<u8> {
        self.cloning_progress.and_then(percent_from_wire)
    }
}

/// Map the wire `cloning_progress` value to a displayable percentage.
pub fn percent_from_wire(value: i32) -> Option<u8> {
    if value < 0 {
        None
    } else {
        Some(value.min(100) as u8)
    }
}

/// Decoded body of `GET /tasks/tasks.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TasksDocument {
    pub agents: BTreeMap<String, AgentSnapshot>,
    pub repository_url: Option<String>,
    pub tasks: Value,
    /// Agent ids whose entries could not be decoded.
    pub skipped: Vec<String>,
}

#[derive(Deserialize)]
struct RawTasksDocument {
    #[serde(default)]
    agents: Option<serde_json::Map<String, Value>>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    repository_url: Option<String>,
    #[serde(default)]
    tasks: Value,
}

impl TasksDocument {
    /// Decode the status document. Only a non-object top level is an error;
    /// individual agent entries that fail to decode are skipped.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawTasksDocument = serde_json::from_str(text)?;
        let mut agents = BTreeMap::new();
        let mut skipped = Vec::new();

        for (id, value) in raw.agents.unwrap_or_default() {
            match serde_json::from_value::<AgentSnapshot>(value) {
                Ok(mut snapshot) => {
                    snapshot.id = id.clone();
                    agents.insert(id, snapshot);
                }
                Err(e) => {
                    tracing::warn!(agent_id = %id, error = %e, "skipping malformed agent entry");
                    skipped.push(id);
                }
            }
        }

        Ok(Self {
            agents,
            repository_url: raw.repository_url.filter(|url| !url.is_empty()),
            tasks: raw.tasks,
            skipped,
        })
    }
}

/// A task submitted with `POST /create_agent`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateAgentRequest {
    pub repo_url: String,
    pub num_agents: u32,
    pub tasks: Vec<TaskSpec>,
    pub aider_commands: String,
    pub github_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CreateAgentResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Generic `{ success, error? }` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    #[default]
    Comment,
    RequestChanges,
    Approve,
}

impl ReviewKind {
    pub fn all() -> &'static [ReviewKind] {
        &[
            ReviewKind::Comment,
            ReviewKind::RequestChanges,
            ReviewKind::Approve,
        ]
    }

    pub fn next(self) -> Self {
        match self {
            ReviewKind::Comment => ReviewKind::RequestChanges,
            ReviewKind::RequestChanges => ReviewKind::Approve,
            ReviewKind::Approve => ReviewKind::Comment,
        }
    }
}

impl fmt::Display for ReviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewKind::Comment => write!(f, "comment"),
            ReviewKind::RequestChanges => write!(f, "request_changes"),
            ReviewKind::Approve => write!(f, "approve"),
        }
    }
}

impl std::str::FromStr for ReviewKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "comment" => Ok(ReviewKind::Comment),
            "request_changes" | "changes" => Ok(ReviewKind::RequestChanges),
            "approve" => Ok(ReviewKind::Approve),
            _ => Err(anyhow::anyhow!(
                "Unknown review kind: {s}. Use 'comment', 'request_changes', or 'approve'."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRequest {
    pub feedback: String,
    #[serde(rename = "type")]
    pub kind: ReviewKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub orchestrator_model: String,
    #[serde(default)]
    pub aider_model: String,
    #[serde(default)]
    pub agent_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aider_prompt_suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ModelConfigResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub config: Option<ModelConfig>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default, deserialize_with = "lenient_history")]
    pub history: Vec<HistoryEntry>,
}

/// An issue returned by `/github_issues`, used to pre-fill task drafts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct GithubIssue {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub html_url: Option<String>,
}

impl GithubIssue {
    pub fn to_task_spec(&self) -> TaskSpec {
        TaskSpec {
            title: self.title.clone(),
            description: self
                .description
                .clone()
                .or_else(|| self.body.clone())
                .unwrap_or_default(),
            acceptance_criteria: None,
        }
    }
}

/// Extra status detail carried by `agent_status_update` push events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateInfo {
    #[serde(default)]
    pub stream_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub last_error: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub conversation_phase: Option<String>,
}

// ── Lenient field decoders ──────────────────────────────────────────

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(value).unwrap_or_default())
}

pub(crate) fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(value))
}

pub(crate) fn lenient_status<'de, D>(deserializer: D) -> Result<AgentStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => AgentStatus::from_wire(&s),
        Value::Null => AgentStatus::Pending,
        _ => AgentStatus::Unknown,
    })
}

fn progress_from_value(value: Value) -> i32 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v >= 0.0 => v.min(100.0) as i32,
        _ => NOT_CLONING,
    }
}

pub(crate) fn lenient_progress<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(progress_from_value(Value::deserialize(deserializer)?))
}

/// Like [`lenient_progress`], but `null` stays `None`.
fn lenient_opt_progress<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok((!value.is_null()).then(|| progress_from_value(value)))
}

fn history_from_items(items: Vec<Value>) -> Vec<HistoryEntry> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

fn lenient_history<'de, D>(deserializer: D) -> Result<Vec<HistoryEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(history_from_items(items)),
        _ => Ok(Vec::new()),
    }
}

/// Only an array counts as a history; anything else is treated as absent.
fn lenient_opt_history<'de, D>(deserializer: D) -> Result<Option<Vec<HistoryEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(Some(history_from_items(items))),
        _ => Ok(None),
    }
}
