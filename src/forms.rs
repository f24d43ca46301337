use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::models::{CreateAgentRequest, GithubIssue, ModelConfig, ReviewKind, TaskSpec};
use crate::ui::state::TextInput;

pub const MAX_AGENTS: u32 = 20;

#[derive(Debug, Clone)]
pub struct FormField {
    pub label: &'static str,
    pub input: TextInput,
    /// Rendered masked.
    pub secret: bool,
}

impl FormField {
    fn single(label: &'static str) -> Self {
        Self {
            label,
            input: TextInput::single_line(),
            secret: false,
        }
    }

    fn multi(label: &'static str) -> Self {
        Self {
            label,
            input: TextInput::multi_line(),
            secret: false,
        }
    }

    fn secret(label: &'static str) -> Self {
        Self {
            secret: true,
            ..Self::single(label)
        }
    }

    pub fn value(&self) -> String {
        self.input.text().trim().to_string()
    }
}

/// A column of labelled inputs with one focused field.
#[derive(Debug, Clone)]
pub struct Form {
    pub fields: Vec<FormField>,
    pub focus: usize,
    /// Validation or submission error shown under the fields.
    pub error: Option<String>,
}

impl Form {
    fn new(fields: Vec<FormField>) -> Self {
        Self {
            fields,
            focus: 0,
            error: None,
        }
    }

    pub fn focused(&self) -> &FormField {
        &self.fields[self.focus]
    }

    pub fn focused_mut(&mut self) -> &mut FormField {
        &mut self.fields[self.focus]
    }

    pub fn focus_next(&mut self) {
        self.focus = (self.focus + 1) % self.fields.len();
    }

    pub fn focus_prev(&mut self) {
        self.focus = if self.focus == 0 {
            self.fields.len() - 1
        } else {
            self.focus - 1
        };
    }

    fn value(&self, idx: usize) -> String {
        self.fields[idx].value()
    }

    fn set(&mut self, idx: usize, text: &str) {
        self.fields[idx].input.set_text(text);
    }

    /// Route an editing key to the focused field. Returns false for keys
    /// the form does not consume.
    pub fn handle_edit_key(&mut self, key: KeyEvent) -> bool {
        let multiline = self.focused().input.is_multiline();
        match key.code {
            KeyCode::Tab => {
                self.focus_next();
                return true;
            }
            KeyCode::BackTab => {
                self.focus_prev();
                return true;
            }
            KeyCode::Enter | KeyCode::Down if !multiline => {
                self.focus_next();
                return true;
            }
            KeyCode::Up if !multiline => {
                self.focus_prev();
                return true;
            }
            _ => {}
        }

        let input = &mut self.focused_mut().input;
        match key.code {
            KeyCode::Enter => input.insert_newline(),
            KeyCode::Up => input.move_up(),
            KeyCode::Down => input.move_down(),
            KeyCode::Backspace => input.backspace(),
            KeyCode::Delete => input.delete_forward(),
            KeyCode::Left => input.move_left(),
            KeyCode::Right => input.move_right(),
            KeyCode::Home => input.move_home(),
            KeyCode::End => input.move_end(),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                input.insert_char(ch)
            }
            _ => return false,
        }
        true
    }

    pub fn paste(&mut self, text: &str) {
        self.focused_mut().input.insert_text(text);
    }
}

// ── Create agents ───────────────────────────────────────────────────

const REPO_URL: usize = 0;
const AGENT_COUNT: usize = 1;
const AIDER_COMMANDS: usize = 2;
const GITHUB_TOKEN: usize = 3;
const TASK_TITLE: usize = 4;
const TASK_DESCRIPTION: usize = 5;
const TASK_CRITERIA: usize = 6;

#[derive(Debug, Clone)]
pub struct CreateForm {
    pub form: Form,
    pub drafts: Vec<TaskSpec>,
}

impl CreateForm {
    pub fn new(repo_url: Option<&str>, github_token: Option<&str>) -> Self {
        let mut form = Form::new(vec![
            FormField::single("Repository URL"),
            FormField::single("Agents"),
            FormField::single("Aider commands"),
            FormField::secret("GitHub token"),
            FormField::single("Task title"),
            FormField::multi("Task description"),
            FormField::multi("Acceptance criteria"),
        ]);
        form.set(AGENT_COUNT, "1");
        if let Some(url) = repo_url {
            form.set(REPO_URL, url);
        }
        if let Some(token) = github_token {
            form.set(GITHUB_TOKEN, token);
        }
        Self {
            form,
            drafts: Vec::new(),
        }
    }

    pub fn repo_url(&self) -> String {
        self.form.value(REPO_URL)
    }

    fn task_draft(&self) -> Option<TaskSpec> {
        let title = self.form.value(TASK_TITLE);
        if title.is_empty() {
            return None;
        }
        let description = self.form.value(TASK_DESCRIPTION);
        let criteria = self.form.value(TASK_CRITERIA);
        Some(TaskSpec {
            description: if description.is_empty() {
                title.clone()
            } else {
                description
            },
            title,
            acceptance_criteria: (!criteria.is_empty()).then_some(criteria),
        })
    }

    /// Move the task fields into the draft list.
    pub fn add_draft(&mut self) -> Result<(), String> {
        let draft = self
            .task_draft()
            .ok_or_else(|| "Task title is required.".to_string())?;
        self.drafts.push(draft);
        for idx in [TASK_TITLE, TASK_DESCRIPTION, TASK_CRITERIA] {
            self.form.fields[idx].input.clear();
        }
        self.form.focus = TASK_TITLE;
        self.form.error = None;
        Ok(())
    }

    pub fn remove_last_draft(&mut self) -> Option<TaskSpec> {
        self.drafts.pop()
    }

    /// Imported issues replace the current drafts.
    pub fn import_issues(&mut self, issues: &[GithubIssue]) -> usize {
        self.drafts = issues.iter().map(GithubIssue::to_task_spec).collect();
        self.drafts.len()
    }

    /// Validate and build the request. A filled-in task that was not yet
    /// added is included.
    pub fn build_request(&self) -> Result<CreateAgentRequest, String> {
        let repo_url = self.repo_url();
        if repo_url.is_empty() {
            return Err("Please enter a repository URL.".to_string());
        }
        let valid_url = repo_url.starts_with("git@")
            || url::Url::parse(&repo_url)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
        if !valid_url {
            return Err(format!("Not a repository URL: {repo_url}"));
        }

        let count_text = self.form.value(AGENT_COUNT);
        let num_agents = if count_text.is_empty() {
            1
        } else {
            match count_text.parse::<u32>() {
                Ok(n) if (1..=MAX_AGENTS).contains(&n) => n,
                _ => return Err(format!("Agent count must be between 1 and {MAX_AGENTS}.")),
            }
        };

        let mut tasks = self.drafts.clone();
        if let Some(pending) = self.task_draft() {
            tasks.push(pending);
        }
        if tasks.is_empty() {
            return Err("Please add at least one task.".to_string());
        }

        let github_token = self.form.value(GITHUB_TOKEN);
        if github_token.is_empty() {
            return Err("A GitHub token is required (set GITHUB_TOKEN).".to_string());
        }

        Ok(CreateAgentRequest {
            repo_url,
            num_agents,
            tasks,
            aider_commands: self.form.value(AIDER_COMMANDS),
            github_token,
        })
    }
}

// ── Review ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReviewForm {
    pub agent_id: String,
    pub kind: ReviewKind,
    pub form: Form,
}

impl ReviewForm {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            kind: ReviewKind::Comment,
            form: Form::new(vec![FormField::multi("Feedback")]),
        }
    }

    pub fn feedback(&self) -> String {
        self.form.value(0)
    }

    pub fn validate(&self) -> Result<String, String> {
        let feedback = self.feedback();
        if feedback.is_empty() {
            Err("Feedback cannot be empty.".to_string())
        } else {
            Ok(feedback)
        }
    }
}

// ── Model configuration ────────────────────────────────────────────

const ORCHESTRATOR_MODEL: usize = 0;
const AIDER_MODEL: usize = 1;
const AGENT_MODEL: usize = 2;
const PROMPT_SUFFIX: usize = 3;

#[derive(Debug, Clone)]
pub struct ModelsForm {
    pub form: Form,
    /// False until the current config has been fetched.
    pub loaded: bool,
}

impl Default for ModelsForm {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelsForm {
    pub fn new() -> Self {
        Self {
            form: Form::new(vec![
                FormField::single("Orchestrator model"),
                FormField::single("Aider model"),
                FormField::single("Agent model"),
                FormField::multi("Aider prompt suffix"),
            ]),
            loaded: false,
        }
    }

    pub fn fill(&mut self, config: &ModelConfig) {
        self.form.set(ORCHESTRATOR_MODEL, &config.orchestrator_model);
        self.form.set(AIDER_MODEL, &config.aider_model);
        self.form.set(AGENT_MODEL, &config.agent_model);
        self.form
            .set(PROMPT_SUFFIX, config.aider_prompt_suffix.as_deref().unwrap_or(""));
        self.loaded = true;
        self.form.error = None;
    }

    pub fn build_config(&self) -> Result<ModelConfig, String> {
        let config = ModelConfig {
            orchestrator_model: self.form.value(ORCHESTRATOR_MODEL),
            aider_model: self.form.value(AIDER_MODEL),
            agent_model: self.form.value(AGENT_MODEL),
            aider_prompt_suffix: Some(self.form.value(PROMPT_SUFFIX)).filter(|s| !s.is_empty()),
        };
        if config.orchestrator_model.is_empty()
            || config.aider_model.is_empty()
            || config.agent_model.is_empty()
        {
            return Err("All three model names are required.".to_string());
        }
        Ok(config)
    }
}
