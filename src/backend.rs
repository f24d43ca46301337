use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use url::Url;

use crate::app::{ActionKey, ActionResult, BackendCommand, BackendEvent};
use crate::client::FleetApi;
use crate::error::ApiError;
use crate::models::TasksDocument;
use crate::push::run_push_channel;

// ── PollGate ───────────────────────────────────────────────────────

/// Keeps polls from overlapping and spaces them out after failures.
#[derive(Debug, Default)]
pub struct PollGate {
    in_flight: bool,
    failures: u32,
    resume_at: Option<Instant>,
}

impl PollGate {
    /// Longest gap between polls while the server keeps failing.
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Claim the next poll. False while one is outstanding or backing off.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if self.in_flight || self.resume_at.is_some_and(|t| now < t) {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Record a finished poll and return the consecutive failure count.
    pub fn finish(&mut self, ok: bool, now: Instant, interval: Duration) -> u32 {
        self.in_flight = false;
        if ok {
            self.failures = 0;
            self.resume_at = None;
        } else {
            self.failures = self.failures.saturating_add(1);
            self.resume_at = Some(now + Self::backoff(interval, self.failures));
        }
        self.failures
    }

    /// Drop any backoff so an explicit refresh goes out immediately.
    pub fn clear_backoff(&mut self) {
        self.resume_at = None;
    }

    /// Delay before the next poll after `failures` consecutive failures.
    pub fn backoff(interval: Duration, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(10);
        interval.saturating_mul(factor).min(Self::MAX_BACKOFF)
    }
}

// ── Backend actor ──────────────────────────────────────────────────

/// The backend actor runs in `tokio::spawn` and owns all network I/O.
/// Requests run as spawned tasks; every result reaches the UI through
/// the one ordered `events` channel.
pub struct Backend {
    api: Arc<dyn FleetApi>,
    events: mpsc::Sender<BackendEvent>,
    poll_interval: Duration,
    push_url: Option<Url>,
    gate: PollGate,
}

impl Backend {
    pub fn new(
        api: Arc<dyn FleetApi>,
        events: mpsc::Sender<BackendEvent>,
        poll_interval: Duration,
        push_url: Option<Url>,
    ) -> Self {
        Self {
            api,
            events,
            poll_interval,
            push_url,
            gate: PollGate::new(),
        }
    }

    /// Run the backend event loop until `Quit` or the UI goes away.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<BackendCommand>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Some(url) = self.push_url.clone() {
            tokio::spawn(run_push_channel(url, self.events.clone(), shutdown_rx));
        }

        let (poll_tx, mut poll_rx) = mpsc::channel::<Result<TasksDocument, ApiError>>(1);

        // First tick fires immediately.
        let mut poll_tick = tokio::time::interval(self.poll_interval);
        poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(BackendCommand::Quit) | None => break,
                    Some(BackendCommand::Refresh) => {
                        self.gate.clear_backoff();
                        self.start_poll(&poll_tx);
                    }
                    Some(cmd) => self.spawn_action(cmd),
                },
                Some(result) = poll_rx.recv() => {
                    if !self.finish_poll(result).await {
                        break;
                    }
                }
                _ = poll_tick.tick() => self.start_poll(&poll_tx),
            }
        }

        let _ = shutdown_tx.send(true);
        tracing::debug!("backend stopped");
    }

    fn start_poll(&mut self, done: &mpsc::Sender<Result<TasksDocument, ApiError>>) {
        if !self.gate.try_begin(Instant::now()) {
            return;
        }
        let api = Arc::clone(&self.api);
        let done = done.clone();
        tokio::spawn(async move {
            let result = api.fetch_tasks().await;
            let _ = done.send(result).await;
        });
    }

    /// Forward a poll result. Returns false once the UI is gone.
    async fn finish_poll(&mut self, result: Result<TasksDocument, ApiError>) -> bool {
        let now = Instant::now();
        let event = match result {
            Ok(doc) => {
                self.gate.finish(true, now, self.poll_interval);
                if !doc.skipped.is_empty() {
                    tracing::warn!(skipped = ?doc.skipped, "ignored malformed agent entries");
                }
                BackendEvent::Snapshot(doc)
            }
            Err(e) => {
                let failures = self.gate.finish(false, now, self.poll_interval);
                tracing::warn!(
                    error = %e,
                    failures,
                    retry_in = ?PollGate::backoff(self.poll_interval, failures),
                    "status poll failed"
                );
                BackendEvent::PollFailed {
                    message: e.user_message(),
                    failures,
                }
            }
        };
        self.events.send(event).await.is_ok()
    }

    fn spawn_action(&self, cmd: BackendCommand) {
        let Some(key) = action_key(&cmd) else {
            return;
        };
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = run_action(api.as_ref(), cmd).await;
            if let Err(message) = &result {
                tracing::warn!(action = key.label(), error = %message, "action failed");
            }
            let _ = events.send(BackendEvent::ActionDone { key, result }).await;
        });
    }
}

fn action_key(cmd: &BackendCommand) -> Option<ActionKey> {
    Some(match cmd {
        BackendCommand::FetchHistory { agent_id } => ActionKey::History(agent_id.clone()),
        BackendCommand::DeleteAgent { agent_id } => ActionKey::Delete(agent_id.clone()),
        BackendCommand::DeleteAll { .. } => ActionKey::DeleteAll,
        BackendCommand::SubmitReview { agent_id, .. } => ActionKey::Review(agent_id.clone()),
        BackendCommand::CreateAgents { .. } => ActionKey::Create,
        BackendCommand::LoadModels => ActionKey::LoadModels,
        BackendCommand::SaveModels { .. } => ActionKey::SaveModels,
        BackendCommand::FetchIssues { .. } => ActionKey::ImportIssues,
        BackendCommand::Refresh | BackendCommand::Quit => return None,
    })
}

async fn run_action(api: &dyn FleetApi, cmd: BackendCommand) -> Result<ActionResult, String> {
    let msg = |e: ApiError| e.user_message();
    match cmd {
        BackendCommand::FetchHistory { agent_id } => {
            api.fetch_history(&agent_id)
                .await
                .map(ActionResult::History)
                .map_err(msg)
        }
        BackendCommand::DeleteAgent { agent_id } => {
            api.delete_agent(&agent_id).await.map_err(msg)?;
            tracing::info!(agent_id = %agent_id, "agent deleted");
            Ok(ActionResult::Deleted {
                ids: vec![agent_id],
                failed: Vec::new(),
            })
        }
        BackendCommand::DeleteAll { agent_ids } => {
            let results = futures::future::join_all(
                agent_ids.iter().map(|id| api.delete_agent(id)),
            )
            .await;
            let mut ids = Vec::new();
            let mut failed = Vec::new();
            for (id, result) in agent_ids.into_iter().zip(results) {
                match result {
                    Ok(()) => ids.push(id),
                    Err(e) => failed.push((id, e.user_message())),
                }
            }
            tracing::info!(deleted = ids.len(), failed = failed.len(), "bulk delete finished");
            Ok(ActionResult::Deleted { ids, failed })
        }
        BackendCommand::SubmitReview { agent_id, review } => {
            api.submit_review(&agent_id, &review).await.map_err(msg)?;
            Ok(ActionResult::Reviewed)
        }
        BackendCommand::CreateAgents { request } => {
            let response = api.create_agents(&request).await.map_err(msg)?;
            tracing::info!(agent_ids = ?response.agent_ids, "agents created");
            Ok(ActionResult::Created(response))
        }
        BackendCommand::LoadModels => api
            .fetch_model_config()
            .await
            .map(ActionResult::ModelsLoaded)
            .map_err(msg),
        BackendCommand::SaveModels { config } => api
            .save_model_config(&config)
            .await
            .map(ActionResult::ModelsSaved)
            .map_err(msg),
        BackendCommand::FetchIssues { repo_url } => {
            let issues = api.fetch_github_issues(&repo_url).await.map_err(msg)?;
            if issues.is_empty() {
                return Err("No open issues found.".to_string());
            }
            Ok(ActionResult::Issues(issues))
        }
        BackendCommand::Refresh | BackendCommand::Quit => {
            Err("not an action".to_string())
        }
    }
}
