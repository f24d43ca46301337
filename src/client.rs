use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    ActionResponse, CreateAgentRequest, CreateAgentResponse, GithubIssue, HistoryEntry,
    HistoryResponse, ModelConfig, ModelConfigResponse, ReviewRequest, TasksDocument,
};

/// Backend operations used by the dashboard and the CLI.
///
/// Abstracted behind a trait so the backend actor can be driven by a fake
/// in tests.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn fetch_tasks(&self) -> ApiResult<TasksDocument>;
    async fn fetch_history(&self, agent_id: &str) -> ApiResult<Vec<HistoryEntry>>;
    async fn create_agents(&self, request: &CreateAgentRequest) -> ApiResult<CreateAgentResponse>;
    async fn delete_agent(&self, agent_id: &str) -> ApiResult<()>;
    async fn submit_review(&self, agent_id: &str, review: &ReviewRequest) -> ApiResult<()>;
    async fn fetch_model_config(&self) -> ApiResult<ModelConfig>;
    async fn save_model_config(&self, config: &ModelConfig) -> ApiResult<ModelConfig>;
    async fn fetch_github_issues(&self, repo_url: &str) -> ApiResult<Vec<GithubIssue>>;
}

pub struct HttpFleetClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpFleetClient {
    pub fn new(server_url: &str, timeout: Duration) -> ApiResult<Self> {
        let mut base = Url::parse(server_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build `base/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Rejected(format!("cannot use {} as a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        let response = self.http.get(url).send().await?;
        decode_response(response).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        decode_response(response).await
    }
}

async fn read_body(response: reqwest::Response) -> ApiResult<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    // Error bodies are usually `{ success: false, error }`; prefer that text.
    if let Ok(ActionResponse {
        error: Some(error), ..
    }) = serde_json::from_str::<ActionResponse>(&body)
    {
        return Err(ApiError::Rejected(error));
    }
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let body = read_body(response).await?;
    Ok(serde_json::from_str(&body)?)
}

fn check_ack(ack: ActionResponse, fallback: &str) -> ApiResult<()> {
    if ack.success {
        Ok(())
    } else {
        Err(ApiError::Rejected(
            ack.error.unwrap_or_else(|| fallback.to_string()),
        ))
    }
}

#[async_trait]
impl FleetApi for HttpFleetClient {
    async fn fetch_tasks(&self) -> ApiResult<TasksDocument> {
        let url = self.endpoint(&["tasks", "tasks.json"])?;
        let response = self.http.get(url).send().await?;
        let body = read_body(response).await?;
        Ok(TasksDocument::from_json(&body)?)
    }

    async fn fetch_history(&self, agent_id: &str) -> ApiResult<Vec<HistoryEntry>> {
        let url = self.endpoint(&["agent", agent_id, "history"])?;
        let response: HistoryResponse = self.get_json(url).await?;
        Ok(response.history)
    }

    async fn create_agents(&self, request: &CreateAgentRequest) -> ApiResult<CreateAgentResponse> {
        let url = self.endpoint(&["create_agent"])?;
        let response: CreateAgentResponse = self
            .send_json(reqwest::Method::POST, url, Some(request))
            .await?;
        if !response.success {
            return Err(ApiError::Rejected(
                response
                    .error
                    .or(response.message)
                    .unwrap_or_else(|| "agent creation failed".to_string()),
            ));
        }
        Ok(response)
    }

    async fn delete_agent(&self, agent_id: &str) -> ApiResult<()> {
        let url = self.endpoint(&["delete_agent", agent_id])?;
        let ack: ActionResponse = self
            .send_json::<(), _>(reqwest::Method::DELETE, url, None)
            .await?;
        check_ack(ack, "delete failed")
    }

    async fn submit_review(&self, agent_id: &str, review: &ReviewRequest) -> ApiResult<()> {
        let url = self.endpoint(&["submit_review", agent_id])?;
        let ack: ActionResponse = self
            .send_json(reqwest::Method::POST, url, Some(review))
            .await?;
        check_ack(ack, "review was not accepted")
    }

    async fn fetch_model_config(&self) -> ApiResult<ModelConfig> {
        let url = self.endpoint(&["config", "models"])?;
        let response: ModelConfigResponse = self.get_json(url).await?;
        match response {
            ModelConfigResponse {
                success: true,
                config: Some(config),
                ..
            } => Ok(config),
            other => Err(ApiError::Rejected(
                other
                    .error
                    .unwrap_or_else(|| "model configuration unavailable".to_string()),
            )),
        }
    }

    async fn save_model_config(&self, config: &ModelConfig) -> ApiResult<ModelConfig> {
        let url = self.endpoint(&["config", "models"])?;
        let response: ModelConfigResponse = self
            .send_json(reqwest::Method::POST, url, Some(config))
            .await?;
        if !response.success {
            return Err(ApiError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "model configuration was not saved".to_string()),
            ));
        }
        Ok(response.config.unwrap_or_else(|| config.clone()))
    }

    async fn fetch_github_issues(&self, repo_url: &str) -> ApiResult<Vec<GithubIssue>> {
        let mut url = self.endpoint(&["github_issues"])?;
        url.query_pairs_mut().append_pair("repo_url", repo_url);
        let value: Value = self.get_json(url).await?;
        match value {
            Value::Array(_) => Ok(serde_json::from_value(value)?),
            Value::Object(mut map) => {
                if let Some(issues) = map.remove("issues") {
                    return Ok(serde_json::from_value(issues)?);
                }
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unexpected issues response");
                Err(ApiError::Rejected(error.to_string()))
            }
            _ => Err(ApiError::Rejected("unexpected issues response".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentStatus, ReviewKind, TaskSpec};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpFleetClient {
        HttpFleetClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_tasks_decodes_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/tasks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agents": {
                    "a1": {"status": "in_progress", "task": "Fix login", "aider_output": "Hello"},
                    "a2": "garbage"
                },
                "repository_url": "https://github.com/o/r"
            })))
            .mount(&server)
            .await;

        let doc = client(&server).fetch_tasks().await.unwrap();
        assert_eq!(doc.agents.len(), 1);
        assert_eq!(doc.agents["a1"].status, AgentStatus::InProgress);
        assert_eq!(doc.agents["a1"].aider_output, "Hello");
        assert_eq!(doc.skipped, vec!["a2".to_string()]);
        assert_eq!(doc.repository_url.as_deref(), Some("https://github.com/o/r"));
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/tasks.json"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        match client(&server).fetch_tasks().await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_document_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/tasks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).fetch_tasks().await,
            Err(ApiError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn delete_encodes_agent_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/delete_agent/agent%201"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_agent("agent 1").await.unwrap();
    }

    #[tokio::test]
    async fn delete_rejection_carries_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/delete_agent/a1"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"success": false, "error": "Agent not found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).delete_agent("a1").await.unwrap_err();
        assert_eq!(err.user_message(), "Agent not found");
    }

    #[tokio::test]
    async fn review_posts_feedback_and_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit_review/a1"))
            .and(body_json(json!({"feedback": "Looks good", "type": "approve"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let review = ReviewRequest {
            feedback: "Looks good".to_string(),
            kind: ReviewKind::Approve,
        };
        client(&server).submit_review("a1", &review).await.unwrap();
    }

    #[tokio::test]
    async fn create_agents_reports_failure_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create_agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "Invalid token"})),
            )
            .mount(&server)
            .await;

        let request = CreateAgentRequest {
            repo_url: "https://github.com/o/r".to_string(),
            num_agents: 1,
            tasks: vec![TaskSpec {
                title: "Fix".to_string(),
                description: "Fix it".to_string(),
                acceptance_criteria: None,
            }],
            aider_commands: String::new(),
            github_token: "ghp_x".to_string(),
        };
        let err = client(&server).create_agents(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected(ref m) if m == "Invalid token"));
    }

    #[tokio::test]
    async fn create_agents_returns_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create_agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "agent_ids": ["a7", "a8"]})),
            )
            .mount(&server)
            .await;

        let request = CreateAgentRequest {
            repo_url: "https://github.com/o/r".to_string(),
            num_agents: 2,
            tasks: Vec::new(),
            aider_commands: String::new(),
            github_token: "ghp_x".to_string(),
        };
        let response = client(&server).create_agents(&request).await.unwrap();
        assert_eq!(response.agent_ids, vec!["a7".to_string(), "a8".to_string()]);
    }

    #[tokio::test]
    async fn history_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agent/a1/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "history": [{"progress": "Cloned", "thought": "Look around", "action": "ls"}]
            })))
            .mount(&server)
            .await;

        let history = client(&server).fetch_history("a1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "ls");
    }

    #[tokio::test]
    async fn model_config_roundtrip() {
        let server = MockServer::start().await;
        let config = json!({
            "orchestrator_model": "gpt-4o",
            "aider_model": "claude-3-5-sonnet",
            "agent_model": "gpt-4o-mini"
        });
        Mock::given(method("GET"))
            .and(path("/config/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "config": config.clone()})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/config/models"))
            .and(body_json(config.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        let fetched = api.fetch_model_config().await.unwrap();
        assert_eq!(fetched.aider_model, "claude-3-5-sonnet");
        let saved = api.save_model_config(&fetched).await.unwrap();
        assert_eq!(saved, fetched);
    }

    #[tokio::test]
    async fn github_issues_passes_repo_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/github_issues"))
            .and(query_param("repo_url", "https://github.com/o/r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"number": 12, "title": "Crash on start", "body": "Stack trace..."}
            ])))
            .mount(&server)
            .await;

        let issues = client(&server)
            .fetch_github_issues("https://github.com/o/r")
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].to_task_spec().description, "Stack trace...");
    }

    #[tokio::test]
    async fn github_issues_error_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/github_issues"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Repository not found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_github_issues("https://github.com/o/missing")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Repository not found");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/tasks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"agents": {}}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let api = HttpFleetClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = api.fetch_tasks().await.unwrap_err();
        assert_eq!(err.user_message(), "request timed out");
    }

    #[test]
    fn base_url_with_prefix_keeps_path() {
        let api =
            HttpFleetClient::new("http://fleet.local:5000/api", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.endpoint(&["tasks", "tasks.json"]).unwrap().as_str(),
            "http://fleet.local:5000/api/tasks/tasks.json"
        );
    }

    #[test]
    fn rejects_invalid_server_url() {
        assert!(matches!(
            HttpFleetClient::new("not a url", Duration::from_secs(1)),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
