use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::app::BackendEvent;
use crate::models::{lenient_opt_string, lenient_progress, lenient_string, AgentStatus, StateInfo};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A decoded server-initiated notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Incremental output to append to an agent's output panel.
    AgentOutputUpdate {
        agent_id: String,
        new_output: String,
        timestamp: Option<String>,
    },
    AgentStatusUpdate {
        agent_id: String,
        status: Option<AgentStatus>,
        state_info: Option<StateInfo>,
        last_updated: Option<String>,
    },
    /// Agent-level error. Without an id it is only surfaced as a toast.
    AgentError {
        agent_id: Option<String>,
        error: String,
    },
    CloneProgress {
        agent_id: String,
        progress: i32,
    },
    CloneError {
        agent_id: String,
        error: String,
    },
}

impl PushEvent {
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            PushEvent::AgentOutputUpdate { agent_id, .. }
            | PushEvent::AgentStatusUpdate { agent_id, .. }
            | PushEvent::CloneProgress { agent_id, .. }
            | PushEvent::CloneError { agent_id, .. } => Some(agent_id),
            PushEvent::AgentError { agent_id, .. } => agent_id.as_deref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::AgentOutputUpdate { .. } => "agent_output_update",
            PushEvent::AgentStatusUpdate { .. } => "agent_status_update",
            PushEvent::AgentError { .. } => "agent_error",
            PushEvent::CloneProgress { .. } => "clone_progress",
            PushEvent::CloneError { .. } => "clone_error",
        }
    }
}

/// Push channel health, shown as an indicator in the help bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Push disabled in settings; polling only.
    #[default]
    Disabled,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disabled => "polling",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "live",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Deserialize)]
struct OutputPayload {
    #[serde(deserialize_with = "lenient_string")]
    agent_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    new_output: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct StatusPayload {
    #[serde(deserialize_with = "lenient_string")]
    agent_id: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    status: Option<String>,
    #[serde(default)]
    state_info: Option<StateInfo>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    last_updated: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    agent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    error: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CloneProgressPayload {
    #[serde(deserialize_with = "lenient_string")]
    agent_id: String,
    #[serde(default = "not_cloning", deserialize_with = "lenient_progress")]
    progress: i32,
}

fn not_cloning() -> i32 {
    crate::models::NOT_CLONING
}

/// Split a frame into `(event name, payload)`.
///
/// Accepted shapes: `{"event": name, "data": {...}}`, a flat
/// `{"type": name, ...}` object, and socket.io `42["name", {...}]`.
fn split_frame(text: &str) -> Option<(String, Value)> {
    let body = text.trim().trim_start_matches(|c: char| c.is_ascii_digit());
    let value: Value = serde_json::from_str(body).ok()?;
    match value {
        Value::Array(mut items) if items.len() >= 2 => {
            let payload = items.swap_remove(1);
            let name = items.first()?.as_str()?.to_string();
            Some((name, payload))
        }
        Value::Object(mut map) => {
            if let Some(Value::String(name)) = map.get("event").cloned() {
                let payload = map.remove("data").unwrap_or(Value::Null);
                return Some((name, payload));
            }
            let name = map.get("type")?.as_str()?.to_string();
            Some((name, Value::Object(map)))
        }
        _ => None,
    }
}

fn non_empty(id: String) -> Option<String> {
    let trimmed = id.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Decode a text frame into a [`PushEvent`]. Unknown event names and
/// payloads without an agent id yield `None`.
pub fn parse_push_frame(text: &str) -> Option<PushEvent> {
    let (name, payload) = split_frame(text)?;
    match name.as_str() {
        "agent_output_update" => {
            let p: OutputPayload = serde_json::from_value(payload).ok()?;
            Some(PushEvent::AgentOutputUpdate {
                agent_id: non_empty(p.agent_id)?,
                new_output: p.new_output,
                timestamp: p.timestamp,
            })
        }
        "agent_status_update" => {
            let p: StatusPayload = serde_json::from_value(payload).ok()?;
            Some(PushEvent::AgentStatusUpdate {
                agent_id: non_empty(p.agent_id)?,
                status: p.status.as_deref().map(AgentStatus::from_wire),
                state_info: p.state_info,
                last_updated: p.last_updated,
            })
        }
        "agent_error" => {
            let p: ErrorPayload = serde_json::from_value(payload).ok()?;
            Some(PushEvent::AgentError {
                agent_id: p.agent_id.and_then(non_empty),
                error: p
                    .error
                    .or(p.message)
                    .unwrap_or_else(|| "Unknown agent error".to_string()),
            })
        }
        "clone_progress" => {
            let p: CloneProgressPayload = serde_json::from_value(payload).ok()?;
            Some(PushEvent::CloneProgress {
                agent_id: non_empty(p.agent_id)?,
                progress: p.progress,
            })
        }
        "clone_error" => {
            let p: ErrorPayload = serde_json::from_value(payload).ok()?;
            Some(PushEvent::CloneError {
                agent_id: p.agent_id.and_then(non_empty)?,
                error: p
                    .error
                    .or(p.message)
                    .unwrap_or_else(|| "Clone failed".to_string()),
            })
        }
        _ => None,
    }
}

/// Engine.IO / socket.io control packets the client must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// Answer with this frame.
    Reply(&'static str),
    /// The server closed the session.
    Close,
}

/// Classify socket.io housekeeping frames. Plain JSON frames and event
/// packets (`42[...]`) are not control frames.
fn control_frame(text: &str) -> Option<Control> {
    let text = text.trim();
    if text.starts_with("0{") {
        // Engine.IO open: join the default namespace.
        Some(Control::Reply("40"))
    } else if text == "2" {
        Some(Control::Reply("3"))
    } else if text == "1" || text.starts_with("41") || text.starts_with("44") {
        Some(Control::Close)
    } else {
        None
    }
}

/// Double the reconnect delay, capped at 30s.
pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Keep a WebSocket open to the push endpoint, forwarding decoded events
/// and connection state changes. Reconnects with exponential backoff until
/// `shutdown` fires or the event receiver goes away.
pub async fn run_push_channel(
    url: Url,
    events: mpsc::Sender<BackendEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if events
            .send(BackendEvent::Connection(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return;
        }

        let connect = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown.changed() => return,
        };

        match connect {
            Ok((mut ws, _response)) => {
                tracing::info!(url = %url, "push channel connected");
                backoff = INITIAL_BACKOFF;
                if events
                    .send(BackendEvent::Connection(ConnectionState::Connected))
                    .await
                    .is_err()
                {
                    return;
                }

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => match control_frame(&text) {
                                Some(Control::Reply(reply)) => {
                                    if let Err(e) = ws.send(Message::text(reply)).await {
                                        tracing::warn!(error = %e, "push channel write failed");
                                        break;
                                    }
                                }
                                Some(Control::Close) => {
                                    tracing::info!(frame = %text.as_str(), "push session closed by server");
                                    break;
                                }
                                None => match parse_push_frame(&text) {
                                    Some(event) => {
                                        if events.send(BackendEvent::Push(event)).await.is_err() {
                                            return;
                                        }
                                    }
                                    None => tracing::debug!(frame = %text.as_str(), "ignoring push frame"),
                                },
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "push channel read failed");
                                break;
                            }
                        },
                        _ = shutdown.changed() => {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                }
                tracing::info!("push channel closed");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, retry_in = ?backoff, "push connect failed");
            }
        }

        if events
            .send(BackendEvent::Connection(ConnectionState::Disconnected))
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }
        backoff = next_backoff(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_envelope() {
        let frame = r#"{"event":"agent_output_update","data":{"agent_id":"a1","new_output":"Step 2","timestamp":"2024-05-01T10:00:00"}}"#;
        assert_eq!(
            parse_push_frame(frame),
            Some(PushEvent::AgentOutputUpdate {
                agent_id: "a1".to_string(),
                new_output: "Step 2".to_string(),
                timestamp: Some("2024-05-01T10:00:00".to_string()),
            })
        );
    }

    #[test]
    fn parses_flat_type_object() {
        let frame = r#"{"type":"clone_progress","agent_id":"a1","progress":42}"#;
        assert_eq!(
            parse_push_frame(frame),
            Some(PushEvent::CloneProgress {
                agent_id: "a1".to_string(),
                progress: 42,
            })
        );
    }

    #[test]
    fn parses_socketio_packet() {
        let frame = r#"42["agent_status_update",{"agent_id":"a1","status":"completed","state_info":{"stream_active":false,"last_error":null}}]"#;
        match parse_push_frame(frame) {
            Some(PushEvent::AgentStatusUpdate {
                agent_id,
                status,
                state_info,
                ..
            }) => {
                assert_eq!(agent_id, "a1");
                assert_eq!(status, Some(AgentStatus::Completed));
                let info = state_info.unwrap();
                assert_eq!(info.stream_active, Some(false));
                assert_eq!(info.last_error, None);
            }
            other => panic!("expected status update, got {other:?}"),
        }
    }

    #[test]
    fn numeric_agent_id_is_stringified() {
        let frame = r#"{"event":"clone_error","data":{"agent_id":7,"error":"auth failed"}}"#;
        assert_eq!(
            parse_push_frame(frame),
            Some(PushEvent::CloneError {
                agent_id: "7".to_string(),
                error: "auth failed".to_string(),
            })
        );
    }

    #[test]
    fn agent_error_without_id() {
        let frame = r#"{"event":"agent_error","data":{"message":"orchestrator crashed"}}"#;
        let event = parse_push_frame(frame).unwrap();
        assert_eq!(event.agent_id(), None);
        assert_eq!(
            event,
            PushEvent::AgentError {
                agent_id: None,
                error: "orchestrator crashed".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert_eq!(parse_push_frame("not json"), None);
        assert_eq!(parse_push_frame(r#"{"event":"heartbeat","data":{}}"#), None);
        assert_eq!(parse_push_frame(r#"{"event":"agent_output_update","data":{"new_output":"x"}}"#), None);
        assert_eq!(parse_push_frame(r#"{"type":"clone_progress","agent_id":"  "}"#), None);
        assert_eq!(parse_push_frame("2"), None);
        assert_eq!(parse_push_frame("[]"), None);
    }

    #[test]
    fn missing_clone_progress_hides_bar() {
        let frame = r#"{"type":"clone_progress","agent_id":"a1"}"#;
        assert_eq!(
            parse_push_frame(frame),
            Some(PushEvent::CloneProgress {
                agent_id: "a1".to_string(),
                progress: -1,
            })
        );
    }

    #[test]
    fn backoff_doubles_to_cap() {
        let mut delay = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test]
    async fn forwards_events_from_live_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text(
                r#"{"event":"agent_output_update","data":{"agent_id":"a1","new_output":"hi"}}"#,
            ))
            .await
            .unwrap();
            // Hold the socket open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let task = tokio::spawn(run_push_channel(url, tx, shutdown_rx));

        assert!(matches!(
            rx.recv().await,
            Some(BackendEvent::Connection(ConnectionState::Connecting))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(BackendEvent::Connection(ConnectionState::Connected))
        ));
        match rx.recv().await {
            Some(BackendEvent::Push(PushEvent::AgentOutputUpdate { agent_id, new_output, .. })) => {
                assert_eq!(agent_id, "a1");
                assert_eq!(new_output, "hi");
            }
            other => panic!("expected output update, got {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("push task did not stop")
            .unwrap();
    }

    #[test]
    fn socketio_control_frames() {
        assert_eq!(
            control_frame(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#),
            Some(Control::Reply("40"))
        );
        assert_eq!(control_frame("2"), Some(Control::Reply("3")));
        assert_eq!(control_frame("41"), Some(Control::Close));
        assert_eq!(control_frame("1"), Some(Control::Close));
        assert_eq!(control_frame(r#"40{"sid":"xyz"}"#), None);
        assert_eq!(control_frame(r#"42["clone_progress",{"agent_id":"a1"}]"#), None);
        assert_eq!(control_frame(r#"{"event":"agent_error","data":{}}"#), None);
    }

    #[tokio::test]
    async fn joins_socketio_namespace_and_answers_pings() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::channel::<String>(8);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text(
                r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
            ))
            .await
            .unwrap();
            for expected in ["40", "3"] {
                let frame = loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => break text.as_str().to_string(),
                        Some(Ok(_)) => continue,
                        _ => return,
                    }
                };
                seen_tx.send(frame).await.unwrap();
                if expected == "40" {
                    ws.send(Message::text(r#"40{"sid":"xyz"}"#)).await.unwrap();
                    ws.send(Message::text("2")).await.unwrap();
                }
            }
            ws.send(Message::text(
                r#"42["agent_output_update",{"agent_id":"a1","new_output":"hi"}]"#,
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = Url::parse(&format!("ws://{addr}/socket.io/?EIO=4&transport=websocket")).unwrap();
        let task = tokio::spawn(run_push_channel(url, tx, shutdown_rx));

        let wait = Duration::from_secs(5);
        assert_eq!(tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().as_deref(), Some("40"));
        assert_eq!(tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().as_deref(), Some("3"));

        let mut pushed = None;
        while let Ok(Some(event)) = tokio::time::timeout(wait, rx.recv()).await {
            if let BackendEvent::Push(event) = event {
                pushed = Some(event);
                break;
            }
        }
        assert_eq!(
            pushed,
            Some(PushEvent::AgentOutputUpdate {
                agent_id: "a1".to_string(),
                new_output: "hi".to_string(),
                timestamp: None,
            })
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("push task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn reports_disconnected_when_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let task = tokio::spawn(run_push_channel(url, tx, shutdown_rx));

        assert!(matches!(
            rx.recv().await,
            Some(BackendEvent::Connection(ConnectionState::Connecting))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(BackendEvent::Connection(ConnectionState::Disconnected))
        ));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("push task did not stop")
            .unwrap();
    }
}
