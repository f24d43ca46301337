use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
/// Flask-SocketIO endpoint, WebSocket transport, Engine.IO protocol 4.
pub const DEFAULT_PUSH_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Client settings, persisted as `~/.fleetwatch/config.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub push_enabled: bool,
    pub push_path: String,
    /// Output panels within this many rows of the bottom follow new output.
    pub near_bottom_rows: u16,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            push_enabled: true,
            push_path: DEFAULT_PUSH_PATH.to_string(),
            near_bottom_rows: 3,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Floor of 250ms so a bad config can't hammer the backend.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(250))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(100))
    }

    /// WebSocket endpoint derived from `server_url`: http → ws, https → wss.
    /// `push_path` may carry a query string.
    pub fn push_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("Invalid server url: {}", self.server_url))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot derive push url from {}", self.server_url))?;
        let (path, query) = match self.push_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.push_path.as_str(), None),
        };
        url.set_path(path);
        url.set_query(None);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.query_pairs_mut()
                .extend_pairs(url::form_urlencoded::parse(query.as_bytes()));
        }
        Ok(url)
    }

    /// Apply `FLEETWATCH_SERVER` / `FLEETWATCH_POLL_MS` style overrides.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("FLEETWATCH_SERVER").filter(|s| !s.trim().is_empty()) {
            self.server_url = server.trim().trim_end_matches('/').to_string();
        }
        if let Some(ms) = lookup("FLEETWATCH_POLL_MS").and_then(|s| s.trim().parse().ok()) {
            self.poll_interval_ms = ms;
        }
    }
}

/// Default base directory: `~/.fleetwatch/`
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetwatch")
}

pub fn settings_path(base_dir: &Path) -> PathBuf {
    base_dir.join("config.json")
}

pub fn log_dir(base_dir: &Path) -> PathBuf {
    base_dir.join("logs")
}

/// Load settings from disk. Missing or corrupt file yields defaults.
pub async fn load_settings(base_dir: &Path) -> Settings {
    let path = settings_path(base_dir);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt config");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Write settings atomically (temp file + rename).
pub async fn save_settings(base_dir: &Path, settings: &Settings) -> Result<()> {
    let path = settings_path(base_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp_path = path.with_file_name(format!("config.{}.tmp", std::process::id()));
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
}

/// Resolve the GitHub token: `GITHUB_TOKEN`, then a `GITHUB_TOKEN=` line in `~/.env`.
pub fn resolve_github_token(env_token: Option<String>, home: Option<&Path>) -> Option<String> {
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        return Some(token.trim().to_string());
    }
    let env_file = home?.join(".env");
    let contents = std::fs::read_to_string(env_file).ok()?;
    contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("GITHUB_TOKEN="))
        .map(|token| token.trim().trim_matches('"').to_string())
        .filter(|token| !token.is_empty())
}
