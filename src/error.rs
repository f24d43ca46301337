use thiserror::Error;

/// Failures talking to the fleet backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server answered `{ success: false, error }`.
    #[error("{0}")]
    Rejected(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Short text for a toast. Transport errors lose reqwest's URL noise.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(e) if e.is_timeout() => "request timed out".to_string(),
            ApiError::Transport(e) if e.is_connect() => "server unreachable".to_string(),
            ApiError::Status { status, .. } => format!("server returned HTTP {status}"),
            other => other.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
