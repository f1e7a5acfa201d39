use thiserror::Error;

use crate::models::TaskType;

/// Top-level client error. Every variant carries enough context to be shown to
/// the user or written to the log as-is.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Network error calling {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Response from {url} has no body")]
    EmptyBody { url: String },

    // ── Decode errors ────────────────────────────────────────────────────────
    #[error("Failed to decode stream event: {message}")]
    Decode { message: String },

    #[error("Invalid payload from {url}: {message}")]
    InvalidPayload { url: String, message: String },

    // ── Task errors ──────────────────────────────────────────────────────────
    #[error("{task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Backend accepted the request but returned no task id")]
    MissingTaskId,

    // ── Orchestration errors ─────────────────────────────────────────────────
    #[error("Cannot start {}: travel details are missing", task_type.label())]
    MissingPreferences { task_type: TaskType },

    #[error("Travel summary generation failed: {message}")]
    Summary { message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ClientError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        ClientError::Network { url: url.into(), source }
    }

    pub fn invalid_payload(url: impl Into<String>, message: impl ToString) -> Self {
        ClientError::InvalidPayload { url: url.into(), message: message.to_string() }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Network { .. } | ClientError::HttpStatus { .. } | ClientError::EmptyBody { .. }
        )
    }
}

/// Why a poll run ended without success.
#[derive(Debug, Error)]
pub enum PollError {
    /// The backend reported the job as failed.
    #[error("{0}")]
    Failed(String),

    #[error("Unexpected poll response status: {0}")]
    UnexpectedStatus(String),

    /// The status probe itself failed.
    #[error(transparent)]
    Probe(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
