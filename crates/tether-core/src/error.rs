use tether_types::{FailureClassification, PlanModeState, RetryAttempt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Agent error: {0}")]
    Agent(String),

    /// Produced by the bounded-time wrapper. Always classified as a network timeout.
    #[error("{label} timeout after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error("Cannot {operation} while plan mode is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: PlanModeState,
    },

    #[error("No active session")]
    NoActiveSession,

    #[error("Session supervision has been shut down")]
    ShutDown,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TetherError {
    pub fn classification(&self) -> FailureClassification {
        match self {
            TetherError::Timeout { .. } => FailureClassification::NetworkTimeout,
            TetherError::Resume(err) => err.classification,
            other => crate::classify::classify(&other.to_string()),
        }
    }
}

/// A resume sequence that ended without a session.
#[derive(Error, Debug)]
#[error(
    "failed to resume session {} after {} attempt(s) [{classification}]: {last_error:#}",
    .session_id.as_deref().unwrap_or("<new>"),
    .attempts.len()
)]
pub struct ResumeError {
    pub session_id: Option<String>,
    pub classification: FailureClassification,
    pub attempts: Vec<RetryAttempt>,
    pub last_error: anyhow::Error,
}

impl ResumeError {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
