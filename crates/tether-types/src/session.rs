use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Work,
    Plan,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Work => "work",
            SessionKind::Plan => "plan",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Active,
    Thinking,
    Idle,
    Expired,
    Aborted,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Active => "active",
            SessionStatus::Thinking => "thinking",
            SessionStatus::Idle => "idle",
            SessionStatus::Expired => "expired",
            SessionStatus::Aborted => "aborted",
            SessionStatus::Stopped => "stopped",
        }
    }
}

/// A conversational session owned by the agent process.
///
/// A `plan` session always carries the id of the `work` session it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub model_id: String,
    pub workspace_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        kind: SessionKind,
        model_id: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: SessionStatus::Active,
            model_id: model_id.into(),
            workspace_path: workspace_path.into(),
            parent_session_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Closed failure taxonomy for errors raised by the agent process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    SessionExpired,
    SessionNotReady,
    NetworkTimeout,
    Authentication,
    CliVersion,
    Unknown,
}

impl FailureClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClassification::SessionExpired => "session_expired",
            FailureClassification::SessionNotReady => "session_not_ready",
            FailureClassification::NetworkTimeout => "network_timeout",
            FailureClassification::Authentication => "authentication",
            FailureClassification::CliVersion => "cli_version",
            FailureClassification::Unknown => "unknown",
        }
    }

    /// Whether another attempt can change the outcome.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureClassification::SessionNotReady
                | FailureClassification::NetworkTimeout
                | FailureClassification::Unknown
        )
    }
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt inside a single resume sequence. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub attempt_number: u32,
    pub classification: FailureClassification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_before_next_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanModeState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

impl PlanModeState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanModeState::Disabled => "disabled",
            PlanModeState::Enabling => "enabling",
            PlanModeState::Enabled => "enabled",
            PlanModeState::Disabling => "disabling",
        }
    }
}

impl fmt::Display for PlanModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition notices published to the presentation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanModeStatus {
    Enabled,
    Disabled,
    Accepted,
    Rejected,
}

impl PlanModeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanModeStatus::Enabled => "enabled",
            PlanModeStatus::Disabled => "disabled",
            PlanModeStatus::Accepted => "accepted",
            PlanModeStatus::Rejected => "rejected",
        }
    }
}
