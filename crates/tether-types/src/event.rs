use serde::{Deserialize, Serialize};

use crate::{PlanModeStatus, SessionKind, SessionStatus, ToolResultKind};

/// Lifecycle notifications read from the agent process's per-session feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStart,
    TurnEnd,
    StatusChanged {
        status: SessionStatus,
    },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
    MessageDelta {
        content: String,
    },
    ToolStart {
        call_id: String,
        tool_name: String,
    },
    ToolProgress {
        call_id: String,
        message: String,
    },
    ToolComplete {
        call_id: String,
        result_kind: ToolResultKind,
    },
    Error {
        message: String,
    },
}

/// Everything the presentation layer learns about sessions arrives as one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TetherEvent {
    SessionStatus {
        session_id: String,
        kind: SessionKind,
        status: SessionStatus,
    },
    MessageDelta {
        session_id: String,
        content: String,
    },
    Usage {
        session_id: String,
        input_tokens: u64,
        output_tokens: u64,
    },
    ToolStart {
        session_id: String,
        call_id: String,
        tool_name: String,
    },
    ToolProgress {
        session_id: String,
        call_id: String,
        message: String,
    },
    ToolComplete {
        session_id: String,
        call_id: String,
        result_kind: ToolResultKind,
    },
    PlanMode {
        work_session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_session_id: Option<String>,
        status: PlanModeStatus,
    },
    /// The previous session could not be resumed and `new_session_id` replaced it.
    SessionExpired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_session_id: Option<String>,
        new_session_id: String,
    },
    ModelFallback {
        failed_model_id: String,
        fallback_model_id: String,
    },
    SessionError {
        session_id: String,
        message: String,
    },
}

impl TetherEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            TetherEvent::SessionStatus { session_id, .. }
            | TetherEvent::MessageDelta { session_id, .. }
            | TetherEvent::Usage { session_id, .. }
            | TetherEvent::ToolStart { session_id, .. }
            | TetherEvent::ToolProgress { session_id, .. }
            | TetherEvent::ToolComplete { session_id, .. }
            | TetherEvent::SessionError { session_id, .. } => Some(session_id),
            TetherEvent::PlanMode {
                work_session_id, ..
            } => Some(work_session_id),
            TetherEvent::SessionExpired { new_session_id, .. } => Some(new_session_id),
            TetherEvent::ModelFallback { .. } => None,
        }
    }

    /// Maps one collaborator notification onto the presentation event for `session_id`.
    pub fn from_agent(session_id: &str, kind: SessionKind, event: AgentEvent) -> Self {
        let session_id = session_id.to_string();
        match event {
            AgentEvent::TurnStart => TetherEvent::SessionStatus {
                session_id,
                kind,
                status: SessionStatus::Thinking,
            },
            AgentEvent::TurnEnd => TetherEvent::SessionStatus {
                session_id,
                kind,
                status: SessionStatus::Idle,
            },
            AgentEvent::StatusChanged { status } => TetherEvent::SessionStatus {
                session_id,
                kind,
                status,
            },
            AgentEvent::Usage {
                input_tokens,
                output_tokens,
            } => TetherEvent::Usage {
                session_id,
                input_tokens,
                output_tokens,
            },
            AgentEvent::MessageDelta { content } => TetherEvent::MessageDelta {
                session_id,
                content,
            },
            AgentEvent::ToolStart { call_id, tool_name } => TetherEvent::ToolStart {
                session_id,
                call_id,
                tool_name,
            },
            AgentEvent::ToolProgress { call_id, message } => TetherEvent::ToolProgress {
                session_id,
                call_id,
                message,
            },
            AgentEvent::ToolComplete {
                call_id,
                result_kind,
            } => TetherEvent::ToolComplete {
                session_id,
                call_id,
                result_kind,
            },
            AgentEvent::Error { message } => TetherEvent::SessionError {
                session_id,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_boundaries_map_to_thinking_and_idle() {
        let start = TetherEvent::from_agent("s1", SessionKind::Work, AgentEvent::TurnStart);
        let end = TetherEvent::from_agent("s1", SessionKind::Work, AgentEvent::TurnEnd);
        assert!(matches!(
            start,
            TetherEvent::SessionStatus {
                status: SessionStatus::Thinking,
                ..
            }
        ));
        assert!(matches!(
            end,
            TetherEvent::SessionStatus {
                status: SessionStatus::Idle,
                ..
            }
        ));
    }

    #[test]
    fn expired_event_is_tagged_and_keyed_by_new_session() {
        let event = TetherEvent::SessionExpired {
            previous_session_id: Some("old".to_string()),
            new_session_id: "new".to_string(),
        };
        assert_eq!(event.session_id(), Some("new"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session_expired");
        assert_eq!(value["new_session_id"], "new");
    }
}
