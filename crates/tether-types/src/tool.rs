use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::SessionKind;

/// A tool invocation requested by the agent process on behalf of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    pub session_mode: SessionKind,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value, session_mode: SessionKind) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            arguments,
            session_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultKind {
    Success,
    Denied,
    Failure,
}

impl ToolResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolResultKind::Success => "success",
            ToolResultKind::Denied => "denied",
            ToolResultKind::Failure => "failure",
        }
    }
}

/// Verdict reached before a guarded tool delegates to the real capability.
///
/// A denied decision always carries an explanation naming the violated
/// constraint; use [`ToolDecision::deny`] to build one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecision {
    pub allowed: bool,
    pub result_kind: ToolResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl ToolDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            result_kind: ToolResultKind::Success,
            explanation: None,
        }
    }

    pub fn deny(explanation: impl Into<String>) -> Self {
        Self {
            allowed: false,
            result_kind: ToolResultKind::Denied,
            explanation: Some(explanation.into()),
        }
    }
}

/// Answer returned to the agent process for one tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub result_kind: ToolResultKind,
    pub text_result: String,
}

impl ToolResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            result_kind: ToolResultKind::Success,
            text_result: text.into(),
        }
    }

    pub fn denied(text: impl Into<String>) -> Self {
        Self {
            result_kind: ToolResultKind::Denied,
            text_result: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            result_kind: ToolResultKind::Failure,
            text_result: text.into(),
        }
    }
}
