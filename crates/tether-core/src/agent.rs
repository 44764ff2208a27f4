//! Collaborator seams: the agent process, the model catalog and the host UI.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tether_tools::ToolSchema;
use tether_types::{AgentEvent, ModelCandidate, Session, SessionKind, ToolCallRequest, ToolResponse};
use tokio::sync::{mpsc, oneshot};

pub type AgentEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<AgentEvent>> + Send>>;

/// How a session should be created or resumed.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub kind: SessionKind,
    pub model_id: Option<String>,
    pub workspace_path: PathBuf,
    pub parent_session_id: Option<String>,
    /// Declarative tool-name whitelist. `None` leaves the agent's defaults in place.
    pub available_tools: Option<Vec<String>>,
    /// Tools the agent must delegate back through [`AgentClient::subscribe_tool_calls`].
    pub custom_tools: Vec<ToolSchema>,
    pub system_prompt_append: Option<String>,
}

impl SessionOptions {
    pub fn work(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SessionKind::Work,
            model_id: None,
            workspace_path: workspace_path.into(),
            parent_session_id: None,
            available_tools: None,
            custom_tools: Vec::new(),
            system_prompt_append: None,
        }
    }

    pub fn with_model(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }
}

/// A delegated tool call awaiting an answer.
#[derive(Debug)]
pub struct PendingToolCall {
    pub request: ToolCallRequest,
    pub responder: oneshot::Sender<ToolResponse>,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Resumes `session_id` when given, otherwise creates a new session.
    async fn create_or_resume_session(
        &self,
        session_id: Option<&str>,
        options: &SessionOptions,
    ) -> anyhow::Result<Session>;

    async fn send_message(&self, session_id: &str, text: &str) -> anyhow::Result<()>;

    async fn abort(&self, session_id: &str) -> anyhow::Result<()>;

    async fn stop_session(&self, session_id: &str) -> anyhow::Result<()>;

    async fn subscribe_events(&self, session_id: &str) -> anyhow::Result<AgentEventStream>;

    async fn subscribe_tool_calls(
        &self,
        session_id: &str,
    ) -> anyhow::Result<mpsc::Receiver<PendingToolCall>>;

    async fn dispatch_subagent(
        &self,
        session_id: &str,
        agent_type: &str,
        prompt: &str,
    ) -> anyhow::Result<String>;
}

#[async_trait]
pub trait CapabilityService: Send + Sync {
    async fn list_available_models(&self) -> anyhow::Result<Vec<ModelCandidate>>;
}

#[async_trait]
pub trait HostUi: Send + Sync {
    /// Shows an error with the given choices. `None` means the user dismissed it.
    async fn show_error_message(
        &self,
        message: &str,
        detail: &str,
        choices: &[&str],
    ) -> Option<String>;
}
