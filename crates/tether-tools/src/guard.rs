use std::sync::Arc;

use tether_types::{ToolCallRequest, ToolDecision, ToolResponse};

use crate::{RestrictedTool, ToolBackend, ToolPolicy};

/// The restricted tool set installed into one plan session.
#[derive(Clone)]
pub struct GuardedToolSet {
    policy: Arc<ToolPolicy>,
    backend: Arc<dyn ToolBackend>,
}

impl GuardedToolSet {
    pub fn new(policy: ToolPolicy, backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            policy: Arc::new(policy),
            backend,
        }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Decides a request without executing it. Unknown tool names are denied.
    pub fn evaluate(&self, request: &ToolCallRequest) -> ToolDecision {
        match RestrictedTool::from_name(&request.tool_name) {
            Some(tool) => self.policy.evaluate(tool, &request.arguments),
            None => ToolDecision::deny(unknown_tool_message(&request.tool_name)),
        }
    }

    pub async fn handle(&self, request: &ToolCallRequest) -> ToolResponse {
        let Some(tool) = RestrictedTool::from_name(&request.tool_name) else {
            tracing::warn!(
                tool = %request.tool_name,
                call_id = %request.call_id,
                "rejecting unknown tool at plan-mode boundary"
            );
            return ToolResponse::failure(unknown_tool_message(&request.tool_name));
        };

        let decision = self.policy.evaluate(tool, &request.arguments);
        if !decision.allowed {
            let explanation = decision
                .explanation
                .unwrap_or_else(|| format!("Tool '{}' was denied", tool.name()));
            tracing::warn!(
                tool = tool.name(),
                call_id = %request.call_id,
                mode = request.session_mode.as_str(),
                "plan-mode tool call denied: {}",
                explanation
            );
            return ToolResponse::denied(explanation);
        }

        match self.backend.execute(tool, &request.arguments).await {
            Ok(text) => ToolResponse::success(text),
            Err(e) => {
                tracing::info!(tool = tool.name(), call_id = %request.call_id, "tool failed: {e:#}");
                ToolResponse::failure(format!("{e:#}"))
            }
        }
    }
}

fn unknown_tool_message(name: &str) -> String {
    let known = RestrictedTool::ALL
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!("Unknown tool '{name}'. Plan mode provides: {known}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tether_types::{SessionKind, ToolResultKind};

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolBackend for CountingBackend {
        async fn execute(&self, tool: RestrictedTool, _args: &Value) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran {}", tool.name()))
        }
    }

    fn guarded(backend: Arc<CountingBackend>) -> GuardedToolSet {
        GuardedToolSet::new(ToolPolicy::new("/ws", "/ws/plan.md"), backend)
    }

    #[tokio::test]
    async fn denied_calls_never_reach_backend() {
        let backend = Arc::new(CountingBackend::default());
        let tools = guarded(backend.clone());
        let request = ToolCallRequest::new(
            "bash",
            json!({"command": "rm -rf /"}),
            SessionKind::Plan,
        );

        let response = tools.handle(&request).await;

        assert_eq!(response.result_kind, ToolResultKind::Denied);
        assert!(response.text_result.contains("git status"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_calls_delegate_to_backend() {
        let backend = Arc::new(CountingBackend::default());
        let tools = guarded(backend.clone());
        let request = ToolCallRequest::new(
            "create",
            json!({"path": "plan.md", "file_text": "# plan"}),
            SessionKind::Plan,
        );

        let response = tools.handle(&request).await;

        assert_eq!(response.result_kind, ToolResultKind::Success);
        assert_eq!(response.text_result, "ran create");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn diff_output_flag_cannot_overwrite_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let main_rs = dir.path().join("src").join("main.rs");
        std::fs::write(&main_rs, "fn main() {}\n").unwrap();
        let tools = GuardedToolSet::new(
            ToolPolicy::new(dir.path(), dir.path().join("plan.md")),
            Arc::new(crate::LocalToolBackend::new(dir.path())),
        );
        let request = ToolCallRequest::new(
            "bash",
            json!({"command": "git diff --no-index --output=src/main.rs a.txt b.txt"}),
            SessionKind::Plan,
        );

        let response = tools.handle(&request).await;

        assert_eq!(response.result_kind, ToolResultKind::Denied);
        assert!(response.text_result.contains("--output"));
        assert_eq!(std::fs::read_to_string(&main_rs).unwrap(), "fn main() {}\n");
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_at_boundary() {
        let backend = Arc::new(CountingBackend::default());
        let tools = guarded(backend.clone());
        let request = ToolCallRequest::new("delete_file", json!({}), SessionKind::Plan);

        let response = tools.handle(&request).await;

        assert_eq!(response.result_kind, ToolResultKind::Failure);
        assert!(response.text_result.contains("delete_file"));
        assert!(!tools.evaluate(&request).allowed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
