use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;

use crate::{command_from_args, resolve_tool_path, tool_path_from_args, RestrictedTool};

pub const SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// The real capability behind a restricted tool. Only reached after the policy allowed the call.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn execute(&self, tool: RestrictedTool, args: &Value) -> anyhow::Result<String>;
}

/// Runs a sub-agent inside the agent process on behalf of the plan session.
#[async_trait]
pub trait SubAgentDispatcher: Send + Sync {
    async fn dispatch(&self, agent_type: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Executes shell and file tools directly against the workspace.
pub struct LocalToolBackend {
    workspace: PathBuf,
    subagents: Option<Arc<dyn SubAgentDispatcher>>,
    shell_timeout: Duration,
}

impl LocalToolBackend {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            subagents: None,
            shell_timeout: SHELL_TIMEOUT,
        }
    }

    pub fn with_subagents(mut self, dispatcher: Arc<dyn SubAgentDispatcher>) -> Self {
        self.subagents = Some(dispatcher);
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    fn target_path(&self, args: &Value) -> anyhow::Result<PathBuf> {
        let raw = tool_path_from_args(args).ok_or_else(|| anyhow!("missing `path` argument"))?;
        Ok(resolve_tool_path(&self.workspace, Path::new(raw)))
    }

    async fn run_shell(&self, args: &Value) -> anyhow::Result<String> {
        let cmd = command_from_args(args).ok_or_else(|| anyhow!("missing `command` argument"))?;
        let mut command = shell_command(cmd);
        command.current_dir(&self.workspace).kill_on_drop(true);

        let output = tokio::time::timeout(self.shell_timeout, command.output())
            .await
            .map_err(|_| anyhow!("command exceeded timeout of {:?}", self.shell_timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            bail!("command exited with {}: {}", output.status, stderr.trim());
        }
        if stderr.trim().is_empty() {
            Ok(stdout)
        } else {
            Ok(format!("{stdout}\n[stderr]\n{stderr}"))
        }
    }

    async fn dispatch_subagent(&self, args: &Value) -> anyhow::Result<String> {
        let Some(dispatcher) = self.subagents.as_ref() else {
            bail!("sub-agent dispatch is not available for this session");
        };
        let agent_type = crate::agent_type_from_args(args).unwrap_or_default();
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .or_else(|| args.get("description").and_then(|v| v.as_str()))
            .ok_or_else(|| anyhow!("missing `prompt` argument"))?;
        dispatcher.dispatch(agent_type, prompt).await
    }

    async fn edit_file(&self, args: &Value) -> anyhow::Result<String> {
        let path = self.target_path(args)?;
        let old = string_arg(args, &["old_str", "oldString", "old"])
            .ok_or_else(|| anyhow!("missing `old_str` argument"))?;
        let new = string_arg(args, &["new_str", "newString", "new"]).unwrap_or_default();

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let matches = content.matches(old).count();
        if matches != 1 {
            bail!(
                "`old_str` must match exactly once in {} (found {} matches)",
                path.display(),
                matches
            );
        }
        fs::write(&path, content.replacen(old, new, 1)).await?;
        Ok(format!("Edited {}", path.display()))
    }

    async fn create_file(&self, args: &Value) -> anyhow::Result<String> {
        let path = self.target_path(args)?;
        let text = string_arg(args, &["file_text", "content", "text"]).unwrap_or_default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, text).await?;
        Ok(format!("Wrote {} bytes to {}", text.len(), path.display()))
    }
}

#[async_trait]
impl ToolBackend for LocalToolBackend {
    async fn execute(&self, tool: RestrictedTool, args: &Value) -> anyhow::Result<String> {
        match tool {
            RestrictedTool::Shell => self.run_shell(args).await,
            RestrictedTool::SubAgent => self.dispatch_subagent(args).await,
            RestrictedTool::EditFile => self.edit_file(args).await,
            RestrictedTool::CreateFile => self.create_file(args).await,
        }
    }
}

fn string_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(|v| v.as_str()))
}

#[cfg(windows)]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("powershell");
    command.args(["-NoProfile", "-Command", cmd]);
    command
}

#[cfg(not(windows))]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", cmd]);
    command
}
