use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tether_tools::{plan_mode_available_tools, DEFAULT_SAFE_SHELL_PREFIXES, EXPLORE_AGENT};
use tokio::fs;

use crate::error::{Result, TetherError};
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SHELL_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    /// Preferred model for new sessions; the agent's default when unset.
    pub model: Option<String>,
    pub safe_shell_prefixes: Vec<String>,
    /// Upper bound for one allowed plan-session shell command.
    pub shell_timeout_ms: u64,
    pub allowed_subagent: String,
    /// Directory holding per-session plan files. Defaults to `<workspace>/.tether/plans`.
    pub plan_dir: Option<PathBuf>,
    /// Tool names the agent process exposes to a plan session.
    pub plan_tools: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            model: None,
            safe_shell_prefixes: DEFAULT_SAFE_SHELL_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            shell_timeout_ms: DEFAULT_SHELL_TIMEOUT_MS,
            allowed_subagent: EXPLORE_AGENT.to_string(),
            plan_dir: None,
            plan_tools: plan_mode_available_tools(),
        }
    }
}

impl SupervisorConfig {
    /// Reads the optional JSON file at `path`, overlays `TETHER_*` environment
    /// variables, and validates the result.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => read_json_file(path).await?,
            None => empty_object(),
        };
        Ok(Self::from_layers(&file, &env_layer())?)
    }

    pub fn from_layers(file: &Value, env: &Value) -> Result<Self> {
        let mut merged = empty_object();
        deep_merge(&mut merged, file);
        deep_merge(&mut merged, env);
        let config: SupervisorConfig = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TetherError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(TetherError::Config(
                "attempt_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.shell_timeout_ms == 0 {
            return Err(TetherError::Config(
                "shell_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.allowed_subagent.trim().is_empty() {
            return Err(TetherError::Config(
                "allowed_subagent cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_timeout_ms)
    }

    /// Fixed plan-file location for one work session.
    pub fn plan_file_for(&self, workspace: &Path, work_session_id: &str) -> PathBuf {
        let dir = match &self.plan_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.join(".tether").join("plans"),
        };
        dir.join(sanitize_file_stem(work_session_id))
            .join("plan.md")
    }
}

fn sanitize_file_stem(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    match fs::read_to_string(path).await {
        Ok(raw) if raw.trim().is_empty() => Ok(empty_object()),
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(empty_object()),
        Err(e) => Err(e.into()),
    }
}

fn parse_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

fn env_layer() -> Value {
    let mut root = empty_object();

    if let Some(v) = std::env::var("TETHER_MAX_ATTEMPTS")
        .ok()
        .and_then(|s| parse_u64(&s))
    {
        deep_merge(&mut root, &json!({ "max_attempts": v }));
    }
    if let Some(v) = std::env::var("TETHER_BASE_DELAY_MS")
        .ok()
        .and_then(|s| parse_u64(&s))
    {
        deep_merge(&mut root, &json!({ "base_delay_ms": v }));
    }
    if let Some(v) = std::env::var("TETHER_ATTEMPT_TIMEOUT_MS")
        .ok()
        .and_then(|s| parse_u64(&s))
    {
        deep_merge(&mut root, &json!({ "attempt_timeout_ms": v }));
    }
    if let Some(v) = std::env::var("TETHER_SHELL_TIMEOUT_MS")
        .ok()
        .and_then(|s| parse_u64(&s))
    {
        deep_merge(&mut root, &json!({ "shell_timeout_ms": v }));
    }
    if let Ok(model) = std::env::var("TETHER_MODEL") {
        if !model.trim().is_empty() {
            deep_merge(&mut root, &json!({ "model": model.trim() }));
        }
    }
    if let Ok(dir) = std::env::var("TETHER_PLAN_DIR") {
        if !dir.trim().is_empty() {
            deep_merge(&mut root, &json!({ "plan_dir": dir.trim() }));
        }
    }

    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
