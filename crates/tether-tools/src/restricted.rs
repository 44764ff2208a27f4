use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The capabilities a plan session may invoke only through the guarded path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RestrictedTool {
    Shell,
    SubAgent,
    EditFile,
    CreateFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Read-only tools the plan session keeps from the agent's built-in set.
pub const PLAN_READ_ONLY_TOOLS: &[&str] = &["view", "glob", "grep", "ls", "web_fetch"];

fn canonical_tool_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace('-', "_")
}

impl RestrictedTool {
    pub const ALL: [RestrictedTool; 4] = [
        RestrictedTool::Shell,
        RestrictedTool::SubAgent,
        RestrictedTool::EditFile,
        RestrictedTool::CreateFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RestrictedTool::Shell => "bash",
            RestrictedTool::SubAgent => "task",
            RestrictedTool::EditFile => "edit",
            RestrictedTool::CreateFile => "create",
        }
    }

    /// Resolves a tool name as sent by the agent process. Unknown names yield `None`.
    pub fn from_name(raw: &str) -> Option<Self> {
        match canonical_tool_name(raw).as_str() {
            "bash" | "shell" | "run_command" => Some(RestrictedTool::Shell),
            "task" | "subagent" | "sub_agent" => Some(RestrictedTool::SubAgent),
            "edit" | "edit_file" | "str_replace" => Some(RestrictedTool::EditFile),
            "create" | "create_file" | "write" | "write_file" => Some(RestrictedTool::CreateFile),
            _ => None,
        }
    }

    pub fn schema(self) -> ToolSchema {
        match self {
            RestrictedTool::Shell => ToolSchema {
                name: self.name().to_string(),
                description: "Run a read-only shell command in the workspace".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"command": {"type": "string"}},
                    "required": ["command"]
                }),
            },
            RestrictedTool::SubAgent => ToolSchema {
                name: self.name().to_string(),
                description: "Dispatch an exploration sub-agent".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "agent_type": {"type": "string"},
                        "prompt": {"type": "string"}
                    },
                    "required": ["agent_type", "prompt"]
                }),
            },
            RestrictedTool::EditFile => ToolSchema {
                name: self.name().to_string(),
                description: "Replace one occurrence of a string in the plan file".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "old_str": {"type": "string"},
                        "new_str": {"type": "string"}
                    },
                    "required": ["path", "old_str", "new_str"]
                }),
            },
            RestrictedTool::CreateFile => ToolSchema {
                name: self.name().to_string(),
                description: "Create or overwrite the plan file".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "file_text": {"type": "string"}
                    },
                    "required": ["path", "file_text"]
                }),
            },
        }
    }
}

pub fn restricted_tool_schemas() -> Vec<ToolSchema> {
    RestrictedTool::ALL.iter().map(|t| t.schema()).collect()
}

/// Declarative whitelist handed to the agent process for a plan session.
pub fn plan_mode_available_tools() -> Vec<String> {
    PLAN_READ_ONLY_TOOLS
        .iter()
        .copied()
        .chain(RestrictedTool::ALL.iter().map(|t| t.name()))
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_variants() {
        assert_eq!(RestrictedTool::from_name("Bash"), Some(RestrictedTool::Shell));
        assert_eq!(
            RestrictedTool::from_name("write-file"),
            Some(RestrictedTool::CreateFile)
        );
        assert_eq!(
            RestrictedTool::from_name("str_replace"),
            Some(RestrictedTool::EditFile)
        );
        assert_eq!(RestrictedTool::from_name("delete_file"), None);
    }

    #[test]
    fn whitelist_contains_every_restricted_tool() {
        let tools = plan_mode_available_tools();
        for tool in RestrictedTool::ALL {
            assert!(tools.iter().any(|t| t == tool.name()));
        }
        assert!(!tools.iter().any(|t| t == "delete"));
    }
}
