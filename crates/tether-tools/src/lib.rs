//! Defense-in-depth tool restrictions for plan-mode sessions.
//!
//! The plan session gets a declarative whitelist of tool names from the agent
//! process. Calls to the restricted tools (shell, edit, create, subagent) come
//! back to us and pass through [`GuardedToolSet`], which checks the arguments
//! against [`ToolPolicy`] before a [`ToolBackend`] runs them.

mod backend;
mod guard;
mod policy;
mod restricted;

pub use backend::*;
pub use guard::*;
pub use policy::*;
pub use restricted::*;
