pub mod agent;
pub mod classify;
pub mod config;
pub mod error;
pub mod event_channel;
pub mod fallback;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod session_tasks;
pub mod supervisor;
pub mod timeout;

pub use agent::{
    AgentClient, AgentEventStream, CapabilityService, HostUi, PendingToolCall, SessionOptions,
};
pub use classify::{classify, classify_error};
pub use config::SupervisorConfig;
pub use error::{ResumeError, Result, TetherError};
pub use event_channel::{EventChannel, EventSubscription};
pub use fallback::{
    is_model_unavailable, pick_fallback, select_fallback_model, select_fallback_model_excluding,
    FALLBACK_MODEL, MODEL_PREFERENCE,
};
pub use orchestrator::PlanModeOrchestrator;
pub use recovery::{
    recovery_prompt, show_recovery_dialog, RecoveryChoice, RecoveryPrompt, START_NEW_SESSION,
    TRY_AGAIN,
};
pub use retry::{attempt_resume_with_retry, RetryPolicy};
pub use session_tasks::{SessionSubAgents, SessionTasks};
pub use supervisor::SessionSupervisor;
pub use timeout::with_timeout;
