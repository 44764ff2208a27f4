use tether_types::FailureClassification;

use crate::agent::HostUi;

pub const TRY_AGAIN: &str = "Try Again";
pub const START_NEW_SESSION: &str = "Start New Session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    Retry,
    NewSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPrompt {
    pub headline: String,
    pub detail: String,
}

pub fn recovery_prompt(
    session_id: Option<&str>,
    classification: FailureClassification,
    attempt_count: u32,
    last_error: &str,
) -> RecoveryPrompt {
    let headline = match classification {
        FailureClassification::SessionExpired => {
            "The previous session was not found. It may have been deleted or expired."
        }
        FailureClassification::NetworkTimeout => {
            "Could not connect to the agent. The connection failed or timed out."
        }
        _ => "Failed to resume the session.",
    }
    .to_string();

    let session = session_id
        .map(short_session_id)
        .unwrap_or_else(|| "(new session)".to_string());
    let detail = format!(
        "Session {session} could not be resumed after {attempt_count} attempt(s).\n\nError: {last_error}"
    );

    RecoveryPrompt { headline, detail }
}

/// First eight characters followed by an ellipsis.
pub fn short_session_id(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("{prefix}…")
}

/// Asks the user how to proceed after a failed resume. Dismissing the dialog
/// starts a new session.
pub async fn show_recovery_dialog(
    host_ui: &dyn HostUi,
    session_id: Option<&str>,
    classification: FailureClassification,
    attempt_count: u32,
    last_error: &str,
) -> RecoveryChoice {
    let prompt = recovery_prompt(session_id, classification, attempt_count, last_error);
    let picked = host_ui
        .show_error_message(&prompt.headline, &prompt.detail, &[TRY_AGAIN, START_NEW_SESSION])
        .await;

    let choice = match picked.as_deref() {
        Some(TRY_AGAIN) => RecoveryChoice::Retry,
        _ => RecoveryChoice::NewSession,
    };
    tracing::info!(
        session_id = session_id.unwrap_or("<new>"),
        classification = classification.as_str(),
        dismissed = picked.is_none(),
        "recovery choice: {:?}",
        choice
    );
    choice
}
