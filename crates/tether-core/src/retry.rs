use std::future::Future;
use std::time::Duration;

use tether_types::{FailureClassification, RetryAttempt};

use crate::classify::classify_error;
use crate::config::{DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::error::ResumeError;
use crate::timeout::with_timeout;

pub const DEFAULT_RESUME_LABEL: &str = "resume session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    /// Names the operation in timeout errors and log records.
    pub label: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            label: DEFAULT_RESUME_LABEL.to_string(),
        }
    }
}

impl RetryPolicy {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Wait before attempt `failed_attempt + 1`: `base * 2^(failed_attempt - 1)`.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Resumes (or creates) a session, retrying transient failures.
///
/// Attempts run strictly one after another, each bounded by
/// `policy.attempt_timeout`. `authentication`, `session_expired` and
/// `cli_version` failures end the sequence after the attempt that produced
/// them. Anything else is retried after an exponential backoff until
/// `policy.max_attempts` is spent, and the last error is returned.
pub async fn attempt_resume_with_retry<T, F, Fut>(
    session_id: Option<&str>,
    mut resume_fn: F,
    policy: &RetryPolicy,
) -> Result<T, ResumeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut attempt_number = 0;

    loop {
        attempt_number += 1;
        tracing::debug!(
            session_id = session_id.unwrap_or("<new>"),
            attempt = attempt_number,
            max_attempts,
            label = %policy.label,
            "resume attempt started"
        );
        let err = match with_timeout(resume_fn(), policy.attempt_timeout, &policy.label).await {
            Ok(value) => {
                if attempt_number > 1 {
                    tracing::info!(
                        session_id = session_id.unwrap_or("<new>"),
                        attempt = attempt_number,
                        label = %policy.label,
                        "session established after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let classification = classify_error(&err);
        let retryable = classification.is_retryable() && attempt_number < max_attempts;
        let delay = retryable.then(|| policy.backoff_after(attempt_number));

        attempts.push(RetryAttempt {
            session_id: session_id.map(ToString::to_string),
            attempt_number,
            classification,
            delay_before_next_ms: delay.map(|d| d.as_millis() as u64),
        });

        let Some(delay) = delay else {
            log_final_failure(session_id, attempt_number, classification, policy, &err);
            return Err(ResumeError {
                session_id: session_id.map(ToString::to_string),
                classification,
                attempts,
                last_error: err,
            });
        };

        tracing::warn!(
            session_id = session_id.unwrap_or("<new>"),
            attempt = attempt_number,
            max_attempts,
            classification = classification.as_str(),
            delay_ms = delay.as_millis() as u64,
            label = %policy.label,
            "attempt failed, backing off: {err:#}"
        );
        tokio::time::sleep(delay).await;
    }
}

fn log_final_failure(
    session_id: Option<&str>,
    attempt_number: u32,
    classification: FailureClassification,
    policy: &RetryPolicy,
    err: &anyhow::Error,
) {
    if classification.is_retryable() {
        tracing::error!(
            session_id = session_id.unwrap_or("<new>"),
            attempts = attempt_number,
            classification = classification.as_str(),
            label = %policy.label,
            "retry budget exhausted: {err:#}"
        );
    } else {
        tracing::error!(
            session_id = session_id.unwrap_or("<new>"),
            attempt = attempt_number,
            classification = classification.as_str(),
            label = %policy.label,
            "non-retryable failure: {err:#}"
        );
    }
}
