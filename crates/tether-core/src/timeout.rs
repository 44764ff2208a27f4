use std::future::Future;
use std::time::Duration;

use crate::error::TetherError;

/// Races `operation` against a deadline.
///
/// The operation's own outcome passes through untouched when it settles first.
/// Otherwise the future is dropped and a [`TetherError::Timeout`] naming
/// `label` and the deadline is returned; no timer outlives the call.
pub async fn with_timeout<T, F>(operation: F, timeout: Duration, label: &str) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(TetherError::Timeout {
            label: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_error;
    use tether_types::FailureClassification;

    #[tokio::test(start_paused = true)]
    async fn hang_becomes_classified_timeout() {
        let err = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_millis(1500),
            "resume session",
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("resume session"));
        assert!(message.contains("1500ms"));
        assert_eq!(classify_error(&err), FailureClassification::NetworkTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_outcomes_pass_through() {
        let ok = with_timeout(async { Ok(7) }, Duration::from_secs(1), "fast").await;
        assert_eq!(ok.unwrap(), 7);

        let err = with_timeout::<(), _>(
            async { Err(anyhow::anyhow!("Unauthorized")) },
            Duration::from_secs(1),
            "fast",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized");
        assert!(err.downcast_ref::<TetherError>().is_none());
    }
}
