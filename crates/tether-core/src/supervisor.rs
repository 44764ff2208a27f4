use std::collections::HashSet;
use std::sync::Arc;

use tether_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tether_types::{FailureClassification, Session, SessionStatus, TetherEvent};
use tracing::Level;

use crate::agent::{AgentClient, CapabilityService, HostUi, SessionOptions};
use crate::error::ResumeError;
use crate::event_channel::EventChannel;
use crate::fallback::{is_model_unavailable, select_fallback_model_excluding};
use crate::recovery::{show_recovery_dialog, RecoveryChoice};
use crate::retry::{attempt_resume_with_retry, RetryPolicy};

/// Establishes sessions against the agent process and keeps the user out of
/// dead ends: retries transient failures, swaps out an unavailable model once,
/// and asks the user how to continue when nothing else worked.
pub struct SessionSupervisor {
    agent: Arc<dyn AgentClient>,
    capabilities: Arc<dyn CapabilityService>,
    host_ui: Arc<dyn HostUi>,
    events: EventChannel<TetherEvent>,
    policy: RetryPolicy,
}

impl SessionSupervisor {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        capabilities: Arc<dyn CapabilityService>,
        host_ui: Arc<dyn HostUi>,
        events: EventChannel<TetherEvent>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            agent,
            capabilities,
            host_ui,
            events,
            policy,
        }
    }

    pub fn agent(&self) -> &Arc<dyn AgentClient> {
        &self.agent
    }

    pub fn events(&self) -> &EventChannel<TetherEvent> {
        &self.events
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One bounded retry sequence.
    pub async fn resume(
        &self,
        session_id: Option<&str>,
        options: &SessionOptions,
    ) -> Result<Session, ResumeError> {
        let agent = &self.agent;
        attempt_resume_with_retry(
            session_id,
            || agent.create_or_resume_session(session_id, options),
            &self.policy,
        )
        .await
    }

    /// Returns a usable session, resuming `session_id` when possible.
    ///
    /// This only returns once a session exists. When the id could not be
    /// resumed and the user chose a fresh session, a `session_expired` event
    /// carrying the new id is published.
    pub async fn establish(&self, session_id: Option<&str>, options: SessionOptions) -> Session {
        let mut options = options;
        let mut target = session_id.map(ToString::to_string);
        let mut replaced: Option<String> = None;
        let mut fallback_used = false;

        loop {
            if let Some(id) = target.as_deref() {
                self.events.fire(TetherEvent::SessionStatus {
                    session_id: id.to_string(),
                    kind: options.kind,
                    status: SessionStatus::Starting,
                });
            }

            let err = match self.resume(target.as_deref(), &options).await {
                Ok(session) => {
                    self.announce(&session, replaced.take());
                    return session;
                }
                Err(err) => err,
            };

            if !fallback_used && self.should_fall_back(&err) {
                fallback_used = true;
                if let Some(model_id) = self.fallback_model(&options).await {
                    options.model_id = Some(model_id);
                    continue;
                }
            }

            let last_error = format!("{:#}", err.last_error);
            emit_event(
                Level::WARN,
                ProcessKind::Host,
                ObservabilityEvent {
                    event: "session.resume.failed",
                    component: "supervisor",
                    session_id: target.as_deref(),
                    model_id: options.model_id.as_deref(),
                    classification: Some(err.classification.as_str()),
                    detail: Some(last_error.as_str()),
                    ..Default::default()
                },
            );

            let choice = show_recovery_dialog(
                self.host_ui.as_ref(),
                target.as_deref(),
                err.classification,
                err.attempt_count(),
                &last_error,
            )
            .await;
            if choice == RecoveryChoice::NewSession {
                if let Some(previous) = target.take() {
                    self.events.fire(TetherEvent::SessionStatus {
                        session_id: previous.clone(),
                        kind: options.kind,
                        status: SessionStatus::Expired,
                    });
                    replaced = Some(previous);
                }
            }
        }
    }

    fn should_fall_back(&self, err: &ResumeError) -> bool {
        err.classification != FailureClassification::CliVersion
            && err.classification != FailureClassification::Authentication
            && is_model_unavailable(&format!("{:#}", err.last_error))
    }

    async fn fallback_model(&self, options: &SessionOptions) -> Option<String> {
        let failed = options.model_id.clone().unwrap_or_default();
        let excluded = HashSet::from([failed.clone()]);
        let fallback = select_fallback_model_excluding(self.capabilities.as_ref(), &excluded).await;
        if excluded.contains(&fallback) {
            tracing::warn!(model_id = %fallback, "fallback model is the one that failed");
            return None;
        }

        emit_event(
            Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "session.model.fallback",
                component: "supervisor",
                model_id: Some(fallback.as_str()),
                detail: Some(failed.as_str()),
                ..Default::default()
            },
        );
        self.events.fire(TetherEvent::ModelFallback {
            failed_model_id: failed,
            fallback_model_id: fallback.clone(),
        });
        Some(fallback)
    }

    fn announce(&self, session: &Session, replaced: Option<String>) {
        emit_event(
            Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "session.established",
                component: "supervisor",
                session_id: Some(session.id.as_str()),
                model_id: Some(session.model_id.as_str()),
                status: Some(session.kind.as_str()),
                ..Default::default()
            },
        );
        if let Some(previous) = replaced {
            self.events.fire(TetherEvent::SessionExpired {
                previous_session_id: Some(previous),
                new_session_id: session.id.clone(),
            });
        }
        self.events.fire(TetherEvent::SessionStatus {
            session_id: session.id.clone(),
            kind: session.kind,
            status: SessionStatus::Active,
        });
    }
}
