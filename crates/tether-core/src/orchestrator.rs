//! Dual-session plan mode.
//!
//! One work session is always the conversation's home. Enabling plan mode
//! opens a second, tool-restricted plan session bound to it and makes that
//! session the driving one; leaving plan mode stops the plan session and
//! hands the conversation back. Only the driving session receives user turns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tether_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use tether_tools::{
    restricted_tool_schemas, GuardedToolSet, LocalToolBackend, ToolBackend, ToolPolicy,
};
use tether_types::{
    FailureClassification, PlanModeState, PlanModeStatus, Session, SessionKind, SessionStatus,
    TetherEvent,
};
use tokio::sync::{watch, Mutex};
use tracing::Level;

use crate::agent::{AgentClient, CapabilityService, HostUi, SessionOptions};
use crate::classify::classify_error;
use crate::config::SupervisorConfig;
use crate::error::{Result, TetherError};
use crate::event_channel::{EventChannel, EventSubscription};
use crate::session_tasks::{SessionSubAgents, SessionTasks};
use crate::supervisor::SessionSupervisor;

struct LiveSession {
    session: Session,
    tasks: SessionTasks,
}

impl LiveSession {
    /// The session as last reported by its event feed.
    fn snapshot(&self) -> Session {
        Session {
            status: self.tasks.status(),
            ..self.session.clone()
        }
    }
}

struct OrchestratorState {
    work: Option<LiveSession>,
    plan: Option<LiveSession>,
    driving: SessionKind,
    /// Fixed for the lifetime of the orchestrator once the first work session exists.
    plan_file: Option<PathBuf>,
    closed: bool,
}

impl OrchestratorState {
    fn live(&self, kind: SessionKind) -> Option<&LiveSession> {
        match kind {
            SessionKind::Work => self.work.as_ref(),
            SessionKind::Plan => self.plan.as_ref(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TetherError::ShutDown);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum PlanExit {
    Disable,
    Accept,
    Reject,
}

impl PlanExit {
    fn operation(self) -> &'static str {
        match self {
            PlanExit::Disable => "disable plan mode",
            PlanExit::Accept => "accept the plan",
            PlanExit::Reject => "reject the plan",
        }
    }

    fn status(self) -> PlanModeStatus {
        match self {
            PlanExit::Disable => PlanModeStatus::Disabled,
            PlanExit::Accept => PlanModeStatus::Accepted,
            PlanExit::Reject => PlanModeStatus::Rejected,
        }
    }

    fn work_signal(self, plan_file: &Path) -> Option<String> {
        match self {
            PlanExit::Disable => None,
            PlanExit::Accept => Some(format!(
                "The plan in {} has been accepted. Treat its current content as authoritative and implement it.",
                plan_file.display()
            )),
            PlanExit::Reject => Some(format!(
                "The plan in {} has been rejected. Discard it and do not act on it.",
                plan_file.display()
            )),
        }
    }
}

pub struct PlanModeOrchestrator {
    supervisor: SessionSupervisor,
    config: SupervisorConfig,
    workspace: PathBuf,
    tool_backend: Option<Arc<dyn ToolBackend>>,
    state: Mutex<OrchestratorState>,
    /// Held for the whole of any operation that creates, replaces or stops a
    /// session, so at most one work and one plan session ever exist.
    lifecycle: Mutex<()>,
    mode: watch::Sender<PlanModeState>,
}

impl PlanModeOrchestrator {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        capabilities: Arc<dyn CapabilityService>,
        host_ui: Arc<dyn HostUi>,
        workspace: impl Into<PathBuf>,
        config: SupervisorConfig,
    ) -> Self {
        let supervisor = SessionSupervisor::new(
            agent,
            capabilities,
            host_ui,
            EventChannel::new(),
            config.retry_policy(),
        );
        let (mode, _) = watch::channel(PlanModeState::Disabled);
        Self {
            supervisor,
            config,
            workspace: workspace.into(),
            tool_backend: None,
            state: Mutex::new(OrchestratorState {
                work: None,
                plan: None,
                driving: SessionKind::Work,
                plan_file: None,
                closed: false,
            }),
            lifecycle: Mutex::new(()),
            mode,
        }
    }

    /// Replaces the local backend that executes allowed plan-session tool calls.
    pub fn with_tool_backend(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.tool_backend = Some(backend);
        self
    }

    pub fn events(&self) -> EventChannel<TetherEvent> {
        self.supervisor.events().clone()
    }

    pub fn subscribe(&self) -> EventSubscription<TetherEvent> {
        self.supervisor.events().subscribe()
    }

    pub fn plan_mode_state(&self) -> PlanModeState {
        *self.mode.borrow()
    }

    pub fn watch_plan_mode(&self) -> watch::Receiver<PlanModeState> {
        self.mode.subscribe()
    }

    pub async fn plan_file_path(&self) -> Option<PathBuf> {
        self.state.lock().await.plan_file.clone()
    }

    pub async fn work_session(&self) -> Option<Session> {
        self.state.lock().await.work.as_ref().map(LiveSession::snapshot)
    }

    pub async fn plan_session(&self) -> Option<Session> {
        self.state.lock().await.plan.as_ref().map(LiveSession::snapshot)
    }

    /// The session that currently receives user turns.
    pub async fn driving_session(&self) -> Option<Session> {
        let state = self.state.lock().await;
        state.live(state.driving).map(LiveSession::snapshot)
    }

    /// Establishes the work session, resuming `resume_id` when given. Callers
    /// racing each other all get the same work session.
    pub async fn start(&self, resume_id: Option<&str>) -> Result<Session> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let state = self.state.lock().await;
            state.ensure_open()?;
            if let Some(work) = state.work.as_ref() {
                return Ok(work.snapshot());
            }
        }

        let session = self
            .supervisor
            .establish(resume_id, self.work_options())
            .await;
        let tasks = self.spawn_tasks(&session, None).await?;

        let mut state = self.state.lock().await;
        if state.plan_file.is_none() {
            state.plan_file = Some(self.config.plan_file_for(&self.workspace, &session.id));
        }
        state.work = Some(LiveSession {
            session: session.clone(),
            tasks,
        });
        state.driving = SessionKind::Work;
        Ok(session)
    }

    pub async fn enable_plan_mode(&self) -> Result<Session> {
        let _lifecycle = self.lifecycle.lock().await;
        let (work, plan_file) = {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            self.expect_mode(PlanModeState::Disabled, "enable plan mode")?;
            let work = state
                .work
                .as_ref()
                .map(|w| w.session.clone())
                .ok_or(TetherError::NoActiveSession)?;
            let plan_file = state
                .plan_file
                .get_or_insert_with(|| self.config.plan_file_for(&self.workspace, &work.id))
                .clone();
            self.set_mode(PlanModeState::Enabling);
            (work, plan_file)
        };

        let live = match self.open_plan_session(&work, &plan_file).await {
            Ok(live) => live,
            Err(e) => {
                let _state = self.state.lock().await;
                self.set_mode(PlanModeState::Disabled);
                return Err(e);
            }
        };

        let session = live.session.clone();
        let work_id = {
            let mut state = self.state.lock().await;
            state.plan = Some(live);
            state.driving = SessionKind::Plan;
            self.set_mode(PlanModeState::Enabled);
            state
                .work
                .as_ref()
                .map(|w| w.session.id.clone())
                .unwrap_or(work.id)
        };
        self.publish_plan_mode(&work_id, Some(&session.id), PlanModeStatus::Enabled);
        Ok(session)
    }

    pub async fn disable_plan_mode(&self) -> Result<()> {
        self.finish_plan_mode(PlanExit::Disable).await
    }

    /// Leaves plan mode and tells the work session to implement the plan file.
    pub async fn accept_plan(&self) -> Result<()> {
        self.finish_plan_mode(PlanExit::Accept).await
    }

    /// Leaves plan mode and tells the work session to discard the plan file.
    pub async fn reject_plan(&self) -> Result<()> {
        self.finish_plan_mode(PlanExit::Reject).await
    }

    /// Sends a user turn to the driving session.
    ///
    /// If that session turns out to be expired it is replaced and the text is
    /// sent once more to the replacement. Plan mode survives a work-session
    /// replacement.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let kind = self.state.lock().await.driving;
        self.deliver(kind, text).await
    }

    /// Replaces a session the host learned has expired. Plan mode is left as
    /// it is; a replaced work session keeps its plan session and plan file.
    pub async fn recover_expired_session(&self, session_id: &str) -> Result<Session> {
        let kind = {
            let state = self.state.lock().await;
            [SessionKind::Work, SessionKind::Plan]
                .into_iter()
                .find(|kind| state.live(*kind).is_some_and(|l| l.session.id == session_id))
                .ok_or(TetherError::NoActiveSession)?
        };
        self.replace_if_current(kind, session_id).await
    }

    /// Best-effort stop of the driving session's current turn. Never touches
    /// an in-flight resume.
    pub async fn abort(&self) -> Result<()> {
        let session = self
            .driving_session()
            .await
            .ok_or(TetherError::NoActiveSession)?;
        if let Err(e) = self.supervisor.agent().abort(&session.id).await {
            tracing::warn!(session_id = %session.id, "abort was not acknowledged: {e:#}");
        }
        if let Some(live) = self.state.lock().await.live(session.kind) {
            if live.session.id == session.id {
                live.tasks.set_status(SessionStatus::Aborted);
            }
        }
        self.supervisor.events().fire(TetherEvent::SessionStatus {
            session_id: session.id,
            kind: session.kind,
            status: SessionStatus::Aborted,
        });
        Ok(())
    }

    /// Stops both sessions and disposes the event channel. Waits for any
    /// start, plan-mode transition or replacement already in progress; later
    /// calls that would create a session fail with [`TetherError::ShutDown`].
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let (plan, work) = {
            let mut state = self.state.lock().await;
            state.closed = true;
            self.set_mode(PlanModeState::Disabled);
            state.driving = SessionKind::Work;
            (state.plan.take(), state.work.take())
        };
        for live in [plan, work].into_iter().flatten() {
            self.stop_live(live).await;
        }
        self.supervisor.events().dispose();
    }

    async fn finish_plan_mode(&self, exit: PlanExit) -> Result<()> {
        let lifecycle = self.lifecycle.lock().await;
        let (plan, plan_file) = {
            let mut state = self.state.lock().await;
            self.expect_mode(PlanModeState::Enabled, exit.operation())?;
            self.set_mode(PlanModeState::Disabling);
            (state.plan.take(), state.plan_file.clone())
        };

        let plan_session_id = plan.as_ref().map(|p| p.session.id.clone());
        if let Some(plan) = plan {
            self.stop_live(plan).await;
        }

        let work_id = {
            let mut state = self.state.lock().await;
            state.driving = SessionKind::Work;
            self.set_mode(PlanModeState::Disabled);
            state.work.as_ref().map(|w| w.session.id.clone())
        };
        drop(lifecycle);
        let Some(work_id) = work_id else {
            return Err(TetherError::NoActiveSession);
        };
        self.publish_plan_mode(&work_id, plan_session_id.as_deref(), exit.status());

        match plan_file.and_then(|path| exit.work_signal(&path)) {
            Some(signal) => self.deliver(SessionKind::Work, &signal).await,
            None => Ok(()),
        }
    }

    async fn deliver(&self, kind: SessionKind, text: &str) -> Result<()> {
        let session_id = {
            let state = self.state.lock().await;
            state
                .live(kind)
                .map(|l| l.session.id.clone())
                .ok_or(TetherError::NoActiveSession)?
        };

        tracing::debug!(
            session_id = %session_id,
            kind = kind.as_str(),
            text = %redact_text(text),
            "sending user turn"
        );
        let agent = self.supervisor.agent();
        let err = match agent.send_message(&session_id, text).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if classify_error(&err) != FailureClassification::SessionExpired {
            return Err(self.send_failed(&session_id, err));
        }

        tracing::warn!(
            session_id = %session_id,
            kind = kind.as_str(),
            "session expired while sending, replacing it"
        );
        let replacement = self.replace_if_current(kind, &session_id).await?;
        agent
            .send_message(&replacement.id, text)
            .await
            .map_err(|e| self.send_failed(&replacement.id, e))
    }

    fn send_failed(&self, session_id: &str, err: anyhow::Error) -> TetherError {
        let message = format!("{err:#}");
        self.supervisor.events().fire(TetherEvent::SessionError {
            session_id: session_id.to_string(),
            message: message.clone(),
        });
        TetherError::Agent(message)
    }

    /// Replaces `expired_id` unless a concurrent caller already did, in which
    /// case the existing replacement is returned.
    async fn replace_if_current(&self, kind: SessionKind, expired_id: &str) -> Result<Session> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let state = self.state.lock().await;
            state.ensure_open()?;
            match state.live(kind) {
                None => return Err(TetherError::NoActiveSession),
                Some(live) if live.session.id != expired_id => return Ok(live.snapshot()),
                Some(_) => {}
            }
        }
        self.replace_expired(kind, expired_id).await
    }

    /// Callers hold the lifecycle lock.
    async fn replace_expired(&self, kind: SessionKind, expired_id: &str) -> Result<Session> {
        let (session, old) = match kind {
            SessionKind::Work => {
                let session = self.supervisor.establish(None, self.work_options()).await;
                let tasks = self.spawn_tasks(&session, None).await?;
                let mut state = self.state.lock().await;
                if let Some(plan) = state.plan.as_mut() {
                    plan.session.parent_session_id = Some(session.id.clone());
                }
                let old = state.work.replace(LiveSession {
                    session: session.clone(),
                    tasks,
                });
                (session, old)
            }
            SessionKind::Plan => {
                let (work, plan_file) = {
                    let state = self.state.lock().await;
                    let work = state
                        .work
                        .as_ref()
                        .map(|w| w.session.clone())
                        .ok_or(TetherError::NoActiveSession)?;
                    let plan_file = state
                        .plan_file
                        .clone()
                        .ok_or(TetherError::NoActiveSession)?;
                    (work, plan_file)
                };
                let live = self.open_plan_session(&work, &plan_file).await?;
                let session = live.session.clone();
                let old = self.state.lock().await.plan.replace(live);
                (session, old)
            }
        };

        if let Some(old) = old {
            old.tasks.stop().await;
        }
        let events = self.supervisor.events();
        events.fire(TetherEvent::SessionStatus {
            session_id: expired_id.to_string(),
            kind,
            status: SessionStatus::Expired,
        });
        events.fire(TetherEvent::SessionExpired {
            previous_session_id: Some(expired_id.to_string()),
            new_session_id: session.id.clone(),
        });
        emit_event(
            Level::WARN,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "session.replaced",
                component: "orchestrator",
                session_id: Some(session.id.as_str()),
                classification: Some(FailureClassification::SessionExpired.as_str()),
                status: Some(self.plan_mode_state().as_str()),
                detail: Some(expired_id),
                ..Default::default()
            },
        );
        Ok(session)
    }

    async fn open_plan_session(&self, work: &Session, plan_file: &Path) -> Result<LiveSession> {
        if let Some(parent) = plan_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let session = self
            .supervisor
            .establish(None, self.plan_options(work, plan_file))
            .await;
        let tools = self.tool_set(&session.id, plan_file);
        let tasks = self.spawn_tasks(&session, Some(tools)).await?;
        Ok(LiveSession { session, tasks })
    }

    async fn spawn_tasks(
        &self,
        session: &Session,
        tools: Option<GuardedToolSet>,
    ) -> Result<SessionTasks> {
        let agent = self.supervisor.agent();
        match SessionTasks::spawn(agent, session, self.events(), tools).await {
            Ok(tasks) => Ok(tasks),
            Err(e) => {
                if let Err(stop_err) = agent.stop_session(&session.id).await {
                    tracing::debug!(session_id = %session.id, "cleanup stop failed: {stop_err:#}");
                }
                Err(TetherError::Agent(format!(
                    "failed to attach to session {}: {e:#}",
                    session.id
                )))
            }
        }
    }

    async fn stop_live(&self, live: LiveSession) {
        let LiveSession { session, tasks } = live;
        tasks.stop().await;
        if let Err(e) = self.supervisor.agent().stop_session(&session.id).await {
            tracing::warn!(session_id = %session.id, "failed to stop session: {e:#}");
        }
        self.supervisor.events().fire(TetherEvent::SessionStatus {
            session_id: session.id,
            kind: session.kind,
            status: SessionStatus::Stopped,
        });
    }

    fn work_options(&self) -> SessionOptions {
        SessionOptions::work(self.workspace.clone()).with_model(self.config.model.clone())
    }

    fn plan_options(&self, work: &Session, plan_file: &Path) -> SessionOptions {
        SessionOptions {
            kind: SessionKind::Plan,
            model_id: Some(work.model_id.clone()),
            workspace_path: work.workspace_path.clone(),
            parent_session_id: Some(work.id.clone()),
            available_tools: Some(self.config.plan_tools.clone()),
            custom_tools: restricted_tool_schemas(),
            system_prompt_append: Some(format!(
                "You are in plan mode. Explore the workspace without changing it and write your plan to {}. \
                 That file is the only file you may create or edit.",
                plan_file.display()
            )),
        }
    }

    fn tool_set(&self, plan_session_id: &str, plan_file: &Path) -> GuardedToolSet {
        let policy = ToolPolicy::new(self.workspace.clone(), plan_file)
            .with_safe_shell_prefixes(self.config.safe_shell_prefixes.iter().cloned())
            .with_allowed_subagent(self.config.allowed_subagent.clone());
        let backend: Arc<dyn ToolBackend> = match &self.tool_backend {
            Some(backend) => backend.clone(),
            None => Arc::new(
                LocalToolBackend::new(self.workspace.clone())
                    .with_shell_timeout(self.config.shell_timeout())
                    .with_subagents(Arc::new(SessionSubAgents::new(
                        self.supervisor.agent().clone(),
                        plan_session_id,
                    ))),
            ),
        };
        GuardedToolSet::new(policy, backend)
    }

    fn expect_mode(&self, expected: PlanModeState, operation: &'static str) -> Result<()> {
        let current = self.plan_mode_state();
        if current != expected {
            return Err(TetherError::InvalidTransition {
                operation,
                state: current,
            });
        }
        Ok(())
    }

    /// Callers hold the state lock so checks and transitions stay atomic.
    fn set_mode(&self, mode: PlanModeState) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "plan mode transition");
        }
    }

    fn publish_plan_mode(&self, work_id: &str, plan_id: Option<&str>, status: PlanModeStatus) {
        emit_event(
            Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "plan_mode.transition",
                component: "orchestrator",
                session_id: Some(work_id),
                plan_session_id: plan_id,
                status: Some(status.as_str()),
                ..Default::default()
            },
        );
        self.supervisor.events().fire(TetherEvent::PlanMode {
            work_session_id: work_id.to_string(),
            plan_session_id: plan_id.map(ToString::to_string),
            status,
        });
    }
}
