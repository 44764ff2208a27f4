//! Background tasks owned by one live session.
//!
//! Every session gets a forwarder that republishes the agent's event feed on
//! the [`EventChannel`]. Plan sessions also get a tool service that answers
//! delegated tool calls through the guarded tool set, one call at a time.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tether_tools::{GuardedToolSet, SubAgentDispatcher};
use tether_types::{Session, SessionKind, SessionStatus, TetherEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentClient, AgentEventStream, PendingToolCall};
use crate::event_channel::EventChannel;

pub struct SessionTasks {
    session_id: String,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    /// Latest status reported for the session, starting from the one it was created with.
    status: Arc<watch::Sender<SessionStatus>>,
}

impl SessionTasks {
    /// Subscribes to the session's feeds and starts its tasks. Subscription
    /// errors are returned before anything is spawned.
    pub async fn spawn(
        agent: &Arc<dyn AgentClient>,
        session: &Session,
        events: EventChannel<TetherEvent>,
        tools: Option<GuardedToolSet>,
    ) -> anyhow::Result<Self> {
        let stream = agent.subscribe_events(&session.id).await?;
        let calls = match tools {
            Some(tools) => Some((agent.subscribe_tool_calls(&session.id).await?, tools)),
            None => None,
        };

        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(session.status);
        let status = Arc::new(status);
        let mut handles = vec![tokio::spawn(forward_events(
            session.id.clone(),
            session.kind,
            stream,
            events,
            status.clone(),
            cancel.clone(),
        ))];
        if let Some((calls, tools)) = calls {
            handles.push(tokio::spawn(serve_tool_calls(
                session.id.clone(),
                calls,
                tools,
                cancel.clone(),
            )));
        }

        Ok(Self {
            session_id: session.id.clone(),
            cancel,
            handles,
            status,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Records a status the supervisor itself caused, such as an abort.
    pub fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                tracing::warn!(session_id = %self.session_id, "session task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward_events(
    session_id: String,
    kind: SessionKind,
    mut stream: AgentEventStream,
    events: EventChannel<TetherEvent>,
    status: Arc<watch::Sender<SessionStatus>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    let event = TetherEvent::from_agent(&session_id, kind, event);
                    if let TetherEvent::SessionStatus { status: current, .. } = &event {
                        status.send_replace(*current);
                    }
                    events.fire(event);
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, "agent event feed error: {e:#}");
                    events.fire(TetherEvent::SessionError {
                        session_id: session_id.clone(),
                        message: format!("{e:#}"),
                    });
                }
                None => {
                    tracing::debug!(session_id = %session_id, "agent event feed ended");
                    break;
                }
            },
        }
    }
}

async fn serve_tool_calls(
    session_id: String,
    mut calls: mpsc::Receiver<PendingToolCall>,
    tools: GuardedToolSet,
    cancel: CancellationToken,
) {
    loop {
        let call = tokio::select! {
            _ = cancel.cancelled() => break,
            call = calls.recv() => call,
        };
        let Some(PendingToolCall { request, responder }) = call else {
            tracing::debug!(session_id = %session_id, "tool-call channel closed");
            break;
        };
        let response = tools.handle(&request).await;
        tracing::debug!(
            session_id = %session_id,
            call_id = %request.call_id,
            tool = %request.tool_name,
            result = ?response.result_kind,
            "answered delegated tool call"
        );
        if responder.send(response).is_err() {
            tracing::debug!(session_id = %session_id, "tool caller went away before the answer");
        }
    }
}

/// Dispatches sub-agents inside the agent process on behalf of one session.
pub struct SessionSubAgents {
    agent: Arc<dyn AgentClient>,
    session_id: String,
}

impl SessionSubAgents {
    pub fn new(agent: Arc<dyn AgentClient>, session_id: impl Into<String>) -> Self {
        Self {
            agent,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl SubAgentDispatcher for SessionSubAgents {
    async fn dispatch(&self, agent_type: &str, prompt: &str) -> anyhow::Result<String> {
        self.agent
            .dispatch_subagent(&self.session_id, agent_type, prompt)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;
    use tether_tools::{RestrictedTool, ToolBackend, ToolPolicy};
    use tether_types::{
        AgentEvent, SessionStatus, ToolCallRequest, ToolResponse, ToolResultKind,
    };
    use tokio::sync::oneshot;

    use crate::agent::SessionOptions;

    struct FeedAgent {
        feed: Mutex<Option<mpsc::UnboundedReceiver<anyhow::Result<AgentEvent>>>>,
        calls: Mutex<Option<mpsc::Receiver<PendingToolCall>>>,
    }

    #[async_trait]
    impl AgentClient for FeedAgent {
        async fn create_or_resume_session(
            &self,
            _session_id: Option<&str>,
            _options: &SessionOptions,
        ) -> anyhow::Result<Session> {
            anyhow::bail!("not used")
        }
        async fn send_message(&self, _session_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn abort(&self, _session_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop_session(&self, _session_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn subscribe_events(&self, _session_id: &str) -> anyhow::Result<AgentEventStream> {
            let rx = self
                .feed
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("already subscribed"))?;
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })))
        }
        async fn subscribe_tool_calls(
            &self,
            _session_id: &str,
        ) -> anyhow::Result<mpsc::Receiver<PendingToolCall>> {
            self.calls
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("no tool channel"))
        }
        async fn dispatch_subagent(
            &self,
            session_id: &str,
            agent_type: &str,
            _prompt: &str,
        ) -> anyhow::Result<String> {
            Ok(format!("{agent_type}@{session_id}"))
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl ToolBackend for EchoBackend {
        async fn execute(&self, tool: RestrictedTool, _args: &serde_json::Value) -> anyhow::Result<String> {
            Ok(tool.name().to_string())
        }
    }

    fn session(kind: SessionKind) -> Session {
        Session::new("s-1", kind, "gpt-5", "/ws")
    }

    #[tokio::test]
    async fn forwards_feed_onto_channel_in_order() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let agent: Arc<dyn AgentClient> = Arc::new(FeedAgent {
            feed: Mutex::new(Some(feed_rx)),
            calls: Mutex::new(None),
        });
        let events = EventChannel::new();
        let tasks = SessionTasks::spawn(&agent, &session(SessionKind::Work), events.clone(), None)
            .await
            .unwrap();

        feed_tx.send(Ok(AgentEvent::TurnStart)).unwrap();
        feed_tx
            .send(Ok(AgentEvent::Usage {
                input_tokens: 10,
                output_tokens: 4,
            }))
            .unwrap();
        feed_tx.send(Ok(AgentEvent::TurnEnd)).unwrap();
        drop(feed_tx);

        let mut sub = events.subscribe();
        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        let third = sub.recv().await.unwrap();
        assert!(matches!(
            first,
            TetherEvent::SessionStatus {
                status: SessionStatus::Thinking,
                ..
            }
        ));
        assert!(matches!(second, TetherEvent::Usage { input_tokens: 10, .. }));
        assert!(matches!(
            third,
            TetherEvent::SessionStatus {
                status: SessionStatus::Idle,
                ..
            }
        ));
        assert_eq!(tasks.status(), SessionStatus::Idle);
        tasks.set_status(SessionStatus::Aborted);
        assert_eq!(tasks.status(), SessionStatus::Aborted);
        tasks.stop().await;
    }

    #[tokio::test]
    async fn tool_service_answers_through_guard() {
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (call_tx, call_rx) = mpsc::channel(4);
        let agent: Arc<dyn AgentClient> = Arc::new(FeedAgent {
            feed: Mutex::new(Some(feed_rx)),
            calls: Mutex::new(Some(call_rx)),
        });
        let tools = GuardedToolSet::new(
            ToolPolicy::new("/ws", "/ws/plan.md"),
            Arc::new(EchoBackend),
        );
        let tasks = SessionTasks::spawn(
            &agent,
            &session(SessionKind::Plan),
            EventChannel::new(),
            Some(tools),
        )
        .await
        .unwrap();

        let mut answers = Vec::new();
        for (name, args) in [
            ("bash", json!({"command": "rm -rf /"})),
            ("edit", json!({"path": "/ws/plan.md", "old_str": "a", "new_str": "b"})),
            ("format_disk", json!({})),
        ] {
            let (tx, rx) = oneshot::channel::<ToolResponse>();
            call_tx
                .send(PendingToolCall {
                    request: ToolCallRequest::new(name, args, SessionKind::Plan),
                    responder: tx,
                })
                .await
                .unwrap();
            answers.push(rx.await.unwrap().result_kind);
        }

        assert_eq!(
            answers,
            vec![
                ToolResultKind::Denied,
                ToolResultKind::Success,
                ToolResultKind::Failure
            ]
        );
        tasks.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_idle_forwarder() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel::<anyhow::Result<AgentEvent>>();
        let agent: Arc<dyn AgentClient> = Arc::new(FeedAgent {
            feed: Mutex::new(Some(feed_rx)),
            calls: Mutex::new(None),
        });
        let tasks = SessionTasks::spawn(&agent, &session(SessionKind::Work), EventChannel::new(), None)
            .await
            .unwrap();
        tasks.stop().await;
        assert!(feed_tx.is_closed());
    }

    #[tokio::test]
    async fn subagents_are_dispatched_for_the_bound_session() {
        let agent: Arc<dyn AgentClient> = Arc::new(FeedAgent {
            feed: Mutex::new(None),
            calls: Mutex::new(None),
        });
        let dispatcher = SessionSubAgents::new(agent, "plan-7");
        assert_eq!(
            dispatcher.dispatch("explore", "map it").await.unwrap(),
            "explore@plan-7"
        );
    }
}
