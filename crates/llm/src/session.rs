//! Per-agent LLM sessions as long-lived tasks.
//!
//! Each agent's session is one tokio task owning a request channel. A turn is
//! strictly send → receive-until-terminal: the pool pushes a message and
//! awaits the session's single reply. Sessions survive across ticks, which is
//! what gives agents continuity of context, and are cancelled and awaited on
//! shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use hollowbrook_domain::{AgentName, AgentSnapshot};

use crate::provider::{AgentContext, Compactor, LlmProvider, ToolContext, TurnResult};

/// State owned by one session task.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub turns_handled: u64,
}

/// The pluggable half of a session: turns a context into a narrative, and
/// performs compaction when asked.
#[async_trait]
pub trait TurnHandler: Send + Sync + 'static {
    async fn handle_turn(
        &self,
        agent_ctx: &AgentContext,
        tool_ctx: &ToolContext,
        session: &mut SessionState,
    ) -> Result<TurnResult>;

    /// Compact the session's context; returns the post-compaction token count.
    async fn compact(
        &self,
        agent: &AgentName,
        critical: bool,
        current_tokens: u64,
    ) -> Result<u64>;
}

enum SessionMessage {
    Turn {
        agent_ctx: Box<AgentContext>,
        tool_ctx: Arc<ToolContext>,
        reply: oneshot::Sender<Result<TurnResult>>,
    },
    Compact {
        critical: bool,
        current_tokens: u64,
        reply: oneshot::Sender<Result<u64>>,
    },
}

struct SessionHandle {
    tx: mpsc::Sender<SessionMessage>,
    task: JoinHandle<()>,
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn run_session<H: TurnHandler>(
    agent: AgentName,
    handler: Arc<H>,
    mut rx: mpsc::Receiver<SessionMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = SessionState {
            session_id: format!(
                "sess-{}-{:06}",
                agent.as_str().to_lowercase(),
                SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
            turns_handled: 0,
        };
        debug!(agent = %agent, session = %state.session_id, "session task started");

        while let Some(message) = rx.recv().await {
            match message {
                SessionMessage::Turn {
                    agent_ctx,
                    tool_ctx,
                    reply,
                } => {
                    let result = handler.handle_turn(&agent_ctx, &tool_ctx, &mut state).await;
                    if result.is_ok() {
                        state.turns_handled += 1;
                    }
                    let _ = reply.send(result);
                }
                SessionMessage::Compact {
                    critical,
                    current_tokens,
                    reply,
                } => {
                    let result = handler.compact(&agent, critical, current_tokens).await;
                    let _ = reply.send(result);
                }
            }
        }
        debug!(agent = %agent, session = %state.session_id, "session task ended");
    })
}

/// An [`LlmProvider`] built from one [`TurnHandler`]-driven session per agent.
///
/// Also the provider-side home of per-agent context-window counters, restored
/// on recovery and reset after compaction.
pub struct SessionPool<H: TurnHandler> {
    handler: Arc<H>,
    sessions: tokio::sync::Mutex<BTreeMap<AgentName, SessionHandle>>,
    token_counts: Mutex<BTreeMap<AgentName, u64>>,
}

impl<H: TurnHandler> SessionPool<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            sessions: tokio::sync::Mutex::new(BTreeMap::new()),
            token_counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    async fn sender_for(&self, agent: &AgentName) -> mpsc::Sender<SessionMessage> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions.entry(agent.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(8);
            let task = run_session(agent.clone(), Arc::clone(&self.handler), rx);
            SessionHandle { tx, task }
        });
        handle.tx.clone()
    }

    fn set_token_count(&self, agent: &AgentName, count: u64) {
        self.token_counts
            .lock()
            .expect("token counter poisoned")
            .insert(agent.clone(), count);
    }
}

#[async_trait]
impl<H: TurnHandler> LlmProvider for SessionPool<H> {
    async fn execute_turn(
        &self,
        agent_ctx: &AgentContext,
        tool_ctx: Arc<ToolContext>,
    ) -> Result<TurnResult> {
        let agent = agent_ctx.agent.name.clone();
        let tx = self.sender_for(&agent).await;
        let (reply_tx, reply_rx) = oneshot::channel();

        tx.send(SessionMessage::Turn {
            agent_ctx: Box::new(agent_ctx.clone()),
            tool_ctx,
            reply: reply_tx,
        })
        .await
        .map_err(|_| anyhow!("session for {agent} is gone"))?;

        let result = reply_rx
            .await
            .map_err(|_| anyhow!("session for {agent} dropped its reply"))??;

        self.set_token_count(&agent, result.usage.context_window());
        Ok(result)
    }

    fn restore_token_counts(&self, agents: &BTreeMap<AgentName, AgentSnapshot>) {
        let mut counts = self.token_counts.lock().expect("token counter poisoned");
        for (name, agent) in agents {
            counts.insert(name.clone(), agent.token_usage.session_tokens);
        }
    }

    fn reset_session_after_compaction(&self, agent: &AgentName, new_count: u64) {
        self.set_token_count(agent, new_count);
    }

    fn token_count(&self, agent: &AgentName) -> u64 {
        self.token_counts
            .lock()
            .expect("token counter poisoned")
            .get(agent)
            .copied()
            .unwrap_or(0)
    }

    async fn disconnect_all(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let handles: Vec<(AgentName, SessionHandle)> = std::mem::take(&mut *sessions)
            .into_iter()
            .collect();
        drop(sessions);

        for (agent, handle) in handles {
            // Dropping the sender ends the task's receive loop.
            drop(handle.tx);
            if let Err(err) = handle.task.await {
                warn!(agent = %agent, error = %err, "session task did not shut down cleanly");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: TurnHandler> Compactor for SessionPool<H> {
    async fn execute_compact(&self, agent: &AgentName, critical: bool) -> Result<u64> {
        let current_tokens = self.token_count(agent);
        let tx = self.sender_for(agent).await;
        let (reply_tx, reply_rx) = oneshot::channel();

        tx.send(SessionMessage::Compact {
            critical,
            current_tokens,
            reply: reply_tx,
        })
        .await
        .map_err(|_| anyhow!("session for {agent} is gone"))?;

        let post_tokens = reply_rx
            .await
            .map_err(|_| anyhow!("session for {agent} dropped its reply"))??;
        self.set_token_count(agent, post_tokens);
        Ok(post_tokens)
    }
}
