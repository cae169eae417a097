use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use hollowbrook_domain::{
    AgentName, AgentSnapshot, Conversation, ConversationId, ConversationTurn, Effect, Invitation,
    Location, LocationId, TimePeriod, UnseenConversationEnding, Weather,
};

/// Compaction is requested once an agent's context crosses this size, but
/// only executed if the agent also goes to sleep in the same tick.
pub const PRE_SLEEP_COMPACTION_TOKENS: u64 = 100_000;
/// Above this size compaction always runs.
pub const CRITICAL_COMPACTION_TOKENS: u64 = 150_000;

/// Another agent visible at the same location.
#[derive(Debug, Clone)]
pub struct PresentAgent {
    pub name: AgentName,
    pub mood: String,
    pub is_sleeping: bool,
}

/// The slice of a conversation an agent perceives when taking a turn in it.
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub conversation: Conversation,
    /// Turns since the agent last spoke.
    pub unseen_history: Vec<ConversationTurn>,
    pub is_opener: bool,
    pub other_participants: Vec<AgentName>,
}

/// Everything an agent perceives at the start of their turn. Built by the
/// turn phase from the tick context; opaque prompt prose is the provider's
/// business.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent: AgentSnapshot,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub time_period: TimePeriod,
    pub clock: String,
    pub day_number: i64,
    pub weather: Weather,
    pub location: Location,
    /// Location description, possibly overridden by the shared
    /// `description.md` the agents maintain themselves.
    pub location_description: String,
    pub others_present: Vec<PresentAgent>,
    pub available_paths: Vec<LocationId>,
    /// Rendered recent events involving this agent.
    pub recent_memories: Vec<String>,
    pub unseen_dreams: Vec<String>,
    pub conversation: Option<ConversationView>,
    pub pending_invite: Option<Invitation>,
    /// Public conversations at this location the agent could join.
    pub joinable_conversations: Vec<Conversation>,
    /// Private conversations at this location (awareness only).
    pub private_conversations_present: Vec<Conversation>,
    pub unseen_endings: Vec<UnseenConversationEnding>,
    pub shared_files: Vec<String>,
}

/// Per-agent, per-turn tool state.
///
/// Tool processors may run on a background task inside the provider, so the
/// effect queue is mutex-guarded; the turn phase drains it exactly once after
/// the provider's terminal result arrives.
#[derive(Debug)]
pub struct ToolContext {
    pub agent: AgentName,
    pub location: LocationId,
    /// The conversation the agent is currently in, if any.
    pub conversation_id: Option<ConversationId>,
    pub pending_invite: Option<Invitation>,
    pub known_agents: Vec<AgentName>,
    pub known_locations: Vec<LocationId>,
    effects: Mutex<Vec<Effect>>,
    tools_fired: Mutex<Vec<String>>,
}

impl ToolContext {
    pub fn new(
        agent: AgentName,
        location: LocationId,
        conversation_id: Option<ConversationId>,
        pending_invite: Option<Invitation>,
        known_agents: Vec<AgentName>,
        known_locations: Vec<LocationId>,
    ) -> Self {
        Self {
            agent,
            location,
            conversation_id,
            pending_invite,
            known_agents,
            known_locations,
            effects: Mutex::new(Vec::new()),
            tools_fired: Mutex::new(Vec::new()),
        }
    }

    pub fn push_effect(&self, effect: Effect) {
        self.effects.lock().expect("tool effect queue poisoned").push(effect);
    }

    pub fn record_tool(&self, name: &str) {
        self.tools_fired
            .lock()
            .expect("tool log poisoned")
            .push(name.to_string());
    }

    /// Single-consumer drain, called once per turn by the turn phase.
    pub fn drain_effects(&self) -> Vec<Effect> {
        std::mem::take(&mut *self.effects.lock().expect("tool effect queue poisoned"))
    }

    pub fn tools_fired(&self) -> Vec<String> {
        self.tools_fired.lock().expect("tool log poisoned").clone()
    }

    /// Whether a leave effect with a final message was queued this turn.
    /// The interpret phase uses this to avoid double-recording the narrative.
    pub fn has_leave_with_last_message(&self) -> bool {
        self.effects
            .lock()
            .expect("tool effect queue poisoned")
            .iter()
            .any(|effect| {
                matches!(
                    effect,
                    Effect::LeaveConversation {
                        last_message: Some(_),
                        ..
                    }
                )
            })
    }
}

/// Token usage reported for one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TurnUsage {
    /// The context-window size implied by this turn.
    pub fn context_window(&self) -> u64 {
        self.cache_read_input_tokens + self.input_tokens
    }
}

/// What comes back from a single `execute_turn` call.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub narrative: String,
    pub narrative_with_tools: Option<String>,
    pub session_id: Option<String>,
    pub usage: TurnUsage,
}

impl TurnResult {
    /// Degraded result used when the provider fails: no narrative, no effects.
    pub fn empty() -> Self {
        Self {
            narrative: String::new(),
            narrative_with_tools: None,
            session_id: None,
            usage: TurnUsage::default(),
        }
    }
}

/// The LLM provider contract consumed by the core.
///
/// A provider is expected to keep one live session per agent across ticks and
/// to execute tool calls internally by invoking the registered processors
/// against the shared [`ToolContext`]. The context is shared by `Arc` because
/// tool dispatch may run on the session's background task.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn execute_turn(
        &self,
        agent_ctx: &AgentContext,
        tool_ctx: Arc<ToolContext>,
    ) -> Result<TurnResult>;

    /// Re-establish per-agent context-window counters on recovery.
    fn restore_token_counts(&self, agents: &BTreeMap<AgentName, AgentSnapshot>);

    /// Notify the provider that a session was compacted externally.
    fn reset_session_after_compaction(&self, agent: &AgentName, new_count: u64);

    /// Current context-window size for an agent, as the provider tracks it.
    fn token_count(&self, agent: &AgentName) -> u64;

    /// Graceful shutdown: end all live sessions.
    async fn disconnect_all(&self) -> Result<()>;
}

/// Context compaction, delegated to an external service. May block on I/O.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Compact the agent's session; returns the post-compaction token count.
    async fn execute_compact(&self, agent: &AgentName, critical: bool) -> Result<u64>;
}
