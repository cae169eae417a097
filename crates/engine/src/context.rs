//! The immutable per-tick state carrier.
//!
//! A [`TickContext`] holds everything a tick needs and accumulates effects
//! and events as phases execute. Phases never mutate it in place: each
//! `with_*` method consumes the context and returns a new one with the
//! change applied. The engine commits the accumulated events after the last
//! phase completes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use hollowbrook_domain::{
    AgentName, AgentSnapshot, Conversation, ConversationId, DomainEvent, Effect, Invitation,
    LocationId, Privacy, ScheduledEvent, TimeSnapshot, UnseenConversationEnding, WorldSnapshot,
};
use hollowbrook_llm::TurnInterpretation;

/// What one agent's turn produced, enriched by the interpret phase.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub narrative: String,
    pub narrative_with_tools: Option<String>,
    pub interpretation: Option<TurnInterpretation>,
}

#[derive(Debug, Clone)]
pub struct TickContext {
    // Tick identity
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub time: TimeSnapshot,

    // World state read from the store at tick start
    pub world: WorldSnapshot,
    pub agents: BTreeMap<AgentName, AgentSnapshot>,
    pub conversations: BTreeMap<ConversationId, Conversation>,
    pub pending_invites: BTreeMap<AgentName, Invitation>,
    pub unseen_endings: BTreeMap<AgentName, Vec<UnseenConversationEnding>>,

    // Scheduled events popped for this tick
    pub scheduled_events: Vec<ScheduledEvent>,
    /// Agents whose move event fired in the previous tick, for visitor wakes.
    pub recent_arrivals: BTreeSet<AgentName>,
    /// Recent committed events, for agent perception.
    pub recent_events: Vec<DomainEvent>,

    // Accumulated during phase execution
    pub effects: Vec<Effect>,
    pub events: Vec<DomainEvent>,
    pub turn_outcomes: BTreeMap<AgentName, TurnOutcome>,

    pub agents_to_act: BTreeSet<AgentName>,
    pub agents_acted: BTreeSet<AgentName>,
}

impl TickContext {
    // ── Transformations ──────────────────────────────────────────────────────

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn with_event(mut self, event: DomainEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = DomainEvent>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn with_turn_outcome(mut self, agent: AgentName, outcome: TurnOutcome) -> Self {
        self.turn_outcomes.insert(agent, outcome);
        self
    }

    pub fn with_agents_to_act(mut self, agents: BTreeSet<AgentName>) -> Self {
        self.agents_to_act = agents;
        self
    }

    pub fn with_agent_acted(mut self, agent: AgentName) -> Self {
        self.agents_acted.insert(agent);
        self
    }

    pub fn with_updated_agent(mut self, agent: AgentSnapshot) -> Self {
        // Keep the world's location index in step so invariant checks hold
        // mid-tick as well as after commit.
        self.world = self
            .world
            .with_agent_location(agent.name.clone(), agent.location.clone());
        self.agents.insert(agent.name.clone(), agent);
        self
    }

    pub fn with_updated_world(mut self, world: WorldSnapshot) -> Self {
        self.world = world;
        self
    }

    pub fn with_updated_conversation(mut self, conversation: Conversation) -> Self {
        self.conversations
            .insert(conversation.id.clone(), conversation);
        self
    }

    pub fn with_removed_conversation(mut self, id: &ConversationId) -> Self {
        self.conversations.remove(id);
        self
    }

    pub fn with_added_invite(mut self, invite: Invitation) -> Self {
        self.pending_invites.insert(invite.invitee.clone(), invite);
        self
    }

    pub fn with_removed_invite(mut self, invitee: &AgentName) -> Self {
        self.pending_invites.remove(invitee);
        self
    }

    pub fn with_unseen_ending(
        mut self,
        agent: AgentName,
        ending: UnseenConversationEnding,
    ) -> Self {
        self.unseen_endings.entry(agent).or_default().push(ending);
        self
    }

    pub fn with_cleared_unseen_ending(
        mut self,
        agent: &AgentName,
        conversation_id: &ConversationId,
    ) -> Self {
        if let Some(endings) = self.unseen_endings.get_mut(agent) {
            endings.retain(|ending| &ending.conversation_id != conversation_id);
            if endings.is_empty() {
                self.unseen_endings.remove(agent);
            }
        }
        self
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn agent(&self, name: &AgentName) -> Option<&AgentSnapshot> {
        self.agents.get(name)
    }

    pub fn agents_at_location(&self, location: &LocationId) -> Vec<&AgentSnapshot> {
        self.agents
            .values()
            .filter(|agent| &agent.location == location)
            .collect()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations_for_agent(&self, agent: &AgentName) -> Vec<&Conversation> {
        self.conversations
            .values()
            .filter(|conv| conv.is_participant(agent))
            .collect()
    }

    pub fn public_conversations_at_location(&self, location: &LocationId) -> Vec<&Conversation> {
        self.conversations
            .values()
            .filter(|conv| &conv.location == location && conv.privacy == Privacy::Public)
            .collect()
    }

    pub fn private_conversations_at_location(&self, location: &LocationId) -> Vec<&Conversation> {
        self.conversations
            .values()
            .filter(|conv| &conv.location == location && conv.privacy == Privacy::Private)
            .collect()
    }
}

/// What the engine receives after pipeline execution.
#[derive(Debug, Clone)]
pub struct TickResult {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<DomainEvent>,
    pub effects: Vec<Effect>,
    pub turn_outcomes: BTreeMap<AgentName, TurnOutcome>,
    pub agents_acted: BTreeSet<AgentName>,
}

impl TickResult {
    pub fn from_context(ctx: TickContext) -> Self {
        Self {
            tick: ctx.tick,
            timestamp: ctx.timestamp,
            events: ctx.events,
            effects: ctx.effects,
            turn_outcomes: ctx.turn_outcomes,
            agents_acted: ctx.agents_acted,
        }
    }
}
