use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use hollowbrook_domain::{
    AgentName, AgentSnapshot, DomainEvent, Effect, EventKind, Location, LocationId,
};
use hollowbrook_llm::{
    AgentContext, ConversationView, LlmProvider, PresentAgent, ToolContext, TurnResult,
    CRITICAL_COMPACTION_TOKENS, PRE_SLEEP_COMPACTION_TOKENS,
};
use hollowbrook_services::{dreams, shared_files};

use crate::context::{TickContext, TurnOutcome};
use crate::pipeline::Phase;

/// Runs the scheduled agents' turns concurrently against the LLM provider.
///
/// For each acting agent: build their perception context, sync shared
/// location files into their workspace, execute the turn (the provider runs
/// tool calls internally against the shared [`ToolContext`]), sync files back
/// out, then record session id, token usage, last-active tick, and any
/// compaction request.
pub struct AgentTurnPhase {
    provider: Arc<dyn LlmProvider>,
    village_root: PathBuf,
    pre_sleep_tokens: u64,
    critical_tokens: u64,
}

impl AgentTurnPhase {
    pub fn new(provider: Arc<dyn LlmProvider>, village_root: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            village_root: village_root.into(),
            pre_sleep_tokens: PRE_SLEEP_COMPACTION_TOKENS,
            critical_tokens: CRITICAL_COMPACTION_TOKENS,
        }
    }

    pub fn with_thresholds(mut self, pre_sleep_tokens: u64, critical_tokens: u64) -> Self {
        self.pre_sleep_tokens = pre_sleep_tokens;
        self.critical_tokens = critical_tokens;
        self
    }

    fn location_of(ctx: &TickContext, agent: &AgentSnapshot) -> Location {
        ctx.world
            .location(&agent.location)
            .cloned()
            .unwrap_or_else(|| Location {
                id: agent.location.clone(),
                name: agent.location.to_string(),
                description: String::new(),
                features: Vec::new(),
                connections: Vec::new(),
            })
    }

    /// Short renderings of recent events this agent would remember.
    fn recent_memories(ctx: &TickContext, agent: &AgentName) -> Vec<String> {
        ctx.recent_events
            .iter()
            .filter_map(|event| memory_line(event, agent))
            .collect()
    }

    fn build_agent_context(
        &self,
        ctx: &TickContext,
        agent: &AgentSnapshot,
        shared_files: Vec<String>,
    ) -> AgentContext {
        let location = Self::location_of(ctx, agent);
        let location_description =
            shared_files::read_location_description(&self.village_root, location.id.as_str())
                .unwrap_or_else(|| location.description.clone());

        let others_present = ctx
            .agents_at_location(&agent.location)
            .into_iter()
            .filter(|other| other.name != agent.name)
            .map(|other| PresentAgent {
                name: other.name.clone(),
                mood: other.mood.clone(),
                is_sleeping: other.is_sleeping,
            })
            .collect();

        let conversation = ctx
            .conversations_for_agent(&agent.name)
            .first()
            .map(|conv| {
                let last_spoken = conv
                    .history
                    .iter()
                    .rposition(|turn| turn.speaker == agent.name);
                let unseen_history = match last_spoken {
                    Some(index) => conv.history[index + 1..].to_vec(),
                    None => conv.history.clone(),
                };
                ConversationView {
                    conversation: (*conv).clone(),
                    unseen_history,
                    is_opener: conv.history.is_empty(),
                    other_participants: conv
                        .participants
                        .iter()
                        .filter(|p| **p != agent.name)
                        .cloned()
                        .collect(),
                }
            });

        let in_conversation_ids: BTreeSet<_> = ctx
            .conversations_for_agent(&agent.name)
            .iter()
            .map(|conv| conv.id.clone())
            .collect();

        let unseen_dreams = dreams::unseen_dreams(&self.village_root, &agent.name, agent.last_active_tick)
            .map(|entries| entries.into_iter().map(|entry| entry.content).collect())
            .unwrap_or_else(|err| {
                warn!(agent = %agent.name, error = %err, "failed to read dreams");
                Vec::new()
            });

        AgentContext {
            agent: agent.clone(),
            tick: ctx.tick,
            timestamp: ctx.timestamp,
            time_period: ctx.time.period(),
            clock: ctx.time.clock(),
            day_number: ctx.time.day_number(),
            weather: ctx.world.weather,
            location_description,
            others_present,
            available_paths: location.connections.clone(),
            recent_memories: Self::recent_memories(ctx, &agent.name),
            unseen_dreams,
            conversation,
            pending_invite: ctx.pending_invites.get(&agent.name).cloned(),
            joinable_conversations: ctx
                .public_conversations_at_location(&agent.location)
                .into_iter()
                .filter(|conv| !in_conversation_ids.contains(&conv.id))
                .cloned()
                .collect(),
            private_conversations_present: ctx
                .private_conversations_at_location(&agent.location)
                .into_iter()
                .filter(|conv| !in_conversation_ids.contains(&conv.id))
                .cloned()
                .collect(),
            unseen_endings: ctx
                .unseen_endings
                .get(&agent.name)
                .cloned()
                .unwrap_or_default(),
            shared_files,
            location,
        }
    }

    fn build_tool_context(&self, ctx: &TickContext, agent: &AgentSnapshot) -> ToolContext {
        let location = Self::location_of(ctx, agent);
        let mut known_locations: Vec<LocationId> = location.connections.clone();
        known_locations.push(location.id.clone());

        ToolContext::new(
            agent.name.clone(),
            agent.location.clone(),
            ctx.conversations_for_agent(&agent.name)
                .first()
                .map(|conv| conv.id.clone()),
            ctx.pending_invites.get(&agent.name).cloned(),
            ctx.agents.keys().cloned().collect(),
            known_locations,
        )
    }

    async fn run_one_turn(
        &self,
        ctx: &TickContext,
        agent: AgentSnapshot,
    ) -> (AgentName, Arc<ToolContext>, TurnResult) {
        let name = agent.name.clone();
        let master_shared = self.village_root.join("shared");
        let location_id = agent.location.clone();

        let agent_dir = match shared_files::ensure_agent_directory(&name, &self.village_root) {
            Ok(dir) => Some(dir),
            Err(err) => {
                warn!(agent = %name, error = %err, "could not prepare agent directory");
                None
            }
        };

        let synced = agent_dir
            .as_ref()
            .map(|dir| {
                shared_files::sync_shared_files_in(dir, location_id.as_str(), &master_shared)
                    .unwrap_or_else(|err| {
                        warn!(agent = %name, error = %err, "shared file sync-in failed");
                        Vec::new()
                    })
            })
            .unwrap_or_default();

        let agent_ctx = self.build_agent_context(ctx, &agent, synced);
        let tool_ctx = Arc::new(self.build_tool_context(ctx, &agent));

        let result = match self
            .provider
            .execute_turn(&agent_ctx, Arc::clone(&tool_ctx))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                // Adapter failure degrades to an empty turn, never a dead tick.
                warn!(agent = %name, error = %err, "turn failed, continuing with empty narrative");
                TurnResult::empty()
            }
        };

        if let Some(dir) = agent_dir {
            if let Err(err) =
                shared_files::sync_shared_files_out(&dir, location_id.as_str(), &master_shared)
            {
                warn!(agent = %name, error = %err, "shared file sync-out failed");
            }
        }

        (name, tool_ctx, result)
    }
}

#[async_trait]
impl Phase for AgentTurnPhase {
    fn name(&self) -> &'static str {
        "agent_turn"
    }

    async fn run(&self, ctx: TickContext) -> Result<TickContext> {
        if ctx.agents_to_act.is_empty() {
            return Ok(ctx);
        }

        let acting: Vec<AgentSnapshot> = ctx
            .agents_to_act
            .iter()
            .filter_map(|name| ctx.agent(name).cloned())
            .collect();

        let turns = join_all(
            acting
                .into_iter()
                .map(|agent| self.run_one_turn(&ctx, agent)),
        )
        .await;

        let mut next = ctx;
        for (name, tool_ctx, result) in turns {
            let agent = next.agent(&name).cloned();
            let Some(agent) = agent else { continue };

            // Effects the provider's tool dispatch queued during the turn.
            next = next.with_effects(tool_ctx.drain_effects());

            if let Some(session_id) = &result.session_id {
                next = next.with_effect(Effect::UpdateSessionId {
                    agent: name.clone(),
                    session_id: session_id.clone(),
                });
            }

            let usage = result.usage;
            if usage.input_tokens > 0 || usage.output_tokens > 0 || usage.context_window() > 0 {
                next = next.with_effect(Effect::RecordAgentTokenUsage {
                    agent: name.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_creation_input_tokens: usage.cache_creation_input_tokens,
                    cache_read_input_tokens: usage.cache_read_input_tokens,
                    model_id: agent.model.id.clone(),
                });
            }

            next = next.with_effect(Effect::UpdateLastActiveTick {
                agent: name.clone(),
                location: agent.location.clone(),
            });

            let tokens = self.provider.token_count(&name);
            if tokens >= self.critical_tokens {
                next = next.with_effect(Effect::ShouldCompact {
                    agent: name.clone(),
                    pre_tokens: tokens,
                    critical: true,
                });
            } else if tokens >= self.pre_sleep_tokens {
                next = next.with_effect(Effect::ShouldCompact {
                    agent: name.clone(),
                    pre_tokens: tokens,
                    critical: false,
                });
            }

            debug!(
                agent = %name,
                narrative_len = result.narrative.len(),
                tools = ?tool_ctx.tools_fired(),
                "turn complete"
            );

            next = next.with_turn_outcome(
                name.clone(),
                TurnOutcome {
                    narrative: result.narrative,
                    narrative_with_tools: result.narrative_with_tools,
                    interpretation: None,
                },
            );
            next = next.with_agent_acted(name);
        }

        Ok(next)
    }
}

/// Render an event into a one-line memory for an agent's perception, or
/// `None` when the event would not be memorable to them.
fn memory_line(event: &DomainEvent, agent: &AgentName) -> Option<String> {
    match &event.kind {
        EventKind::AgentMoved {
            agent: mover,
            to_location,
            ..
        } if mover == agent => Some(format!("You moved to {to_location}.")),
        EventKind::AgentAction {
            agent: actor,
            description,
            ..
        } if actor == agent => Some(format!("You {description}.")),
        EventKind::ConversationTurn {
            speaker, narrative, ..
        } if speaker != agent => Some(format!("{speaker} said: {narrative}")),
        EventKind::WorldEvent {
            description,
            agents_involved,
            ..
        } if agents_involved.is_empty() || agents_involved.contains(agent) => {
            Some(description.clone())
        }
        EventKind::WeatherChanged { new_weather, .. } => {
            Some(format!("The weather turned {new_weather}."))
        }
        _ => None,
    }
}
