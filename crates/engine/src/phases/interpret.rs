use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use hollowbrook_domain::{AgentName, Effect};
use hollowbrook_llm::{Interpreter, InterpreterContext, InterpreterTokenUsage, TurnInterpretation};

use crate::context::{TickContext, TurnOutcome};
use crate::pipeline::Phase;

/// Runs the narrative interpreter over every turn produced this tick and
/// translates its observations into effects.
///
/// The interpreter reports movement, mood, sleep/rest intent, actions, and
/// next-speaker suggestions. Conversation lifecycle effects come from the
/// agents' own tool calls, never from here.
pub struct InterpretPhase {
    interpreter: Arc<dyn Interpreter>,
}

impl InterpretPhase {
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self { interpreter }
    }

    fn interpreter_context(ctx: &TickContext, agent: &AgentName) -> Option<InterpreterContext> {
        let snapshot = ctx.agent(agent)?;
        let available_paths = ctx
            .world
            .location(&snapshot.location)
            .map(|location| location.connections.clone())
            .unwrap_or_default();
        let present_agents = ctx
            .agents_at_location(&snapshot.location)
            .into_iter()
            .filter(|other| &other.name != agent && !other.is_sleeping)
            .map(|other| other.name.clone())
            .collect();
        Some(InterpreterContext {
            current_location: snapshot.location.clone(),
            available_paths,
            present_agents,
        })
    }

    fn observation_effects(
        ctx: &TickContext,
        agent: &AgentName,
        interpretation: &TurnInterpretation,
        narrative_with_tools: Option<&str>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(snapshot) = ctx.agent(agent) else {
            return effects;
        };

        if let Some(destination) = &interpretation.movement {
            effects.push(Effect::MoveAgent {
                agent: agent.clone(),
                from_location: snapshot.location.clone(),
                to_location: destination.clone(),
            });
        }

        if let Some(mood) = &interpretation.mood_expressed {
            if mood != &snapshot.mood {
                effects.push(Effect::UpdateMood {
                    agent: agent.clone(),
                    mood: mood.clone(),
                });
            }
        }

        if interpretation.wants_to_sleep {
            effects.push(Effect::AgentSleep {
                agent: agent.clone(),
            });
        }

        for action in &interpretation.actions_described {
            effects.push(Effect::RecordAction {
                agent: agent.clone(),
                description: action.clone(),
            });
        }

        // If the agent is in a conversation, their narrative is the turn -
        // unless they already left with a final message, which captured it.
        let left_with_message = ctx.effects.iter().any(|effect| {
            matches!(
                effect,
                Effect::LeaveConversation {
                    agent: leaver,
                    last_message: Some(_),
                    ..
                } if leaver == agent
            )
        });

        let conversations = ctx.conversations_for_agent(agent);
        if let Some(conv) = conversations.first() {
            if !left_with_message && !interpretation.narrative.is_empty() {
                effects.push(Effect::AddConversationTurn {
                    conversation_id: conv.id.clone(),
                    speaker: agent.clone(),
                    narrative: interpretation.narrative.clone(),
                    narrative_with_tools: narrative_with_tools.map(ToString::to_string),
                });
            }

            if let Some(suggested) = &interpretation.suggested_next_speaker {
                if conv.is_participant(suggested) {
                    effects.push(Effect::SetNextSpeaker {
                        conversation_id: conv.id.clone(),
                        speaker: suggested.clone(),
                    });
                }
            }
        }

        effects
    }
}

#[async_trait]
impl Phase for InterpretPhase {
    fn name(&self) -> &'static str {
        "interpret"
    }

    async fn run(&self, ctx: TickContext) -> Result<TickContext> {
        if ctx.turn_outcomes.is_empty() {
            return Ok(ctx);
        }

        let jobs: Vec<(AgentName, String, InterpreterContext)> = ctx
            .turn_outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.narrative.is_empty())
            .filter_map(|(agent, outcome)| {
                Self::interpreter_context(&ctx, agent)
                    .map(|ictx| (agent.clone(), outcome.narrative.clone(), ictx))
            })
            .collect();

        let results = join_all(jobs.into_iter().map(|(agent, narrative, ictx)| {
            let interpreter = Arc::clone(&self.interpreter);
            async move {
                let outcome = interpreter.interpret(&narrative, &ictx).await;
                (agent, narrative, outcome)
            }
        }))
        .await;

        let mut next = ctx;
        for (agent, narrative, outcome) in results {
            let (interpretation, usage) = match outcome {
                Ok(pair) => pair,
                Err(err) => {
                    // Best effort: keep the narrative, drop the observations.
                    warn!(agent = %agent, error = %err, "interpretation failed");
                    (
                        TurnInterpretation::narrative_only(narrative),
                        InterpreterTokenUsage::default(),
                    )
                }
            };

            let narrative_with_tools = next
                .turn_outcomes
                .get(&agent)
                .and_then(|outcome| outcome.narrative_with_tools.clone());

            let effects = Self::observation_effects(
                &next,
                &agent,
                &interpretation,
                narrative_with_tools.as_deref(),
            );
            debug!(agent = %agent, effects = effects.len(), "interpretation complete");
            next = next.with_effects(effects);

            if usage.input_tokens > 0 || usage.output_tokens > 0 {
                next = next.with_effect(Effect::RecordInterpreterTokenUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }

            if let Some(existing) = next.turn_outcomes.get(&agent) {
                let updated = TurnOutcome {
                    narrative: existing.narrative.clone(),
                    narrative_with_tools: existing.narrative_with_tools.clone(),
                    interpretation: Some(interpretation),
                };
                next = next.with_turn_outcome(agent, updated);
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::{base_context, conversation_between};
    use hollowbrook_domain::ConversationId;
    use hollowbrook_llm::KeywordInterpreter;

    fn phase() -> InterpretPhase {
        InterpretPhase::new(Arc::new(KeywordInterpreter))
    }

    fn with_outcome(ctx: TickContext, agent: &str, narrative: &str) -> TickContext {
        ctx.with_turn_outcome(
            AgentName::from(agent),
            TurnOutcome {
                narrative: narrative.to_string(),
                narrative_with_tools: None,
                interpretation: None,
            },
        )
    }

    #[tokio::test]
    async fn movement_and_mood_become_effects() {
        // Ember's workshop connects to the town square.
        let ctx = with_outcome(
            base_context(10),
            "Ember",
            "I walked to the town square, feeling happy.",
        );
        let ctx = phase().run(ctx).await.unwrap();

        assert!(ctx.effects.iter().any(|e| matches!(
            e,
            Effect::MoveAgent { to_location, .. }
                if to_location == &hollowbrook_domain::LocationId::from("town_square")
        )));
        assert!(ctx.effects.iter().any(|e| matches!(
            e,
            Effect::UpdateMood { mood, .. } if mood == "happy"
        )));
        let interpretation = ctx.turn_outcomes[&AgentName::from("Ember")]
            .interpretation
            .as_ref()
            .unwrap();
        assert!(interpretation.movement.is_some());
    }

    #[tokio::test]
    async fn unchanged_mood_is_not_re_reported() {
        // Ember's seed mood is "content".
        let ctx = with_outcome(base_context(10), "Ember", "Still feeling content today.");
        let ctx = phase().run(ctx).await.unwrap();
        assert!(!ctx
            .effects
            .iter()
            .any(|e| matches!(e, Effect::UpdateMood { .. })));
    }

    #[tokio::test]
    async fn conversation_narrative_becomes_a_turn() {
        let mut ctx = base_context(10);
        let conv = conversation_between(&ctx, "abc12345", None);
        ctx = ctx.with_updated_conversation(conv);
        let ctx = with_outcome(ctx, "Ember", "Good morning, Sage.");

        let ctx = phase().run(ctx).await.unwrap();
        assert!(ctx.effects.iter().any(|e| matches!(
            e,
            Effect::AddConversationTurn { conversation_id, speaker, .. }
                if conversation_id == &ConversationId::from("abc12345")
                    && speaker == &AgentName::from("Ember")
        )));
    }

    #[tokio::test]
    async fn leave_with_final_message_suppresses_the_turn_effect() {
        let mut ctx = base_context(10);
        let conv = conversation_between(&ctx, "abc12345", None);
        ctx = ctx.with_updated_conversation(conv);
        ctx = ctx.with_effect(Effect::LeaveConversation {
            agent: AgentName::from("Ember"),
            conversation_id: ConversationId::from("abc12345"),
            last_message: Some("Goodbye.".to_string()),
        });
        let ctx = with_outcome(ctx, "Ember", "Goodbye.");

        let ctx = phase().run(ctx).await.unwrap();
        assert!(!ctx
            .effects
            .iter()
            .any(|e| matches!(e, Effect::AddConversationTurn { .. })));
    }
}
