//! Scripted provider and keyword interpreter.
//!
//! These drive the engine without any model transport: tests queue exact
//! turns per agent, and the CLI's offline mode uses them for demo pacing.
//! Tool calls in a script run through the real processors against the real
//! [`ToolContext`], so the closure between tool effects and interpreter
//! effects is exercised end to end.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use hollowbrook_domain::AgentName;

use crate::interpreter::{
    resolve_destination, Interpreter, InterpreterContext, InterpreterTokenUsage,
    TurnInterpretation,
};
use crate::provider::{AgentContext, Compactor, LlmProvider, ToolContext, TurnResult, TurnUsage};
use crate::session::{SessionPool, SessionState, TurnHandler};
use crate::tools::dispatch_tool;

/// One canned turn: a narrative plus the tool calls made while producing it.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub narrative: String,
    pub tool_calls: Vec<(String, Value)>,
    pub usage: TurnUsage,
}

impl ScriptedTurn {
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            narrative: text.into(),
            ..Self::default()
        }
    }

    pub fn with_tool(mut self, name: &str, args: Value) -> Self {
        self.tool_calls.push((name.to_string(), args));
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cache_read: u64) -> Self {
        self.usage = TurnUsage {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: cache_read,
        };
        self
    }
}

#[derive(Debug, Default)]
pub struct ScriptHandler {
    scripts: Mutex<BTreeMap<AgentName, VecDeque<ScriptedTurn>>>,
}

impl ScriptHandler {
    fn next_turn(&self, agent: &AgentName) -> Option<ScriptedTurn> {
        self.scripts
            .lock()
            .expect("script table poisoned")
            .get_mut(agent)
            .and_then(VecDeque::pop_front)
    }

    fn queue(&self, agent: AgentName, turn: ScriptedTurn) {
        self.scripts
            .lock()
            .expect("script table poisoned")
            .entry(agent)
            .or_default()
            .push_back(turn);
    }
}

#[async_trait]
impl TurnHandler for ScriptHandler {
    async fn handle_turn(
        &self,
        agent_ctx: &AgentContext,
        tool_ctx: &ToolContext,
        session: &mut SessionState,
    ) -> Result<TurnResult> {
        let agent = &agent_ctx.agent.name;
        let Some(turn) = self.next_turn(agent) else {
            debug!(agent = %agent, "no scripted turn queued, idling");
            return Ok(TurnResult {
                narrative: String::new(),
                narrative_with_tools: None,
                session_id: Some(session.session_id.clone()),
                usage: TurnUsage::default(),
            });
        };

        let mut fired = Vec::new();
        for (name, args) in &turn.tool_calls {
            if dispatch_tool(name, args, tool_ctx) {
                fired.push(name.clone());
            }
        }

        let narrative_with_tools = if fired.is_empty() {
            None
        } else {
            Some(format!("{} [tools: {}]", turn.narrative, fired.join(", ")))
        };

        Ok(TurnResult {
            narrative: turn.narrative,
            narrative_with_tools,
            session_id: Some(session.session_id.clone()),
            usage: turn.usage,
        })
    }

    async fn compact(
        &self,
        _agent: &AgentName,
        _critical: bool,
        current_tokens: u64,
    ) -> Result<u64> {
        // Compaction collapses the context to roughly a tenth of its size.
        Ok(current_tokens / 10)
    }
}

/// A [`crate::LlmProvider`] whose agents follow queued scripts, running over
/// real per-agent session tasks.
pub struct ScriptedProvider {
    pool: SessionPool<ScriptHandler>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            pool: SessionPool::new(Arc::new(ScriptHandler::default())),
        }
    }

    pub fn queue_turn(&self, agent: impl Into<AgentName>, turn: ScriptedTurn) {
        self.pool.handler().queue(agent.into(), turn);
    }

    pub fn pool(&self) -> &SessionPool<ScriptHandler> {
        &self.pool
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn execute_turn(
        &self,
        agent_ctx: &AgentContext,
        tool_ctx: Arc<ToolContext>,
    ) -> Result<TurnResult> {
        self.pool.execute_turn(agent_ctx, tool_ctx).await
    }

    fn restore_token_counts(
        &self,
        agents: &BTreeMap<AgentName, hollowbrook_domain::AgentSnapshot>,
    ) {
        self.pool.restore_token_counts(agents);
    }

    fn reset_session_after_compaction(&self, agent: &AgentName, new_count: u64) {
        self.pool.reset_session_after_compaction(agent, new_count);
    }

    fn token_count(&self, agent: &AgentName) -> u64 {
        self.pool.token_count(agent)
    }

    async fn disconnect_all(&self) -> Result<()> {
        self.pool.disconnect_all().await
    }
}

#[async_trait]
impl Compactor for ScriptedProvider {
    async fn execute_compact(&self, agent: &AgentName, critical: bool) -> Result<u64> {
        self.pool.execute_compact(agent, critical).await
    }
}

/// A deterministic interpreter that reads observations out of narrative text
/// with plain string matching. A stand-in for the model-backed interpreter,
/// close enough for tests and offline runs.
#[derive(Debug, Default)]
pub struct KeywordInterpreter;

const MOVEMENT_MARKERS: &[&str] = &[
    "walked to",
    "walked over to",
    "headed to",
    "went to",
    "moved to",
    "wandered to",
    "strolled to",
];

const SLEEP_MARKERS: &[&str] = &[
    "fell asleep",
    "went to sleep",
    "drifted off to sleep",
    "going to sleep",
    "lay down to sleep",
];

const REST_MARKERS: &[&str] = &["settled in", "winding down", "sat down to rest"];

fn first_word_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let index = text.find(marker)?;
    Some(text[index + marker.len()..].trim_start())
}

fn clause_of(text: &str) -> &str {
    let end = text
        .find(['.', ',', ';', '!', '?', '\n'])
        .unwrap_or(text.len());
    text[..end].trim()
}

fn strip_article(text: &str) -> &str {
    text.strip_prefix("the ")
        .or_else(|| text.strip_prefix("The "))
        .unwrap_or(text)
}

#[async_trait]
impl Interpreter for KeywordInterpreter {
    async fn interpret(
        &self,
        narrative: &str,
        ctx: &InterpreterContext,
    ) -> Result<(TurnInterpretation, InterpreterTokenUsage)> {
        let mut result = TurnInterpretation::narrative_only(narrative);
        let lowered = narrative.to_lowercase();

        for marker in MOVEMENT_MARKERS {
            if let Some(rest) = first_word_after(&lowered, marker) {
                let destination = strip_article(clause_of(rest));
                if let Some(resolved) = resolve_destination(destination, &ctx.available_paths) {
                    result.movement = Some(resolved);
                    break;
                }
            }
        }

        if let Some(rest) = first_word_after(&lowered, "feeling ") {
            let mood: String = rest
                .chars()
                .take_while(|c| c.is_alphabetic())
                .collect();
            if !mood.is_empty() {
                result.mood_expressed = Some(mood);
            }
        }

        result.wants_to_sleep = SLEEP_MARKERS.iter().any(|marker| lowered.contains(marker));
        result.wants_to_rest = REST_MARKERS.iter().any(|marker| lowered.contains(marker));

        for present in &ctx.present_agents {
            let question = format!("what do you think, {}", present.as_str().to_lowercase());
            if lowered.contains(&question) {
                result.suggested_next_speaker = Some(present.clone());
                break;
            }
        }

        let usage = InterpreterTokenUsage {
            input_tokens: (narrative.len() as u64).div_ceil(4),
            output_tokens: 24,
        };
        Ok((result, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hollowbrook_domain::LocationId;

    fn ctx() -> InterpreterContext {
        InterpreterContext {
            current_location: LocationId::from("workshop"),
            available_paths: vec![LocationId::from("garden"), LocationId::from("library")],
            present_agents: vec![AgentName::from("Sage")],
        }
    }

    #[tokio::test]
    async fn movement_and_mood_are_extracted() {
        let (result, usage) = KeywordInterpreter
            .interpret("I walked to the garden, feeling happy.", &ctx())
            .await
            .unwrap();
        assert_eq!(result.movement, Some(LocationId::from("garden")));
        assert_eq!(result.mood_expressed.as_deref(), Some("happy"));
        assert!(!result.wants_to_sleep);
        assert!(usage.input_tokens > 0);
    }

    #[tokio::test]
    async fn sleep_and_next_speaker_markers() {
        let (result, _) = KeywordInterpreter
            .interpret(
                "I yawned and went to sleep. What do you think, Sage?",
                &ctx(),
            )
            .await
            .unwrap();
        assert!(result.wants_to_sleep);
        assert_eq!(result.suggested_next_speaker, Some(AgentName::from("Sage")));
    }

    #[tokio::test]
    async fn unresolvable_movement_is_dropped() {
        let (result, _) = KeywordInterpreter
            .interpret("I walked to the moon.", &ctx())
            .await
            .unwrap();
        assert_eq!(result.movement, None);
    }
}
