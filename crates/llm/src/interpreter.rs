//! The narrative interpreter contract.
//!
//! After a turn, an interpreter reads the agent's free-form narrative and
//! reports observations through a small fixed tool vocabulary: movement,
//! mood, rest/sleep intent, actions, and next-speaker suggestions.
//! Conversation lifecycle is deliberately NOT here - that comes from explicit
//! agent tool calls, so agents keep control over their social moves.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use hollowbrook_domain::{AgentName, LocationId};

use crate::tools::ToolSpec;

/// What the interpreter knows about the turn it is reading.
#[derive(Debug, Clone)]
pub struct InterpreterContext {
    pub current_location: LocationId,
    pub available_paths: Vec<LocationId>,
    pub present_agents: Vec<AgentName>,
}

/// Token usage of one interpreter call; tracked as system overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterTokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Observations extracted from a turn narrative.
#[derive(Debug, Clone, Default)]
pub struct TurnInterpretation {
    pub narrative: String,

    /// Resolved destination of solo movement.
    pub movement: Option<LocationId>,
    /// First words of the arrival portion of the narrative, to show others
    /// at the destination.
    pub movement_narrative_start: Option<String>,
    /// Destination of a proposed group move.
    pub proposes_moving_together: Option<LocationId>,

    pub mood_expressed: Option<String>,
    pub wants_to_rest: bool,
    pub wants_to_sleep: bool,

    pub actions_described: Vec<String>,

    /// Interpreter suggestion for group conversation flow.
    pub suggested_next_speaker: Option<AgentName>,
}

impl TurnInterpretation {
    pub fn narrative_only(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            ..Self::default()
        }
    }

    /// The portion of the narrative that happens at the destination, or the
    /// whole narrative when no split point was reported.
    pub fn arrival_narrative(&self) -> &str {
        if let Some(start) = &self.movement_narrative_start {
            if let Some(index) = self.narrative.find(start.as_str()) {
                return &self.narrative[index..];
            }
        }
        &self.narrative
    }
}

/// Callable that reads a narrative and populates a [`TurnInterpretation`].
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(
        &self,
        narrative: &str,
        ctx: &InterpreterContext,
    ) -> Result<(TurnInterpretation, InterpreterTokenUsage)>;
}

/// The observation tool vocabulary advertised to the interpreter model.
pub fn observation_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "report_movement",
            description: "Report that the agent moved to a new location.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "destination": {"type": "string"},
                    "arrival_narrative_start": {
                        "type": "string",
                        "description": "First words of the narrative at the destination"
                    }
                },
                "required": ["destination"]
            }),
        },
        ToolSpec {
            name: "report_propose_move_together",
            description: "Report that the agent proposed moving somewhere together.",
            input_schema: json!({
                "type": "object",
                "properties": {"destination": {"type": "string"}},
                "required": ["destination"]
            }),
        },
        ToolSpec {
            name: "report_mood",
            description: "Report the emotional state the agent expressed.",
            input_schema: json!({
                "type": "object",
                "properties": {"mood": {"type": "string"}},
                "required": ["mood"]
            }),
        },
        ToolSpec {
            name: "report_resting",
            description: "Report that the agent is winding down or settling in.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "report_sleeping",
            description: "Report that the agent went to sleep.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "report_action",
            description: "Report one activity the agent performed. Repeatable.",
            input_schema: json!({
                "type": "object",
                "properties": {"action": {"type": "string"}},
                "required": ["action"]
            }),
        },
        ToolSpec {
            name: "report_next_speaker",
            description: "Suggest which participant should speak next.",
            input_schema: json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        },
    ]
}

/// Match a reported destination against the available paths: exact, then
/// substring, then case-insensitive, then word overlap. Fails to `None`
/// rather than guessing an unreachable location.
pub fn resolve_destination(raw: &str, paths: &[LocationId]) -> Option<LocationId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(path) = paths.iter().find(|p| p.as_str() == raw) {
        return Some(path.clone());
    }

    if let Some(path) = paths
        .iter()
        .find(|p| raw.contains(p.as_str()) || p.as_str().contains(raw))
    {
        return Some(path.clone());
    }

    let lowered = raw.to_lowercase();
    if let Some(path) = paths.iter().find(|p| {
        let candidate = p.as_str().to_lowercase();
        candidate == lowered || lowered.contains(&candidate) || candidate.contains(&lowered)
    }) {
        return Some(path.clone());
    }

    let words: Vec<String> = lowered
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect();
    paths
        .iter()
        .find(|p| {
            p.as_str()
                .to_lowercase()
                .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
                .any(|part| words.iter().any(|w| w == part))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Vec<LocationId> {
        vec![
            LocationId::from("town_square"),
            LocationId::from("workshop"),
            LocationId::from("library"),
        ]
    }

    #[test]
    fn exact_match_wins() {
        assert_eq!(
            resolve_destination("library", &paths()),
            Some(LocationId::from("library"))
        );
    }

    #[test]
    fn substring_and_case_fallbacks() {
        assert_eq!(
            resolve_destination("the workshop", &paths()),
            Some(LocationId::from("workshop"))
        );
        assert_eq!(
            resolve_destination("Library", &paths()),
            Some(LocationId::from("library"))
        );
    }

    #[test]
    fn word_overlap_matches_compound_ids() {
        assert_eq!(
            resolve_destination("the town square", &paths()),
            Some(LocationId::from("town_square"))
        );
    }

    #[test]
    fn unknown_destination_fails_to_none() {
        assert_eq!(resolve_destination("the moon", &paths()), None);
        assert_eq!(resolve_destination("  ", &paths()), None);
    }

    #[test]
    fn arrival_narrative_splits_on_reported_start() {
        let interpretation = TurnInterpretation {
            narrative: "I packed my tools. Stepping into the library, I exhaled.".to_string(),
            movement_narrative_start: Some("Stepping into the library".to_string()),
            ..TurnInterpretation::default()
        };
        assert_eq!(
            interpretation.arrival_narrative(),
            "Stepping into the library, I exhaled."
        );
    }
}
