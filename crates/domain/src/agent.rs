use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentName, LocationId};
use crate::time::TimePeriod;

/// Cumulative token usage for an agent.
///
/// `session_tokens` tracks the current context-window size and drives the
/// compaction thresholds; the `total_*` counters are all-time and never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    /// Context window size: `cache_read_input_tokens + input_tokens` of the
    /// most recent turn.
    pub session_tokens: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub turn_count: u64,
}

impl TokenUsage {
    /// Fold one turn's usage in: session tokens become the turn's context
    /// window size, totals accumulate.
    pub fn record_turn(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_input_tokens: u64,
        cache_read_input_tokens: u64,
    ) -> Self {
        Self {
            session_tokens: cache_read_input_tokens + input_tokens,
            total_input_tokens: self.total_input_tokens + input_tokens,
            total_output_tokens: self.total_output_tokens + output_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens
                + cache_creation_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + cache_read_input_tokens,
            turn_count: self.turn_count + 1,
        }
    }

    /// Post-compaction reset: session tokens drop to the compacted context
    /// size, all-time totals are untouched.
    pub fn reset_session(&self, new_session_tokens: u64) -> Self {
        Self {
            session_tokens: new_session_tokens,
            ..*self
        }
    }
}

/// Which model drives an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentModel {
    pub id: String,
    pub display_name: String,
    pub provider: String,
}

/// An agent's state at a moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    // Identity
    pub name: AgentName,
    pub model: AgentModel,
    pub personality: String,
    pub job: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub note_to_self: String,

    // Dynamic
    pub location: LocationId,
    pub mood: String,
    pub energy: u8,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub relationships: BTreeMap<AgentName, String>,

    // Sleep
    #[serde(default)]
    pub is_sleeping: bool,
    #[serde(default)]
    pub sleep_started_tick: Option<u64>,
    #[serde(default)]
    pub sleep_started_time_period: Option<TimePeriod>,

    // Session
    #[serde(default)]
    pub session_id: Option<String>,

    // Turn tracking
    #[serde(default)]
    pub last_active_tick: u64,

    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl AgentSnapshot {
    pub fn with_location(&self, location: LocationId) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }

    pub fn with_mood(&self, mood: impl Into<String>) -> Self {
        Self {
            mood: mood.into(),
            ..self.clone()
        }
    }

    pub fn with_energy(&self, energy: i64) -> Self {
        Self {
            energy: energy.clamp(0, 100) as u8,
            ..self.clone()
        }
    }

    pub fn asleep(&self, tick: u64, period: TimePeriod) -> Self {
        Self {
            is_sleeping: true,
            sleep_started_tick: Some(tick),
            sleep_started_time_period: Some(period),
            ..self.clone()
        }
    }

    pub fn awake(&self) -> Self {
        Self {
            is_sleeping: false,
            sleep_started_tick: None,
            sleep_started_time_period: None,
            ..self.clone()
        }
    }

    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..self.clone()
        }
    }

    pub fn with_last_active_tick(&self, tick: u64) -> Self {
        Self {
            last_active_tick: tick,
            ..self.clone()
        }
    }

    pub fn with_token_usage(&self, token_usage: TokenUsage) -> Self {
        Self {
            token_usage,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentSnapshot {
        AgentSnapshot {
            name: AgentName::from("Ember"),
            model: AgentModel {
                id: "model-x".to_string(),
                display_name: "X".to_string(),
                provider: "test".to_string(),
            },
            personality: "warm".to_string(),
            job: "crafting".to_string(),
            interests: vec!["craft".to_string()],
            note_to_self: String::new(),
            location: LocationId::from("workshop"),
            mood: "content".to_string(),
            energy: 85,
            goals: vec![],
            relationships: BTreeMap::new(),
            is_sleeping: false,
            sleep_started_tick: None,
            sleep_started_time_period: None,
            session_id: None,
            last_active_tick: 0,
            token_usage: TokenUsage::default(),
        }
    }

    #[test]
    fn energy_is_clamped() {
        assert_eq!(agent().with_energy(250).energy, 100);
        assert_eq!(agent().with_energy(-5).energy, 0);
    }

    #[test]
    fn sleep_transitions_clear_fields() {
        let asleep = agent().asleep(7, TimePeriod::Evening);
        assert!(asleep.is_sleeping);
        assert_eq!(asleep.sleep_started_tick, Some(7));
        let awake = asleep.awake();
        assert!(!awake.is_sleeping);
        assert_eq!(awake.sleep_started_tick, None);
        assert_eq!(awake.sleep_started_time_period, None);
    }

    #[test]
    fn token_usage_accumulates_and_resets_session_only() {
        let usage = TokenUsage::default()
            .record_turn(1_000, 200, 50, 9_000)
            .record_turn(1_500, 300, 0, 11_000);
        assert_eq!(usage.session_tokens, 12_500);
        assert_eq!(usage.total_input_tokens, 2_500);
        assert_eq!(usage.total_output_tokens, 500);
        assert_eq!(usage.turn_count, 2);

        let reset = usage.reset_session(4_000);
        assert_eq!(reset.session_tokens, 4_000);
        assert_eq!(reset.total_input_tokens, 2_500);
        assert_eq!(reset.turn_count, 2);
    }

    #[test]
    fn snapshot_survives_json_round_trip() {
        let original = agent().asleep(3, TimePeriod::Night).with_session_id("s-1");
        let json = serde_json::to_string(&original).unwrap();
        let back: AgentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
