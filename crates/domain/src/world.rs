use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentName, LocationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Clear,
    Cloudy,
    Rainy,
    Stormy,
    Foggy,
    Snowy,
}

impl Weather {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Cloudy => "cloudy",
            Self::Rainy => "rainy",
            Self::Stormy => "stormy",
            Self::Foggy => "foggy",
            Self::Snowy => "snowy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "clear" => Some(Self::Clear),
            "cloudy" => Some(Self::Cloudy),
            "rainy" => Some(Self::Rainy),
            "stormy" => Some(Self::Stormy),
            "foggy" => Some(Self::Foggy),
            "snowy" => Some(Self::Snowy),
            _ => None,
        }
    }
}

/// A place in the world. The connection relation is symmetric by convention
/// but not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub connections: Vec<LocationId>,
}

/// Cumulative interpreter token totals - system overhead, tracked on the
/// world rather than any one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub call_count: u64,
}

/// The world's state at a moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub world_time: DateTime<Utc>,
    pub start_date: DateTime<Utc>,
    pub weather: Weather,
    pub locations: BTreeMap<LocationId, Location>,
    pub agent_locations: BTreeMap<AgentName, LocationId>,
    #[serde(default)]
    pub interpreter_usage: InterpreterUsage,
}

impl WorldSnapshot {
    pub fn location(&self, id: &LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn with_agent_location(&self, agent: AgentName, location: LocationId) -> Self {
        let mut next = self.clone();
        next.agent_locations.insert(agent, location);
        next
    }

    pub fn with_weather(&self, weather: Weather) -> Self {
        let mut next = self.clone();
        next.weather = weather;
        next
    }

    pub fn with_time(&self, tick: u64, world_time: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.tick = tick;
        next.world_time = world_time;
        next
    }

    pub fn with_interpreter_usage(&self, usage: InterpreterUsage) -> Self {
        let mut next = self.clone();
        next.interpreter_usage = usage;
        next
    }
}
