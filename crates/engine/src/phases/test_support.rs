//! Builders shared by the phase unit tests.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};

use hollowbrook_domain::{
    AgentName, AgentSnapshot, Conversation, ConversationId, ConversationTurn, LocationId, Privacy,
    TimePeriod, TimeSnapshot,
};
use hollowbrook_services::{build_agent_snapshots, build_world_snapshot, default_agents, default_locations};

use crate::context::TickContext;

/// A three-agent context (Ember/workshop, Sage/library, River/town_square)
/// at tick 10 with the clock set to the given hour.
pub fn base_context(hour: u32) -> TickContext {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap();

    let agents = build_agent_snapshots(&default_agents());
    let mut world = build_world_snapshot(start, default_locations());
    world.tick = 9;
    world.world_time = now;
    world.agent_locations = agents
        .values()
        .map(|agent| (agent.name.clone(), agent.location.clone()))
        .collect();

    TickContext {
        tick: 10,
        timestamp: now,
        time: TimeSnapshot::new(now, 10, start),
        world,
        agents,
        conversations: BTreeMap::new(),
        pending_invites: BTreeMap::new(),
        unseen_endings: BTreeMap::new(),
        scheduled_events: Vec::new(),
        recent_arrivals: BTreeSet::new(),
        recent_events: Vec::new(),
        effects: Vec::new(),
        events: Vec::new(),
        turn_outcomes: BTreeMap::new(),
        agents_to_act: BTreeSet::new(),
        agents_acted: BTreeSet::new(),
    }
}

pub fn sleeping(agent: AgentSnapshot, since: TimePeriod) -> AgentSnapshot {
    agent.asleep(5, since)
}

/// A private two-person conversation between Ember and Sage at the workshop,
/// with an optional last turn by `last_speaker`.
pub fn conversation_between(
    ctx: &TickContext,
    id: &str,
    last_speaker: Option<&str>,
) -> Conversation {
    let mut conv = Conversation {
        id: ConversationId::from(id),
        location: LocationId::from("workshop"),
        privacy: Privacy::Private,
        participants: [AgentName::from("Ember"), AgentName::from("Sage")]
            .into_iter()
            .collect(),
        history: Vec::new(),
        started_at_tick: 5,
        created_by: AgentName::from("Ember"),
        next_speaker: None,
    };
    if let Some(speaker) = last_speaker {
        conv = conv.with_turn(ConversationTurn {
            speaker: AgentName::from(speaker),
            narrative: "…".to_string(),
            tick: ctx.tick - 1,
            timestamp: ctx.timestamp,
            is_departure: false,
            narrative_with_tools: None,
        });
    }
    conv
}
