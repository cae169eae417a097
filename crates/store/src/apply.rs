//! The event applier: the only place where events become state.
//!
//! Replay invariant: for any snapshot `S` and committed event sequence `E`,
//! folding `apply_event` over `E` starting from `S` must reproduce the live
//! state bit-for-bit. Every event kind is therefore handled here, including
//! token accounting and unseen-ending bookkeeping.

use hollowbrook_domain::{
    Conversation, ConversationTurn, DomainEvent, EventKind, Invitation, TimePeriod,
    UnseenConversationEnding, Weather, INVITE_EXPIRY_TICKS,
};

use crate::snapshot::VillageSnapshot;

pub fn apply_event(snapshot: &VillageSnapshot, event: &DomainEvent) -> VillageSnapshot {
    let mut next = snapshot.clone();

    if event.tick > next.world.tick {
        next.world = next.world.with_time(event.tick, event.timestamp);
    }

    match &event.kind {
        EventKind::AgentMoved {
            agent, to_location, ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents
                    .insert(agent.clone(), existing.with_location(to_location.clone()));
            }
            next.world = next
                .world
                .with_agent_location(agent.clone(), to_location.clone());
        }

        EventKind::AgentMoodChanged {
            agent, new_mood, ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents
                    .insert(agent.clone(), existing.with_mood(new_mood.clone()));
            }
        }

        EventKind::AgentEnergyChanged {
            agent, new_energy, ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents
                    .insert(agent.clone(), existing.with_energy(i64::from(*new_energy)));
            }
        }

        EventKind::AgentAction { .. } => {}

        EventKind::AgentSlept { agent, .. } => {
            if let Some(existing) = next.agents.get(agent) {
                let period = TimePeriod::of_hour(chrono::Timelike::hour(&event.timestamp));
                next.agents
                    .insert(agent.clone(), existing.asleep(event.tick, period));
            }
        }

        EventKind::AgentWoke { agent, .. } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents.insert(agent.clone(), existing.awake());
            }
        }

        EventKind::AgentLastActiveTickUpdated {
            agent,
            new_last_active_tick,
            ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents.insert(
                    agent.clone(),
                    existing.with_last_active_tick(*new_last_active_tick),
                );
            }
        }

        EventKind::AgentSessionIdUpdated {
            agent,
            new_session_id,
            ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                next.agents.insert(
                    agent.clone(),
                    existing.with_session_id(new_session_id.clone()),
                );
            }
        }

        EventKind::ConversationInvited {
            conversation_id,
            inviter,
            invitee,
            location,
            privacy,
        } => {
            next.pending_invites.insert(
                invitee.clone(),
                Invitation {
                    conversation_id: conversation_id.clone(),
                    inviter: inviter.clone(),
                    invitee: invitee.clone(),
                    location: location.clone(),
                    privacy: *privacy,
                    created_at_tick: event.tick,
                    expires_at_tick: event.tick + INVITE_EXPIRY_TICKS,
                    invited_at: event.timestamp,
                },
            );
        }

        EventKind::ConversationInviteAccepted { invitee, .. }
        | EventKind::ConversationInviteDeclined { invitee, .. }
        | EventKind::ConversationInviteExpired { invitee, .. } => {
            next.pending_invites.remove(invitee);
        }

        EventKind::ConversationStarted {
            conversation_id,
            location,
            privacy,
            initial_participants,
        } => {
            let created_by = initial_participants
                .first()
                .cloned()
                .unwrap_or_else(|| "".into());
            next.conversations.insert(
                conversation_id.clone(),
                Conversation {
                    id: conversation_id.clone(),
                    location: location.clone(),
                    privacy: *privacy,
                    participants: initial_participants.iter().cloned().collect(),
                    history: Vec::new(),
                    started_at_tick: event.tick,
                    created_by,
                    next_speaker: None,
                },
            );
        }

        EventKind::ConversationJoined {
            conversation_id,
            agent,
        } => {
            if let Some(conv) = next.conversations.get(conversation_id) {
                next.conversations
                    .insert(conversation_id.clone(), conv.with_participant(agent.clone()));
            }
        }

        EventKind::ConversationLeft {
            conversation_id,
            agent,
        } => {
            if let Some(conv) = next.conversations.get(conversation_id) {
                next.conversations
                    .insert(conversation_id.clone(), conv.without_participant(agent));
            }
        }

        EventKind::ConversationTurn {
            conversation_id,
            speaker,
            narrative,
            is_departure,
            narrative_with_tools,
        } => {
            if let Some(conv) = next.conversations.get(conversation_id) {
                let turn = ConversationTurn {
                    speaker: speaker.clone(),
                    narrative: narrative.clone(),
                    tick: event.tick,
                    timestamp: event.timestamp,
                    is_departure: *is_departure,
                    narrative_with_tools: narrative_with_tools.clone(),
                };
                next.conversations
                    .insert(conversation_id.clone(), conv.with_turn(turn));
            }
        }

        EventKind::ConversationNextSpeakerSet {
            conversation_id,
            next_speaker,
        } => {
            if let Some(conv) = next.conversations.get(conversation_id) {
                next.conversations.insert(
                    conversation_id.clone(),
                    conv.with_next_speaker(next_speaker.clone()),
                );
            }
        }

        EventKind::ConversationMoved {
            conversation_id,
            to_location,
            ..
        } => {
            // Participant relocation arrives as separate AgentMoved events.
            if let Some(conv) = next.conversations.get(conversation_id) {
                next.conversations.insert(
                    conversation_id.clone(),
                    conv.with_location(to_location.clone()),
                );
            }
        }

        EventKind::ConversationEnded {
            conversation_id, ..
        } => {
            next.conversations.remove(conversation_id);
        }

        EventKind::ConversationEndingUnseen {
            agent,
            conversation_id,
            other_participant,
            final_message,
        } => {
            next.unseen_endings
                .entry(agent.clone())
                .or_default()
                .push(UnseenConversationEnding {
                    conversation_id: conversation_id.clone(),
                    other_participant: other_participant.clone(),
                    final_message: final_message.clone(),
                    ended_at_tick: event.tick,
                });
        }

        EventKind::ConversationEndingSeen {
            agent,
            conversation_id,
        } => {
            if let Some(endings) = next.unseen_endings.get_mut(agent) {
                endings.retain(|ending| &ending.conversation_id != conversation_id);
                if endings.is_empty() {
                    next.unseen_endings.remove(agent);
                }
            }
        }

        EventKind::NightSkipped { .. } | EventKind::WorldEvent { .. } => {}

        EventKind::WeatherChanged { new_weather, .. } => {
            if let Some(weather) = Weather::parse(new_weather) {
                next.world = next.world.with_weather(weather);
            }
        }

        EventKind::DidCompact { .. } => {
            // State change is carried by the paired SessionTokensReset event.
        }

        EventKind::AgentTokenUsageRecorded {
            agent,
            input_tokens,
            output_tokens,
            cache_creation_input_tokens,
            cache_read_input_tokens,
            ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                let usage = existing.token_usage.record_turn(
                    *input_tokens,
                    *output_tokens,
                    *cache_creation_input_tokens,
                    *cache_read_input_tokens,
                );
                next.agents
                    .insert(agent.clone(), existing.with_token_usage(usage));
            }
        }

        EventKind::InterpreterTokenUsageRecorded {
            input_tokens,
            output_tokens,
            ..
        } => {
            let mut usage = next.world.interpreter_usage;
            usage.total_input_tokens += input_tokens;
            usage.total_output_tokens += output_tokens;
            usage.call_count += 1;
            next.world = next.world.with_interpreter_usage(usage);
        }

        EventKind::SessionTokensReset {
            agent,
            new_session_tokens,
            ..
        } => {
            if let Some(existing) = next.agents.get(agent) {
                let usage = existing.token_usage.reset_session(*new_session_tokens);
                next.agents
                    .insert(agent.clone(), existing.with_token_usage(usage));
            }
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hollowbrook_domain::{
        AgentModel, AgentName, AgentSnapshot, ConversationId, InterpreterUsage, LocationId,
        Privacy, TokenUsage, WorldSnapshot,
    };
    use std::collections::BTreeMap;

    fn agent(name: &str, location: &str) -> AgentSnapshot {
        AgentSnapshot {
            name: AgentName::from(name),
            model: AgentModel {
                id: "model-x".to_string(),
                display_name: "X".to_string(),
                provider: "test".to_string(),
            },
            personality: String::new(),
            job: String::new(),
            interests: vec![],
            note_to_self: String::new(),
            location: LocationId::from(location),
            mood: "calm".to_string(),
            energy: 80,
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

    fn base_snapshot() -> VillageSnapshot {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let mut agents = BTreeMap::new();
        for (name, loc) in [("Ember", "workshop"), ("Sage", "library")] {
            agents.insert(AgentName::from(name), agent(name, loc));
        }
        let agent_locations = agents
            .values()
            .map(|a| (a.name.clone(), a.location.clone()))
            .collect();
        VillageSnapshot {
            world: WorldSnapshot {
                tick: 0,
                world_time: now,
                start_date: now,
                weather: Weather::Clear,
                locations: BTreeMap::new(),
                agent_locations,
                interpreter_usage: InterpreterUsage::default(),
            },
            agents,
            conversations: BTreeMap::new(),
            pending_invites: BTreeMap::new(),
            scheduler_state: None,
            unseen_endings: BTreeMap::new(),
        }
    }

    fn at(tick: u64, kind: EventKind) -> DomainEvent {
        DomainEvent::new(
            tick,
            Utc.with_ymd_and_hms(2025, 6, 1, 8 + tick as u32 % 12, 0, 0).unwrap(),
            kind,
        )
    }

    #[test]
    fn move_updates_agent_and_world_locations() {
        let snapshot = base_snapshot();
        let next = apply_event(
            &snapshot,
            &at(
                1,
                EventKind::AgentMoved {
                    agent: AgentName::from("Ember"),
                    from_location: LocationId::from("workshop"),
                    to_location: LocationId::from("library"),
                },
            ),
        );
        assert_eq!(
            next.agents[&AgentName::from("Ember")].location,
            LocationId::from("library")
        );
        assert_eq!(
            next.world.agent_locations[&AgentName::from("Ember")],
            LocationId::from("library")
        );
        assert_eq!(next.world.tick, 1);
    }

    #[test]
    fn conversation_lifecycle_via_events() {
        let conv = ConversationId::from("abc12345");
        let snapshot = base_snapshot();

        let snapshot = apply_event(
            &snapshot,
            &at(
                5,
                EventKind::ConversationInvited {
                    conversation_id: conv.clone(),
                    inviter: AgentName::from("Ember"),
                    invitee: AgentName::from("Sage"),
                    location: LocationId::from("workshop"),
                    privacy: Privacy::Private,
                },
            ),
        );
        let invite = &snapshot.pending_invites[&AgentName::from("Sage")];
        assert_eq!(invite.expires_at_tick, 5 + INVITE_EXPIRY_TICKS);

        let snapshot = apply_event(
            &snapshot,
            &at(
                6,
                EventKind::ConversationInviteAccepted {
                    conversation_id: conv.clone(),
                    inviter: AgentName::from("Ember"),
                    invitee: AgentName::from("Sage"),
                },
            ),
        );
        assert!(snapshot.pending_invites.is_empty());

        let snapshot = apply_event(
            &snapshot,
            &at(
                6,
                EventKind::ConversationStarted {
                    conversation_id: conv.clone(),
                    location: LocationId::from("workshop"),
                    privacy: Privacy::Private,
                    initial_participants: vec![AgentName::from("Ember"), AgentName::from("Sage")],
                },
            ),
        );
        assert_eq!(snapshot.conversations[&conv].participants.len(), 2);

        let snapshot = apply_event(
            &snapshot,
            &at(
                7,
                EventKind::ConversationEnded {
                    conversation_id: conv.clone(),
                    reason: "observer".to_string(),
                    final_participants: vec![],
                    summary: String::new(),
                },
            ),
        );
        assert!(snapshot.conversations.is_empty());
    }

    #[test]
    fn unseen_endings_accumulate_and_clear() {
        let conv = ConversationId::from("abc12345");
        let snapshot = base_snapshot();

        let snapshot = apply_event(
            &snapshot,
            &at(
                9,
                EventKind::ConversationEndingUnseen {
                    agent: AgentName::from("Sage"),
                    conversation_id: conv.clone(),
                    other_participant: AgentName::from("Ember"),
                    final_message: Some("Goodbye.".to_string()),
                },
            ),
        );
        assert_eq!(snapshot.unseen_endings[&AgentName::from("Sage")].len(), 1);

        let snapshot = apply_event(
            &snapshot,
            &at(
                10,
                EventKind::ConversationEndingSeen {
                    agent: AgentName::from("Sage"),
                    conversation_id: conv,
                },
            ),
        );
        assert!(snapshot.unseen_endings.is_empty());
    }

    #[test]
    fn token_events_reproduce_usage_on_replay() {
        let name = AgentName::from("Ember");
        let snapshot = base_snapshot();

        let snapshot = apply_event(
            &snapshot,
            &at(
                2,
                EventKind::AgentTokenUsageRecorded {
                    agent: name.clone(),
                    input_tokens: 1_000,
                    output_tokens: 200,
                    cache_creation_input_tokens: 0,
                    cache_read_input_tokens: 9_000,
                    model_id: "model-x".to_string(),
                    cumulative_session_tokens: 10_000,
                    cumulative_total_tokens: 1_200,
                },
            ),
        );
        assert_eq!(snapshot.agents[&name].token_usage.session_tokens, 10_000);

        let snapshot = apply_event(
            &snapshot,
            &at(
                3,
                EventKind::SessionTokensReset {
                    agent: name.clone(),
                    old_session_tokens: 10_000,
                    new_session_tokens: 2_000,
                },
            ),
        );
        let usage = snapshot.agents[&name].token_usage;
        assert_eq!(usage.session_tokens, 2_000);
        assert_eq!(usage.total_input_tokens, 1_000);
    }

    #[test]
    fn sleep_records_period_from_event_timestamp() {
        let name = AgentName::from("Ember");
        let event = DomainEvent::new(
            4,
            Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(),
            EventKind::AgentSlept {
                agent: name.clone(),
                location: LocationId::from("workshop"),
            },
        );
        let snapshot = apply_event(&base_snapshot(), &event);
        let slept = &snapshot.agents[&name];
        assert!(slept.is_sleeping);
        assert_eq!(slept.sleep_started_time_period, Some(TimePeriod::Night));
    }
}
