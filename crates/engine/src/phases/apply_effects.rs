//! Converts accumulated effects into domain events.
//!
//! This phase is the only place where effects become events, and it handles
//! the cross-effect coordination the lifecycle needs: first-accept creates a
//! conversation while later accepts join it, invites reuse the inviter's
//! existing conversation at the same location, departures order their final
//! message before the leave, two-person endings fan out unseen-ending
//! notifications, compaction decisions consult same-tick sleep effects, and
//! the invite expiry sweep runs last.
//!
//! Effects referencing unknown agents, conversations, or invites are skipped
//! with a warning - the event log must never contain orphaned references.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use hollowbrook_domain::{
    Conversation, ConversationTurn, DomainEvent, Effect, EventKind, Invitation,
    UnseenConversationEnding, INVITE_EXPIRY_TICKS,
};
use hollowbrook_services::mint_conversation_id;

use crate::compaction::CompactionService;
use crate::context::TickContext;
use crate::pipeline::Phase;

#[derive(Default)]
pub struct ApplyEffectsPhase {
    compaction: Option<Arc<CompactionService>>,
}

impl ApplyEffectsPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compaction(compaction: Arc<CompactionService>) -> Self {
        Self {
            compaction: Some(compaction),
        }
    }

    /// Translate all accumulated effects, then sweep expired invites.
    ///
    /// Everything here is synchronous, which lets observer commands reuse the
    /// translation outside the async pipeline.
    pub fn execute_sync(&self, ctx: TickContext) -> TickContext {
        let effects = ctx.effects.clone();
        let mut next = ctx;
        let mut events: Vec<DomainEvent> = Vec::new();

        for effect in &effects {
            let (mut produced, updated) = translate(effect, next);
            events.append(&mut produced);
            next = updated;
        }

        let (mut expired, updated) = expire_invites(next);
        events.append(&mut expired);
        next = updated;

        debug!(
            effects = effects.len(),
            events = events.len(),
            "applied effects"
        );
        next.with_events(events)
    }

    /// Decide and run compaction for any `ShouldCompact` effects.
    ///
    /// Critical requests always compact; pre-sleep requests compact only when
    /// the same tick also carries a sleep effect for that agent.
    async fn handle_compaction(&self, ctx: TickContext) -> TickContext {
        let requests: Vec<(hollowbrook_domain::AgentName, u64, bool)> = ctx
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::ShouldCompact {
                    agent,
                    pre_tokens,
                    critical,
                } => Some((agent.clone(), *pre_tokens, *critical)),
                _ => None,
            })
            .collect();
        if requests.is_empty() {
            return ctx;
        }

        let Some(compaction) = &self.compaction else {
            warn!("compaction requested but no compaction service configured");
            return ctx;
        };

        let mut next = ctx;
        for (agent, pre_tokens, critical) in requests {
            let going_to_sleep = next.effects.iter().any(|effect| {
                matches!(effect, Effect::AgentSleep { agent: sleeper } if sleeper == &agent)
            });
            debug!(
                agent = %agent,
                critical,
                pre_tokens,
                going_to_sleep,
                "compaction decision"
            );
            if !critical && !going_to_sleep {
                continue;
            }

            let post_tokens = match compaction.execute_compact(&agent, critical).await {
                Ok(post_tokens) => post_tokens,
                Err(err) => {
                    warn!(agent = %agent, error = %err, "compaction errored, skipping");
                    continue;
                }
            };

            let old_session_tokens = next
                .agent(&agent)
                .map(|snapshot| snapshot.token_usage.session_tokens)
                .unwrap_or(0);

            let did_compact = DomainEvent::new(
                next.tick,
                next.timestamp,
                EventKind::DidCompact {
                    agent: agent.clone(),
                    pre_tokens,
                    post_tokens,
                    critical,
                },
            );
            let reset = DomainEvent::new(
                next.tick,
                next.timestamp,
                EventKind::SessionTokensReset {
                    agent: agent.clone(),
                    old_session_tokens,
                    new_session_tokens: post_tokens,
                },
            );
            next = next.with_events([did_compact, reset]);

            if let Some(snapshot) = next.agent(&agent) {
                let updated =
                    snapshot.with_token_usage(snapshot.token_usage.reset_session(post_tokens));
                next = next.with_updated_agent(updated);
            }
        }
        next
    }
}

#[async_trait]
impl Phase for ApplyEffectsPhase {
    fn name(&self) -> &'static str {
        "apply_effects"
    }

    async fn run(&self, ctx: TickContext) -> Result<TickContext> {
        let ctx = self.execute_sync(ctx);
        Ok(self.handle_compaction(ctx).await)
    }
}

fn event_at(ctx: &TickContext, kind: EventKind) -> DomainEvent {
    DomainEvent::new(ctx.tick, ctx.timestamp, kind)
}

/// Translate one effect into events plus an updated context.
fn translate(effect: &Effect, ctx: TickContext) -> (Vec<DomainEvent>, TickContext) {
    match effect {
        Effect::MoveAgent {
            agent,
            from_location,
            to_location,
        } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "move for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::AgentMoved {
                    agent: agent.clone(),
                    from_location: from_location.clone(),
                    to_location: to_location.clone(),
                },
            );
            let updated = snapshot.with_location(to_location.clone());
            (vec![event], ctx.with_updated_agent(updated))
        }

        Effect::UpdateMood { agent, mood } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "mood update for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::AgentMoodChanged {
                    agent: agent.clone(),
                    old_mood: snapshot.mood.clone(),
                    new_mood: mood.clone(),
                },
            );
            (vec![event], ctx.with_updated_agent(snapshot.with_mood(mood.clone())))
        }

        Effect::UpdateEnergy { agent, energy } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "energy update for unknown agent skipped");
                return (vec![], ctx);
            };
            let new_energy = (*energy).clamp(0, 100) as u8;
            if new_energy == snapshot.energy {
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::AgentEnergyChanged {
                    agent: agent.clone(),
                    old_energy: snapshot.energy,
                    new_energy,
                },
            );
            (
                vec![event],
                ctx.with_updated_agent(snapshot.with_energy(i64::from(new_energy))),
            )
        }

        Effect::RecordAction { agent, description } => {
            let Some(snapshot) = ctx.agent(agent) else {
                warn!(agent = %agent, "action for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::AgentAction {
                    agent: agent.clone(),
                    location: snapshot.location.clone(),
                    description: description.clone(),
                },
            );
            (vec![event], ctx)
        }

        Effect::AgentSleep { agent } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "sleep for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::AgentSlept {
                    agent: agent.clone(),
                    location: snapshot.location.clone(),
                },
            );
            let updated = snapshot.asleep(ctx.tick, ctx.time.period());
            (vec![event], ctx.with_updated_agent(updated))
        }

        Effect::AgentWake { agent, reason } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "wake for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::AgentWoke {
                    agent: agent.clone(),
                    location: snapshot.location.clone(),
                    reason: reason.clone().unwrap_or_else(|| "phase_check".to_string()),
                },
            );
            (vec![event], ctx.with_updated_agent(snapshot.awake()))
        }

        Effect::UpdateLastActiveTick { agent, location } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "last-active update for unknown agent skipped");
                return (vec![], ctx);
            };
            if snapshot.last_active_tick == ctx.tick {
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::AgentLastActiveTickUpdated {
                    agent: agent.clone(),
                    location: location.clone(),
                    old_last_active_tick: snapshot.last_active_tick,
                    new_last_active_tick: ctx.tick,
                },
            );
            let tick = ctx.tick;
            (
                vec![event],
                ctx.with_updated_agent(snapshot.with_last_active_tick(tick)),
            )
        }

        Effect::UpdateSessionId { agent, session_id } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "session id update for unknown agent skipped");
                return (vec![], ctx);
            };
            if snapshot.session_id.as_deref() == Some(session_id.as_str()) {
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::AgentSessionIdUpdated {
                    agent: agent.clone(),
                    old_session_id: snapshot.session_id.clone(),
                    new_session_id: session_id.clone(),
                },
            );
            (
                vec![event],
                ctx.with_updated_agent(snapshot.with_session_id(session_id.clone())),
            )
        }

        Effect::InviteToConversation {
            inviter,
            invitee,
            location,
            privacy,
            ..
        } => {
            if ctx.agent(inviter).is_none() || ctx.agent(invitee).is_none() {
                warn!(inviter = %inviter, invitee = %invitee, "invite with unknown agent skipped");
                return (vec![], ctx);
            }
            if ctx.pending_invites.contains_key(invitee) {
                warn!(invitee = %invitee, "invitee already has a pending invite, skipped");
                return (vec![], ctx);
            }

            // Inviting from within a conversation at the same location reuses
            // that conversation; accepting then joins instead of starting.
            let conversation_id = ctx
                .conversations
                .values()
                .find(|conv| conv.is_participant(inviter) && &conv.location == location)
                .map(|conv| conv.id.clone())
                .unwrap_or_else(mint_conversation_id);

            let invitation = Invitation {
                conversation_id: conversation_id.clone(),
                inviter: inviter.clone(),
                invitee: invitee.clone(),
                location: location.clone(),
                privacy: *privacy,
                created_at_tick: ctx.tick,
                expires_at_tick: ctx.tick + INVITE_EXPIRY_TICKS,
                invited_at: ctx.timestamp,
            };
            let event = event_at(
                &ctx,
                EventKind::ConversationInvited {
                    conversation_id,
                    inviter: inviter.clone(),
                    invitee: invitee.clone(),
                    location: location.clone(),
                    privacy: *privacy,
                },
            );
            (vec![event], ctx.with_added_invite(invitation))
        }

        Effect::AcceptInvite {
            agent,
            conversation_id,
            first_message,
        } => {
            let Some(invite) = ctx.pending_invites.get(agent).cloned() else {
                warn!(agent = %agent, "accept with no pending invite skipped");
                return (vec![], ctx);
            };
            if &invite.conversation_id != conversation_id {
                warn!(agent = %agent, "accept for a different invite skipped");
                return (vec![], ctx);
            }

            let mut events = vec![event_at(
                &ctx,
                EventKind::ConversationInviteAccepted {
                    conversation_id: conversation_id.clone(),
                    inviter: invite.inviter.clone(),
                    invitee: agent.clone(),
                },
            )];

            let mut next = ctx;
            if let Some(existing) = next.conversation(conversation_id).cloned() {
                events.push(event_at(
                    &next,
                    EventKind::ConversationJoined {
                        conversation_id: conversation_id.clone(),
                        agent: agent.clone(),
                    },
                ));
                next = next.with_updated_conversation(existing.with_participant(agent.clone()));
            } else {
                events.push(event_at(
                    &next,
                    EventKind::ConversationStarted {
                        conversation_id: conversation_id.clone(),
                        location: invite.location.clone(),
                        privacy: invite.privacy,
                        initial_participants: vec![invite.inviter.clone(), agent.clone()],
                    },
                ));
                let conversation = Conversation {
                    id: conversation_id.clone(),
                    location: invite.location.clone(),
                    privacy: invite.privacy,
                    participants: [invite.inviter.clone(), agent.clone()].into_iter().collect(),
                    history: Vec::new(),
                    started_at_tick: next.tick,
                    created_by: invite.inviter.clone(),
                    next_speaker: None,
                };
                next = next.with_updated_conversation(conversation);
            }

            if let Some(message) = first_message {
                events.push(event_at(
                    &next,
                    EventKind::ConversationTurn {
                        conversation_id: conversation_id.clone(),
                        speaker: agent.clone(),
                        narrative: message.clone(),
                        is_departure: false,
                        narrative_with_tools: None,
                    },
                ));
            }

            (events, next.with_removed_invite(agent))
        }

        Effect::DeclineInvite {
            agent,
            conversation_id,
        } => {
            let Some(invite) = ctx.pending_invites.get(agent).cloned() else {
                warn!(agent = %agent, "decline with no pending invite skipped");
                return (vec![], ctx);
            };
            if &invite.conversation_id != conversation_id {
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::ConversationInviteDeclined {
                    conversation_id: conversation_id.clone(),
                    inviter: invite.inviter.clone(),
                    invitee: agent.clone(),
                },
            );
            (vec![event], ctx.with_removed_invite(agent))
        }

        Effect::ExpireInvite {
            conversation_id,
            invitee,
        } => {
            let Some(invite) = ctx.pending_invites.get(invitee).cloned() else {
                return (vec![], ctx);
            };
            if &invite.conversation_id != conversation_id {
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::ConversationInviteExpired {
                    conversation_id: conversation_id.clone(),
                    inviter: invite.inviter.clone(),
                    invitee: invitee.clone(),
                },
            );
            (vec![event], ctx.with_removed_invite(invitee))
        }

        Effect::JoinConversation {
            agent,
            conversation_id,
            first_message,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                warn!(agent = %agent, conversation = %conversation_id, "join for unknown conversation skipped");
                return (vec![], ctx);
            };
            let mut events = vec![event_at(
                &ctx,
                EventKind::ConversationJoined {
                    conversation_id: conversation_id.clone(),
                    agent: agent.clone(),
                },
            )];
            if let Some(message) = first_message {
                events.push(event_at(
                    &ctx,
                    EventKind::ConversationTurn {
                        conversation_id: conversation_id.clone(),
                        speaker: agent.clone(),
                        narrative: message.clone(),
                        is_departure: false,
                        narrative_with_tools: None,
                    },
                ));
            }
            (
                events,
                ctx.with_updated_conversation(conv.with_participant(agent.clone())),
            )
        }

        Effect::LeaveConversation {
            agent,
            conversation_id,
            last_message,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                warn!(agent = %agent, conversation = %conversation_id, "leave for unknown conversation skipped");
                return (vec![], ctx);
            };
            if !conv.is_participant(agent) {
                warn!(agent = %agent, conversation = %conversation_id, "leave by non-participant skipped");
                return (vec![], ctx);
            }

            let mut events = Vec::new();
            if let Some(message) = last_message {
                events.push(event_at(
                    &ctx,
                    EventKind::ConversationTurn {
                        conversation_id: conversation_id.clone(),
                        speaker: agent.clone(),
                        narrative: message.clone(),
                        is_departure: true,
                        narrative_with_tools: None,
                    },
                ));
            }
            events.push(event_at(
                &ctx,
                EventKind::ConversationLeft {
                    conversation_id: conversation_id.clone(),
                    agent: agent.clone(),
                },
            ));

            let remaining = conv.without_participant(agent);
            if remaining.participants.len() < 2 {
                events.push(event_at(
                    &ctx,
                    EventKind::ConversationEnded {
                        conversation_id: conversation_id.clone(),
                        reason: "not_enough_participants".to_string(),
                        final_participants: remaining.participants.iter().cloned().collect(),
                        summary: String::new(),
                    },
                ));

                let mut next = ctx;
                let ended_at_tick = next.tick;
                if let Some(message) = last_message {
                    for witness in &remaining.participants {
                        events.push(event_at(
                            &next,
                            EventKind::ConversationEndingUnseen {
                                agent: witness.clone(),
                                conversation_id: conversation_id.clone(),
                                other_participant: agent.clone(),
                                final_message: Some(message.clone()),
                            },
                        ));
                        let ending = UnseenConversationEnding {
                            conversation_id: conversation_id.clone(),
                            other_participant: agent.clone(),
                            final_message: Some(message.clone()),
                            ended_at_tick,
                        };
                        next = next.with_unseen_ending(witness.clone(), ending);
                    }
                }
                (events, next.with_removed_conversation(conversation_id))
            } else {
                (events, ctx.with_updated_conversation(remaining))
            }
        }

        Effect::MoveConversation {
            agent,
            conversation_id,
            to_location,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                warn!(conversation = %conversation_id, "move for unknown conversation skipped");
                return (vec![], ctx);
            };
            let from_location = conv.location.clone();
            let mut events = Vec::new();
            let mut next = ctx;

            for participant in &conv.participants {
                let Some(snapshot) = next.agent(participant).cloned() else {
                    continue;
                };
                events.push(event_at(
                    &next,
                    EventKind::AgentMoved {
                        agent: participant.clone(),
                        from_location: snapshot.location.clone(),
                        to_location: to_location.clone(),
                    },
                ));
                next = next.with_updated_agent(snapshot.with_location(to_location.clone()));
            }

            events.push(event_at(
                &next,
                EventKind::ConversationMoved {
                    conversation_id: conversation_id.clone(),
                    initiated_by: agent.clone(),
                    from_location,
                    to_location: to_location.clone(),
                    participants: conv.participants.iter().cloned().collect(),
                },
            ));
            (
                events,
                next.with_updated_conversation(conv.with_location(to_location.clone())),
            )
        }

        Effect::AddConversationTurn {
            conversation_id,
            speaker,
            narrative,
            narrative_with_tools,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                warn!(conversation = %conversation_id, "turn for unknown conversation skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::ConversationTurn {
                    conversation_id: conversation_id.clone(),
                    speaker: speaker.clone(),
                    narrative: narrative.clone(),
                    is_departure: false,
                    narrative_with_tools: narrative_with_tools.clone(),
                },
            );
            let turn = ConversationTurn {
                speaker: speaker.clone(),
                narrative: narrative.clone(),
                tick: ctx.tick,
                timestamp: ctx.timestamp,
                is_departure: false,
                narrative_with_tools: narrative_with_tools.clone(),
            };
            (
                vec![event],
                ctx.with_updated_conversation(conv.with_turn(turn)),
            )
        }

        Effect::SetNextSpeaker {
            conversation_id,
            speaker,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                return (vec![], ctx);
            };
            if !conv.is_participant(speaker) {
                warn!(conversation = %conversation_id, speaker = %speaker, "next speaker not a participant, skipped");
                return (vec![], ctx);
            }
            let event = event_at(
                &ctx,
                EventKind::ConversationNextSpeakerSet {
                    conversation_id: conversation_id.clone(),
                    next_speaker: speaker.clone(),
                },
            );
            (
                vec![event],
                ctx.with_updated_conversation(conv.with_next_speaker(speaker.clone())),
            )
        }

        Effect::EndConversation {
            conversation_id,
            reason,
        } => {
            let Some(conv) = ctx.conversation(conversation_id).cloned() else {
                warn!(conversation = %conversation_id, "end for unknown conversation skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::ConversationEnded {
                    conversation_id: conversation_id.clone(),
                    reason: reason.clone(),
                    final_participants: conv.participants.iter().cloned().collect(),
                    summary: String::new(),
                },
            );
            (vec![event], ctx.with_removed_conversation(conversation_id))
        }

        Effect::ConversationEndingSeen {
            agent,
            conversation_id,
        } => {
            let event = event_at(
                &ctx,
                EventKind::ConversationEndingSeen {
                    agent: agent.clone(),
                    conversation_id: conversation_id.clone(),
                },
            );
            (
                vec![event],
                ctx.with_cleared_unseen_ending(agent, conversation_id),
            )
        }

        // Decided asynchronously after the sync pass; see handle_compaction.
        Effect::ShouldCompact { .. } => (vec![], ctx),

        Effect::RecordAgentTokenUsage {
            agent,
            input_tokens,
            output_tokens,
            cache_creation_input_tokens,
            cache_read_input_tokens,
            model_id,
        } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "token usage for unknown agent skipped");
                return (vec![], ctx);
            };
            let usage = snapshot.token_usage.record_turn(
                *input_tokens,
                *output_tokens,
                *cache_creation_input_tokens,
                *cache_read_input_tokens,
            );
            let event = event_at(
                &ctx,
                EventKind::AgentTokenUsageRecorded {
                    agent: agent.clone(),
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                    cache_creation_input_tokens: *cache_creation_input_tokens,
                    cache_read_input_tokens: *cache_read_input_tokens,
                    model_id: model_id.clone(),
                    cumulative_session_tokens: usage.session_tokens,
                    cumulative_total_tokens: usage.total_input_tokens + usage.total_output_tokens,
                },
            );
            (
                vec![event],
                ctx.with_updated_agent(snapshot.with_token_usage(usage)),
            )
        }

        Effect::RecordInterpreterTokenUsage {
            input_tokens,
            output_tokens,
        } => {
            let mut usage = ctx.world.interpreter_usage;
            usage.total_input_tokens += input_tokens;
            usage.total_output_tokens += output_tokens;
            usage.call_count += 1;
            let event = event_at(
                &ctx,
                EventKind::InterpreterTokenUsageRecorded {
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                    cumulative_total_tokens: usage.total_input_tokens + usage.total_output_tokens,
                },
            );
            let world = ctx.world.with_interpreter_usage(usage);
            (vec![event], ctx.with_updated_world(world))
        }

        Effect::ResetSessionTokens {
            agent,
            new_session_tokens,
        } => {
            let Some(snapshot) = ctx.agent(agent).cloned() else {
                warn!(agent = %agent, "session token reset for unknown agent skipped");
                return (vec![], ctx);
            };
            let event = event_at(
                &ctx,
                EventKind::SessionTokensReset {
                    agent: agent.clone(),
                    old_session_tokens: snapshot.token_usage.session_tokens,
                    new_session_tokens: *new_session_tokens,
                },
            );
            let usage = snapshot.token_usage.reset_session(*new_session_tokens);
            (
                vec![event],
                ctx.with_updated_agent(snapshot.with_token_usage(usage)),
            )
        }
    }
}

/// The end-of-phase sweep: any pending invite past its expiry tick produces
/// an expired event and is removed.
fn expire_invites(ctx: TickContext) -> (Vec<DomainEvent>, TickContext) {
    let overdue: Vec<Invitation> = ctx
        .pending_invites
        .values()
        .filter(|invite| invite.is_expired(ctx.tick))
        .cloned()
        .collect();

    let mut events = Vec::new();
    let mut next = ctx;
    for invite in overdue {
        events.push(event_at(
            &next,
            EventKind::ConversationInviteExpired {
                conversation_id: invite.conversation_id.clone(),
                inviter: invite.inviter.clone(),
                invitee: invite.invitee.clone(),
            },
        ));
        next = next.with_removed_invite(&invite.invitee);
    }
    if !events.is_empty() {
        debug!(count = events.len(), "expired invites");
    }
    (events, next)
}
