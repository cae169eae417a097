use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use hollowbrook_domain::{AgentName, ConversationId, LocationId, ScheduledKind};
use hollowbrook_services::Scheduler;

use crate::context::TickContext;
use crate::pipeline::Phase;

/// Determines which agents act this tick from the popped scheduled events,
/// applying observer modifiers (forced next, skip counts) and enforcing one
/// acting agent per location.
pub struct SchedulePhase {
    scheduler: Arc<Mutex<Scheduler>>,
}

impl SchedulePhase {
    pub fn new(scheduler: Arc<Mutex<Scheduler>>) -> Self {
        Self { scheduler }
    }

    /// Speaker for a due conversation turn. Priority: the conversation's
    /// `next_speaker` if awake, else a random awake participant other than
    /// the last speaker, else any awake participant, else any participant.
    fn conversation_speaker(
        conv_id: &ConversationId,
        ctx: &TickContext,
        rng: &mut impl rand::Rng,
    ) -> Option<AgentName> {
        let conv = ctx.conversation(conv_id)?;
        if conv.participants.is_empty() {
            return None;
        }

        let is_awake =
            |name: &AgentName| ctx.agent(name).is_some_and(|agent| !agent.is_sleeping);

        if let Some(hinted) = &conv.next_speaker {
            if conv.is_participant(hinted) && is_awake(hinted) {
                return Some(hinted.clone());
            }
        }

        let last_speaker = conv.last_speaker();
        let mut candidates: Vec<&AgentName> = conv
            .participants
            .iter()
            .filter(|p| Some(*p) != last_speaker && is_awake(p))
            .collect();
        if candidates.is_empty() {
            candidates = conv
                .participants
                .iter()
                .filter(|p| Some(*p) != last_speaker)
                .collect();
        }
        if candidates.is_empty() {
            candidates = conv.participants.iter().collect();
        }
        candidates.choose(rng).map(|name| (*name).clone())
    }

    /// When several selected agents share a location, keep one: the forced
    /// agent if present, else a uniform pick excluding the location's last
    /// speaker (uniform over everyone if that excludes them all).
    fn one_per_location(
        selected: BTreeSet<AgentName>,
        ctx: &TickContext,
        forced: Option<&AgentName>,
        scheduler: &Scheduler,
        rng: &mut impl rand::Rng,
    ) -> BTreeSet<AgentName> {
        if selected.len() <= 1 {
            return selected;
        }

        let mut by_location: BTreeMap<LocationId, Vec<AgentName>> = BTreeMap::new();
        for name in selected {
            if let Some(agent) = ctx.agent(&name) {
                by_location.entry(agent.location.clone()).or_default().push(name);
            }
        }

        let mut result = BTreeSet::new();
        for (location, candidates) in by_location {
            if candidates.len() == 1 {
                result.extend(candidates);
                continue;
            }
            if let Some(forced) = forced {
                if candidates.contains(forced) {
                    debug!(agent = %forced, location = %location, "forced agent wins location");
                    result.insert(forced.clone());
                    continue;
                }
            }
            let last = scheduler.last_location_speaker(&location);
            let mut choices: Vec<&AgentName> =
                candidates.iter().filter(|c| Some(*c) != last).collect();
            if choices.is_empty() {
                choices = candidates.iter().collect();
            }
            if let Some(chosen) = choices.choose(rng) {
                debug!(agent = %chosen, location = %location, "selected one agent for location");
                result.insert((*chosen).clone());
            }
        }
        result
    }
}

#[async_trait]
impl Phase for SchedulePhase {
    fn name(&self) -> &'static str {
        "schedule"
    }

    async fn run(&self, ctx: TickContext) -> Result<TickContext> {
        let mut scheduler = self.scheduler.lock().expect("scheduler lock poisoned");
        let mut rng = rand::rngs::SmallRng::from_entropy();
        let mut acting: BTreeSet<AgentName> = BTreeSet::new();

        for event in &ctx.scheduled_events {
            match event.kind {
                ScheduledKind::AgentTurn => {
                    let name = AgentName::from(event.target_id.as_str());
                    let Some(agent) = ctx.agent(&name) else { continue };
                    if agent.is_sleeping {
                        continue;
                    }
                    if scheduler.skip_count(&name) > 0 {
                        scheduler.decrement_skip(&name);
                        debug!(agent = %name, "skipping turn");
                        continue;
                    }
                    acting.insert(name);
                }
                ScheduledKind::ConversationTurn => {
                    let conv_id = ConversationId::from(event.target_id.as_str());
                    if let Some(speaker) = Self::conversation_speaker(&conv_id, &ctx, &mut rng) {
                        acting.insert(speaker);
                    }
                }
                ScheduledKind::InviteResponse => {
                    // Responses run even for agents who would normally skip.
                    let name = AgentName::from(event.target_id.as_str());
                    if ctx.agent(&name).is_some_and(|agent| !agent.is_sleeping) {
                        acting.insert(name);
                    }
                }
            }
        }

        let forced = scheduler.forced_next().cloned();
        if let Some(forced) = &forced {
            if ctx.agent(forced).is_some_and(|agent| !agent.is_sleeping) {
                info!(agent = %forced, "forcing turn");
                acting.insert(forced.clone());
            }
        }

        let acting = Self::one_per_location(acting, &ctx, forced.as_ref(), &scheduler, &mut rng);
        debug!(count = acting.len(), tick = ctx.tick, "agents scheduled to act");

        drop(scheduler);
        Ok(ctx.with_agents_to_act(acting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::{base_context, conversation_between, sleeping};
    use chrono::{TimeZone, Utc};
    use hollowbrook_domain::{ScheduledEvent, TimePeriod, PRIORITY_AGENT_TURN};

    fn phase_with(scheduler: Scheduler) -> SchedulePhase {
        SchedulePhase::new(Arc::new(Mutex::new(scheduler)))
    }

    fn agent_turn_event(agent: &str, location: &str) -> ScheduledEvent {
        ScheduledEvent {
            due_time: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            priority: PRIORITY_AGENT_TURN,
            kind: ScheduledKind::AgentTurn,
            target_id: agent.to_string(),
            location: hollowbrook_domain::LocationId::from(location),
        }
    }

    fn conversation_turn_event(id: &str) -> ScheduledEvent {
        ScheduledEvent {
            due_time: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            priority: 5,
            kind: ScheduledKind::ConversationTurn,
            target_id: id.to_string(),
            location: hollowbrook_domain::LocationId::from("workshop"),
        }
    }

    #[tokio::test]
    async fn sleeping_agents_do_not_act() {
        let mut ctx = base_context(10);
        let sage = sleeping(ctx.agents[&AgentName::from("Sage")].clone(), TimePeriod::Night);
        ctx = ctx.with_updated_agent(sage);
        ctx.scheduled_events = vec![
            agent_turn_event("Sage", "library"),
            agent_turn_event("Ember", "workshop"),
        ];

        let ctx = phase_with(Scheduler::new()).run(ctx).await.unwrap();
        assert_eq!(
            ctx.agents_to_act,
            [AgentName::from("Ember")].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn skip_count_consumes_the_turn() {
        let mut ctx = base_context(10);
        ctx.scheduled_events = vec![agent_turn_event("Ember", "workshop")];

        let mut scheduler = Scheduler::new();
        scheduler.skip_turns(AgentName::from("Ember"), 1);
        let scheduler = Arc::new(Mutex::new(scheduler));
        let phase = SchedulePhase::new(Arc::clone(&scheduler));

        let ctx = phase.run(ctx).await.unwrap();
        assert!(ctx.agents_to_act.is_empty());
        assert_eq!(
            scheduler.lock().unwrap().skip_count(&AgentName::from("Ember")),
            0
        );
    }

    #[tokio::test]
    async fn invite_responses_ignore_skip_counts() {
        let mut ctx = base_context(10);
        ctx.scheduled_events = vec![ScheduledEvent {
            kind: ScheduledKind::InviteResponse,
            ..agent_turn_event("Sage", "library")
        }];

        let mut scheduler = Scheduler::new();
        scheduler.skip_turns(AgentName::from("Sage"), 5);
        let ctx = phase_with(scheduler).run(ctx).await.unwrap();
        assert!(ctx.agents_to_act.contains(&AgentName::from("Sage")));
    }

    #[tokio::test]
    async fn conversation_turn_prefers_the_hinted_speaker() {
        let mut ctx = base_context(10);
        let conv = conversation_between(&ctx, "abc12345", Some("Ember"))
            .with_next_speaker(AgentName::from("Sage"));
        ctx = ctx.with_updated_conversation(conv);
        ctx.scheduled_events = vec![conversation_turn_event("abc12345")];

        let ctx = phase_with(Scheduler::new()).run(ctx).await.unwrap();
        assert_eq!(
            ctx.agents_to_act,
            [AgentName::from("Sage")].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn conversation_turn_avoids_the_last_speaker() {
        let mut ctx = base_context(10);
        let conv = conversation_between(&ctx, "abc12345", Some("Sage"));
        ctx = ctx.with_updated_conversation(conv);
        ctx.scheduled_events = vec![conversation_turn_event("abc12345")];

        let ctx = phase_with(Scheduler::new()).run(ctx).await.unwrap();
        assert_eq!(
            ctx.agents_to_act,
            [AgentName::from("Ember")].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn one_agent_per_location_with_forced_preference() {
        let mut ctx = base_context(10);
        // Put River in the workshop with Ember so they collide.
        let river = ctx.agents[&AgentName::from("River")]
            .clone()
            .with_location(hollowbrook_domain::LocationId::from("workshop"));
        ctx = ctx.with_updated_agent(river);
        ctx.scheduled_events = vec![
            agent_turn_event("Ember", "workshop"),
            agent_turn_event("River", "workshop"),
        ];

        let mut scheduler = Scheduler::new();
        scheduler.force_next_turn(AgentName::from("River"));
        let ctx = phase_with(scheduler).run(ctx).await.unwrap();
        assert_eq!(
            ctx.agents_to_act,
            [AgentName::from("River")].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn forced_agent_acts_even_without_a_due_event() {
        let mut ctx = base_context(10);
        ctx.scheduled_events = vec![];

        let mut scheduler = Scheduler::new();
        scheduler.force_next_turn(AgentName::from("Ember"));
        let ctx = phase_with(scheduler).run(ctx).await.unwrap();
        assert!(ctx.agents_to_act.contains(&AgentName::from("Ember")));
    }
}
