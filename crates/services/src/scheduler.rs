use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use chrono::{DateTime, Utc};

use hollowbrook_domain::{
    AgentName, ConversationId, LocationId, ScheduledEvent, ScheduledKind, SchedulerState,
    PRIORITY_AGENT_TURN, PRIORITY_CONVERSATION_TURN, PRIORITY_INVITE_RESPONSE,
};

/// Event-driven scheduler with a priority queue keyed by `(due_time, priority)`.
///
/// Decides when agents act: conversation pace, invite response windows, and
/// solo turns. Observer modifiers (forced next, skip counts) overlay the
/// queue. The whole thing serializes to [`SchedulerState`] because the queue
/// holds the future and cannot be rebuilt from the event log.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    agent_events: BTreeSet<AgentName>,
    invite_events: BTreeSet<AgentName>,
    conversation_events: BTreeSet<ConversationId>,

    forced_next: Option<AgentName>,
    skip_counts: BTreeMap<AgentName, u32>,
    turn_counts: BTreeMap<AgentName, u64>,
    last_location_speakers: BTreeMap<LocationId, AgentName>,
}

impl Scheduler {
    pub const SOLO_PACE_MINUTES: i64 = 120;
    pub const CONVERSATION_PACE_MINUTES: i64 = 5;
    pub const INVITE_RESPONSE_MINUTES: i64 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(&mut self, event: ScheduledEvent) {
        match event.kind {
            ScheduledKind::AgentTurn => {
                self.agent_events.insert(AgentName::from(event.target_id.as_str()));
            }
            ScheduledKind::InviteResponse => {
                self.invite_events.insert(AgentName::from(event.target_id.as_str()));
            }
            ScheduledKind::ConversationTurn => {
                self.conversation_events
                    .insert(ConversationId::from(event.target_id.as_str()));
            }
        }
        self.queue.push(Reverse(event));
    }

    pub fn schedule_agent_turn(
        &mut self,
        agent: &AgentName,
        location: &LocationId,
        due_time: DateTime<Utc>,
    ) {
        self.schedule(ScheduledEvent {
            due_time,
            priority: PRIORITY_AGENT_TURN,
            kind: ScheduledKind::AgentTurn,
            target_id: agent.to_string(),
            location: location.clone(),
        });
    }

    pub fn schedule_conversation_turn(
        &mut self,
        conversation_id: &ConversationId,
        location: &LocationId,
        due_time: DateTime<Utc>,
    ) {
        self.schedule(ScheduledEvent {
            due_time,
            priority: PRIORITY_CONVERSATION_TURN,
            kind: ScheduledKind::ConversationTurn,
            target_id: conversation_id.to_string(),
            location: location.clone(),
        });
    }

    pub fn schedule_invite_response(
        &mut self,
        invitee: &AgentName,
        location: &LocationId,
        due_time: DateTime<Utc>,
    ) {
        self.schedule(ScheduledEvent {
            due_time,
            priority: PRIORITY_INVITE_RESPONSE,
            kind: ScheduledKind::InviteResponse,
            target_id: invitee.to_string(),
            location: location.clone(),
        });
    }

    pub fn earliest_due_time(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|Reverse(event)| event.due_time)
    }

    /// Remove and return all events with `due_time <= time`, in
    /// priority-then-time order.
    pub fn pop_events_up_to(&mut self, time: DateTime<Utc>) -> Vec<ScheduledEvent> {
        let mut events = Vec::new();
        while let Some(Reverse(head)) = self.queue.peek() {
            if head.due_time > time {
                break;
            }
            let Reverse(event) = self.queue.pop().expect("peeked non-empty");
            self.discard_indexed(&event);
            events.push(event);
        }
        events
    }

    /// Drop all pending events targeting an agent.
    pub fn cancel_agent_events(&mut self, agent: &AgentName) {
        self.agent_events.remove(agent);
        self.invite_events.remove(agent);
        let remaining: Vec<ScheduledEvent> = self
            .queue
            .drain()
            .map(|Reverse(event)| event)
            .filter(|event| event.target_id != agent.as_str())
            .collect();
        self.queue = remaining.into_iter().map(Reverse).collect();
    }

    fn discard_indexed(&mut self, event: &ScheduledEvent) {
        match event.kind {
            ScheduledKind::AgentTurn => {
                self.agent_events
                    .remove(&AgentName::from(event.target_id.as_str()));
            }
            ScheduledKind::InviteResponse => {
                self.invite_events
                    .remove(&AgentName::from(event.target_id.as_str()));
            }
            ScheduledKind::ConversationTurn => {
                self.conversation_events
                    .remove(&ConversationId::from(event.target_id.as_str()));
            }
        }
    }

    pub fn has_pending_agent_turn(&self, agent: &AgentName) -> bool {
        self.agent_events.contains(agent)
    }

    pub fn has_pending_invite_response(&self, agent: &AgentName) -> bool {
        self.invite_events.contains(agent)
    }

    pub fn has_pending_conversation_turn(&self, conversation_id: &ConversationId) -> bool {
        self.conversation_events.contains(conversation_id)
    }

    // ── Observer modifiers ───────────────────────────────────────────────────

    pub fn force_next_turn(&mut self, agent: AgentName) {
        self.forced_next = Some(agent);
    }

    pub fn clear_forced_next(&mut self) {
        self.forced_next = None;
    }

    pub fn forced_next(&self) -> Option<&AgentName> {
        self.forced_next.as_ref()
    }

    pub fn skip_turns(&mut self, agent: AgentName, count: u32) {
        if count == 0 {
            self.skip_counts.remove(&agent);
        } else {
            self.skip_counts.insert(agent, count);
        }
    }

    pub fn skip_count(&self, agent: &AgentName) -> u32 {
        self.skip_counts.get(agent).copied().unwrap_or(0)
    }

    pub fn decrement_skip(&mut self, agent: &AgentName) {
        if let Some(count) = self.skip_counts.get_mut(agent) {
            *count -= 1;
            if *count == 0 {
                self.skip_counts.remove(agent);
            }
        }
    }

    /// Record that an agent took a turn: bumps the turn count, remembers the
    /// last speaker at their location, and clears `forced_next` if it matched.
    pub fn record_turn(&mut self, agent: &AgentName, location: &LocationId) {
        *self.turn_counts.entry(agent.clone()).or_insert(0) += 1;
        self.last_location_speakers
            .insert(location.clone(), agent.clone());
        if self.forced_next.as_ref() == Some(agent) {
            self.forced_next = None;
        }
    }

    pub fn turn_count(&self, agent: &AgentName) -> u64 {
        self.turn_counts.get(agent).copied().unwrap_or(0)
    }

    pub fn last_location_speaker(&self, location: &LocationId) -> Option<&AgentName> {
        self.last_location_speakers.get(location)
    }

    // ── State persistence ────────────────────────────────────────────────────

    pub fn to_state(&self) -> SchedulerState {
        let mut queue: Vec<ScheduledEvent> = self
            .queue
            .iter()
            .map(|Reverse(event)| event.clone())
            .collect();
        queue.sort();
        SchedulerState {
            queue,
            forced_next: self.forced_next.clone(),
            skip_counts: self.skip_counts.clone(),
            turn_counts: self.turn_counts.clone(),
            last_location_speakers: self.last_location_speakers.clone(),
        }
    }

    pub fn load_state(&mut self, state: SchedulerState) {
        self.queue.clear();
        self.agent_events.clear();
        self.invite_events.clear();
        self.conversation_events.clear();
        for event in state.queue {
            self.schedule(event);
        }
        self.forced_next = state.forced_next;
        self.skip_counts = state.skip_counts;
        self.turn_counts = state.turn_counts;
        self.last_location_speakers = state.last_location_speakers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, minute, 0).unwrap()
    }

    fn scheduler_with_mixed_events() -> Scheduler {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_agent_turn(&AgentName::from("Ember"), &LocationId::from("workshop"), at(5));
        scheduler.schedule_invite_response(
            &AgentName::from("Sage"),
            &LocationId::from("library"),
            at(5),
        );
        scheduler.schedule_conversation_turn(
            &ConversationId::from("abc12345"),
            &LocationId::from("town_square"),
            at(10),
        );
        scheduler
    }

    #[test]
    fn pop_orders_by_priority_at_equal_due_time() {
        let mut scheduler = scheduler_with_mixed_events();
        let events = scheduler.pop_events_up_to(at(5));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ScheduledKind::InviteResponse);
        assert_eq!(events[1].kind, ScheduledKind::AgentTurn);
        // The conversation turn at :10 is still pending.
        assert!(scheduler
            .has_pending_conversation_turn(&ConversationId::from("abc12345")));
    }

    #[test]
    fn indices_track_pending_events() {
        let mut scheduler = scheduler_with_mixed_events();
        assert!(scheduler.has_pending_agent_turn(&AgentName::from("Ember")));
        assert!(scheduler.has_pending_invite_response(&AgentName::from("Sage")));

        scheduler.pop_events_up_to(at(30));
        assert!(!scheduler.has_pending_agent_turn(&AgentName::from("Ember")));
        assert!(!scheduler.has_pending_invite_response(&AgentName::from("Sage")));
        assert!(!scheduler
            .has_pending_conversation_turn(&ConversationId::from("abc12345")));
    }

    #[test]
    fn cancel_removes_all_events_for_agent() {
        let mut scheduler = scheduler_with_mixed_events();
        scheduler.cancel_agent_events(&AgentName::from("Ember"));
        assert!(!scheduler.has_pending_agent_turn(&AgentName::from("Ember")));
        let events = scheduler.pop_events_up_to(at(30));
        assert!(events.iter().all(|e| e.target_id != "Ember"));
    }

    #[test]
    fn record_turn_clears_matching_forced_next() {
        let mut scheduler = Scheduler::new();
        scheduler.force_next_turn(AgentName::from("Ember"));
        scheduler.record_turn(&AgentName::from("Sage"), &LocationId::from("library"));
        assert_eq!(scheduler.forced_next(), Some(&AgentName::from("Ember")));

        scheduler.record_turn(&AgentName::from("Ember"), &LocationId::from("workshop"));
        assert_eq!(scheduler.forced_next(), None);
        assert_eq!(scheduler.turn_count(&AgentName::from("Ember")), 1);
        assert_eq!(
            scheduler.last_location_speaker(&LocationId::from("workshop")),
            Some(&AgentName::from("Ember"))
        );
    }

    #[test]
    fn skip_counts_decrement_to_zero() {
        let mut scheduler = Scheduler::new();
        scheduler.skip_turns(AgentName::from("Ember"), 2);
        scheduler.decrement_skip(&AgentName::from("Ember"));
        assert_eq!(scheduler.skip_count(&AgentName::from("Ember")), 1);
        scheduler.decrement_skip(&AgentName::from("Ember"));
        assert_eq!(scheduler.skip_count(&AgentName::from("Ember")), 0);
    }

    #[test]
    fn state_round_trip_preserves_queue_and_modifiers() {
        let mut scheduler = scheduler_with_mixed_events();
        scheduler.force_next_turn(AgentName::from("River"));
        scheduler.skip_turns(AgentName::from("Ember"), 3);
        scheduler.record_turn(&AgentName::from("Sage"), &LocationId::from("library"));

        let state = scheduler.to_state();
        let mut restored = Scheduler::new();
        restored.load_state(state.clone());

        assert_eq!(restored.to_state(), state);
        assert!(restored.has_pending_agent_turn(&AgentName::from("Ember")));
        assert_eq!(restored.skip_count(&AgentName::from("Ember")), 3);
        assert_eq!(restored.forced_next(), Some(&AgentName::from("River")));
    }
}
