//! Read-only views of village state, flattened for display. These types are
//! for TUIs and CLIs, not for domain logic.

use chrono::{DateTime, Utc};

use hollowbrook_domain::{
    AgentSnapshot, Conversation, Invitation, ScheduledEvent, SchedulerState, TimeSnapshot,
};

#[derive(Debug, Clone, PartialEq)]
pub struct AgentDisplaySnapshot {
    pub name: String,
    pub model_display: String,
    pub location: String,
    pub mood: String,
    pub energy: u8,
    pub is_sleeping: bool,
    pub in_conversation: bool,
    pub has_pending_invite: bool,
}

impl AgentDisplaySnapshot {
    pub fn from_domain(
        agent: &AgentSnapshot,
        in_conversation: bool,
        has_pending_invite: bool,
    ) -> Self {
        Self {
            name: agent.name.to_string(),
            model_display: agent.model.display_name.clone(),
            location: agent.location.to_string(),
            mood: agent.mood.clone(),
            energy: agent.energy,
            is_sleeping: agent.is_sleeping,
            in_conversation,
            has_pending_invite,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDisplaySnapshot {
    pub id: String,
    pub location: String,
    pub participants: Vec<String>,
    pub privacy: String,
    pub turn_count: usize,
    pub last_speaker: Option<String>,
}

impl ConversationDisplaySnapshot {
    pub fn from_domain(conv: &Conversation) -> Self {
        Self {
            id: conv.id.to_string(),
            location: conv.location.to_string(),
            participants: conv.participants.iter().map(ToString::to_string).collect(),
            privacy: conv.privacy.as_str().to_string(),
            turn_count: conv.history.len(),
            last_speaker: conv.last_speaker().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InviteDisplaySnapshot {
    pub conversation_id: String,
    pub inviter: String,
    pub invitee: String,
    pub location: String,
    pub privacy: String,
    pub invited_at: DateTime<Utc>,
    pub expires_at_tick: u64,
}

impl InviteDisplaySnapshot {
    pub fn from_domain(invite: &Invitation) -> Self {
        Self {
            conversation_id: invite.conversation_id.to_string(),
            inviter: invite.inviter.to_string(),
            invitee: invite.invitee.to_string(),
            location: invite.location.to_string(),
            privacy: invite.privacy.as_str().to_string(),
            invited_at: invite.invited_at,
            expires_at_tick: invite.expires_at_tick,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEventDisplay {
    pub due_time: DateTime<Utc>,
    pub event_type: String,
    pub target_id: String,
    pub location: String,
}

impl ScheduledEventDisplay {
    pub fn from_domain(event: &ScheduledEvent) -> Self {
        Self {
            due_time: event.due_time,
            event_type: format!("{:?}", event.kind),
            target_id: event.target_id.clone(),
            location: event.location.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDisplaySnapshot {
    pub pending_events: Vec<ScheduledEventDisplay>,
    pub forced_next: Option<String>,
    pub skip_counts: Vec<(String, u32)>,
    pub turn_counts: Vec<(String, u64)>,
}

impl ScheduleDisplaySnapshot {
    pub fn from_domain(state: &SchedulerState) -> Self {
        Self {
            pending_events: state
                .queue
                .iter()
                .map(ScheduledEventDisplay::from_domain)
                .collect(),
            forced_next: state.forced_next.as_ref().map(ToString::to_string),
            skip_counts: state
                .skip_counts
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect(),
            turn_counts: state
                .turn_counts
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeDisplaySnapshot {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub day_number: i64,
    pub time_of_day: String,
    pub clock_time: String,
}

impl TimeDisplaySnapshot {
    pub fn from_domain(time: &TimeSnapshot) -> Self {
        Self {
            tick: time.tick,
            timestamp: time.world_time,
            day_number: time.day_number(),
            time_of_day: time.period().as_str().to_string(),
            clock_time: time.clock(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VillageDisplaySnapshot {
    pub tick: u64,
    pub time: TimeDisplaySnapshot,
    pub weather: String,
    pub agents: Vec<AgentDisplaySnapshot>,
    pub conversations: Vec<ConversationDisplaySnapshot>,
    pub pending_invites: Vec<InviteDisplaySnapshot>,
    pub schedule: ScheduleDisplaySnapshot,
}
