use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Privacy;
use crate::ids::{AgentName, ConversationId, LocationId};

/// A fact appended to the log. Events are the authoritative history; every
/// line of `events.jsonl` is one serialized `DomainEvent`, self-describing
/// via the flattened `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl DomainEvent {
    pub fn new(tick: u64, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            tick,
            timestamp,
            kind,
        }
    }

    /// The wire discriminator, for type-filtered log scans.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // Agent events
    AgentMoved {
        agent: AgentName,
        from_location: LocationId,
        to_location: LocationId,
    },
    AgentMoodChanged {
        agent: AgentName,
        old_mood: String,
        new_mood: String,
    },
    AgentEnergyChanged {
        agent: AgentName,
        old_energy: u8,
        new_energy: u8,
    },
    AgentAction {
        agent: AgentName,
        location: LocationId,
        description: String,
    },
    AgentSlept {
        agent: AgentName,
        location: LocationId,
    },
    AgentWoke {
        agent: AgentName,
        location: LocationId,
        /// "time_period_changed", "visitor_arrived:<name>", "observer", ...
        reason: String,
    },
    AgentLastActiveTickUpdated {
        agent: AgentName,
        location: LocationId,
        old_last_active_tick: u64,
        new_last_active_tick: u64,
    },
    AgentSessionIdUpdated {
        agent: AgentName,
        old_session_id: Option<String>,
        new_session_id: String,
    },

    // Conversation events
    ConversationInvited {
        conversation_id: ConversationId,
        inviter: AgentName,
        invitee: AgentName,
        location: LocationId,
        privacy: Privacy,
    },
    ConversationInviteAccepted {
        conversation_id: ConversationId,
        inviter: AgentName,
        invitee: AgentName,
    },
    ConversationInviteDeclined {
        conversation_id: ConversationId,
        inviter: AgentName,
        invitee: AgentName,
    },
    ConversationInviteExpired {
        conversation_id: ConversationId,
        inviter: AgentName,
        invitee: AgentName,
    },
    ConversationStarted {
        conversation_id: ConversationId,
        location: LocationId,
        privacy: Privacy,
        initial_participants: Vec<AgentName>,
    },
    ConversationJoined {
        conversation_id: ConversationId,
        agent: AgentName,
    },
    ConversationLeft {
        conversation_id: ConversationId,
        agent: AgentName,
    },
    ConversationTurn {
        conversation_id: ConversationId,
        speaker: AgentName,
        narrative: String,
        #[serde(default)]
        is_departure: bool,
        #[serde(default)]
        narrative_with_tools: Option<String>,
    },
    ConversationNextSpeakerSet {
        conversation_id: ConversationId,
        next_speaker: AgentName,
    },
    ConversationMoved {
        conversation_id: ConversationId,
        initiated_by: AgentName,
        from_location: LocationId,
        to_location: LocationId,
        participants: Vec<AgentName>,
    },
    ConversationEnded {
        conversation_id: ConversationId,
        reason: String,
        final_participants: Vec<AgentName>,
        #[serde(default)]
        summary: String,
    },
    ConversationEndingUnseen {
        agent: AgentName,
        conversation_id: ConversationId,
        other_participant: AgentName,
        #[serde(default)]
        final_message: Option<String>,
    },
    ConversationEndingSeen {
        agent: AgentName,
        conversation_id: ConversationId,
    },

    // World events
    NightSkipped {
        from_time: DateTime<Utc>,
        to_time: DateTime<Utc>,
    },
    WorldEvent {
        description: String,
        #[serde(default)]
        location: Option<LocationId>,
        #[serde(default)]
        agents_involved: Vec<AgentName>,
    },
    WeatherChanged {
        old_weather: String,
        new_weather: String,
    },

    // Compaction and token accounting
    DidCompact {
        agent: AgentName,
        pre_tokens: u64,
        post_tokens: u64,
        critical: bool,
    },
    AgentTokenUsageRecorded {
        agent: AgentName,
        input_tokens: u64,
        output_tokens: u64,
        #[serde(default)]
        cache_creation_input_tokens: u64,
        #[serde(default)]
        cache_read_input_tokens: u64,
        model_id: String,
        cumulative_session_tokens: u64,
        cumulative_total_tokens: u64,
    },
    InterpreterTokenUsageRecorded {
        input_tokens: u64,
        output_tokens: u64,
        cumulative_total_tokens: u64,
    },
    SessionTokensReset {
        agent: AgentName,
        old_session_tokens: u64,
        new_session_tokens: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentMoved { .. } => "agent_moved",
            Self::AgentMoodChanged { .. } => "agent_mood_changed",
            Self::AgentEnergyChanged { .. } => "agent_energy_changed",
            Self::AgentAction { .. } => "agent_action",
            Self::AgentSlept { .. } => "agent_slept",
            Self::AgentWoke { .. } => "agent_woke",
            Self::AgentLastActiveTickUpdated { .. } => "agent_last_active_tick_updated",
            Self::AgentSessionIdUpdated { .. } => "agent_session_id_updated",
            Self::ConversationInvited { .. } => "conversation_invited",
            Self::ConversationInviteAccepted { .. } => "conversation_invite_accepted",
            Self::ConversationInviteDeclined { .. } => "conversation_invite_declined",
            Self::ConversationInviteExpired { .. } => "conversation_invite_expired",
            Self::ConversationStarted { .. } => "conversation_started",
            Self::ConversationJoined { .. } => "conversation_joined",
            Self::ConversationLeft { .. } => "conversation_left",
            Self::ConversationTurn { .. } => "conversation_turn",
            Self::ConversationNextSpeakerSet { .. } => "conversation_next_speaker_set",
            Self::ConversationMoved { .. } => "conversation_moved",
            Self::ConversationEnded { .. } => "conversation_ended",
            Self::ConversationEndingUnseen { .. } => "conversation_ending_unseen",
            Self::ConversationEndingSeen { .. } => "conversation_ending_seen",
            Self::NightSkipped { .. } => "night_skipped",
            Self::WorldEvent { .. } => "world_event",
            Self::WeatherChanged { .. } => "weather_changed",
            Self::DidCompact { .. } => "did_compact",
            Self::AgentTokenUsageRecorded { .. } => "agent_token_usage_recorded",
            Self::InterpreterTokenUsageRecorded { .. } => "interpreter_token_usage_recorded",
            Self::SessionTokensReset { .. } => "session_tokens_reset",
        }
    }
}
