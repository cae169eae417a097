use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentName, ConversationId, LocationId};

/// How many ticks an invite remains valid before expiring.
pub const INVITE_EXPIRY_TICKS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: AgentName,
    pub narrative: String,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    /// True if the speaker left the conversation after this message.
    #[serde(default)]
    pub is_departure: bool,
    /// Narrative with tool calls interleaved, for replaying the raw turn.
    #[serde(default)]
    pub narrative_with_tools: Option<String>,
}

/// A pending offer to start or join a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub conversation_id: ConversationId,
    pub inviter: AgentName,
    pub invitee: AgentName,
    pub location: LocationId,
    pub privacy: Privacy,
    pub created_at_tick: u64,
    pub expires_at_tick: u64,
    pub invited_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_expired(&self, current_tick: u64) -> bool {
        self.expires_at_tick <= current_tick
    }
}

/// An active conversation: a located grouping of two or more agents with an
/// ordered turn history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub location: LocationId,
    pub privacy: Privacy,
    pub participants: BTreeSet<AgentName>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    pub started_at_tick: u64,
    pub created_by: AgentName,
    #[serde(default)]
    pub next_speaker: Option<AgentName>,
}

impl Conversation {
    pub fn is_participant(&self, agent: &AgentName) -> bool {
        self.participants.contains(agent)
    }

    pub fn last_speaker(&self) -> Option<&AgentName> {
        self.history.last().map(|turn| &turn.speaker)
    }

    pub fn with_participant(&self, agent: AgentName) -> Self {
        let mut next = self.clone();
        next.participants.insert(agent);
        next
    }

    pub fn without_participant(&self, agent: &AgentName) -> Self {
        let mut next = self.clone();
        next.participants.remove(agent);
        next
    }

    /// Append a turn; speaking always clears any pending next-speaker hint.
    pub fn with_turn(&self, turn: ConversationTurn) -> Self {
        let mut next = self.clone();
        next.history.push(turn);
        next.next_speaker = None;
        next
    }

    pub fn with_next_speaker(&self, speaker: AgentName) -> Self {
        let mut next = self.clone();
        next.next_speaker = Some(speaker);
        next
    }

    pub fn with_location(&self, location: LocationId) -> Self {
        let mut next = self.clone();
        next.location = location;
        next
    }
}

/// Notification that a conversation ended with a final message this agent has
/// not yet observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnseenConversationEnding {
    pub conversation_id: ConversationId,
    pub other_participant: AgentName,
    pub final_message: Option<String>,
    pub ended_at_tick: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId::from("abc12345"),
            location: LocationId::from("workshop"),
            privacy: Privacy::Private,
            participants: [AgentName::from("Ember"), AgentName::from("Sage")]
                .into_iter()
                .collect(),
            history: vec![],
            started_at_tick: 5,
            created_by: AgentName::from("Ember"),
            next_speaker: None,
        }
    }

    #[test]
    fn invite_expires_exactly_at_the_expiry_tick() {
        let invite = Invitation {
            conversation_id: ConversationId::from("abc12345"),
            inviter: AgentName::from("Ember"),
            invitee: AgentName::from("Sage"),
            location: LocationId::from("workshop"),
            privacy: Privacy::Private,
            created_at_tick: 5,
            expires_at_tick: 5 + INVITE_EXPIRY_TICKS,
            invited_at: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        };
        assert!(!invite.is_expired(5));
        assert!(!invite.is_expired(6));
        assert!(invite.is_expired(7));
    }

    #[test]
    fn speaking_clears_next_speaker() {
        let conv = conversation().with_next_speaker(AgentName::from("Sage"));
        let turn = ConversationTurn {
            speaker: AgentName::from("Sage"),
            narrative: "Hello.".to_string(),
            tick: 6,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 5, 0).unwrap(),
            is_departure: false,
            narrative_with_tools: None,
        };
        let conv = conv.with_turn(turn);
        assert_eq!(conv.next_speaker, None);
        assert_eq!(conv.last_speaker(), Some(&AgentName::from("Sage")));
    }
}
