use serde::{Deserialize, Serialize};

use crate::conversation::Privacy;
use crate::ids::{AgentName, ConversationId, LocationId};

/// An intent to change state, produced within a tick.
///
/// Effects are transient: the apply-effects phase translates each into zero
/// or more [`crate::DomainEvent`]s before commit, and only the events are
/// durable. Every variant names its subject so effects accumulated by
/// concurrent agent turns can be merged in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    MoveAgent {
        agent: AgentName,
        from_location: LocationId,
        to_location: LocationId,
    },
    UpdateMood {
        agent: AgentName,
        mood: String,
    },
    UpdateEnergy {
        agent: AgentName,
        energy: i64,
    },
    RecordAction {
        agent: AgentName,
        description: String,
    },
    AgentSleep {
        agent: AgentName,
    },
    AgentWake {
        agent: AgentName,
        #[serde(default)]
        reason: Option<String>,
    },
    UpdateLastActiveTick {
        agent: AgentName,
        /// Where the agent was when they acted.
        location: LocationId,
    },
    UpdateSessionId {
        agent: AgentName,
        session_id: String,
    },

    // Conversation lifecycle
    InviteToConversation {
        inviter: AgentName,
        invitee: AgentName,
        location: LocationId,
        privacy: Privacy,
        #[serde(default)]
        topic: Option<String>,
    },
    AcceptInvite {
        agent: AgentName,
        conversation_id: ConversationId,
        /// Text after the accept tool call, spoken as the opening turn.
        #[serde(default)]
        first_message: Option<String>,
    },
    DeclineInvite {
        agent: AgentName,
        conversation_id: ConversationId,
    },
    ExpireInvite {
        conversation_id: ConversationId,
        invitee: AgentName,
    },
    JoinConversation {
        agent: AgentName,
        conversation_id: ConversationId,
        #[serde(default)]
        first_message: Option<String>,
    },
    LeaveConversation {
        agent: AgentName,
        conversation_id: ConversationId,
        /// Text before the leave tool call, spoken as a departure turn.
        #[serde(default)]
        last_message: Option<String>,
    },
    MoveConversation {
        /// Who initiated the move.
        agent: AgentName,
        conversation_id: ConversationId,
        to_location: LocationId,
    },
    AddConversationTurn {
        conversation_id: ConversationId,
        speaker: AgentName,
        narrative: String,
        #[serde(default)]
        narrative_with_tools: Option<String>,
    },
    SetNextSpeaker {
        conversation_id: ConversationId,
        speaker: AgentName,
    },
    EndConversation {
        conversation_id: ConversationId,
        reason: String,
    },
    ConversationEndingSeen {
        agent: AgentName,
        conversation_id: ConversationId,
    },

    // Compaction
    ShouldCompact {
        agent: AgentName,
        /// Token count before compaction.
        pre_tokens: u64,
        /// True at the critical threshold; false for the pre-sleep window
        /// where compaction only happens if the agent also sleeps this tick.
        critical: bool,
    },

    // Token accounting
    RecordAgentTokenUsage {
        agent: AgentName,
        input_tokens: u64,
        output_tokens: u64,
        #[serde(default)]
        cache_creation_input_tokens: u64,
        #[serde(default)]
        cache_read_input_tokens: u64,
        model_id: String,
    },
    RecordInterpreterTokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    ResetSessionTokens {
        agent: AgentName,
        new_session_tokens: u64,
    },
}

impl Effect {
    /// The agent this effect is about, when it has a single subject agent.
    pub fn subject_agent(&self) -> Option<&AgentName> {
        match self {
            Self::MoveAgent { agent, .. }
            | Self::UpdateMood { agent, .. }
            | Self::UpdateEnergy { agent, .. }
            | Self::RecordAction { agent, .. }
            | Self::AgentSleep { agent }
            | Self::AgentWake { agent, .. }
            | Self::UpdateLastActiveTick { agent, .. }
            | Self::UpdateSessionId { agent, .. }
            | Self::AcceptInvite { agent, .. }
            | Self::DeclineInvite { agent, .. }
            | Self::JoinConversation { agent, .. }
            | Self::LeaveConversation { agent, .. }
            | Self::MoveConversation { agent, .. }
            | Self::ConversationEndingSeen { agent, .. }
            | Self::ShouldCompact { agent, .. }
            | Self::RecordAgentTokenUsage { agent, .. }
            | Self::ResetSessionTokens { agent, .. } => Some(agent),
            Self::InviteToConversation { inviter, .. } => Some(inviter),
            Self::ExpireInvite { invitee, .. } => Some(invitee),
            Self::AddConversationTurn { speaker, .. } | Self::SetNextSpeaker { speaker, .. } => {
                Some(speaker)
            }
            Self::EndConversation { .. } | Self::RecordInterpreterTokenUsage { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(effect: &Effect) -> Effect {
        let json = serde_json::to_string(effect).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn effects_carry_their_wire_discriminator() {
        let effect = Effect::MoveAgent {
            agent: AgentName::from("Ember"),
            from_location: LocationId::from("workshop"),
            to_location: LocationId::from("library"),
        };
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["type"], "move_agent");
        assert_eq!(value["agent"], "Ember");
    }

    #[test]
    fn every_kind_round_trips() {
        let agent = AgentName::from("Ember");
        let other = AgentName::from("Sage");
        let conv = ConversationId::from("abc12345");
        let here = LocationId::from("workshop");
        let there = LocationId::from("library");

        let effects = vec![
            Effect::MoveAgent {
                agent: agent.clone(),
                from_location: here.clone(),
                to_location: there.clone(),
            },
            Effect::UpdateMood {
                agent: agent.clone(),
                mood: "happy".to_string(),
            },
            Effect::UpdateEnergy {
                agent: agent.clone(),
                energy: 70,
            },
            Effect::RecordAction {
                agent: agent.clone(),
                description: "sanded a chair leg".to_string(),
            },
            Effect::AgentSleep {
                agent: agent.clone(),
            },
            Effect::AgentWake {
                agent: agent.clone(),
                reason: Some("time_period_changed".to_string()),
            },
            Effect::UpdateLastActiveTick {
                agent: agent.clone(),
                location: here.clone(),
            },
            Effect::UpdateSessionId {
                agent: agent.clone(),
                session_id: "s-42".to_string(),
            },
            Effect::InviteToConversation {
                inviter: agent.clone(),
                invitee: other.clone(),
                location: here.clone(),
                privacy: Privacy::Private,
                topic: None,
            },
            Effect::AcceptInvite {
                agent: other.clone(),
                conversation_id: conv.clone(),
                first_message: Some("Hi.".to_string()),
            },
            Effect::DeclineInvite {
                agent: other.clone(),
                conversation_id: conv.clone(),
            },
            Effect::ExpireInvite {
                conversation_id: conv.clone(),
                invitee: other.clone(),
            },
            Effect::JoinConversation {
                agent: other.clone(),
                conversation_id: conv.clone(),
                first_message: None,
            },
            Effect::LeaveConversation {
                agent: agent.clone(),
                conversation_id: conv.clone(),
                last_message: Some("Goodbye.".to_string()),
            },
            Effect::MoveConversation {
                agent: agent.clone(),
                conversation_id: conv.clone(),
                to_location: there.clone(),
            },
            Effect::AddConversationTurn {
                conversation_id: conv.clone(),
                speaker: agent.clone(),
                narrative: "I nodded.".to_string(),
                narrative_with_tools: None,
            },
            Effect::SetNextSpeaker {
                conversation_id: conv.clone(),
                speaker: other.clone(),
            },
            Effect::EndConversation {
                conversation_id: conv.clone(),
                reason: "observer".to_string(),
            },
            Effect::ConversationEndingSeen {
                agent: other.clone(),
                conversation_id: conv.clone(),
            },
            Effect::ShouldCompact {
                agent: agent.clone(),
                pre_tokens: 151_000,
                critical: true,
            },
            Effect::RecordAgentTokenUsage {
                agent: agent.clone(),
                input_tokens: 1_200,
                output_tokens: 340,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 8_000,
                model_id: "model-x".to_string(),
            },
            Effect::RecordInterpreterTokenUsage {
                input_tokens: 500,
                output_tokens: 60,
            },
            Effect::ResetSessionTokens {
                agent,
                new_session_tokens: 12_000,
            },
        ];

        for effect in effects {
            assert_eq!(round_trip(&effect), effect);
        }
    }
}
