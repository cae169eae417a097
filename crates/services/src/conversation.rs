use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use hollowbrook_domain::{
    AgentName, Conversation, ConversationId, ConversationTurn, Invitation, LocationId, Privacy,
    INVITE_EXPIRY_TICKS,
};

/// Mint a short conversation id: the first 8 chars of a v4 uuid, matching the
/// ids that appear in the event log.
pub fn mint_conversation_id() -> ConversationId {
    let id = Uuid::new_v4().to_string();
    ConversationId::new(&id[..8])
}

/// Conversation context assembled for an agent's turn.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation: Conversation,
    /// Turns since the agent last spoke (or since `last_seen_tick` if they
    /// have not spoken yet).
    pub unseen_history: Vec<ConversationTurn>,
    pub is_opener: bool,
    pub participant_count: usize,
    pub is_group: bool,
    pub other_participants: Vec<AgentName>,
}

/// Manages the invitation-based conversation lifecycle.
///
/// Conversations don't exist until the first invite is accepted; location is
/// informational, not definitional; unanswered invites expire rather than
/// being declined. This service is a query index - the event store's applier
/// holds the authoritative state, and the engine reloads this index from each
/// committed snapshot.
#[derive(Debug, Default)]
pub struct ConversationService {
    conversations: BTreeMap<ConversationId, Conversation>,
    pending_invites: BTreeMap<AgentName, Invitation>,
    agent_conversations: BTreeMap<AgentName, BTreeSet<ConversationId>>,
}

impl ConversationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from snapshot state, rebuilding the agent→conversations index.
    pub fn load_state(
        &mut self,
        conversations: BTreeMap<ConversationId, Conversation>,
        pending_invites: BTreeMap<AgentName, Invitation>,
    ) {
        self.agent_conversations.clear();
        for (id, conv) in &conversations {
            for agent in &conv.participants {
                self.agent_conversations
                    .entry(agent.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.conversations = conversations;
        self.pending_invites = pending_invites;
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// An agent can be in multiple conversations simultaneously.
    pub fn conversations_for_agent(&self, agent: &AgentName) -> Vec<&Conversation> {
        self.agent_conversations
            .get(agent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.conversations.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn conversations_at_location(
        &self,
        location: &LocationId,
        public_only: bool,
    ) -> Vec<&Conversation> {
        self.conversations
            .values()
            .filter(|conv| {
                &conv.location == location && (!public_only || conv.privacy == Privacy::Public)
            })
            .collect()
    }

    pub fn pending_invite(&self, agent: &AgentName) -> Option<&Invitation> {
        self.pending_invites.get(agent)
    }

    pub fn all_pending_invites(&self) -> &BTreeMap<AgentName, Invitation> {
        &self.pending_invites
    }

    pub fn all_conversations(&self) -> &BTreeMap<ConversationId, Conversation> {
        &self.conversations
    }

    pub fn is_in_conversation(&self, agent: &AgentName) -> bool {
        self.agent_conversations
            .get(agent)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn is_in_specific_conversation(&self, agent: &AgentName, id: &ConversationId) -> bool {
        self.agent_conversations
            .get(agent)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Context for an agent's conversation turn, or `None` if the agent is
    /// not a participant.
    pub fn conversation_context(
        &self,
        id: &ConversationId,
        agent: &AgentName,
        last_seen_tick: u64,
    ) -> Option<ConversationContext> {
        let conv = self.conversations.get(id)?;
        if !conv.is_participant(agent) {
            return None;
        }

        let last_spoken_index = conv
            .history
            .iter()
            .rposition(|turn| &turn.speaker == agent);
        let unseen_history: Vec<ConversationTurn> = match last_spoken_index {
            Some(index) => conv.history[index + 1..].to_vec(),
            None => conv
                .history
                .iter()
                .filter(|turn| turn.tick > last_seen_tick)
                .cloned()
                .collect(),
        };

        Some(ConversationContext {
            conversation: conv.clone(),
            unseen_history,
            is_opener: conv.history.is_empty(),
            participant_count: conv.participants.len(),
            is_group: conv.participants.len() > 2,
            other_participants: conv
                .participants
                .iter()
                .filter(|p| *p != agent)
                .cloned()
                .collect(),
        })
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Create an invitation. The conversation does not exist yet - it is
    /// created when the invite is accepted. Returns `(conversation_id, invite)`.
    pub fn create_invite(
        &mut self,
        inviter: AgentName,
        invitee: AgentName,
        location: LocationId,
        privacy: Privacy,
        current_tick: u64,
        invited_at: DateTime<Utc>,
    ) -> (ConversationId, Invitation) {
        let conversation_id = mint_conversation_id();
        let invitation = Invitation {
            conversation_id: conversation_id.clone(),
            inviter,
            invitee: invitee.clone(),
            location,
            privacy,
            created_at_tick: current_tick,
            expires_at_tick: current_tick + INVITE_EXPIRY_TICKS,
            invited_at,
        };
        self.pending_invites.insert(invitee, invitation.clone());
        (conversation_id, invitation)
    }

    /// Accept a pending invitation, creating the conversation on first
    /// accept. Returns the conversation, or `None` if no invite was pending.
    pub fn accept_invite(&mut self, agent: &AgentName, current_tick: u64) -> Option<Conversation> {
        let invite = self.pending_invites.remove(agent)?;
        let conv_id = invite.conversation_id.clone();

        let conv = match self.conversations.get(&conv_id) {
            Some(existing) => existing.with_participant(agent.clone()),
            None => Conversation {
                id: conv_id.clone(),
                location: invite.location.clone(),
                privacy: invite.privacy,
                participants: [invite.inviter.clone(), agent.clone()].into_iter().collect(),
                history: Vec::new(),
                started_at_tick: current_tick,
                created_by: invite.inviter.clone(),
                next_speaker: None,
            },
        };

        for participant in &conv.participants {
            self.agent_conversations
                .entry(participant.clone())
                .or_default()
                .insert(conv_id.clone());
        }
        self.conversations.insert(conv_id.clone(), conv);
        self.conversations.get(&conv_id).cloned()
    }

    pub fn decline_invite(&mut self, agent: &AgentName) -> Option<Invitation> {
        self.pending_invites.remove(agent)
    }

    /// Softer than decline: the invite just was not addressed.
    pub fn expire_invite(&mut self, agent: &AgentName) -> Option<Invitation> {
        self.pending_invites.remove(agent)
    }

    /// Remove and return every invite past its expiry tick.
    pub fn expire_invites_at_tick(&mut self, current_tick: u64) -> Vec<Invitation> {
        let expired_invitees: Vec<AgentName> = self
            .pending_invites
            .iter()
            .filter(|(_, invite)| invite.is_expired(current_tick))
            .map(|(invitee, _)| invitee.clone())
            .collect();
        expired_invitees
            .iter()
            .filter_map(|invitee| self.pending_invites.remove(invitee))
            .collect()
    }

    /// Join a public conversation. Returns the updated conversation, or
    /// `None` if it does not exist or is private.
    pub fn join_conversation(
        &mut self,
        agent: &AgentName,
        id: &ConversationId,
    ) -> Option<Conversation> {
        let conv = self.conversations.get(id)?;
        if conv.privacy != Privacy::Public {
            return None;
        }
        if conv.is_participant(agent) {
            return Some(conv.clone());
        }

        let updated = conv.with_participant(agent.clone());
        self.conversations.insert(id.clone(), updated.clone());
        self.agent_conversations
            .entry(agent.clone())
            .or_default()
            .insert(id.clone());
        Some(updated)
    }

    /// Leave a conversation. Returns `(remaining_conversation, ended)`; when
    /// fewer than two participants remain the conversation is removed and
    /// `(None, true)` is returned.
    pub fn leave_conversation(
        &mut self,
        agent: &AgentName,
        id: &ConversationId,
    ) -> (Option<Conversation>, bool) {
        let Some(conv) = self.conversations.get(id) else {
            return (None, false);
        };
        if !conv.is_participant(agent) {
            return (None, false);
        }

        let updated = conv.without_participant(agent);
        if let Some(ids) = self.agent_conversations.get_mut(agent) {
            ids.remove(id);
        }

        if updated.participants.len() < 2 {
            self.conversations.remove(id);
            for remaining in &updated.participants {
                if let Some(ids) = self.agent_conversations.get_mut(remaining) {
                    ids.remove(id);
                }
            }
            return (None, true);
        }

        self.conversations.insert(id.clone(), updated.clone());
        (Some(updated), false)
    }

    /// Add a turn. The speaker must be a participant.
    pub fn add_turn(
        &mut self,
        id: &ConversationId,
        speaker: &AgentName,
        narrative: String,
        tick: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<Conversation> {
        let conv = self.conversations.get(id)?;
        if !conv.is_participant(speaker) {
            return None;
        }
        let updated = conv.with_turn(ConversationTurn {
            speaker: speaker.clone(),
            narrative,
            tick,
            timestamp,
            is_departure: false,
            narrative_with_tools: None,
        });
        self.conversations.insert(id.clone(), updated.clone());
        Some(updated)
    }

    pub fn set_next_speaker(&mut self, id: &ConversationId, speaker: &AgentName) -> bool {
        let Some(conv) = self.conversations.get(id) else {
            return false;
        };
        if !conv.is_participant(speaker) {
            return false;
        }
        let updated = conv.with_next_speaker(speaker.clone());
        self.conversations.insert(id.clone(), updated);
        true
    }

    /// Pick the next speaker: the explicit `next_speaker` hint wins, else a
    /// random participant excluding the last speaker.
    pub fn next_speaker(
        &self,
        id: &ConversationId,
        last_speaker: Option<&AgentName>,
        rng: &mut impl Rng,
    ) -> Option<AgentName> {
        let conv = self.conversations.get(id)?;
        if conv.participants.is_empty() {
            return None;
        }

        if let Some(hinted) = &conv.next_speaker {
            if conv.is_participant(hinted) {
                return Some(hinted.clone());
            }
        }

        let mut candidates: Vec<&AgentName> = conv
            .participants
            .iter()
            .filter(|p| Some(*p) != last_speaker)
            .collect();
        if candidates.is_empty() {
            candidates = conv.participants.iter().collect();
        }
        candidates.choose(rng).map(|name| (*name).clone())
    }

    /// End a conversation explicitly. Returns it for summary generation.
    pub fn end_conversation(&mut self, id: &ConversationId) -> Option<Conversation> {
        let conv = self.conversations.remove(id)?;
        for agent in &conv.participants {
            if let Some(ids) = self.agent_conversations.get_mut(agent) {
                ids.remove(id);
            }
        }
        Some(conv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn service_with_conversation() -> (ConversationService, ConversationId) {
        let mut service = ConversationService::new();
        let (conv_id, _) = service.create_invite(
            AgentName::from("Ember"),
            AgentName::from("Sage"),
            LocationId::from("workshop"),
            Privacy::Private,
            5,
            stamp(),
        );
        service.accept_invite(&AgentName::from("Sage"), 6).unwrap();
        (service, conv_id)
    }

    #[test]
    fn conversations_do_not_exist_until_first_accept() {
        let mut service = ConversationService::new();
        let (conv_id, invite) = service.create_invite(
            AgentName::from("Ember"),
            AgentName::from("Sage"),
            LocationId::from("workshop"),
            Privacy::Private,
            5,
            stamp(),
        );
        assert_eq!(invite.expires_at_tick, 7);
        assert!(service.conversation(&conv_id).is_none());

        let conv = service.accept_invite(&AgentName::from("Sage"), 6).unwrap();
        assert_eq!(conv.participants.len(), 2);
        assert!(service.pending_invite(&AgentName::from("Sage")).is_none());
        assert!(service.is_in_conversation(&AgentName::from("Ember")));
    }

    #[test]
    fn expiry_sweep_removes_only_overdue_invites() {
        let mut service = ConversationService::new();
        service.create_invite(
            AgentName::from("Ember"),
            AgentName::from("Sage"),
            LocationId::from("workshop"),
            Privacy::Public,
            5,
            stamp(),
        );
        service.create_invite(
            AgentName::from("River"),
            AgentName::from("Wren"),
            LocationId::from("library"),
            Privacy::Public,
            6,
            stamp(),
        );

        assert!(service.expire_invites_at_tick(6).is_empty());
        let expired = service.expire_invites_at_tick(7);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].invitee, AgentName::from("Sage"));
        assert!(service.pending_invite(&AgentName::from("Wren")).is_some());
    }

    #[test]
    fn leaving_a_two_person_conversation_ends_it() {
        let (mut service, conv_id) = service_with_conversation();
        let (remaining, ended) = service.leave_conversation(&AgentName::from("Ember"), &conv_id);
        assert!(ended);
        assert!(remaining.is_none());
        assert!(service.conversation(&conv_id).is_none());
        assert!(!service.is_in_conversation(&AgentName::from("Sage")));
    }

    #[test]
    fn joining_requires_public_privacy() {
        let (mut service, conv_id) = service_with_conversation();
        assert!(service
            .join_conversation(&AgentName::from("River"), &conv_id)
            .is_none());
    }

    #[test]
    fn unseen_history_starts_after_agents_last_turn() {
        let (mut service, conv_id) = service_with_conversation();
        service
            .add_turn(&conv_id, &AgentName::from("Ember"), "One.".into(), 6, stamp())
            .unwrap();
        service
            .add_turn(&conv_id, &AgentName::from("Sage"), "Two.".into(), 7, stamp())
            .unwrap();
        service
            .add_turn(&conv_id, &AgentName::from("Ember"), "Three.".into(), 8, stamp())
            .unwrap();

        let ctx = service
            .conversation_context(&conv_id, &AgentName::from("Sage"), 0)
            .unwrap();
        assert_eq!(ctx.unseen_history.len(), 1);
        assert_eq!(ctx.unseen_history[0].narrative, "Three.");
        assert!(!ctx.is_group);
    }

    #[test]
    fn next_speaker_prefers_the_hint_then_avoids_last_speaker() {
        let (mut service, conv_id) = service_with_conversation();
        let mut rng = SmallRng::seed_from_u64(7);

        service.set_next_speaker(&conv_id, &AgentName::from("Sage"));
        assert_eq!(
            service.next_speaker(&conv_id, None, &mut rng),
            Some(AgentName::from("Sage"))
        );

        // Clear the hint by having Sage speak, then the pick avoids them.
        service
            .add_turn(&conv_id, &AgentName::from("Sage"), "Hi.".into(), 7, stamp())
            .unwrap();
        assert_eq!(
            service.next_speaker(&conv_id, Some(&AgentName::from("Sage")), &mut rng),
            Some(AgentName::from("Ember"))
        );
    }

    #[test]
    fn load_state_rebuilds_the_agent_index() {
        let (service, conv_id) = service_with_conversation();
        let conversations = service.all_conversations().clone();

        let mut restored = ConversationService::new();
        restored.load_state(conversations, BTreeMap::new());
        assert!(restored.is_in_specific_conversation(&AgentName::from("Ember"), &conv_id));
        assert_eq!(
            restored
                .conversations_for_agent(&AgentName::from("Sage"))
                .len(),
            1
        );
    }
}
