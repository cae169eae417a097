//! Queries (`get_*`) are read-only and safe to call any number of times;
//! commands (`do_*`) build effects or events and feed them through the
//! engine's `apply_effect` / `commit_event` path, so they can never bypass
//! the log.

use anyhow::Result;
use thiserror::Error;
use tracing::info;

use hollowbrook_domain::{
    AgentName, ConversationId, DomainEvent, Effect, EventKind, LocationId, Weather,
};

use crate::engine::VillageEngine;
use crate::observer::snapshots::{
    AgentDisplaySnapshot, ConversationDisplaySnapshot, InviteDisplaySnapshot,
    ScheduleDisplaySnapshot, TimeDisplaySnapshot, VillageDisplaySnapshot,
};

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentName),
    #[error("invalid location: {0}")]
    InvalidLocation(LocationId),
    #[error("conversation not found: {0}")]
    Conversation(ConversationId),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// The human interface to a running village.
pub struct ObserverApi<'a> {
    engine: &'a mut VillageEngine,
}

impl<'a> ObserverApi<'a> {
    pub fn new(engine: &'a mut VillageEngine) -> Self {
        Self { engine }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_village_snapshot(&self) -> Result<VillageDisplaySnapshot, ObserverError> {
        let time = self.engine.time().map_err(ObserverError::Storage)?;
        let world = self.engine.world().map_err(ObserverError::Storage)?;
        Ok(VillageDisplaySnapshot {
            tick: self.engine.tick(),
            time: TimeDisplaySnapshot::from_domain(time),
            weather: world.weather.as_str().to_string(),
            agents: self
                .engine
                .agents()
                .keys()
                .map(|name| self.get_agent(name).expect("agent listed in state"))
                .collect(),
            conversations: self.get_conversations(),
            pending_invites: self.get_pending_invites(),
            schedule: self.get_schedule(),
        })
    }

    pub fn get_agent(&self, name: &AgentName) -> Result<AgentDisplaySnapshot, ObserverError> {
        let agent = self
            .engine
            .agents()
            .get(name)
            .ok_or_else(|| ObserverError::AgentNotFound(name.clone()))?;
        Ok(AgentDisplaySnapshot::from_domain(
            agent,
            self.engine.conversation_service().is_in_conversation(name),
            self.engine.pending_invites().contains_key(name),
        ))
    }

    pub fn get_conversations(&self) -> Vec<ConversationDisplaySnapshot> {
        self.engine
            .conversations()
            .values()
            .map(ConversationDisplaySnapshot::from_domain)
            .collect()
    }

    pub fn get_pending_invites(&self) -> Vec<InviteDisplaySnapshot> {
        self.engine
            .pending_invites()
            .values()
            .map(InviteDisplaySnapshot::from_domain)
            .collect()
    }

    pub fn get_schedule(&self) -> ScheduleDisplaySnapshot {
        ScheduleDisplaySnapshot::from_domain(&self.engine.scheduler_state())
    }

    pub fn get_recent_events(&self, limit: usize) -> Result<Vec<DomainEvent>, ObserverError> {
        Ok(self.engine.recent_events(limit, None, 0)?)
    }

    // ── Command helpers ──────────────────────────────────────────────────────

    fn require_agent(&self, name: &AgentName) -> Result<(), ObserverError> {
        if self.engine.agents().contains_key(name) {
            Ok(())
        } else {
            Err(ObserverError::AgentNotFound(name.clone()))
        }
    }

    fn require_location(&self, location: &LocationId) -> Result<(), ObserverError> {
        let world = self.engine.world().map_err(ObserverError::Storage)?;
        if world.locations.contains_key(location) {
            Ok(())
        } else {
            Err(ObserverError::InvalidLocation(location.clone()))
        }
    }

    fn current_event(&self, kind: EventKind) -> Result<DomainEvent, ObserverError> {
        let time = self.engine.time().map_err(ObserverError::Storage)?;
        Ok(DomainEvent::new(self.engine.tick(), time.world_time, kind))
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub fn do_move_agent(
        &mut self,
        name: &AgentName,
        to_location: &LocationId,
    ) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.require_location(to_location)?;
        let from_location = self.engine.agents()[name].location.clone();
        info!(agent = %name, to = %to_location, "observer moving agent");
        self.engine.apply_effect(Effect::MoveAgent {
            agent: name.clone(),
            from_location,
            to_location: to_location.clone(),
        })?;
        Ok(())
    }

    pub fn do_set_mood(&mut self, name: &AgentName, mood: &str) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.apply_effect(Effect::UpdateMood {
            agent: name.clone(),
            mood: mood.to_string(),
        })?;
        Ok(())
    }

    pub fn do_sleep_agent(&mut self, name: &AgentName) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.apply_effect(Effect::AgentSleep {
            agent: name.clone(),
        })?;
        Ok(())
    }

    pub fn do_wake_agent(&mut self, name: &AgentName) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.apply_effect(Effect::AgentWake {
            agent: name.clone(),
            reason: Some("observer".to_string()),
        })?;
        Ok(())
    }

    pub fn do_boost_energy(&mut self, name: &AgentName, amount: i64) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        let energy = i64::from(self.engine.agents()[name].energy) + amount;
        self.engine.apply_effect(Effect::UpdateEnergy {
            agent: name.clone(),
            energy,
        })?;
        Ok(())
    }

    pub fn do_record_action(
        &mut self,
        name: &AgentName,
        description: &str,
    ) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.apply_effect(Effect::RecordAction {
            agent: name.clone(),
            description: description.to_string(),
        })?;
        Ok(())
    }

    /// Send a dream: writes the dream file for the agent's next turn AND
    /// records a world event so the history remembers it happened.
    pub fn do_send_dream(&mut self, name: &AgentName, content: &str) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.write_to_agent_dreams(name, content)?;
        let event = self.current_event(EventKind::WorldEvent {
            description: format!("A dream drifted into {name}'s sleep."),
            location: None,
            agents_involved: vec![name.clone()],
        })?;
        self.engine.commit_event(event)?;
        Ok(())
    }

    pub fn do_trigger_world_event(
        &mut self,
        description: &str,
        location: Option<&LocationId>,
        agents_involved: &[AgentName],
    ) -> Result<(), ObserverError> {
        if let Some(location) = location {
            self.require_location(location)?;
        }
        for agent in agents_involved {
            self.require_agent(agent)?;
        }
        let event = self.current_event(EventKind::WorldEvent {
            description: description.to_string(),
            location: location.cloned(),
            agents_involved: agents_involved.to_vec(),
        })?;
        self.engine.commit_event(event)?;
        Ok(())
    }

    pub fn do_set_weather(&mut self, weather: Weather) -> Result<(), ObserverError> {
        let old_weather = self
            .engine
            .world()
            .map_err(ObserverError::Storage)?
            .weather;
        let event = self.current_event(EventKind::WeatherChanged {
            old_weather: old_weather.as_str().to_string(),
            new_weather: weather.as_str().to_string(),
        })?;
        self.engine.commit_event(event)?;
        Ok(())
    }

    pub fn do_force_next_turn(&mut self, name: &AgentName) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.force_next_turn(name.clone());
        Ok(())
    }

    pub fn do_skip_turns(&mut self, name: &AgentName, count: u32) -> Result<(), ObserverError> {
        self.require_agent(name)?;
        self.engine.skip_turns(name.clone(), count);
        Ok(())
    }

    pub fn do_clear_modifiers(&mut self) {
        self.engine.clear_forced_next();
    }

    pub fn do_end_conversation(
        &mut self,
        conversation_id: &ConversationId,
        reason: &str,
    ) -> Result<(), ObserverError> {
        match self.engine.end_conversation(conversation_id, reason)? {
            Some(_) => Ok(()),
            None => Err(ObserverError::Conversation(conversation_id.clone())),
        }
    }
}
