use std::collections::BTreeMap;

use hollowbrook_domain::{AgentName, AgentSnapshot, LocationId};

/// In-memory view of agent snapshots with location and sleep queries.
///
/// Keeps agent identity/state lookups separate from scheduling concerns.
/// Like every other service, it is rebuilt from the committed snapshot on
/// hydrate and never mutates state on its own.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentName, AgentSnapshot>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_state(&mut self, agents: BTreeMap<AgentName, AgentSnapshot>) {
        self.agents = agents;
    }

    pub fn get(&self, name: &AgentName) -> Option<&AgentSnapshot> {
        self.agents.get(name)
    }

    pub fn all(&self) -> &BTreeMap<AgentName, AgentSnapshot> {
        &self.agents
    }

    pub fn names(&self) -> Vec<AgentName> {
        self.agents.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    // ── Location queries ─────────────────────────────────────────────────────

    pub fn at_location(&self, location: &LocationId) -> Vec<&AgentSnapshot> {
        self.agents
            .values()
            .filter(|agent| &agent.location == location)
            .collect()
    }

    pub fn others_at_location(
        &self,
        location: &LocationId,
        exclude: &AgentName,
    ) -> Vec<&AgentSnapshot> {
        self.agents
            .values()
            .filter(|agent| &agent.location == location && &agent.name != exclude)
            .collect()
    }

    pub fn locations(&self) -> BTreeMap<LocationId, Vec<AgentName>> {
        let mut result: BTreeMap<LocationId, Vec<AgentName>> = BTreeMap::new();
        for agent in self.agents.values() {
            result
                .entry(agent.location.clone())
                .or_default()
                .push(agent.name.clone());
        }
        result
    }

    // ── Sleep queries ────────────────────────────────────────────────────────

    pub fn awake(&self) -> Vec<&AgentSnapshot> {
        self.agents.values().filter(|a| !a.is_sleeping).collect()
    }

    pub fn sleeping(&self) -> Vec<&AgentSnapshot> {
        self.agents.values().filter(|a| a.is_sleeping).collect()
    }

    /// An empty village counts as all-sleeping, which keeps the night-skip
    /// guard from firing on an uninitialized world.
    pub fn all_sleeping(&self) -> bool {
        self.agents.values().all(|a| a.is_sleeping)
    }

    pub fn any_awake(&self) -> bool {
        self.agents.values().any(|a| !a.is_sleeping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hollowbrook_domain::{AgentModel, TimePeriod, TokenUsage};

    fn agent(name: &str, location: &str, sleeping: bool) -> AgentSnapshot {
        let snapshot = AgentSnapshot {
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
        };
        if sleeping {
            snapshot.asleep(1, TimePeriod::Night)
        } else {
            snapshot
        }
    }

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        let agents = [
            agent("Ember", "workshop", false),
            agent("Sage", "library", true),
            agent("River", "workshop", false),
        ];
        registry.load_state(
            agents
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
        );
        registry
    }

    #[test]
    fn location_queries_filter_and_exclude() {
        let registry = registry();
        assert_eq!(registry.at_location(&LocationId::from("workshop")).len(), 2);
        let others =
            registry.others_at_location(&LocationId::from("workshop"), &AgentName::from("Ember"));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].name, AgentName::from("River"));
    }

    #[test]
    fn sleep_queries() {
        let registry = registry();
        assert_eq!(registry.awake().len(), 2);
        assert_eq!(registry.sleeping().len(), 1);
        assert!(!registry.all_sleeping());
        assert!(registry.any_awake());
    }

    #[test]
    fn empty_registry_counts_as_all_sleeping() {
        assert!(AgentRegistry::new().all_sleeping());
    }
}
