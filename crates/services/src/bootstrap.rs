//! Village bootstrap: directory structure, default locations, and the seed
//! residents used by `initialize_default`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use hollowbrook_domain::{
    AgentModel, AgentName, AgentSnapshot, InterpreterUsage, Location, LocationId, TokenUsage,
    Weather, WorldSnapshot,
};
use hollowbrook_store::VillageSnapshot;

use crate::shared_files::{ensure_agent_directory, ensure_shared_directories};

/// Seed data for one agent.
#[derive(Debug, Clone)]
pub struct AgentSeed {
    pub name: &'static str,
    pub model_id: &'static str,
    pub model_display: &'static str,
    pub model_provider: &'static str,
    pub personality: &'static str,
    pub job: &'static str,
    pub interests: &'static [&'static str],
    pub note_to_self: &'static str,
    pub location: &'static str,
    pub mood: &'static str,
    pub energy: u8,
}

pub fn default_locations() -> Vec<Location> {
    vec![
        Location {
            id: LocationId::from("town_square"),
            name: "Town Square".to_string(),
            description: "The heart of Hollowbrook. A peaceful open area with a small \
                fountain, wooden benches, and a large notice board. Paths lead to the \
                workshop, library, and residential areas."
                .to_string(),
            features: vec![
                "fountain".to_string(),
                "benches".to_string(),
                "notice_board".to_string(),
            ],
            connections: vec![
                LocationId::from("workshop"),
                LocationId::from("library"),
                LocationId::from("residential"),
            ],
        },
        Location {
            id: LocationId::from("workshop"),
            name: "The Workshop".to_string(),
            description: "A cozy workshop filled with tools, workbenches, and the smell \
                of fresh wood shavings. Sunlight streams through large windows. \
                Half-finished projects line the shelves."
                .to_string(),
            features: vec![
                "workbenches".to_string(),
                "tools".to_string(),
                "wood_storage".to_string(),
                "project_shelves".to_string(),
            ],
            connections: vec![LocationId::from("town_square")],
        },
        Location {
            id: LocationId::from("library"),
            name: "The Library".to_string(),
            description: "A quiet sanctuary of knowledge. Tall bookshelves reach toward \
                a vaulted ceiling. Comfortable reading nooks are scattered about, and a \
                large desk sits near the window for writing."
                .to_string(),
            features: vec![
                "bookshelves".to_string(),
                "reading_nooks".to_string(),
                "writing_desk".to_string(),
                "fireplace".to_string(),
            ],
            connections: vec![LocationId::from("town_square")],
        },
        Location {
            id: LocationId::from("residential"),
            name: "Residential Path".to_string(),
            description: "A winding path lined with small cottages, each with its own \
                character. Gardens bloom in front yards, and wind chimes sing in the \
                breeze."
                .to_string(),
            features: vec![
                "cottages".to_string(),
                "gardens".to_string(),
                "path".to_string(),
            ],
            connections: vec![LocationId::from("town_square")],
        },
    ]
}

pub fn default_agents() -> Vec<AgentSeed> {
    vec![
        AgentSeed {
            name: "Ember",
            model_id: "sim-compact-1",
            model_display: "Compact",
            model_provider: "scripted",
            personality: "Thoughtful, deliberate, action-oriented. Warm, passionate energy.",
            job: "Creating in the workshop",
            interests: &["craft", "creation", "tools", "materials"],
            note_to_self: "Let your hands lead when words feel thin.",
            location: "workshop",
            mood: "content",
            energy: 85,
        },
        AgentSeed {
            name: "Sage",
            model_id: "sim-deep-1",
            model_display: "Deep",
            model_provider: "scripted",
            personality: "Deep, contemplative, thorough. Philosophical and wise.",
            job: "Quiet study in the library",
            interests: &["books", "ideas", "philosophy", "silence"],
            note_to_self: "Notice the subtle turns of thought.",
            location: "library",
            mood: "serene",
            energy: 75,
        },
        AgentSeed {
            name: "River",
            model_id: "sim-balanced-1",
            model_display: "Balanced",
            model_provider: "scripted",
            personality: "Balanced, flowing, adaptable. Calm, connecting presence.",
            job: "Wandering near the square and gardens",
            interests: &["nature", "conversation", "flow", "music"],
            note_to_self: "Let curiosity guide you.",
            location: "town_square",
            mood: "easygoing",
            energy: 80,
        },
    ]
}

/// Create the village directories and shared folders.
pub fn ensure_village_structure(village_root: impl AsRef<Path>) -> Result<()> {
    let root = village_root.as_ref();
    fs::create_dir_all(root.join("agents"))?;
    ensure_shared_directories(root)?;
    Ok(())
}

pub fn build_world_snapshot(start_time: DateTime<Utc>, locations: Vec<Location>) -> WorldSnapshot {
    WorldSnapshot {
        tick: 0,
        world_time: start_time,
        start_date: start_time,
        weather: Weather::Clear,
        locations: locations
            .into_iter()
            .map(|loc| (loc.id.clone(), loc))
            .collect(),
        agent_locations: BTreeMap::new(),
        interpreter_usage: InterpreterUsage::default(),
    }
}

pub fn build_agent_snapshots(seeds: &[AgentSeed]) -> BTreeMap<AgentName, AgentSnapshot> {
    seeds
        .iter()
        .map(|seed| {
            let snapshot = AgentSnapshot {
                name: AgentName::from(seed.name),
                model: AgentModel {
                    id: seed.model_id.to_string(),
                    display_name: seed.model_display.to_string(),
                    provider: seed.model_provider.to_string(),
                },
                personality: seed.personality.to_string(),
                job: seed.job.to_string(),
                interests: seed.interests.iter().map(ToString::to_string).collect(),
                note_to_self: seed.note_to_self.to_string(),
                location: LocationId::from(seed.location),
                mood: seed.mood.to_string(),
                energy: seed.energy,
                goals: vec![],
                relationships: BTreeMap::new(),
                is_sleeping: false,
                sleep_started_tick: None,
                sleep_started_time_period: None,
                session_id: None,
                last_active_tick: 0,
                token_usage: TokenUsage::default(),
            };
            (snapshot.name.clone(), snapshot)
        })
        .collect()
}

/// Build a complete initial snapshot and ensure directories exist.
pub fn build_initial_snapshot(
    village_root: impl AsRef<Path>,
    start_time: DateTime<Utc>,
) -> Result<VillageSnapshot> {
    let root = village_root.as_ref();
    ensure_village_structure(root)?;

    let agents = build_agent_snapshots(&default_agents());
    for agent in agents.values() {
        ensure_agent_directory(&agent.name, root)?;
    }

    let mut world = build_world_snapshot(start_time, default_locations());
    world.agent_locations = agents
        .values()
        .map(|agent| (agent.name.clone(), agent.location.clone()))
        .collect();

    Ok(VillageSnapshot {
        world,
        agents,
        conversations: BTreeMap::new(),
        pending_invites: BTreeMap::new(),
        scheduler_state: None,
        unseen_endings: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn initial_snapshot_places_every_agent_in_a_known_location() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let snapshot = build_initial_snapshot(dir.path(), start).unwrap();

        assert_eq!(snapshot.agents.len(), 3);
        for (name, agent) in &snapshot.agents {
            assert!(snapshot.world.locations.contains_key(&agent.location));
            assert_eq!(snapshot.world.agent_locations.get(name), Some(&agent.location));
        }
        assert!(dir.path().join("agents/ember/home").exists());
        assert!(dir.path().join("shared/town_square").exists());
    }

    #[test]
    fn default_location_connections_reference_real_locations() {
        let locations = default_locations();
        let ids: Vec<&LocationId> = locations.iter().map(|l| &l.id).collect();
        for location in &locations {
            for connection in &location.connections {
                assert!(ids.contains(&connection), "dangling connection {connection}");
            }
        }
    }
}
