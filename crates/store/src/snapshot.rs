use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hollowbrook_domain::{
    AgentName, AgentSnapshot, Conversation, ConversationId, Invitation, SchedulerState,
    UnseenConversationEnding, WorldSnapshot,
};

/// Complete village state at a point in time.
///
/// Unknown fields are ignored on read and missing optional fields default, so
/// the schema can grow without invalidating old snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillageSnapshot {
    pub world: WorldSnapshot,
    pub agents: BTreeMap<AgentName, AgentSnapshot>,
    pub conversations: BTreeMap<ConversationId, Conversation>,
    #[serde(default)]
    pub pending_invites: BTreeMap<AgentName, Invitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_state: Option<SchedulerState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unseen_endings: BTreeMap<AgentName, Vec<UnseenConversationEnding>>,
}

impl VillageSnapshot {
    pub fn tick(&self) -> u64 {
        self.world.tick
    }

    pub fn with_scheduler_state(&self, state: SchedulerState) -> Self {
        Self {
            scheduler_state: Some(state),
            ..self.clone()
        }
    }
}

/// Saves and loads village snapshots as `snapshots/state_<tick>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshots_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(village_root: impl AsRef<Path>) -> Result<Self> {
        let snapshots_dir = village_root.as_ref().join("snapshots");
        fs::create_dir_all(&snapshots_dir)
            .with_context(|| format!("creating {}", snapshots_dir.display()))?;
        Ok(Self { snapshots_dir })
    }

    pub fn save(&self, snapshot: &VillageSnapshot) -> Result<PathBuf> {
        let path = self
            .snapshots_dir
            .join(format!("state_{}.json", snapshot.tick()));
        let rendered = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, rendered).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, tick: u64) -> Result<Option<VillageSnapshot>> {
        let path = self.snapshots_dir.join(format!("state_{tick}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn load_latest(&self) -> Result<Option<VillageSnapshot>> {
        match self.latest_tick()? {
            Some(tick) => self.load(tick),
            None => Ok(None),
        }
    }

    pub fn latest_tick(&self) -> Result<Option<u64>> {
        Ok(self.list()?.last().copied())
    }

    /// All available snapshot ticks, ascending.
    pub fn list(&self) -> Result<Vec<u64>> {
        let mut ticks = Vec::new();
        for entry in fs::read_dir(&self.snapshots_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(tick) = name
                .strip_prefix("state_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                ticks.push(tick);
            }
        }
        ticks.sort_unstable();
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hollowbrook_domain::{InterpreterUsage, Weather};

    fn snapshot(tick: u64) -> VillageSnapshot {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        VillageSnapshot {
            world: WorldSnapshot {
                tick,
                world_time: now,
                start_date: now,
                weather: Weather::Clear,
                locations: BTreeMap::new(),
                agent_locations: BTreeMap::new(),
                interpreter_usage: InterpreterUsage::default(),
            },
            agents: BTreeMap::new(),
            conversations: BTreeMap::new(),
            pending_invites: BTreeMap::new(),
            scheduler_state: None,
            unseen_endings: BTreeMap::new(),
        }
    }

    #[test]
    fn save_then_load_latest_finds_highest_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        store.save(&snapshot(0)).unwrap();
        store.save(&snapshot(100)).unwrap();
        store.save(&snapshot(200)).unwrap();

        assert_eq!(store.list().unwrap(), vec![0, 100, 200]);
        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.tick(), 200);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        assert!(store.load(7).unwrap().is_none());
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn snapshot_json_round_trips_with_scheduler_state() {
        let state = SchedulerState::default();
        let original = snapshot(42).with_scheduler_state(state);
        let json = serde_json::to_string(&original).unwrap();
        let back: VillageSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let mut value = serde_json::to_value(snapshot(3)).unwrap();
        value["future_field"] = serde_json::json!({"x": 1});
        let back: VillageSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.tick(), 3);
    }
}
