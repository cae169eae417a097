//! Per-agent dream store: observer-sent dreams land here and become visible
//! to the agent on their next turn.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use hollowbrook_domain::AgentName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamEntry {
    /// First tick at which the dream is visible. Dreams are written with
    /// `tick + 1` so they surface on the agent's next turn, since unseen
    /// filtering compares against `last_active_tick`.
    pub tick: u64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

fn dreams_path(village_root: &Path, agent: &AgentName) -> PathBuf {
    village_root
        .join("agents")
        .join(agent.as_str().to_lowercase())
        .join("dreams")
        .join("dreams.jsonl")
}

pub fn append_dream(
    village_root: impl AsRef<Path>,
    agent: &AgentName,
    content: impl Into<String>,
    tick: u64,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    let path = dreams_path(village_root.as_ref(), agent);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let entry = DreamEntry {
        tick,
        content: content.into(),
        timestamp,
    };
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;
    Ok(())
}

/// Dreams the agent has not yet had a chance to see: entries with
/// `tick > last_active_tick`.
pub fn unseen_dreams(
    village_root: impl AsRef<Path>,
    agent: &AgentName,
    last_active_tick: u64,
) -> Result<Vec<DreamEntry>> {
    let path = dreams_path(village_root.as_ref(), agent);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(&path)?;
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DreamEntry>(line) {
            Ok(entry) if entry.tick > last_active_tick => entries.push(entry),
            Ok(_) => {}
            Err(err) => warn!(error = %err, agent = %agent, "skipping unreadable dream entry"),
        }
    }
    Ok(entries)
}
