use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VillageConfig {
    /// Root directory holding events.jsonl, snapshots/, archive/, agents/.
    pub root: String,
    pub name: String,
}

impl Default for VillageConfig {
    fn default() -> Self {
        Self {
            root: "village".to_string(),
            name: "Hollowbrook".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Minutes of simulated time between solo turns.
    pub solo_pace_minutes: i64,
    /// Minutes of simulated time between conversation turns.
    pub conversation_pace_minutes: i64,
    /// Minutes an invitee gets before their response window comes due.
    pub invite_response_minutes: i64,
    /// Full snapshot every N ticks.
    pub snapshot_interval: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            solo_pace_minutes: 120,
            conversation_pace_minutes: 5,
            invite_response_minutes: 5,
            snapshot_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Opportunistic compaction threshold: compact only if the agent also
    /// goes to sleep this tick.
    pub pre_sleep_tokens: u64,
    /// Hard threshold: always compact.
    pub critical_tokens: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            pre_sleep_tokens: 100_000,
            critical_tokens: 150_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub village: VillageConfig,
    pub pacing: PacingConfig,
    pub compaction: CompactionConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("HOLLOWBROOK_ROOT") {
            if !value.is_empty() {
                config.village.root = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.pacing.solo_pace_minutes, 120);
        assert_eq!(config.pacing.conversation_pace_minutes, 5);
        assert_eq!(config.pacing.invite_response_minutes, 5);
        assert_eq!(config.pacing.snapshot_interval, 100);
        assert_eq!(config.compaction.pre_sleep_tokens, 100_000);
        assert_eq!(config.compaction.critical_tokens, 150_000);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hollowbrook.toml");
        fs::write(&path, "[village]\nroot = \"/tmp/v\"\n").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.village.root, "/tmp/v");
        assert_eq!(config.pacing.solo_pace_minutes, 120);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hollowbrook.toml");

        let mut config = EngineConfig::default();
        config.telemetry.log_level = "debug".to_string();
        config.save_to(&path).unwrap();

        let back = EngineConfig::load_from(&path).unwrap();
        assert_eq!(back.telemetry.log_level, "debug");
    }
}
