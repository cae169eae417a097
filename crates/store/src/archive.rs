use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use hollowbrook_domain::DomainEvent;

/// Moves old events out of the active log into cold storage segments named
/// `events_<first_tick>_<last_tick>.jsonl`. The union of active log and
/// archive segments equals the original append sequence.
#[derive(Debug, Clone)]
pub struct EventArchive {
    archive_dir: PathBuf,
    active_log: PathBuf,
}

impl EventArchive {
    pub fn new(village_root: impl AsRef<Path>) -> Result<Self> {
        let root = village_root.as_ref();
        let archive_dir = root.join("archive");
        fs::create_dir_all(&archive_dir)
            .with_context(|| format!("creating {}", archive_dir.display()))?;
        Ok(Self {
            archive_dir,
            active_log: root.join("events.jsonl"),
        })
    }

    /// Move events with `tick < before_tick` from the active log into a new
    /// archive segment. Returns the number of events archived.
    pub fn archive_events_before(&self, before_tick: u64) -> Result<usize> {
        if !self.active_log.exists() {
            return Ok(0);
        }

        let raw = fs::read_to_string(&self.active_log)?;
        let mut keep_lines: Vec<&str> = Vec::new();
        let mut archive_lines: Vec<&str> = Vec::new();
        let mut first_tick: Option<u64> = None;
        let mut last_tick: u64 = 0;

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DomainEvent>(line) {
                Ok(event) if event.tick < before_tick => {
                    first_tick.get_or_insert(event.tick);
                    last_tick = event.tick;
                    archive_lines.push(line);
                }
                Ok(_) => keep_lines.push(line),
                Err(err) => {
                    warn!(error = %err, "unparseable line in active log kept in place");
                    keep_lines.push(line);
                }
            }
        }

        let Some(first_tick) = first_tick else {
            return Ok(0);
        };

        let segment = self
            .archive_dir
            .join(format!("events_{first_tick}_{last_tick}.jsonl"));
        let mut segment_body = archive_lines.join("\n");
        segment_body.push('\n');
        // Append in case a segment with this exact range already exists.
        let existing = fs::read_to_string(&segment).unwrap_or_default();
        fs::write(&segment, format!("{existing}{segment_body}"))
            .with_context(|| format!("writing {}", segment.display()))?;

        let mut active_body = keep_lines.join("\n");
        if !active_body.is_empty() {
            active_body.push('\n');
        }
        fs::write(&self.active_log, active_body)
            .with_context(|| format!("rewriting {}", self.active_log.display()))?;

        Ok(archive_lines.len())
    }

    /// `(first_tick, last_tick)` ranges of all archive segments, ascending.
    pub fn archive_ranges(&self) -> Result<Vec<(u64, u64)>> {
        let mut ranges = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name
                .strip_prefix("events_")
                .and_then(|rest| rest.strip_suffix(".jsonl"))
            else {
                continue;
            };
            let mut parts = stem.splitn(2, '_');
            if let (Some(first), Some(last)) = (
                parts.next().and_then(|p| p.parse::<u64>().ok()),
                parts.next().and_then(|p| p.parse::<u64>().ok()),
            ) {
                ranges.push((first, last));
            }
        }
        ranges.sort_unstable();
        Ok(ranges)
    }

    /// Load archived events whose tick falls within `[start_tick, end_tick]`.
    pub fn load_archived_events(&self, start_tick: u64, end_tick: u64) -> Result<Vec<DomainEvent>> {
        let mut events = Vec::new();
        for (first, last) in self.archive_ranges()? {
            if first > end_tick || last < start_tick {
                continue;
            }
            let path = self.archive_dir.join(format!("events_{first}_{last}.jsonl"));
            let raw = fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: DomainEvent = serde_json::from_str(line)
                    .with_context(|| format!("parsing archived event in {}", path.display()))?;
                if event.tick >= start_tick && event.tick <= end_tick {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hollowbrook_domain::{AgentName, EventKind, LocationId};
    use std::io::Write;

    fn event(tick: u64) -> DomainEvent {
        DomainEvent::new(
            tick,
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            EventKind::AgentAction {
                agent: AgentName::from("Ember"),
                location: LocationId::from("workshop"),
                description: format!("action at tick {tick}"),
            },
        )
    }

    fn write_log(root: &Path, ticks: &[u64]) {
        let mut file = fs::File::create(root.join("events.jsonl")).unwrap();
        for tick in ticks {
            writeln!(file, "{}", serde_json::to_string(&event(*tick)).unwrap()).unwrap();
        }
    }

    #[test]
    fn archives_only_events_before_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[1, 2, 3, 4, 5]);
        let archive = EventArchive::new(dir.path()).unwrap();

        let moved = archive.archive_events_before(4).unwrap();
        assert_eq!(moved, 3);
        assert_eq!(archive.archive_ranges().unwrap(), vec![(1, 3)]);

        let remaining = fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let remaining_ticks: Vec<u64> = remaining
            .lines()
            .map(|line| serde_json::from_str::<DomainEvent>(line).unwrap().tick)
            .collect();
        assert_eq!(remaining_ticks, vec![4, 5]);
    }

    #[test]
    fn archived_events_can_be_loaded_by_range() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[10, 11, 12]);
        let archive = EventArchive::new(dir.path()).unwrap();
        archive.archive_events_before(13).unwrap();

        let loaded = archive.load_archived_events(11, 12).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].tick, 11);
    }

    #[test]
    fn nothing_to_archive_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[8, 9]);
        let archive = EventArchive::new(dir.path()).unwrap();
        assert_eq!(archive.archive_events_before(5).unwrap(), 0);
        assert!(archive.archive_ranges().unwrap().is_empty());
    }
}
