use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

use hollowbrook_domain::{DomainEvent, SchedulerState};

use crate::apply::apply_event;
use crate::archive::EventArchive;
use crate::snapshot::{SnapshotStore, VillageSnapshot};

/// A full snapshot is taken every this many ticks; events older than
/// `current_tick - SNAPSHOT_INTERVAL` are moved to cold storage.
pub const SNAPSHOT_INTERVAL: u64 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event store not initialized - call initialize() or recover() first")]
    NotInitialized,
    /// Fatal to the tick: no partial events may be observable.
    #[error("failed to append events to {path:?}: {cause}")]
    Append { path: PathBuf, cause: anyhow::Error },
}

/// Append-only event store with snapshot cache and cold storage.
///
/// This is the primary persistence mechanism; all state changes flow through
/// here as [`DomainEvent`]s.
#[derive(Debug)]
pub struct EventStore {
    event_log: PathBuf,
    snapshots: SnapshotStore,
    archive: EventArchive,
    current: Option<VillageSnapshot>,
    events_since_snapshot: Vec<DomainEvent>,
}

impl EventStore {
    pub fn open(village_root: impl AsRef<Path>) -> Result<Self> {
        let root = village_root.as_ref();
        fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
        Ok(Self {
            event_log: root.join("events.jsonl"),
            snapshots: SnapshotStore::new(root)?,
            archive: EventArchive::new(root)?,
            current: None,
            events_since_snapshot: Vec::new(),
        })
    }

    /// Establish the starting state for a new village and persist it.
    pub fn initialize(&mut self, initial: VillageSnapshot) -> Result<()> {
        self.snapshots.save(&initial)?;
        self.current = Some(initial);
        self.events_since_snapshot.clear();
        Ok(())
    }

    /// Load the latest snapshot and replay newer events from the active log.
    ///
    /// Idempotent: replaying the same snapshot and log always yields the same
    /// state. Returns `None` when no snapshot exists.
    pub fn recover(&mut self) -> Result<Option<VillageSnapshot>> {
        let Some(mut snapshot) = self.snapshots.load_latest()? else {
            return Ok(None);
        };
        let since = snapshot.tick();
        let events = self.load_events_since(since)?;
        debug!(
            snapshot_tick = since,
            replayed = events.len(),
            "recovering from snapshot"
        );

        self.events_since_snapshot.clear();
        for event in events {
            snapshot = apply_event(&snapshot, &event);
            self.events_since_snapshot.push(event);
        }
        self.current = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    pub fn append(&mut self, event: DomainEvent) -> Result<(), StoreError> {
        self.append_all(vec![event])
    }

    /// Atomically durability-write a batch of events, then fold each into the
    /// in-memory snapshot. Either every line reaches disk or the call fails
    /// before any in-memory state changes.
    pub fn append_all(&mut self, events: Vec<DomainEvent>) -> Result<(), StoreError> {
        if self.current.is_none() {
            return Err(StoreError::NotInitialized);
        }
        if events.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for event in &events {
            let line = serde_json::to_string(event).map_err(|err| StoreError::Append {
                path: self.event_log.clone(),
                cause: err.into(),
            })?;
            body.push_str(&line);
            body.push('\n');
        }

        self.write_durably(&body).map_err(|err| StoreError::Append {
            path: self.event_log.clone(),
            cause: err,
        })?;

        let mut snapshot = self.current.take().expect("checked above");
        for event in events {
            snapshot = apply_event(&snapshot, &event);
            self.events_since_snapshot.push(event);
        }
        self.current = Some(snapshot);
        Ok(())
    }

    fn write_durably(&self, body: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.event_log)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        // fsync so the batch survives a crash immediately after append.
        file.sync_all()?;
        Ok(())
    }

    pub fn current_snapshot(&self) -> Result<&VillageSnapshot, StoreError> {
        self.current.as_ref().ok_or(StoreError::NotInitialized)
    }

    /// Events with `tick > since_tick`, from the in-memory buffer.
    pub fn events_since(&self, since_tick: u64) -> Vec<DomainEvent> {
        self.events_since_snapshot
            .iter()
            .filter(|event| event.tick > since_tick)
            .cloned()
            .collect()
    }

    /// Reverse-chronological scan of the active log.
    ///
    /// Returns at most `limit` events, oldest first, optionally filtered by
    /// wire type name and bounded below by `since_tick` (exclusive).
    pub fn recent_events(
        &self,
        limit: usize,
        kinds: Option<&[&str]>,
        since_tick: u64,
    ) -> Result<Vec<DomainEvent>> {
        if limit == 0 || !self.event_log.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.event_log)?;
        let mut events: Vec<DomainEvent> = Vec::new();
        for line in raw.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let event: DomainEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "skipping unparseable event line during scan");
                    continue;
                }
            };
            if event.tick <= since_tick {
                break;
            }
            if let Some(kinds) = kinds {
                if !kinds.contains(&event.kind_name()) {
                    continue;
                }
            }
            events.push(event);
            if events.len() >= limit {
                break;
            }
        }
        events.reverse();
        Ok(events)
    }

    /// Scheduler state is managed by the engine, not by domain events; it is
    /// folded into the snapshot just before persisting.
    pub fn set_scheduler_state(&mut self, state: SchedulerState) {
        if let Some(current) = &self.current {
            self.current = Some(current.with_scheduler_state(state));
        }
    }

    /// Write a full snapshot for the current tick, then move events strictly
    /// older than `current_tick - SNAPSHOT_INTERVAL` into a new archive
    /// segment.
    pub fn create_snapshot_and_archive(&mut self) -> Result<()> {
        let Some(current) = &self.current else {
            return Ok(());
        };
        self.snapshots.save(current)?;

        let cutoff = current.tick().saturating_sub(SNAPSHOT_INTERVAL);
        if cutoff > 0 {
            let archived = self.archive.archive_events_before(cutoff)?;
            if archived > 0 {
                debug!(archived, cutoff, "moved events to cold storage");
            }
        }

        self.events_since_snapshot.clear();
        Ok(())
    }

    pub fn archive(&self) -> &EventArchive {
        &self.archive
    }

    fn load_events_since(&self, since_tick: u64) -> Result<Vec<DomainEvent>> {
        if !self.event_log.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.event_log)?;
        let mut events = Vec::new();
        let mut corrupt = 0usize;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DomainEvent>(line) {
                Ok(event) if event.tick > since_tick => events.push(event),
                Ok(_) => {}
                Err(err) => {
                    corrupt += 1;
                    warn!(error = %err, "corrupt event line skipped during recovery");
                }
            }
        }
        if corrupt > 0 {
            warn!(
                corrupt_lines = corrupt,
                path = %self.event_log.display(),
                "event log recovered with skipped corrupt lines"
            );
        }
        Ok(events)
    }
}
