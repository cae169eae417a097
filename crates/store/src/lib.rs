//! Event-sourced persistence: append-only JSONL log, periodic snapshots,
//! cold archive, and deterministic replay.
//!
//! The event store is the single source of truth. All state changes flow
//! through [`EventStore::append_all`], and [`apply::apply_event`] is the only
//! place where events become state.

pub mod apply;
mod archive;
mod event_store;
mod snapshot;

pub use archive::EventArchive;
pub use event_store::{EventStore, StoreError, SNAPSHOT_INTERVAL};
pub use snapshot::{SnapshotStore, VillageSnapshot};
