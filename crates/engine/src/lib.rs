//! The Hollowbrook simulation engine.
//!
//! An event-sourced tick pipeline: the facade advances simulated time, the
//! scheduler decides who acts, agent turns run against an LLM provider, an
//! interpreter reads observations out of the narratives, and the apply phase
//! translates every accumulated effect into domain events that are committed
//! atomically to the event store.

mod compaction;
mod context;
mod engine;
pub mod observer;
mod pipeline;
pub mod phases;

pub use compaction::CompactionService;
pub use context::{TickContext, TickResult, TurnOutcome};
pub use engine::{EngineControl, VillageEngine};
pub use observer::{ObserverApi, ObserverError};
pub use pipeline::{Phase, PhaseError, PipelineMetrics, TickPipeline};
