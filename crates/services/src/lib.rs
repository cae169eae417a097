//! Stateful services layered over the domain model: scheduling, conversation
//! lifecycle, agent lookup, village bootstrap, and the filesystem
//! collaborators (shared location files, dreams).
//!
//! Services are query indices and helpers, not sources of truth: they are
//! rebuilt from the event store's snapshot whenever the engine re-hydrates.

mod bootstrap;
mod conversation;
pub mod dreams;
mod registry;
mod scheduler;
pub mod shared_files;

pub use bootstrap::{
    build_agent_snapshots, build_initial_snapshot, build_world_snapshot, default_agents,
    default_locations, ensure_village_structure, AgentSeed,
};
pub use conversation::{mint_conversation_id, ConversationContext, ConversationService};
pub use registry::AgentRegistry;
pub use scheduler::Scheduler;
