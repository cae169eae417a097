//! The observer surface: read-only display snapshots plus the command verbs
//! a human can use to nudge the village without corrupting its invariants.

mod api;
mod snapshots;

pub use api::{ObserverApi, ObserverError};
pub use snapshots::{
    AgentDisplaySnapshot, ConversationDisplaySnapshot, InviteDisplaySnapshot,
    ScheduleDisplaySnapshot, ScheduledEventDisplay, TimeDisplaySnapshot, VillageDisplaySnapshot,
};
