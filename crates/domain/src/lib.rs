//! Immutable domain model for the Hollowbrook simulation.
//!
//! Every type here is a value: state transitions are expressed by building a
//! new value with the changed fields replaced, never by mutation in place.
//! The event store's applier and the tick pipeline both rely on that.

pub mod agent;
pub mod conversation;
pub mod effects;
pub mod events;
pub mod ids;
pub mod schedule;
pub mod time;
pub mod world;

pub use agent::{AgentModel, AgentSnapshot, TokenUsage};
pub use conversation::{
    Conversation, ConversationTurn, Invitation, Privacy, UnseenConversationEnding,
    INVITE_EXPIRY_TICKS,
};
pub use effects::Effect;
pub use events::{DomainEvent, EventKind};
pub use ids::{AgentName, ConversationId, LocationId};
pub use schedule::{
    ScheduledEvent, ScheduledKind, SchedulerState, PRIORITY_AGENT_TURN,
    PRIORITY_CONVERSATION_TURN, PRIORITY_INVITE_RESPONSE,
};
pub use time::{TimePeriod, TimeSnapshot};
pub use world::{InterpreterUsage, Location, Weather, WorldSnapshot};
