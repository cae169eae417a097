//! The ordered phases of a tick: wake check → schedule → agent turns →
//! interpret → apply effects.

mod agent_turn;
mod apply_effects;
mod interpret;
mod schedule;
#[cfg(test)]
pub(crate) mod test_support;
mod wake_check;

pub use agent_turn::AgentTurnPhase;
pub use apply_effects::ApplyEffectsPhase;
pub use interpret::InterpretPhase;
pub use schedule::SchedulePhase;
pub use wake_check::WakeCheckPhase;
