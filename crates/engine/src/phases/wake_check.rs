use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use hollowbrook_domain::{AgentName, AgentSnapshot, Effect, TimePeriod};

use crate::context::TickContext;
use crate::pipeline::Phase;

/// Checks sleeping agents for wake conditions.
///
/// An agent wakes when the time period has changed since they fell asleep -
/// except that night and evening sleepers sleep through boundary transitions
/// and only wake at morning - or when a visitor arrived at their location in
/// the previous tick.
#[derive(Debug, Default)]
pub struct WakeCheckPhase;

impl WakeCheckPhase {
    fn wake_reason(agent: &AgentSnapshot, ctx: &TickContext) -> Option<String> {
        if Self::time_period_changed(agent, ctx) {
            return Some("time_period_changed".to_string());
        }
        Self::visitor_at(agent, ctx).map(|visitor| format!("visitor_arrived:{visitor}"))
    }

    fn time_period_changed(agent: &AgentSnapshot, ctx: &TickContext) -> bool {
        let Some(sleep_period) = agent.sleep_started_time_period else {
            return false;
        };
        let current = ctx.time.period();
        if matches!(sleep_period, TimePeriod::Night | TimePeriod::Evening) {
            return current == TimePeriod::Morning;
        }
        current != sleep_period
    }

    fn visitor_at<'a>(agent: &AgentSnapshot, ctx: &'a TickContext) -> Option<&'a AgentName> {
        ctx.recent_arrivals.iter().find(|&arrival| {
            arrival != &agent.name
                && ctx
                    .agent(arrival)
                    .is_some_and(|visitor| visitor.location == agent.location)
        })
    }
}

#[async_trait]
impl Phase for WakeCheckPhase {
    fn name(&self) -> &'static str {
        "wake_check"
    }

    async fn run(&self, ctx: TickContext) -> Result<TickContext> {
        let mut effects = Vec::new();
        for agent in ctx.agents.values() {
            if !agent.is_sleeping {
                continue;
            }
            if let Some(reason) = Self::wake_reason(agent, &ctx) {
                debug!(agent = %agent.name, reason = %reason, "waking agent");
                effects.push(Effect::AgentWake {
                    agent: agent.name.clone(),
                    reason: Some(reason),
                });
            }
        }

        if !effects.is_empty() {
            info!(count = effects.len(), tick = ctx.tick, "waking agents");
        }
        Ok(ctx.with_effects(effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::{base_context, sleeping};
    use hollowbrook_domain::LocationId;

    #[tokio::test]
    async fn evening_sleeper_ignores_the_night_transition() {
        // Asleep since evening; it is now night.
        let mut ctx = base_context(22);
        let sage = sleeping(ctx.agents[&AgentName::from("Sage")].clone(), TimePeriod::Evening);
        ctx = ctx.with_updated_agent(sage);

        let ctx = WakeCheckPhase.run(ctx).await.unwrap();
        assert!(ctx.effects.is_empty());
    }

    #[tokio::test]
    async fn night_sleeper_wakes_at_morning() {
        let mut ctx = base_context(7);
        let sage = sleeping(ctx.agents[&AgentName::from("Sage")].clone(), TimePeriod::Night);
        ctx = ctx.with_updated_agent(sage);

        let ctx = WakeCheckPhase.run(ctx).await.unwrap();
        assert_eq!(ctx.effects.len(), 1);
        assert!(matches!(
            &ctx.effects[0],
            Effect::AgentWake { agent, reason: Some(reason) }
                if agent == &AgentName::from("Sage") && reason == "time_period_changed"
        ));
    }

    #[tokio::test]
    async fn afternoon_napper_wakes_when_the_period_turns() {
        // Asleep since morning; it is now afternoon.
        let mut ctx = base_context(13);
        let sage = sleeping(
            ctx.agents[&AgentName::from("Sage")].clone(),
            TimePeriod::Morning,
        );
        ctx = ctx.with_updated_agent(sage);

        let ctx = WakeCheckPhase.run(ctx).await.unwrap();
        assert_eq!(ctx.effects.len(), 1);
    }

    #[tokio::test]
    async fn visitor_arrival_wakes_the_sleeper() {
        // Night sleeper, still night, but Ember just arrived at the library.
        let mut ctx = base_context(23);
        let sage = sleeping(ctx.agents[&AgentName::from("Sage")].clone(), TimePeriod::Night);
        ctx = ctx.with_updated_agent(sage);
        let ember = ctx.agents[&AgentName::from("Ember")]
            .clone()
            .with_location(LocationId::from("library"));
        ctx = ctx.with_updated_agent(ember);
        ctx.recent_arrivals.insert(AgentName::from("Ember"));

        let ctx = WakeCheckPhase.run(ctx).await.unwrap();
        assert_eq!(ctx.effects.len(), 1);
        assert!(matches!(
            &ctx.effects[0],
            Effect::AgentWake { reason: Some(reason), .. }
                if reason == "visitor_arrived:Ember"
        ));
    }

    #[tokio::test]
    async fn sleeper_is_not_their_own_visitor() {
        let mut ctx = base_context(23);
        let sage = sleeping(ctx.agents[&AgentName::from("Sage")].clone(), TimePeriod::Night);
        ctx = ctx.with_updated_agent(sage);
        ctx.recent_arrivals.insert(AgentName::from("Sage"));

        let ctx = WakeCheckPhase.run(ctx).await.unwrap();
        assert!(ctx.effects.is_empty());
    }
}
