use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::context::{TickContext, TickResult};

/// One ordered step of tick execution. A phase consumes the context and
/// returns a new one carrying additional effects and events.
#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: TickContext) -> Result<TickContext>;
}

/// A phase failure, wrapped with the failing phase's name. Raised out of the
/// pipeline before any event is committed, so the tick is abandoned with
/// state intact.
#[derive(Debug, Error)]
#[error("phase '{phase}' failed: {cause}")]
pub struct PhaseError {
    pub phase: &'static str,
    pub cause: anyhow::Error,
}

/// Per-phase timing collected during the last execution.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total: Duration,
    pub per_phase: Vec<(&'static str, Duration)>,
    pub effects_produced: usize,
    pub events_produced: usize,
    pub agents_acted: usize,
}

/// Executes phases in order, timing each, and wraps errors with the phase
/// name.
pub struct TickPipeline {
    phases: Vec<Box<dyn Phase>>,
}

impl TickPipeline {
    pub fn new(phases: Vec<Box<dyn Phase>>) -> Self {
        Self { phases }
    }

    pub async fn execute(
        &self,
        mut ctx: TickContext,
    ) -> Result<(TickResult, PipelineMetrics), PhaseError> {
        let mut metrics = PipelineMetrics::default();
        let started = Instant::now();

        for phase in &self.phases {
            let phase_started = Instant::now();
            debug!(phase = phase.name(), tick = ctx.tick, "phase starting");
            ctx = phase.run(ctx).await.map_err(|cause| PhaseError {
                phase: phase.name(),
                cause,
            })?;
            let elapsed = phase_started.elapsed();
            debug!(
                phase = phase.name(),
                tick = ctx.tick,
                elapsed_ms = elapsed.as_millis() as u64,
                effects = ctx.effects.len(),
                events = ctx.events.len(),
                "phase complete"
            );
            metrics.per_phase.push((phase.name(), elapsed));
        }

        metrics.total = started.elapsed();
        metrics.effects_produced = ctx.effects.len();
        metrics.events_produced = ctx.events.len();
        metrics.agents_acted = ctx.agents_acted.len();

        info!(
            tick = ctx.tick,
            duration_ms = metrics.total.as_millis() as u64,
            agents = metrics.agents_acted,
            events = metrics.events_produced,
            "pipeline complete"
        );

        Ok((TickResult::from_context(ctx), metrics))
    }
}
