use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use tracing::{debug, error, info, warn};

use hollowbrook_config::EngineConfig;
use hollowbrook_domain::{
    AgentName, AgentSnapshot, Conversation, ConversationId, DomainEvent, Effect, EventKind,
    Invitation, TimeSnapshot, UnseenConversationEnding, WorldSnapshot,
};
use hollowbrook_llm::{Compactor, Interpreter, LlmProvider};
use hollowbrook_services::{
    build_initial_snapshot, dreams, AgentRegistry, ConversationService, Scheduler,
};
use hollowbrook_store::{EventStore, VillageSnapshot};

use crate::compaction::CompactionService;
use crate::context::{TickContext, TickResult};
use crate::phases::{
    AgentTurnPhase, ApplyEffectsPhase, InterpretPhase, SchedulePhase, WakeCheckPhase,
};
use crate::pipeline::TickPipeline;

/// Shared run-loop control: pause and stop requests are checked between
/// ticks, never mid-tick.
#[derive(Clone, Default)]
pub struct EngineControl {
    stop: Arc<AtomicBool>,
    pause_requested: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl EngineControl {
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

type TickCallback = Box<dyn Fn(&TickResult) + Send + Sync>;
type EventCallback = Box<dyn Fn(&DomainEvent) + Send + Sync>;

/// The simulation facade.
///
/// Owns the event store, the scheduler and services, and the tick pipeline;
/// exclusively holds the mutable in-memory state and re-hydrates it from the
/// store after every commit. Everything else sees immutable snapshots.
pub struct VillageEngine {
    village_root: PathBuf,
    config: EngineConfig,
    store: EventStore,
    scheduler: Arc<Mutex<Scheduler>>,
    conversation_service: ConversationService,
    agent_registry: AgentRegistry,
    provider: Arc<dyn LlmProvider>,
    compaction: Arc<CompactionService>,
    pipeline: TickPipeline,
    control: EngineControl,

    tick: u64,
    time: Option<TimeSnapshot>,
    world: Option<WorldSnapshot>,
    agents: BTreeMap<AgentName, AgentSnapshot>,
    conversations: BTreeMap<ConversationId, Conversation>,
    pending_invites: BTreeMap<AgentName, Invitation>,
    unseen_endings: BTreeMap<AgentName, Vec<UnseenConversationEnding>>,
    recent_arrivals: BTreeSet<AgentName>,

    tick_callbacks: Vec<TickCallback>,
    event_callbacks: Vec<EventCallback>,
}

impl VillageEngine {
    pub fn new(
        village_root: impl Into<PathBuf>,
        config: EngineConfig,
        provider: Arc<dyn LlmProvider>,
        compactor: Arc<dyn Compactor>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Result<Self> {
        let village_root = village_root.into();
        info!(root = %village_root.display(), "initializing engine");

        let store = EventStore::open(&village_root)?;
        let scheduler = Arc::new(Mutex::new(Scheduler::new()));
        let compaction = Arc::new(CompactionService::new(compactor, Arc::clone(&provider)));

        let pipeline = TickPipeline::new(vec![
            Box::new(WakeCheckPhase),
            Box::new(SchedulePhase::new(Arc::clone(&scheduler))),
            Box::new(
                AgentTurnPhase::new(Arc::clone(&provider), &village_root).with_thresholds(
                    config.compaction.pre_sleep_tokens,
                    config.compaction.critical_tokens,
                ),
            ),
            Box::new(InterpretPhase::new(interpreter)),
            Box::new(ApplyEffectsPhase::with_compaction(Arc::clone(&compaction))),
        ]);

        Ok(Self {
            village_root,
            config,
            store,
            scheduler,
            conversation_service: ConversationService::new(),
            agent_registry: AgentRegistry::new(),
            provider,
            compaction,
            pipeline,
            control: EngineControl::default(),
            tick: 0,
            time: None,
            world: None,
            agents: BTreeMap::new(),
            conversations: BTreeMap::new(),
            pending_invites: BTreeMap::new(),
            unseen_endings: BTreeMap::new(),
            recent_arrivals: BTreeSet::new(),
            tick_callbacks: Vec::new(),
            event_callbacks: Vec::new(),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn village_root(&self) -> &PathBuf {
        &self.village_root
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn time(&self) -> Result<&TimeSnapshot> {
        self.time
            .as_ref()
            .context("engine not initialized - call recover() or initialize()")
    }

    pub fn world(&self) -> Result<&WorldSnapshot> {
        self.world
            .as_ref()
            .context("engine not initialized - call recover() or initialize()")
    }

    pub fn agents(&self) -> &BTreeMap<AgentName, AgentSnapshot> {
        &self.agents
    }

    pub fn conversations(&self) -> &BTreeMap<ConversationId, Conversation> {
        &self.conversations
    }

    pub fn pending_invites(&self) -> &BTreeMap<AgentName, Invitation> {
        &self.pending_invites
    }

    pub fn unseen_endings(&self) -> &BTreeMap<AgentName, Vec<UnseenConversationEnding>> {
        &self.unseen_endings
    }

    pub fn conversation_service(&self) -> &ConversationService {
        &self.conversation_service
    }

    pub fn agent_registry(&self) -> &AgentRegistry {
        &self.agent_registry
    }

    pub fn compaction_service(&self) -> &Arc<CompactionService> {
        &self.compaction
    }

    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    pub fn recent_events(
        &self,
        limit: usize,
        kinds: Option<&[&str]>,
        since_tick: u64,
    ) -> Result<Vec<DomainEvent>> {
        self.store.recent_events(limit, kinds, since_tick)
    }

    // ── Scheduler modifiers (observer surface) ───────────────────────────────

    pub fn force_next_turn(&self, agent: AgentName) {
        self.scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .force_next_turn(agent);
    }

    pub fn skip_turns(&self, agent: AgentName, count: u32) {
        self.scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .skip_turns(agent, count);
    }

    pub fn clear_forced_next(&self) {
        self.scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .clear_forced_next();
    }

    pub fn scheduler_state(&self) -> hollowbrook_domain::SchedulerState {
        self.scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .to_state()
    }

    // ── Initialization and recovery ──────────────────────────────────────────

    /// Initialize a fresh village from the given snapshot and record the
    /// founding event.
    pub fn initialize(&mut self, initial: VillageSnapshot) -> Result<()> {
        info!("initializing fresh village state");
        self.store.initialize(initial)?;
        let snapshot = self.store.current_snapshot()?.clone();
        self.hydrate(snapshot, true);

        let residents: Vec<AgentName> = self.agents.keys().cloned().collect();
        let founding = DomainEvent::new(
            0,
            self.time()?.world_time,
            EventKind::WorldEvent {
                description: format!(
                    "Hollowbrook has been founded! {} residents begin their new lives.",
                    residents.len()
                ),
                location: None,
                agents_involved: residents,
            },
        );
        self.commit_event(founding)?;
        info!(agents = self.agents.len(), "village founded");
        Ok(())
    }

    /// Initialize a new village with the built-in locations and residents.
    pub fn initialize_default(&mut self) -> Result<()> {
        let snapshot = build_initial_snapshot(&self.village_root, Utc::now())?;
        self.initialize(snapshot)
    }

    /// Recover state from persisted snapshots and events. Returns false when
    /// there is nothing to recover.
    pub fn recover(&mut self) -> Result<bool> {
        info!("attempting recovery from persisted state");
        let Some(snapshot) = self.store.recover()? else {
            warn!("no persisted state found");
            return Ok(false);
        };
        self.hydrate(snapshot, true);
        info!(tick = self.tick, "recovered");
        Ok(true)
    }

    /// Hydrate in-memory state and services from a snapshot. Scheduler state
    /// loads only during recovery so observer modifiers survive normal ticks.
    fn hydrate(&mut self, snapshot: VillageSnapshot, include_scheduler: bool) {
        self.tick = snapshot.world.tick;
        self.time = Some(TimeSnapshot::new(
            snapshot.world.world_time,
            snapshot.world.tick,
            snapshot.world.start_date,
        ));
        self.agents = snapshot.agents;
        self.conversations = snapshot.conversations;
        self.pending_invites = snapshot.pending_invites;
        self.unseen_endings = snapshot.unseen_endings;
        self.world = Some(snapshot.world);

        self.agent_registry.load_state(self.agents.clone());
        self.conversation_service
            .load_state(self.conversations.clone(), self.pending_invites.clone());

        if include_scheduler {
            if let Some(state) = snapshot.scheduler_state {
                self.scheduler
                    .lock()
                    .expect("scheduler lock poisoned")
                    .load_state(state);
            }
        }

        self.provider.restore_token_counts(&self.agents);
        debug!(
            tick = self.tick,
            agents = self.agents.len(),
            conversations = self.conversations.len(),
            "hydrated state"
        );
    }

    // ── Tick execution ───────────────────────────────────────────────────────

    /// Execute a single tick. On a phase error the tick is abandoned with no
    /// state change; on an append failure the error is fatal to the tick.
    pub async fn tick_once(&mut self) -> Result<TickResult> {
        let world = self
            .world
            .clone()
            .context("engine not initialized - call recover() or initialize()")?;
        let time = self.time.clone().expect("time set whenever world is");

        self.ensure_schedule();

        let mut due_time = self.compute_next_tick_time(&time);

        // Night skip: everyone asleep outside morning jumps the clock to
        // 06:00 and stages the event at the head of the tick's log entries.
        let mut night_skip = None;
        if self.should_skip_night(&time) {
            let morning = Self::next_morning(time.world_time);
            if morning > due_time {
                info!(to = %morning, "all agents sleeping, skipping night");
                night_skip = Some(DomainEvent::new(
                    self.tick + 1,
                    morning,
                    EventKind::NightSkipped {
                        from_time: time.world_time,
                        to_time: morning,
                    },
                ));
                due_time = morning;
            }
        }

        self.tick += 1;
        let time = TimeSnapshot::new(due_time, self.tick, world.start_date);
        self.time = Some(time.clone());

        let scheduled_events = self
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .pop_events_up_to(due_time);

        let recent_events = self.store.recent_events(30, None, 0).unwrap_or_default();

        let ctx = TickContext {
            tick: self.tick,
            timestamp: due_time,
            time,
            world,
            agents: self.agents.clone(),
            conversations: self.conversations.clone(),
            pending_invites: self.pending_invites.clone(),
            unseen_endings: self.unseen_endings.clone(),
            scheduled_events,
            recent_arrivals: self.recent_arrivals.clone(),
            recent_events,
            effects: Vec::new(),
            events: Vec::new(),
            turn_outcomes: BTreeMap::new(),
            agents_to_act: BTreeSet::new(),
            agents_acted: BTreeSet::new(),
        };

        debug!(
            tick = self.tick,
            scheduled = ctx.scheduled_events.len(),
            "starting tick"
        );

        let (mut result, _metrics) = self
            .pipeline
            .execute(ctx)
            .await
            .map_err(anyhow::Error::from)?;

        if let Some(night_skip) = night_skip {
            result.events.insert(0, night_skip);
        }

        if !result.events.is_empty() {
            self.store.append_all(result.events.clone())?;
        }

        let snapshot = self.store.current_snapshot()?.clone();
        self.hydrate(snapshot, false);

        if self.tick > 0 && self.tick % self.config.pacing.snapshot_interval == 0 {
            let state = self.scheduler_state();
            self.store.set_scheduler_state(state);
            if let Err(err) = self.store.create_snapshot_and_archive() {
                // Snapshot failure must not stop the simulation.
                error!(error = %err, tick = self.tick, "failed to create snapshot");
            } else {
                info!(tick = self.tick, "created snapshot");
            }
        }

        self.recent_arrivals = result
            .events
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::AgentMoved { agent, .. } => Some(agent.clone()),
                _ => None,
            })
            .collect();

        {
            let mut scheduler = self.scheduler.lock().expect("scheduler lock poisoned");
            for agent in &result.agents_acted {
                if let Some(snapshot) = self.agents.get(agent) {
                    scheduler.record_turn(agent, &snapshot.location);
                }
            }
        }

        self.fire_tick_callbacks(&result);
        for event in &result.events {
            self.fire_event_callbacks(event);
        }

        // Re-seed so the schedule reflects who acts on the NEXT tick.
        self.ensure_schedule();

        info!(
            tick = self.tick,
            events = result.events.len(),
            agents_acted = result.agents_acted.len(),
            "tick complete"
        );
        Ok(result)
    }

    fn compute_next_tick_time(&self, time: &TimeSnapshot) -> DateTime<Utc> {
        let earliest = self
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .earliest_due_time();
        earliest.unwrap_or_else(|| {
            time.world_time + ChronoDuration::minutes(self.config.pacing.solo_pace_minutes)
        })
    }

    fn should_skip_night(&self, time: &TimeSnapshot) -> bool {
        !self.agents.is_empty()
            && self.agents.values().all(|agent| agent.is_sleeping)
            && time.period() != hollowbrook_domain::TimePeriod::Morning
    }

    fn next_morning(current: DateTime<Utc>) -> DateTime<Utc> {
        let today_morning = Utc
            .from_utc_datetime(&current.date_naive().and_hms_opt(6, 0, 0).expect("valid time"));
        if current.hour() < 6 {
            today_morning
        } else {
            today_morning + ChronoDuration::days(1)
        }
    }

    /// Seed the scheduler with whatever the current state says should happen:
    /// invite response windows, conversation turns, and solo turns for awake,
    /// unengaged agents.
    fn ensure_schedule(&self) {
        let Some(time) = &self.time else { return };
        let now = time.world_time;
        let pacing = &self.config.pacing;
        let mut scheduler = self.scheduler.lock().expect("scheduler lock poisoned");

        for (invitee, invite) in &self.pending_invites {
            if !scheduler.has_pending_invite_response(invitee) {
                scheduler.schedule_invite_response(
                    invitee,
                    &invite.location,
                    now + ChronoDuration::minutes(pacing.invite_response_minutes),
                );
            }
        }

        for (conv_id, conv) in &self.conversations {
            if !scheduler.has_pending_conversation_turn(conv_id) {
                scheduler.schedule_conversation_turn(
                    conv_id,
                    &conv.location,
                    now + ChronoDuration::minutes(pacing.conversation_pace_minutes),
                );
            }
        }

        let participants: BTreeSet<&AgentName> = self
            .conversations
            .values()
            .flat_map(|conv| conv.participants.iter())
            .collect();

        for agent in self.agents.values() {
            if agent.is_sleeping
                || participants.contains(&agent.name)
                || self.pending_invites.contains_key(&agent.name)
            {
                continue;
            }
            if !scheduler.has_pending_agent_turn(&agent.name) {
                scheduler.schedule_agent_turn(
                    &agent.name,
                    &agent.location,
                    now + ChronoDuration::minutes(pacing.solo_pace_minutes),
                );
            }
        }
    }

    // ── Run loop ─────────────────────────────────────────────────────────────

    /// Run the simulation loop until stopped, paused indefinitely, or
    /// `max_ticks` ticks have run.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<()> {
        info!(?max_ticks, "starting simulation loop");
        let control = self.control.clone();
        let mut ticks_run = 0u64;

        loop {
            if control.is_stop_requested() {
                break;
            }
            if control.is_paused() {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            self.tick_once().await?;
            ticks_run += 1;

            if control.pause_requested.swap(false, Ordering::SeqCst) {
                control.paused.store(true, Ordering::SeqCst);
                info!("simulation paused");
            }

            if let Some(max) = max_ticks {
                if ticks_run >= max {
                    info!(max, "reached max ticks");
                    break;
                }
            }
        }

        info!(ticks_run, "simulation loop ended");
        Ok(())
    }

    /// Graceful shutdown: stop the loop and disconnect all agent sessions.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("shutting down engine");
        self.control.stop();
        self.provider.disconnect_all().await?;
        Ok(())
    }

    // ── Callbacks ────────────────────────────────────────────────────────────

    pub fn on_tick(&mut self, callback: impl Fn(&TickResult) + Send + Sync + 'static) {
        self.tick_callbacks.push(Box::new(callback));
    }

    pub fn on_event(&mut self, callback: impl Fn(&DomainEvent) + Send + Sync + 'static) {
        self.event_callbacks.push(Box::new(callback));
    }

    fn fire_tick_callbacks(&self, result: &TickResult) {
        for callback in &self.tick_callbacks {
            if let Err(err) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(result)))
            {
                error!(?err, "tick callback panicked");
            }
        }
    }

    fn fire_event_callbacks(&self, event: &DomainEvent) {
        for callback in &self.event_callbacks {
            if let Err(err) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)))
            {
                error!(?err, "event callback panicked");
            }
        }
    }

    // ── State mutation for the observer surface ──────────────────────────────

    /// Commit a single event directly, bypassing the pipeline.
    pub fn commit_event(&mut self, event: DomainEvent) -> Result<()> {
        self.store.append(event.clone())?;
        let snapshot = self.store.current_snapshot()?.clone();
        self.hydrate(snapshot, false);
        self.fire_event_callbacks(&event);
        Ok(())
    }

    /// Apply a single effect outside the pipeline: translate it with a
    /// minimal context, then commit the resulting events.
    pub fn apply_effect(&mut self, effect: Effect) -> Result<()> {
        let world = self
            .world
            .clone()
            .context("engine not initialized - call recover() or initialize()")?;
        let time = self.time.clone().expect("time set whenever world is");

        let ctx = TickContext {
            tick: self.tick,
            timestamp: time.world_time,
            time,
            world,
            agents: self.agents.clone(),
            conversations: self.conversations.clone(),
            pending_invites: self.pending_invites.clone(),
            unseen_endings: self.unseen_endings.clone(),
            scheduled_events: Vec::new(),
            recent_arrivals: BTreeSet::new(),
            recent_events: Vec::new(),
            effects: vec![effect],
            events: Vec::new(),
            turn_outcomes: BTreeMap::new(),
            agents_to_act: BTreeSet::new(),
            agents_acted: BTreeSet::new(),
        };

        let ctx = ApplyEffectsPhase::new().execute_sync(ctx);
        if ctx.events.is_empty() {
            return Ok(());
        }
        self.store.append_all(ctx.events.clone())?;
        let snapshot = self.store.current_snapshot()?.clone();
        self.hydrate(snapshot, false);
        for event in &ctx.events {
            self.fire_event_callbacks(event);
        }
        Ok(())
    }

    /// End a conversation on the observer's behalf. Returns the ended
    /// conversation's final participants, or `None` if it does not exist.
    pub fn end_conversation(
        &mut self,
        conversation_id: &ConversationId,
        reason: &str,
    ) -> Result<Option<Vec<AgentName>>> {
        let Some(conv) = self.conversations.get(conversation_id) else {
            return Ok(None);
        };
        let participants: Vec<AgentName> = conv.participants.iter().cloned().collect();
        self.apply_effect(Effect::EndConversation {
            conversation_id: conversation_id.clone(),
            reason: reason.to_string(),
        })?;
        Ok(Some(participants))
    }

    /// Append to the agent's daily journal. A filesystem write, not an event.
    pub fn write_to_agent_journal(&self, agent: &AgentName, content: &str) -> Result<()> {
        let journal_dir = self
            .village_root
            .join("agents")
            .join(agent.as_str().to_lowercase())
            .join("journal");
        fs::create_dir_all(&journal_dir)?;

        let world_time = self.time.as_ref().map(|t| t.world_time).unwrap_or_else(Utc::now);
        let path = journal_dir.join(format!("{}.md", world_time.format("%Y-%m-%d")));
        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        existing.push_str("\n\n");
        existing.push_str(content);
        fs::write(&path, existing)?;
        debug!(agent = %agent, "wrote journal entry");
        Ok(())
    }

    /// Write a dream the agent will see on their next turn.
    pub fn write_to_agent_dreams(&self, agent: &AgentName, content: &str) -> Result<()> {
        if !self.agents.contains_key(agent) {
            bail!("unknown agent {agent}");
        }
        let world_time = self.time.as_ref().map(|t| t.world_time).unwrap_or_else(Utc::now);
        // tick + 1 so the dream is unseen relative to the agent's last turn.
        dreams::append_dream(&self.village_root, agent, content, self.tick + 1, world_time)?;
        debug!(agent = %agent, visible_at = self.tick + 1, "wrote dream");
        Ok(())
    }
}
