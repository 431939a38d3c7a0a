//! Hauling system - turns construction needs into haul tasks and assigns
//! them to agents.
//!
//! Each [`WorkAllocator::update`] runs a fixed sequence:
//! 1. scan construction needs, if the scan interval has elapsed, first
//!    withdrawing tasks whose need has gone away;
//! 2. advance every active task using its agent's live position;
//! 3. purge terminal tasks older than the retention window.
//!
//! The allocator is the only writer of stockpile reservations. A
//! reservation is taken when a task is assigned and ends exactly once:
//! consumed at pickup, or released when the task fails or is cancelled
//! before pickup.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use haulsim_logic::cell::Cell;
use haulsim_logic::config::HaulingConfig;
use haulsim_logic::haul::{
    CancelReason, HaulTask, TaskContext, TaskEvent, TaskPriority, TaskStatus,
};
use haulsim_logic::ids::{AgentId, BlockKey, SiteId, TaskId};
use haulsim_logic::providers::{
    AgentLocator, ConstructionProvider, HaulDestination, StockpileProvider,
};

/// Collaborators needed by [`WorkAllocator::update`].
pub struct WorkContext<'a> {
    pub construction: &'a mut dyn ConstructionProvider,
    pub stockpiles: &'a mut dyn StockpileProvider,
    pub agents: &'a dyn AgentLocator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaulStats {
    pub created: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub reservation_failures: u64,
    pub agents_lost: u64,
    /// Cancelled before pickup because the need went away.
    pub withdrawn: u64,
    pub leaked_reservations: u64,
    pub quantity_delivered: u64,
    pub purged: u64,
    /// Filled in by [`WorkAllocator::stats`].
    pub pending: usize,
    /// Filled in by [`WorkAllocator::stats`].
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    #[error("{0} appears more than once")]
    DuplicateTask(TaskId),
    #[error("queued {0} is missing or not pending")]
    QueueEntryNotPending(TaskId),
    #[error("pending {0} is not in the queue")]
    PendingNotQueued(TaskId),
    #[error("{agent} is mapped to {task}, which is not active for that agent")]
    AssignmentMismatch { agent: AgentId, task: TaskId },
    #[error("{0} is mapped to more than one task")]
    DuplicateAgent(AgentId),
    #[error("active {0} has no agent mapping")]
    UnmappedActiveTask(TaskId),
    #[error("next id {next} would reuse existing {existing}")]
    StaleIdCounter { next: u64, existing: TaskId },
}

/// Everything needed to resume allocation after a load. Finished tasks
/// are kept so they are purged on the same tick as before the save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaulingSnapshot {
    pub now_ms: u64,
    pub last_scan_ms: Option<u64>,
    pub next_id: u64,
    pub tasks: Vec<HaulTask>,
    pub queue: Vec<TaskId>,
    pub assignments: Vec<(AgentId, TaskId)>,
    pub stats: HaulStats,
}

pub struct WorkAllocator {
    config: HaulingConfig,
    tasks: BTreeMap<TaskId, HaulTask>,
    /// Pending task ids in creation order.
    queue: VecDeque<TaskId>,
    agent_tasks: BTreeMap<AgentId, TaskId>,
    next_id: u64,
    now_ms: u64,
    last_scan_ms: Option<u64>,
    stats: HaulStats,
    events: Vec<TaskEvent>,
}

impl WorkAllocator {
    pub fn new(config: HaulingConfig) -> Self {
        Self {
            config,
            tasks: BTreeMap::new(),
            queue: VecDeque::new(),
            agent_tasks: BTreeMap::new(),
            next_id: 1,
            now_ms: 0,
            last_scan_ms: None,
            stats: HaulStats::default(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &HaulingConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    // ── Task creation ──────────────────────────────────────────────────

    /// Remaining quantity per (site, block, resource) across open sites.
    fn live_needs(construction: &dyn ConstructionProvider) -> HashMap<(SiteId, BlockKey, u8), u32> {
        let mut needs = HashMap::new();
        for site in construction.active_sites() {
            for need in construction.material_needs(site.site_id) {
                if need.quantity > 0 {
                    needs.insert((site.site_id, need.block, need.resource), need.quantity);
                }
            }
        }
        needs
    }

    /// Ids of tasks in `candidates` that would haul more than is still needed.
    fn stale_tasks(
        &self,
        needs: &HashMap<(SiteId, BlockKey, u8), u32>,
        candidates: impl Iterator<Item = TaskId>,
    ) -> Vec<TaskId> {
        candidates
            .filter(|id| {
                self.tasks.get(id).is_some_and(|t| {
                    let key = (t.destination.site_id, t.destination.block, t.resource);
                    needs.get(&key).map_or(true, |&remaining| remaining < t.quantity)
                })
            })
            .collect()
    }

    fn withdraw(&mut self, id: TaskId, stockpiles: Option<&mut dyn StockpileProvider>) {
        let now = self.now_ms;
        let Some(event) = self
            .tasks
            .get_mut(&id)
            .and_then(|t| t.cancel(CancelReason::NeedWithdrawn, now))
        else {
            return;
        };
        self.queue.retain(|queued| *queued != id);
        debug!("withdrew {id}: need no longer open");
        match stockpiles {
            Some(stockpiles) => self.record(event, stockpiles),
            None => self.finish(event),
        }
    }

    /// Cancel active tasks whose need closed while the agent was still
    /// walking to the source, releasing their reservations. A need that
    /// only shrank is left alone; pickup takes no more than remains.
    /// Tasks already carrying stock are left to deliver or fail.
    fn withdraw_unpicked(
        &mut self,
        construction: &dyn ConstructionProvider,
        stockpiles: &mut dyn StockpileProvider,
    ) -> usize {
        let needs = Self::live_needs(construction);
        let stale: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status() == TaskStatus::Active && !t.is_carrying())
            .filter(|t| {
                !needs.contains_key(&(t.destination.site_id, t.destination.block, t.resource))
            })
            .map(|t| t.id)
            .collect();
        for &id in &stale {
            self.withdraw(id, Some(&mut *stockpiles));
        }
        stale.len()
    }

    /// Create pending tasks for construction needs nobody is working on.
    /// Returns how many were created.
    ///
    /// Pending tasks whose need has closed or shrunk below the task's
    /// quantity are cancelled first, so they can never be assigned.
    pub fn scan_for_needs(
        &mut self,
        construction: &dyn ConstructionProvider,
        stockpiles: &dyn StockpileProvider,
    ) -> usize {
        let needs = Self::live_needs(construction);
        let stale = self.stale_tasks(&needs, self.queue.iter().copied());
        for id in stale {
            self.withdraw(id, None);
        }

        let mut covered: HashSet<(SiteId, BlockKey, u8)> = self
            .tasks
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| (t.destination.site_id, t.destination.block, t.resource))
            .collect();

        let mut sites = construction.active_sites();
        sites.sort_by_key(|s| s.site_id);

        let mut created = 0;
        let mut unsourced = 0;
        'sites: for site in sites {
            let priority = TaskPriority::from_site_priority(site.priority);
            for need in construction.material_needs(site.site_id) {
                if need.quantity == 0 {
                    continue;
                }
                let key = (site.site_id, need.block, need.resource);
                if covered.contains(&key) {
                    continue;
                }
                if self.queue.len() >= self.config.max_pending_tasks {
                    debug!(
                        "pending queue full ({}), deferring remaining needs",
                        self.queue.len()
                    );
                    break 'sites;
                }

                let quantity = need.quantity.min(self.config.max_haul_quantity);
                let Some(source) =
                    stockpiles.find_nearest_resource(need.resource, need.position, quantity)
                else {
                    unsourced += 1;
                    continue;
                };

                let id = TaskId(self.next_id);
                self.next_id += 1;
                let task = HaulTask::new(
                    id,
                    need.resource,
                    quantity,
                    source,
                    HaulDestination {
                        site_id: site.site_id,
                        block: need.block,
                        position: need.position,
                    },
                    priority,
                    self.now_ms,
                );
                info!(
                    "created {id}: {quantity}x resource {} from {} to {} ({:?})",
                    need.resource, source.stockpile_id, site.site_id, priority
                );
                self.tasks.insert(id, task);
                self.queue.push_back(id);
                covered.insert(key);
                self.stats.created += 1;
                created += 1;
            }
        }

        debug!("need scan: {created} created, {unsourced} without stock");
        created
    }

    // ── Assignment ─────────────────────────────────────────────────────

    /// Give `agent` the best pending task for where it stands.
    ///
    /// Returns the agent's current task if it already has one. Scores are
    /// `tier * priority_weight - distance to source`; ties go to the task
    /// queued first. If the chosen task's stock can no longer be reserved
    /// it is cancelled and `None` is returned; the caller asks again on a
    /// later tick.
    pub fn request_task(
        &mut self,
        agent: AgentId,
        position: Cell,
        stockpiles: &mut dyn StockpileProvider,
    ) -> Option<&HaulTask> {
        if let Some(&id) = self.agent_tasks.get(&agent) {
            if self.tasks.get(&id).is_some_and(|t| !t.is_terminal()) {
                return self.tasks.get(&id);
            }
            self.agent_tasks.remove(&agent);
        }

        let weight = self.config.priority_weight;
        let mut best: Option<(usize, f32)> = None;
        for (idx, id) in self.queue.iter().enumerate() {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            let score =
                task.priority.value() as f32 * weight - position.distance(&task.source.position);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        let id = self.queue.remove(best?.0)?;
        let now = self.now_ms;
        let task = self.tasks.get_mut(&id)?;

        if !stockpiles.reserve_for_pickup(&task.source, task.resource, agent, task.quantity) {
            warn!(
                "{agent} lost the race for {} at {}/{}, cancelling {id}",
                task.quantity, task.source.stockpile_id, task.source.slot
            );
            let event = task.cancel(CancelReason::ReservationFailed, now);
            self.stats.reservation_failures += 1;
            if let Some(event) = event {
                self.record(event, stockpiles);
            }
            return None;
        }

        task.hold_reservation();
        task.start(agent, now);
        self.agent_tasks.insert(agent, id);
        self.stats.started += 1;
        info!("{agent} started {id}");
        self.tasks.get(&id)
    }

    // ── Per-tick update ────────────────────────────────────────────────

    pub fn update(&mut self, dt_ms: u64, world: &mut WorkContext<'_>) {
        self.now_ms += dt_ms;

        let scan_due = self.last_scan_ms.map_or(true, |last| {
            self.now_ms.saturating_sub(last) >= u64::from(self.config.scan_interval_ms)
        });
        if scan_due {
            self.last_scan_ms = Some(self.now_ms);
            self.withdraw_unpicked(&*world.construction, &mut *world.stockpiles);
            self.scan_for_needs(&*world.construction, &*world.stockpiles);
        }

        self.advance(dt_ms, world);
        self.purge();
    }

    fn advance(&mut self, dt_ms: u64, world: &mut WorkContext<'_>) {
        let active: Vec<(TaskId, AgentId)> = self
            .tasks
            .values()
            .filter(|t| t.status() == TaskStatus::Active)
            .filter_map(|t| Some((t.id, t.assigned_agent()?)))
            .collect();

        for (id, agent) in active {
            let now = self.now_ms;
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };

            let event = match world.agents.agent_position(agent) {
                None => {
                    let missing = task.note_agent_missing(dt_ms);
                    if missing < self.config.reservation_timeout_ms {
                        continue;
                    }
                    warn!("{agent} missing for {missing}ms, cancelling {id}");
                    self.stats.agents_lost += 1;
                    task.cancel(CancelReason::AgentLost, now)
                }
                Some(position) => {
                    task.note_agent_present();
                    let mut ctx = TaskContext {
                        now_ms: now,
                        agent_position: position,
                        arrival_threshold: self.config.arrival_threshold,
                        task_timeout_ms: self.config.task_timeout_ms,
                        stockpiles: &mut *world.stockpiles,
                        construction: &mut *world.construction,
                    };
                    task.update(dt_ms, &mut ctx).event
                }
            };

            if let Some(event) = event {
                self.record(event, &mut *world.stockpiles);
            }
        }
    }

    fn purge(&mut self) {
        let now = self.now_ms;
        let retention = self.config.retention_ms;
        let before = self.tasks.len();
        self.tasks.retain(|_, t| {
            !(t.is_terminal()
                && t.finished_at_ms()
                    .is_some_and(|done| now.saturating_sub(done) >= retention))
        });
        let purged = before - self.tasks.len();
        if purged > 0 {
            debug!("purged {purged} finished tasks");
            self.stats.purged += purged as u64;
        }
    }

    /// Apply a terminal event: release any held reservation, then
    /// [`Self::finish`] it.
    fn record(&mut self, event: TaskEvent, stockpiles: &mut dyn StockpileProvider) {
        if let Some((source, holder)) = event.release() {
            if !stockpiles.release_reservation(&source, holder) {
                warn!(
                    "{} had no reservation at {}/{} to release for {}",
                    holder,
                    source.stockpile_id,
                    source.slot,
                    event.task()
                );
            }
        }
        self.finish(event);
    }

    /// Update stats, drop the agent mapping and queue the event for
    /// observers.
    fn finish(&mut self, event: TaskEvent) {
        match &event {
            TaskEvent::Completed {
                task,
                agent,
                quantity,
                ..
            } => {
                self.stats.completed += 1;
                self.stats.quantity_delivered += u64::from(*quantity);
                info!("{agent} completed {task}, delivered {quantity}");
            }
            TaskEvent::Failed {
                task,
                agent,
                reason,
                ..
            } => {
                self.stats.failed += 1;
                info!("{agent} failed {task}: {reason:?}");
            }
            TaskEvent::Cancelled { task, reason, .. } => {
                self.stats.cancelled += 1;
                if *reason == CancelReason::NeedWithdrawn {
                    self.stats.withdrawn += 1;
                }
                info!("cancelled {task}: {reason:?}");
            }
        }

        if let Some(agent) = event.agent() {
            if self.agent_tasks.get(&agent) == Some(&event.task()) {
                self.agent_tasks.remove(&agent);
            }
        }
        self.events.push(event);
    }

    // ── Cancellation ───────────────────────────────────────────────────

    /// Cancel every unfinished task held by `agent` and drop any
    /// reservation it still holds. Returns the number of tasks cancelled.
    pub fn cancel_agent_tasks(
        &mut self,
        agent: AgentId,
        stockpiles: &mut dyn StockpileProvider,
    ) -> usize {
        let now = self.now_ms;
        let mut events = Vec::new();
        for task in self.tasks.values_mut() {
            if task.assigned_agent() == Some(agent) {
                if let Some(event) = task.cancel(CancelReason::AgentReassigned, now) {
                    events.push(event);
                }
            }
        }
        let cancelled = events.len();
        for event in events {
            self.record(event, stockpiles);
        }
        self.agent_tasks.remove(&agent);

        let leaked = stockpiles.release_all_reservations(agent);
        if leaked > 0 {
            warn!("released {leaked} leftover reservation(s) held by {agent}");
            self.stats.leaked_reservations += leaked as u64;
        }
        cancelled
    }

    /// Cancel one task by id. False if it is unknown or already finished.
    pub fn cancel_task(&mut self, id: TaskId, stockpiles: &mut dyn StockpileProvider) -> bool {
        let now = self.now_ms;
        let Some(event) = self
            .tasks
            .get_mut(&id)
            .and_then(|t| t.cancel(CancelReason::Requested, now))
        else {
            return false;
        };
        self.queue.retain(|queued| *queued != id);
        self.record(event, stockpiles);
        true
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// The unfinished task assigned to `agent`, if any.
    pub fn task_for_agent(&self, agent: AgentId) -> Option<&HaulTask> {
        let id = self.agent_tasks.get(&agent)?;
        self.tasks.get(id).filter(|t| !t.is_terminal())
    }

    pub fn task(&self, id: TaskId) -> Option<&HaulTask> {
        self.tasks.get(&id)
    }

    /// Every retained task, including recently finished ones, in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &HaulTask> {
        self.tasks.values()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status() == TaskStatus::Active)
            .count()
    }

    pub fn stats(&self) -> HaulStats {
        HaulStats {
            pending: self.pending_count(),
            active: self.active_count(),
            ..self.stats
        }
    }

    pub fn drain_events(&mut self) -> Vec<TaskEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Persistence ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> HaulingSnapshot {
        HaulingSnapshot {
            now_ms: self.now_ms,
            last_scan_ms: self.last_scan_ms,
            next_id: self.next_id,
            tasks: self.tasks.values().cloned().collect(),
            queue: self.queue.iter().copied().collect(),
            assignments: self.agent_tasks.iter().map(|(&a, &t)| (a, t)).collect(),
            stats: HaulStats {
                pending: 0,
                active: 0,
                ..self.stats
            },
        }
    }

    /// Rebuild an allocator, checking that the task table, queue and
    /// agent mapping agree with each other.
    pub fn restore(
        config: HaulingConfig,
        snapshot: HaulingSnapshot,
    ) -> Result<Self, RestoreError> {
        let mut tasks = BTreeMap::new();
        for task in snapshot.tasks {
            if task.id.0 >= snapshot.next_id {
                return Err(RestoreError::StaleIdCounter {
                    next: snapshot.next_id,
                    existing: task.id,
                });
            }
            let id = task.id;
            if tasks.insert(id, task).is_some() {
                return Err(RestoreError::DuplicateTask(id));
            }
        }

        let mut queued = HashSet::new();
        for &id in &snapshot.queue {
            let pending = tasks
                .get(&id)
                .is_some_and(|t: &HaulTask| t.status() == TaskStatus::Pending);
            if !pending || !queued.insert(id) {
                return Err(RestoreError::QueueEntryNotPending(id));
            }
        }

        let mut agent_tasks = BTreeMap::new();
        let mut mapped = HashSet::new();
        for &(agent, id) in &snapshot.assignments {
            let matches = tasks.get(&id).is_some_and(|t: &HaulTask| {
                t.status() == TaskStatus::Active && t.assigned_agent() == Some(agent)
            });
            if !matches {
                return Err(RestoreError::AssignmentMismatch { agent, task: id });
            }
            if agent_tasks.insert(agent, id).is_some() {
                return Err(RestoreError::DuplicateAgent(agent));
            }
            mapped.insert(id);
        }

        for task in tasks.values() {
            match task.status() {
                TaskStatus::Pending if !queued.contains(&task.id) => {
                    return Err(RestoreError::PendingNotQueued(task.id));
                }
                TaskStatus::Active if !mapped.contains(&task.id) => {
                    return Err(RestoreError::UnmappedActiveTask(task.id));
                }
                _ => {}
            }
        }

        Ok(Self {
            config,
            tasks,
            queue: snapshot.queue.into_iter().collect(),
            agent_tasks,
            next_id: snapshot.next_id,
            now_ms: snapshot.now_ms,
            last_scan_ms: snapshot.last_scan_ms,
            stats: snapshot.stats,
            events: Vec::new(),
        })
    }
}
