//! Haul tasks: move a quantity of one resource from a stockpile slot to a
//! construction block.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──start──▶ Active ──arrive at source──▶ Active (carrying)
//!    │                 │                               │
//!    │                 ├─timeout / source empty──▶ Failed
//!    │                 │                               ├─delivered──▶ Completed
//!    └──cancel────────▶└──cancel──▶ Cancelled          └─rejected───▶ Failed
//! ```
//!
//! A task never calls back into its owner. Terminal transitions return a
//! [`TaskEvent`] describing what happened and, if the source reservation was
//! still held, which reservation the owner must release. That keeps tasks
//! plain data: they serialize and restore without any rewiring.

use crate::cell::Cell;
use crate::ids::{AgentId, TaskId};
use crate::providers::{ConstructionProvider, HaulDestination, ResourceSource, StockpileProvider};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Which leg of the haul an active task is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaulPhase {
    ToSource,
    ToDestination,
}

/// Coarse priority tier. Site priorities (0-100) are bucketed so that
/// priority effects on assignment are stepwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    pub fn from_site_priority(priority: u8) -> Self {
        match priority {
            75.. => TaskPriority::Urgent,
            50..=74 => TaskPriority::High,
            25..=49 => TaskPriority::Normal,
            _ => TaskPriority::Low,
        }
    }

    pub fn value(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailReason {
    /// The stockpile had nothing left to hand over.
    SourceDepleted,
    /// The construction site refused the delivery (finished or removed).
    DeliveryRejected,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Stock was gone by the time the task was assigned.
    ReservationFailed,
    AgentReassigned,
    /// The assigned agent stopped reporting a position.
    AgentLost,
    Requested,
    /// The site closed or no longer needs this much before pickup.
    NeedWithdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Failed(FailReason),
    Cancelled(CancelReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of a terminal transition, consumed by the task's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Completed {
        task: TaskId,
        agent: AgentId,
        resource: u8,
        quantity: u32,
    },
    Failed {
        task: TaskId,
        agent: AgentId,
        reason: FailReason,
        release: Option<ResourceSource>,
    },
    Cancelled {
        task: TaskId,
        agent: Option<AgentId>,
        reason: CancelReason,
        release: Option<ResourceSource>,
    },
}

impl TaskEvent {
    pub fn task(&self) -> TaskId {
        match self {
            TaskEvent::Completed { task, .. }
            | TaskEvent::Failed { task, .. }
            | TaskEvent::Cancelled { task, .. } => *task,
        }
    }

    pub fn agent(&self) -> Option<AgentId> {
        match self {
            TaskEvent::Completed { agent, .. } | TaskEvent::Failed { agent, .. } => Some(*agent),
            TaskEvent::Cancelled { agent, .. } => *agent,
        }
    }

    /// Reservation the owner must release, with its holder.
    pub fn release(&self) -> Option<(ResourceSource, AgentId)> {
        match self {
            TaskEvent::Completed { .. } => None,
            TaskEvent::Failed { release, agent, .. } => release.map(|s| (s, *agent)),
            TaskEvent::Cancelled { release, agent, .. } => release.zip(*agent),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub signal: TaskSignal,
    pub event: Option<TaskEvent>,
}

impl TaskUpdate {
    fn running() -> Self {
        Self {
            signal: TaskSignal::Running,
            event: None,
        }
    }

    fn finished(signal: TaskSignal, event: TaskEvent) -> Self {
        Self {
            signal,
            event: Some(event),
        }
    }
}

/// Everything an active task needs for one update.
pub struct TaskContext<'a> {
    pub now_ms: u64,
    pub agent_position: Cell,
    pub arrival_threshold: f32,
    pub task_timeout_ms: Option<u64>,
    pub stockpiles: &'a mut dyn StockpileProvider,
    pub construction: &'a mut dyn ConstructionProvider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaulTask {
    pub id: TaskId,
    pub resource: u8,
    pub quantity: u32,
    pub source: ResourceSource,
    pub destination: HaulDestination,
    pub priority: TaskPriority,
    status: TaskStatus,
    phase: HaulPhase,
    carrying: bool,
    carried: u32,
    assigned_agent: Option<AgentId>,
    reservation_held: bool,
    created_at_ms: u64,
    started_at_ms: Option<u64>,
    finished_at_ms: Option<u64>,
    active_ms: u64,
    agent_missing_ms: u64,
    end_reason: Option<EndReason>,
}

impl HaulTask {
    pub fn new(
        id: TaskId,
        resource: u8,
        quantity: u32,
        source: ResourceSource,
        destination: HaulDestination,
        priority: TaskPriority,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            resource,
            quantity,
            source,
            destination,
            priority,
            status: TaskStatus::Pending,
            phase: HaulPhase::ToSource,
            carrying: false,
            carried: 0,
            assigned_agent: None,
            reservation_held: false,
            created_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
            active_ms: 0,
            agent_missing_ms: 0,
            end_reason: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn phase(&self) -> HaulPhase {
        self.phase
    }

    pub fn is_carrying(&self) -> bool {
        self.carrying
    }

    pub fn carried_quantity(&self) -> u32 {
        self.carried
    }

    pub fn assigned_agent(&self) -> Option<AgentId> {
        self.assigned_agent
    }

    pub fn holds_reservation(&self) -> bool {
        self.reservation_held
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    pub fn finished_at_ms(&self) -> Option<u64> {
        self.finished_at_ms
    }

    pub fn active_ms(&self) -> u64 {
        self.active_ms
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn signal(&self) -> TaskSignal {
        match self.status {
            TaskStatus::Pending | TaskStatus::Active => TaskSignal::Running,
            TaskStatus::Completed => TaskSignal::Completed,
            TaskStatus::Failed => TaskSignal::Failed,
            TaskStatus::Cancelled => TaskSignal::Cancelled,
        }
    }

    /// Record that the source slot now holds a reservation for this task.
    /// Only meaningful before the task starts.
    pub fn hold_reservation(&mut self) -> bool {
        if self.status != TaskStatus::Pending || self.reservation_held {
            return false;
        }
        self.reservation_held = true;
        true
    }

    /// Pending → Active. Returns false (and changes nothing) otherwise.
    pub fn start(&mut self, agent: AgentId, now_ms: u64) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Active;
        self.assigned_agent = Some(agent);
        self.started_at_ms = Some(now_ms);
        self.phase = HaulPhase::ToSource;
        true
    }

    /// Cell the assigned agent should be walking to.
    pub fn current_target(&self) -> Option<Cell> {
        if self.status != TaskStatus::Active {
            return None;
        }
        Some(match self.phase {
            HaulPhase::ToSource => self.source.position,
            HaulPhase::ToDestination => self.destination.position,
        })
    }

    /// Advance an active task using the agent's live position.
    pub fn update(&mut self, dt_ms: u64, ctx: &mut TaskContext<'_>) -> TaskUpdate {
        let agent = match (self.status, self.assigned_agent) {
            (TaskStatus::Active, Some(agent)) => agent,
            _ => {
                return TaskUpdate {
                    signal: self.signal(),
                    event: None,
                }
            }
        };

        self.active_ms += dt_ms;
        if let Some(limit) = ctx.task_timeout_ms {
            if self.active_ms >= limit {
                return self.fail(agent, FailReason::Timeout, ctx.now_ms);
            }
        }

        match self.current_target() {
            Some(target) if ctx.agent_position.distance(&target) <= ctx.arrival_threshold => {
                self.report_arrival(ctx)
            }
            _ => TaskUpdate::running(),
        }
    }

    /// The agent reached the current target: pick up at the source, or
    /// deliver at the destination.
    pub fn report_arrival(&mut self, ctx: &mut TaskContext<'_>) -> TaskUpdate {
        let agent = match (self.status, self.assigned_agent) {
            (TaskStatus::Active, Some(agent)) => agent,
            _ => {
                return TaskUpdate {
                    signal: self.signal(),
                    event: None,
                }
            }
        };

        match self.phase {
            HaulPhase::ToSource => {
                let needed = ctx.construction.remaining_need(
                    self.destination.site_id,
                    self.destination.block,
                    self.resource,
                );
                if needed == 0 {
                    return match self.cancel(CancelReason::NeedWithdrawn, ctx.now_ms) {
                        Some(event) => TaskUpdate::finished(TaskSignal::Cancelled, event),
                        None => TaskUpdate::running(),
                    };
                }
                // Never take more than the block can still accept.
                let wanted = self.quantity.min(needed);
                let taken = ctx
                    .stockpiles
                    .take_reserved(&self.source, self.resource, agent, wanted);
                // Taking ends the reservation whether or not anything was left.
                self.reservation_held = false;
                if taken == 0 {
                    return self.fail(agent, FailReason::SourceDepleted, ctx.now_ms);
                }
                self.carrying = true;
                self.carried = taken;
                self.phase = HaulPhase::ToDestination;
                TaskUpdate::running()
            }
            HaulPhase::ToDestination => {
                let accepted = ctx.construction.deliver(
                    self.destination.site_id,
                    self.destination.block,
                    self.resource,
                    self.carried,
                );
                if !accepted {
                    return self.fail(agent, FailReason::DeliveryRejected, ctx.now_ms);
                }
                self.status = TaskStatus::Completed;
                self.carrying = false;
                self.finished_at_ms = Some(ctx.now_ms);
                TaskUpdate::finished(
                    TaskSignal::Completed,
                    TaskEvent::Completed {
                        task: self.id,
                        agent,
                        resource: self.resource,
                        quantity: self.carried,
                    },
                )
            }
        }
    }

    /// Cancel a non-terminal task. Returns `None` if it had already ended.
    pub fn cancel(&mut self, reason: CancelReason, now_ms: u64) -> Option<TaskEvent> {
        if self.is_terminal() {
            return None;
        }
        self.status = TaskStatus::Cancelled;
        self.end_reason = Some(EndReason::Cancelled(reason));
        self.finished_at_ms = Some(now_ms);
        self.carrying = false;
        Some(TaskEvent::Cancelled {
            task: self.id,
            agent: self.assigned_agent,
            reason,
            release: self.take_release(),
        })
    }

    /// Accumulate time the assigned agent has been absent; returns the total.
    pub fn note_agent_missing(&mut self, dt_ms: u64) -> u64 {
        self.agent_missing_ms += dt_ms;
        self.agent_missing_ms
    }

    pub fn note_agent_present(&mut self) {
        self.agent_missing_ms = 0;
    }

    /// Only reachable from an active task, so `agent` is the assigned one.
    fn fail(&mut self, agent: AgentId, reason: FailReason, now_ms: u64) -> TaskUpdate {
        self.status = TaskStatus::Failed;
        self.end_reason = Some(EndReason::Failed(reason));
        self.finished_at_ms = Some(now_ms);
        self.carrying = false;
        let release = self.take_release();
        TaskUpdate::finished(
            TaskSignal::Failed,
            TaskEvent::Failed {
                task: self.id,
                agent,
                reason,
                release,
            },
        )
    }

    fn take_release(&mut self) -> Option<ResourceSource> {
        if std::mem::replace(&mut self.reservation_held, false) {
            Some(self.source)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::resource_types;
    use crate::ids::{BlockKey, SiteId, SlotKey, StockpileId};
    use crate::providers::{MaterialNeed, SiteSummary};

    #[derive(Default)]
    struct FakeStores {
        stock: u32,
        takes: u32,
        accept: bool,
        delivered: u32,
        /// Units the block still needs, when used as the site side.
        need: u32,
    }

    impl StockpileProvider for FakeStores {
        fn find_nearest_resource(&self, _: u8, _: Cell, _: u32) -> Option<ResourceSource> {
            None
        }
        fn reserve_for_pickup(&mut self, _: &ResourceSource, _: u8, _: AgentId, _: u32) -> bool {
            true
        }
        fn release_reservation(&mut self, _: &ResourceSource, _: AgentId) -> bool {
            true
        }
        fn take_reserved(&mut self, _: &ResourceSource, _: u8, _: AgentId, qty: u32) -> u32 {
            self.takes += 1;
            let taken = qty.min(self.stock);
            self.stock -= taken;
            taken
        }
        fn release_all_reservations(&mut self, _: AgentId) -> usize {
            0
        }
    }

    struct FakeSites<'a>(&'a mut FakeStores);

    impl ConstructionProvider for FakeSites<'_> {
        fn active_sites(&self) -> Vec<SiteSummary> {
            Vec::new()
        }
        fn material_needs(&self, _: SiteId) -> Vec<MaterialNeed> {
            if self.0.need == 0 {
                return Vec::new();
            }
            vec![MaterialNeed {
                resource: resource_types::WOOD,
                quantity: self.0.need,
                position: Cell::new(10, 0, 0),
                block: BlockKey(3),
            }]
        }
        fn deliver(&mut self, _: SiteId, _: BlockKey, _: u8, qty: u32) -> bool {
            if self.0.accept {
                self.0.delivered += qty;
            }
            self.0.accept
        }
    }

    fn task() -> HaulTask {
        HaulTask::new(
            TaskId(1),
            resource_types::WOOD,
            5,
            ResourceSource {
                stockpile_id: StockpileId(1),
                slot: SlotKey(0),
                position: Cell::new(0, 0, 0),
            },
            HaulDestination {
                site_id: SiteId(1),
                block: BlockKey(3),
                position: Cell::new(10, 0, 0),
            },
            TaskPriority::Normal,
            0,
        )
    }

    /// Run one update with the agent at `pos`.
    fn step(t: &mut HaulTask, pos: Cell, stock: &mut FakeStores, sites: &mut FakeStores) -> TaskUpdate {
        let mut construction = FakeSites(sites);
        let mut ctx = TaskContext {
            now_ms: 1_000,
            agent_position: pos,
            arrival_threshold: 1.5,
            task_timeout_ms: Some(10_000),
            stockpiles: stock,
            construction: &mut construction,
        };
        t.update(100, &mut ctx)
    }

    #[test]
    fn priority_buckets() {
        assert_eq!(TaskPriority::from_site_priority(100), TaskPriority::Urgent);
        assert_eq!(TaskPriority::from_site_priority(75), TaskPriority::Urgent);
        assert_eq!(TaskPriority::from_site_priority(74), TaskPriority::High);
        assert_eq!(TaskPriority::from_site_priority(50), TaskPriority::High);
        assert_eq!(TaskPriority::from_site_priority(49), TaskPriority::Normal);
        assert_eq!(TaskPriority::from_site_priority(25), TaskPriority::Normal);
        assert_eq!(TaskPriority::from_site_priority(24), TaskPriority::Low);
        assert_eq!(TaskPriority::from_site_priority(0), TaskPriority::Low);
        assert!(TaskPriority::Urgent.value() > TaskPriority::High.value());
    }

    #[test]
    fn start_only_from_pending() {
        let mut t = task();
        assert_eq!(t.current_target(), None);
        assert!(t.start(AgentId(1), 50));
        assert_eq!(t.status(), TaskStatus::Active);
        assert_eq!(t.assigned_agent(), Some(AgentId(1)));
        assert_eq!(t.started_at_ms(), Some(50));
        assert!(!t.start(AgentId(2), 60));
        assert_eq!(t.assigned_agent(), Some(AgentId(1)));
    }

    #[test]
    fn full_haul_completes() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores {
            stock: 20,
            ..Default::default()
        };
        let mut sites = FakeStores {
            accept: true,
            need: 100,
            ..Default::default()
        };

        // Far from source, nothing happens
        let u = step(&mut t, Cell::new(5, 0, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Running);
        assert_eq!(t.current_target(), Some(Cell::new(0, 0, 0)));

        // Within 1.5 of source, pick up
        let u = step(&mut t, Cell::new(1, 1, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Running);
        assert!(t.is_carrying());
        assert!(!t.holds_reservation());
        assert_eq!(t.carried_quantity(), 5);
        assert_eq!(t.phase(), HaulPhase::ToDestination);
        assert_eq!(t.current_target(), Some(Cell::new(10, 0, 0)));

        // At destination, deliver
        let u = step(&mut t, Cell::new(10, 0, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Completed);
        assert_eq!(
            u.event,
            Some(TaskEvent::Completed {
                task: TaskId(1),
                agent: AgentId(1),
                resource: resource_types::WOOD,
                quantity: 5,
            })
        );
        assert_eq!(sites.delivered, 5);
        assert_eq!(stock.takes, 1);
        assert!(t.is_terminal());
        assert_eq!(t.finished_at_ms(), Some(1_000));

        // Terminal tasks ignore further updates
        let u = step(&mut t, Cell::new(10, 0, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Completed);
        assert!(u.event.is_none());
    }

    #[test]
    fn empty_source_fails_without_release() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores::default();
        let mut sites = FakeStores {
            need: 100,
            ..Default::default()
        };
        let u = step(&mut t, Cell::new(0, 0, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Failed);
        let event = u.event.unwrap();
        assert_eq!(event.release(), None);
        assert_eq!(t.end_reason(), Some(EndReason::Failed(FailReason::SourceDepleted)));
    }

    #[test]
    fn rejected_delivery_fails() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores {
            stock: 2,
            ..Default::default()
        };
        let mut sites = FakeStores {
            need: 100,
            ..Default::default()
        };
        step(&mut t, Cell::new(0, 0, 0), &mut stock, &mut sites);
        assert_eq!(t.carried_quantity(), 2);
        let u = step(&mut t, Cell::new(10, 0, 1), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Failed);
        assert_eq!(
            t.end_reason(),
            Some(EndReason::Failed(FailReason::DeliveryRejected))
        );
    }

    #[test]
    fn withdrawn_need_cancels_at_pickup() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores {
            stock: 20,
            ..Default::default()
        };
        // Site closed while the agent was walking over
        let mut sites = FakeStores::default();
        let u = step(&mut t, Cell::new(0, 0, 0), &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Cancelled);
        let event = u.event.unwrap();
        assert_eq!(event.release(), Some((t.source, AgentId(1))));
        assert_eq!(
            t.end_reason(),
            Some(EndReason::Cancelled(CancelReason::NeedWithdrawn))
        );
        assert_eq!(stock.takes, 0);
        assert_eq!(stock.stock, 20);
        assert!(!t.is_carrying());
    }

    #[test]
    fn pickup_capped_by_remaining_need() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores {
            stock: 20,
            ..Default::default()
        };
        let mut sites = FakeStores {
            accept: true,
            need: 3,
            ..Default::default()
        };
        step(&mut t, Cell::new(0, 0, 0), &mut stock, &mut sites);
        assert_eq!(t.carried_quantity(), 3);
        assert_eq!(stock.stock, 17);
    }

    #[test]
    fn timeout_fails_and_releases() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(1), 0);
        let mut stock = FakeStores::default();
        let mut sites = FakeStores::default();
        let mut last = None;
        for _ in 0..100 {
            let u = step(&mut t, Cell::new(20, 20, 20), &mut stock, &mut sites);
            if u.signal != TaskSignal::Running {
                last = u.event;
                break;
            }
        }
        let event = last.expect("task should time out");
        assert_eq!(t.active_ms(), 10_000);
        assert_eq!(event.agent(), Some(AgentId(1)));
        assert_eq!(event.release(), Some((t.source, AgentId(1))));
        assert!(!t.holds_reservation());
    }

    #[test]
    fn update_ignores_unstarted_task() {
        let mut t = task();
        let mut stock = FakeStores {
            stock: 10,
            ..Default::default()
        };
        let mut sites = FakeStores::default();
        let at_source = t.source.position;
        let u = step(&mut t, at_source, &mut stock, &mut sites);
        assert_eq!(u.signal, TaskSignal::Running);
        assert!(u.event.is_none());
        assert_eq!(t.status(), TaskStatus::Pending);
        assert_eq!(t.active_ms(), 0);
        assert_eq!(stock.takes, 0);
    }

    #[test]
    fn cancel_releases_once() {
        let mut t = task();
        assert!(t.hold_reservation());
        assert!(!t.hold_reservation());
        t.start(AgentId(4), 0);
        let event = t.cancel(CancelReason::Requested, 10).unwrap();
        assert_eq!(event.release(), Some((t.source, AgentId(4))));
        assert_eq!(event.agent(), Some(AgentId(4)));
        assert_eq!(t.status(), TaskStatus::Cancelled);
        assert!(t.cancel(CancelReason::Requested, 20).is_none());
        assert_eq!(t.finished_at_ms(), Some(10));
    }

    #[test]
    fn cancel_pending_has_no_agent() {
        let mut t = task();
        let event = t.cancel(CancelReason::ReservationFailed, 0).unwrap();
        assert_eq!(event.agent(), None);
        assert_eq!(event.release(), None);
        assert!(!t.start(AgentId(1), 0));
    }

    #[test]
    fn serializes_without_callbacks() {
        let mut t = task();
        t.hold_reservation();
        t.start(AgentId(9), 5);
        let json = serde_json::to_string(&t).unwrap();
        let restored: HaulTask = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, t);
        assert!(restored.holds_reservation());
    }
}
