//! Simulation engine - main entry point for running the simulation

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use haulsim_logic::cell::Cell;
use haulsim_logic::config::SimConfig;
use haulsim_logic::haul::{HaulTask, TaskEvent};
use haulsim_logic::ids::AgentId;

use crate::generation::{generate_world, WorldConfig, WorldLayout};
use crate::persistence::SaveError;
use crate::stores::{ConstructionSites, ReservationLedger, Stockpiles};
use crate::systems::*;

/// What happened during one fixed step.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub movement: TickReport,
    pub movement_events: Vec<MovementEvent>,
    pub task_events: Vec<TaskEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStats {
    pub sim_time_ms: u64,
    pub movement: MovementStats,
    pub hauling: HaulStats,
    pub reservations: ReservationLedger,
}

/// Main simulation engine
///
/// Runs the movement and hauling systems in whole ticks of
/// `movement.tick_interval_ms` simulated time. Each tick:
/// 1. dispatch - idle workers ask for a task, busy workers are pointed at
///    their task's current target;
/// 2. movement tick;
/// 3. hauling update.
pub struct SimulationEngine {
    pub movement: MovementEngine,
    pub hauling: WorkAllocator,
    pub stockpiles: Stockpiles,
    pub sites: ConstructionSites,
    pub(crate) config: SimConfig,
    pub(crate) sim_time_ms: u64,
    /// Unspent simulated time, less than one tick.
    pub(crate) accumulator_ms: f64,
    pub(crate) time_scale: f32,
}

impl SimulationEngine {
    /// Create a new empty simulation
    pub fn new(config: SimConfig) -> Self {
        Self {
            movement: MovementEngine::new(config.movement.clone()),
            hauling: WorkAllocator::new(config.hauling.clone()),
            stockpiles: Stockpiles::new(),
            sites: ConstructionSites::new(),
            config,
            sim_time_ms: 0,
            accumulator_ms: 0.0,
            time_scale: 1.0,
        }
    }

    /// Populate the world from a seed. The same seed and config always
    /// produce the same world.
    pub fn generate(&mut self, world: &WorldConfig, seed: u64) -> Result<WorldLayout, MovementError> {
        let mut rng = StdRng::seed_from_u64(seed);
        generate_world(
            &mut self.movement,
            &mut self.stockpiles,
            &mut self.sites,
            world,
            &mut rng,
        )
    }

    /// Advance by real time. Returns how many fixed ticks ran.
    pub fn update(&mut self, delta_seconds: f32) -> u32 {
        let tick_ms = f64::from(self.config.movement.tick_interval_ms);
        self.accumulator_ms += f64::from(delta_seconds.max(0.0) * self.time_scale) * 1000.0;

        let mut ticks = 0;
        while self.accumulator_ms >= tick_ms {
            self.accumulator_ms -= tick_ms;
            self.step();
            ticks += 1;
        }
        ticks
    }

    /// Run exactly one tick.
    pub fn step(&mut self) -> StepReport {
        let tick_ms = self.config.movement.tick_interval_ms;

        self.dispatch();
        let movement = self.movement.tick(tick_ms);

        let mut world = WorkContext {
            construction: &mut self.sites,
            stockpiles: &mut self.stockpiles,
            agents: &self.movement,
        };
        self.hauling.update(u64::from(tick_ms), &mut world);
        self.sim_time_ms += u64::from(tick_ms);

        StepReport {
            movement,
            movement_events: self.movement.drain_events(),
            task_events: self.hauling.drain_events(),
        }
    }

    fn dispatch(&mut self) {
        for id in self.movement.agent_ids() {
            let Some(position) = self.movement.position(id) else {
                continue;
            };

            let target = match self.hauling.task_for_agent(id).map(HaulTask::current_target) {
                Some(target) => target,
                None => self
                    .hauling
                    .request_task(id, position, &mut self.stockpiles)
                    .and_then(HaulTask::current_target),
            };

            let Some(target) = target else {
                continue;
            };
            if position == target || self.movement.target(id) == Some(target) {
                continue;
            }
            if let Err(e) = self.movement.set_goal(id, target) {
                warn!("cannot send {id} to {target}: {e}");
            } else {
                debug!("{id} heading to {target}");
            }
        }
    }

    // ── Workers ────────────────────────────────────────────────────────

    pub fn spawn_worker(&mut self, id: AgentId, cell: Cell) -> Result<(), MovementError> {
        self.movement.spawn_agent(id, cell)
    }

    /// Cancel the worker's tasks, then remove it. Returns how many tasks
    /// were cancelled.
    pub fn remove_worker(&mut self, id: AgentId) -> Result<usize, MovementError> {
        if self.movement.position(id).is_none() {
            return Err(MovementError::UnknownAgent(id));
        }
        let cancelled = self.hauling.cancel_agent_tasks(id, &mut self.stockpiles);
        self.movement.remove_agent(id)?;
        Ok(cancelled)
    }

    pub fn worker_count(&self) -> usize {
        self.movement.agent_count()
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Simulated milliseconds since start.
    pub fn sim_time_ms(&self) -> u64 {
        self.sim_time_ms
    }

    /// Set time scale (1.0 = real-time, 2.0 = 2x speed, etc.)
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sim_time_ms: self.sim_time_ms,
            movement: self.movement.stats(),
            hauling: self.hauling.stats(),
            reservations: self.stockpiles.ledger(),
        }
    }

    /// Save simulation state to a writer
    pub fn save<W: std::io::Write>(&self, writer: W) -> Result<(), SaveError> {
        crate::persistence::save_simulation(writer, self)
    }

    /// Replace this simulation with one loaded from a reader
    pub fn load<R: std::io::Read>(&mut self, reader: R) -> Result<(), SaveError> {
        *self = crate::persistence::load_simulation(reader)?;
        Ok(())
    }
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haulsim_logic::config::MovementConfig;
    use haulsim_logic::constants::resource_types::WOOD;
    use haulsim_logic::haul::TaskStatus;
    use haulsim_logic::ids::{BlockKey, SiteId, SlotKey, StockpileId};

    fn small_config() -> SimConfig {
        SimConfig {
            movement: MovementConfig {
                grid_size: 16,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// One worker, one wood slot, one site needing 6 wood.
    fn one_haul() -> SimulationEngine {
        let mut engine = SimulationEngine::new(small_config());
        engine.stockpiles.add_stockpile(StockpileId(1));
        engine
            .stockpiles
            .add_slot(StockpileId(1), SlotKey(0), Cell::new(2, 2, 0), WOOD, 20);
        engine.sites.add_site(SiteId(1), 50);
        engine
            .sites
            .add_block(SiteId(1), BlockKey(0), Cell::new(12, 10, 0), WOOD, 6);
        engine.spawn_worker(AgentId(1), Cell::new(0, 0, 0)).unwrap();
        engine
    }

    #[test]
    fn test_engine_creation() {
        let engine = SimulationEngine::default();
        assert_eq!(engine.worker_count(), 0);
        assert_eq!(engine.sim_time_ms(), 0);
    }

    #[test]
    fn update_runs_whole_ticks() {
        let mut engine = SimulationEngine::new(small_config());
        assert_eq!(engine.update(0.25), 2);
        assert_eq!(engine.sim_time_ms(), 200);
        assert_eq!(engine.update(0.05), 1);
        assert_eq!(engine.sim_time_ms(), 300);
    }

    #[test]
    fn test_time_scale() {
        let mut engine = SimulationEngine::new(small_config());
        engine.set_time_scale(2.0);
        assert_eq!(engine.update(1.0), 20);
        assert_eq!(engine.sim_time_ms(), 2_000);
    }

    #[test]
    fn worker_completes_haul() {
        let mut engine = one_haul();
        let mut completed = Vec::new();
        for _ in 0..200 {
            let report = engine.step();
            completed.extend(
                report
                    .task_events
                    .into_iter()
                    .filter(|e| matches!(e, TaskEvent::Completed { .. })),
            );
            if engine.sites.site(SiteId(1)).unwrap().is_complete() {
                break;
            }
        }
        assert_eq!(completed.len(), 1);
        assert_eq!(engine.sites.total_delivered(), 6);
        assert_eq!(engine.stockpiles.total(WOOD), 14);
        assert!(engine.stockpiles.ledger_balanced());
        assert_eq!(engine.stats().hauling.completed, 1);
    }

    #[test]
    fn dispatch_points_worker_at_source() {
        let mut engine = one_haul();
        engine.step();
        // First tick scans; second tick assigns and sets the goal
        engine.step();
        let task = engine.hauling.task_for_agent(AgentId(1)).unwrap();
        assert_eq!(task.status(), TaskStatus::Active);
        assert_eq!(
            engine.movement.target(AgentId(1)),
            Some(Cell::new(2, 2, 0))
        );
    }

    #[test]
    fn remove_worker_cancels_task() {
        let mut engine = one_haul();
        engine.step();
        engine.step();
        assert_eq!(engine.remove_worker(AgentId(1)).unwrap(), 1);
        assert_eq!(engine.worker_count(), 0);
        assert_eq!(engine.stockpiles.outstanding_reservations(), 0);
        assert!(engine.remove_worker(AgentId(1)).is_err());
    }

    #[test]
    fn generated_world_makes_progress() {
        let mut engine = SimulationEngine::new(SimConfig {
            movement: MovementConfig {
                grid_size: 24,
                ..Default::default()
            },
            ..Default::default()
        });
        engine.generate(&WorldConfig::default(), 11).unwrap();
        for _ in 0..600 {
            engine.step();
        }
        let stats = engine.stats();
        assert!(stats.hauling.completed > 0);
        assert!(stats.movement.cells_moved > 0);
        assert!(engine.stockpiles.ledger_balanced());
    }
}
