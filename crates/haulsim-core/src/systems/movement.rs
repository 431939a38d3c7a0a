//! Movement system - steps agents toward their targets on the obstacle grid.
//!
//! Each agent is a `hecs` entity with [`Worker`], [`Position`] and
//! [`Odometer`]; a [`Movement`] component is attached while it has a target
//! and removed when it arrives. Agents are ticked in ascending [`AgentId`]
//! order so a run is reproducible from its inputs.
//!
//! Authoritative motion is one greedy [`next_step`] per tick. When no step
//! exists the agent accumulates stuck time, and once that reaches the
//! configured threshold it is placed directly on its target. Full paths are
//! recomputed on a slower cadence for renderers and diagnostics only.

use std::collections::BTreeMap;

use hecs::{Entity, World};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use haulsim_logic::cell::Cell;
use haulsim_logic::config::MovementConfig;
use haulsim_logic::grid::ObstacleGrid;
use haulsim_logic::ids::AgentId;
use haulsim_logic::pathfinding::{next_step, Pathfinder};
use haulsim_logic::providers::AgentLocator;

use crate::components::{Movement, Odometer, Position, Worker};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MovementError {
    #[error("{0} already exists")]
    DuplicateAgent(AgentId),
    #[error("{0} does not exist")]
    UnknownAgent(AgentId),
    #[error("cell {cell} is outside the grid (0..={size} per axis)")]
    OutOfBounds { cell: Cell, size: i32 },
}

/// What a single agent did during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No target.
    Idle,
    /// Was on its target at the start of the tick; now idle.
    Arrived,
    Stepped(Cell),
    Blocked { stuck_ms: u32 },
    /// Stuck too long and placed on its target.
    Recovered(Cell),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent {
    Arrived { agent: AgentId, cell: Cell },
    Recovered { agent: AgentId, from: Cell, to: Cell },
}

/// Totals for one call to [`MovementEngine::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub stepped: usize,
    pub blocked: usize,
    pub arrived: usize,
    pub recovered: usize,
}

/// Read-only view of one agent for renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentView {
    pub id: AgentId,
    pub position: Cell,
    pub target: Option<Cell>,
    pub path: Vec<Cell>,
    pub moving: bool,
    pub stuck_ms: u32,
    pub cells_moved: u64,
    pub distance: f64,
    pub recoveries: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MovementStats {
    pub agents: usize,
    pub moving: usize,
    pub cells_moved: u64,
    pub distance: f64,
    pub recoveries: u64,
    pub obstacles: usize,
    pub path_cache_size: usize,
    pub path_cache_hits: u64,
    pub path_cache_misses: u64,
}

/// Serializable form of one agent entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub worker: Worker,
    pub position: Position,
    pub movement: Option<Movement>,
    pub odometer: Odometer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSnapshot {
    pub sim_time_ms: u64,
    pub since_refresh_ms: u32,
    pub obstacles: Vec<Cell>,
    pub agents: Vec<AgentRecord>,
}

pub struct MovementEngine {
    world: World,
    index: BTreeMap<AgentId, Entity>,
    grid: ObstacleGrid,
    pathfinder: Pathfinder,
    config: MovementConfig,
    sim_time_ms: u64,
    since_refresh_ms: u32,
    events: Vec<MovementEvent>,
}

impl MovementEngine {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            world: World::new(),
            index: BTreeMap::new(),
            grid: ObstacleGrid::new(config.grid_size),
            pathfinder: Pathfinder::new(config.path_cache_ttl_ms, config.path_cache_capacity),
            config,
            sim_time_ms: 0,
            since_refresh_ms: 0,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn grid(&self) -> &ObstacleGrid {
        &self.grid
    }

    pub fn sim_time_ms(&self) -> u64 {
        self.sim_time_ms
    }

    // ── Agents ─────────────────────────────────────────────────────────

    pub fn spawn_agent(&mut self, id: AgentId, cell: Cell) -> Result<(), MovementError> {
        if self.index.contains_key(&id) {
            return Err(MovementError::DuplicateAgent(id));
        }
        self.check_bounds(cell)?;
        let entity = self
            .world
            .spawn((Worker { id }, Position::new(cell), Odometer::default()));
        self.index.insert(id, entity);
        if self.config.agents_block {
            self.grid.occupy(cell);
        }
        debug!("spawned {id} at {cell}");
        Ok(())
    }

    pub fn remove_agent(&mut self, id: AgentId) -> Result<(), MovementError> {
        let entity = self
            .index
            .remove(&id)
            .ok_or(MovementError::UnknownAgent(id))?;
        if self.config.agents_block {
            if let Ok(pos) = self.world.get::<&Position>(entity) {
                self.grid.vacate(pos.cell);
            }
        }
        let _ = self.world.despawn(entity);
        debug!("removed {id}");
        Ok(())
    }

    /// Start moving toward `target`, replacing any previous target and
    /// resetting the stuck timer.
    pub fn set_goal(&mut self, id: AgentId, target: Cell) -> Result<(), MovementError> {
        self.check_bounds(target)?;
        let entity = self.entity(id)?;
        let _ = self.world.insert_one(entity, Movement::new(target));
        Ok(())
    }

    /// Stop moving. Returns whether the agent had a target.
    pub fn clear_goal(&mut self, id: AgentId) -> Result<bool, MovementError> {
        let entity = self.entity(id)?;
        Ok(self.world.remove_one::<Movement>(entity).is_ok())
    }

    /// Advance a single agent by `dt_ms`.
    pub fn tick_agent(&mut self, id: AgentId, dt_ms: u32) -> Result<TickOutcome, MovementError> {
        let entity = self.entity(id)?;
        Ok(self.advance(entity, id, dt_ms))
    }

    /// Advance every agent once, in id order, then refresh diagnostic paths
    /// if the refresh interval has elapsed.
    pub fn tick(&mut self, dt_ms: u32) -> TickReport {
        let order: Vec<(AgentId, Entity)> = self.index.iter().map(|(&id, &e)| (id, e)).collect();
        let mut report = TickReport::default();

        for (id, entity) in order {
            match self.advance(entity, id, dt_ms) {
                TickOutcome::Idle => {}
                TickOutcome::Arrived => report.arrived += 1,
                TickOutcome::Stepped(_) => report.stepped += 1,
                TickOutcome::Blocked { .. } => report.blocked += 1,
                TickOutcome::Recovered(_) => report.recovered += 1,
            }
        }

        self.sim_time_ms += u64::from(dt_ms);
        self.since_refresh_ms += dt_ms;
        if self.since_refresh_ms >= self.config.path_refresh_interval_ms {
            self.since_refresh_ms = 0;
            self.refresh_paths();
        }

        report
    }

    fn advance(&mut self, entity: Entity, id: AgentId, dt_ms: u32) -> TickOutcome {
        let (from, target, stuck_ms) =
            match self.world.query_one_mut::<(&Position, &Movement)>(entity) {
                Ok((pos, movement)) => (pos.cell, movement.target, movement.stuck_ms),
                Err(_) => return TickOutcome::Idle,
            };

        if from == target {
            let _ = self.world.remove_one::<Movement>(entity);
            self.events.push(MovementEvent::Arrived {
                agent: id,
                cell: target,
            });
            return TickOutcome::Arrived;
        }

        if let Some(next) = next_step(&self.grid, from, target) {
            self.relocate(entity, from, next);
            if let Ok((movement, odometer)) =
                self.world.query_one_mut::<(&mut Movement, &mut Odometer)>(entity)
            {
                movement.stuck_ms = 0;
                odometer.cells_moved += 1;
                odometer.distance += f64::from(from.distance(&next));
            }
            return TickOutcome::Stepped(next);
        }

        let stuck_ms = stuck_ms.saturating_add(dt_ms);
        if stuck_ms < self.config.stuck_threshold_ms {
            if let Ok(mut movement) = self.world.get::<&mut Movement>(entity) {
                movement.stuck_ms = stuck_ms;
            }
            return TickOutcome::Blocked { stuck_ms };
        }

        self.relocate(entity, from, target);
        if let Ok((movement, odometer)) =
            self.world.query_one_mut::<(&mut Movement, &mut Odometer)>(entity)
        {
            movement.stuck_ms = 0;
            odometer.recoveries += 1;
        }
        warn!("{id} stuck at {from} for {stuck_ms}ms, placing it on {target}");
        self.events.push(MovementEvent::Recovered {
            agent: id,
            from,
            to: target,
        });
        TickOutcome::Recovered(target)
    }

    fn relocate(&mut self, entity: Entity, from: Cell, to: Cell) {
        if let Ok(mut pos) = self.world.get::<&mut Position>(entity) {
            pos.cell = to;
        }
        if self.config.agents_block {
            self.grid.vacate(from);
            self.grid.occupy(to);
        }
    }

    fn refresh_paths(&mut self) {
        let mut routes: Vec<(Entity, Cell, Cell)> = Vec::with_capacity(self.index.len());
        for &entity in self.index.values() {
            if let Ok((pos, movement)) = self.world.query_one_mut::<(&Position, &Movement)>(entity) {
                routes.push((entity, pos.cell, movement.target));
            }
        }

        for (entity, from, target) in routes {
            let path = self.pathfinder.find_path(
                &self.grid,
                from,
                target,
                self.config.max_path_steps,
                self.sim_time_ms,
            );
            if let Ok(mut movement) = self.world.get::<&mut Movement>(entity) {
                movement.path = path;
            }
        }
    }

    // ── Obstacles ──────────────────────────────────────────────────────

    pub fn add_obstacle(&mut self, cell: Cell) -> bool {
        self.grid.add_obstacle(cell)
    }

    pub fn remove_obstacle(&mut self, cell: Cell) -> bool {
        self.grid.remove_obstacle(cell)
    }

    /// Out of bounds, a static obstacle, or (with `agents_block`) occupied.
    pub fn is_blocked(&self, cell: Cell) -> bool {
        !self.grid.is_walkable(cell)
    }

    /// Full route from `start` to `goal` through the path cache.
    pub fn find_path(&mut self, start: Cell, goal: Cell) -> Vec<Cell> {
        self.pathfinder.find_path(
            &self.grid,
            start,
            goal,
            self.config.max_path_steps,
            self.sim_time_ms,
        )
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn position(&self, id: AgentId) -> Option<Cell> {
        let entity = *self.index.get(&id)?;
        self.world.get::<&Position>(entity).ok().map(|p| p.cell)
    }

    pub fn target(&self, id: AgentId) -> Option<Cell> {
        let entity = *self.index.get(&id)?;
        self.world.get::<&Movement>(entity).ok().map(|m| m.target)
    }

    pub fn is_moving(&self, id: AgentId) -> bool {
        self.target(id).is_some()
    }

    pub fn agent(&self, id: AgentId) -> Option<AgentView> {
        let entity = *self.index.get(&id)?;
        let position = self.world.get::<&Position>(entity).ok()?.cell;
        let odometer = self
            .world
            .get::<&Odometer>(entity)
            .map(|o| *o)
            .unwrap_or_default();
        let movement = self.world.get::<&Movement>(entity).ok();
        Some(AgentView {
            id,
            position,
            target: movement.as_ref().map(|m| m.target),
            path: movement.as_ref().map(|m| m.path.clone()).unwrap_or_default(),
            moving: movement.is_some(),
            stuck_ms: movement.as_ref().map_or(0, |m| m.stuck_ms),
            cells_moved: odometer.cells_moved,
            distance: odometer.distance,
            recoveries: odometer.recoveries,
        })
    }

    /// All agents in id order.
    pub fn agents(&self) -> Vec<AgentView> {
        self.index.keys().filter_map(|&id| self.agent(id)).collect()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.index.keys().copied().collect()
    }

    pub fn agent_count(&self) -> usize {
        self.index.len()
    }

    pub fn stats(&self) -> MovementStats {
        let mut stats = MovementStats {
            agents: self.index.len(),
            obstacles: self.grid.obstacle_count(),
            path_cache_size: self.pathfinder.cache_size(),
            ..Default::default()
        };
        let (hits, misses) = self.pathfinder.cache_stats();
        stats.path_cache_hits = hits;
        stats.path_cache_misses = misses;

        for (_, (odometer, movement)) in self.world.query::<(&Odometer, Option<&Movement>)>().iter()
        {
            stats.cells_moved += odometer.cells_moved;
            stats.distance += odometer.distance;
            stats.recoveries += u64::from(odometer.recoveries);
            if movement.is_some() {
                stats.moving += 1;
            }
        }
        stats
    }

    pub fn drain_events(&mut self) -> Vec<MovementEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Persistence ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> MovementSnapshot {
        let agents = self
            .index
            .iter()
            .filter_map(|(&id, &entity)| {
                let position = *self.world.get::<&Position>(entity).ok()?;
                Some(AgentRecord {
                    worker: Worker { id },
                    position,
                    movement: self.world.get::<&Movement>(entity).ok().map(|m| (*m).clone()),
                    odometer: self
                        .world
                        .get::<&Odometer>(entity)
                        .map(|o| *o)
                        .unwrap_or_default(),
                })
            })
            .collect();

        MovementSnapshot {
            sim_time_ms: self.sim_time_ms,
            since_refresh_ms: self.since_refresh_ms,
            obstacles: self.grid.obstacles(),
            agents,
        }
    }

    /// Rebuild an engine from a snapshot. The path cache starts empty.
    pub fn restore(
        config: MovementConfig,
        snapshot: MovementSnapshot,
    ) -> Result<Self, MovementError> {
        let mut engine = Self::new(config);
        engine.sim_time_ms = snapshot.sim_time_ms;
        engine.since_refresh_ms = snapshot.since_refresh_ms;
        for cell in snapshot.obstacles {
            engine.grid.add_obstacle(cell);
        }
        for record in snapshot.agents {
            let id = record.worker.id;
            engine.spawn_agent(id, record.position.cell)?;
            let entity = engine.entity(id)?;
            if let Ok(mut odometer) = engine.world.get::<&mut Odometer>(entity) {
                *odometer = record.odometer;
            }
            if let Some(movement) = record.movement {
                let _ = engine.world.insert_one(entity, movement);
            }
        }
        Ok(engine)
    }

    fn entity(&self, id: AgentId) -> Result<Entity, MovementError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(MovementError::UnknownAgent(id))
    }

    fn check_bounds(&self, cell: Cell) -> Result<(), MovementError> {
        if self.grid.in_bounds(cell) {
            Ok(())
        } else {
            Err(MovementError::OutOfBounds {
                cell,
                size: self.grid.size(),
            })
        }
    }
}

impl AgentLocator for MovementEngine {
    fn agent_position(&self, agent: AgentId) -> Option<Cell> {
        self.position(agent)
    }
}
