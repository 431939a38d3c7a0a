//! Integration tests for the full work cycle.
//!
//! Exercises: world generation → dispatch → MovementEngine tick →
//! WorkAllocator update → stockpile/site bookkeeping → save/load
//!
//! Everything runs through `SimulationEngine::step` on seeded worlds.

use std::collections::HashSet;

use haulsim_core::engine::SimulationEngine;
use haulsim_core::generation::WorldConfig;
use haulsim_core::persistence::snapshot_simulation;
use haulsim_core::systems::MovementEvent;
use haulsim_logic::cell::Cell;
use haulsim_logic::config::{MovementConfig, SimConfig};
use haulsim_logic::constants::resource_types::{STONE, WOOD};
use haulsim_logic::haul::{TaskEvent, TaskPriority, TaskStatus};
use haulsim_logic::ids::{AgentId, BlockKey, SiteId, SlotKey, StockpileId};

// ── Helpers ────────────────────────────────────────────────────────────

fn config(grid_size: i32) -> SimConfig {
    SimConfig {
        movement: MovementConfig {
            grid_size,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn seeded(seed: u64) -> SimulationEngine {
    let mut engine = SimulationEngine::new(config(24));
    let world = WorldConfig {
        workers: 20,
        sites: 6,
        ..Default::default()
    };
    engine.generate(&world, seed).unwrap();
    engine
}

/// Every active task has exactly one agent, and that agent maps back to it.
fn assert_unique_assignments(engine: &SimulationEngine) {
    let mut holders = HashSet::new();
    for task in engine.hauling.tasks() {
        match task.status() {
            TaskStatus::Active => {
                let agent = task.assigned_agent().expect("active task without agent");
                assert!(holders.insert(agent), "{agent} holds two active tasks");
                assert_eq!(
                    engine.hauling.task_for_agent(agent).map(|t| t.id),
                    Some(task.id)
                );
            }
            TaskStatus::Pending => assert!(task.assigned_agent().is_none()),
            _ => {}
        }
    }
}

/// Wall off every neighbour of `center`.
fn box_in(engine: &mut SimulationEngine, center: Cell) {
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                if (dx, dy, dz) != (0, 0, 0) {
                    engine.movement.add_obstacle(center.offset(dx, dy, dz));
                }
            }
        }
    }
}

// ============================================================================
// SOAK
// ============================================================================

#[test]
fn soak_never_double_assigns() {
    let mut engine = seeded(21);
    for _ in 0..1_500 {
        engine.step();
        assert_unique_assignments(&engine);
        assert!(engine.stockpiles.ledger_balanced());
    }
    let stats = engine.stats();
    assert!(stats.hauling.completed > 0);
    assert_eq!(
        stats.hauling.quantity_delivered,
        engine.sites.total_delivered()
    );
}

#[test]
fn reservations_end_exactly_once() {
    let mut engine = seeded(4);
    for _ in 0..1_000 {
        let report = engine.step();
        for event in &report.task_events {
            // Pickup already consumed the reservation
            if let TaskEvent::Completed { .. } = event {
                assert!(event.release().is_none());
            }
        }
    }
    let ledger = engine.stockpiles.ledger();
    assert_eq!(ledger.reserved, engine.stats().hauling.started);
    assert_eq!(
        ledger.reserved,
        ledger.released + ledger.consumed + engine.stockpiles.outstanding_reservations() as u64
    );
    assert_eq!(
        engine.stockpiles.outstanding_reservations(),
        engine
            .hauling
            .tasks()
            .filter(|t| t.holds_reservation())
            .count()
    );
}

#[test]
fn same_seed_same_run() {
    let mut a = seeded(77);
    let mut b = seeded(77);
    for _ in 0..500 {
        a.step();
        b.step();
    }
    assert_eq!(snapshot_simulation(&a), snapshot_simulation(&b));
    assert_eq!(a.stats(), b.stats());
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn boxed_in_worker_recovers_and_delivers() {
    let mut engine = SimulationEngine::new(config(20));
    let home = Cell::new(5, 5, 0);
    let slot = Cell::new(10, 5, 0);
    engine.stockpiles.add_stockpile(StockpileId(1));
    engine
        .stockpiles
        .add_slot(StockpileId(1), SlotKey(0), slot, STONE, 30);
    engine.sites.add_site(SiteId(1), 60);
    engine
        .sites
        .add_block(SiteId(1), BlockKey(0), Cell::new(15, 8, 0), STONE, 5);
    engine.spawn_worker(AgentId(1), home).unwrap();
    box_in(&mut engine, home);

    let mut recoveries = Vec::new();
    let mut completed = 0;
    for _ in 0..150 {
        let report = engine.step();
        recoveries.extend(report.movement_events.into_iter().filter_map(|e| match e {
            MovementEvent::Recovered { to, .. } => Some(to),
            _ => None,
        }));
        completed += report
            .task_events
            .iter()
            .filter(|e| matches!(e, TaskEvent::Completed { .. }))
            .count();
    }

    assert_eq!(recoveries, vec![slot]);
    assert_eq!(engine.movement.agent(AgentId(1)).unwrap().recoveries, 1);
    assert_eq!(completed, 1);
    assert_eq!(engine.sites.total_delivered(), 5);
    assert_eq!(engine.stockpiles.total(STONE), 25);
    assert!(engine.stockpiles.ledger_balanced());
}

#[test]
fn high_priority_site_served_first() {
    let mut engine = SimulationEngine::new(config(20));
    engine.stockpiles.add_stockpile(StockpileId(1));
    engine
        .stockpiles
        .add_slot(StockpileId(1), SlotKey(0), Cell::new(8, 8, 0), WOOD, 40);
    // Low priority site is created first so queue order favours it
    engine.sites.add_site(SiteId(1), 10);
    engine
        .sites
        .add_block(SiteId(1), BlockKey(0), Cell::new(2, 8, 0), WOOD, 6);
    engine.sites.add_site(SiteId(2), 90);
    engine
        .sites
        .add_block(SiteId(2), BlockKey(0), Cell::new(14, 8, 0), WOOD, 6);
    engine.spawn_worker(AgentId(1), Cell::new(8, 0, 0)).unwrap();

    engine.step();
    assert_eq!(engine.hauling.pending_count(), 2);
    engine.step();

    let task = engine.hauling.task_for_agent(AgentId(1)).unwrap();
    assert_eq!(task.priority, TaskPriority::Urgent);
    assert_eq!(task.destination.site_id, SiteId(2));
    assert_eq!(engine.hauling.pending_count(), 1);
}

#[test]
fn removed_worker_frees_its_stock() {
    let mut engine = seeded(8);
    for _ in 0..40 {
        engine.step();
    }
    let busy: Vec<AgentId> = engine
        .movement
        .agent_ids()
        .into_iter()
        .filter(|&id| engine.hauling.task_for_agent(id).is_some())
        .collect();
    assert!(!busy.is_empty());

    for id in busy {
        engine.remove_worker(id).unwrap();
        assert_eq!(engine.stockpiles.reservations_held_by(id), 0);
        assert!(engine.hauling.task_for_agent(id).is_none());
    }
    assert_eq!(engine.hauling.active_count(), 0);
    assert!(engine.stockpiles.ledger_balanced());
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn save_and_load_mid_run() {
    let mut engine = seeded(33);
    for _ in 0..300 {
        engine.step();
    }

    let mut buffer = Vec::new();
    engine.save(&mut buffer).unwrap();
    let mut loaded = SimulationEngine::default();
    loaded.load(&buffer[..]).unwrap();
    assert_eq!(snapshot_simulation(&loaded), snapshot_simulation(&engine));

    // Long enough for tasks finished before the save to be purged
    for _ in 0..400 {
        engine.step();
        loaded.step();
    }
    assert_eq!(snapshot_simulation(&loaded), snapshot_simulation(&engine));
    assert_eq!(loaded.stats().hauling, engine.stats().hauling);
    assert_unique_assignments(&loaded);
    assert!(loaded.stockpiles.ledger_balanced());
}
