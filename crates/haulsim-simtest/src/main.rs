//! haulsim Headless Simulation Harness
//!
//! Validates the movement and hauling engines without any frontend.
//! Runs entirely in-process: fixed scenarios first, then a seeded soak
//! that checks invariants after every tick.
//!
//! Usage:
//!   cargo run -p haulsim-simtest
//!   cargo run -p haulsim-simtest -- --verbose
//!   cargo run -p haulsim-simtest -- --seed 7 --seconds 300 --config sim.json --report

use std::collections::HashSet;

use haulsim_core::engine::SimulationEngine;
use haulsim_core::generation::WorldConfig;
use haulsim_core::persistence::snapshot_simulation;
use haulsim_core::systems::{MovementEngine, TickOutcome, WorkAllocator, WorkContext};
use haulsim_core::stores::{ConstructionSites, Stockpiles};
use haulsim_logic::cell::Cell;
use haulsim_logic::config::{HaulingConfig, MovementConfig, SimConfig};
use haulsim_logic::constants::resource_types::{IRON, WOOD};
use haulsim_logic::grid::ObstacleGrid;
use haulsim_logic::haul::{CancelReason, EndReason, TaskPriority, TaskStatus};
use haulsim_logic::ids::{AgentId, BlockKey, SiteId, SlotKey, StockpileId};
use haulsim_logic::pathfinding::Pathfinder;
use log::{error, info};
use tracing_subscriber::EnvFilter;

// ── Options ─────────────────────────────────────────────────────────────

struct Options {
    verbose: bool,
    report: bool,
    seed: u64,
    seconds: u64,
    config: SimConfig,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        verbose: false,
        report: false,
        seed: 42,
        seconds: 120,
        config: SimConfig::default(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--verbose" => options.verbose = true,
            "--report" => options.report = true,
            "--seed" => options.seed = parse_value(&arg, args.next())?,
            "--seconds" => options.seconds = parse_value(&arg, args.next())?,
            "--config" => {
                let path = args.next().ok_or("--config needs a file path")?;
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {path}: {e}"))?;
                options.config = SimConfig::from_json(&raw).map_err(|e| format!("{path}: {e}"))?;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(options)
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: cannot parse {value:?}"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn main() {
    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            eprintln!(
                "usage: haulsim-simtest [--verbose] [--report] [--seed N] [--seconds N] [--config FILE]"
            );
            std::process::exit(2);
        }
    };
    init_tracing(options.verbose);
    let verbose = options.verbose;
    println!("=== haulsim Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Pathfinding scenario and cache determinism
    results.extend(validate_pathfinding(verbose));

    // 2. Movement: arrival and stuck recovery
    results.extend(validate_movement(verbose));

    // 3. Work allocation: priority and reservation races
    results.extend(validate_allocation(verbose));

    // 4. Seeded soak with invariants
    results.extend(validate_soak(&options));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        error!("{failed} check(s) failed");
        std::process::exit(1);
    }
}

// ── 1. Pathfinding ──────────────────────────────────────────────────────

fn validate_pathfinding(verbose: bool) -> Vec<TestResult> {
    println!("--- Pathfinding ---");
    let mut results = Vec::new();

    let obstacle = Cell::new(2, 25, 2);
    let start = Cell::new(0, 25, 2);
    let goal = Cell::new(5, 25, 2);
    let grid = ObstacleGrid::with_obstacles(25, [obstacle]);
    let mut pathfinder = Pathfinder::new(5_000, 64);

    let path = pathfinder.find_path(&grid, start, goal, 100, 0);
    if verbose {
        let cells: Vec<String> = path.iter().map(|c| c.to_string()).collect();
        println!("  path: {}", cells.join(" → "));
    }

    results.push(TestResult {
        name: "path_avoids_obstacle".into(),
        passed: !path.contains(&obstacle),
        detail: format!("{} cells, obstacle at {}", path.len(), obstacle),
    });

    results.push(TestResult {
        name: "path_reaches_goal".into(),
        passed: path.first() == Some(&start) && path.last() == Some(&goal),
        detail: format!("first {:?}, last {:?}", path.first(), path.last()),
    });

    // Consecutive cells are neighbours
    let connected = path.windows(2).all(|w| w[0].is_adjacent(&w[1]));
    results.push(TestResult {
        name: "path_connected".into(),
        passed: connected,
        detail: "every step moves to one of 26 neighbours".into(),
    });

    let cached = pathfinder.find_path(&grid, start, goal, 100, 1_000);
    let (hits, _) = pathfinder.cache_stats();
    results.push(TestResult {
        name: "path_cache_hit".into(),
        passed: cached == path && hits == 1,
        detail: format!("{hits} hit(s) within TTL"),
    });

    let expired = pathfinder.find_path(&grid, start, goal, 100, 10_000);
    results.push(TestResult {
        name: "path_deterministic_after_expiry".into(),
        passed: expired == path,
        detail: "recomputed path equals the cached one".into(),
    });

    // Unreachable goal yields a partial path, never an error
    let mut walled = ObstacleGrid::new(10);
    let sealed = Cell::new(5, 5, 5);
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                if (dx, dy, dz) != (0, 0, 0) {
                    walled.add_obstacle(sealed.offset(dx, dy, dz));
                }
            }
        }
    }
    let partial = Pathfinder::new(5_000, 8).find_path(&walled, Cell::ORIGIN, sealed, 100, 0);
    results.push(TestResult {
        name: "path_partial_when_unreachable".into(),
        passed: !partial.is_empty() && partial.last() != Some(&sealed),
        detail: format!("{} cells toward a sealed goal", partial.len()),
    });

    results
}

// ── 2. Movement ─────────────────────────────────────────────────────────

fn validate_movement(_verbose: bool) -> Vec<TestResult> {
    println!("--- Movement ---");
    let mut results = Vec::new();

    let config = MovementConfig {
        grid_size: 25,
        stuck_threshold_ms: 3_000,
        tick_interval_ms: 100,
        ..Default::default()
    };

    // Arrival is idempotent
    let mut engine = MovementEngine::new(config.clone());
    let id = AgentId(1);
    let home = Cell::new(3, 3, 3);
    let _ = engine.spawn_agent(id, home);
    let _ = engine.set_goal(id, home);
    let outcomes: Vec<TickOutcome> = (0..5)
        .filter_map(|_| engine.tick_agent(id, 100).ok())
        .collect();
    let idle_after = outcomes.iter().skip(1).all(|o| *o == TickOutcome::Idle);
    let stuck = engine.agent(id).map_or(u32::MAX, |a| a.stuck_ms);
    results.push(TestResult {
        name: "movement_arrival_idempotent".into(),
        passed: outcomes.first() == Some(&TickOutcome::Arrived) && idle_after && stuck == 0,
        detail: format!("{outcomes:?}, stuck {stuck}ms"),
    });

    // Boxed-in agent snaps to its target on the 30th blocked tick
    let mut engine = MovementEngine::new(config);
    let id = AgentId(2);
    let start = Cell::new(10, 10, 10);
    let target = Cell::new(20, 10, 10);
    let _ = engine.spawn_agent(id, start);
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                if (dx, dy, dz) != (0, 0, 0) {
                    engine.add_obstacle(start.offset(dx, dy, dz));
                }
            }
        }
    }
    let _ = engine.set_goal(id, target);

    let mut recovered_on = None;
    for tick in 1..=40 {
        if let Ok(TickOutcome::Recovered(_)) = engine.tick_agent(id, 100) {
            recovered_on = Some(tick);
            break;
        }
    }
    let view = engine.agent(id);
    results.push(TestResult {
        name: "movement_recovery_on_30th_tick".into(),
        passed: recovered_on == Some(30),
        detail: format!("recovered on tick {recovered_on:?}"),
    });
    results.push(TestResult {
        name: "movement_recovery_state".into(),
        passed: view.as_ref().is_some_and(|v| {
            v.position == target && v.stuck_ms == 0 && v.recoveries == 1
        }),
        detail: format!(
            "position {:?}, recoveries {:?}",
            view.as_ref().map(|v| v.position),
            view.as_ref().map(|v| v.recoveries)
        ),
    });

    results
}

// ── 3. Work allocation ──────────────────────────────────────────────────

/// Stockpile with one slot per entry and an empty construction set.
fn slot_stores(slots: &[(Cell, u8, u32)]) -> (Stockpiles, ConstructionSites) {
    let mut piles = Stockpiles::new();
    piles.add_stockpile(StockpileId(1));
    for (i, &(cell, resource, quantity)) in slots.iter().enumerate() {
        piles.add_slot(StockpileId(1), SlotKey(i as u32), cell, resource, quantity);
    }
    (piles, ConstructionSites::new())
}

fn validate_allocation(_verbose: bool) -> Vec<TestResult> {
    println!("--- Work Allocation ---");
    let mut results = Vec::new();
    let nobody = |_: AgentId| -> Option<Cell> { None };

    // HIGH beats LOW at equal distance, even when LOW was queued first
    let (mut piles, mut sites) = slot_stores(&[(Cell::new(10, 10, 0), WOOD, 50)]);
    sites.add_site(SiteId(1), 10);
    sites.add_block(SiteId(1), BlockKey(0), Cell::new(4, 10, 0), WOOD, 5);
    sites.add_site(SiteId(2), 60);
    sites.add_block(SiteId(2), BlockKey(0), Cell::new(16, 10, 0), WOOD, 5);

    let mut alloc = WorkAllocator::new(HaulingConfig::default());
    alloc.update(
        100,
        &mut WorkContext {
            construction: &mut sites,
            stockpiles: &mut piles,
            agents: &nobody,
        },
    );
    let assigned = alloc
        .request_task(AgentId(1), Cell::new(10, 0, 0), &mut piles)
        .map(|t| (t.priority, t.destination.site_id));
    results.push(TestResult {
        name: "alloc_high_before_low".into(),
        passed: assigned == Some((TaskPriority::High, SiteId(2))),
        detail: format!("assigned {assigned:?}"),
    });

    // Second agent for a slot with too little stock loses the race
    let (mut piles, mut sites) = slot_stores(&[(Cell::new(2, 2, 0), IRON, 8)]);
    sites.add_site(SiteId(1), 50);
    sites.add_block(SiteId(1), BlockKey(0), Cell::new(9, 2, 0), IRON, 8);
    sites.add_site(SiteId(2), 50);
    sites.add_block(SiteId(2), BlockKey(0), Cell::new(9, 9, 0), IRON, 8);

    let mut alloc = WorkAllocator::new(HaulingConfig::default());
    let created = alloc.scan_for_needs(&sites, &piles);
    let first = alloc
        .request_task(AgentId(1), Cell::ORIGIN, &mut piles)
        .map(|t| t.id);
    let second = alloc
        .request_task(AgentId(2), Cell::ORIGIN, &mut piles)
        .map(|t| t.id);
    let race_cancelled = alloc.tasks().any(|t| {
        t.status() == TaskStatus::Cancelled
            && t.end_reason() == Some(EndReason::Cancelled(CancelReason::ReservationFailed))
    });
    results.push(TestResult {
        name: "alloc_reservation_race".into(),
        passed: created == 2 && first.is_some() && second.is_none() && race_cancelled,
        detail: format!(
            "created {created}, first {first:?}, second {second:?}, {} failure(s)",
            alloc.stats().reservation_failures
        ),
    });
    results.push(TestResult {
        name: "alloc_race_ledger".into(),
        passed: piles.ledger_balanced() && piles.outstanding_reservations() == 1,
        detail: format!("{:?}", piles.ledger()),
    });

    results
}

// ── 4. Soak ─────────────────────────────────────────────────────────────

fn soak_engine(options: &Options) -> Result<SimulationEngine, String> {
    let mut engine = SimulationEngine::new(options.config.clone());
    let world = WorldConfig {
        workers: 40,
        sites: 8,
        ..Default::default()
    };
    engine
        .generate(&world, options.seed)
        .map_err(|e| e.to_string())?;
    Ok(engine)
}

/// Check assignment invariants; returns a description of the first violation.
fn assignment_violation(engine: &SimulationEngine) -> Option<String> {
    let mut holders = HashSet::new();
    for task in engine.hauling.tasks() {
        if task.status() != TaskStatus::Active {
            continue;
        }
        let Some(agent) = task.assigned_agent() else {
            return Some(format!("{} is active without an agent", task.id));
        };
        if !holders.insert(agent) {
            return Some(format!("{agent} holds more than one active task"));
        }
        if engine.hauling.task_for_agent(agent).map(|t| t.id) != Some(task.id) {
            return Some(format!("{agent} does not map back to {}", task.id));
        }
    }
    None
}

fn validate_soak(options: &Options) -> Vec<TestResult> {
    println!("--- Soak (seed {}, {}s) ---", options.seed, options.seconds);
    let mut results = Vec::new();

    let (mut engine, mut twin) = match (soak_engine(options), soak_engine(options)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            results.push(TestResult {
                name: "soak_generate".into(),
                passed: false,
                detail: e,
            });
            return results;
        }
    };

    let ticks = options.seconds * 1_000 / u64::from(options.config.movement.tick_interval_ms);
    let save_at = ticks / 2;
    let mut violation = None;
    let mut unbalanced_at = None;
    let mut reloaded: Option<SimulationEngine> = None;

    for tick in 0..ticks {
        engine.step();
        twin.step();
        if let Some(loaded) = reloaded.as_mut() {
            loaded.step();
        }

        if violation.is_none() {
            violation = assignment_violation(&engine).map(|v| format!("tick {tick}: {v}"));
        }
        if unbalanced_at.is_none() && !engine.stockpiles.ledger_balanced() {
            unbalanced_at = Some(tick);
        }

        if tick + 1 == save_at {
            let mut buffer = Vec::new();
            reloaded = engine
                .save(&mut buffer)
                .and_then(|_| haulsim_core::persistence::load_simulation(&buffer[..]))
                .map_err(|e| error!("save/load failed: {e}"))
                .ok();
        }

        if options.verbose && (tick + 1) % 600 == 0 {
            let stats = engine.stats();
            info!(
                "t={}s completed={} active={} pending={} recoveries={}",
                stats.sim_time_ms / 1_000,
                stats.hauling.completed,
                stats.hauling.active,
                stats.hauling.pending,
                stats.movement.recoveries
            );
        }
    }

    let stats = engine.stats();
    results.push(TestResult {
        name: "soak_no_double_assignment".into(),
        passed: violation.is_none(),
        detail: violation.unwrap_or_else(|| format!("{ticks} ticks checked")),
    });
    results.push(TestResult {
        name: "soak_ledger_balanced".into(),
        passed: unbalanced_at.is_none(),
        detail: match unbalanced_at {
            Some(tick) => format!("ledger out of balance at tick {tick}"),
            None => format!("{:?}", stats.reservations),
        },
    });
    results.push(TestResult {
        name: "soak_progress".into(),
        passed: ticks == 0 || stats.movement.cells_moved > 0,
        detail: format!(
            "{} completed, {} delivered, {} cells moved",
            stats.hauling.completed, stats.hauling.quantity_delivered, stats.movement.cells_moved
        ),
    });
    results.push(TestResult {
        name: "soak_deterministic".into(),
        passed: snapshot_simulation(&engine) == snapshot_simulation(&twin),
        detail: "two runs from the same seed end identically".into(),
    });
    if save_at > 0 {
        let matches = reloaded
            .as_ref()
            .is_some_and(|loaded| snapshot_simulation(loaded) == snapshot_simulation(&engine));
        results.push(TestResult {
            name: "soak_save_load_continues".into(),
            passed: matches,
            detail: format!("saved at tick {save_at}, compared at tick {ticks}"),
        });
    }

    if options.report {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("cannot encode report: {e}"),
        }
    }

    results
}
