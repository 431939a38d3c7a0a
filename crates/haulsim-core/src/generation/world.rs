//! World generation: obstacles, stockpiles, construction sites and workers.

use std::collections::HashSet;

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use haulsim_logic::cell::Cell;
use haulsim_logic::constants::resource_types;
use haulsim_logic::ids::{AgentId, BlockKey, SiteId, SlotKey, StockpileId};

use crate::stores::{ConstructionSites, Stockpiles};
use crate::systems::{MovementEngine, MovementError};

/// Attempts per cell before a placement is skipped.
const PLACEMENT_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Number of z levels used, starting at 0.
    pub levels: i32,
    /// Fraction of cells in the used levels that become obstacles.
    pub obstacle_density: f32,
    pub workers: u32,
    pub stockpiles: u32,
    pub slots_per_stockpile: u32,
    pub slot_quantity: u32,
    pub sites: u32,
    pub blocks_per_site: u32,
    pub block_requirement: u32,
    /// How many of `resource_types::ALL` appear, from the front.
    pub resource_kinds: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            levels: 1,
            obstacle_density: 0.08,
            workers: 12,
            stockpiles: 3,
            slots_per_stockpile: 4,
            slot_quantity: 40,
            sites: 4,
            blocks_per_site: 3,
            block_requirement: 12,
            resource_kinds: 3,
        }
    }
}

/// What was placed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldLayout {
    pub workers: Vec<AgentId>,
    pub stockpiles: Vec<StockpileId>,
    pub sites: Vec<SiteId>,
    pub obstacles: usize,
}

/// Populate empty stores and an empty movement engine.
///
/// Feature cells (worker spawns, slots, blocks) are placed first and are
/// never covered by obstacles.
pub fn generate_world(
    movement: &mut MovementEngine,
    stockpiles: &mut Stockpiles,
    sites: &mut ConstructionSites,
    config: &WorldConfig,
    rng: &mut impl Rng,
) -> Result<WorldLayout, MovementError> {
    let size = movement.grid().size();
    let levels = config.levels.clamp(1, size + 1);
    let kinds = config.resource_kinds.clamp(1, resource_types::ALL.len());
    let mut used: HashSet<Cell> = HashSet::new();
    let mut layout = WorldLayout::default();

    for p in 0..config.stockpiles {
        let id = StockpileId(p + 1);
        stockpiles.add_stockpile(id);
        for s in 0..config.slots_per_stockpile {
            let Some(cell) = pick_free(rng, &mut used, size, levels) else {
                continue;
            };
            let resource = resource_types::ALL[((p * config.slots_per_stockpile + s) as usize) % kinds];
            stockpiles.add_slot(id, SlotKey(s), cell, resource, config.slot_quantity);
        }
        layout.stockpiles.push(id);
    }

    for i in 0..config.sites {
        let id = SiteId(i + 1);
        sites.add_site(id, rng.gen_range(0..=100));
        for b in 0..config.blocks_per_site {
            let Some(cell) = pick_free(rng, &mut used, size, levels) else {
                continue;
            };
            let resource = resource_types::ALL[rng.gen_range(0..kinds)];
            sites.add_block(id, BlockKey(b), cell, resource, config.block_requirement);
        }
        layout.sites.push(id);
    }

    for i in 0..config.workers {
        let Some(cell) = pick_free(rng, &mut used, size, levels) else {
            continue;
        };
        let id = AgentId(i);
        movement.spawn_agent(id, cell)?;
        layout.workers.push(id);
    }

    let span = (size + 1) as f32;
    let target = (config.obstacle_density.clamp(0.0, 1.0) * span * span * levels as f32) as usize;
    for _ in 0..target {
        if let Some(cell) = pick_free(rng, &mut used, size, levels) {
            movement.add_obstacle(cell);
            layout.obstacles += 1;
        }
    }

    info!(
        "generated world: {} workers, {} stockpiles, {} sites, {} obstacles",
        layout.workers.len(),
        layout.stockpiles.len(),
        layout.sites.len(),
        layout.obstacles
    );
    Ok(layout)
}

fn pick_free(rng: &mut impl Rng, used: &mut HashSet<Cell>, size: i32, levels: i32) -> Option<Cell> {
    for _ in 0..PLACEMENT_ATTEMPTS {
        let cell = Cell::new(
            rng.gen_range(0..=size),
            rng.gen_range(0..=size),
            rng.gen_range(0..levels),
        );
        if used.insert(cell) {
            return Some(cell);
        }
    }
    None
}
