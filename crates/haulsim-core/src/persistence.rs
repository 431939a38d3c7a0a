//! Save/Load functionality for persisting simulation state
//!
//! Uses bincode for compact binary serialization. Agents are stored as
//! plain records and respawned on load; hauling state is checked for
//! consistency before the engine is rebuilt.

use std::io::{Read, Write};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use haulsim_logic::config::{ConfigError, SimConfig};

use crate::engine::SimulationEngine;
use crate::stores::{ConstructionSites, Stockpiles};
use crate::systems::{
    HaulingSnapshot, MovementEngine, MovementError, MovementSnapshot, RestoreError, WorkAllocator,
};

/// Version number for save file format (increment when format changes)
pub const SAVE_VERSION: u32 = 1;

/// Serializable snapshot of the simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    /// Save format version
    pub version: u32,
    pub sim_time_ms: u64,
    pub accumulator_ms: f64,
    pub time_scale: f32,
    pub config: SimConfig,
    pub movement: MovementSnapshot,
    pub hauling: HaulingSnapshot,
    pub stockpiles: Stockpiles,
    pub sites: ConstructionSites,
}

/// Errors that can occur during save/load
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("saved config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("saved agents are invalid: {0}")]
    Movement(#[from] MovementError),
    #[error("saved tasks are inconsistent: {0}")]
    Restore(#[from] RestoreError),
}

/// Capture the complete simulation.
pub fn snapshot_simulation(engine: &SimulationEngine) -> SaveData {
    SaveData {
        version: SAVE_VERSION,
        sim_time_ms: engine.sim_time_ms(),
        accumulator_ms: engine.accumulator_ms,
        time_scale: engine.time_scale(),
        config: engine.config().clone(),
        movement: engine.movement.snapshot(),
        hauling: engine.hauling.snapshot(),
        stockpiles: engine.stockpiles.clone(),
        sites: engine.sites.clone(),
    }
}

/// Rebuild an engine from saved data.
pub fn restore_simulation(data: SaveData) -> Result<SimulationEngine, SaveError> {
    if data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: data.version,
        });
    }
    data.config.validate()?;

    let movement = MovementEngine::restore(data.config.movement.clone(), data.movement)?;
    let hauling = WorkAllocator::restore(data.config.hauling.clone(), data.hauling)?;

    Ok(SimulationEngine {
        movement,
        hauling,
        stockpiles: data.stockpiles,
        sites: data.sites,
        config: data.config,
        sim_time_ms: data.sim_time_ms,
        accumulator_ms: data.accumulator_ms,
        time_scale: data.time_scale,
    })
}

/// Save the complete simulation to a writer
pub fn save_simulation<W: Write>(writer: W, engine: &SimulationEngine) -> Result<(), SaveError> {
    let data = snapshot_simulation(engine);
    bincode::serialize_into(writer, &data)?;
    info!(
        "saved simulation at {}ms ({} agents, {} tasks)",
        data.sim_time_ms,
        data.movement.agents.len(),
        data.hauling.tasks.len()
    );
    Ok(())
}

/// Load a simulation from a reader
pub fn load_simulation<R: Read>(reader: R) -> Result<SimulationEngine, SaveError> {
    let data: SaveData = bincode::deserialize_from(reader)?;
    let engine = restore_simulation(data)?;
    info!(
        "loaded simulation at {}ms ({} agents)",
        engine.sim_time_ms(),
        engine.worker_count()
    );
    Ok(engine)
}
