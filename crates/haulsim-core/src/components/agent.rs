//! Components carried by worker entities.

use haulsim_logic::cell::Cell;
use haulsim_logic::ids::AgentId;
use serde::{Deserialize, Serialize};

/// Identity of a worker. Every agent entity has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: AgentId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub cell: Cell,
}

impl Position {
    pub fn new(cell: Cell) -> Self {
        Self { cell }
    }
}

/// Navigation toward a target cell.
///
/// Present only while the agent is moving; removed on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub target: Cell,
    /// Time spent without a walkable next step.
    pub stuck_ms: u32,
    /// Route from the last path refresh. Diagnostic only and may be stale.
    pub path: Vec<Cell>,
}

impl Movement {
    pub fn new(target: Cell) -> Self {
        Self {
            target,
            stuck_ms: 0,
            path: Vec::new(),
        }
    }
}

/// Lifetime movement counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Odometer {
    pub cells_moved: u64,
    pub distance: f64,
    pub recoveries: u32,
}
