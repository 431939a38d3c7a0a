//! Sparse obstacle grid.
//!
//! Only blocked cells are stored, so memory scales with the number of
//! obstacles rather than the grid volume. Bounds are `0..=size` on every
//! axis.
//!
//! Two kinds of blockage are tracked separately:
//! - static obstacles (terrain, walls): changes bump [`ObstacleGrid::revision`]
//!   so path caches can tell when a stored route may cross a new wall;
//! - agent occupancy: reference counted, transient, does not bump the
//!   revision.

use crate::cell::Cell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct ObstacleGrid {
    size: i32,
    obstacles: HashSet<Cell>,
    occupants: HashMap<Cell, u32>,
    revision: u64,
}

impl ObstacleGrid {
    pub fn new(size: i32) -> Self {
        Self {
            size: size.max(0),
            ..Self::default()
        }
    }

    /// Build a grid with an initial obstacle set.
    pub fn with_obstacles(size: i32, obstacles: impl IntoIterator<Item = Cell>) -> Self {
        let mut grid = Self::new(size);
        for cell in obstacles {
            grid.add_obstacle(cell);
        }
        grid
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        let range = 0..=self.size;
        range.contains(&cell.x) && range.contains(&cell.y) && range.contains(&cell.z)
    }

    /// Static obstacle or occupied by an agent.
    pub fn is_obstacle(&self, cell: Cell) -> bool {
        self.obstacles.contains(&cell) || self.occupants.contains_key(&cell)
    }

    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && !self.is_obstacle(cell)
    }

    /// Returns true if the cell was not already an obstacle.
    pub fn add_obstacle(&mut self, cell: Cell) -> bool {
        let inserted = self.obstacles.insert(cell);
        if inserted {
            self.revision += 1;
        }
        inserted
    }

    /// Returns true if the cell was an obstacle.
    pub fn remove_obstacle(&mut self, cell: Cell) -> bool {
        let removed = self.obstacles.remove(&cell);
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Static obstacles in ascending cell order.
    pub fn obstacles(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self.obstacles.iter().copied().collect();
        cells.sort();
        cells
    }

    /// Incremented on every static obstacle change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn occupy(&mut self, cell: Cell) {
        *self.occupants.entry(cell).or_insert(0) += 1;
    }

    pub fn vacate(&mut self, cell: Cell) {
        if let Some(count) = self.occupants.get_mut(&cell) {
            *count -= 1;
            if *count == 0 {
                self.occupants.remove(&cell);
            }
        }
    }

    pub fn occupant_count(&self, cell: Cell) -> u32 {
        self.occupants.get(&cell).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        if !self.obstacles.is_empty() {
            self.revision += 1;
        }
        self.obstacles.clear();
        self.occupants.clear();
    }
}
