//! Greedy grid pathfinding.
//!
//! Agents never search the whole graph. Each tick they ask [`next_step`] for
//! a single cell that reduces the largest axis delta toward the goal, falling
//! back to a 26-neighbour local search when both preferred axes are blocked.
//! This keeps the per-agent cost constant (26 neighbour checks worst case)
//! at the price of sometimes suboptimal or looping routes.
//!
//! The movement engine's stuck recovery only fires for an agent that cannot
//! step at all. An agent bouncing between two walkable cells behind a wall
//! steps every tick, so its stuck timer never builds up; such loops end only
//! when the owning haul task hits `task_timeout_ms`.
//!
//! [`Pathfinder::find_path`] unwinds `next_step` into a full route for
//! diagnostics and visualization, with a TTL cache keyed by (start, goal).

use crate::cell::{Axis, Cell};
use crate::grid::ObstacleGrid;
use std::collections::HashMap;

/// Compute the next cell to move to from `current` toward `goal`.
///
/// Returns `None` when `current == goal` or when no walkable neighbour
/// exists. Callers that need to tell the two apart must compare positions
/// first.
pub fn next_step(grid: &ObstacleGrid, current: Cell, goal: Cell) -> Option<Cell> {
    if current == goal {
        return None;
    }

    // Stable sort keeps x > y > z on equal deltas.
    let mut axes = Axis::ALL.map(|axis| (axis, current.delta(&goal, axis)));
    axes.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()));

    for &(axis, delta) in axes.iter().take(2) {
        if delta == 0 {
            break;
        }
        let candidate = current.step(axis, delta);
        if grid.is_walkable(candidate) {
            return Some(candidate);
        }
    }

    local_search(grid, current, goal)
}

/// Pick the walkable neighbour closest to `goal` (Euclidean).
///
/// Neighbours are visited in nested dx, dy, dz order from -1 to 1, and only
/// a strictly closer cell replaces the current best, so ties go to the
/// first one visited. That favours negative offsets; it is deterministic
/// but not geometrically neutral.
pub fn local_search(grid: &ObstacleGrid, current: Cell, goal: Cell) -> Option<Cell> {
    let mut best: Option<(Cell, i64)> = None;

    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                let candidate = current.offset(dx, dy, dz);
                if !grid.is_walkable(candidate) {
                    continue;
                }
                let dist = candidate.distance_squared(&goal);
                if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                    best = Some((candidate, dist));
                }
            }
        }
    }

    best.map(|(cell, _)| cell)
}

#[derive(Debug, Clone)]
struct CachedPath {
    path: Vec<Cell>,
    created_at_ms: u64,
    revision: u64,
}

/// Full-path unwinding with a time-bounded cache.
#[derive(Debug, Clone)]
pub struct Pathfinder {
    cache: HashMap<(Cell, Cell), CachedPath>,
    ttl_ms: u64,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl Default for Pathfinder {
    fn default() -> Self {
        Self::new(
            crate::constants::PATH_CACHE_TTL_MS,
            crate::constants::PATH_CACHE_CAPACITY,
        )
    }
}

impl Pathfinder {
    pub fn new(ttl_ms: u64, capacity: usize) -> Self {
        Self {
            cache: HashMap::new(),
            ttl_ms,
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Route from `start` toward `goal`, always beginning with `start`.
    ///
    /// Stops at the goal, after `max_steps` iterations, or when the walker is
    /// trapped, so unreachable goals yield a partial path. Cached entries are
    /// reused only while younger than the TTL *and* computed against the
    /// grid's current obstacle revision.
    pub fn find_path(
        &mut self,
        grid: &ObstacleGrid,
        start: Cell,
        goal: Cell,
        max_steps: usize,
        now_ms: u64,
    ) -> Vec<Cell> {
        let key = (start, goal);
        if let Some(cached) = self.cache.get(&key) {
            let fresh = now_ms.saturating_sub(cached.created_at_ms) < self.ttl_ms;
            if fresh && cached.revision == grid.revision() {
                self.hits += 1;
                return cached.path.clone();
            }
        }
        self.misses += 1;

        let path = walk(grid, start, goal, max_steps);

        if !self.cache.contains_key(&key) && self.cache.len() >= self.capacity {
            self.evict(now_ms);
        }
        self.cache.insert(
            key,
            CachedPath {
                path: path.clone(),
                created_at_ms: now_ms,
                revision: grid.revision(),
            },
        );

        path
    }

    /// Drop expired entries; if none expired, drop the oldest one.
    fn evict(&mut self, now_ms: u64) {
        let ttl = self.ttl_ms;
        self.cache
            .retain(|_, entry| now_ms.saturating_sub(entry.created_at_ms) < ttl);
        if self.cache.len() >= self.capacity {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|(key, entry)| (entry.created_at_ms, **key))
                .map(|(key, _)| *key);
            if let Some(key) = oldest {
                self.cache.remove(&key);
            }
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// (hits, misses) since creation.
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

fn walk(grid: &ObstacleGrid, start: Cell, goal: Cell, max_steps: usize) -> Vec<Cell> {
    let mut path = vec![start];
    let mut current = start;
    for _ in 0..max_steps {
        if current == goal {
            break;
        }
        match next_step(grid, current, goal) {
            Some(next) => {
                path.push(next);
                current = next;
            }
            None => break,
        }
    }
    path
}
