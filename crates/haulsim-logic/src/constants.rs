//! Design constants and resource type IDs.
//!
//! Timing values are in milliseconds of simulated time. Resource types are
//! simple `u8` constants so they serialize compactly and need no registry.

/// Fixed movement tick, independent of the caller's frame rate.
pub const MOVEMENT_TICK_MS: u32 = 100;
/// Accumulated blocked time before an agent is teleported to its goal.
pub const STUCK_THRESHOLD_MS: u32 = 3_000;
/// How often diagnostic paths are recomputed for moving agents.
pub const PATH_REFRESH_INTERVAL_MS: u32 = 500;
/// Lifetime of a cached path.
pub const PATH_CACHE_TTL_MS: u64 = 5_000;
pub const PATH_CACHE_CAPACITY: usize = 256;
/// Iteration cap for `find_path`.
pub const MAX_PATH_STEPS: usize = 100;
pub const DEFAULT_GRID_SIZE: i32 = 64;

/// Distance (in cells) at which an agent counts as arrived at a haul target.
pub const ARRIVAL_THRESHOLD: f32 = 1.5;
pub const NEED_SCAN_INTERVAL_MS: u32 = 2_000;
/// Grace window before terminal tasks are purged.
pub const TERMINAL_RETENTION_MS: u64 = 30_000;
/// Time an active task tolerates its agent being absent before it is cancelled.
pub const RESERVATION_TIMEOUT_MS: u64 = 60_000;
/// Hard limit on how long a task may stay active.
pub const TASK_TIMEOUT_MS: u64 = 300_000;
/// Score weight of one priority tier. Dominates any in-world distance.
pub const PRIORITY_WEIGHT: f32 = 1_000.0;
pub const MAX_HAUL_QUANTITY: u32 = 10;
pub const MAX_PENDING_TASKS: usize = 256;

pub mod resource_types {
    pub const WOOD: u8 = 0;
    pub const STONE: u8 = 1;
    pub const IRON: u8 = 2;
    pub const PLANKS: u8 = 3;
    pub const BRICKS: u8 = 4;
    pub const GLASS: u8 = 5;
    pub const CLAY: u8 = 6;
    pub const TOOLS: u8 = 7;

    pub const ALL: [u8; 8] = [WOOD, STONE, IRON, PLANKS, BRICKS, GLASS, CLAY, TOOLS];

    pub fn name(resource: u8) -> &'static str {
        match resource {
            WOOD => "wood",
            STONE => "stone",
            IRON => "iron",
            PLANKS => "planks",
            BRICKS => "bricks",
            GLASS => "glass",
            CLAY => "clay",
            TOOLS => "tools",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_are_unique() {
        let mut names: Vec<_> = resource_types::ALL
            .iter()
            .map(|&r| resource_types::name(r))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), resource_types::ALL.len());
        assert!(!names.contains(&"unknown"));
    }

    #[test]
    fn recovery_threshold_is_whole_ticks() {
        assert_eq!(STUCK_THRESHOLD_MS % MOVEMENT_TICK_MS, 0);
        assert_eq!(STUCK_THRESHOLD_MS / MOVEMENT_TICK_MS, 30);
    }
}
