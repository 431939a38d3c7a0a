//! Pure simulation logic for haulsim.
//!
//! This crate contains everything about movement and hauling that does not
//! need an ECS world or a clock of its own. Functions take plain data and
//! return results, so they are unit-testable and usable from the engine
//! crate, the headless harness, or a host game.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cell`] | Integer 3D cells, axes, distances |
//! | [`config`] | `SimConfig` with JSON loading and validation |
//! | [`constants`] | Timing defaults and resource types (u8 IDs) |
//! | [`grid`] | Sparse obstacle set with agent occupancy |
//! | [`haul`] | Haul task state machine, priority tiers, task events |
//! | [`ids`] | Typed identifiers for agents, tasks, stockpiles, sites |
//! | [`pathfinding`] | Greedy next-step, local search, cached full paths |
//! | [`providers`] | Stockpile / construction / agent-position interfaces |

pub mod cell;
pub mod config;
pub mod constants;
pub mod grid;
pub mod haul;
pub mod ids;
pub mod pathfinding;
pub mod providers;
