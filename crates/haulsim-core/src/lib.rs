//! haulsim Core - Worker Movement and Hauling Engine
//!
//! An ECS-based simulation of worker agents that walk a sparse 3D grid and
//! carry construction materials from stockpiles to building sites.
//!
//! # Architecture
//!
//! The simulation uses an Entity Component System (ECS) architecture via `hecs`:
//! - **Entities**: Worker agents
//! - **Components**: Pure data attached to entities (Position, Movement, Odometer)
//! - **Systems**: Movement (greedy stepping, stuck recovery) and hauling
//!   (need scanning, reservation, assignment, task lifecycle)
//!
//! Stockpiles and construction sites sit behind the provider traits from
//! `haulsim_logic`; [`stores`] has reference implementations.
//!
//! # Example
//!
//! ```rust,no_run
//! use haulsim_core::prelude::*;
//! use haulsim_core::generation::WorldConfig;
//!
//! let mut engine = SimulationEngine::default();
//!
//! // Generate workers, stockpiles and sites
//! engine.generate(&WorldConfig::default(), 42).unwrap();
//!
//! // Run simulation
//! loop {
//!     engine.update(1.0 / 60.0); // 60 FPS
//! }
//! ```

pub mod components;
pub mod engine;
pub mod generation;
pub mod persistence;
pub mod stores;
pub mod systems;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::components::*;
    pub use crate::engine::SimulationEngine;
    pub use crate::stores::{ConstructionSites, Stockpiles};
    pub use crate::systems::{MovementEngine, WorkAllocator};
}
