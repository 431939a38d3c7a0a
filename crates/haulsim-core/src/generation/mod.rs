//! Generation - seeded procedural worlds for the harness, tests and benches.

mod world;

pub use world::*;
