//! Systems - logic that operates on agents and tasks

mod hauling;
mod movement;

pub use hauling::*;
pub use movement::*;
