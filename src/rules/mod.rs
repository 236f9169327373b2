// src/rules/mod.rs

//! Task Registry: compiled, immutable task definitions.

pub mod definition;
pub mod registry;

pub use definition::{CommandSpec, TaskDefinition};
pub use registry::TaskRegistry;
