// src/config/mod.rs

//! Pipeline manifest loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a manifest from disk (`loader.rs`).
//! - Validate ids, references and the task-level dependency structure (`validate.rs`).
//! - Flatten the `[params]` table into a read-only lookup (`params.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod params;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, RunSettings, TaskConfig,
};
pub use params::Parameters;
