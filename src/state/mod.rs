// src/state/mod.rs

//! State Store and Staleness Analyzer.
//!
//! - [`record`]: the persisted [`ExecutionRecord`].
//! - [`store`]: the [`StateStore`] trait with file and memory backends.
//! - [`staleness`]: per-instance up-to-date decisions.
//! - [`hash`]: input content hashing for `use_hash` tasks.

pub mod hash;
pub mod record;
pub mod staleness;
pub mod store;

use std::path::Path;
use std::sync::Arc;

pub use record::{ExecutionRecord, FailureReason};
pub use staleness::{StaleReason, Staleness, StalenessAnalyzer};
pub use store::{FileStateStore, MemoryStateStore, StateStore};

use crate::fs::FileSystem;
use crate::types::StateStorageMode;

/// Build the store selected by `[config].state_storage`.
pub fn open_store(
    mode: StateStorageMode,
    fs: Arc<dyn FileSystem>,
    state_dir: &Path,
) -> Box<dyn StateStore> {
    match mode {
        StateStorageMode::File => Box::new(FileStateStore::new(fs, state_dir)),
        StateStorageMode::Memory => Box::new(MemoryStateStore::new()),
    }
}
