// src/state/store.rs

//! Persistence of execution records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::state::record::ExecutionRecord;

/// File name of the JSON state inside the state directory.
pub const STATE_FILE_NAME: &str = "state.json";

const STATE_FILE_VERSION: u32 = 1;

/// Abstract storage for execution records, keyed by instance id.
///
/// The scheduler only ever has one writer per instance id in flight; the
/// engine calls `persist` from its single control loop.
pub trait StateStore: Send {
    /// All known records.
    fn load(&self) -> Result<HashMap<String, ExecutionRecord>>;
    /// Insert or replace the given records.
    fn persist(&mut self, records: &[ExecutionRecord]) -> Result<()>;
    /// Drop records whose id is not in `keep`. Returns how many were removed.
    fn prune(&mut self, keep: &HashSet<String>) -> Result<usize>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    records: BTreeMap<String, ExecutionRecord>,
}

/// Stores records as JSON in `<state_dir>/state.json`.
///
/// Every write goes to a temporary file first and is renamed over the old
/// state, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileStateStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(fs: Arc<dyn FileSystem>, state_dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            path: state_dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, ExecutionRecord>> {
        if !self.fs.exists(&self.path) {
            return Ok(BTreeMap::new());
        }
        let text = self.fs.read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let file: StateFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing state file {:?}", self.path))?;
        if file.version != STATE_FILE_VERSION {
            return Err(anyhow!(
                "unsupported state file version {} in {:?}",
                file.version,
                self.path
            ));
        }
        Ok(file.records)
    }

    fn write_all(&self, records: BTreeMap<String, ExecutionRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let file = StateFile {
            version: STATE_FILE_VERSION,
            records,
        };
        let json = serde_json::to_vec_pretty(&file).context("serializing state")?;
        let tmp = self.path.with_extension("json.tmp");
        self.fs.write(&tmp, &json)?;
        self.fs.rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<HashMap<String, ExecutionRecord>> {
        let records = self.read_all()?;
        debug!(records = records.len(), path = ?self.path, "loaded execution records");
        Ok(records.into_iter().collect())
    }

    fn persist(&mut self, records: &[ExecutionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        // A corrupt file is replaced rather than blocking every later write.
        let mut all = self.read_all().unwrap_or_default();
        for rec in records {
            all.insert(rec.instance_id.clone(), rec.clone());
        }
        self.write_all(all)?;
        debug!(count = records.len(), "persisted execution records (file)");
        Ok(())
    }

    fn prune(&mut self, keep: &HashSet<String>) -> Result<usize> {
        let mut all = self.read_all()?;
        let initial_len = all.len();
        all.retain(|k, _| keep.contains(k));
        let removed = initial_len - all.len();
        if removed > 0 {
            self.write_all(all)?;
            info!(removed, "pruned stale execution records (file)");
        }
        Ok(removed)
    }
}

/// Keeps records in process memory. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    map: Arc<Mutex<HashMap<String, ExecutionRecord>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one record (for tests and diagnostics).
    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.map.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<HashMap<String, ExecutionRecord>> {
        let map = self
            .map
            .lock()
            .map_err(|_| anyhow!("state map lock poisoned"))?;
        Ok(map.clone())
    }

    fn persist(&mut self, records: &[ExecutionRecord]) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| anyhow!("state map lock poisoned"))?;
        for rec in records {
            map.insert(rec.instance_id.clone(), rec.clone());
        }
        Ok(())
    }

    fn prune(&mut self, keep: &HashSet<String>) -> Result<usize> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| anyhow!("state map lock poisoned"))?;
        let initial_len = map.len();
        map.retain(|k, _| keep.contains(k));
        let removed = initial_len - map.len();
        if removed > 0 {
            info!(removed, "pruned stale execution records (memory)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::InstanceStatus;
    use crate::fs::mock::MockFileSystem;

    fn record(id: &str, status: InstanceStatus) -> ExecutionRecord {
        ExecutionRecord::new(id, "t", status)
    }

    #[test]
    fn file_store_upserts_and_survives_reopen() {
        let fs = Arc::new(MockFileSystem::new());
        let mut store = FileStateStore::new(fs.clone(), ".pipedag");
        assert!(store.load().unwrap().is_empty());

        store
            .persist(&[record("a", InstanceStatus::Running), record("b", InstanceStatus::Succeeded)])
            .unwrap();
        store.persist(&[record("a", InstanceStatus::Succeeded)]).unwrap();

        let reopened = FileStateStore::new(fs.clone(), ".pipedag");
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].status, InstanceStatus::Succeeded);
        assert!(!fs.exists(Path::new(".pipedag/state.json.tmp")));
    }

    #[test]
    fn corrupt_state_is_an_error_on_load_but_not_on_persist() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file(".pipedag/state.json", "{ not json");
        let mut store = FileStateStore::new(fs, ".pipedag");
        assert!(store.load().is_err());
        store.persist(&[record("a", InstanceStatus::Failed)]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn prune_keeps_only_live_ids() {
        let mut store = MemoryStateStore::new();
        store
            .persist(&[record("a", InstanceStatus::Succeeded), record("b", InstanceStatus::Succeeded)])
            .unwrap();
        let keep: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(store.prune(&keep).unwrap(), 1);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }
}
