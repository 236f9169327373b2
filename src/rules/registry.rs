// src/rules/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::errors::{PipedagError, Result};
use crate::rules::definition::TaskDefinition;

/// Task definitions in declaration order, addressable by id.
///
/// Populated once at startup; read-only for the rest of the run.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<TaskDefinition>>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every `[[task]]` and check that `after` / `from` resolve.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();
        for (order, task) in cfg.tasks().iter().enumerate() {
            registry.register(TaskDefinition::from_config(order, task, cfg.default_section())?)?;
        }
        for def in registry.tasks.iter() {
            for dep in def.after.iter().chain(def.from.iter()) {
                registry.resolve(dep)?;
            }
        }
        debug!(tasks = registry.len(), "task registry built");
        Ok(registry)
    }

    pub fn register(&mut self, def: TaskDefinition) -> Result<()> {
        if self.index.contains_key(&def.id) {
            return Err(PipedagError::DuplicateTask(def.id));
        }
        self.index.insert(def.id.clone(), self.tasks.len());
        self.tasks.push(Arc::new(def));
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<&Arc<TaskDefinition>> {
        self.index
            .get(id)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| PipedagError::UnknownTask(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskDefinition>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{DefaultSection, TaskConfig};

    fn task(id: &str) -> TaskConfig {
        toml::from_str(&format!(
            "id = \"{id}\"\ninput = [\"*.txt\"]\noutput = [\"{{1}}.{id}\"]\ncmd = \"true\""
        ))
        .unwrap()
    }

    #[test]
    fn register_rejects_duplicates_and_resolve_finds_by_id() {
        let defaults = DefaultSection::default();
        let mut reg = TaskRegistry::new();
        reg.register(TaskDefinition::from_config(0, &task("a"), &defaults).unwrap())
            .unwrap();
        reg.register(TaskDefinition::from_config(1, &task("b"), &defaults).unwrap())
            .unwrap();

        let err = reg
            .register(TaskDefinition::from_config(2, &task("a"), &defaults).unwrap())
            .unwrap_err();
        assert!(matches!(err, PipedagError::DuplicateTask(id) if id == "a"));

        assert_eq!(reg.resolve("b").unwrap().order, 1);
        assert!(matches!(reg.resolve("zzz"), Err(PipedagError::UnknownTask(_))));
        let ids: Vec<&str> = reg.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn defaults_are_inherited_and_overridden() {
        let defaults: DefaultSection = toml::from_str(
            "timeout = \"1m\"\nretries = 2\nenv = { LC_ALL = \"C\", A = \"1\" }",
        )
        .unwrap();
        let mut cfg = task("a");
        cfg.env.insert("A".into(), "2".into());
        cfg.retries = Some(0);
        let def = TaskDefinition::from_config(0, &cfg, &defaults).unwrap();
        assert_eq!(def.timeout, Some(std::time::Duration::from_secs(60)));
        assert_eq!(def.retries, 0);
        assert_eq!(def.env.get("A").map(String::as_str), Some("2"));
        assert_eq!(def.env.get("LC_ALL").map(String::as_str), Some("C"));
    }
}
