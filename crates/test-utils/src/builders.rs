#![allow(dead_code)]

use std::collections::BTreeMap;

use pipedag::config::{ConfigFile, ConfigSection, DefaultSection, RawConfigFile, TaskConfig};
use pipedag::errors::Result;
use pipedag::types::{StateStorageMode, TaskShape};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection {
                    concurrency: Some(2),
                    state_storage: StateStorageMode::Memory,
                    ..ConfigSection::default()
                },
                default: DefaultSection::default(),
                params: toml::Table::new(),
                task: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    /// Add `[params.<section>] <key> = <value>`.
    pub fn with_param(mut self, section: &str, key: &str, value: impl Into<toml::Value>) -> Self {
        let entry = self
            .config
            .params
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(table) = entry {
            table.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.config.config.concurrency = Some(n);
        self
    }

    pub fn with_max_passes(mut self, n: usize) -> Self {
        self.config.config.max_passes = n;
        self
    }

    pub fn with_quarantine(mut self, val: bool) -> Self {
        self.config.config.quarantine_failed_outputs = val;
        self
    }

    pub fn with_global_exclude(mut self, pattern: &str) -> Self {
        self.config.default.exclude.push(pattern.to_string());
        self
    }

    pub fn with_default_retries(mut self, n: u32) -> Self {
        self.config.default.retries = Some(n);
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.default.timeout = Some(timeout.to_string());
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`. Starts out as a `transform` running `true`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: TaskConfig {
                id: id.to_string(),
                shape: TaskShape::Transform,
                input: vec![],
                from: vec![],
                input_regex: None,
                suffix: None,
                exclude: vec![],
                output: vec![],
                after: vec![],
                mkdir: vec![],
                cmd: Some("true".to_string()),
                argv: None,
                env: BTreeMap::new(),
                params: toml::Table::new(),
                timeout: None,
                retries: None,
                required: false,
                use_hash: None,
            },
        }
    }

    pub fn shape(mut self, shape: TaskShape) -> Self {
        self.task.shape = shape;
        self
    }

    pub fn split(self) -> Self {
        self.shape(TaskShape::Split)
    }

    pub fn merge(self) -> Self {
        self.shape(TaskShape::Merge)
    }

    pub fn input(mut self, pattern: &str) -> Self {
        self.task.input.push(pattern.to_string());
        self
    }

    pub fn from(mut self, task: &str) -> Self {
        self.task.from.push(task.to_string());
        self
    }

    pub fn input_regex(mut self, re: &str) -> Self {
        self.task.input_regex = Some(re.to_string());
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.task.suffix = Some(suffix.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.task.exclude.push(pattern.to_string());
        self
    }

    pub fn output(mut self, template: &str) -> Self {
        self.task.output.push(template.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn mkdir(mut self, dir: &str) -> Self {
        self.task.mkdir.push(dir.to_string());
        self
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.task.cmd = Some(cmd.to_string());
        self.task.argv = None;
        self
    }

    pub fn argv(mut self, argv: &[&str]) -> Self {
        self.task.argv = Some(argv.iter().map(|s| s.to_string()).collect());
        self.task.cmd = None;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.task.params.insert(key.to_string(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.task.timeout = Some(timeout.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.task.retries = Some(n);
        self
    }

    pub fn required(mut self, val: bool) -> Self {
        self.task.required = val;
        self
    }

    pub fn use_hash(mut self, val: bool) -> Self {
        self.task.use_hash = Some(val);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
