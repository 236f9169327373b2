use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::params::Parameters;
use crate::types::{StateStorageMode, TaskShape};

/// Top-level manifest as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// concurrency = 4
///
/// [default]
/// timeout = "2h"
///
/// [params.cutadapt]
/// minphred = 20
///
/// [[task]]
/// id = "trim"
/// input = ["*.fastq.gz"]
/// output = ["{1}.trim.fastq.gz"]
/// cmd = "cutadapt -q {cutadapt_minphred} -o {outfile} {infile}"
/// ```
///
/// Tasks are an array of tables so that declaration order survives parsing;
/// it is the first tie-break among simultaneously ready instances.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Per-task defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// Sectioned parameter table from `[params.<section>]`.
    #[serde(default)]
    pub params: toml::Table,

    /// All tasks from `[[task]]`, in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// Validated manifest.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (see
/// `config::validate`), so holders can rely on ids being unique, references
/// resolving and durations parsing.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    config: ConfigSection,
    default: DefaultSection,
    params: Parameters,
    task: Vec<TaskConfig>,
    settings: RunSettings,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        default: DefaultSection,
        params: Parameters,
        task: Vec<TaskConfig>,
        settings: RunSettings,
    ) -> Self {
        Self {
            config,
            default,
            params,
            task,
            settings,
        }
    }

    pub fn config_section(&self) -> &ConfigSection {
        &self.config
    }

    pub fn default_section(&self) -> &DefaultSection {
        &self.default
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn tasks(&self) -> &[TaskConfig] {
        &self.task
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }
}

/// Parsed, ready-to-use values derived from `[config]` and `[default]`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    pub state_storage: StateStorageMode,
    pub state_dir: String,
    pub max_passes: usize,
    pub transient_retries: u32,
    pub transient_backoff: Duration,
    pub quarantine_failed_outputs: bool,
    pub output_tail_lines: usize,
    pub shell: String,
    pub default_timeout: Option<Duration>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of jobs running at once; defaults to the number of
    /// available CPUs.
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub state_storage: StateStorageMode,

    /// Directory (relative to the project root) holding `state.json` and the
    /// quarantine area. Always excluded from input matching.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Upper bound on rescan-and-run passes within one invocation.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,

    /// How often a rejected process spawn is retried before the job fails.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Initial backoff between spawn retries; doubles on each attempt.
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff: String,

    /// Move partial outputs of failed jobs into `<state_dir>/quarantine`
    /// instead of deleting them.
    #[serde(default)]
    pub quarantine_failed_outputs: bool,

    /// Number of trailing stdout/stderr lines kept for failure diagnostics.
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,

    /// Shell used for `cmd` commands (`<shell> -c <cmd>`).
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_state_dir() -> String {
    ".pipedag".to_string()
}

fn default_max_passes() -> usize {
    8
}

fn default_transient_retries() -> u32 {
    3
}

fn default_transient_backoff() -> String {
    "200ms".to_string()
}

fn default_output_tail_lines() -> usize {
    20
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            state_storage: StateStorageMode::default(),
            state_dir: default_state_dir(),
            max_passes: default_max_passes(),
            transient_retries: default_transient_retries(),
            transient_backoff: default_transient_backoff(),
            quarantine_failed_outputs: false,
            output_tail_lines: default_output_tail_lines(),
            shell: default_shell(),
        }
    }
}

/// `[default]` section: values every task inherits unless it overrides them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub use_hash: Option<bool>,

    /// Paths never considered as task inputs.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Environment overlay applied to every job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Unique task id.
    pub id: String,

    #[serde(default)]
    pub shape: TaskShape,

    /// Input globs, relative to the project root.
    #[serde(default)]
    pub input: Vec<String>,

    /// Only consider outputs of these tasks as inputs.
    #[serde(default)]
    pub from: Vec<String>,

    /// Regex a candidate input must match; its groups become the captures.
    #[serde(default)]
    pub input_regex: Option<String>,

    /// Suffix a candidate input must end with; binds `{basename}`.
    #[serde(default)]
    pub suffix: Option<String>,

    /// Task-local input exclusions.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Output templates.
    #[serde(default)]
    pub output: Vec<String>,

    /// Ordering-only predecessors.
    #[serde(default)]
    pub after: Vec<String>,

    /// Directories created before the job starts.
    #[serde(default)]
    pub mkdir: Vec<String>,

    /// Shell command template. Mutually exclusive with `argv`.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Argv template executed without a shell. Mutually exclusive with `cmd`.
    #[serde(default)]
    pub argv: Option<Vec<String>>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Task-local parameters, looked up before the global table.
    #[serde(default)]
    pub params: toml::Table,

    #[serde(default)]
    pub timeout: Option<String>,

    /// Extra attempts after a failed execution within one run.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Fail the whole run at build time if no input matches.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub use_hash: Option<bool>,
}

impl TaskConfig {
    /// Effective retry budget given a default from `[default]`.
    pub fn effective_retries(&self, default_retries: Option<u32>) -> u32 {
        self.retries.or(default_retries).unwrap_or(0)
    }

    /// Effective `use_hash` given a default from `[default]`.
    pub fn effective_use_hash(&self, default_use_hash: Option<bool>) -> bool {
        self.use_hash.or(default_use_hash).unwrap_or(false)
    }

    /// Whether the task declares any way of selecting inputs. A bare
    /// `suffix` or `input_regex` filters every candidate on its own.
    pub fn has_input_spec(&self) -> bool {
        !self.input.is_empty()
            || !self.from.is_empty()
            || self.suffix.is_some()
            || self.input_regex.is_some()
    }
}
