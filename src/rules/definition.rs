// src/rules/definition.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{DefaultSection, TaskConfig};
use crate::config::params::Parameters;
use crate::errors::{PipedagError, Result};
use crate::pattern::{InputMatcher, Template};
use crate::types::TaskShape;

/// Shape of a command before rendering.
#[derive(Debug, Clone)]
pub enum CommandSpec {
    /// Run through `<shell> -c`, substituted values single-quote escaped.
    Shell(Template),
    /// Executed directly; each element renders to one or more arguments.
    Argv(Vec<Template>),
}

/// A compiled task definition.
///
/// Built once from a `[[task]]` entry and shared behind `Arc` by every
/// instance; nothing mutates it afterwards.
#[derive(Debug)]
pub struct TaskDefinition {
    pub id: String,
    /// Position in the manifest; first tie-break among ready instances.
    pub order: usize,
    pub shape: TaskShape,
    pub matcher: InputMatcher,
    /// False for tasks that originate files without reading any.
    pub has_inputs: bool,
    /// Restrict candidates to outputs of these tasks.
    pub from: Vec<String>,
    pub outputs: Vec<Template>,
    /// Ordering-only predecessors.
    pub after: Vec<String>,
    pub mkdir: Vec<Template>,
    pub command: CommandSpec,
    /// `[default].env` overlaid with the task's own `env`.
    pub env: BTreeMap<String, String>,
    pub params: Parameters,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub required: bool,
    pub use_hash: bool,
}

impl TaskDefinition {
    pub fn from_config(order: usize, task: &TaskConfig, defaults: &DefaultSection) -> Result<Self> {
        let exclude: Vec<String> = defaults
            .exclude
            .iter()
            .chain(task.exclude.iter())
            .cloned()
            .collect();
        let matcher = InputMatcher::new(
            &task.input,
            task.input_regex.as_deref(),
            task.suffix.as_deref(),
            &exclude,
        )?;

        let outputs = task
            .output
            .iter()
            .map(|o| Template::parse(o))
            .collect::<Result<Vec<_>>>()?;

        let mkdir = task
            .mkdir
            .iter()
            .map(|d| Template::parse(d))
            .collect::<Result<Vec<_>>>()?;

        let command = match (&task.cmd, &task.argv) {
            (Some(cmd), None) => CommandSpec::Shell(Template::parse(cmd)?),
            (None, Some(argv)) => CommandSpec::Argv(
                argv.iter()
                    .map(|a| Template::parse(a))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => {
                return Err(PipedagError::ConfigError(format!(
                    "task '{}' needs exactly one of `cmd` or `argv`",
                    task.id
                )));
            }
        };

        let timeout = match task.timeout.as_ref().or(defaults.timeout.as_ref()) {
            Some(t) => Some(parse_duration(t).map_err(|e| {
                PipedagError::ConfigError(format!("task '{}' timeout: {e}", task.id))
            })?),
            None => None,
        };

        let mut env = defaults.env.clone();
        env.extend(task.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(Self {
            id: task.id.clone(),
            order,
            shape: task.shape,
            matcher,
            has_inputs: task.has_input_spec(),
            from: task.from.clone(),
            outputs,
            after: task.after.clone(),
            mkdir,
            command,
            env,
            params: Parameters::from_table(&task.params)?,
            timeout,
            retries: task.effective_retries(defaults.retries),
            required: task.required,
            use_hash: task.effective_use_hash(defaults.use_hash),
        })
    }
}
