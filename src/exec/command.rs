// src/exec/command.rs

//! Rendering a task instance into a concrete process invocation.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::Parameters;
use crate::dag::{TaskInstance, instantiate::normalize_rel};
use crate::errors::{PipedagError, Result};
use crate::pattern::Scope;
use crate::rules::CommandSpec;

/// A fully resolved command, ready to hand to `tokio::process::Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Environment overlay on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl fmt::Display for PreparedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args.iter() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Resolve the command of `inst`. Lookups go instance bindings first, then
/// task parameters, then the global parameter table.
pub fn render_command(
    inst: &TaskInstance,
    params: &Parameters,
    shell: &str,
) -> Result<PreparedCommand> {
    let scope = Scope::new()
        .with(&inst.bindings)
        .with(&inst.task.params)
        .with(params);

    let (program, args) = match &inst.task.command {
        CommandSpec::Shell(template) => {
            let script = template.render_shell(&scope).map_err(|e| in_task(inst, e))?;
            (shell.to_string(), vec!["-c".to_string(), script])
        }
        CommandSpec::Argv(parts) => {
            let mut argv = Vec::with_capacity(parts.len());
            for part in parts {
                argv.extend(part.render_argv(&scope).map_err(|e| in_task(inst, e))?);
            }
            let mut iter = argv.into_iter();
            let program = iter.next().filter(|p| !p.is_empty()).ok_or_else(|| {
                PipedagError::ConfigError(format!(
                    "task '{}' argv renders to an empty program",
                    inst.task_id()
                ))
            })?;
            (program, iter.collect())
        }
    };

    Ok(PreparedCommand {
        program,
        args,
        env: inst.task.env.clone(),
    })
}

/// Directories to create before the job starts: the rendered `mkdir`
/// entries plus the parent of every concrete output.
pub fn render_dirs(inst: &TaskInstance, params: &Parameters) -> Result<Vec<String>> {
    let scope = Scope::new()
        .with(&inst.bindings)
        .with(&inst.task.params)
        .with(params);

    let mut dirs = Vec::new();
    for template in inst.task.mkdir.iter() {
        let dir = normalize_rel(&template.render(&scope).map_err(|e| in_task(inst, e))?);
        if !dir.is_empty() {
            dirs.push(dir);
        }
    }

    let globbed = inst
        .glob_outputs
        .iter()
        .flat_map(|g| g.matches.iter())
        .collect::<Vec<_>>();
    for output in inst.outputs.iter().filter(|o| !globbed.contains(o)) {
        if let Some((parent, _)) = output.rsplit_once('/') {
            if !parent.is_empty() {
                dirs.push(parent.to_string());
            }
        }
    }

    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

fn in_task(inst: &TaskInstance, err: PipedagError) -> PipedagError {
    match err {
        PipedagError::UnresolvedParameter { name, context } => PipedagError::UnresolvedParameter {
            name,
            context: format!("{context} of {}", inst.label()),
        },
        other => other,
    }
}
