// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::kosaraju_scc;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile, RunSettings, TaskConfig};
use crate::config::params::Parameters;
use crate::errors::{PipedagError, Result};
use crate::types::TaskShape;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::PipedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let settings = build_settings(&raw)?;
        let params = Parameters::from_table(&raw.params)?;
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.default,
            params,
            raw.task,
            settings,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_ids(cfg)?;
    for task in cfg.task.iter() {
        validate_task_fields(task)?;
    }
    validate_task_references(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PipedagError::ConfigError(
            "manifest must contain at least one [[task]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == Some(0) {
        return Err(PipedagError::ConfigError(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.max_passes == 0 {
        return Err(PipedagError::ConfigError(
            "[config].max_passes must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.shell.trim().is_empty() {
        return Err(PipedagError::ConfigError(
            "[config].shell must not be empty".to_string(),
        ));
    }
    if cfg.config.state_dir.trim().is_empty() {
        return Err(PipedagError::ConfigError(
            "[config].state_dir must not be empty".to_string(),
        ));
    }
    parse_field_duration("[config].transient_backoff", &cfg.config.transient_backoff)?;
    if let Some(ref t) = cfg.default.timeout {
        parse_field_duration("[default].timeout", t)?;
    }
    Ok(())
}

fn validate_task_ids(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for task in cfg.task.iter() {
        if task.id.trim().is_empty() {
            return Err(PipedagError::ConfigError(
                "every [[task]] needs a non-empty `id`".to_string(),
            ));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(PipedagError::DuplicateTask(task.id.clone()));
        }
    }
    Ok(())
}

fn validate_task_fields(task: &TaskConfig) -> Result<()> {
    let id = &task.id;

    match (&task.cmd, &task.argv) {
        (Some(_), Some(_)) => {
            return Err(PipedagError::ConfigError(format!(
                "task '{id}' sets both `cmd` and `argv`"
            )));
        }
        (None, None) => {
            return Err(PipedagError::ConfigError(format!(
                "task '{id}' needs either `cmd` or `argv`"
            )));
        }
        (None, Some(argv)) if argv.is_empty() => {
            return Err(PipedagError::ConfigError(format!(
                "task '{id}' has an empty `argv`"
            )));
        }
        _ => {}
    }

    if task.output.is_empty() {
        return Err(PipedagError::ConfigError(format!(
            "task '{id}' declares no `output`"
        )));
    }

    if task.input_regex.is_some() && task.suffix.is_some() {
        return Err(PipedagError::ConfigError(format!(
            "task '{id}' sets both `input_regex` and `suffix`"
        )));
    }

    if task.suffix.as_deref() == Some("") {
        return Err(PipedagError::ConfigError(format!(
            "task '{id}' has an empty `suffix`"
        )));
    }

    if task.shape != TaskShape::Transform && !task.has_input_spec() {
        return Err(PipedagError::ConfigError(format!(
            "task '{id}' is a {} task but selects no inputs",
            task.shape
        )));
    }

    if let Some(ref t) = task.timeout {
        parse_field_duration(&format!("task '{id}' timeout"), t)?;
    }

    Ok(())
}

fn validate_task_references(cfg: &RawConfigFile) -> Result<()> {
    let ids: HashSet<&str> = cfg.task.iter().map(|t| t.id.as_str()).collect();

    for task in cfg.task.iter() {
        for (field, deps) in [("after", &task.after), ("from", &task.from)] {
            for dep in deps.iter() {
                if !ids.contains(dep.as_str()) {
                    return Err(PipedagError::UnknownTask(format!(
                        "'{}' (referenced in `{}` of task '{}')",
                        dep, field, task.id
                    )));
                }
                if dep == &task.id {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{}' cannot reference itself in `{}`",
                        task.id, field
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task, for both `after` and `from`.
    //
    // Data edges inferred from globs are only known after instantiation and are
    // checked again on the instance graph.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in cfg.task.iter() {
        graph.add_node(task.id.as_str());
    }

    for task in cfg.task.iter() {
        for dep in task.after.iter().chain(task.from.iter()) {
            graph.add_edge(dep.as_str(), task.id.as_str(), ());
        }
    }

    let order: HashMap<&str, usize> = cfg
        .task
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    for mut component in kosaraju_scc(&graph) {
        if component.len() < 2 {
            continue;
        }
        component.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        let mut cycle: Vec<String> = trace_cycle(&graph, &component);
        if cycle.is_empty() {
            cycle = component.iter().map(|s| s.to_string()).collect();
        }
        return Err(PipedagError::DagCycle(cycle));
    }

    Ok(())
}

/// Walk a strongly connected component from its first member back to itself.
fn trace_cycle(graph: &DiGraphMap<&str, ()>, component: &[&str]) -> Vec<String> {
    let members: HashSet<&str> = component.iter().copied().collect();
    let Some(&start) = component.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    let mut current = start;

    loop {
        let mut next_hop = None;
        for next in graph.neighbors(current) {
            if !members.contains(next) {
                continue;
            }
            if next == start {
                path.push(start);
                return path.into_iter().map(str::to_string).collect();
            }
            if next_hop.is_none() && !visited.contains(next) {
                next_hop = Some(next);
            }
        }
        match next_hop {
            Some(n) => {
                visited.insert(n);
                path.push(n);
                current = n;
            }
            None => return Vec::new(),
        }
    }
}

fn build_settings(cfg: &RawConfigFile) -> Result<RunSettings> {
    let concurrency = cfg.config.concurrency.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let default_timeout = match cfg.default.timeout {
        Some(ref t) => Some(parse_field_duration("[default].timeout", t)?),
        None => None,
    };

    Ok(RunSettings {
        concurrency,
        state_storage: cfg.config.state_storage,
        state_dir: cfg.config.state_dir.trim_end_matches('/').to_string(),
        max_passes: cfg.config.max_passes,
        transient_retries: cfg.config.transient_retries,
        transient_backoff: parse_field_duration(
            "[config].transient_backoff",
            &cfg.config.transient_backoff,
        )?,
        quarantine_failed_outputs: cfg.config.quarantine_failed_outputs,
        output_tail_lines: cfg.config.output_tail_lines,
        shell: cfg.config.shell.clone(),
        default_timeout,
    })
}

fn parse_field_duration(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| PipedagError::ConfigError(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    fn validate(src: &str) -> Result<ConfigFile> {
        ConfigFile::try_from(load_from_str(src)?)
    }

    #[test]
    fn minimal_manifest_is_valid() {
        let cfg = validate(
            r#"
[config]
concurrency = 2

[[task]]
id = "trim"
input = ["*.fastq.gz"]
output = ["{1}.trim.fastq.gz"]
cmd = "cutadapt -o {outfile} {infile}"
"#,
        )
        .unwrap();
        assert_eq!(cfg.settings().concurrency, 2);
        assert_eq!(cfg.settings().state_dir, ".pipedag");
        assert_eq!(cfg.tasks().len(), 1);
    }

    #[test]
    fn merge_selecting_by_regex_alone_is_valid() {
        let cfg = validate(
            r#"
[[task]]
id = "combine"
shape = "merge"
input_regex = '(?P<sample>s\d+)\.tsv'
output = ["all.tsv"]
cmd = "cat {inputs} > {outfile}"
"#,
        )
        .unwrap();
        assert!(cfg.tasks()[0].has_input_spec());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = validate(
            r#"
[[task]]
id = "a"
output = ["x"]
cmd = "true"

[[task]]
id = "a"
output = ["y"]
cmd = "true"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipedagError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn unknown_from_reference_is_rejected() {
        let err = validate(
            r#"
[[task]]
id = "b"
from = ["ghost"]
output = ["{1}.out"]
cmd = "true"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipedagError::UnknownTask(msg) if msg.contains("ghost")));
    }

    #[test]
    fn task_level_cycle_is_named() {
        let err = validate(
            r#"
[[task]]
id = "a"
after = ["c"]
output = ["a.out"]
cmd = "true"

[[task]]
id = "b"
after = ["a"]
output = ["b.out"]
cmd = "true"

[[task]]
id = "c"
after = ["b"]
output = ["c.out"]
cmd = "true"
"#,
        )
        .unwrap_err();
        match err {
            PipedagError::DagCycle(path) => {
                assert_eq!(path.first(), Some(&"a".to_string()));
                assert_eq!(path.last(), Some(&"a".to_string()));
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected DagCycle, got {other:?}"),
        }
    }

    #[test]
    fn cmd_and_argv_are_exclusive() {
        let err = validate(
            r#"
[[task]]
id = "a"
output = ["a.out"]
cmd = "true"
argv = ["true"]
"#,
        )
        .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = validate(
            r#"
[[task]]
id = "a"
output = ["a.out"]
cmd = "true"
timeout = "soon"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipedagError::ConfigError(msg) if msg.contains("timeout")));
    }
}
