// src/dag/instantiate.rs

//! Instantiation of task definitions against a file listing.
//!
//! A definition may consume files that exist now or files another
//! definition will produce, so instantiation runs to a fixpoint: every round
//! re-instantiates each definition against the listing plus the planned
//! outputs of all other definitions, until no instance set changes.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, trace};

use crate::config::params::Parameters;
use crate::dag::instance::{GlobOutput, TaskInstance, instance_fingerprint};
use crate::errors::{PipedagError, Result};
use crate::pattern::{Bindings, InputMatch, Scope};
use crate::rules::{TaskDefinition, TaskRegistry};
use crate::types::TaskShape;

/// Instantiate every registered task. Instances come back grouped by task in
/// declaration order, each group sorted by input paths.
pub fn instantiate_all(
    registry: &TaskRegistry,
    listing: &[String],
    params: &Parameters,
) -> Result<Vec<TaskInstance>> {
    let defs: Vec<&Arc<TaskDefinition>> = registry.iter().collect();
    let mut per_def: Vec<Vec<TaskInstance>> = vec![Vec::new(); defs.len()];
    let max_rounds = defs.len() + 2;

    let mut converged = false;
    let mut unsettled: Vec<String> = Vec::new();

    for round in 0..max_rounds {
        unsettled.clear();
        for (idx, def) in defs.iter().enumerate() {
            let candidates = candidate_paths(def, idx, &defs, &per_def, listing);
            let fresh = instantiate_definition(def, candidates, listing, params)?;
            if !same_instances(&per_def[idx], &fresh) {
                unsettled.push(def.id.clone());
                per_def[idx] = fresh;
            }
        }
        trace!(round, changed = unsettled.len(), "instantiation round");
        if unsettled.is_empty() {
            converged = true;
            break;
        }
    }

    if !converged {
        // Outputs keep feeding new inputs: the tasks consume each other.
        if let Some(first) = unsettled.first().cloned() {
            unsettled.push(first);
        }
        return Err(PipedagError::DagCycle(unsettled));
    }

    for (def, instances) in defs.iter().zip(per_def.iter()) {
        if def.required && instances.is_empty() {
            return Err(PipedagError::RequiredInputsMissing(def.id.clone()));
        }
        debug!(task = %def.id, instances = instances.len(), "task instantiated");
    }

    Ok(per_def.into_iter().flatten().collect())
}

fn same_instances(old: &[TaskInstance], new: &[TaskInstance]) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .zip(new.iter())
            .all(|(a, b)| a.id == b.id && a.outputs == b.outputs)
}

/// Paths a definition may draw inputs from.
fn candidate_paths(
    def: &TaskDefinition,
    idx: usize,
    defs: &[&Arc<TaskDefinition>],
    per_def: &[Vec<TaskInstance>],
    listing: &[String],
) -> Vec<String> {
    let mut out: BTreeSet<String> = BTreeSet::new();

    if !def.from.is_empty() {
        for (other_idx, other) in defs.iter().enumerate() {
            if def.from.iter().any(|f| f == &other.id) {
                for inst in per_def[other_idx].iter() {
                    out.extend(inst.outputs.iter().cloned());
                }
            }
        }
        return out.into_iter().collect();
    }

    out.extend(listing.iter().cloned());
    for (other_idx, instances) in per_def.iter().enumerate() {
        if other_idx == idx {
            continue;
        }
        for inst in instances {
            out.extend(inst.outputs.iter().cloned());
        }
    }
    out.into_iter().collect()
}

/// Instantiate one definition, never letting it consume its own outputs.
fn instantiate_definition(
    def: &Arc<TaskDefinition>,
    mut candidates: Vec<String>,
    listing: &[String],
    params: &Parameters,
) -> Result<Vec<TaskInstance>> {
    if !def.has_inputs {
        return Ok(vec![build_instance(def, Vec::new(), listing, params)?]);
    }

    loop {
        let matches = def.matcher.match_all(candidates.iter());
        let instances = match def.shape {
            TaskShape::Transform => matches
                .into_iter()
                .map(|m| build_instance(def, vec![m], listing, params))
                .collect::<Result<Vec<_>>>()?,
            TaskShape::Split | TaskShape::Merge => {
                if matches.is_empty() {
                    Vec::new()
                } else {
                    vec![build_instance(def, matches, listing, params)?]
                }
            }
        };

        // Glob outputs that overlap the input globs are swallowed as inputs
        // and never show up in `outputs`, so drop anything the rendered
        // output patterns could claim as well.
        let own: HashSet<&str> = instances
            .iter()
            .flat_map(|i| i.outputs.iter().map(String::as_str))
            .collect();
        let own_globs = instances
            .iter()
            .flat_map(|i| i.glob_outputs.iter())
            .map(|g| output_glob(&g.pattern))
            .collect::<Result<Vec<_>>>()?;
        let before = candidates.len();
        candidates.retain(|c| {
            !own.contains(c.as_str()) && !own_globs.iter().any(|m| m.is_match(c.as_str()))
        });
        if candidates.len() == before {
            return Ok(instances);
        }
    }
}

fn build_instance(
    def: &Arc<TaskDefinition>,
    matches: Vec<InputMatch>,
    listing: &[String],
    params: &Parameters,
) -> Result<TaskInstance> {
    let mut bindings = Bindings::new();
    bindings.insert("task", def.id.as_str());

    let mut inputs: Vec<String> = matches.iter().map(|m| m.path.clone()).collect();
    inputs.sort();

    if let [single] = matches.as_slice() {
        single.captures.bind_into(&mut bindings);
    }
    if let Some(first) = inputs.first() {
        bindings.insert("infile", first.as_str());
    }
    bindings.insert("infiles", inputs.clone());

    let mut outputs = Vec::new();
    let mut glob_outputs = Vec::new();
    let mut declared = Vec::with_capacity(def.outputs.len());
    {
        let scope = Scope::new().with(&bindings).with(&def.params).with(params);
        for template in def.outputs.iter() {
            let rendered = template.render(&scope).map_err(|e| {
                PipedagError::ConfigError(format!("task '{}' output: {e}", def.id))
            })?;
            let rendered = normalize_rel(&rendered);
            declared.push(rendered.clone());
            if template.is_glob() {
                let matches = glob_matches(&rendered, listing, &inputs)?;
                outputs.extend(matches.iter().cloned());
                glob_outputs.push(GlobOutput {
                    pattern: rendered,
                    matches,
                });
            } else {
                outputs.push(rendered);
            }
        }
    }
    outputs.sort();
    outputs.dedup();

    if let Some(first) = declared.first() {
        bindings.insert("outfile", first.as_str());
    }
    bindings.insert("outfiles", declared);

    Ok(TaskInstance {
        id: instance_fingerprint(&def.id, &inputs),
        task: Arc::clone(def),
        inputs,
        outputs,
        glob_outputs,
        bindings,
    })
}

fn output_glob(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| PipedagError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?
        .compile_matcher())
}

fn glob_matches(pattern: &str, listing: &[String], inputs: &[String]) -> Result<Vec<String>> {
    let matcher = output_glob(pattern)?;
    Ok(listing
        .iter()
        .filter(|p| matcher.is_match(p.as_str()) && !inputs.contains(p))
        .cloned()
        .collect())
}

/// Strip leading `./` so rendered outputs compare equal to scanned paths.
pub fn normalize_rel(path: &str) -> String {
    let mut s = path.trim();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}
