// tests/graph_build.rs

mod common;
use crate::common::{ConfigFileBuilder, TaskConfigBuilder};

use std::collections::BTreeSet;
use std::sync::Arc;

use pipedag::config::ConfigFile;
use pipedag::dag::{EdgeKind, InstanceGraph, Scheduler, instantiate_all};
use pipedag::errors::{EXIT_CONFIG_ERROR, PipedagError};
use pipedag::rules::TaskRegistry;

fn build(cfg: &ConfigFile, listing: &[&str]) -> Result<InstanceGraph, PipedagError> {
    let registry = TaskRegistry::from_config(cfg)?;
    let listing: Vec<String> = listing.iter().map(|s| s.to_string()).collect();
    InstanceGraph::build(instantiate_all(&registry, &listing, cfg.params())?)
}

fn slot_of(graph: &InstanceGraph, label: &str) -> usize {
    graph
        .instances()
        .iter()
        .position(|i| i.label() == label)
        .unwrap_or_else(|| panic!("no instance {label}"))
}

fn trim_align() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task(
            TaskConfigBuilder::new("trim")
                .input("*.fastq.gz")
                .output("{1}.trim.fastq.gz")
                .build(),
        )
        .with_task(
            TaskConfigBuilder::new("align")
                .input("*.trim.fastq.gz")
                .output("{1}.bam")
                .build(),
        )
        .build()
}

#[test]
fn branches_are_independent() {
    let graph = build(&trim_align(), &["a.fastq.gz", "b.fastq.gz"]).unwrap();
    assert_eq!(graph.len(), 4);

    let trim_a = slot_of(&graph, "trim[a.fastq.gz]");
    let trim_b = slot_of(&graph, "trim[b.fastq.gz]");
    let align_a = slot_of(&graph, "align[a.trim.fastq.gz]");

    assert_eq!(graph.predecessors(align_a), vec![(trim_a, EdgeKind::Data)]);
    assert_eq!(graph.producer_of("a.trim.fastq.gz"), Some(trim_a));

    let upstream = graph.ancestors_of(&[align_a]);
    assert!(upstream.contains(&trim_a));
    assert!(!upstream.contains(&trim_b));
}

#[test]
fn canonical_order_follows_declaration_then_path() {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("second").input("*.txt").output("{1}.b").build())
        .with_task(TaskConfigBuilder::new("first").input("*.txt").output("{1}.a").build())
        .build();
    let graph = build(&cfg, &["z.txt", "y.txt"]).unwrap();

    let labels: Vec<String> = graph
        .canonical_order()
        .iter()
        .map(|&s| graph.instance(s).label())
        .collect();
    assert_eq!(
        labels,
        vec!["second[y.txt]", "second[z.txt]", "first[y.txt]", "first[z.txt]"]
    );
}

#[test]
fn scheduler_dispatches_in_canonical_order_up_to_the_limit() {
    let graph = Arc::new(build(&trim_align(), &["b.fastq.gz", "a.fastq.gz"]).unwrap());
    let mut scheduler = Scheduler::new(Arc::clone(&graph), &vec![true; graph.len()], 1);
    scheduler.start();

    let jobs = scheduler.dispatch();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].instance.label(), "trim[a.fastq.gz]");
    assert!(scheduler.dispatch().is_empty());
}

#[test]
fn after_adds_ordering_edges_from_every_instance() {
    let cfg = ConfigFileBuilder::new()
        .with_task(
            TaskConfigBuilder::new("trim")
                .input("*.fastq.gz")
                .output("{1}.trim.fastq.gz")
                .build(),
        )
        .with_task(TaskConfigBuilder::new("report").output("report.html").after("trim").build())
        .build();
    let graph = build(&cfg, &["a.fastq.gz", "b.fastq.gz"]).unwrap();

    let report = slot_of(&graph, "report");
    let preds = graph.predecessors(report);
    assert_eq!(preds.len(), 2);
    assert!(preds.iter().all(|(_, kind)| *kind == EdgeKind::Order));
}

#[test]
fn colliding_outputs_are_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("one").output("shared.txt").build())
        .with_task(TaskConfigBuilder::new("two").output("shared.txt").build())
        .build();

    let err = build(&cfg, &[]).unwrap_err();
    match err {
        PipedagError::DuplicateProducer { ref path, ref first, ref second } => {
            assert_eq!(path, "shared.txt");
            assert_eq!(first, "one");
            assert_eq!(second, "two");
        }
        ref other => panic!("expected DuplicateProducer, got {other:?}"),
    }
    assert_eq!(err.exit_code(), EXIT_CONFIG_ERROR);
}

#[test]
fn transform_collisions_inside_one_task_are_rejected() {
    // Both inputs render to the same output path.
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("flatten").input("*/*.txt").output("{2}.out").build())
        .build();

    let err = build(&cfg, &["x/a.txt", "y/a.txt"]).unwrap_err();
    assert!(matches!(err, PipedagError::DuplicateProducer { .. }));
}

#[test]
fn instance_level_cycle_is_named() {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("fwd").input("*.x").output("{1}.y").build())
        .with_task(TaskConfigBuilder::new("back").input("*.y").output("{1}.x").build())
        .build();

    let err = build(&cfg, &["s.x"]).unwrap_err();
    match err {
        PipedagError::DagCycle(path) => {
            assert!(path.len() >= 3, "cycle path too short: {path:?}");
            assert_eq!(path.first(), path.last());
            assert!(path.iter().any(|l| l == "fwd[s.x]"));
            assert!(path.iter().any(|l| l == "back[s.y]"));
        }
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn task_level_cycle_is_rejected_at_load_time() {
    let result = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("A").output("a").after("B").build())
        .with_task(TaskConfigBuilder::new("B").output("b").after("A").build())
        .try_build();

    match result {
        Err(PipedagError::DagCycle(path)) => {
            assert!(path.contains(&"A".to_string()));
            assert!(path.contains(&"B".to_string()));
        }
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn restricting_keeps_targets_and_their_ancestors() {
    let graph = build(&trim_align(), &["a.fastq.gz", "b.fastq.gz"]).unwrap();
    let align_b = slot_of(&graph, "align[b.trim.fastq.gz]");
    let keep: BTreeSet<usize> = graph.ancestors_of(&[align_b]);

    let sub = graph.restrict_to(&keep).unwrap();
    let labels: BTreeSet<String> = sub.instances().iter().map(|i| i.label()).collect();
    assert_eq!(
        labels,
        BTreeSet::from(["trim[b.fastq.gz]".to_string(), "align[b.trim.fastq.gz]".to_string()])
    );
    assert_eq!(sub.predecessors(slot_of(&sub, "align[b.trim.fastq.gz]")).len(), 1);
}
