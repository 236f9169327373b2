// tests/staleness.rs

mod common;
use crate::common::{
    ConfigFileBuilder, FakeExecutor, TaskConfigBuilder, fake_channel, init_tracing, mock_orchestrator,
    mock_project, with_timeout,
};

use std::collections::HashMap;
use std::path::Path;

use pipedag::config::ConfigFile;
use pipedag::dag::InstanceStatus;
use pipedag::engine::{RunOptions, RunSummary};
use pipedag::fs::FileSystem;
use pipedag::fs::mock::MockFileSystem;
use pipedag::state::hash::compute_inputs_hash;
use pipedag::state::{ExecutionRecord, MemoryStateStore, StaleReason, Staleness, StalenessAnalyzer};

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

async fn run_once(
    cfg: ConfigFile,
    fs: &MockFileSystem,
    store: &MemoryStateStore,
    opts: RunOptions,
) -> (RunSummary, Vec<String>) {
    let mut orch = mock_orchestrator(cfg, fs, store);
    let (tx, mut rx) = fake_channel();
    let mut exec = FakeExecutor::new(tx, fs.clone());
    let summary = with_timeout(orch.run(&opts, &mut rx, &mut exec))
        .await
        .expect("run completes");
    (summary, exec.executed())
}

#[tokio::test]
async fn second_run_skips_everything() {
    init_tracing();
    let fs = mock_project(&["a.fastq.gz", "b.fastq.gz"]);
    let store = MemoryStateStore::new();

    let (first, executed) = run_once(trim_align(), &fs, &store, RunOptions::default()).await;
    assert_eq!(first.succeeded(), 4);
    assert_eq!(executed.len(), 4);
    assert_eq!(first.exit_code(), 0);

    let (second, executed) = run_once(trim_align(), &fs, &store, RunOptions::default()).await;
    assert!(executed.is_empty(), "nothing should run: {executed:?}");
    assert_eq!(second.skipped(), 4);
    assert_eq!(second.succeeded(), 0);
    assert_eq!(second.exit_code(), 0);
}

async fn run_demux(fs: &MockFileSystem, store: &MemoryStateStore) -> (RunSummary, Vec<String>) {
    let cfg = ConfigFileBuilder::new()
        .with_task(
            TaskConfigBuilder::new("demux")
                .split()
                .input("*.fastq.gz")
                .output("*.demux.fastq.gz")
                .build(),
        )
        .build();
    let mut orch = mock_orchestrator(cfg, fs, store);
    let (tx, mut rx) = fake_channel();
    let mut exec = FakeExecutor::new(tx, fs.clone())
        .with_products("demux", &["s1.demux.fastq.gz", "s2.demux.fastq.gz"]);
    let summary = with_timeout(orch.run(&RunOptions::default(), &mut rx, &mut exec))
        .await
        .expect("run completes");
    (summary, exec.executed())
}

#[tokio::test]
async fn split_whose_input_glob_matches_its_outputs_settles() {
    init_tracing();
    let fs = mock_project(&["raw.fastq.gz"]);
    let store = MemoryStateStore::new();

    let (first, executed) = run_demux(&fs, &store).await;
    assert_eq!(executed, vec!["demux[raw.fastq.gz]"]);
    assert_eq!(first.exit_code(), 0);
    assert!(fs.exists(Path::new("s2.demux.fastq.gz")));

    let (second, executed) = run_demux(&fs, &store).await;
    assert!(executed.is_empty(), "nothing should run: {executed:?}");
    assert_eq!(second.skipped(), 1);
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn touching_one_input_reruns_only_its_branch() {
    init_tracing();
    let fs = mock_project(&["a.fastq.gz", "b.fastq.gz"]);
    let store = MemoryStateStore::new();
    run_once(trim_align(), &fs, &store, RunOptions::default()).await;

    fs.touch("a.fastq.gz").unwrap();

    let (summary, executed) = run_once(trim_align(), &fs, &store, RunOptions::default()).await;
    assert_eq!(executed, vec!["trim[a.fastq.gz]", "align[a.trim.fastq.gz]"]);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.skipped(), 2);
}

#[tokio::test]
async fn plan_reports_the_reason_for_each_instance() {
    let fs = mock_project(&["a.fastq.gz"]);
    let store = MemoryStateStore::new();
    run_once(trim_align(), &fs, &store, RunOptions::default()).await;
    fs.touch("a.fastq.gz").unwrap();

    let plan = mock_orchestrator(trim_align(), &fs, &store)
        .plan(&RunOptions::default())
        .unwrap();
    assert_eq!(plan.to_run(), 2);

    let trim = plan.entry("trim[a.fastq.gz]").unwrap();
    assert_eq!(trim.last_status, Some(InstanceStatus::Succeeded));
    assert!(matches!(
        trim.staleness,
        Staleness::NeedsRun(StaleReason::OutputOlderThanInput { .. })
    ));
    let align = plan.entry("align[a.trim.fastq.gz]").unwrap();
    assert_eq!(
        align.staleness,
        Staleness::NeedsRun(StaleReason::UpstreamWillRun("trim[a.fastq.gz]".to_string()))
    );
}

#[tokio::test]
async fn missing_record_means_the_instance_runs() {
    let fs = mock_project(&["a.fastq.gz"]);
    // Outputs are present and newer, but nothing was ever recorded.
    fs.add_file("a.trim.fastq.gz", "stale");
    fs.add_file("a.bam", "stale");

    let plan = mock_orchestrator(trim_align(), &fs, &MemoryStateStore::new())
        .plan(&RunOptions::default())
        .unwrap();
    assert_eq!(
        plan.entry("trim[a.fastq.gz]").unwrap().staleness,
        Staleness::NeedsRun(StaleReason::NoPriorRecord)
    );
}

fn copy_config(use_hash: bool) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task(
            TaskConfigBuilder::new("copy")
                .input("*.txt")
                .output("{1}.out")
                .use_hash(use_hash)
                .build(),
        )
        .build()
}

fn succeeded_record(fs: &MockFileSystem, cfg: ConfigFile) -> (pipedag::dag::InstanceGraph, HashMap<String, ExecutionRecord>) {
    let graph = mock_orchestrator(cfg, fs, &MemoryStateStore::new())
        .build_graph(&[])
        .unwrap();
    let inst = graph.instance(0);
    let mut rec = ExecutionRecord::new(inst.id.clone(), inst.task_id(), InstanceStatus::Succeeded);
    rec.input_hash = Some(compute_inputs_hash(fs, Path::new("."), &inst.inputs).unwrap());
    let records = HashMap::from([(inst.id.clone(), rec)]);
    (graph, records)
}

#[test]
fn equal_timestamps_count_as_up_to_date() {
    let fs = MockFileSystem::new();
    fs.add_file_at("in.txt", "x", 5);
    fs.add_file_at("in.out", "y", 5);
    let (graph, records) = succeeded_record(&fs, copy_config(false));
    let root = Path::new(".");

    let analyzer = StalenessAnalyzer::new(&fs, root, Some(&records), false);
    assert_eq!(analyzer.evaluate_own(graph.instance(0)), Staleness::UpToDate);

    fs.set_modified("in.txt", 6).unwrap();
    let analyzer = StalenessAnalyzer::new(&fs, root, Some(&records), false);
    assert_eq!(
        analyzer.evaluate_own(graph.instance(0)),
        Staleness::NeedsRun(StaleReason::OutputOlderThanInput {
            output: "in.out".to_string(),
            input: "in.txt".to_string(),
        })
    );
}

#[test]
fn hashed_tasks_ignore_touches_but_not_edits() {
    let fs = MockFileSystem::new();
    fs.add_file("in.txt", "original");
    fs.add_file("in.out", "derived");
    let (graph, records) = succeeded_record(&fs, copy_config(true));
    let root = Path::new(".");

    fs.touch("in.txt").unwrap();
    let analyzer = StalenessAnalyzer::new(&fs, root, Some(&records), false);
    assert_eq!(analyzer.evaluate_own(graph.instance(0)), Staleness::UpToDate);

    fs.write(Path::new("in.txt"), b"edited").unwrap();
    let analyzer = StalenessAnalyzer::new(&fs, root, Some(&records), false);
    assert!(analyzer.evaluate_own(graph.instance(0)).needs_run());
}

#[test]
fn unreadable_state_means_everything_runs() {
    let fs = MockFileSystem::new();
    fs.add_file("in.txt", "x");
    fs.add_file("in.out", "y");
    let (graph, _) = succeeded_record(&fs, copy_config(false));

    let analyzer = StalenessAnalyzer::new(&fs, Path::new("."), None, false);
    assert_eq!(
        analyzer.evaluate(&graph),
        vec![Staleness::NeedsRun(StaleReason::StateUnavailable)]
    );
}

#[tokio::test]
async fn ordering_edges_do_not_propagate_staleness() {
    let cfg = || {
        ConfigFileBuilder::new()
            .with_task(TaskConfigBuilder::new("gen").output("gen.txt").build())
            .with_task(TaskConfigBuilder::new("report").output("report.txt").after("gen").build())
            .build()
    };
    let fs = MockFileSystem::new();
    let store = MemoryStateStore::new();
    let (first, executed) = run_once(cfg(), &fs, &store, RunOptions::default()).await;
    assert_eq!(executed, vec!["gen", "report"]);
    assert!(first.is_success());

    fs.remove_file(Path::new("gen.txt")).unwrap();

    let (second, executed) = run_once(cfg(), &fs, &store, RunOptions::default()).await;
    assert_eq!(executed, vec!["gen"]);
    assert_eq!(second.skipped(), 1);
}

#[tokio::test]
async fn force_reruns_up_to_date_instances() {
    let fs = mock_project(&["a.fastq.gz", "b.fastq.gz"]);
    let store = MemoryStateStore::new();
    run_once(trim_align(), &fs, &store, RunOptions::default()).await;

    let opts = RunOptions {
        force: true,
        ..RunOptions::default()
    };
    let (summary, executed) = run_once(trim_align(), &fs, &store, opts).await;
    assert_eq!(executed.len(), 4);
    assert_eq!(summary.succeeded(), 4);
    assert_eq!(summary.passes(), 2);
}
