// tests/job_runner.rs

#![cfg(unix)]

mod common;
use crate::common::{ConfigFileBuilder, TaskConfigBuilder, init_tracing};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::mpsc;

use pipedag::config::ConfigFile;
use pipedag::dag::instance_fingerprint;
use pipedag::engine::{Orchestrator, RunOptions, RunSummary};
use pipedag::exec::{JobContext, RealExecutorBackend};
use pipedag::fs::{FileSystem, RealFileSystem};
use pipedag::state::{FailureReason, MemoryStateStore};

async fn run_in(dir: &Path, cfg: ConfigFile, store: &MemoryStateStore) -> RunSummary {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let settings = cfg.settings().clone();
    let params = Arc::new(cfg.params().clone());
    let mut orch = Orchestrator::new(dir, cfg, Arc::clone(&fs), Box::new(store.clone()))
        .expect("orchestrator");

    let (tx, mut rx) = mpsc::channel(64);
    let ctx = Arc::new(JobContext {
        root: dir.to_path_buf(),
        params,
        fs,
        settings,
    });
    let mut exec = RealExecutorBackend::new(tx, ctx);

    tokio::time::timeout(
        Duration::from_secs(20),
        orch.run(&RunOptions::default(), &mut rx, &mut exec),
    )
    .await
    .expect("run timed out")
    .expect("run completes")
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

fn single(task: pipedag::config::TaskConfig) -> ConfigFile {
    ConfigFileBuilder::new().with_task(task).build()
}

fn only_failure(summary: &RunSummary) -> FailureReason {
    let failures = summary.failures();
    assert_eq!(failures.len(), 1, "{summary}");
    failures[0].reason.clone().expect("failure reason")
}

#[tokio::test]
async fn shell_command_copies_into_a_fresh_directory() {
    init_tracing();
    let dir = project(&[("in/a.txt", "hello"), ("in/b.txt", "world")]);
    let cfg = single(
        TaskConfigBuilder::new("copy")
            .input("in/*.txt")
            .output("out/nested/{1}.txt")
            .cmd("cp {infile} {outfile}")
            .build(),
    );
    let store = MemoryStateStore::new();

    let summary = run_in(dir.path(), cfg.clone(), &store).await;
    assert!(summary.is_success(), "{summary}");
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(std::fs::read_to_string(dir.path().join("out/nested/a.txt")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(dir.path().join("out/nested/b.txt")).unwrap(), "world");

    let again = run_in(dir.path(), cfg, &store).await;
    assert_eq!(again.skipped(), 2);
    assert_eq!(again.succeeded(), 0);
}

#[tokio::test]
async fn argv_commands_bypass_the_shell() {
    let dir = project(&[("a b.txt", "spaced")]);
    let cfg = single(
        TaskConfigBuilder::new("copy")
            .input("*.txt")
            .output("{1}.copy")
            .argv(&["cp", "{infile}", "{outfile}"])
            .build(),
    );

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert!(summary.is_success(), "{summary}");
    assert_eq!(std::fs::read_to_string(dir.path().join("a b.copy")).unwrap(), "spaced");
}

#[tokio::test]
async fn zero_exit_without_outputs_is_a_failure() {
    let dir = project(&[]);
    let cfg = single(TaskConfigBuilder::new("lazy").output("never.txt").cmd("true").build());

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert_eq!(only_failure(&summary), FailureReason::MissingOutput("never.txt".into()));
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn glob_outputs_need_at_least_one_match() {
    let dir = project(&[("big.txt", "x")]);
    let cfg = single(
        TaskConfigBuilder::new("split")
            .split()
            .input("big.txt")
            .output("chunks/*.part")
            .mkdir("chunks")
            .cmd("true")
            .build(),
    );

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert_eq!(only_failure(&summary), FailureReason::MissingOutput("chunks/*.part".into()));
}

#[tokio::test]
async fn slow_jobs_are_killed_at_the_timeout() {
    let dir = project(&[]);
    let cfg = single(
        TaskConfigBuilder::new("slow")
            .output("slow.txt")
            .cmd("sleep 5 && touch {outfile}")
            .timeout("200ms")
            .build(),
    );

    let started = Instant::now();
    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(only_failure(&summary), FailureReason::Timeout);
    assert!(!dir.path().join("slow.txt").exists());
}

#[tokio::test]
async fn partial_outputs_are_removed_after_a_failure() {
    let dir = project(&[]);
    let cfg = single(
        TaskConfigBuilder::new("broken")
            .output("part.txt")
            .cmd("echo partial > {outfile}; exit 3")
            .build(),
    );

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert_eq!(only_failure(&summary), FailureReason::NonZeroExit);
    assert_eq!(summary.failures()[0].exit_code, Some(3));
    assert!(!dir.path().join("part.txt").exists());
}

#[tokio::test]
async fn partial_outputs_can_be_quarantined() {
    let dir = project(&[]);
    let cfg = ConfigFileBuilder::new()
        .with_quarantine(true)
        .with_task(
            TaskConfigBuilder::new("broken")
                .output("part.txt")
                .cmd("echo partial > {outfile}; exit 1")
                .build(),
        )
        .build();

    run_in(dir.path(), cfg, &MemoryStateStore::new()).await;

    let id = instance_fingerprint("broken", &[]);
    let kept = dir
        .path()
        .join(".pipedag/quarantine")
        .join(&id[..12])
        .join("part.txt");
    assert!(!dir.path().join("part.txt").exists());
    assert_eq!(std::fs::read_to_string(kept).unwrap(), "partial\n");
}

#[tokio::test]
async fn output_tail_keeps_both_streams() {
    let dir = project(&[]);
    let cfg = single(
        TaskConfigBuilder::new("noisy")
            .output("n.txt")
            .cmd("echo to-stdout; echo to-stderr >&2; exit 1")
            .build(),
    );

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    let tail = &summary.failures()[0].output_tail;
    assert!(tail.contains(&"to-stdout".to_string()), "{tail:?}");
    assert!(tail.contains(&"to-stderr".to_string()), "{tail:?}");
    assert!(summary.to_string().contains("    | to-stderr"));
}

#[tokio::test]
async fn unresolved_placeholder_fails_only_its_instance() {
    let dir = project(&[]);
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("good").output("good.txt").cmd("touch {outfile}").build())
        .with_task(
            TaskConfigBuilder::new("bad")
                .output("bad.txt")
                .cmd("echo {nosuch} > {outfile}")
                .retries(2)
                .build(),
        )
        .build();

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(only_failure(&summary), FailureReason::UnresolvedParameter("nosuch".into()));
    // Not retryable: one attempt despite the retry budget.
    assert_eq!(summary.failures()[0].attempts, 1);
    assert!(dir.path().join("good.txt").exists());
}

#[tokio::test]
async fn parameters_are_shell_escaped_and_env_is_applied() {
    let dir = project(&[]);
    let cfg = ConfigFileBuilder::new()
        .with_param("report", "title", "it's $HOME; rm -rf /")
        .with_task(
            TaskConfigBuilder::new("title")
                .output("title.txt")
                .cmd("printf '%s' {report_title} > {outfile}")
                .build(),
        )
        .with_task(
            TaskConfigBuilder::new("greet")
                .output("greet.txt")
                .env("GREETING", "hi there")
                .cmd("printf '%s' \"$GREETING\" > {outfile}")
                .retries(1)
                .build(),
        )
        .build();

    let summary = run_in(dir.path(), cfg, &MemoryStateStore::new()).await;
    assert!(summary.is_success(), "{summary}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("title.txt")).unwrap(),
        "it's $HOME; rm -rf /"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("greet.txt")).unwrap(), "hi there");
}
