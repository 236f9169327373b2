// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pattern;
pub mod rules;
pub mod state;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::engine::{Orchestrator, RunOptions, RuntimeEvent};
use crate::errors::{EXIT_SUCCESS, Result};
use crate::exec::{JobContext, RealExecutorBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::state::open_store;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - manifest loading and validation
/// - the state store
/// - the orchestrator (scan, graph, staleness, scheduler)
/// - the process executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = config_root_dir(&config_path);
    let settings = cfg.settings().clone();
    let params = Arc::new(cfg.params().clone());
    debug!(root = %root.display(), tasks = cfg.tasks().len(), "manifest loaded");

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = open_store(
        settings.state_storage,
        Arc::clone(&fs),
        &root.join(&settings.state_dir),
    );
    let mut orchestrator = Orchestrator::new(&root, cfg, Arc::clone(&fs), store)?;

    let opts = match &args.command {
        Command::Status => {
            let plan = orchestrator.plan(&RunOptions::default())?;
            print!("{plan}");
            return Ok(EXIT_SUCCESS);
        }
        Command::Run(run) => {
            let opts = RunOptions {
                targets: run.tasks.clone(),
                force: run.force,
                concurrency: run.concurrency,
            };
            if run.dry_run {
                let plan = orchestrator.plan(&opts)?;
                print!("{plan}");
                debug!("dry-run complete (no execution)");
                return Ok(EXIT_SUCCESS);
            }
            opts
        }
        Command::Resume(resume) => RunOptions {
            targets: Vec::new(),
            force: false,
            concurrency: resume.concurrency,
        },
    };

    // Runtime event channel.
    let (rt_tx, mut rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let ctx = Arc::new(JobContext {
        root: root.clone(),
        params,
        fs,
        settings,
    });
    let mut executor = RealExecutorBackend::new(rt_tx.clone(), ctx);

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let summary = orchestrator.run(&opts, &mut rt_rx, &mut executor).await?;
    print!("{summary}");
    Ok(summary.exit_code())
}

/// Figure out the project root.
///
/// - If the manifest path has a non-empty parent (e.g. "proj/Pipedag.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Pipedag.toml" (parent = ""),
///   we fall back to the current working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
