// src/exec/task_runner.rs

//! Individual job execution: render, prepare directories, spawn, supervise,
//! verify outputs, clean up after failures.

use std::collections::VecDeque;
use std::future::pending;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use globset::GlobSet;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Parameters, RunSettings};
use crate::dag::{ScheduledJob, TaskInstance};
use crate::engine::{JobOutcome, RuntimeEvent};
use crate::errors::PipedagError;
use crate::exec::command::{PreparedCommand, render_command, render_dirs};
use crate::exec::process;
use crate::fs::FileSystem;
use crate::fs::scan::list_files;
use crate::pattern::build_globset;
use crate::state::FailureReason;
use crate::state::hash::compute_inputs_hash;

/// Grace period for the output readers once the process tree is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Everything a job needs besides the instance itself. Shared by all jobs of
/// one invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub root: PathBuf,
    pub params: Arc<Parameters>,
    pub fs: Arc<dyn FileSystem>,
    pub settings: RunSettings,
}

/// Run one job and report its outcome to the runtime.
///
/// A cancellation request kills the process tree and still reports a
/// (cancelled) completion, so the scheduler never waits on a lost job.
pub async fn run_job(
    job: ScheduledJob,
    ctx: Arc<JobContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let outcome = execute_job(&job, &ctx, cancel_rx).await;
    let label = job.instance.label();
    if runtime_tx
        .send(RuntimeEvent::JobFinished {
            slot: job.slot,
            outcome,
        })
        .await
        .is_err()
    {
        error!(instance = %label, "runtime gone; job completion dropped");
    }
}

enum Ended {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Execute a job to completion without talking to the runtime.
pub async fn execute_job(
    job: &ScheduledJob,
    ctx: &JobContext,
    cancel_rx: oneshot::Receiver<()>,
) -> JobOutcome {
    let started = Utc::now();
    let inst = &job.instance;
    let label = inst.label();

    let command = match render_command(inst, &ctx.params, &ctx.settings.shell) {
        Ok(c) => c,
        Err(e) => {
            warn!(task = %inst.task_id(), instance = %label, error = %e, "command not resolvable");
            return JobOutcome::failed(started, preparation_failure(e));
        }
    };

    if let Err(reason) = prepare_dirs(inst, ctx) {
        warn!(task = %inst.task_id(), instance = %label, %reason, "job setup failed");
        return JobOutcome::failed(started, reason);
    }

    info!(
        task = %inst.task_id(),
        instance = %label,
        attempt = job.attempt,
        cmd = %command,
        "starting job"
    );

    let mut child = match spawn_with_retry(&command, ctx, &label).await {
        Ok(child) => child,
        Err(e) => {
            warn!(task = %inst.task_id(), instance = %label, error = %e, "spawn failed");
            return JobOutcome::failed(started, FailureReason::SpawnFailed(e.to_string()));
        }
    };

    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(ctx.settings.output_tail_lines)));
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, "stdout", label.clone(), Arc::clone(&tail), ctx.settings.output_tail_lines));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, "stderr", label.clone(), Arc::clone(&tail), ctx.settings.output_tail_lines));
    }

    let timeout = inst.task.timeout.or(ctx.settings.default_timeout);
    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => pending::<()>().await,
        }
    };
    // A dropped sender means nobody will ever cancel this job.
    let cancelled = async move {
        if cancel_rx.await.is_err() {
            pending::<()>().await;
        }
    };

    let ended = tokio::select! {
        status = process::wait_and_reap_group(&mut child) => Ended::Exited(status),
        _ = deadline => Ended::TimedOut,
        _ = cancelled => Ended::Cancelled,
    };

    let (mut result, exit_code) = match ended {
        Ended::Exited(Ok(status)) => {
            let code = status.code();
            if status.success() {
                (Ok(()), code)
            } else {
                (Err(FailureReason::NonZeroExit), code)
            }
        }
        Ended::Exited(Err(e)) => {
            process::kill_tree(&mut child).await;
            (Err(FailureReason::Setup(format!("waiting for process: {e}"))), None)
        }
        Ended::TimedOut => {
            warn!(task = %inst.task_id(), instance = %label, ?timeout, "job timed out; killing process tree");
            process::kill_tree(&mut child).await;
            (Err(FailureReason::Timeout), None)
        }
        Ended::Cancelled => {
            info!(task = %inst.task_id(), instance = %label, "job cancelled; killing process tree");
            process::kill_tree(&mut child).await;
            (Err(FailureReason::Cancelled), None)
        }
    };

    for reader in readers {
        if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
            debug!(instance = %label, "output reader still open after process exit");
        }
    }

    if result.is_ok() {
        result = verify_outputs(inst, ctx);
    }

    let mut outcome = match result {
        Ok(()) => {
            let mut outcome = JobOutcome::succeeded(started);
            if inst.task.use_hash {
                match compute_inputs_hash(ctx.fs.as_ref(), &ctx.root, &inst.inputs) {
                    Ok(hash) => outcome.input_hash = Some(hash),
                    Err(e) => debug!(instance = %label, error = %e, "input hash not recorded"),
                }
            }
            outcome
        }
        Err(reason) => {
            clean_outputs(inst, ctx);
            JobOutcome::failed(started, reason)
        }
    };
    outcome.exit_code = exit_code;
    outcome.output_tail = tail
        .lock()
        .map(|t| t.iter().cloned().collect())
        .unwrap_or_default();

    debug!(
        task = %inst.task_id(),
        instance = %label,
        exit_code = ?outcome.exit_code,
        success = outcome.is_success(),
        "job finished"
    );
    outcome
}

fn preparation_failure(err: PipedagError) -> FailureReason {
    match err {
        PipedagError::UnresolvedParameter { name, .. } => FailureReason::UnresolvedParameter(name),
        other => FailureReason::Setup(other.to_string()),
    }
}

fn prepare_dirs(inst: &TaskInstance, ctx: &JobContext) -> Result<(), FailureReason> {
    let dirs = render_dirs(inst, &ctx.params).map_err(preparation_failure)?;
    for dir in dirs {
        ctx.fs
            .create_dir_all(&ctx.root.join(&dir))
            .map_err(|e| FailureReason::Setup(format!("creating {dir}: {e:#}")))?;
    }
    Ok(())
}

fn is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        WouldBlock | Interrupted | TimedOut | OutOfMemory | ResourceBusy | ExecutableFileBusy
    )
}

async fn spawn_with_retry(
    prepared: &PreparedCommand,
    ctx: &JobContext,
    label: &str,
) -> std::io::Result<Child> {
    let mut attempt = 0u32;
    let mut backoff = ctx.settings.transient_backoff;

    loop {
        let mut cmd = Command::new(&prepared.program);
        cmd.args(&prepared.args)
            .envs(&prepared.env)
            .current_dir(&ctx.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if is_transient(&e) && attempt < ctx.settings.transient_retries => {
                attempt += 1;
                warn!(
                    instance = %label,
                    error = %e,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "spawn rejected; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

fn spawn_reader<R>(
    stream: R,
    name: &'static str,
    label: String,
    tail: Arc<Mutex<VecDeque<String>>>,
    keep: usize,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(instance = %label, stream = name, "{}", line);
            if keep == 0 {
                continue;
            }
            if let Ok(mut t) = tail.lock() {
                if t.len() == keep {
                    t.pop_front();
                }
                t.push_back(line);
            }
        }
    })
}

/// Concrete outputs must exist; each glob output must match at least one file.
fn verify_outputs(inst: &TaskInstance, ctx: &JobContext) -> Result<(), FailureReason> {
    for output in declared_outputs(inst) {
        if !ctx.fs.is_file(&ctx.root.join(output)) {
            return Err(FailureReason::MissingOutput(output.to_string()));
        }
    }

    if inst.glob_outputs.is_empty() {
        return Ok(());
    }
    let produced = current_glob_matches(inst, ctx)?;
    for glob in inst.glob_outputs.iter() {
        if !produced.iter().any(|(pattern, _)| pattern == &glob.pattern) {
            return Err(FailureReason::MissingOutput(glob.pattern.clone()));
        }
    }
    Ok(())
}

/// Outputs with a fixed path (glob matches excluded).
fn declared_outputs(inst: &TaskInstance) -> impl Iterator<Item = &str> {
    inst.outputs
        .iter()
        .filter(|o| !inst.glob_outputs.iter().any(|g| g.matches.contains(o)))
        .map(String::as_str)
}

/// `(pattern, path)` for every file currently matching a glob output.
fn current_glob_matches(
    inst: &TaskInstance,
    ctx: &JobContext,
) -> Result<Vec<(String, String)>, FailureReason> {
    let listing = list_files(
        ctx.fs.as_ref(),
        &ctx.root,
        std::slice::from_ref(&ctx.settings.state_dir),
        &GlobSet::empty(),
    )
    .map_err(|e| FailureReason::Setup(format!("listing outputs: {e:#}")))?;

    let mut out = Vec::new();
    for glob in inst.glob_outputs.iter() {
        let set = build_globset(std::slice::from_ref(&glob.pattern))
            .map_err(|e| FailureReason::Setup(format!("{e:#}")))?;
        out.extend(
            listing
                .iter()
                .filter(|p| set.is_match(p.as_str()) && !inst.inputs.contains(p))
                .map(|p| (glob.pattern.clone(), p.clone())),
        );
    }
    Ok(out)
}

/// Remove or quarantine whatever outputs a failed job left behind.
fn clean_outputs(inst: &TaskInstance, ctx: &JobContext) {
    let mut leftovers: Vec<String> = declared_outputs(inst)
        .filter(|o| ctx.fs.is_file(&ctx.root.join(o)))
        .map(str::to_string)
        .collect();
    if !inst.glob_outputs.is_empty() {
        if let Ok(matches) = current_glob_matches(inst, ctx) {
            leftovers.extend(matches.into_iter().map(|(_, p)| p));
        }
    }
    leftovers.sort();
    leftovers.dedup();

    for output in leftovers {
        let path = ctx.root.join(&output);
        let result = if ctx.settings.quarantine_failed_outputs {
            quarantine(ctx, inst, &output, &path)
        } else {
            ctx.fs.remove_file(&path)
        };
        match result {
            Ok(()) => debug!(
                instance = %inst.label(),
                output = %output,
                quarantined = ctx.settings.quarantine_failed_outputs,
                "partial output cleaned"
            ),
            Err(e) => warn!(instance = %inst.label(), output = %output, error = %e, "could not clean partial output"),
        }
    }
}

fn quarantine(ctx: &JobContext, inst: &TaskInstance, output: &str, path: &Path) -> anyhow::Result<()> {
    let short_id = inst.id.get(..12).unwrap_or(&inst.id);
    let target = ctx
        .root
        .join(&ctx.settings.state_dir)
        .join("quarantine")
        .join(short_id)
        .join(output);
    if let Some(parent) = target.parent() {
        ctx.fs.create_dir_all(parent)?;
    }
    ctx.fs.rename(path, &target)
}
