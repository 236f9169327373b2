// src/exec/process.rs

//! Process group handling so that a job's whole process tree can be killed.

use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, Command};
use tracing::debug;

/// Put the child in its own process group (unix), so killing the group
/// reaches every process the command starts.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.kill_on_drop(true);
}

/// SIGKILL the child's process group, then reap the child itself.
pub async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone");
    }
}

/// Wait for the group leader to exit, SIGKILL whatever is left in its group,
/// then reap the leader.
///
/// The leader is only observed with `WNOWAIT` until the group has been
/// signalled. While it is an unreaped zombie its pid cannot be handed to a
/// new process, so the signal cannot land on an unrelated group.
pub async fn wait_and_reap_group(child: &mut Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        match tokio::task::spawn_blocking(move || wait_exited(pid)).await {
            Ok(Ok(())) => signal_group(pid),
            Ok(Err(e)) => debug!(pid, error = %e, "leader exit not observed; group left alone"),
            Err(e) => debug!(pid, error = %e, "leader wait task failed"),
        }
    }
    child.wait().await
}

/// Block until `pid` has exited, leaving it waitable.
#[cfg(unix)]
fn wait_exited(pid: u32) -> io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain old data and waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: WNOWAIT leaves the child's exit status for `Child::wait`.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that process group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "process group not signalled");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn leftover_background_processes_are_killed_with_the_leader() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sleep 30 & echo started")
            .stdout(Stdio::piped());
        isolate(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let mut stdout = child.stdout.take().unwrap();

        let status = wait_and_reap_group(&mut child).await.unwrap();
        assert!(status.success());

        // The pipe only closes once the backgrounded sleep is gone too.
        let mut out = String::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_string(&mut out))
            .await
            .expect("background sleep still holds stdout")
            .unwrap();
        assert_eq!(out.trim(), "started");
    }

    #[tokio::test]
    async fn a_failing_leader_reports_its_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");
        isolate(&mut cmd);
        let mut child = cmd.spawn().unwrap();

        let status = wait_and_reap_group(&mut child).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
