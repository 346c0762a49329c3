// SLAIT - Sandboxed Line-level Assembly Inspection Toolkit
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Time- and output-bounded subprocess execution.
//!
//! Every external tool (assembler, linker, the user's program, the debugger,
//! the container CLI) is started through [`run_bounded`]. The child gets its
//! own process group so that a timeout kills the whole tree, including a
//! debugger's inferior. Output is streamed into shared buffers while the child
//! runs, which keeps everything read before a kill.

use std::{process::Stdio, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Grace period for the output readers after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a bounded process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(i32),
    /// Killed after exceeding its wall-clock limit.
    TimedOut,
}

/// Everything captured from a bounded process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Stdout bytes, at most `max_output` of them.
    pub stdout: Vec<u8>,
    /// Stderr bytes, at most `max_output` of them.
    pub stderr: Vec<u8>,
    /// How the process ended.
    pub exit: ExitKind,
    /// Whether stdout or stderr hit the output cap.
    pub truncated: bool,
}

impl ProcessOutput {
    /// Stdout decoded lossily.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stderr followed by stdout, trimmed. Build tools split diagnostics across both.
    pub fn diagnostics(&self) -> String {
        let mut text = self.stderr_text();
        let stdout = self.stdout_text();
        if !stdout.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stdout);
        }
        text.trim_end().to_string()
    }
}

#[derive(Debug, Default)]
struct CappedBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedBuffer = Arc<Mutex<CappedBuffer>>;

/// Runs `command` with stdin closed, a wall-clock `limit` and at most
/// `max_output` bytes kept per stream.
///
/// Spawn failures are returned as `Err`; everything after a successful spawn
/// (non-zero exit, signal, timeout) is described by [`ProcessOutput::exit`].
pub async fn run_bounded(
    mut command: Command,
    limit: Duration,
    max_output: usize,
) -> std::io::Result<ProcessOutput> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    debug!(?pid, "Spawned bounded process");

    let stdout_buf = SharedBuffer::default();
    let stderr_buf = SharedBuffer::default();
    let stdout_task = child.stdout.take().map(|s| spawn_drain(s, stdout_buf.clone(), max_output));
    let stderr_task = child.stderr.take().map(|s| spawn_drain(s, stderr_buf.clone(), max_output));

    let exit = match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => exit_kind(status),
        Ok(Err(e)) => {
            warn!(?pid, "Waiting for process failed: {}", e);
            abandon(pid, [stdout_task, stderr_task]);
            return Err(e);
        }
        Err(_) => {
            warn!(?pid, limit_secs = limit.as_secs_f64(), "Process exceeded its time limit, killing");
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                debug!("Kill after timeout failed: {}", e);
            }
            ExitKind::TimedOut
        }
    };

    // Leftover group members (e.g. a debugger's inferior) would keep the pipes open
    kill_process_group(pid);

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
            debug!(?pid, "Output reader did not finish in time, keeping what was read");
        }
    }

    let (stdout, stdout_truncated) = take_buffer(&stdout_buf);
    let (stderr, stderr_truncated) = take_buffer(&stderr_buf);
    Ok(ProcessOutput { stdout, stderr, exit, truncated: stdout_truncated || stderr_truncated })
}

fn spawn_drain<R>(mut reader: R, buffer: SharedBuffer, max_output: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut buf = buffer.lock();
                    let room = max_output.saturating_sub(buf.bytes.len());
                    if n > room {
                        buf.truncated = true;
                    }
                    buf.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) => {
                    debug!("Output stream read failed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Kills the group and stops its output readers without waiting for either.
fn abandon(pid: Option<u32>, tasks: [Option<JoinHandle<()>>; 2]) {
    kill_process_group(pid);
    for task in tasks.into_iter().flatten() {
        task.abort();
    }
}

fn take_buffer(buffer: &SharedBuffer) -> (Vec<u8>, bool) {
    let mut buf = buffer.lock();
    (std::mem::take(&mut buf.bytes), buf.truncated)
}

#[cfg(unix)]
fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitKind::Exited(code),
        (None, Some(signal)) => ExitKind::Signaled(signal),
        (None, None) => ExitKind::Exited(-1),
    }
}

#[cfg(not(unix))]
fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    ExitKind::Exited(status.code().unwrap_or(-1))
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::{
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else { return };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!(pid, "killpg failed: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let output = run_bounded(sh("printf 'Hello\\n'; exit 3"), Duration::from_secs(5), 1024)
            .await
            .unwrap();

        assert_eq!(output.stdout, b"Hello\n");
        assert_eq!(output.exit, ExitKind::Exited(3));
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_stdout() {
        let output =
            run_bounded(sh("printf 'before'; sleep 30"), Duration::from_millis(300), 1024)
                .await
                .unwrap();

        assert_eq!(output.exit, ExitKind::TimedOut);
        assert_eq!(output.stdout, b"before");
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let output = run_bounded(sh("kill -SEGV $$"), Duration::from_secs(5), 1024).await.unwrap();
        assert_eq!(output.exit, ExitKind::Signaled(11));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let output =
            run_bounded(sh("yes | head -c 10000"), Duration::from_secs(5), 100).await.unwrap();
        assert_eq!(output.stdout.len(), 100);
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let command = Command::new("/nonexistent/slait-test-binary");
        assert!(run_bounded(command, Duration::from_secs(1), 16).await.is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_merge_streams() {
        let output = run_bounded(
            sh("echo 'to stderr' >&2; echo 'to stdout'; exit 1"),
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();

        assert_eq!(output.diagnostics(), "to stderr\nto stdout");
        assert_eq!(output.exit, ExitKind::Exited(1));
    }

    #[tokio::test]
    async fn test_abandon_kills_the_group_and_its_readers() {
        let mut command = sh("sleep 30 & wait");
        command.stdout(Stdio::piped()).process_group(0);
        let mut child = command.spawn().unwrap();
        let buffer = SharedBuffer::default();
        let reader = spawn_drain(child.stdout.take().unwrap(), buffer, 16);
        let handle = reader.abort_handle();

        abandon(child.id(), [Some(reader), None]);

        let status =
            tokio::time::timeout(Duration::from_secs(5), child.wait()).await.unwrap().unwrap();
        assert_eq!(exit_kind(status), ExitKind::Signaled(9));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }
}
