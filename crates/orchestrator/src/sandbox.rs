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

//! Isolation contract.
//!
//! A sandbox is used in exactly one way: place two inputs, run one bounded
//! command, retrieve its outputs, destroy. Providers decide what "isolated"
//! means (a locked-down container, or a scratch directory during development).

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use slait_common::EnvironmentError;
use tracing::{debug, warn};

/// Outcome of the one command run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit status; `None` when the command was killed.
    pub status: Option<i32>,
    /// Whether the command was killed for exceeding its time limit.
    pub timed_out: bool,
    /// Combined stdout and stderr of the command, kept for diagnostics.
    pub logs: String,
}

impl ExecOutcome {
    /// Joins captured stdout and stderr the way exec logs are reported.
    pub fn join_logs(stdout: &str, stderr: &str) -> String {
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{stderr}", stdout.trim_end_matches('\n')),
        }
    }
}

/// One provisioned isolation environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier for logs (container id, directory name).
    fn id(&self) -> &str;

    /// Directory inside the sandbox where inputs are placed and outputs are expected.
    fn work_dir(&self) -> String;

    /// Copies a host file into the work directory as `name`.
    async fn copy_in(&self, host: &Path, name: &str) -> Result<(), EnvironmentError>;

    /// Runs `args[0]` with the remaining arguments, killing it after `limit`.
    async fn exec(&self, args: &[String], limit: Duration) -> Result<ExecOutcome, EnvironmentError>;

    /// Copies `name` out of the work directory. Returns `false` if it does not exist.
    async fn copy_out(&self, name: &str, host: &Path) -> Result<bool, EnvironmentError>;

    /// Tears the sandbox down. Must be safe to call on a half-started sandbox.
    async fn destroy(&self) -> Result<(), EnvironmentError>;
}

/// Creates sandboxes.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    /// Provisions a fresh, started sandbox.
    async fn provision(&self) -> Result<Box<dyn Sandbox>, EnvironmentError>;
}

/// Owns a sandbox and makes sure it is destroyed.
///
/// Callers await [`SandboxGuard::destroy`] on every path they control. If the
/// guard is dropped instead, because the caller's own future was dropped,
/// destruction is spawned onto the current tokio runtime.
pub struct SandboxGuard {
    sandbox: Arc<dyn Sandbox>,
    armed: bool,
}

impl SandboxGuard {
    /// Takes ownership of `sandbox`.
    pub fn new(sandbox: Box<dyn Sandbox>) -> Self {
        Self { sandbox: Arc::from(sandbox), armed: true }
    }

    /// The guarded sandbox.
    pub fn sandbox(&self) -> &dyn Sandbox {
        self.sandbox.as_ref()
    }

    /// Destroys the sandbox now.
    pub async fn destroy(mut self) -> Result<(), EnvironmentError> {
        self.armed = false;
        debug!(sandbox = self.sandbox.id(), "Destroying sandbox");
        self.sandbox.destroy().await
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let sandbox = self.sandbox.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sandbox.destroy().await {
                        warn!(sandbox = sandbox.id(), "Failed to destroy sandbox: {}", e);
                    }
                });
            }
            Err(_) => warn!(sandbox = sandbox.id(), "No runtime to destroy sandbox; it may leak"),
        }
    }
}

impl std::fmt::Debug for SandboxGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxGuard")
            .field("sandbox", &self.sandbox.id())
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder(Arc<Mutex<bool>>);

    #[async_trait]
    impl Sandbox for Recorder {
        fn id(&self) -> &str {
            "recorder"
        }
        fn work_dir(&self) -> String {
            "/work".into()
        }
        async fn copy_in(&self, _: &Path, _: &str) -> Result<(), EnvironmentError> {
            Ok(())
        }
        async fn exec(&self, _: &[String], _: Duration) -> Result<ExecOutcome, EnvironmentError> {
            Ok(ExecOutcome::default())
        }
        async fn copy_out(&self, _: &str, _: &Path) -> Result<bool, EnvironmentError> {
            Ok(false)
        }
        async fn destroy(&self) -> Result<(), EnvironmentError> {
            *self.0.lock() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_explicit_destroy() {
        let destroyed = Arc::new(Mutex::new(false));
        let guard = SandboxGuard::new(Box::new(Recorder(destroyed.clone())));
        guard.destroy().await.unwrap();
        assert!(*destroyed.lock());
    }

    #[tokio::test]
    async fn test_drop_schedules_destroy() {
        let destroyed = Arc::new(Mutex::new(false));
        drop(SandboxGuard::new(Box::new(Recorder(destroyed.clone()))));
        for _ in 0..50 {
            if *destroyed.lock() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(*destroyed.lock());
    }

    #[test]
    fn test_join_logs() {
        assert_eq!(ExecOutcome::join_logs("out\n", "err"), "out\nerr");
        assert_eq!(ExecOutcome::join_logs("", "err"), "err");
        assert_eq!(ExecOutcome::join_logs("out", ""), "out");
    }
}
