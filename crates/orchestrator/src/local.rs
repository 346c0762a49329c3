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

use std::{fs, path::Path, time::Duration};

use async_trait::async_trait;
use slait_common::EnvironmentError;
use slait_engine::{run_bounded, ExitKind};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::info;

use crate::{ExecOutcome, IsolationProvider, Sandbox};

/// Sandboxes that are plain scratch directories on the host.
///
/// No isolation at all; meant for development and tests on a machine that
/// already has the toolchain installed.
#[derive(Debug, Clone, Default)]
pub struct LocalProvider {
    max_output: Option<usize>,
    envs: Vec<(String, String)>,
}

impl LocalProvider {
    /// Sets an environment variable for every command run in the sandboxes.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Caps captured exec logs at `bytes` per stream.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = Some(bytes);
        self
    }
}

#[async_trait]
impl IsolationProvider for LocalProvider {
    async fn provision(&self) -> Result<Box<dyn Sandbox>, EnvironmentError> {
        let dir = tempfile::Builder::new()
            .prefix("slait-sandbox-")
            .tempdir()
            .map_err(|e| EnvironmentError::Provision(e.to_string()))?;
        let id = dir.path().file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        info!(sandbox = %id, "Provisioned local sandbox");
        Ok(Box::new(LocalSandbox {
            dir,
            id,
            max_output: self.max_output.unwrap_or(1024 * 1024),
            envs: self.envs.clone(),
        }))
    }
}

/// A scratch directory standing in for a container.
#[derive(Debug)]
pub struct LocalSandbox {
    dir: TempDir,
    id: String,
    max_output: usize,
    envs: Vec<(String, String)>,
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn work_dir(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    async fn copy_in(&self, host: &Path, name: &str) -> Result<(), EnvironmentError> {
        fs::copy(host, self.dir.path().join(name)).map_err(|e| EnvironmentError::Transfer {
            path: host.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn exec(&self, args: &[String], limit: Duration) -> Result<ExecOutcome, EnvironmentError> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| EnvironmentError::Provision("empty command".to_string()))?;
        let mut command = Command::new(program);
        command.args(rest).envs(self.envs.iter().cloned()).current_dir(self.dir.path());

        let output = run_bounded(command, limit, self.max_output).await?;
        Ok(ExecOutcome {
            status: match output.exit {
                ExitKind::Exited(code) => Some(code),
                _ => None,
            },
            timed_out: output.exit == ExitKind::TimedOut,
            logs: ExecOutcome::join_logs(&output.stdout_text(), &output.stderr_text()),
        })
    }

    async fn copy_out(&self, name: &str, host: &Path) -> Result<bool, EnvironmentError> {
        let source = self.dir.path().join(name);
        if !source.is_file() {
            return Ok(false);
        }
        fs::copy(&source, host).map_err(|e| EnvironmentError::Transfer {
            path: source.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(true)
    }

    async fn destroy(&self) -> Result<(), EnvironmentError> {
        // the directory itself goes away with the TempDir
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_copy_exec_copy() {
        let host = tempfile::tempdir().unwrap();
        let input = host.path().join("in.txt");
        fs::write(&input, "hello").unwrap();

        let sandbox = LocalProvider::default().provision().await.unwrap();
        sandbox.copy_in(&input, "program.asm").await.unwrap();

        let outcome = sandbox
            .exec(&sh("cat program.asm > out.txt; echo done; echo oops >&2"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.status, Some(0));
        assert!(!outcome.timed_out);
        assert_eq!(outcome.logs, "done\noops\n");

        let copied = host.path().join("copied.txt");
        assert!(sandbox.copy_out("out.txt", &copied).await.unwrap());
        assert_eq!(fs::read_to_string(copied).unwrap(), "hello");
        assert!(!sandbox.copy_out("missing.txt", &host.path().join("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let sandbox = LocalProvider::default().provision().await.unwrap();
        let outcome = sandbox.exec(&sh("sleep 30"), Duration::from_millis(200)).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.status, None);
    }

    #[tokio::test]
    async fn test_env_reaches_commands() {
        let sandbox =
            LocalProvider::default().with_env("SLAIT_TEST_VALUE", "42").provision().await.unwrap();
        let outcome =
            sandbox.exec(&sh("printf \"$SLAIT_TEST_VALUE\""), Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.status, Some(0));
        assert_eq!(outcome.logs.trim(), "42");
    }
}
