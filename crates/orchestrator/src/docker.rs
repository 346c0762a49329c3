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

//! Docker CLI adapter.
//!
//! Each sandbox is a container created from the sandbox image with a
//! long-running `sleep`, so the pipeline can be run through `docker exec` and
//! its files moved with `docker cp`.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use slait_common::{EnvironmentError, SandboxConfig};
use slait_engine::{run_bounded, ExitKind, ProcessOutput};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{ExecOutcome, IsolationProvider, Sandbox};

/// Bound for the short management commands (`create`, `cp`, `rm`).
const DOCKER_CLI_TIMEOUT: Duration = Duration::from_secs(60);
const DOCKER_CLI_MAX_OUTPUT: usize = 64 * 1024;

/// Provisions containers through the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerProvider {
    docker: String,
    config: SandboxConfig,
    max_output: usize,
}

impl DockerProvider {
    /// Uses `docker` from `PATH`.
    pub fn new(config: SandboxConfig) -> Self {
        Self { docker: "docker".to_string(), config, max_output: 1024 * 1024 }
    }

    /// Uses a different client binary (e.g. `podman`).
    pub fn with_client(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    /// Caps captured exec logs at `bytes` per stream.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    /// Checks that the client can talk to a daemon.
    pub async fn ensure_available(&self) -> Result<(), EnvironmentError> {
        let output = docker(&self.docker, &["version".to_string()])
            .await
            .map_err(|e| EnvironmentError::Unavailable(e.to_string()))?;
        if output.exit != ExitKind::Exited(0) {
            return Err(EnvironmentError::Unavailable(format!(
                "`{} version` failed; is the daemon running and are you allowed to use it?\n{}",
                self.docker,
                output.diagnostics()
            )));
        }
        Ok(())
    }

    /// Arguments of the `docker create` call.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if self.config.network_disabled {
            args.extend(["--network".to_string(), "none".to_string()]);
        }
        if let Some(memory) = &self.config.memory_limit {
            args.extend(["--memory".to_string(), memory.clone()]);
        }
        if let Some(pids) = self.config.pids_limit {
            args.extend(["--pids-limit".to_string(), pids.to_string()]);
        }
        if let Some(cpus) = &self.config.cpus {
            args.extend(["--cpus".to_string(), cpus.clone()]);
        }
        args.extend([self.config.image.clone(), "sleep".to_string(), "infinity".to_string()]);
        args
    }
}

#[async_trait]
impl IsolationProvider for DockerProvider {
    async fn provision(&self) -> Result<Box<dyn Sandbox>, EnvironmentError> {
        let create = docker(&self.docker, &self.create_args()).await?;
        let id = create.stdout_text().trim().to_string();
        if create.exit != ExitKind::Exited(0) || id.is_empty() {
            return Err(EnvironmentError::Provision(format!(
                "docker create returned no container id: {}",
                create.diagnostics()
            )));
        }

        let sandbox = DockerSandbox {
            docker: self.docker.clone(),
            id,
            work_dir: self.config.work_dir.clone(),
            max_output: self.max_output,
        };

        let start = docker(&self.docker, &["start".to_string(), sandbox.id.clone()]).await?;
        if start.exit != ExitKind::Exited(0) {
            if let Err(e) = sandbox.destroy().await {
                warn!(container = %sandbox.id, "Failed to remove unstarted container: {}", e);
            }
            return Err(EnvironmentError::Provision(format!(
                "docker start {} failed: {}",
                sandbox.id,
                start.diagnostics()
            )));
        }

        info!(container = %sandbox.id, image = %self.config.image, "Provisioned container");
        Ok(Box::new(sandbox))
    }
}

/// A started container.
#[derive(Debug)]
pub struct DockerSandbox {
    docker: String,
    id: String,
    work_dir: String,
    max_output: usize,
}

impl DockerSandbox {
    fn container_path(&self, name: &str) -> String {
        format!("{}:{}/{name}", self.id, self.work_dir.trim_end_matches('/'))
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn work_dir(&self) -> String {
        self.work_dir.clone()
    }

    async fn copy_in(&self, host: &Path, name: &str) -> Result<(), EnvironmentError> {
        let args = ["cp".to_string(), host.display().to_string(), self.container_path(name)];
        let output = docker(&self.docker, &args).await?;
        if output.exit != ExitKind::Exited(0) {
            return Err(EnvironmentError::Transfer {
                path: host.display().to_string(),
                reason: output.diagnostics(),
            });
        }
        Ok(())
    }

    async fn exec(&self, args: &[String], limit: Duration) -> Result<ExecOutcome, EnvironmentError> {
        let mut command = Command::new(&self.docker);
        command.arg("exec").arg(&self.id).args(args);
        let output = run_bounded(command, limit, self.max_output).await?;
        if output.exit == ExitKind::TimedOut {
            // killing the client does not stop the process inside the container
            warn!(container = %self.id, "docker exec timed out");
        }
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
        let args = ["cp".to_string(), self.container_path(name), host.display().to_string()];
        let output = docker(&self.docker, &args).await?;
        if output.exit != ExitKind::Exited(0) {
            debug!(container = %self.id, "docker cp of {} failed: {}", name, output.diagnostics());
            return Ok(false);
        }
        Ok(true)
    }

    async fn destroy(&self) -> Result<(), EnvironmentError> {
        let output = docker(&self.docker, &["rm".to_string(), "-f".to_string(), self.id.clone()]).await?;
        if output.exit != ExitKind::Exited(0) {
            return Err(EnvironmentError::Provision(format!(
                "docker rm -f {} failed: {}",
                self.id,
                output.diagnostics()
            )));
        }
        debug!(container = %self.id, "Removed container");
        Ok(())
    }
}

async fn docker(client: &str, args: &[String]) -> Result<ProcessOutput, EnvironmentError> {
    let mut command = Command::new(client);
    command.args(args);
    let output = run_bounded(command, DOCKER_CLI_TIMEOUT, DOCKER_CLI_MAX_OUTPUT)
        .await
        .map_err(|e| EnvironmentError::Unavailable(format!("failed to run {client}: {e}")))?;
    if output.exit == ExitKind::TimedOut {
        return Err(EnvironmentError::Unavailable(format!(
            "`{client} {}` did not finish within {}s",
            args.first().map(String::as_str).unwrap_or_default(),
            DOCKER_CLI_TIMEOUT.as_secs()
        )));
    }
    Ok(output)
}
