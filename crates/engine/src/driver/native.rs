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

use std::path::Path;

use async_trait::async_trait;
use slait_common::{LimitsConfig, RuntimeError};
use tokio::process::Command;
use tracing::{info, warn};

use super::{ProgramRun, ProgramRunner};
use crate::{run_bounded, ExitKind};

/// Runs the program directly on this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRunner;

#[async_trait]
impl ProgramRunner for NativeRunner {
    async fn run(&self, executable: &Path, limits: &LimitsConfig) -> ProgramRun {
        let mut command = Command::new(executable);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }

        info!("Running {}", executable.display());
        let output =
            match run_bounded(command, limits.run_timeout(), limits.max_output_bytes).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Failed to start program: {}", e);
                    return ProgramRun {
                        stdout: Vec::new(),
                        status: Err(RuntimeError::Spawn(e.to_string())),
                        truncated: false,
                    };
                }
            };

        let status = match output.exit {
            ExitKind::Exited(code) => Ok(code),
            ExitKind::Signaled(signal) => Err(RuntimeError::Signaled { signal }),
            ExitKind::TimedOut => Err(RuntimeError::TimedOut { limit: limits.run_timeout() }),
        };
        ProgramRun { stdout: output.stdout, status, truncated: output.truncated }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("program");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_normal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "printf 'Hello\\n'");

        let run = NativeRunner.run(&program, &LimitsConfig::default()).await;
        assert_eq!(run.stdout, b"Hello\n");
        assert_eq!(run.status, Ok(0));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "printf 'tick'; while :; do :; done");
        let limits = LimitsConfig { run_timeout_secs: 1, ..Default::default() };

        let run = NativeRunner.run(&program, &limits).await;
        assert_eq!(run.stdout, b"tick");
        assert!(matches!(run.status, Err(RuntimeError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_crash_keeps_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "printf 'partial'; kill -SEGV $$");

        let run = NativeRunner.run(&program, &LimitsConfig::default()).await;
        assert_eq!(run.stdout, b"partial");
        assert_eq!(run.status, Err(RuntimeError::Signaled { signal: 11 }));
    }
}
