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

//! GDB batch scripting.
//!
//! The script is split into several command files passed with repeated `-x`
//! flags to a single `gdb -batch` process. GDB abandons the rest of a command
//! file after an error, so each breakpoint gets its own file: a line without
//! code fails only its own `break`, and its `commands` block can never attach
//! to the previous breakpoint by accident.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use slait_common::{DebuggerError, InspectionPoint, ToolchainConfig};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CaptureRequest, DebugDriver, DebugSession};
use crate::{breakpoint_marker, run_bounded, ExitKind};

/// The command files of one capture session, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdbScript {
    /// `(file name, contents)` pairs.
    pub files: Vec<(String, String)>,
    /// Register names that were dropped because GDB cannot express them as `$name`.
    pub warnings: Vec<String>,
}

impl GdbScript {
    /// Builds the script for `points`, placing breakpoints at `<source_name>:<line>`.
    pub fn new(source_name: &str, points: &[InspectionPoint]) -> Self {
        let mut files = Vec::with_capacity(points.len() + 2);
        let mut warnings = Vec::new();

        files.push((
            "inspect.gdb".to_string(),
            [
                "set pagination off",
                "set confirm off",
                "set width 0",
                "set height 0",
                "set print pretty off",
                "set breakpoint pending off",
                "",
            ]
            .join("\n"),
        ));

        for (idx, point) in points.iter().enumerate() {
            let mut body = String::new();
            let line = point.line.get();
            let _ = writeln!(body, "break {source_name}:{line}");
            body.push_str("commands\n  silent\n");
            let _ = writeln!(body, "  echo \\n{}\\n", breakpoint_marker(line));
            for name in point.captured() {
                if !is_register_identifier(name) {
                    let message = format!("line {line}: register name {name:?} cannot be captured");
                    warn!("{}", message);
                    warnings.push(message);
                    continue;
                }
                let _ = writeln!(body, "  echo {name}:\\ \n  output/x ${name}\n  echo \\n");
            }
            body.push_str("  continue\nend\n");
            files.push((format!("inspect-bp{}.gdb", idx + 1), body));
        }

        files.push(("inspect-run.gdb".to_string(), "run > /dev/null < /dev/null\nquit\n".to_string()));

        Self { files, warnings }
    }

    /// All command files concatenated, for display.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, contents) in &self.files {
            let _ = writeln!(out, "# --- {name}");
            out.push_str(contents);
            if !contents.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// Writes every command file into `dir` and returns their paths in order.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        self.files
            .iter()
            .map(|(name, contents)| {
                let path = dir.join(name);
                fs::write(&path, contents)?;
                Ok(path)
            })
            .collect()
    }
}

/// Names usable as a GDB convenience register reference (`$rax`, `$r8d`, `$eflags`).
fn is_register_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Captures registers with `gdb -batch`.
#[derive(Debug, Clone)]
pub struct GdbDriver {
    program: String,
}

impl GdbDriver {
    /// Uses the debugger named in the toolchain configuration.
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self { program: toolchain.debugger.clone() }
    }
}

impl Default for GdbDriver {
    fn default() -> Self {
        Self::new(&ToolchainConfig::default())
    }
}

#[async_trait]
impl DebugDriver for GdbDriver {
    async fn capture(&self, request: CaptureRequest<'_>) -> DebugSession {
        let script = GdbScript::new(request.source_name, request.points);
        let mut session = DebugSession { warnings: script.warnings.clone(), ..Default::default() };

        let files = match script.write_to(request.script_dir) {
            Ok(files) => files,
            Err(e) => {
                session.error = Some(DebuggerError::Spawn {
                    debugger: self.program.clone(),
                    reason: format!("failed to write script: {e}"),
                });
                return session;
            }
        };

        let mut command = Command::new(&self.program);
        command.args(["-q", "-nx", "-batch"]);
        for file in &files {
            command.arg("-x").arg(file);
        }
        command.arg(request.executable);
        if let Some(dir) = request.executable.parent() {
            command.current_dir(dir);
        }

        info!("Capturing registers at {} inspection points", request.points.len());
        let limit = request.limits.debugger_timeout();
        let output = match run_bounded(command, limit, request.limits.max_output_bytes).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to start {}: {}", self.program, e);
                session.error =
                    Some(DebuggerError::Spawn { debugger: self.program.clone(), reason: e.to_string() });
                return session;
            }
        };

        session.transcript = output.stdout_text();
        let stderr = output.stderr_text();
        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            debug!("{}: {}", self.program, line);
            session.warnings.push(format!("{}: {line}", self.program));
        }
        if output.truncated {
            session.warnings.push("debugger output was truncated".to_string());
        }

        session.error = match output.exit {
            ExitKind::Exited(0) => None,
            ExitKind::Exited(status) => {
                Some(DebuggerError::Failed { status, stderr: stderr.trim().to_string() })
            }
            ExitKind::Signaled(signal) => Some(DebuggerError::Crashed { signal }),
            ExitKind::TimedOut => Some(DebuggerError::TimedOut { limit }),
        };
        session
    }
}
