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

//! Build stage: assemble with line debug info, link statically.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use slait_common::{BuildError, LimitsConfig, ToolchainConfig};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{run_bounded, ExitKind, RunWorkspace};

/// Turns an assembly source file into an object file with line debug info.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Assembles `source` into `object`.
    async fn assemble(&self, source: &Path, object: &Path) -> Result<(), BuildError>;
}

/// Turns an object file into a static executable.
#[async_trait]
pub trait Linker: Send + Sync {
    /// Links `object` into `executable`.
    async fn link(&self, object: &Path, executable: &Path) -> Result<(), BuildError>;
}

/// External build tool invocation settings shared by [`NasmAssembler`] and [`LdLinker`].
#[derive(Debug, Clone)]
struct ToolInvocation {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output: usize,
}

impl ToolInvocation {
    /// Runs `<program> <args> -o <output> <input>` inside `input`'s directory.
    async fn run(&self, input: &Path, output: &Path) -> Result<Result<(), String>, BuildError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("-o").arg(relative_to_parent(output, input)).arg(file_name(input));
        if let Some(dir) = input.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let output = run_bounded(command, self.timeout, self.max_output).await.map_err(|e| {
            BuildError::ToolUnavailable { tool: self.program.clone(), reason: e.to_string() }
        })?;

        Ok(match output.exit {
            ExitKind::Exited(0) => Ok(()),
            ExitKind::TimedOut => {
                Err(format!("{} timed out after {}s", self.program, self.timeout.as_secs_f64()))
            }
            ExitKind::Exited(code) => {
                let diagnostics = output.diagnostics();
                Err(if diagnostics.is_empty() {
                    format!("{} exited with status {code}", self.program)
                } else {
                    diagnostics
                })
            }
            ExitKind::Signaled(signal) => {
                Err(format!("{} was terminated by signal {signal}", self.program))
            }
        })
    }
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or(path.as_os_str())
}

fn relative_to_parent<'a>(output: &'a Path, input: &Path) -> &'a Path {
    match (output.parent(), input.parent()) {
        (Some(a), Some(b)) if a == b => Path::new(file_name(output)),
        _ => output,
    }
}

/// `nasm` with DWARF line information.
#[derive(Debug, Clone)]
pub struct NasmAssembler {
    tool: ToolInvocation,
}

impl NasmAssembler {
    /// Builds the assembler from configuration.
    pub fn new(toolchain: &ToolchainConfig, limits: &LimitsConfig) -> Self {
        Self {
            tool: ToolInvocation {
                program: toolchain.assembler.clone(),
                args: toolchain.assembler_args.clone(),
                timeout: limits.build_timeout(),
                max_output: limits.max_output_bytes,
            },
        }
    }
}

#[async_trait]
impl Assembler for NasmAssembler {
    async fn assemble(&self, source: &Path, object: &Path) -> Result<(), BuildError> {
        self.tool.run(source, object).await?.map_err(|diagnostics| BuildError::Assemble { diagnostics })
    }
}

/// `ld -static`.
#[derive(Debug, Clone)]
pub struct LdLinker {
    tool: ToolInvocation,
}

impl LdLinker {
    /// Builds the linker from configuration.
    pub fn new(toolchain: &ToolchainConfig, limits: &LimitsConfig) -> Self {
        Self {
            tool: ToolInvocation {
                program: toolchain.linker.clone(),
                args: toolchain.linker_args.clone(),
                timeout: limits.build_timeout(),
                max_output: limits.max_output_bytes,
            },
        }
    }
}

#[async_trait]
impl Linker for LdLinker {
    async fn link(&self, object: &Path, executable: &Path) -> Result<(), BuildError> {
        self.tool.run(object, executable).await?.map_err(|diagnostics| BuildError::Link { diagnostics })
    }
}

/// Assembles and links the workspace's source, returning the executable.
///
/// `lines` are the requested breakpoint lines; those past the end of the
/// source can never be hit and are appended to `warnings` before building,
/// so they are kept even when the build fails.
pub async fn build_executable(
    assembler: &dyn Assembler,
    linker: &dyn Linker,
    workspace: &RunWorkspace,
    source_text: &str,
    lines: &[usize],
    warnings: &mut Vec<String>,
) -> Result<PathBuf, BuildError> {
    let line_count = source_text.lines().count();
    for &line in lines.iter().filter(|&&l| l > line_count) {
        let message = format!("line {line} is past the end of the source ({line_count} lines)");
        warn!("{}", message);
        warnings.push(message);
    }

    info!("Assembling {}", workspace.source().display());
    assembler.assemble(&workspace.source(), &workspace.object()).await?;

    info!("Linking {}", workspace.executable().display());
    linker.link(&workspace.object(), &workspace.executable()).await?;

    Ok(workspace.executable())
}
