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

//! Error taxonomy shared by the pipeline and the orchestrator.
//!
//! Parse, build and environment errors are terminal for a job. Runtime and
//! debugger errors are recorded next to partial results instead of replacing
//! them, see [`crate::PipelineResult`].

use std::time::Duration;

use thiserror::Error;

/// The inspection-point file is malformed. Raised before any build starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecFormatError {
    /// A directive does not start with `line:<N>`.
    #[error("line {line}: missing `line:<N>` directive in {text:?}")]
    MissingLineDirective {
        /// 1-based line of the inspection file.
        line: usize,
        /// The offending directive.
        text: String,
    },
    /// `line:<N>` is present but `N` is not a positive integer.
    #[error("line {line}: invalid line number {value:?}, expected a positive integer")]
    InvalidLineNumber {
        /// 1-based line of the inspection file.
        line: usize,
        /// The value after `line:`.
        value: String,
    },
    /// Two directives request the same source line.
    #[error("line {line}: source line {target} is already inspected by line {first}")]
    DuplicateLine {
        /// 1-based line of the second directive.
        line: usize,
        /// The duplicated source line number.
        target: usize,
        /// 1-based line of the first directive.
        first: usize,
    },
}

/// The assembler or linker rejected the program. No binary is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The assembler exited with a non-zero status.
    #[error("assembly failed:\n{diagnostics}")]
    Assemble {
        /// Assembler output, verbatim.
        diagnostics: String,
    },
    /// The linker exited with a non-zero status.
    #[error("linking failed:\n{diagnostics}")]
    Link {
        /// Linker output, verbatim.
        diagnostics: String,
    },
    /// A build tool could not be started at all.
    #[error("{tool} could not be started: {reason}")]
    ToolUnavailable {
        /// Program name.
        tool: String,
        /// Why spawning failed.
        reason: String,
    },
}

impl BuildError {
    /// The tool's diagnostic text, or the spawn failure reason.
    pub fn diagnostics(&self) -> &str {
        match self {
            Self::Assemble { diagnostics } | Self::Link { diagnostics } => diagnostics,
            Self::ToolUnavailable { reason, .. } => reason,
        }
    }

    /// Stage that failed.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Assemble { .. } => FailureStage::Assemble,
            Self::Link { .. } => FailureStage::Link,
            Self::ToolUnavailable { .. } => FailureStage::Environment,
        }
    }
}

/// The program itself misbehaved. Partial stdout is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The program could not be started.
    #[error("failed to start program: {0}")]
    Spawn(String),
    /// The program was terminated by a signal (crash or resource limit).
    #[error("program was terminated by signal {signal}")]
    Signaled {
        /// Signal number.
        signal: i32,
    },
    /// The program ran past its wall-clock budget and was killed.
    #[error("program exceeded its wall-clock limit of {}s", .limit.as_secs_f64())]
    TimedOut {
        /// Configured limit.
        limit: Duration,
    },
}

/// Register capture failed. Stdout and snapshots captured so far are kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebuggerError {
    /// The debugger could not be started.
    #[error("failed to start {debugger}: {reason}")]
    Spawn {
        /// Debugger program name.
        debugger: String,
        /// Why spawning failed.
        reason: String,
    },
    /// The debugger died from a signal.
    #[error("debugger was terminated by signal {signal}")]
    Crashed {
        /// Signal number.
        signal: i32,
    },
    /// The debugger exited with a non-zero status.
    #[error("debugger exited with status {status}: {stderr}")]
    Failed {
        /// Exit status.
        status: i32,
        /// Debugger stderr.
        stderr: String,
    },
    /// The debugger session ran past its wall-clock budget and was killed.
    #[error("debugger exceeded its wall-clock limit of {}s", .limit.as_secs_f64())]
    TimedOut {
        /// Configured limit.
        limit: Duration,
    },
}

/// The isolation layer is unavailable or broke. Never retried.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The isolation backend is not reachable at all.
    #[error("isolation environment is unavailable: {0}")]
    Unavailable(String),
    /// A sandbox could not be created or started.
    #[error("failed to provision isolation environment: {0}")]
    Provision(String),
    /// Copying a file into or out of the sandbox failed.
    #[error("failed to transfer {path}: {reason}")]
    Transfer {
        /// Path that was being copied.
        path: String,
        /// Why it failed.
        reason: String,
    },
    /// Local filesystem or process failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that end a pipeline run without any result.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed inspection-point file.
    #[error(transparent)]
    SpecFormat(#[from] SpecFormatError),
    /// Assembler or linker failure.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Workspace or environment failure.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

impl PipelineError {
    /// Stage that failed.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::SpecFormat(_) => FailureStage::Parse,
            Self::Build(e) => e.stage(),
            Self::Environment(_) => FailureStage::Environment,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Environment(EnvironmentError::Io(err))
    }
}

/// Pipeline stage a failure is attributed to.
///
/// The in-sandbox pipeline command reports the stage through its exit status so
/// the host can tell an assembler error from a crash without parsing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    /// Inspection-point file parsing.
    Parse,
    /// Assembling.
    Assemble,
    /// Linking.
    Link,
    /// Running the program (crash or signal).
    Run,
    /// Running the program (wall-clock limit).
    Timeout,
    /// Register capture.
    Capture,
    /// Workspace, I/O or missing tools.
    Environment,
}

impl FailureStage {
    /// Process exit status used by `slait pipeline` for this stage.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Parse => 2,
            Self::Assemble => 3,
            Self::Link => 4,
            Self::Run => 5,
            Self::Timeout => 6,
            Self::Capture => 7,
            Self::Environment => 8,
        }
    }

    /// Inverse of [`FailureStage::exit_code`]. `0` and unknown codes map to `None`.
    pub fn from_exit_code(code: i32) -> Option<Self> {
        Some(match code {
            2 => Self::Parse,
            3 => Self::Assemble,
            4 => Self::Link,
            5 => Self::Run,
            6 => Self::Timeout,
            7 => Self::Capture,
            8 => Self::Environment,
            _ => return None,
        })
    }
}
