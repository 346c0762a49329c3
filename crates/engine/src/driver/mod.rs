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

//! Execution & capture driver.
//!
//! The program is run twice: once on its own to capture stdout exactly as the
//! user would see it, and once under a batch-mode debugger that stops at every
//! inspection point and prints the requested registers. Both runs are bounded.

mod gdb;
mod native;

pub use gdb::*;
pub use native::*;

use std::path::Path;

use async_trait::async_trait;
use slait_common::{DebuggerError, InspectionPoint, LimitsConfig, RuntimeError};

/// Result of running the program without a debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRun {
    /// Stdout bytes read before the program ended or was killed.
    pub stdout: Vec<u8>,
    /// Exit status, or why the program did not exit normally.
    pub status: Result<i32, RuntimeError>,
    /// Whether stdout hit the output cap.
    pub truncated: bool,
}

/// Runs the built program and captures its stdout.
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    /// Runs `executable` within `limits`.
    async fn run(&self, executable: &Path, limits: &LimitsConfig) -> ProgramRun;
}

/// Everything the debug driver needs for one capture session.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest<'a> {
    /// Executable with line debug info.
    pub executable: &'a Path,
    /// Source file name as recorded in the debug info.
    pub source_name: &'a str,
    /// Inspection points in file order.
    pub points: &'a [InspectionPoint],
    /// Directory for script files.
    pub script_dir: &'a Path,
    /// Time and output bounds.
    pub limits: &'a LimitsConfig,
}

/// Raw output of one debugger session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugSession {
    /// Debugger stdout up to termination.
    pub transcript: String,
    /// Set when the debugger failed to start, crashed or timed out.
    pub error: Option<DebuggerError>,
    /// Debugger complaints that did not stop the session.
    pub warnings: Vec<String>,
}

/// Drives a debugger non-interactively over the inspection points.
#[async_trait]
pub trait DebugDriver: Send + Sync {
    /// Runs one batch session; never fails outright so partial transcripts survive.
    async fn capture(&self, request: CaptureRequest<'_>) -> DebugSession;
}
