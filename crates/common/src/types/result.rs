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

use serde::{Deserialize, Serialize};

use crate::BreakpointSnapshot;

/// Everything one pipeline job produced.
///
/// Runtime and debugger failures are recorded here next to whatever was captured
/// before they happened; only terminal failures (see `PipelineError`) prevent a
/// result from being produced at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Program stdout, byte for byte.
    pub stdout: Vec<u8>,
    /// One snapshot per inspection point that was hit, in first-hit order.
    pub snapshots: Vec<BreakpointSnapshot>,
    /// Assembler or linker diagnostics.
    pub build_errors: Option<Vec<String>>,
    /// Crash, signal or timeout descriptions.
    pub runtime_errors: Option<Vec<String>>,
    /// Debugger attach/crash/transcript problems.
    pub debugger_errors: Option<Vec<String>>,
    /// Soft failures that did not drop any other data.
    pub warnings: Vec<String>,
    /// Exit status of the program when it exited normally.
    pub exit_code: Option<i32>,
    /// Whether the program was killed for exceeding its wall-clock budget.
    pub timed_out: bool,
}

impl PipelineResult {
    /// Records a runtime failure.
    pub fn push_runtime_error(&mut self, message: impl Into<String>) {
        self.runtime_errors.get_or_insert_with(Vec::new).push(message.into());
    }

    /// Records a debugger failure.
    pub fn push_debugger_error(&mut self, message: impl Into<String>) {
        self.debugger_errors.get_or_insert_with(Vec::new).push(message.into());
    }

    /// Records a build failure.
    pub fn push_build_error(&mut self, message: impl Into<String>) {
        self.build_errors.get_or_insert_with(Vec::new).push(message.into());
    }

    /// True when no stage reported an error. Warnings do not count.
    pub fn is_clean(&self) -> bool {
        self.build_errors.is_none() && self.runtime_errors.is_none() && self.debugger_errors.is_none()
    }

    /// Snapshot for a given source line, if that line was hit.
    pub fn snapshot(&self, line: usize) -> Option<&BreakpointSnapshot> {
        self.snapshots.iter().find(|s| s.line == line)
    }

    /// Program stdout decoded as UTF-8, with invalid sequences replaced.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Per-stage error messages of a [`JobReport`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Assembler or linker diagnostics.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build: Option<String>,
    /// Crash, signal or timeout description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub runtime: Option<String>,
    /// Debugger failure description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub debugger: Option<String>,
}

impl ErrorReport {
    /// True when no stage reported an error.
    pub fn is_empty(&self) -> bool {
        self.build.is_none() && self.runtime.is_none() && self.debugger.is_none()
    }
}

impl From<&PipelineResult> for ErrorReport {
    fn from(result: &PipelineResult) -> Self {
        let join = |messages: &Option<Vec<String>>| messages.as_ref().map(|m| m.join("\n"));
        Self {
            build: join(&result.build_errors),
            runtime: join(&result.runtime_errors),
            debugger: join(&result.debugger_errors),
        }
    }
}

/// Stage outcome written by the pipeline next to its two artifacts.
///
/// Together with the program output and the raw transcript this is all the
/// host reads back; the pipeline's log output never reaches a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// The pipeline's exit status.
    pub status: i32,
    /// Per-stage error messages.
    #[serde(default)]
    pub errors: ErrorReport,
    /// Environment failure description (status 8 only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub environment: Option<String>,
    /// Soft failures from every stage, including dump parsing.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Exit status of the program when it exited normally.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
    /// Whether the program was killed for exceeding its wall-clock budget.
    #[serde(default)]
    pub timed_out: bool,
}

impl PipelineSummary {
    /// Summary of a run that got past the build.
    pub fn from_result(status: i32, result: &PipelineResult) -> Self {
        Self {
            status,
            errors: ErrorReport::from(result),
            environment: None,
            warnings: result.warnings.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
        }
    }
}

/// The structured result handed to the results view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Program stdout as text.
    pub stdout: String,
    /// Captured breakpoints in first-hit order.
    pub breakpoints: Vec<BreakpointSnapshot>,
    /// Stage errors, omitted when empty.
    #[serde(default)]
    pub errors: ErrorReport,
    /// Soft failures.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    /// Exit status of the program when it exited normally.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
    /// Whether the program was killed for exceeding its wall-clock budget.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub timed_out: bool,
    /// The raw debugger transcript, only when explicitly requested.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw_register_dump: Option<String>,
}

impl From<PipelineResult> for JobReport {
    fn from(result: PipelineResult) -> Self {
        Self {
            stdout: result.stdout_text(),
            errors: ErrorReport::from(&result),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            breakpoints: result.snapshots,
            warnings: result.warnings,
            raw_register_dump: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_result_report_has_no_error_keys() {
        let result = PipelineResult { stdout: b"Hello\n".to_vec(), ..Default::default() };
        assert!(result.is_clean());

        let report = JobReport::from(result);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stdout"], "Hello\n");
        assert_eq!(json["breakpoints"].as_array().unwrap().len(), 0);
        assert!(json["errors"].as_object().unwrap().is_empty());
        assert!(json.get("warnings").is_none());
        assert!(json.get("timed_out").is_none());
    }

    #[test]
    fn test_summary_carries_every_stage() {
        let mut result = PipelineResult { timed_out: true, ..Default::default() };
        result.push_runtime_error("program exceeded its wall-clock limit of 5s");
        result.push_debugger_error("debugger was terminated by signal 9");
        result.warnings.push("line 99 is past the end of the source (12 lines)".to_string());

        let summary = PipelineSummary::from_result(6, &result);
        let text = serde_json::to_string(&summary).unwrap();
        let back: PipelineSummary = serde_json::from_str(&text).unwrap();

        assert_eq!(back, summary);
        assert_eq!(back.errors.debugger.as_deref(), Some("debugger was terminated by signal 9"));
        assert_eq!(back.warnings, result.warnings);
        assert!(back.timed_out);
        assert!(back.exit_code.is_none());
    }

    #[test]
    fn test_errors_are_joined_per_stage() {
        let mut result = PipelineResult::default();
        result.push_runtime_error("killed by signal 11");
        result.push_debugger_error("gdb exited with status 1");
        result.push_debugger_error("transcript truncated");
        assert!(!result.is_clean());

        let report = JobReport::from(result);
        assert_eq!(report.errors.runtime.as_deref(), Some("killed by signal 11"));
        assert_eq!(
            report.errors.debugger.as_deref(),
            Some("gdb exited with status 1\ntranscript truncated")
        );
        assert!(report.errors.build.is_none());
    }

    #[test]
    fn test_snapshot_lookup_by_line() {
        let result = PipelineResult {
            snapshots: vec![BreakpointSnapshot::new(12), BreakpointSnapshot::new(9)],
            ..Default::default()
        };
        assert_eq!(result.snapshot(9).unwrap().line, 9);
        assert!(result.snapshot(10).is_none());
    }
}
