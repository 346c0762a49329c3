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

//! End-to-end tests of the host-side job flow
//!
//! Jobs go through the orchestrator, the in-process sandbox and the real
//! pipeline code; only the toolchain is replaced by shell scripts.

#![cfg(unix)]

use std::sync::Arc;

use slait_common::{FailureStage, JobReport, SandboxConfig, SpecFormatError};
use slait_engine::Pipeline;
use slait_integration_tests::test_utils::{
    init, programs, sandbox::InProcessProvider, toolchain::FakeToolchain,
};
use slait_orchestrator::{JobError, JobRequest, Orchestrator};
use tracing::info;

async fn run_job(source: &str, inspection: &str) -> Result<JobReport, JobError> {
    let toolchain = FakeToolchain::install().expect("install fake toolchain");
    let pipeline = Pipeline::from_config(toolchain.config());
    let orchestrator =
        Orchestrator::new(Arc::new(InProcessProvider::new(pipeline)), SandboxConfig::default());
    orchestrator.run_job(JobRequest::new(source, inspection)).await
}

#[tokio::test]
async fn test_example_1_output_without_inspection_points() {
    init::init_test_environment();
    info!("Running a program with an empty inspection file");

    let report = run_job(programs::HELLO, "").await.unwrap();

    assert_eq!(report.stdout, "Hello\n");
    assert!(report.breakpoints.is_empty());
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_example_2_single_register_capture() {
    init::init_test_environment();

    let report = run_job(programs::HELLO, "line:9, rax:1").await.unwrap();

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.breakpoints.len(), 1);
    let snapshot = &report.breakpoints[0];
    assert_eq!(snapshot.line, 9);
    assert_eq!(snapshot.registers.keys().collect::<Vec<_>>(), vec!["rax"]);

    let rax = snapshot.register("rax").unwrap();
    assert_eq!(rax.unsigned, 1);
    assert_eq!(rax.hex, "0x1");
    assert_eq!(rax.signed, 1);
    assert_eq!(rax.ascii_le, "........");
    assert!(rax.is_consistent());
}

#[tokio::test]
async fn test_example_3_duplicate_line_fails_before_build() {
    init::init_test_environment();

    let err = run_job(programs::HELLO, "line:9, rax:1\nline:9, rdi:1").await.unwrap_err();
    assert!(matches!(
        err,
        JobError::SpecFormat(SpecFormatError::DuplicateLine { target: 9, .. })
    ));

    // the pipeline itself refuses too, without creating a run workspace
    let toolchain = FakeToolchain::install().unwrap();
    let pipeline = Pipeline::from_config(toolchain.config());
    let err = pipeline.run(programs::HELLO, "line:9, rax:1\nline:9, rdi:1").await.unwrap_err();
    assert_eq!(err.stage(), FailureStage::Parse);
    let runs = toolchain.config().workspace_root();
    assert_eq!(std::fs::read_dir(runs).unwrap().count(), 0);
}

#[tokio::test]
async fn test_example_4_assembler_error_is_reported() {
    init::init_test_environment();

    let report = run_job(programs::SYNTAX_ERROR, "line:4, rax:1, junk").await.unwrap();

    let build = report.errors.build.as_deref().expect("build error");
    assert!(build.ends_with("program.asm:7: error: parser: instruction expected"), "{build}");
    assert!(!build.contains('\n'), "{build}");
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("ignoring malformed token"));
    assert!(report.stdout.is_empty());
    assert!(report.breakpoints.is_empty());
}

#[tokio::test]
async fn test_example_5_infinite_loop_times_out() {
    init::init_test_environment();

    let report = run_job(programs::INFINITE_LOOP, "").await.unwrap();

    assert_eq!(report.stdout, "tick");
    assert!(report.timed_out);
    assert_eq!(report.exit_code, None);
    let runtime = report.errors.runtime.as_deref().expect("runtime error");
    assert!(runtime.contains("wall-clock limit"), "{runtime}");

    let toolchain = FakeToolchain::install().unwrap();
    let run = Pipeline::from_config(toolchain.config())
        .run(programs::INFINITE_LOOP, "")
        .await
        .unwrap();
    assert!(run.result.timed_out);
    assert_eq!(run.failure, Some(FailureStage::Timeout));
    assert_eq!(run.result.stdout, b"tick");
}

#[tokio::test]
async fn test_unreached_line_is_not_an_error() {
    init::init_test_environment();

    let report = run_job(programs::HELLO, "line:15, rax:1").await.unwrap();

    assert!(report.breakpoints.is_empty());
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_repeated_hits_keep_first_values() {
    init::init_test_environment();

    let report = run_job(programs::COUNTDOWN, "line:6, rcx:1").await.unwrap();

    assert_eq!(report.breakpoints.len(), 1);
    assert_eq!(report.breakpoints[0].hits, 3);
    assert_eq!(report.breakpoints[0].register("rcx").unwrap().unsigned, 3);
}

#[tokio::test]
async fn test_crash_keeps_output_and_snapshots() {
    init::init_test_environment();

    let report = run_job(programs::SEGFAULT, "line:7, rax:1").await.unwrap();

    assert_eq!(report.stdout, "before");
    let runtime = report.errors.runtime.as_deref().expect("runtime error");
    assert!(runtime.contains("signal 11"), "{runtime}");
    assert_eq!(report.breakpoints.len(), 1);
    assert_eq!(report.breakpoints[0].register("rax").unwrap().unsigned, 0);
}

#[tokio::test]
async fn test_several_points_and_unflagged_registers() {
    init::init_test_environment();

    let report =
        run_job(programs::HELLO, "line:12, rax:1, rdi:0\nline:9, rax:1, rdi:1").await.unwrap();

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    let at = |line| report.breakpoints.iter().find(|s| s.line == line).unwrap();
    assert_eq!(at(12).register("rax").unwrap().unsigned, 6);
    assert!(at(12).register("rdi").is_none());
    assert_eq!(at(9).register("rdi").unwrap().unsigned, 1);
}

#[tokio::test]
async fn test_identical_jobs_give_identical_reports() {
    init::init_test_environment();

    for source in [programs::HELLO, programs::SEGFAULT] {
        let first = run_job(source, "line:9, rax:1, rdi:1").await.unwrap();
        let second = run_job(source, "line:9, rax:1, rdi:1").await.unwrap();

        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.breakpoints, second.breakpoints);
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    }
}
