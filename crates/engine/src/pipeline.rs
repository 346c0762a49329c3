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

//! The build-run-inspect pipeline.
//!
//! # Workflow Overview
//!
//! 1. **Parse**: read the inspection-point file (terminal on error)
//! 2. **Build**: assemble and link in a fresh run workspace (terminal on error)
//! 3. **Run**: execute the program once to capture its stdout
//! 4. **Capture**: replay it under the debugger, stopping at every inspection point
//! 5. **Parse dump**: fold the debugger transcript into register snapshots
//!
//! Failures in steps 3-5 are recorded in the [`PipelineResult`] next to whatever
//! was captured before they happened.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use slait_common::{
    BuildError, FailureStage, LimitsConfig, PipelineError, PipelineResult, PipelineSummary,
    RuntimeError, SlaitConfig,
};
use tracing::{info, warn};

use crate::{
    build_executable, missing_register_warnings, parse_inspection_spec, parse_register_dump,
    Assembler, CaptureRequest, DebugDriver, GdbDriver, InspectionSpec, LdLinker, Linker,
    NasmAssembler, NativeRunner, ProgramRunner, RunWorkspace, SOURCE_FILE_NAME,
};

/// Artifact holding the program's stdout.
pub const PROGRAM_OUTPUT_FILE: &str = "program_output.txt";

/// Artifact holding the raw debugger transcript.
pub const REGISTER_DUMP_FILE: &str = "register_dump.txt";

/// JSON [`PipelineSummary`] of the run: exit status, stage errors and warnings.
pub const PIPELINE_SUMMARY_FILE: &str = "pipeline_summary.json";

/// Everything one pipeline invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineRun {
    /// Structured result.
    pub result: PipelineResult,
    /// Raw debugger transcript; empty when the debugger never ran.
    pub transcript: String,
    /// The most significant non-terminal failure, if any.
    pub failure: Option<FailureStage>,
}

impl PipelineRun {
    /// Process exit status for this run (`0` when nothing failed).
    pub fn exit_code(&self) -> i32 {
        self.failure.map_or(0, FailureStage::exit_code)
    }

    /// Stage outcome of this run.
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary::from_result(self.exit_code(), &self.result)
    }

    /// Writes the two pipeline artifacts into `out_dir`.
    pub fn write_artifacts(&self, out_dir: &Path) -> io::Result<()> {
        write_artifacts(out_dir, &self.result.stdout, self.transcript.as_bytes())
    }
}

/// Writes (or overwrites) both artifacts.
pub fn write_artifacts(out_dir: &Path, stdout: &[u8], transcript: &[u8]) -> io::Result<()> {
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join(PROGRAM_OUTPUT_FILE), stdout)?;
    fs::write(out_dir.join(REGISTER_DUMP_FILE), transcript)?;
    Ok(())
}

/// Writes (or overwrites) the summary artifact.
pub fn write_summary(out_dir: &Path, summary: &PipelineSummary) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(summary).map_err(io::Error::other)?;
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join(PIPELINE_SUMMARY_FILE), json)
}

/// Exit status and stderr diagnostics of a pipeline run over files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRun {
    /// `0`, or [`FailureStage::exit_code`] of the failing stage.
    pub status: i32,
    /// Messages for the caller's stderr.
    pub diagnostics: Vec<String>,
}

impl ArtifactRun {
    fn failed(stage: FailureStage, message: String) -> Self {
        Self { status: stage.exit_code(), diagnostics: vec![message] }
    }

    /// Records a terminal failure in the summary artifact as well.
    fn terminal(
        out_dir: &Path,
        stage: FailureStage,
        message: String,
        warnings: Vec<String>,
    ) -> Self {
        let mut summary =
            PipelineSummary { status: stage.exit_code(), warnings, ..Default::default() };
        if stage == FailureStage::Environment {
            summary.environment = Some(message.clone());
        } else {
            summary.errors.build = Some(message.clone());
        }

        let mut outcome = Self::failed(stage, message);
        if let Err(e) = write_summary(out_dir, &summary) {
            outcome.diagnostics.push(format!("cannot write summary to {}: {e}", out_dir.display()));
            outcome.status = FailureStage::Environment.exit_code();
        }
        outcome
    }
}

/// The pipeline and its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    assembler: Arc<dyn Assembler>,
    linker: Arc<dyn Linker>,
    runner: Arc<dyn ProgramRunner>,
    debugger: Arc<dyn DebugDriver>,
    limits: LimitsConfig,
    workspace_root: PathBuf,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("limits", &self.limits)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// The real toolchain (`nasm`, `ld`, `gdb`) as configured.
    pub fn from_config(config: &SlaitConfig) -> Self {
        Self {
            assembler: Arc::new(NasmAssembler::new(&config.toolchain, &config.limits)),
            linker: Arc::new(LdLinker::new(&config.toolchain, &config.limits)),
            runner: Arc::new(NativeRunner),
            debugger: Arc::new(GdbDriver::new(&config.toolchain)),
            limits: config.limits.clone(),
            workspace_root: config.workspace_root(),
        }
    }

    /// Replace the assembler.
    pub fn with_assembler(mut self, assembler: Arc<dyn Assembler>) -> Self {
        self.assembler = assembler;
        self
    }

    /// Replace the linker.
    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        self.linker = linker;
        self
    }

    /// Replace the program runner.
    pub fn with_runner(mut self, runner: Arc<dyn ProgramRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replace the debug driver.
    pub fn with_debugger(mut self, debugger: Arc<dyn DebugDriver>) -> Self {
        self.debugger = debugger;
        self
    }

    /// Replace the limits.
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Create run workspaces under `root`.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Runs one job over an assembly `source` and an inspection-point file's text.
    pub async fn run(&self, source: &str, inspection: &str) -> Result<PipelineRun, PipelineError> {
        let spec = parse_inspection_spec(inspection)?;
        let mut run = PipelineRun::default();
        self.execute(&spec, source, &mut run).await?;
        Ok(run)
    }

    /// Steps 2-5. Warnings gathered before a terminal failure stay in `run`.
    async fn execute(
        &self,
        spec: &InspectionSpec,
        source: &str,
        run: &mut PipelineRun,
    ) -> Result<(), PipelineError> {
        info!("Parsed {} inspection points", spec.points.len());
        run.result.warnings.extend(spec.warnings.iter().cloned());

        let workspace = RunWorkspace::create(&self.workspace_root, source)?;
        let executable = build_executable(
            self.assembler.as_ref(),
            self.linker.as_ref(),
            &workspace,
            source,
            &spec.lines(),
            &mut run.result.warnings,
        )
        .await?;

        let program = self.runner.run(&executable, &self.limits).await;
        run.result.stdout = program.stdout;
        if program.truncated {
            run.result.warnings.push(format!(
                "program output was truncated at {} bytes",
                self.limits.max_output_bytes
            ));
        }
        match program.status {
            Ok(code) => {
                info!("Program exited with status {}", code);
                run.result.exit_code = Some(code);
            }
            Err(e) => {
                warn!("Program failed: {}", e);
                run.result.timed_out = matches!(e, RuntimeError::TimedOut { .. });
                run.failure =
                    Some(if run.result.timed_out { FailureStage::Timeout } else { FailureStage::Run });
                run.result.push_runtime_error(e.to_string());
            }
        }

        if spec.is_empty() {
            info!("No inspection points; skipping register capture");
            return Ok(());
        }

        let session = self
            .debugger
            .capture(CaptureRequest {
                executable: &executable,
                source_name: SOURCE_FILE_NAME,
                points: &spec.points,
                script_dir: workspace.path(),
                limits: &self.limits,
            })
            .await;
        run.result.warnings.extend(session.warnings);
        if let Some(e) = session.error {
            warn!("Register capture failed: {}", e);
            run.result.push_debugger_error(e.to_string());
            run.failure.get_or_insert(FailureStage::Capture);
        }

        let parse = parse_register_dump(&session.transcript);
        run.result.warnings.extend(parse.warnings);
        run.result.warnings.extend(missing_register_warnings(&spec.points, &parse.snapshots));
        info!("Captured {} breakpoint snapshots", parse.snapshots.len());
        run.result.snapshots = parse.snapshots;
        run.transcript = session.transcript;

        Ok(())
    }

    /// Runs over input files and leaves the artifacts in `out_dir`.
    ///
    /// Program output and the register dump are created empty before anything
    /// else happens, so they exist on every exit path. The summary artifact is
    /// written once the outcome is known, terminal failures included.
    pub async fn run_to_dir(&self, source: &Path, inspection: &Path, out_dir: &Path) -> ArtifactRun {
        if let Err(e) = write_artifacts(out_dir, b"", b"") {
            return ArtifactRun::failed(
                FailureStage::Environment,
                format!("cannot write artifacts to {}: {e}", out_dir.display()),
            );
        }

        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
        };
        let (source_text, inspection_text) = match (read(source), read(inspection)) {
            (Ok(source), Ok(inspection)) => (source, inspection),
            (Err(e), _) | (_, Err(e)) => {
                return ArtifactRun::terminal(out_dir, FailureStage::Environment, e, Vec::new());
            }
        };

        let spec = match parse_inspection_spec(&inspection_text) {
            Ok(spec) => spec,
            Err(e) => {
                let message = e.to_string();
                return ArtifactRun::terminal(out_dir, FailureStage::Parse, message, Vec::new());
            }
        };

        let mut run = PipelineRun::default();
        if let Err(e) = self.execute(&spec, &source_text, &mut run).await {
            let message = match &e {
                PipelineError::Build(
                    build @ (BuildError::Assemble { .. } | BuildError::Link { .. }),
                ) => build.diagnostics().to_string(),
                other => other.to_string(),
            };
            return ArtifactRun::terminal(out_dir, e.stage(), message, run.result.warnings);
        }

        let mut diagnostics: Vec<String> = run
            .result
            .runtime_errors
            .iter()
            .chain(run.result.debugger_errors.iter())
            .flatten()
            .cloned()
            .collect();
        let written =
            run.write_artifacts(out_dir).and_then(|()| write_summary(out_dir, &run.summary()));
        if let Err(e) = written {
            diagnostics.push(format!("cannot write artifacts to {}: {e}", out_dir.display()));
            return ArtifactRun { status: FailureStage::Environment.exit_code(), diagnostics };
        }
        ArtifactRun { status: run.exit_code(), diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{breakpoint_marker, DebugSession, ProgramRun};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use slait_common::DebuggerError;
    use std::{collections::HashMap, time::Duration};

    struct FakeBuild {
        fail: Option<BuildError>,
    }

    #[async_trait]
    impl Assembler for FakeBuild {
        async fn assemble(&self, _: &Path, _: &Path) -> Result<(), BuildError> {
            self.fail.clone().map_or(Ok(()), Err)
        }
    }

    #[async_trait]
    impl Linker for FakeBuild {
        async fn link(&self, _: &Path, _: &Path) -> Result<(), BuildError> {
            self.fail.clone().map_or(Ok(()), Err)
        }
    }

    struct FakeRunner(ProgramRun);

    #[async_trait]
    impl ProgramRunner for FakeRunner {
        async fn run(&self, _: &Path, _: &LimitsConfig) -> ProgramRun {
            self.0.clone()
        }
    }

    /// Prints fixed register values at every requested point.
    #[derive(Default)]
    struct FakeDebugger {
        values: HashMap<&'static str, u64>,
        error: Option<DebuggerError>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl DebugDriver for FakeDebugger {
        async fn capture(&self, request: CaptureRequest<'_>) -> DebugSession {
            *self.calls.lock() += 1;
            let mut transcript = String::new();
            for point in request.points {
                transcript.push_str(&format!("\n{}\n", breakpoint_marker(point.line.get())));
                for name in point.captured() {
                    if let Some(v) = self.values.get(name) {
                        transcript.push_str(&format!("{name}: {v:#x}\n"));
                    }
                }
            }
            DebugSession { transcript, error: self.error.clone(), warnings: vec![] }
        }
    }

    fn pipeline(
        build: FakeBuild,
        run: ProgramRun,
        debugger: Arc<FakeDebugger>,
    ) -> (Pipeline, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let build = Arc::new(build);
        let pipeline = Pipeline::from_config(&SlaitConfig::default())
            .with_assembler(build.clone())
            .with_linker(build)
            .with_runner(Arc::new(FakeRunner(run)))
            .with_debugger(debugger)
            .with_workspace_root(root.path());
        (pipeline, root)
    }

    fn exited(stdout: &str, code: i32) -> ProgramRun {
        ProgramRun { stdout: stdout.as_bytes().to_vec(), status: Ok(code), truncated: false }
    }

    const SOURCE: &str = "section .text\nglobal _start\n_start:\n  mov rax, 1\n  mov rdi, 1\n  syscall\n";

    #[tokio::test]
    async fn test_happy_path() {
        let debugger = Arc::new(FakeDebugger {
            values: HashMap::from([("rax", 1), ("rdi", 1)]),
            ..Default::default()
        });
        let (pipeline, _root) = pipeline(FakeBuild { fail: None }, exited("Hello\n", 0), debugger);

        let run = pipeline.run(SOURCE, "line:5, rax:1, rdi:1").await.unwrap();

        assert_eq!(run.exit_code(), 0);
        assert!(run.result.is_clean());
        assert_eq!(run.result.stdout, b"Hello\n");
        assert_eq!(run.result.exit_code, Some(0));
        let snapshot = run.result.snapshot(5).unwrap();
        assert_eq!(snapshot.register("rax").unwrap().hex, "0x1");
        assert_eq!(snapshot.register("rdi").unwrap().unsigned, 1);
        assert!(run.transcript.contains("=== Breakpoint at line 5 ==="));
    }

    #[tokio::test]
    async fn test_no_points_skips_debugger() {
        let debugger = Arc::new(FakeDebugger::default());
        let (pipeline, _root) =
            pipeline(FakeBuild { fail: None }, exited("Hello\n", 0), debugger.clone());

        let run = pipeline.run(SOURCE, "").await.unwrap();

        assert_eq!(*debugger.calls.lock(), 0);
        assert!(run.result.snapshots.is_empty());
        assert!(run.transcript.is_empty());
    }

    #[tokio::test]
    async fn test_spec_error_is_terminal() {
        let (pipeline, root) =
            pipeline(FakeBuild { fail: None }, exited("", 0), Arc::new(FakeDebugger::default()));

        let err = pipeline.run(SOURCE, "rax:1").await.unwrap_err();
        assert_eq!(err.stage(), FailureStage::Parse);
        // nothing was built
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_build_error_is_terminal() {
        let fail = BuildError::Assemble { diagnostics: "program.asm:4: error: bad".into() };
        let (pipeline, _root) = pipeline(
            FakeBuild { fail: Some(fail) },
            exited("", 0),
            Arc::new(FakeDebugger::default()),
        );

        let err = pipeline.run(SOURCE, "line:4, rax:1").await.unwrap_err();
        assert_eq!(err.stage(), FailureStage::Assemble);
        assert!(err.to_string().contains("program.asm:4: error: bad"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output_and_still_captures() {
        let debugger = Arc::new(FakeDebugger {
            values: HashMap::from([("rcx", 7)]),
            ..Default::default()
        });
        let run = ProgramRun {
            stdout: b"tick".to_vec(),
            status: Err(RuntimeError::TimedOut { limit: Duration::from_secs(5) }),
            truncated: false,
        };
        let (pipeline, _root) = pipeline(FakeBuild { fail: None }, run, debugger.clone());

        let run = pipeline.run(SOURCE, "line:3, rcx:1").await.unwrap();

        assert_eq!(run.failure, Some(FailureStage::Timeout));
        assert_eq!(run.exit_code(), 6);
        assert!(run.result.timed_out);
        assert_eq!(run.result.stdout, b"tick");
        assert_eq!(run.result.runtime_errors.as_ref().unwrap().len(), 1);
        assert_eq!(*debugger.calls.lock(), 1);
        assert_eq!(run.result.snapshot(3).unwrap().register("rcx").unwrap().unsigned, 7);
    }

    #[tokio::test]
    async fn test_debugger_failure_keeps_snapshots() {
        let debugger = Arc::new(FakeDebugger {
            values: HashMap::from([("rax", 60)]),
            error: Some(DebuggerError::Crashed { signal: 9 }),
            ..Default::default()
        });
        let (pipeline, _root) = pipeline(FakeBuild { fail: None }, exited("", 0), debugger);

        let run = pipeline.run(SOURCE, "line:4, rax:1, rbx:1").await.unwrap();

        assert_eq!(run.failure, Some(FailureStage::Capture));
        assert!(run.result.debugger_errors.is_some());
        assert_eq!(run.result.snapshot(4).unwrap().register("rax").unwrap().unsigned, 60);
        assert!(run.result.warnings.iter().any(|w| w.contains("rbx was not captured")));
    }

    #[tokio::test]
    async fn test_out_of_range_line_warns() {
        let (pipeline, _root) =
            pipeline(FakeBuild { fail: None }, exited("", 0), Arc::new(FakeDebugger::default()));

        let run = pipeline.run(SOURCE, "line:99, rax:1").await.unwrap();

        assert!(run.result.is_clean());
        assert!(run.result.warnings.iter().any(|w| w.contains("line 99 is past the end")));
    }

    fn read_summary(out: &Path) -> PipelineSummary {
        serde_json::from_slice(&fs::read(out.join(PIPELINE_SUMMARY_FILE)).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_run_to_dir_writes_artifacts_on_build_failure() {
        let fail = BuildError::Link { diagnostics: "ld: undefined symbol `_start'".into() };
        let (pipeline, root) = pipeline(
            FakeBuild { fail: None },
            exited("", 0),
            Arc::new(FakeDebugger::default()),
        );
        let pipeline = pipeline.with_linker(Arc::new(FakeBuild { fail: Some(fail) }));
        let source = root.path().join("program.asm");
        let lines = root.path().join("lines.txt");
        fs::write(&source, SOURCE).unwrap();
        fs::write(&lines, "line:4, rax:1, junk\nline:99, rax:1").unwrap();
        let out = root.path().join("out");

        let outcome = pipeline.run_to_dir(&source, &lines, &out).await;

        assert_eq!(outcome.status, 4);
        assert_eq!(outcome.diagnostics, vec!["ld: undefined symbol `_start'".to_string()]);
        assert_eq!(fs::read(out.join(PROGRAM_OUTPUT_FILE)).unwrap(), b"");
        assert_eq!(fs::read(out.join(REGISTER_DUMP_FILE)).unwrap(), b"");

        let summary = read_summary(&out);
        assert_eq!(summary.status, 4);
        assert_eq!(summary.errors.build.as_deref(), Some("ld: undefined symbol `_start'"));
        assert_eq!(summary.warnings.len(), 2);
        assert!(summary.warnings[0].contains("ignoring malformed token \"junk\""));
        assert!(summary.warnings[1].contains("line 99 is past the end"));
    }

    #[tokio::test]
    async fn test_run_to_dir_summarizes_a_crash() {
        let debugger = Arc::new(FakeDebugger {
            values: HashMap::from([("rdi", 2)]),
            error: Some(DebuggerError::Crashed { signal: 9 }),
            ..Default::default()
        });
        let run = ProgramRun {
            stdout: b"partial".to_vec(),
            status: Err(RuntimeError::Signaled { signal: 11 }),
            truncated: false,
        };
        let (pipeline, root) = pipeline(FakeBuild { fail: None }, run, debugger);
        let source = root.path().join("program.asm");
        let lines = root.path().join("lines.txt");
        fs::write(&source, SOURCE).unwrap();
        fs::write(&lines, "line:4, rax:1, rdi:1").unwrap();
        let out = root.path().join("out");

        let outcome = pipeline.run_to_dir(&source, &lines, &out).await;

        assert_eq!(outcome.status, FailureStage::Run.exit_code());
        assert_eq!(fs::read(out.join(PROGRAM_OUTPUT_FILE)).unwrap(), b"partial");
        let summary = read_summary(&out);
        assert_eq!(summary.status, outcome.status);
        assert_eq!(
            summary.errors.runtime.as_deref(),
            Some("program was terminated by signal 11")
        );
        assert_eq!(summary.errors.debugger, Some(DebuggerError::Crashed { signal: 9 }.to_string()));
        assert_eq!(summary.exit_code, None);
        assert!(!summary.timed_out);
        assert!(summary.warnings.iter().any(|w| w.contains("rax was not captured")));
    }

    #[tokio::test]
    async fn test_run_to_dir_missing_input() {
        let (pipeline, root) =
            pipeline(FakeBuild { fail: None }, exited("", 0), Arc::new(FakeDebugger::default()));
        let out = root.path().join("out");

        let missing = root.path().join("nope.asm");
        let outcome = pipeline.run_to_dir(&missing, &root.path().join("nope.txt"), &out).await;

        assert_eq!(outcome.status, FailureStage::Environment.exit_code());
        assert!(out.join(PROGRAM_OUTPUT_FILE).exists());
        let summary = read_summary(&out);
        assert!(summary.environment.unwrap().contains("nope.asm"));
        assert_eq!(summary.errors, Default::default());
    }

    #[test]
    fn test_write_artifacts() {
        let out = tempfile::tempdir().unwrap();
        let run = PipelineRun {
            result: PipelineResult { stdout: b"Hello\n".to_vec(), ..Default::default() },
            transcript: "=== Breakpoint at line 1 ===\n".into(),
            failure: None,
        };

        run.write_artifacts(&out.path().join("nested")).unwrap();

        let dir = out.path().join("nested");
        assert_eq!(fs::read(dir.join(PROGRAM_OUTPUT_FILE)).unwrap(), b"Hello\n");
        assert_eq!(
            fs::read_to_string(dir.join(REGISTER_DUMP_FILE)).unwrap(),
            "=== Breakpoint at line 1 ===\n"
        );
    }
}
