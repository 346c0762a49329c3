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

use std::{
    fs,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use slait_common::{
    EnvironmentError, FailureStage, JobReport, PipelineSummary, SandboxConfig, SpecFormatError,
};
use slait_engine::{
    parse_inspection_points, parse_register_dump, PIPELINE_SUMMARY_FILE, PROGRAM_OUTPUT_FILE,
    REGISTER_DUMP_FILE, SOURCE_FILE_NAME,
};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{ExecOutcome, IsolationProvider, Sandbox, SandboxGuard};

/// Name of the inspection-point file inside the sandbox.
pub const INSPECTION_FILE_NAME: &str = "lines.txt";

/// One job: a program and the inspection points to capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRequest {
    /// Assembly source.
    pub source: String,
    /// Inspection-point file contents.
    pub inspection: String,
    /// Attach the raw debugger transcript to the report.
    pub include_raw: bool,
}

impl JobRequest {
    /// Creates a request from in-memory inputs.
    pub fn new(source: impl Into<String>, inspection: impl Into<String>) -> Self {
        Self { source: source.into(), inspection: inspection.into(), include_raw: false }
    }

    /// Reads both inputs from disk.
    pub fn from_files(source: &Path, inspection: &Path) -> Result<Self, JobError> {
        let read = |path: &Path| {
            if !path.is_file() {
                return Err(JobError::InputMissing(path.to_path_buf()));
            }
            fs::read_to_string(path).map_err(|e| JobError::Environment(e.into()))
        };
        Ok(Self::new(read(source)?, read(inspection)?))
    }

    /// Sets whether the raw transcript is attached.
    pub fn with_raw_dump(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }
}

/// Why a job produced no report.
#[derive(Debug, Error)]
pub enum JobError {
    /// The inspection-point file is malformed; no sandbox was provisioned.
    #[error(transparent)]
    SpecFormat(#[from] SpecFormatError),
    /// The isolation environment failed.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// An input file does not exist.
    #[error("input file not found: {}", .0.display())]
    InputMissing(PathBuf),
    /// The whole job ran past its wall-clock budget.
    #[error("job exceeded its wall-clock limit of {}s", .limit.as_secs_f64())]
    Timeout {
        /// Configured limit.
        limit: Duration,
        /// Whatever could be retrieved before the sandbox was torn down.
        partial: Box<JobReport>,
    },
    /// The job was cancelled by the caller.
    #[error("job was cancelled")]
    Cancelled,
    /// The pipeline finished without writing one of its outputs.
    #[error("pipeline did not produce {name}\n--- sandbox logs ---\n{logs}")]
    MissingOutput {
        /// Missing artifact.
        name: String,
        /// Exec logs of the pipeline.
        logs: String,
    },
}

/// Runs jobs in freshly provisioned sandboxes, one sandbox per job.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn IsolationProvider>,
    config: SandboxConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over `provider`.
    pub fn new(provider: Arc<dyn IsolationProvider>, config: SandboxConfig) -> Self {
        Self { provider, config }
    }

    /// Sandbox settings in use.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `request` unless `cancel` completes first.
    ///
    /// The sandbox is destroyed before this returns, whether the job finished,
    /// failed or was cancelled.
    pub async fn run_job_until<F>(&self, request: JobRequest, cancel: F) -> Result<JobReport, JobError>
    where
        F: Future<Output = ()> + Send,
    {
        // reject a malformed file before paying for a sandbox
        parse_inspection_points(&request.inspection)?;

        let tmp = stage_inputs(&request).map_err(|e| JobError::Environment(e.into()))?;
        let guard = SandboxGuard::new(self.provider.provision().await?);

        let result = {
            let drive = self.drive(guard.sandbox(), &request, tmp.path());
            tokio::pin!(cancel);
            tokio::select! {
                result = drive => result,
                () = &mut cancel => {
                    warn!(sandbox = guard.sandbox().id(), "Job cancelled");
                    Err(JobError::Cancelled)
                }
            }
        };

        if let Err(e) = guard.destroy().await {
            warn!("Failed to destroy sandbox: {}", e);
        }
        if self.config.keep_tmp {
            let kept = tmp.keep();
            info!("Kept job directory: {}", kept.display());
        }
        result
    }

    /// Runs one job to completion.
    pub async fn run_job(&self, request: JobRequest) -> Result<JobReport, JobError> {
        self.run_job_until(request, std::future::pending()).await
    }

    /// Places the inputs, runs the pipeline and retrieves its artifacts.
    async fn drive(
        &self,
        sandbox: &dyn Sandbox,
        request: &JobRequest,
        job_dir: &Path,
    ) -> Result<JobReport, JobError> {
        info!(sandbox = sandbox.id(), "Running job");
        sandbox.copy_in(&job_dir.join(SOURCE_FILE_NAME), SOURCE_FILE_NAME).await?;
        sandbox.copy_in(&job_dir.join(INSPECTION_FILE_NAME), INSPECTION_FILE_NAME).await?;

        let work = sandbox.work_dir();
        let work = work.trim_end_matches('/');
        let command = vec![
            self.config.pipeline_program.clone(),
            "pipeline".to_string(),
            format!("{work}/{SOURCE_FILE_NAME}"),
            format!("{work}/{INSPECTION_FILE_NAME}"),
            "--out-dir".to_string(),
            work.to_string(),
        ];
        let limit = self.config.job_timeout();
        let outcome = sandbox.exec(&command, limit).await?;
        debug!(status = ?outcome.status, timed_out = outcome.timed_out, "Pipeline finished");

        let out_dir = job_dir.join("out");
        let stdout = retrieve(sandbox, PROGRAM_OUTPUT_FILE, &out_dir).await?;
        let dump = retrieve(sandbox, REGISTER_DUMP_FILE, &out_dir).await?;
        let summary = retrieve(sandbox, PIPELINE_SUMMARY_FILE, &out_dir).await?;

        if outcome.timed_out {
            // the pipeline was killed, so a summary is rare; take it if it parses
            let summary = summary.and_then(|text| parse_summary(&text).ok()).unwrap_or_default();
            let mut partial = assemble_report(
                stdout.unwrap_or_default(),
                dump.unwrap_or_default(),
                summary,
                request.include_raw,
            );
            partial.timed_out = true;
            return Err(JobError::Timeout { limit, partial: Box::new(partial) });
        }

        let missing = |name: &str| JobError::MissingOutput {
            name: name.to_string(),
            logs: outcome.logs.clone(),
        };
        let stdout = stdout.ok_or_else(|| missing(PROGRAM_OUTPUT_FILE))?;
        let dump = dump.ok_or_else(|| missing(REGISTER_DUMP_FILE))?;
        let summary = parse_summary(&summary.ok_or_else(|| missing(PIPELINE_SUMMARY_FILE))?)?;

        check_status(&outcome, &summary)?;
        Ok(assemble_report(stdout, dump, summary, request.include_raw))
    }
}

/// Creates the job's host directory holding both inputs and an `out/` directory.
fn stage_inputs(request: &JobRequest) -> std::io::Result<TempDir> {
    let tmp = tempfile::Builder::new().prefix("slait_job_").tempdir()?;
    fs::create_dir_all(tmp.path().join("out"))?;
    fs::write(tmp.path().join(SOURCE_FILE_NAME), &request.source)?;
    fs::write(tmp.path().join(INSPECTION_FILE_NAME), &request.inspection)?;
    Ok(tmp)
}

/// Copies one artifact out and reads it; `None` when the sandbox does not have it.
async fn retrieve(
    sandbox: &dyn Sandbox,
    name: &str,
    out_dir: &Path,
) -> Result<Option<String>, JobError> {
    let host = out_dir.join(name);
    if !sandbox.copy_out(name, &host).await? {
        debug!("Sandbox has no {}", name);
        return Ok(None);
    }
    let bytes = fs::read(&host).map_err(|e| JobError::Environment(e.into()))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn parse_summary(text: &str) -> Result<PipelineSummary, EnvironmentError> {
    serde_json::from_str(text).map_err(|e| EnvironmentError::Transfer {
        path: PIPELINE_SUMMARY_FILE.to_string(),
        reason: format!("malformed summary: {e}"),
    })
}

/// Rejects exits that mean the pipeline itself could not do its job.
///
/// Stage failures (build, run, capture) are results, not errors; they are
/// reported through the summary.
fn check_status(outcome: &ExecOutcome, summary: &PipelineSummary) -> Result<(), EnvironmentError> {
    let logs = outcome.logs.trim();
    let Some(code) = outcome.status else {
        return Err(EnvironmentError::Provision(format!(
            "pipeline was killed\n--- sandbox logs ---\n{logs}"
        )));
    };
    match FailureStage::from_exit_code(code) {
        Some(FailureStage::Environment) | None if code != 0 => Err(EnvironmentError::Provision(
            summary.environment.clone().unwrap_or_else(|| {
                format!("pipeline exited with status {code}\n--- sandbox logs ---\n{logs}")
            }),
        )),
        _ => Ok(()),
    }
}

/// Builds the report from the retrieved artifacts and the pipeline's summary.
fn assemble_report(
    stdout: String,
    dump: String,
    summary: PipelineSummary,
    include_raw: bool,
) -> JobReport {
    let parse = parse_register_dump(&dump);
    JobReport {
        stdout,
        breakpoints: parse.snapshots,
        errors: summary.errors,
        warnings: summary.warnings,
        exit_code: summary.exit_code,
        timed_out: summary.timed_out,
        raw_register_dump: include_raw.then_some(dump),
    }
}
