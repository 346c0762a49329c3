//! Run command - orchestrate one job in a fresh sandbox

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Args;
use eyre::{Result, WrapErr};
use futures::FutureExt;
use slait_common::{JobReport, SlaitConfig, CONFIG_ENV_VAR};
use slait_orchestrator::{
    DockerProvider, IsolationProvider, JobError, JobRequest, LocalProvider, Orchestrator,
};

/// Arguments of `slait run`
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Assembly source file
    pub source: PathBuf,

    /// Inspection-point file
    pub lines: PathBuf,

    /// Run the pipeline in a scratch directory on this machine instead of a container
    #[arg(long)]
    pub local: bool,

    /// Container image with the toolchain and slait installed
    #[arg(long, env = "SLAIT_IMAGE")]
    pub image: Option<String>,

    /// Wall-clock budget for the whole job, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep the host-side job directory for debugging
    #[arg(long)]
    pub keep_tmp: bool,

    /// Include the raw register dump in the report
    #[arg(long)]
    pub include_raw: bool,

    /// Print the report on a single line
    #[arg(long)]
    pub compact: bool,
}

/// Runs the job and prints its report.
///
/// Exits with `0` for a clean report and `1` when the report carries stage
/// errors or the job produced none. With `--local`, the pipeline process is
/// handed `config_path` through the environment.
pub async fn run_job(
    args: &RunArgs,
    mut config: SlaitConfig,
    config_path: Option<&Path>,
) -> Result<i32> {
    if let Some(image) = &args.image {
        config.sandbox.image = image.clone();
    }
    if let Some(timeout) = args.timeout {
        config.sandbox.job_timeout_secs = timeout;
    }
    config.sandbox.keep_tmp |= args.keep_tmp;

    let provider: Arc<dyn IsolationProvider> = if args.local {
        let exe = std::env::current_exe().wrap_err("Failed to locate the slait executable")?;
        config.sandbox.pipeline_program = exe.display().to_string();
        let mut local = LocalProvider::default().with_max_output(config.limits.max_output_bytes);
        if let Some(path) = config_path {
            let path = fs::canonicalize(path)
                .wrap_err_with(|| format!("Failed to resolve {}", path.display()))?;
            local = local.with_env(CONFIG_ENV_VAR, path.display().to_string());
        }
        Arc::new(local)
    } else {
        let docker = DockerProvider::new(config.sandbox.clone())
            .with_max_output(config.limits.max_output_bytes);
        docker.ensure_available().await?;
        Arc::new(docker)
    };

    let request =
        JobRequest::from_files(&args.source, &args.lines)?.with_raw_dump(args.include_raw);
    let orchestrator = Orchestrator::new(provider, config.sandbox);

    let cancel = tokio::signal::ctrl_c().map(|_| ());
    match orchestrator.run_job_until(request, cancel).await {
        Ok(report) => {
            print_report(&report, args.compact)?;
            Ok(if report.errors.is_empty() { 0 } else { 1 })
        }
        Err(JobError::Timeout { limit, partial }) => {
            print_report(&partial, args.compact)?;
            eprintln!("error: job exceeded its wall-clock limit of {}s", limit.as_secs_f64());
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &JobReport, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(report)?
    } else {
        serde_json::to_string_pretty(report)?
    };
    println!("{json}");
    Ok(())
}
