//! Pipeline command - the in-sandbox build-run-inspect step

use std::path::PathBuf;

use clap::Args;
use slait_common::SlaitConfig;
use slait_engine::Pipeline;

/// Arguments of `slait pipeline`
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Assembly source file
    pub source: PathBuf,

    /// Inspection-point file
    pub lines: PathBuf,

    /// Directory receiving program_output.txt, register_dump.txt and pipeline_summary.json
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

/// Runs the pipeline and returns the stage-specific exit status.
///
/// The artifacts are always left in the output directory. Stage diagnostics
/// are echoed to stderr; the summary artifact is what the host reads.
pub async fn run_pipeline(args: &PipelineArgs, config: &SlaitConfig) -> i32 {
    tracing::info!("Running pipeline on {}", args.source.display());

    let pipeline = Pipeline::from_config(config);
    let outcome = pipeline.run_to_dir(&args.source, &args.lines, &args.out_dir).await;

    for message in &outcome.diagnostics {
        eprintln!("{message}");
    }
    outcome.status
}
