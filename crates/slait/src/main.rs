//! SLAIT - Sandboxed Line-level Assembly Inspection Toolkit
//!
//! Builds an x86-64 assembly program, runs it, and captures register values
//! at the source lines named in an inspection-point file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;
use slait_common::{logging, SlaitConfig, CONFIG_ENV_VAR};
use tracing::Level;

mod cmd;

/// Command-line interface for SLAIT
#[derive(Debug, Parser)]
#[command(name = "slait")]
#[command(about = "Sandboxed Line-level Assembly Inspection Toolkit")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to a daily rolling file in the temp directory
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build, run and capture registers locally, writing its artifacts (used inside the sandbox)
    Pipeline(cmd::PipelineArgs),
    /// Run a job in a fresh sandbox and print the JSON report
    Run(cmd::RunArgs),
    /// Validate an inspection-point file and print the parsed points
    Check(cmd::CheckArgs),
    /// Parse a raw register dump into JSON snapshots
    ParseDump(cmd::ParseDumpArgs),
    /// Print the debugger script generated for an inspection-point file
    Script(cmd::ScriptArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // The pipeline's stderr ends up in job reports; keep it to warnings unless asked
    let level = match (&cli.command, cli.verbose) {
        (Commands::Pipeline(_), 0) => Level::WARN,
        (_, verbose) => logging::level_from_verbosity(verbose),
    };
    logging::init_logging("slait", cli.log_file, level)?;

    let config = SlaitConfig::load_or_default(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Pipeline(args) => cmd::run_pipeline(&args, &config).await,
        Commands::Run(args) => cmd::run_job(&args, config, cli.config.as_deref()).await?,
        Commands::Check(args) => cmd::check_inspection_file(&args)?,
        Commands::ParseDump(args) => cmd::parse_dump(&args)?,
        Commands::Script(args) => cmd::print_script(&args)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
