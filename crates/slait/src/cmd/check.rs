//! Check command - validate an inspection-point file

use std::path::PathBuf;

use clap::Args;
use eyre::Result;
use slait_common::FailureStage;
use slait_engine::parse_inspection_spec;

use super::read_input;

/// Arguments of `slait check`
#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Inspection-point file
    pub lines: PathBuf,

    /// Print the parsed points as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parses the file and prints one normalised directive per point.
pub fn check_inspection_file(args: &CheckArgs) -> Result<i32> {
    let text = read_input(&args.lines)?;

    let spec = match parse_inspection_spec(&text) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}: {e}", args.lines.display());
            return Ok(FailureStage::Parse.exit_code());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&spec.points)?);
    } else {
        for point in &spec.points {
            println!("{point}");
        }
    }
    for warning in &spec.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(0)
}
