//! Parse-dump command - turn a raw debugger transcript into snapshots

use std::path::PathBuf;

use clap::Args;
use eyre::Result;
use slait_engine::{missing_register_warnings, parse_inspection_points, parse_register_dump};

use super::read_input;

/// Arguments of `slait parse-dump`
#[derive(Debug, Clone, Args)]
pub struct ParseDumpArgs {
    /// Raw register dump (register_dump.txt)
    pub dump: PathBuf,

    /// Inspection-point file, to report requested registers that are missing
    #[arg(long)]
    pub lines: Option<PathBuf>,
}

/// Prints the parsed snapshots and warnings as JSON.
pub fn parse_dump(args: &ParseDumpArgs) -> Result<i32> {
    let transcript = read_input(&args.dump)?;
    let mut parse = parse_register_dump(&transcript);

    if let Some(lines) = &args.lines {
        let points = parse_inspection_points(&read_input(lines)?)?;
        let missing = missing_register_warnings(&points, &parse.snapshots);
        parse.warnings.extend(missing);
    }

    println!("{}", serde_json::to_string_pretty(&parse)?);
    Ok(0)
}
