//! Script command - show the generated debugger script

use std::path::PathBuf;

use clap::Args;
use eyre::Result;
use slait_engine::{parse_inspection_points, GdbScript, SOURCE_FILE_NAME};

use super::read_input;

/// Arguments of `slait script`
#[derive(Debug, Clone, Args)]
pub struct ScriptArgs {
    /// Inspection-point file
    pub lines: PathBuf,

    /// Source file name the breakpoints refer to
    #[arg(long, default_value = SOURCE_FILE_NAME)]
    pub source_name: String,
}

/// Prints every command file of the script in execution order.
pub fn print_script(args: &ScriptArgs) -> Result<i32> {
    let points = parse_inspection_points(&read_input(&args.lines)?)?;
    let script = GdbScript::new(&args.source_name, &points);

    print!("{}", script.render());
    for warning in &script.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(0)
}
