//! Command modules for the SLAIT CLI

pub mod check;
pub mod parse_dump;
pub mod pipeline;
pub mod run;
pub mod script;

pub use check::{check_inspection_file, CheckArgs};
pub use parse_dump::{parse_dump, ParseDumpArgs};
pub use pipeline::{run_pipeline, PipelineArgs};
pub use run::{run_job, RunArgs};
pub use script::{print_script, ScriptArgs};

use std::{fs, path::Path};

use eyre::{Result, WrapErr};

/// Reads a text input named on the command line
fn read_input(path: &Path) -> Result<String> {
    fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))
}
