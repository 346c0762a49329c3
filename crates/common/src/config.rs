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

//! Configuration system for SLAIT
//!
//! Every component receives its configuration explicitly, so several
//! configurations (different images, toolchains or limits) can coexist in one
//! process. Values are read from a TOML file; missing sections fall back to the
//! defaults of the reference sandbox image.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "SLAIT_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaitConfig {
    /// Directory in which per-run workspaces are created (default: system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    /// Build and debug tools
    pub toolchain: ToolchainConfig,
    /// Time and output bounds for the program and the debugger
    pub limits: LimitsConfig,
    /// Isolation environment settings (host side)
    pub sandbox: SandboxConfig,
}

/// Build and debug tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Assembler program
    pub assembler: String,
    /// Arguments placed before `-o <object> <source>`
    pub assembler_args: Vec<String>,
    /// Linker program
    pub linker: String,
    /// Arguments placed before `-o <executable> <object>`
    pub linker_args: Vec<String>,
    /// Debugger program
    pub debugger: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            assembler: "nasm".to_string(),
            assembler_args: ["-f", "elf64", "-g", "-F", "dwarf"].map(String::from).to_vec(),
            linker: "ld".to_string(),
            linker_args: vec!["-static".to_string()],
            debugger: "gdb".to_string(),
        }
    }
}

/// Time and output bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock budget for each assembler or linker invocation
    pub build_timeout_secs: u64,
    /// Wall-clock budget for the plain program run
    pub run_timeout_secs: u64,
    /// Wall-clock budget for the whole debugger session
    pub debugger_timeout_secs: u64,
    /// Maximum bytes kept from any captured stream
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            build_timeout_secs: 20,
            run_timeout_secs: 5,
            debugger_timeout_secs: 10,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    /// Assembler/linker budget
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Program run budget
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Debugger session budget
    pub fn debugger_timeout(&self) -> Duration {
        Duration::from_secs(self.debugger_timeout_secs)
    }
}

/// Isolation environment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container image with the toolchain and the `slait` binary installed
    pub image: String,
    /// Directory inside the sandbox where inputs and outputs live
    pub work_dir: String,
    /// Path of the `slait` binary inside the sandbox
    pub pipeline_program: String,
    /// Wall-clock budget for the whole job, including build and capture
    pub job_timeout_secs: u64,
    /// Keep the host-side output directory after the job finishes
    pub keep_tmp: bool,
    /// Memory limit passed to the container runtime (e.g. `256m`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    /// Maximum number of processes inside the sandbox
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u32>,
    /// CPU quota passed to the container runtime (e.g. `1.0`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Run the sandbox without network access
    pub network_disabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "slait-sandbox:latest".to_string(),
            work_dir: "/work".to_string(),
            pipeline_program: "/usr/local/bin/slait".to_string(),
            job_timeout_secs: 30,
            keep_tmp: false,
            memory_limit: Some("256m".to_string()),
            pids_limit: Some(64),
            cpus: Some("1.0".to_string()),
            network_disabled: true,
        }
    }
}

impl SandboxConfig {
    /// Whole-job budget
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl SlaitConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if given, otherwise from `$SLAIT_CONFIG`, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                debug!("No configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Directory in which per-run workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}
