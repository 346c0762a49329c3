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

//! Per-run build directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::debug;

/// File name the source is stored under. Debug info and breakpoints refer to it.
pub const SOURCE_FILE_NAME: &str = "program.asm";

/// A uniquely named scratch directory holding one run's source, object,
/// executable and debugger script. Removed when dropped.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    /// Creates a fresh directory under `root` and writes `source` into it.
    pub fn create(root: &Path, source: &str) -> std::io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("slait-run-").tempdir_in(root)?;
        fs::write(dir.path().join(SOURCE_FILE_NAME), source)?;
        debug!(workspace = %dir.path().display(), "Created run workspace");
        Ok(Self { dir })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Assembly source.
    pub fn source(&self) -> PathBuf {
        self.dir.path().join(SOURCE_FILE_NAME)
    }

    /// Object file produced by the assembler.
    pub fn object(&self) -> PathBuf {
        self.dir.path().join("program.o")
    }

    /// Executable produced by the linker.
    pub fn executable(&self) -> PathBuf {
        self.dir.path().join("program")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspaces_are_distinct_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();

        let first = RunWorkspace::create(root.path(), "nop\n").unwrap();
        let second = RunWorkspace::create(root.path(), "nop\n").unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(fs::read_to_string(first.source()).unwrap(), "nop\n");

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }
}
