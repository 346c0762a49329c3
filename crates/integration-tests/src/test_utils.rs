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

//! Test utilities for integration tests

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test; safe to call from every test
    pub fn init_test_environment() {
        slait_common::logging::ensure_test_logging(None);
    }
}

/// Example programs.
///
/// Every program assembles with the real toolchain. `; fake-...` comments at
/// the end drive the fake toolchain instead: `fake-run:` lines become the body
/// of the "linked" shell program, `fake-regs N:` lines are what the fake
/// debugger prints on each hit of line N, and a `fake-error` comment makes the
/// fake assembler reject that line.
pub mod programs {
    /// Writes "Hello\n" and exits 0. Line 9 runs after `rax` and `rdi` are set
    /// to 1; line 15 is never reached.
    pub const HELLO: &str = "\
section .data
    msg db \"Hello\", 10

section .text
    global _start
_start:
    mov rax, 1
    mov rdi, 1
    mov rsi, msg
    mov rdx, 6
    syscall
    mov rax, 60
    xor rdi, rdi
    syscall
    nop
; fake-run: printf 'Hello\\n'
; fake-regs 9: rax=0x1 rdi=0x1 rsi=0x402000
; fake-regs 12: rax=0x6 rdi=0x1
";

    /// Does not assemble (line 7).
    pub const SYNTAX_ERROR: &str = "\
section .text
    global _start
_start:
    mov rax, 60
    xor rdi, rdi
    syscall
    movv rax, 1 ; fake-error
";

    /// Writes "tick" and spins forever.
    pub const INFINITE_LOOP: &str = "\
section .data
    msg db \"tick\"

section .text
    global _start
_start:
    mov rax, 1
    mov rdi, 1
    mov rsi, msg
    mov rdx, 4
    syscall
.spin:
    jmp .spin
; fake-run: printf 'tick'
; fake-run: while :; do :; done
";

    /// Line 6 runs three times with `rcx` = 3, 2, 1.
    pub const COUNTDOWN: &str = "\
section .text
    global _start
_start:
    mov rcx, 3
.loop:
    dec rcx
    jnz .loop
    mov rax, 60
    xor rdi, rdi
    syscall
; fake-regs 6: rcx=0x3
; fake-regs 6: rcx=0x2
; fake-regs 6: rcx=0x1
";

    /// Dies from SIGSEGV after writing "before".
    pub const SEGFAULT: &str = "\
section .data
    msg db \"before\"

section .text
    global _start
_start:
    mov rax, 1
    mov rdi, 1
    mov rsi, msg
    mov rdx, 6
    syscall
    mov rax, [0]
; fake-run: printf 'before'
; fake-run: kill -SEGV $$
; fake-regs 7: rax=0x0
";
}

/// A stand-in toolchain made of shell scripts
#[cfg(unix)]
pub mod toolchain {
    use std::{
        fs, io,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    use slait_common::{LimitsConfig, SlaitConfig, ToolchainConfig};
    use tempfile::TempDir;

    const ARGS: &str = r#"out=""; in=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -*) shift ;;
    *) in="$1"; shift ;;
  esac
done
"#;

    const ASSEMBLER: &str = r#"if grep -q 'fake-error' "$in"; then
  n=$(grep -n 'fake-error' "$in" | head -n 1 | cut -d: -f1)
  echo "$in:$n: error: parser: instruction expected" >&2
  exit 1
fi
cp "$in" "$out"
"#;

    const LINKER: &str = r#"{
  echo '#!/bin/sh'
  sed -n 's/^; fake-run: //p' "$in"
} > "$out"
chmod +x "$out"
"#;

    const DEBUGGER: &str = r#"exe=""; files=""
while [ $# -gt 0 ]; do
  case "$1" in
    -x) files="$files $2"; shift 2 ;;
    -*) shift ;;
    *) exe="$1"; shift ;;
  esac
done
src="$(dirname "$exe")/program.asm"
for f in $files; do
  line=$(sed -n 's/^break [^:]*:\([0-9][0-9]*\)$/\1/p' "$f")
  [ -n "$line" ] || continue
  regs=$(sed -n 's/^ *output\/x \$\(.*\)$/\1/p' "$f")
  sed -n "s/^; fake-regs $line: //p" "$src" | while read -r vals; do
    printf '\n=== Breakpoint at line %s ===\n' "$line"
    for reg in $regs; do
      for kv in $vals; do
        case "$kv" in "$reg="*) printf '%s: %s\n' "$reg" "${kv#*=}" ;; esac
      done
    done
  done
done
"#;

    /// Fake `nasm`, `ld` and `gdb` installed in a scratch directory
    #[derive(Debug)]
    pub struct FakeToolchain {
        dir: TempDir,
        config: SlaitConfig,
    }

    impl FakeToolchain {
        /// Writes the scripts and a configuration that points at them
        pub fn install() -> io::Result<Self> {
            let dir = tempfile::Builder::new().prefix("slait-fake-toolchain-").tempdir()?;
            let assembler = install_script(dir.path(), "fake-nasm", &[ARGS, ASSEMBLER])?;
            let linker = install_script(dir.path(), "fake-ld", &[ARGS, LINKER])?;
            let debugger = install_script(dir.path(), "fake-gdb", &[DEBUGGER])?;

            let runs = dir.path().join("runs");
            fs::create_dir_all(&runs)?;

            let config = SlaitConfig {
                workspace_root: Some(runs),
                toolchain: ToolchainConfig {
                    assembler: assembler.display().to_string(),
                    assembler_args: vec![],
                    linker: linker.display().to_string(),
                    linker_args: vec![],
                    debugger: debugger.display().to_string(),
                },
                limits: LimitsConfig { run_timeout_secs: 1, ..Default::default() },
                ..Default::default()
            };
            Ok(Self { dir, config })
        }

        /// Configuration using the fake tools
        pub fn config(&self) -> &SlaitConfig {
            &self.config
        }

        /// Saves the configuration as TOML next to the scripts and returns its path
        pub fn write_config(&self) -> io::Result<PathBuf> {
            let path = self.dir.path().join("slait.toml");
            let text = toml::to_string(&self.config)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            fs::write(&path, text)?;
            Ok(path)
        }
    }

    fn install_script(dir: &Path, name: &str, parts: &[&str]) -> io::Result<PathBuf> {
        let path = dir.join(name);
        let mut body = String::from("#!/bin/sh\n");
        for part in parts {
            body.push_str(part);
        }
        fs::write(&path, body)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}

/// Isolation provider that runs the pipeline inside the test process
pub mod sandbox {
    use std::{fs, path::Path, time::Duration};

    use async_trait::async_trait;
    use slait_common::EnvironmentError;
    use slait_engine::Pipeline;
    use slait_orchestrator::{ExecOutcome, IsolationProvider, Sandbox};
    use tempfile::TempDir;

    /// Provisions [`InProcessSandbox`]es sharing one pipeline
    #[derive(Debug, Clone)]
    pub struct InProcessProvider {
        pipeline: Pipeline,
    }

    impl InProcessProvider {
        /// Uses `pipeline` for every job
        pub fn new(pipeline: Pipeline) -> Self {
            Self { pipeline }
        }
    }

    #[async_trait]
    impl IsolationProvider for InProcessProvider {
        async fn provision(&self) -> Result<Box<dyn Sandbox>, EnvironmentError> {
            let dir = tempfile::Builder::new().prefix("slait-inproc-").tempdir()?;
            Ok(Box::new(InProcessSandbox { dir, pipeline: self.pipeline.clone() }))
        }
    }

    /// A scratch directory whose `exec` understands only `slait pipeline`
    #[derive(Debug)]
    pub struct InProcessSandbox {
        dir: TempDir,
        pipeline: Pipeline,
    }

    #[async_trait]
    impl Sandbox for InProcessSandbox {
        fn id(&self) -> &str {
            "in-process"
        }

        fn work_dir(&self) -> String {
            self.dir.path().display().to_string()
        }

        async fn copy_in(&self, host: &Path, name: &str) -> Result<(), EnvironmentError> {
            fs::copy(host, self.dir.path().join(name))?;
            Ok(())
        }

        async fn exec(&self, args: &[String], limit: Duration) -> Result<ExecOutcome, EnvironmentError> {
            let [_, subcommand, source, lines, flag, out_dir] = args else {
                return Err(EnvironmentError::Provision(format!("unexpected command {args:?}")));
            };
            if subcommand != "pipeline" || flag != "--out-dir" {
                return Err(EnvironmentError::Provision(format!("unexpected command {args:?}")));
            }

            let run =
                self.pipeline.run_to_dir(Path::new(source), Path::new(lines), Path::new(out_dir));
            Ok(match tokio::time::timeout(limit, run).await {
                Ok(outcome) => ExecOutcome {
                    status: Some(outcome.status),
                    timed_out: false,
                    logs: outcome.diagnostics.join("\n"),
                },
                Err(_) => ExecOutcome { status: None, timed_out: true, logs: String::new() },
            })
        }

        async fn copy_out(&self, name: &str, host: &Path) -> Result<bool, EnvironmentError> {
            let source = self.dir.path().join(name);
            if !source.is_file() {
                return Ok(false);
            }
            fs::copy(source, host)?;
            Ok(true)
        }

        async fn destroy(&self) -> Result<(), EnvironmentError> {
            Ok(())
        }
    }
}
