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

//! Register dump parser.
//!
//! Turns the raw debugger transcript into [`BreakpointSnapshot`]s in two
//! passes: [`lex`] classifies physical lines (joining register prints that
//! span two lines) and [`fold`] runs the `Scanning → InBreakpoint` state
//! machine over the tokens.

mod fold;
mod lexer;
mod value;

pub use fold::*;
pub use lexer::*;
pub use value::*;

use serde::{Deserialize, Serialize};
use slait_common::{BreakpointSnapshot, InspectionPoint};

pub(crate) const MARKER_PREFIX: &str = "=== Breakpoint at line ";

/// The banner the debugger script echoes on every breakpoint hit.
pub fn breakpoint_marker(line: usize) -> String {
    format!("{MARKER_PREFIX}{line} ===")
}

/// Snapshots recovered from a transcript, plus everything that was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpParse {
    /// One snapshot per line hit, in first-hit order.
    pub snapshots: Vec<BreakpointSnapshot>,
    /// Soft failures encountered while parsing.
    pub warnings: Vec<String>,
}

/// Parses a full debugger transcript.
pub fn parse_register_dump(transcript: &str) -> DumpParse {
    fold(lex(transcript))
}

/// Warnings for registers that were requested at a hit line but never printed.
///
/// Lines that were never hit are not reported; not reaching a line is normal.
pub fn missing_register_warnings(
    points: &[InspectionPoint],
    snapshots: &[BreakpointSnapshot],
) -> Vec<String> {
    let mut warnings = Vec::new();
    for point in points {
        let Some(snapshot) = snapshots.iter().find(|s| s.line == point.line.get()) else {
            continue;
        };
        for name in point.captured() {
            if snapshot.register(name).is_none() {
                warnings.push(format!("line {}: register {name} was not captured", snapshot.line));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    const TRANSCRIPT: &str = "\
Breakpoint 1 at 0x401000: file program.asm, line 9.
Breakpoint 2 at 0x40100a: file program.asm, line 12.

=== Breakpoint at line 9 ===
rax: 0x1
rdi: 0x1

=== Breakpoint at line 12 ===
rsi: 0x402000
[Inferior 1 (process 4242) exited normally]
";

    #[test]
    fn test_marker_matches_script_banner() {
        assert_eq!(breakpoint_marker(12), "=== Breakpoint at line 12 ===");
        assert_eq!(lex(&breakpoint_marker(12)), vec![Token::BreakpointMarker(12)]);
    }

    #[test]
    fn test_full_transcript() {
        let parse = parse_register_dump(TRANSCRIPT);

        assert!(parse.warnings.is_empty(), "{:?}", parse.warnings);
        assert_eq!(parse.snapshots.len(), 2);

        let first = &parse.snapshots[0];
        assert_eq!(first.line, 9);
        assert_eq!(first.register("rax").unwrap().hex, "0x1");
        assert_eq!(first.register("rdi").unwrap().signed, 1);

        let second = &parse.snapshots[1];
        assert_eq!(second.line, 12);
        assert_eq!(second.register("rsi").unwrap().unsigned, 0x402000);
    }

    #[test]
    fn test_killed_mid_print() {
        let parse = parse_register_dump("=== Breakpoint at line 4 ===\nrax: 0x5\nrbx: ");

        assert_eq!(parse.snapshots.len(), 1);
        assert_eq!(parse.snapshots[0].registers.len(), 1);
        assert_eq!(parse.warnings.len(), 1);
        assert!(parse.warnings[0].contains("rbx"));
    }

    #[test]
    fn test_missing_register_warnings() {
        let points = vec![
            InspectionPoint::new(NonZeroUsize::new(9).unwrap())
                .with_register("rax", true)
                .with_register("rbx", true),
            InspectionPoint::new(NonZeroUsize::new(30).unwrap()).with_register("rax", true),
        ];
        let parse = parse_register_dump(TRANSCRIPT);

        let warnings = missing_register_warnings(&points, &parse.snapshots);
        assert_eq!(warnings, vec!["line 9: register rbx was not captured".to_string()]);
    }
}
