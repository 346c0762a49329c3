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

//! Second pass of the dump parser: a `Scanning → InBreakpoint` state machine
//! that turns lexed lines into snapshots, one per marker.

use slait_common::BreakpointSnapshot;
use tracing::warn;

use super::{lexer::Token, parse_register_value, DumpParse};

#[derive(Debug, Clone, Copy)]
enum State {
    Scanning,
    InBreakpoint {
        /// Index into the snapshot list.
        slot: usize,
        /// False on a repeated hit; first-hit values are kept.
        recording: bool,
    },
}

struct Folder {
    state: State,
    out: DumpParse,
}

impl Folder {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.out.warnings.push(message);
    }

    fn marker(&mut self, line: usize) {
        self.state = match self.out.snapshots.iter().position(|s| s.line == line) {
            Some(slot) => {
                self.out.snapshots[slot].hits += 1;
                State::InBreakpoint { slot, recording: false }
            }
            None => {
                self.out.snapshots.push(BreakpointSnapshot::new(line));
                State::InBreakpoint { slot: self.out.snapshots.len() - 1, recording: true }
            }
        };
    }

    fn print(&mut self, name: String, value: Option<String>) {
        let slot = match self.state {
            State::Scanning => {
                self.warn(format!("register {name} printed outside any breakpoint; ignored"));
                return;
            }
            State::InBreakpoint { recording: false, .. } => return,
            State::InBreakpoint { slot, recording: true } => slot,
        };
        let line = self.out.snapshots[slot].line;

        let Some(value) = value else {
            self.warn(format!("line {line}: register {name} print was incomplete; omitted"));
            return;
        };
        match parse_register_value(&value) {
            Ok(raw) => self.out.snapshots[slot].record(name, raw),
            Err(e) => self.warn(format!("line {line}: register {name}: {e}; omitted")),
        }
    }
}

/// Folds tokens into snapshots in a single forward pass.
///
/// Snapshots appear in first-hit order. A marker for a line that already has a
/// snapshot only bumps its hit count.
pub fn fold(tokens: impl IntoIterator<Item = Token>) -> DumpParse {
    let mut folder = Folder { state: State::Scanning, out: DumpParse::default() };
    for token in tokens {
        match token {
            Token::BreakpointMarker(line) => folder.marker(line),
            Token::RegisterPrint { name, value } => folder.print(name, value),
            Token::Other(_) => {}
        }
    }
    folder.out
}
