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

//! First pass of the dump parser.
//!
//! Classifies each transcript line as a breakpoint marker, a register print
//! (`name: value` or the `info registers` layout) or anything else.

use once_cell::sync::Lazy;
use regex::Regex;

use super::MARKER_PREFIX;

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^=== Breakpoint at line (\d+) ===$").unwrap());

/// `rax: 0x1`, `rax: 1`, or `rax:` with the value on the following line.
static PRINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]{0,15}):[ \t]*(\S*)$").unwrap());

/// `info registers` layout: `rax            0x1                 1`.
static INFO_REGISTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_]{0,15})[ \t]+(0x[0-9a-fA-F]+)(?:[ \t].*)?$").unwrap()
});

static BARE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(?:0[xX])?[0-9a-fA-F]+$").unwrap());

/// One logical line of a debugger transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `=== Breakpoint at line N ===`.
    BreakpointMarker(usize),
    /// A register print. `value` is `None` when the print was cut short.
    RegisterPrint {
        /// Register name as printed.
        name: String,
        /// Value text, not yet normalised.
        value: Option<String>,
    },
    /// Banners, debugger chatter and anything else.
    Other(String),
}

/// Splits a transcript into tokens. Blank lines are dropped.
///
/// A register print with nothing after the colon takes its value from the
/// next physical line when that line is a bare value; the two lines form one
/// token.
pub fn lex(transcript: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lines = transcript.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();

    while let Some(line) = lines.next() {
        if line.starts_with(MARKER_PREFIX) {
            if let Some(n) = MARKER.captures(line).and_then(|c| c[1].parse().ok()) {
                tokens.push(Token::BreakpointMarker(n));
                continue;
            }
        }

        if let Some(caps) = PRINT.captures(line) {
            let name = caps[1].to_string();
            let value = match &caps[2] {
                "" => lines.next_if(|next| BARE_VALUE.is_match(next)).map(str::to_string),
                v => Some(v.to_string()),
            };
            tokens.push(Token::RegisterPrint { name, value });
            continue;
        }

        if let Some(caps) = INFO_REGISTER.captures(line) {
            tokens.push(Token::RegisterPrint {
                name: caps[1].to_string(),
                value: Some(caps[2].to_string()),
            });
            continue;
        }

        tokens.push(Token::Other(line.to_string()));
    }

    tokens
}
