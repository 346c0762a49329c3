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

//! Register value normalisation.

use thiserror::Error;

/// A register print whose value could not be turned into a 64-bit quantity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueParseError {
    /// Nothing to parse.
    #[error("empty register value")]
    Empty,
    /// Not hexadecimal or decimal.
    #[error("unrecognised register value {0:?}")]
    Malformed(String),
    /// More than 64 bits.
    #[error("register value {0:?} does not fit in 64 bits")]
    Overflow(String),
}

/// Normalises one debugger value token into the raw 64-bit register contents.
///
/// Accepted forms, in order:
/// - `0x`-prefixed hexadecimal (`output/x`, `info registers` first column),
/// - `-`-prefixed decimal, reinterpreted as two's complement,
/// - bare hexadecimal digits (`printf "%lx"`).
///
/// Anything after the first whitespace is ignored, so `0x1 1` yields `1`.
pub fn parse_register_value(text: &str) -> Result<u64, ValueParseError> {
    let token = text.split_whitespace().next().ok_or(ValueParseError::Empty)?;

    if let Some(digits) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return parse_hex(token, digits);
    }

    if let Some(digits) = token.strip_prefix('-') {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValueParseError::Malformed(token.to_string()));
        }
        let magnitude: u64 =
            digits.parse().map_err(|_| ValueParseError::Overflow(token.to_string()))?;
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(ValueParseError::Overflow(token.to_string()));
        }
        return Ok(magnitude.wrapping_neg());
    }

    parse_hex(token, token)
}

fn parse_hex(token: &str, digits: &str) -> Result<u64, ValueParseError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValueParseError::Malformed(token.to_string()));
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 16 {
        return Err(ValueParseError::Overflow(token.to_string()));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(significant, 16).map_err(|_| ValueParseError::Malformed(token.to_string()))
}
