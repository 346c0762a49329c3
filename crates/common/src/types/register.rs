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

use serde::{Deserialize, Serialize};

/// Character used in [`RegisterValue::ascii_le`] for bytes outside the printable range.
pub const ASCII_PLACEHOLDER: char = '.';

/// One 64-bit register value in every representation the results view offers.
///
/// All fields are reinterpretations of the same bit pattern. Build values with
/// [`RegisterValue::from`] so they can never drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterValue {
    /// Lowercase, `0x`-prefixed, minimal hexadecimal form (e.g. `0x1`).
    pub hex: String,
    /// Unsigned interpretation.
    #[serde(rename = "u64")]
    pub unsigned: u64,
    /// Two's complement signed interpretation.
    #[serde(rename = "i64")]
    pub signed: i64,
    /// Memory-order bytes, least significant first.
    pub bytes_le: [u8; 8],
    /// `bytes_le` rendered as characters, non-printable bytes replaced by `.`.
    pub ascii_le: String,
}

impl From<u64> for RegisterValue {
    fn from(raw: u64) -> Self {
        let bytes_le = raw.to_le_bytes();
        Self {
            hex: format!("{raw:#x}"),
            unsigned: raw,
            signed: raw as i64,
            bytes_le,
            ascii_le: render_ascii(&bytes_le),
        }
    }
}

impl RegisterValue {
    /// Re-derives all representations from `u64` and checks they match.
    pub fn is_consistent(&self) -> bool {
        *self == Self::from(self.unsigned)
    }
}

fn render_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { ASCII_PLACEHOLDER })
        .collect()
}
