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

use std::{fmt::Display, num::NonZeroUsize};

use serde::{Deserialize, Serialize};

/// A register mentioned on an inspection line together with its capture flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RegisterRequest {
    /// Register name exactly as written by the user (validity is the debugger's concern).
    pub name: String,
    /// Whether the register should be captured when the line is reached.
    pub capture: bool,
}

/// A user-requested source line plus the registers to capture when execution reaches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InspectionPoint {
    /// 1-based source line number.
    pub line: NonZeroUsize,
    /// Registers in the order they were written.
    pub registers: Vec<RegisterRequest>,
}

impl InspectionPoint {
    /// Creates an inspection point with no register requests.
    pub fn new(line: NonZeroUsize) -> Self {
        Self { line, registers: Vec::new() }
    }

    /// Appends a register request.
    pub fn with_register(mut self, name: impl Into<String>, capture: bool) -> Self {
        self.registers.push(RegisterRequest { name: name.into(), capture });
        self
    }

    /// Names of the registers flagged for capture, in order, without duplicates.
    pub fn captured(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for request in self.registers.iter().filter(|r| r.capture) {
            if !names.contains(&request.name.as_str()) {
                names.push(&request.name);
            }
        }
        names
    }
}

impl Display for InspectionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line:{}", self.line)?;
        for request in &self.registers {
            write!(f, ", {}:{}", request.name, u8::from(request.capture))?;
        }
        Ok(())
    }
}
