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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::RegisterValue;

/// Register values captured when execution stopped at one inspection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointSnapshot {
    /// Source line the breakpoint was placed on.
    pub line: usize,
    /// Captured registers keyed by name. Values come from the first hit.
    pub registers: BTreeMap<String, RegisterValue>,
    /// How many times the breakpoint was reached.
    pub hits: usize,
}

impl BreakpointSnapshot {
    /// Creates a snapshot for a breakpoint that has just been hit for the first time.
    pub fn new(line: usize) -> Self {
        Self { line, registers: BTreeMap::new(), hits: 1 }
    }

    /// Records a register value. Later values for the same register are ignored.
    pub fn record(&mut self, name: impl Into<String>, raw: u64) {
        self.registers.entry(name.into()).or_insert_with(|| RegisterValue::from(raw));
    }

    /// Looks up a captured register.
    pub fn register(&self, name: &str) -> Option<&RegisterValue> {
        self.registers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_wins() {
        let mut snapshot = BreakpointSnapshot::new(9);
        snapshot.record("rax", 1);
        snapshot.record("rax", 2);

        assert_eq!(snapshot.register("rax").unwrap().unsigned, 1);
        assert_eq!(snapshot.hits, 1);
    }

    #[test]
    fn test_registers_serialize_in_name_order() {
        let mut snapshot = BreakpointSnapshot::new(3);
        snapshot.record("rdi", 0);
        snapshot.record("rax", 60);

        let json = serde_json::to_string(&snapshot).unwrap();
        let rax = json.find("\"rax\"").unwrap();
        let rdi = json.find("\"rdi\"").unwrap();
        assert!(rax < rdi);
    }
}
