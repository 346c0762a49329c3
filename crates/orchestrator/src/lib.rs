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

//! SLAIT Orchestrator - host-side job runner
//!
//! Validates a job's inspection points, provisions one sandbox per job, runs
//! the in-sandbox `slait pipeline` command within a wall-clock budget, pulls
//! its artifacts back out and assembles the structured [`JobReport`] from
//! them.
//!
//! [`JobReport`]: slait_common::JobReport

pub mod docker;
pub use docker::*;

pub mod local;
pub use local::*;

pub mod orchestrator;
pub use orchestrator::*;

pub mod sandbox;
pub use sandbox::*;
