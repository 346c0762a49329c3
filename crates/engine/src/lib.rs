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

//! SLAIT Engine - the build-run-inspect pipeline
//!
//! Parses inspection points, builds the user's assembly program, runs it,
//! replays it under a batch-mode debugger and turns the debugger transcript
//! into register snapshots.

pub mod build;
pub use build::*;

pub mod driver;
pub use driver::*;

pub mod dump;
pub use dump::*;

pub mod inspection;
pub use inspection::*;

pub mod pipeline;
pub use pipeline::*;

pub mod process;
pub use process::*;

pub mod workspace;
pub use workspace::*;
