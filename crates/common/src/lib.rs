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

//! SLAIT Common - Shared functionality for SLAIT components
//!
//! This crate provides the data model shared by the in-sandbox pipeline and the
//! host-side orchestrator, together with the error taxonomy, configuration
//! loading and logging setup used by every SLAIT binary.

/// Data model: inspection points, register values, snapshots and results
pub mod types;

/// Configuration file model and loading
pub mod config;
/// Error taxonomy for every pipeline stage
pub mod errors;
/// Logging setup and utilities for consistent logging across SLAIT components
pub mod logging;

pub use config::*;
pub use errors::*;
pub use logging::*;
pub use types::*;
