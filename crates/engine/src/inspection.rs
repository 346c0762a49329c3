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

//! Inspection-point file parsing.
//!
//! One directive per line:
//!
//! ```text
//! # comment
//! line:9, rax:1, rbx:0, rcx:1
//! ```
//!
//! `line:<N>` is mandatory and must come first. Register tokens are passed
//! through untouched; whether a name exists is for the debugger to decide.

use std::{collections::HashMap, num::NonZeroUsize, str::FromStr};

use slait_common::{InspectionPoint, RegisterRequest, SpecFormatError};
use tracing::warn;

/// Parsed inspection file plus the tokens that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionSpec {
    /// Inspection points in file order.
    pub points: Vec<InspectionPoint>,
    /// One message per ignored token.
    pub warnings: Vec<String>,
}

impl InspectionSpec {
    /// Requested source lines in file order.
    pub fn lines(&self) -> Vec<usize> {
        self.points.iter().map(|p| p.line.get()).collect()
    }

    /// Whether any inspection point was requested.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromStr for InspectionSpec {
    type Err = SpecFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_inspection_spec(s)
    }
}

/// Parses an inspection file into ordered inspection points.
pub fn parse_inspection_points(text: &str) -> Result<Vec<InspectionPoint>, SpecFormatError> {
    parse_inspection_spec(text).map(|spec| spec.points)
}

/// Parses an inspection file, keeping warnings for ignored tokens.
pub fn parse_inspection_spec(text: &str) -> Result<InspectionSpec, SpecFormatError> {
    let mut spec = InspectionSpec::default();
    // source line -> directive line that requested it
    let mut seen: HashMap<usize, usize> = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let file_line = idx + 1;
        let directive = raw.trim();
        if directive.is_empty() || directive.starts_with('#') {
            continue;
        }

        let point = parse_directive(directive, file_line, &mut spec.warnings)?;
        if let Some(&first) = seen.get(&point.line.get()) {
            return Err(SpecFormatError::DuplicateLine {
                line: file_line,
                target: point.line.get(),
                first,
            });
        }
        seen.insert(point.line.get(), file_line);
        spec.points.push(point);
    }

    Ok(spec)
}

fn parse_directive(
    directive: &str,
    file_line: usize,
    warnings: &mut Vec<String>,
) -> Result<InspectionPoint, SpecFormatError> {
    let mut tokens = directive.split(',').map(str::trim).filter(|t| !t.is_empty());

    let line = match tokens.next().and_then(|t| t.split_once(':')) {
        Some((key, value)) if key.trim() == "line" => parse_line_number(value.trim(), file_line)?,
        _ => {
            return Err(SpecFormatError::MissingLineDirective {
                line: file_line,
                text: directive.to_string(),
            })
        }
    };

    let mut point = InspectionPoint::new(line);
    for token in tokens {
        match parse_register_token(token) {
            Some(request) => point.registers.push(request),
            None => {
                let message = format!("line {file_line}: ignoring malformed token {token:?}");
                warn!("{}", message);
                warnings.push(message);
            }
        }
    }

    Ok(point)
}

fn parse_line_number(value: &str, file_line: usize) -> Result<NonZeroUsize, SpecFormatError> {
    let invalid = || SpecFormatError::InvalidLineNumber { line: file_line, value: value.to_string() };

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<NonZeroUsize>().map_err(|_| invalid())
}

fn parse_register_token(token: &str) -> Option<RegisterRequest> {
    let (name, flag) = token.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) || name == "line" {
        return None;
    }

    let capture = match flag.trim() {
        "1" => true,
        "0" => false,
        _ => return None,
    };
    Some(RegisterRequest { name: name.to_string(), capture })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_directive() {
        let points = parse_inspection_points("line:9, rax:1, rbx:0, rcx:1").unwrap();

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].line.get(), 9);
        assert_eq!(points[0].captured(), vec!["rax", "rcx"]);
        assert_eq!(points[0].registers.len(), 3);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let text = "# header\n\n   # indented comment\nline:3, rdi:1\n\n";
        let points = parse_inspection_points(text).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].line.get(), 3);
    }

    #[test]
    fn test_empty_file_is_valid() {
        assert!(parse_inspection_points("").unwrap().is_empty());
        assert!(parse_inspection_points("# nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let points = parse_inspection_points("line:12, rax:1\nline:4, rbx:1\nline:8").unwrap();
        let lines: Vec<usize> = points.iter().map(|p| p.line.get()).collect();
        assert_eq!(lines, vec![12, 4, 8]);
    }

    #[test]
    fn test_duplicate_line_is_rejected() {
        let err = parse_inspection_points("line:9, rax:1\n# again\nline:9, rbx:1").unwrap_err();
        assert_eq!(err, SpecFormatError::DuplicateLine { line: 3, target: 9, first: 1 });
    }

    #[test]
    fn test_missing_line_directive() {
        let err = parse_inspection_points("rax:1, line:9").unwrap_err();
        assert!(matches!(err, SpecFormatError::MissingLineDirective { line: 1, .. }));

        let err = parse_inspection_points("line:2\nrax:1").unwrap_err();
        assert!(matches!(err, SpecFormatError::MissingLineDirective { line: 2, .. }));
    }

    #[test]
    fn test_invalid_line_numbers() {
        for bad in ["line:0", "line:-3", "line:abc", "line:", "line:9a", "line:+9"] {
            let err = parse_inspection_points(bad).unwrap_err();
            assert!(
                matches!(err, SpecFormatError::InvalidLineNumber { line: 1, .. }),
                "{bad} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_malformed_tokens_are_ignored_with_warning() {
        let spec = parse_inspection_spec("line:5, rax, rbx:2, rcx:1, :1, line:6").unwrap();

        assert_eq!(spec.points[0].captured(), vec!["rcx"]);
        assert_eq!(spec.warnings.len(), 4);
        assert!(spec.warnings[0].contains("\"rax\""));
    }

    #[test]
    fn test_unknown_register_names_pass_through() {
        let points = parse_inspection_points("line:1, notareg:1, xmm0:1").unwrap();
        assert_eq!(points[0].captured(), vec!["notareg", "xmm0"]);
    }

    #[test]
    fn test_whitespace_around_tokens() {
        let spec: InspectionSpec = "  line : 7 ,  rax : 1 ,,  ".parse().unwrap();
        assert_eq!(spec.lines(), vec![7]);
        assert_eq!(spec.points[0].captured(), vec!["rax"]);
        assert!(spec.warnings.is_empty());
    }

    #[test]
    fn test_every_parsed_line_is_positive_and_unique() {
        let text = "line:1\nline:2, rax:1\n# c\nline:10, rsp:1\nline:3";
        let spec = parse_inspection_spec(text).unwrap();
        let mut lines = spec.lines();
        assert!(lines.iter().all(|&l| l > 0));
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), spec.points.len());
    }
}
