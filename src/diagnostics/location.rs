// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Source location tracking for diagnostics

use serde::Serialize;
use std::fmt;

/// A position in template text (1-indexed line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed, in characters)
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl Position {
    /// Create a new position
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Create a position from a byte offset in the source text
    ///
    /// Offsets past the end of the source clamp to the end position.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let mut line = 1;
        let mut column = 1;

        for (index, ch) in source.char_indices() {
            if index >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }

        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A located range in the template: display position plus raw `[start, end)` offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SourceLocation {
    /// Line of `start` (1-indexed)
    pub line: usize,
    /// Column of `start` (1-indexed)
    pub column: usize,
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl SourceLocation {
    /// Build a location from raw offsets into `source`
    pub fn from_offsets(source: &str, start: usize, end: usize) -> Self {
        let position = Position::from_offset(source, start);
        Self {
            line: position.line,
            column: position.column,
            start,
            end: end.max(start),
        }
    }

    /// Length of the range in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the range is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}..{})", self.line, self.column, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_from_offset_counts_lines_and_columns() {
        let source = "ab\ncd{{ x }}";
        assert_eq!(Position::from_offset(source, 0), Position::new(1, 1));
        assert_eq!(Position::from_offset(source, 1), Position::new(1, 2));
        assert_eq!(Position::from_offset(source, 3), Position::new(2, 1));
        assert_eq!(Position::from_offset(source, 5), Position::new(2, 3));
    }

    #[test]
    fn position_clamps_past_end() {
        assert_eq!(Position::from_offset("abc", 100), Position::new(1, 4));
    }

    #[test]
    fn location_keeps_raw_offsets() {
        let loc = SourceLocation::from_offsets("x\n{{ y", 2, 4);
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 1);
        assert_eq!(loc.len(), 2);
        assert_eq!(loc.to_string(), "2:1 [2..4)");
    }
}
