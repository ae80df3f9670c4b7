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

//! Byte ranges attached to tokens, AST nodes and analysis findings

use serde::Serialize;

/// `value` found at `[start, end)` of the text it was parsed from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spanned<T> {
    /// Payload
    pub value: T,
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl<T> Spanned<T> {
    /// Attach a range to `value`
    pub fn new(value: T, start: usize, end: usize) -> Self {
        Self { value, start, end }
    }

    /// Length of the range in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `offset` falls inside the range
    pub fn contains(&self, offset: usize) -> bool {
        (self.start..self.end).contains(&offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_half_open() {
        let span = Spanned::new("name", 4, 8);
        assert_eq!(span.len(), 4);
        assert!(span.contains(4));
        assert!(!span.contains(8));
        assert!(Spanned::new((), 3, 3).is_empty());
    }
}
