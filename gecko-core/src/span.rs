//! Source positions attached to token-tree entries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a source file, as reported by the front-end parser.
///
/// Lines and columns are 1-based. The filename may be empty when the
/// token tree was synthesized rather than parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub filename: String,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(filename: impl Into<String>, line: u32, column: u32) -> Self {
        Position {
            filename: filename.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        }
    }
}
