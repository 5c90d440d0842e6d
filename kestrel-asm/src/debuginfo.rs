//! Source mapping carried alongside instructions and declarations.

use serde::{Deserialize, Serialize};

/// Line/column pair, 1-based as in the original sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Line number.
    pub line: usize,
    /// Column number.
    pub column: usize,
}

/// Span of a declaration body inside its source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// First position of the body.
    pub begin: SourcePosition,
    /// One past the last position of the body.
    pub end: SourcePosition,
}

/// Location of a declaration line in the assembly file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// First line of the declaration.
    pub line_start: usize,
    /// Last line of the declaration.
    pub line_end: usize,
    /// Whether the declaration has a body in this file.
    pub is_defined: bool,
}

/// Per-instruction debug info: the mapping fed into the line-number
/// program by the external emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsDebug {
    /// Source line; zero when unknown.
    pub line_number: usize,
    /// Source column; only meaningful for dynamic-language functions.
    pub column_number: usize,
    /// The raw source line, kept for diagnostics.
    pub whole_line: String,
}

impl InsDebug {
    /// Sets the line mapping.
    pub fn set_line(&mut self, line: usize) {
        self.line_number = line;
    }

    /// Sets the column mapping.
    pub fn set_column(&mut self, column: usize) {
        self.column_number = column;
    }
}

/// A local variable visible over a range of instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariable {
    /// Variable name.
    pub name: String,
    /// Type signature descriptor.
    pub signature: String,
    /// Register holding the variable.
    pub reg: u16,
    /// First instruction index where the variable is live.
    pub start: usize,
    /// Number of instructions the variable stays live.
    pub length: usize,
}
