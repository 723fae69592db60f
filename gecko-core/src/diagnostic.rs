//! Accumulated (non-fatal) compiler diagnostics.
//!
//! Diagnostics are collected during a full compile pass and reported
//! together at the end. Fatal problems use [`crate::error::CoreError`]
//! instead.

use std::fmt;

use crate::span::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A symbol was not found in any reachable scope.
    UnresolvedSymbol,
    /// A conditional guard cannot be a boolean.
    NonBooleanGuard,
    /// An executable build has no `Main` method.
    MissingEntryPoint,
    /// `elif`/`else` without a preceding `if`.
    DanglingBranch,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::UnresolvedSymbol => "E0101",
            DiagnosticKind::NonBooleanGuard => "E0102",
            DiagnosticKind::MissingEntryPoint => "E0103",
            DiagnosticKind::DanglingBranch => "E0104",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub position: Option<Position>,
    /// Scope stack, innermost first.
    pub trace: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            position: None,
            trace: Vec::new(),
        }
    }

    pub fn at(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.code(), self.message)?;
        if let Some(position) = &self.position {
            write!(f, " [{position}]")?;
        }
        for frame in &self.trace {
            write!(f, "\n\t-> {frame}")?;
        }
        Ok(())
    }
}

/// Ordered sink for diagnostics produced during one compile session.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Adds a diagnostic unless an identical one was already reported.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if !self.items.contains(&diagnostic) {
            self.items.push(diagnostic);
        }
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.items)
    }
}
