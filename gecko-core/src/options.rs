//! Compile-time configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Requires `Main` and emits the `main` wrapper.
    #[default]
    Executable,
    /// Also emits a header with types and forward signatures.
    Library,
    Object,
}

/// How conditional guards that are not plain booleans are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPolicy {
    /// Only booleans, bool-returning calls and bool-typed symbols.
    #[default]
    Strict,
    /// Additionally accepts the integers `0` and `1`.
    Lenient,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub kind: OutputKind,
    pub guard_policy: GuardPolicy,
}

impl CompileOptions {
    pub fn executable() -> Self {
        CompileOptions::default()
    }

    pub fn library() -> Self {
        CompileOptions {
            kind: OutputKind::Library,
            ..CompileOptions::default()
        }
    }

    pub fn with_guard_policy(mut self, guard_policy: GuardPolicy) -> Self {
        self.guard_policy = guard_policy;
        self
    }
}
