//! Core of the Gecko compiler.
//!
//! This crate turns a parsed Gecko token tree into C source. The
//! pipeline is roughly:
//!
//!   token tree (from the front-end parser)
//!     -> populate   (declarations into an arena of scopes)
//!     -> builder    (resolved execution contexts, constant folding,
//!                    dead-branch elimination)
//!     -> codegen_c  (C source, plus a header for libraries)
//!
//! Higher-level tools (the CLI and anything embedding the compiler)
//! should depend on this crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Input contract and configuration
// ---------------------------------------------------------------------

pub mod tokens;
pub mod options;

// ---------------------------------------------------------------------
// Semantic layers: scopes, constant evaluation, lowering
// ---------------------------------------------------------------------

pub mod types;
pub mod scope;
pub mod evaluate;
pub mod execution;
pub mod session;
pub mod populate;
pub mod builder;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_c;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use codegen_c::CompilationArtifact;
pub use compiler::{compile, compile_pass};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::CoreError;
pub use options::{CompileOptions, GuardPolicy, OutputKind};
pub use tokens::File;
