use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::span::Position;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("could not find method '{name}'")]
    UnresolvedMethod {
        name: String,
        position: Option<Position>,
        trace: Vec<String>,
    },
    #[error("transpile error: {method} requires a value for parameter '{parameter}', none passed")]
    MissingArgument { method: String, parameter: String },
    #[error("constructor of class '{class}' called without a receiver to initialize")]
    MissingReceiver { class: String },
    #[error("compilation failed with {} error(s)", .0.len())]
    CompilationFailed(Vec<Diagnostic>),
}
