//! Error types.
//!
//! Five error families: build-time errors from the symbolic builder,
//! translation errors from a backend compiling ill-formed IR, runtime
//! errors from the memory backend, pipeline misuse, and errors surfaced
//! verbatim from a (not-implemented-here) real server connection. None of
//! these are caught and swallowed inside the crate — they always propagate
//! to the caller via `?`.

use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors detected by the symbolic builder while constructing IR.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("unknown ref id: {0}")]
    UnknownRefId(String),
    #[error("cannot assign to position of non-var ref: {0}")]
    AssignAtNonVar(String),
    #[error("unsupported sequence kind: {0}")]
    UnsupportedSequenceKind(String),
}

/// Errors raised by a backend translating ill-formed IR. These should be
/// unreachable when the IR was produced by the symbolic builder; they
/// exist as a defensive boundary for hand-built or deserialized IR.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("unknown expression kind: {0}")]
    UnknownExprKind(String),
    #[error("unknown statement kind: {0}")]
    UnknownStmtKind(String),
    #[error("unknown operator: {0:?}")]
    UnknownOp(String),
    #[error("unknown value type: {0:?}")]
    UnknownValueType(String),
}

/// Errors raised while executing a compiled script against the memory
/// backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("{0} is uninitialized")]
    UninitVariable(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("wrong number of arguments for {name}: expected {expected}, got {got}")]
    ArgCountMismatch {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("both expire_in and expire_timestamp were given to set")]
    ModeConflict,
    #[error("no value supplied for declared key/arg: {0}")]
    MissingBinding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline left with {0} unexecuted queued command(s)")]
    UnexecutedPipeline(usize),
}

/// An error surfaced from an external Redis connection, augmented with an
/// annotated snippet around the offending line of the emitted script. The
/// crate does not implement the connection itself; this type exists so
/// a collaborator has somewhere to report into.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("server error: {message}\n{snippet}")]
pub struct ServerError {
    pub message: String,
    pub snippet: String,
}

impl ServerError {
    pub fn new(message: impl Into<String>, script: &str, line: usize) -> Self {
        ServerError {
            message: message.into(),
            snippet: crate::lua::annotate_snippet(script, line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_displays_kind_and_payload() {
        let err = BuildError::DuplicateName("foo".to_string());
        assert_eq!(err.to_string(), "duplicate name: foo");
    }

    #[test]
    fn pipeline_error_counts_queued_commands() {
        let err = PipelineError::UnexecutedPipeline(3);
        assert!(err.to_string().contains('3'));
    }
}
