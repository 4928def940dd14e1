//! Interpreter Errors
//!
//! Every failure the engine can diagnose, one variant per kind. The REPL
//! loop is the recovery point: any recoverable error thrown during
//! evaluation unwinds to it through `Result`, after which the loop resets
//! the stacks and registers, collects, prints the diagnostic, and resumes
//! reading. Reader errors resynchronize inside the reader instead and
//! never unwind past it.

use skim_core::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemeError {
    /// Ill-formed source text or an ill-formed special form.
    #[error("{0}")]
    Syntax(String),

    /// Reference to a symbol with no binding.
    #[error("unbound variable: {0}")]
    Unbound(String),

    /// Application of something that is not a procedure.
    #[error("not applicable: {0}")]
    Unapplicable(String),

    /// Attempt to define or assign a reserved symbol.
    #[error("cannot bind reserved symbol {0}")]
    Reserved(String),

    /// Built-in invoked with the wrong number or kind of arguments.
    #[error("{0}")]
    ArityType(String),

    /// Raised by `(error ...)`.
    #[error("{0}")]
    User(String),

    /// Integer parsing overflow, or a block too large to encode.
    #[error("{0}")]
    Overflow(String),

    /// Heap or stack space exhausted.
    #[error("{0}")]
    Resource(String),

    /// The byte stream itself failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant was violated.
    #[error("{0}")]
    Fatal(String),
}

impl SchemeError {
    /// The kind word used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemeError::Syntax(_) => "syntax",
            SchemeError::Unbound(_) => "unbound",
            SchemeError::Unapplicable(_) => "unapplicable",
            SchemeError::Reserved(_) => "reserved",
            SchemeError::ArityType(_) => "arity/type",
            SchemeError::User(_) => "user",
            SchemeError::Overflow(_) => "overflow",
            SchemeError::Resource(_) => "resource",
            SchemeError::Io(_) => "i/o",
            SchemeError::Fatal(_) => "fatal",
        }
    }

    /// Whether the REPL loop may recover and keep reading.
    pub fn recoverable(&self) -> bool {
        !matches!(self, SchemeError::Io(_) | SchemeError::Fatal(_))
    }
}

impl From<MemoryError> for SchemeError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::PairsExhausted
            | MemoryError::BlocksExhausted
            | MemoryError::StackOverflow
            | MemoryError::LabelOverflow => SchemeError::Resource(e.to_string()),
            MemoryError::BlockTooLarge(_) => SchemeError::Overflow(e.to_string()),
            MemoryError::StackUnderflow
            | MemoryError::LabelUnderflow
            | MemoryError::PinDenied => SchemeError::Fatal(e.to_string()),
        }
    }
}
