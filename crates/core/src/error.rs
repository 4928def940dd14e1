//! Memory-layer errors.
//!
//! Everything the heap and the machine stacks can refuse to do. The
//! interpreter crate maps these onto its user-facing error kinds
//! (exhaustion and stack overflow become resource errors, an oversized
//! block becomes an overflow error, underflow is an internal fault).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("pair region exhausted")]
    PairsExhausted,

    #[error("block region exhausted")]
    BlocksExhausted,

    #[error("block of {0} bytes exceeds the representable size")]
    BlockTooLarge(usize),

    #[error("pointer stack overflow")]
    StackOverflow,

    #[error("pointer stack underflow")]
    StackUnderflow,

    #[error("label stack overflow")]
    LabelOverflow,

    #[error("label stack underflow")]
    LabelUnderflow,

    #[error("pinned roots may only be added while the stack is empty")]
    PinDenied,
}
