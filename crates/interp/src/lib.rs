//! Skim: a micro-Scheme interpreter
//!
//! A read-eval-print engine over the `skim-core` memory substrate:
//!
//! - `symbols`: the reserved-keyword table, interned and pinned at boot
//! - `reader`: ring-buffered, backtracking recursive-descent parsing
//! - `writer`: cycle-bounded external printing
//! - `machine`: the explicit-control evaluator (label state machine)
//! - `builtins`: built-in procedure dispatch
//! - `env`: environment frames and lookup
//! - `interp`: the `Interp` value tying it all together, plus the REPL
//! - `config`: capacities and limits, CLI/TOML surfaced

pub mod builtins;
pub mod config;
pub mod env;
pub mod error;
pub mod interp;
pub mod machine;
pub mod reader;
pub mod symbols;
pub mod writer;

pub use config::Config;
pub use error::SchemeError;
pub use interp::Interp;
pub use reader::{ReadOutcome, Reader};
pub use symbols::SymbolTable;
pub use writer::write_value;

pub use skim_core::Value;
