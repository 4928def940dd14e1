//! Skim Core: the memory substrate of the Skim interpreter
//!
//! This crate knows nothing about Scheme syntax or keywords. It provides
//! the pieces the language layer is built on:
//!
//! - `value`: 32-bit tagged value words with inlined immediates
//! - `heap`: the two-region bump/free-list heap (pair cells, data blocks)
//! - `gc`: non-recursive mark-and-sweep with pointer-reversal marking
//! - `stacks`: the pointer stack (with pinned roots), the label stack,
//!   and the six machine registers that form the collector's root set
//! - `error`: what the memory layer can refuse to do

pub mod error;
pub mod gc;
pub mod heap;
pub mod stacks;
pub mod value;

pub use error::MemoryError;
pub use gc::collect;
pub use heap::{BlockKind, Heap, HeapStats, Hint};
pub use stacks::{LabelStack, PointerStack, Registers, Roots};
pub use value::{Imm, Region, SmallStr, Value, SMALL_INT_MAX, SMALL_INT_MIN};
