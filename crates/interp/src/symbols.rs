//! Reserved Symbols
//!
//! The fixed keyword table, built once at boot and anchored in the pinned
//! roots so collection can never reclaim an interned keyword. Every
//! keyword has a single canonical value: spellings of up to three bytes
//! inline into the value word, longer ones are interned symbol blocks.
//! The evaluator compares keywords by value identity.
//!
//! `intern` is the one gateway for symbol creation, reader included, so
//! a user who types `cadr` gets the canonical keyword value back.

use crate::error::SchemeError;
use skim_core::{Heap, PointerStack, Registers, Roots, Value};
use std::collections::HashMap;

/// Every reserved spelling, in table order.
pub const SPELLINGS: &[&str] = &[
    // Special forms
    "quote", "define", "set!", "if", "cond", "else", "and", "or", "lambda", "let",
    // Arithmetic and comparison
    "+", "-", "*", "/", "<", "<=", "=", ">", ">=",
    // Pair accessors, depth 1 through 4
    "car", "cdr",
    "caar", "cadr", "cdar", "cddr",
    "caaar", "caadr", "cadar", "caddr", "cdaar", "cdadr", "cddar", "cdddr",
    "caaaar", "caaadr", "caadar", "caaddr", "cadaar", "cadadr", "caddar", "cadddr",
    "cdaaar", "cdaadr", "cdadar", "cdaddr", "cddaar", "cddadr", "cdddar", "cddddr",
    // Pair and list operations
    "cons", "set-car!", "set-cdr!", "list", "length",
    // Predicates
    "eq?", "null?", "pair?", "list?", "integer?", "number?", "symbol?", "string?",
    "odd?", "even?", "not",
    // I/O
    "write", "newline", "read",
    // Control
    "error",
    // Diagnostics
    "gcstat", "gcstatwrite", "garbagecollect", "synchecktoggle",
];

pub struct SymbolTable {
    values: Vec<Value>,
    by_name: HashMap<&'static str, u16>,
    by_value: HashMap<Value, u16>,
}

impl SymbolTable {
    /// Intern every reserved spelling. Returns the table and the heap
    /// list anchoring the interned values; the caller pins the list.
    /// Interned keywords are kept reachable through that list (built on
    /// the pointer stack) while later allocations may collect.
    pub fn boot(
        heap: &mut Heap,
        stack: &mut PointerStack,
        regs: &Registers,
    ) -> Result<(SymbolTable, Value), SchemeError> {
        let mut values = vec![Value::NIL; SPELLINGS.len()];
        stack.push(Value::NIL)?; // list head
        for (i, spelling) in SPELLINGS.iter().enumerate().rev() {
            let text = spelling.as_bytes();
            let sym = match Value::small_sym(text) {
                Some(v) => v,
                None => heap.make_symbol_obj(text, Roots { stack, regs })?,
            };
            values[i] = sym;
            stack.push(sym)?;
            let cell = heap.alloc_pair(
                stack.peek(0)?,
                stack.peek(1)?,
                Roots { stack, regs },
            )?;
            stack.pop()?;
            stack.pop()?;
            stack.push(cell)?;
        }
        let anchor = stack.pop()?;

        let mut by_name = HashMap::new();
        let mut by_value = HashMap::new();
        for (i, spelling) in SPELLINGS.iter().enumerate() {
            by_name.insert(*spelling, i as u16);
            by_value.insert(values[i], i as u16);
        }
        let table = SymbolTable { values, by_name, by_value };
        Ok((table, anchor))
    }

    /// Make a symbol from its spelling, returning the canonical value for
    /// reserved spellings.
    pub fn intern(
        &self,
        heap: &mut Heap,
        roots: Roots<'_>,
        text: &[u8],
    ) -> Result<Value, SchemeError> {
        if let Ok(s) = std::str::from_utf8(text)
            && let Some(i) = self.by_name.get(s)
        {
            return Ok(self.values[*i as usize]);
        }
        if let Some(v) = Value::small_sym(text) {
            return Ok(v);
        }
        Ok(heap.make_symbol_obj(text, roots)?)
    }

    /// The spelling of a reserved symbol value, by identity.
    pub fn reserved_of(&self, v: Value) -> Option<&'static str> {
        self.by_value.get(&v).map(|i| SPELLINGS[*i as usize])
    }

    /// The canonical value of a known spelling.
    pub fn value_of(&self, name: &str) -> Value {
        let i = self.by_name[name];
        self.values[i as usize]
    }

    /// True for the forms the evaluator dispatches on specially.
    pub fn is_special_form(name: &str) -> bool {
        matches!(
            name,
            "quote" | "define" | "set!" | "if" | "cond" | "and" | "or" | "lambda" | "let"
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Heap, PointerStack, Registers, SymbolTable) {
        let mut heap = Heap::new(4096, 32 * 1024);
        let mut stack = PointerStack::new(256);
        let regs = Registers::new();
        let (table, anchor) = SymbolTable::boot(&mut heap, &mut stack, &regs).unwrap();
        stack.pin(anchor).unwrap();
        (heap, stack, regs, table)
    }

    #[test]
    fn test_every_spelling_has_identity() {
        let (mut heap, stack, regs, table) = fixture();
        for spelling in SPELLINGS {
            let v = table
                .intern(&mut heap, Roots { stack: &stack, regs: &regs }, spelling.as_bytes())
                .unwrap();
            assert_eq!(v, table.value_of(spelling), "{spelling} not canonical");
            assert_eq!(table.reserved_of(v), Some(*spelling));
        }
    }

    #[test]
    fn test_short_keywords_inline() {
        let (_, _, _, table) = fixture();
        assert!(table.value_of("car").is_immediate());
        assert!(table.value_of("+").is_immediate());
        assert!(!table.value_of("lambda").is_immediate());
        assert!(table.value_of("cadr").block_index().is_some());
    }

    #[test]
    fn test_interning_survives_collection() {
        let (mut heap, stack, regs, table) = fixture();
        let before = table.value_of("garbagecollect");
        skim_core::collect(&mut heap, Roots { stack: &stack, regs: &regs });
        let after = table
            .intern(&mut heap, Roots { stack: &stack, regs: &regs }, b"garbagecollect")
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(heap.text_of(after), Some(b"garbagecollect".to_vec()));
    }

    #[test]
    fn test_unreserved_symbols_are_not_reserved() {
        let (mut heap, stack, regs, table) = fixture();
        let v = table
            .intern(&mut heap, Roots { stack: &stack, regs: &regs }, b"frobnicate")
            .unwrap();
        assert_eq!(table.reserved_of(v), None);
        let w = Value::small_sym(b"xyz").unwrap();
        assert_eq!(table.reserved_of(w), None);
    }

    #[test]
    fn test_special_form_set() {
        assert!(SymbolTable::is_special_form("define"));
        assert!(SymbolTable::is_special_form("set!"));
        assert!(!SymbolTable::is_special_form("else"));
        assert!(!SymbolTable::is_special_form("cons"));
    }
}
