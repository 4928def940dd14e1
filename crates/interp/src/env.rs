//! Environments
//!
//! An environment is a pair cell promoted to an env header: *first* is
//! the parent environment (nil at the top), *rest* is the topmost frame,
//! a list of bindings. A binding is a pair of symbol and value. Lookup
//! walks the frame, then the parent chain; defining prepends to the
//! topmost frame, so a `define` inside a body is visible to the
//! expressions after it.

use skim_core::{Heap, Hint, Value};

/// Find the binding pair for `sym` anywhere in the chain.
pub fn lookup(heap: &Heap, env: Value, sym: Value) -> Option<Value> {
    let mut e = env;
    while heap.hint(e) == Some(Hint::EnvHeader) {
        if let Some(b) = scan_frame(heap, heap.rest(e)?, sym) {
            return Some(b);
        }
        e = heap.first(e)?;
    }
    None
}

/// Find the binding pair for `sym` in the topmost frame only.
pub fn lookup_top_frame(heap: &Heap, env: Value, sym: Value) -> Option<Value> {
    if heap.hint(env) != Some(Hint::EnvHeader) {
        return None;
    }
    scan_frame(heap, heap.rest(env)?, sym)
}

fn scan_frame(heap: &Heap, frame: Value, sym: Value) -> Option<Value> {
    let mut f = frame;
    while heap.is_pair_cell(f) {
        let binding = heap.first(f)?;
        if heap.is_pair_cell(binding) && heap.values_eq(heap.first(binding)?, sym) {
            return Some(binding);
        }
        f = heap.rest(f)?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use skim_core::{PointerStack, Registers, Roots};

    fn roots<'a>(stack: &'a PointerStack, regs: &'a Registers) -> Roots<'a> {
        Roots { stack, regs }
    }

    struct Fixture {
        heap: Heap,
        stack: PointerStack,
        regs: Registers,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                heap: Heap::new(1024, 8192),
                stack: PointerStack::new(64),
                regs: Registers::new(),
            }
        }

        fn env(&mut self, parent: Value) -> Value {
            let e = self
                .heap
                .alloc_pair(parent, Value::NIL, roots(&self.stack, &self.regs))
                .unwrap();
            self.heap.promote(e, Hint::EnvHeader);
            e
        }

        fn bind(&mut self, env: Value, name: &[u8], v: Value) -> Value {
            let sym = Value::small_sym(name).unwrap();
            let b = self
                .heap
                .alloc_pair(sym, v, roots(&self.stack, &self.regs))
                .unwrap();
            let frame = self.heap.rest(env).unwrap();
            let nf = self
                .heap
                .alloc_pair(b, frame, roots(&self.stack, &self.regs))
                .unwrap();
            self.heap.set_rest(env, nf);
            b
        }
    }

    #[test]
    fn test_lookup_walks_frames_then_parents() {
        let mut fx = Fixture::new();
        let top = fx.env(Value::NIL);
        let inner = fx.env(top);
        let bx = fx.bind(top, b"x", Value::small_int(1).unwrap());
        let by = fx.bind(inner, b"y", Value::small_int(2).unwrap());

        let x = Value::small_sym(b"x").unwrap();
        let y = Value::small_sym(b"y").unwrap();
        assert_eq!(lookup(&fx.heap, inner, y), Some(by));
        assert_eq!(lookup(&fx.heap, inner, x), Some(bx));
        assert_eq!(lookup(&fx.heap, top, y), None);
        assert_eq!(lookup(&fx.heap, inner, Value::small_sym(b"z").unwrap()), None);
    }

    #[test]
    fn test_shadowing_finds_innermost() {
        let mut fx = Fixture::new();
        let top = fx.env(Value::NIL);
        let inner = fx.env(top);
        fx.bind(top, b"x", Value::small_int(1).unwrap());
        let shadow = fx.bind(inner, b"x", Value::small_int(9).unwrap());

        let x = Value::small_sym(b"x").unwrap();
        assert_eq!(lookup(&fx.heap, inner, x), Some(shadow));
        assert_eq!(lookup_top_frame(&fx.heap, inner, x), Some(shadow));
        assert_eq!(lookup_top_frame(&fx.heap, top, x).is_some(), true);
        assert_ne!(lookup_top_frame(&fx.heap, top, x), Some(shadow));
    }

    #[test]
    fn test_later_binding_shadows_in_same_frame() {
        let mut fx = Fixture::new();
        let top = fx.env(Value::NIL);
        fx.bind(top, b"n", Value::small_int(1).unwrap());
        let newer = fx.bind(top, b"n", Value::small_int(2).unwrap());
        let n = Value::small_sym(b"n").unwrap();
        assert_eq!(lookup(&fx.heap, top, n), Some(newer));
    }
}
