//! The Interpreter
//!
//! One value owning every process-wide singleton the engine needs: heap,
//! pointer and label stacks, registers, and the reserved-symbol table.
//! Boot pins two roots, the starting environment and the keyword anchor
//! list; everything else flows through the read-eval-print loop.
//!
//! The loop is also the recovery point: a recoverable error resets both
//! stacks, reinitializes the registers, runs a full collection, prints a
//! diagnostic, and resumes reading.

use crate::config::Config;
use crate::env;
use crate::error::SchemeError;
use crate::machine::Label;
use crate::reader::{ReadOutcome, Reader};
use crate::symbols::SymbolTable;
use crate::writer;
use skim_core::{gc, Heap, Hint, LabelStack, PointerStack, Registers, Roots, Value};
use std::io::{Read, Write};

pub struct Interp {
    pub heap: Heap,
    pub stack: PointerStack,
    pub labels: LabelStack,
    pub regs: Registers,
    pub syms: SymbolTable,
    pub config: Config,
    pub syntax_check: bool,
    pub(crate) cont: Label,
    global_env: Value,
}

impl Interp {
    pub fn new(config: Config) -> Result<Self, SchemeError> {
        let mut heap = Heap::new(config.pair_cells, config.block_bytes);
        let mut stack = PointerStack::new(config.stack_slots);
        let labels = LabelStack::new(config.label_slots);
        let regs = Registers::new();

        // The starting environment is the first pinned root.
        let global_env = heap.alloc_pair(
            Value::NIL,
            Value::NIL,
            Roots { stack: &stack, regs: &regs },
        )?;
        heap.promote(global_env, Hint::EnvHeader);
        stack.pin(global_env)?;

        // The reserved keywords are interned once and anchored second.
        let (syms, anchor) = SymbolTable::boot(&mut heap, &mut stack, &regs)?;
        stack.pin(anchor)?;

        tracing::debug!(
            pair_cells = config.pair_cells,
            block_bytes = config.block_bytes,
            "interpreter booted"
        );

        Ok(Interp {
            heap,
            stack,
            labels,
            regs,
            syms,
            syntax_check: config.syntax_check,
            config,
            cont: Label::Done,
            global_env,
        })
    }

    pub fn global_env(&self) -> Value {
        self.global_env
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Read-eval-print every datum in `src`, writing results and
    /// diagnostics to `out`. Returns when the stream is exhausted; only
    /// unrecoverable errors propagate.
    pub fn run(&mut self, src: &mut dyn Read, out: &mut dyn Write) -> Result<(), SchemeError> {
        let mut reader = Reader::new();
        loop {
            self.reset_machine();
            match reader.read_one(self, src) {
                Ok(ReadOutcome::Eof) => return Ok(()),
                Ok(ReadOutcome::Datum(v)) => {
                    self.regs.exp = v;
                    self.regs.env = self.global_env;
                    let outcome = self
                        .eval_loaded(out)
                        .and_then(|val| self.finish_top_level(val, out));
                    match outcome {
                        Ok(()) => {}
                        Err(e) if e.recoverable() => {
                            let context = self.describe(self.regs.exp);
                            self.recover();
                            report(&e, Some(&context), out)?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.recoverable() => {
                    // The reader already resynchronized past the next
                    // blank line.
                    report(&e, None, out)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Evaluate every datum in `text` and return the last value. Errors
    /// propagate instead of being caught; this is the test surface.
    pub fn eval_source(&mut self, text: &str, out: &mut dyn Write) -> Result<Value, SchemeError> {
        let mut src = text.as_bytes();
        let mut reader = Reader::new();
        let mut last = Value::NIL;
        loop {
            self.reset_machine();
            match reader.read_one(self, &mut src)? {
                ReadOutcome::Eof => return Ok(last),
                ReadOutcome::Datum(v) => {
                    self.regs.exp = v;
                    self.regs.env = self.global_env;
                    last = self.eval_loaded(out)?;
                    self.regs.val = last;
                    self.bind_last_result()?;
                }
            }
        }
    }

    /// Rebind `!!` and print the top-level result.
    fn finish_top_level(&mut self, val: Value, out: &mut dyn Write) -> Result<(), SchemeError> {
        self.regs.val = val;
        self.bind_last_result()?;
        writer::write_value(&self.heap, val, out, self.config.write_quota)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn reset_machine(&mut self) {
        self.stack.clear();
        self.labels.clear();
        self.regs.reset();
    }

    /// The recovery sequence: stacks emptied, registers reinitialized,
    /// then a full collection to drop whatever the abandoned evaluation
    /// was holding.
    fn recover(&mut self) {
        self.reset_machine();
        self.collect_now();
    }

    /// Rebind `!!` in the starting environment to the value in `val`.
    fn bind_last_result(&mut self) -> Result<(), SchemeError> {
        let sym = Value::small_sym(b"!!").expect("!! inlines");
        match env::lookup_top_frame(&self.heap, self.global_env, sym) {
            Some(binding) => self.heap.set_rest(binding, self.regs.val),
            None => {
                let binding = self.alloc_pair2(sym, self.regs.val)?;
                self.stack.push(binding)?;
                let frame = self.cdr(self.global_env);
                let extended = self.alloc_pair2(self.stack.peek(0)?, frame)?;
                self.heap.set_rest(self.global_env, extended);
                self.stack.pop()?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Rooted allocation helpers
    // =========================================================================

    /// Allocate a pair with the machine's root set in effect. Arguments
    /// that reference the heap must already be reachable.
    pub(crate) fn alloc_pair2(&mut self, first: Value, rest: Value) -> Result<Value, SchemeError> {
        Ok(self.heap.alloc_pair(
            first,
            rest,
            Roots { stack: &self.stack, regs: &self.regs },
        )?)
    }

    /// Replace the top two stack slots [a, b] with (a . b).
    pub(crate) fn cons_top(&mut self) -> Result<(), SchemeError> {
        let cell = self.alloc_pair2(self.stack.peek(1)?, self.stack.peek(0)?)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(cell)?;
        Ok(())
    }

    pub(crate) fn make_int(&mut self, n: i64) -> Result<Value, SchemeError> {
        Ok(self
            .heap
            .make_int(n, Roots { stack: &self.stack, regs: &self.regs })?)
    }

    pub(crate) fn make_string(&mut self, text: &[u8]) -> Result<Value, SchemeError> {
        Ok(self
            .heap
            .make_string(text, Roots { stack: &self.stack, regs: &self.regs })?)
    }

    pub(crate) fn intern_symbol(&mut self, text: &[u8]) -> Result<Value, SchemeError> {
        let Interp { heap, stack, regs, syms, .. } = self;
        syms.intern(heap, Roots { stack, regs }, text)
    }

    pub(crate) fn collect_now(&mut self) {
        gc::collect(
            &mut self.heap,
            Roots { stack: &self.stack, regs: &self.regs },
        );
    }

    /// A short rendering for diagnostics.
    pub(crate) fn describe(&self, v: Value) -> String {
        writer::render(&self.heap, v, 24)
    }
}

fn report(
    e: &SchemeError,
    context: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), SchemeError> {
    writeln!(out, ";; error ({}): {}", e.kind(), e)?;
    if let Some(form) = context {
        writeln!(out, ";; in: {form}")?;
    }
    Ok(())
}
