//! The Writer
//!
//! Prints a value graph in external syntax, spending at most a fixed
//! number of nodes so that cyclic or enormous structures cannot exhaust
//! the output. Once the quota runs out a single `...` is emitted and the
//! remaining open lists are closed.
//!
//! Output for the plain data subset (pairs, symbols, strings, integers,
//! booleans, characters, nil) is re-readable. Environment headers and
//! procedures print as bracketed banners.

use crate::error::SchemeError;
use skim_core::{Heap, Hint, Imm, Value};
use std::io::Write;

struct Budget {
    left: usize,
    truncated: bool,
}

impl Budget {
    fn take(&mut self) -> bool {
        if self.left == 0 {
            false
        } else {
            self.left -= 1;
            true
        }
    }

    fn ellipsis(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        if !self.truncated {
            self.truncated = true;
            write!(out, "...")?;
        }
        Ok(())
    }
}

/// Write `v` to `out`, visiting at most `quota` nodes.
pub fn write_value(
    heap: &Heap,
    v: Value,
    out: &mut dyn Write,
    quota: usize,
) -> Result<(), SchemeError> {
    let mut budget = Budget { left: quota, truncated: false };
    emit(heap, v, out, &mut budget)?;
    Ok(())
}

/// A short rendering into a host string, for diagnostics.
pub fn render(heap: &Heap, v: Value, quota: usize) -> String {
    let mut buf = Vec::new();
    let _ = write_value(heap, v, &mut buf, quota);
    String::from_utf8_lossy(&buf).into_owned()
}

fn emit(heap: &Heap, v: Value, out: &mut dyn Write, b: &mut Budget) -> std::io::Result<()> {
    if !b.take() {
        return b.ellipsis(out);
    }
    if v.is_nil() {
        return write!(out, "()");
    }
    match v.immediate() {
        Some(Imm::Bool(true)) => return write!(out, "#T"),
        Some(Imm::Bool(false)) => return write!(out, "#F"),
        Some(Imm::Char(c)) => return emit_char(c, out),
        Some(Imm::Int(n)) => return write!(out, "{n}"),
        Some(Imm::Str(s)) => return emit_string(s.as_bytes(), out),
        Some(Imm::Sym(s)) => return out.write_all(s.as_bytes()),
        None => {}
    }
    if let Some(n) = heap.block_int(v) {
        return write!(out, "{n}");
    }
    if heap.is_string(v) {
        return emit_string(heap.block_text(v).unwrap_or(b""), out);
    }
    if heap.is_symbol(v) {
        return out.write_all(heap.block_text(v).unwrap_or(b""));
    }
    match heap.hint(v) {
        Some(Hint::EnvHeader) => emit_env(heap, v, out, b),
        Some(Hint::ProcHeader) => emit_proc(heap, v, out, b),
        Some(_) => emit_list(heap, v, out, b),
        None => write!(out, "#[unprintable]"),
    }
}

fn emit_char(c: u8, out: &mut dyn Write) -> std::io::Result<()> {
    match c {
        b' ' => write!(out, "#\\space"),
        b'\n' => write!(out, "#\\newline"),
        _ => write!(out, "#\\{}", c as char),
    }
}

fn emit_string(text: &[u8], out: &mut dyn Write) -> std::io::Result<()> {
    out.write_all(b"\"")?;
    for b in text {
        match b {
            b'\n' => out.write_all(b"\\n")?,
            b'\\' => out.write_all(b"\\\\")?,
            b'"' => out.write_all(b"\\\"")?,
            _ => out.write_all(std::slice::from_ref(b))?,
        }
    }
    out.write_all(b"\"")
}

/// List notation, dotted when the final rest is neither nil nor a pair.
/// The caller has already spent one node on the head pair.
fn emit_list(heap: &Heap, v: Value, out: &mut dyn Write, b: &mut Budget) -> std::io::Result<()> {
    write!(out, "(")?;
    emit(heap, heap.first(v).unwrap_or(Value::NIL), out, b)?;
    let mut cur = heap.rest(v).unwrap_or(Value::NIL);
    loop {
        if cur.is_nil() {
            break;
        }
        if heap.is_ordinary_pair(cur) {
            if !b.take() {
                write!(out, " ")?;
                b.ellipsis(out)?;
                break;
            }
            write!(out, " ")?;
            emit(heap, heap.first(cur).unwrap_or(Value::NIL), out, b)?;
            cur = heap.rest(cur).unwrap_or(Value::NIL);
        } else {
            write!(out, " . ")?;
            emit(heap, cur, out, b)?;
            break;
        }
    }
    write!(out, ")")
}

fn emit_env(heap: &Heap, v: Value, out: &mut dyn Write, b: &mut Budget) -> std::io::Result<()> {
    write!(out, "#[env")?;
    let mut frame = heap.rest(v).unwrap_or(Value::NIL);
    while heap.is_ordinary_pair(frame) {
        if !b.take() {
            write!(out, " ")?;
            b.ellipsis(out)?;
            break;
        }
        write!(out, " ")?;
        emit(heap, heap.first(frame).unwrap_or(Value::NIL), out, b)?;
        frame = heap.rest(frame).unwrap_or(Value::NIL);
    }
    write!(out, "]")
}

fn emit_proc(heap: &Heap, v: Value, out: &mut dyn Write, b: &mut Budget) -> std::io::Result<()> {
    let head = heap.first(v).unwrap_or(Value::NIL);
    let tail = heap.rest(v).unwrap_or(Value::NIL);
    if tail.is_nil() {
        write!(out, "#[builtin ")?;
        emit(heap, head, out, b)?;
        return write!(out, "]");
    }
    // Compound: head is the lambda expression; show its parameter list.
    let params = heap
        .rest(head)
        .and_then(|r| heap.first(r))
        .unwrap_or(Value::NIL);
    write!(out, "#[lambda ")?;
    emit(heap, params, out, b)?;
    write!(out, "]")
}

// =============================================================================
// Tests
// =============================================================================
