//! Built-in Procedures
//!
//! Dispatch is by reserved-symbol spelling: `micro-apply` hands over the
//! keyword of the built-in cell and the evaluated arguments sit in
//! `argl`. Composed accessors (`cadr` through `cddddr`) are driven by
//! their spelling, each step a plain `car` or `cdr`.
//!
//! Arithmetic wraps in two's complement; only the reader checks literal
//! overflow. Division rounds toward negative infinity and refuses a zero
//! divisor. Comparisons chain over adjacent pairs.

use crate::error::SchemeError;
use crate::interp::Interp;
use crate::writer;
use skim_core::Value;
use std::io::Write;

pub(crate) fn apply(
    it: &mut Interp,
    name: &'static str,
    out: &mut dyn Write,
) -> Result<Value, SchemeError> {
    match name {
        "cons" => {
            let [a, d] = expect_args(it, name)?;
            it.alloc_pair2(a, d)
        }
        "set-car!" => {
            let [p, v] = expect_args(it, name)?;
            let p = expect_pair(it, name, p)?;
            it.heap.set_first(p, v);
            Ok(p)
        }
        "set-cdr!" => {
            let [p, v] = expect_args(it, name)?;
            let p = expect_pair(it, name, p)?;
            it.heap.set_rest(p, v);
            Ok(p)
        }
        "+" => fold_arith(it, name, 0, |acc, n| acc.wrapping_add(n)),
        "*" => fold_arith(it, name, 1, |acc, n| acc.wrapping_mul(n)),
        "-" => {
            let argv = int_args(it, name, 1)?;
            if argv.len() == 1 {
                return it.make_int(argv[0].wrapping_neg());
            }
            it.make_int(argv[1..].iter().fold(argv[0], |acc, n| acc.wrapping_sub(*n)))
        }
        "/" => {
            let argv = int_args(it, name, 1)?;
            let (mut acc, divisors) = if argv.len() == 1 {
                (1, &argv[..])
            } else {
                (argv[0], &argv[1..])
            };
            for d in divisors {
                acc = floor_div(acc, *d)
                    .ok_or_else(|| SchemeError::ArityType("/: division by zero".into()))?;
            }
            it.make_int(acc)
        }
        "<" => chain_compare(it, name, |a, b| a < b),
        "<=" => chain_compare(it, name, |a, b| a <= b),
        "=" => chain_compare(it, name, |a, b| a == b),
        ">" => chain_compare(it, name, |a, b| a > b),
        ">=" => chain_compare(it, name, |a, b| a >= b),
        "not" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(v == Value::FALSE))
        }
        "null?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(v.is_nil()))
        }
        "pair?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(it.heap.is_ordinary_pair(v)))
        }
        "list?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(v.is_nil() || it.proper_list_len(v).is_some()))
        }
        "integer?" | "number?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(it.heap.is_integer(v)))
        }
        "symbol?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(it.heap.is_symbol(v)))
        }
        "string?" => {
            let [v] = expect_args(it, name)?;
            Ok(Value::boolean(it.heap.is_string(v)))
        }
        "odd?" => {
            let argv = int_args(it, name, 1)?;
            one_int(name, &argv).map(|n| Value::boolean(n & 1 != 0))
        }
        "even?" => {
            let argv = int_args(it, name, 1)?;
            one_int(name, &argv).map(|n| Value::boolean(n & 1 == 0))
        }
        "eq?" => {
            let [a, b] = expect_args(it, name)?;
            Ok(Value::boolean(it.heap.values_eq(a, b)))
        }
        "list" => Ok(it.regs.argl),
        "length" => {
            let [v] = expect_args(it, name)?;
            let n = if v.is_nil() {
                0
            } else {
                it.proper_list_len(v).ok_or_else(|| {
                    SchemeError::ArityType("length: not a proper list".into())
                })?
            };
            it.make_int(n as i64)
        }
        "write" => {
            let [v] = expect_args(it, name)?;
            writer::write_value(&it.heap, v, out, it.config.write_quota)?;
            Ok(v)
        }
        "newline" => {
            let [] = expect_args(it, name)?;
            out.write_all(b"\n")?;
            Ok(Value::NIL)
        }
        "read" => Err(SchemeError::User(
            "read: not connected to an input source".into(),
        )),
        "error" => {
            let argv = collect_args(it);
            let message = match argv.as_slice() {
                [] => "error".to_string(),
                [v] => match it.heap.text_of(*v) {
                    Some(text) if it.heap.is_string(*v) => {
                        format!("error: {}", String::from_utf8_lossy(&text))
                    }
                    _ => format!("error: {}", it.describe(*v)),
                },
                _ => {
                    return Err(SchemeError::ArityType(
                        "error takes at most one operand".into(),
                    ));
                }
            };
            Err(SchemeError::User(message))
        }
        "gcstat" => gcstat_list(it),
        "gcstatwrite" => {
            let [] = expect_args(it, name)?;
            write_gc_stats(it, out)?;
            Ok(Value::NIL)
        }
        "garbagecollect" => {
            let [] = expect_args(it, name)?;
            it.collect_now();
            Ok(Value::NIL)
        }
        "synchecktoggle" => {
            let [] = expect_args(it, name)?;
            it.syntax_check = !it.syntax_check;
            Ok(Value::boolean(it.syntax_check))
        }
        n if is_cxr(n) => {
            let [v] = expect_args(it, name)?;
            apply_cxr(it, n, v)
        }
        other => Err(SchemeError::Unapplicable(format!(
            "{other} is a special form, not a procedure"
        ))),
    }
}

// =============================================================================
// Argument plumbing
// =============================================================================

/// Copy the argument list into a host vector. The values stay rooted
/// through `argl` for the whole call.
fn collect_args(it: &Interp) -> Vec<Value> {
    let mut argv = Vec::new();
    let mut cur = it.regs.argl;
    while it.heap.is_ordinary_pair(cur) {
        argv.push(it.car(cur));
        cur = it.cdr(cur);
    }
    argv
}

fn expect_args<const N: usize>(
    it: &Interp,
    name: &'static str,
) -> Result<[Value; N], SchemeError> {
    let argv = collect_args(it);
    argv.try_into().map_err(|argv: Vec<Value>| {
        SchemeError::ArityType(format!(
            "{name} takes {N} argument{}, got {}",
            if N == 1 { "" } else { "s" },
            argv.len()
        ))
    })
}

fn expect_pair(it: &Interp, name: &'static str, v: Value) -> Result<Value, SchemeError> {
    if it.heap.is_ordinary_pair(v) {
        Ok(v)
    } else {
        Err(SchemeError::ArityType(format!(
            "{name}: expected a pair, got {}",
            it.describe(v)
        )))
    }
}

fn int_args(it: &Interp, name: &'static str, min: usize) -> Result<Vec<i64>, SchemeError> {
    let argv = collect_args(it);
    if argv.len() < min {
        return Err(SchemeError::ArityType(format!(
            "{name} needs at least {min} argument{}",
            if min == 1 { "" } else { "s" }
        )));
    }
    argv.iter()
        .map(|v| {
            it.heap.int_value(*v).ok_or_else(|| {
                SchemeError::ArityType(format!(
                    "{name}: expected an integer, got {}",
                    it.describe(*v)
                ))
            })
        })
        .collect()
}

fn one_int(name: &'static str, argv: &[i64]) -> Result<i64, SchemeError> {
    match argv {
        [n] => Ok(*n),
        _ => Err(SchemeError::ArityType(format!(
            "{name} takes 1 argument, got {}",
            argv.len()
        ))),
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

fn fold_arith(
    it: &mut Interp,
    name: &'static str,
    unit: i64,
    op: impl Fn(i64, i64) -> i64,
) -> Result<Value, SchemeError> {
    let argv = int_args(it, name, 0)?;
    it.make_int(argv.into_iter().fold(unit, op))
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        Some(q.wrapping_sub(1))
    } else {
        Some(q)
    }
}

fn chain_compare(
    it: &mut Interp,
    name: &'static str,
    rel: impl Fn(i64, i64) -> bool,
) -> Result<Value, SchemeError> {
    let argv = int_args(it, name, 2)?;
    Ok(Value::boolean(argv.windows(2).all(|w| rel(w[0], w[1]))))
}

// =============================================================================
// Composed accessors
// =============================================================================

fn is_cxr(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 3
        && bytes.len() <= 6
        && bytes[0] == b'c'
        && bytes[bytes.len() - 1] == b'r'
        && bytes[1..bytes.len() - 1].iter().all(|b| matches!(b, b'a' | b'd'))
}

/// `cadr` is (car (cdr x)): apply the path right to left.
fn apply_cxr(it: &Interp, name: &'static str, v: Value) -> Result<Value, SchemeError> {
    let path = &name.as_bytes()[1..name.len() - 1];
    let mut cur = v;
    for step in path.iter().rev() {
        if !it.heap.is_ordinary_pair(cur) {
            return Err(SchemeError::ArityType(format!(
                "{name}: expected a pair, got {}",
                it.describe(cur)
            )));
        }
        cur = match step {
            b'a' => it.car(cur),
            _ => it.cdr(cur),
        };
    }
    Ok(cur)
}

// =============================================================================
// Diagnostics
// =============================================================================

/// (cbox-free storage-free stack-free label-stack-free)
fn gcstat_list(it: &mut Interp) -> Result<Value, SchemeError> {
    let counts = [
        it.heap.free_pairs() as i64,
        it.heap.free_block_words() as i64,
        it.stack.free_slots() as i64,
        it.labels.free_slots() as i64,
    ];
    it.stack.push(Value::NIL)?;
    for n in counts.into_iter().rev() {
        let v = it.make_int(n)?;
        self_cons(it, v)?;
    }
    Ok(it.stack.pop()?)
}

/// Stack holds [tail]; replace it with (v . tail), keeping everything
/// rooted across the allocation.
fn self_cons(it: &mut Interp, v: Value) -> Result<(), SchemeError> {
    it.stack.push(v)?;
    let cell = it.alloc_pair2(it.stack.peek(0)?, it.stack.peek(1)?)?;
    it.stack.pop()?;
    it.stack.pop()?;
    it.stack.push(cell)?;
    Ok(())
}

fn write_gc_stats(it: &Interp, out: &mut dyn Write) -> Result<(), SchemeError> {
    writeln!(out, ";; gc: collections      {}", it.heap.stats.collections)?;
    writeln!(out, ";; gc: free pair cells  {}", it.heap.free_pairs())?;
    writeln!(out, ";; gc: free block words {}", it.heap.free_block_words())?;
    writeln!(out, ";; gc: stack free       {}", it.stack.free_slots())?;
    writeln!(out, ";; gc: label free       {}", it.labels.free_slots())?;
    writeln!(
        out,
        ";; gc: last sweep freed {} pairs, {} block bytes",
        it.heap.stats.last_pairs_freed, it.heap.stats.last_block_bytes_freed
    )?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn ev(src: &str) -> String {
        let mut it = Interp::new(Config::default()).unwrap();
        let mut out = Vec::new();
        let v = it.eval_source(src, &mut out).unwrap();
        writer::render(&it.heap, v, 1000)
    }

    fn ev_err(src: &str) -> SchemeError {
        let mut it = Interp::new(Config::default()).unwrap();
        let mut out = Vec::new();
        it.eval_source(src, &mut out).unwrap_err()
    }

    #[test]
    fn test_pair_primitives() {
        assert_eq!(ev("(cons 1 2)"), "(1 . 2)");
        assert_eq!(ev("(car (cons 1 2))"), "1");
        assert_eq!(ev("(cdr (cons 1 2))"), "2");
        assert_eq!(ev("(define p (cons 1 2)) (set-car! p 9) p"), "(9 . 2)");
        assert_eq!(ev("(define p (cons 1 2)) (set-cdr! p '(3)) p"), "(1 3)");
        assert!(matches!(ev_err("(car 5)"), SchemeError::ArityType(_)));
        assert!(matches!(ev_err("(cdr '())"), SchemeError::ArityType(_)));
        assert!(matches!(ev_err("(cons 1)"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_composed_accessors() {
        assert_eq!(ev("(cadr '(1 2 3))"), "2");
        assert_eq!(ev("(caddr '(1 2 3))"), "3");
        assert_eq!(ev("(caar '((1 2) 3))"), "1");
        assert_eq!(ev("(cdadr '(1 (2 3) 4))"), "(3)");
        assert_eq!(ev("(cddddr '(1 2 3 4 5 6))"), "(5 6)");
        assert_eq!(ev("(cadddr '(1 2 3 4))"), "4");
        assert!(matches!(ev_err("(cadr '(1))"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(ev("(+)"), "0");
        assert_eq!(ev("(*)"), "1");
        assert_eq!(ev("(+ 1 2 3 4)"), "10");
        assert_eq!(ev("(* 2 3 4)"), "24");
        assert_eq!(ev("(- 10 3 2)"), "5");
        assert_eq!(ev("(- 5)"), "-5");
        assert_eq!(ev("(+ 30000 30000)"), "60000");
        assert_eq!(ev("(* 100000 100000)"), "10000000000");
        assert!(matches!(ev_err("(-)"), SchemeError::ArityType(_)));
        assert!(matches!(ev_err("(+ 1 'a)"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_division_floors_toward_negative_infinity() {
        assert_eq!(ev("(/ 7 2)"), "3");
        assert_eq!(ev("(/ -7 2)"), "-4");
        assert_eq!(ev("(/ 7 -2)"), "-4");
        assert_eq!(ev("(/ -7 -2)"), "3");
        assert_eq!(ev("(/ 6 2)"), "3");
        assert_eq!(ev("(/ 100 5 2)"), "10");
        assert_eq!(ev("(/ 3)"), "0");
        assert_eq!(ev("(/ 1)"), "1");
        assert!(matches!(ev_err("(/ 1 0)"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_comparisons_chain() {
        assert_eq!(ev("(< 1 2 3)"), "#T");
        assert_eq!(ev("(< 1 3 2)"), "#F");
        assert_eq!(ev("(<= 1 1 2)"), "#T");
        assert_eq!(ev("(= 4 4 4)"), "#T");
        assert_eq!(ev("(= 4 5)"), "#F");
        assert_eq!(ev("(> 3 2 1)"), "#T");
        assert_eq!(ev("(>= 3 3 1)"), "#T");
        assert!(matches!(ev_err("(< 1)"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_predicates() {
        assert_eq!(ev("(null? '())"), "#T");
        assert_eq!(ev("(null? '(1))"), "#F");
        assert_eq!(ev("(pair? '(1))"), "#T");
        assert_eq!(ev("(pair? 1)"), "#F");
        assert_eq!(ev("(pair? '())"), "#F");
        assert_eq!(ev("(list? '(1 2))"), "#T");
        assert_eq!(ev("(list? '())"), "#T");
        assert_eq!(ev("(list? (cons 1 2))"), "#F");
        assert_eq!(ev("(integer? 3)"), "#T");
        assert_eq!(ev("(number? 5000000000)"), "#T");
        assert_eq!(ev("(integer? 'x)"), "#F");
        assert_eq!(ev("(symbol? 'x)"), "#T");
        assert_eq!(ev("(symbol? \"x\")"), "#F");
        assert_eq!(ev("(string? \"x\")"), "#T");
        assert_eq!(ev("(odd? 3)"), "#T");
        assert_eq!(ev("(odd? -3)"), "#T");
        assert_eq!(ev("(even? 4)"), "#T");
        assert_eq!(ev("(even? -4)"), "#T");
        assert_eq!(ev("(not #f)"), "#T");
        assert_eq!(ev("(not 0)"), "#F");
    }

    #[test]
    fn test_cyclic_list_predicates_terminate() {
        assert_eq!(ev("(define p (cons 1 2)) (set-cdr! p p) (list? p)"), "#F");
        assert!(matches!(
            ev_err("(define p (cons 1 2)) (set-cdr! p p) (length p)"),
            SchemeError::ArityType(_)
        ));
    }

    #[test]
    fn test_eq() {
        assert_eq!(ev("(eq? 'a 'a)"), "#T");
        assert_eq!(ev("(eq? 'a 'b)"), "#F");
        assert_eq!(ev("(eq? 7 7)"), "#T");
        assert_eq!(ev("(eq? \"abcd\" \"abcd\")"), "#T");
        assert_eq!(ev("(eq? \"abcd\" 'abcd)"), "#F");
        assert_eq!(ev("(eq? '(1) '(1))"), "#F");
        assert_eq!(ev("(define l '(1)) (eq? l l)"), "#T");
        assert_eq!(ev("(eq? 5000000000 5000000000)"), "#T");
    }

    #[test]
    fn test_list_and_length() {
        assert_eq!(ev("(list)"), "()");
        assert_eq!(ev("(list 1 2 3)"), "(1 2 3)");
        assert_eq!(ev("(length '())"), "0");
        assert_eq!(ev("(length '(1 2 3))"), "3");
        assert!(matches!(ev_err("(length (cons 1 2))"), SchemeError::ArityType(_)));
    }

    #[test]
    fn test_error_and_read() {
        match ev_err("(error \"boom\")") {
            SchemeError::User(msg) => assert_eq!(msg, "error: boom"),
            other => panic!("expected user error, got {other:?}"),
        }
        assert!(matches!(ev_err("(error)"), SchemeError::User(_)));
        assert!(matches!(ev_err("(read)"), SchemeError::User(_)));
    }

    #[test]
    fn test_gc_builtins() {
        assert_eq!(ev("(length (gcstat))"), "4");
        assert_eq!(ev("(garbagecollect)"), "()");
        // A forced collection bumps the counter, visible in gcstat output
        // only indirectly; just make sure state survives.
        assert_eq!(ev("(define keep '(a b)) (garbagecollect) keep"), "(a b)");
    }
}
