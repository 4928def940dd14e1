//! End-to-end behavior of the interpreter through the public surface:
//! feed source text to the read-eval-print loop, inspect what it prints.

use skim::{Config, Interp};
use std::io::Write;

/// Run a full REPL session over `input`, returning everything printed.
fn session(input: &str) -> String {
    let mut interp = Interp::new(Config::default()).expect("boot");
    let mut out = Vec::new();
    let mut src = input.as_bytes();
    interp.run(&mut src, &mut out).expect("session");
    String::from_utf8_lossy(&out).into_owned()
}

/// The rendering of the last top-level result.
fn last_line(input: &str) -> String {
    let text = session(input);
    text.lines().last().unwrap_or("").to_string()
}

#[test]
fn test_scenario_addition() {
    assert_eq!(session("(+ 1 2 3 4)"), "10\n");
}

#[test]
fn test_scenario_factorial() {
    assert_eq!(
        last_line("(define (fact n) (if (< n 2) 1 (* n (fact (- n 1))))) (fact 6)"),
        "720"
    );
}

#[test]
fn test_scenario_let() {
    assert_eq!(session("(let ((x 10) (y 20)) (+ x y))"), "30\n");
}

#[test]
fn test_scenario_rest_parameter() {
    assert_eq!(session("((lambda x x) 1 2 3)"), "(1 2 3)\n");
}

#[test]
fn test_scenario_cond() {
    assert_eq!(
        session("(cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c))"),
        "b\n"
    );
}

#[test]
fn test_scenario_cyclic_pair() {
    let text = session("(define p (cons 1 2)) (set-cdr! p p) (pair? p)");
    assert_eq!(text.lines().last(), Some("#T"));
    // The writer must terminate on the cycle by virtue of the node quota.
    let written = session("(define p (cons 1 2)) (set-cdr! p p) (write p)");
    assert!(written.contains("..."));
    assert!(written.len() < 4096);
}

#[test]
fn test_deep_recursion_completes() {
    assert_eq!(
        last_line("(define (loop n) (if (= n 0) 'done (loop (- n 1)))) (loop 100000)"),
        "done"
    );
}

#[test]
fn test_evaluation_order_and_short_circuit() {
    assert_eq!(
        last_line(
            "(define r '()) \
             (define (obs x) (set! r (cons x r)) x) \
             (if (and (obs 1) (obs 2)) 'both 'neither) \
             r"
        ),
        "(2 1)"
    );
    // No error surfaces from the unevaluated operand.
    assert_eq!(session("(and #f (error \"x\"))"), "#F\n");
    assert_eq!(session("(or 'ok (error \"x\"))"), "ok\n");
}

#[test]
fn test_reserved_symbol_identity() {
    for spelling in ["car", "cadddr", "lambda", "+", "set-car!"] {
        assert_eq!(
            session(&format!("(eq? (quote {spelling}) (quote {spelling}))")),
            "#T\n",
            "{spelling} lost its identity"
        );
    }
}

#[test]
fn test_error_recovery_continues_session() {
    let text = session("(+ 1 unbound-here)\n(+ 2 3)");
    assert!(text.contains(";; error (unbound)"));
    assert!(text.lines().last().unwrap() == "5");
}

#[test]
fn test_reader_error_recovery_continues_session() {
    let text = session("#true oops\n\n(+ 2 2)");
    assert!(text.contains(";; error (syntax)"));
    assert_eq!(text.lines().last(), Some("4"));
}

#[test]
fn test_last_result_binding() {
    assert_eq!(last_line("(* 6 7) (+ !! 1)"), "43");
}

#[test]
fn test_write_round_trip() {
    // Print a value, feed the printed form back in, print again: the two
    // renderings must agree on the re-readable subset.
    let samples = [
        "()",
        "#T",
        "#F",
        "#\\a",
        "#\\space",
        "-12345",
        "98765432109876",
        "\"a string with \\\"quotes\\\" and \\\\slashes\\\\\"",
        "a-symbol",
        "(1 2 3)",
        "(1 (2 (3 (4))) . 5)",
        "(a . b)",
    ];
    for sample in samples {
        let printed = session(&format!("(quote {sample})"));
        let reprinted = session(&format!("(quote {})", printed.trim_end()));
        assert_eq!(printed, reprinted, "round trip diverged for {sample}");
    }
}

#[test]
fn test_deep_structure_round_trip() {
    // Quota must exceed the node count for a faithful deep print.
    let config = Config { write_quota: 10_000, ..Config::default() };
    let mut interp = Interp::new(config).unwrap();
    let mut out = Vec::new();
    let depth = 500;
    let literal = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
    let src_text = format!("(quote {literal})");
    let mut src = src_text.as_bytes();
    interp.run(&mut src, &mut out).unwrap();
    let printed = String::from_utf8_lossy(&out);
    assert_eq!(printed.trim_end(), literal);
}

#[test]
fn test_gcstat_shape() {
    let text = session("(gcstat)");
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .expect("gcstat prints a list");
    let fields: Vec<&str> = inner.split_whitespace().collect();
    assert_eq!(fields.len(), 4);
    for field in fields {
        field.parse::<i64>().expect("gcstat fields are integers");
    }
}

#[test]
fn test_gcstatwrite_and_forced_collection() {
    let text = session("(garbagecollect) (gcstatwrite)");
    assert!(text.contains(";; gc: collections"));
    assert!(text.contains(";; gc: free pair cells"));
}

#[test]
fn test_file_driver() {
    // Mirrors the CLI flow: evaluate a file to completion, then more
    // input from a second stream, against the same interpreter state.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "(define (double n) (* n 2))").unwrap();
    writeln!(file, "(define base 21)").unwrap();
    file.flush().unwrap();

    let mut interp = Interp::new(Config::default()).unwrap();
    let mut out = Vec::new();
    let mut src = std::fs::File::open(file.path()).unwrap();
    interp.run(&mut src, &mut out).unwrap();

    let mut stdin_like = "(double base)".as_bytes();
    interp.run(&mut stdin_like, &mut out).unwrap();
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.lines().last(), Some("42"));
}

#[test]
fn test_small_heap_still_runs() {
    let config = Config {
        pair_cells: 2048,
        block_bytes: 16 * 1024,
        stack_slots: 512,
        label_slots: 1024,
        ..Config::default()
    };
    let mut interp = Interp::new(config).unwrap();
    let mut out = Vec::new();
    let mut src = "(define (count n) (if (= n 0) '() (cons n (count (- n 1))))) \
                   (length (count 50)) (count 5)"
        .as_bytes();
    interp.run(&mut src, &mut out).unwrap();
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.lines().last(), Some("(5 4 3 2 1)"));
}

#[test]
fn test_resource_exhaustion_recovers() {
    // A heap too small for the structure: the error is caught, the
    // session keeps going.
    let config = Config {
        pair_cells: 256,
        block_bytes: 8 * 1024,
        ..Config::default()
    };
    let mut interp = Interp::new(config).unwrap();
    let mut out = Vec::new();
    let mut src =
        "(define (grow n) (if (= n 0) '() (cons n (grow (- n 1))))) (grow 500) (+ 1 1)"
            .as_bytes();
    interp.run(&mut src, &mut out).unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains(";; error (resource)"));
    assert_eq!(text.lines().last(), Some("2"));
}
