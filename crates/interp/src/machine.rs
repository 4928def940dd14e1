//! The Explicit-Control Evaluator
//!
//! A state machine over a one-byte continuation register. Every state may
//! push and pop labels and pointers, mutate the six registers, and hand
//! control back to the dispatch loop; recursion in the interpreted
//! language therefore never grows the host stack, and every live
//! intermediate sits in a register or on the pointer stack where the
//! collector can see it.
//!
//! ## Conventions
//!
//! - A state that produces a value puts it in `val` and pops its
//!   continuation from the label stack into `cont`.
//! - A state that evaluates a subexpression saves whatever it needs on
//!   the pointer stack, pushes its resumption label, sets `exp`, and
//!   jumps to `Start`. The matching `Did*` state pops in reverse order.
//! - Tail positions jump to `Start` without pushing anything, which is
//!   all the tail-call behavior the machine provides.
//! - Arguments are pushed on the pointer stack as they are evaluated,
//!   one `Collect` marker on the label stack per argument; `CollectArgs`
//!   drains the markers and conses `argl` without needing a counter.
//!
//! Errors unwind through `Result` to the read-eval-print loop, which is
//! the recovery point.

use crate::builtins;
use crate::env;
use crate::error::SchemeError;
use crate::interp::Interp;
use crate::symbols::SymbolTable;
use crate::writer;
use skim_core::{Hint, Value};
use std::io::Write;

/// Evaluator states. The discriminant is the opcode stored on the label
/// stack.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Label {
    Start = 0,
    SelfEval,
    Variable,
    Quoted,
    Define,
    DidDefine,
    SetBang,
    DidSet,
    If,
    Cond,
    Conditional,
    DidTest,
    And,
    AndLoop,
    DidAnd,
    Or,
    OrLoop,
    DidOr,
    Lambda,
    Let,
    Application,
    DidOperator,
    OperandLoop,
    DidOperand,
    Collect,
    CollectArgs,
    MicroApply,
    Sequence,
    DidSequenceStep,
    Done,
}

const ALL_LABELS: [Label; 30] = [
    Label::Start,
    Label::SelfEval,
    Label::Variable,
    Label::Quoted,
    Label::Define,
    Label::DidDefine,
    Label::SetBang,
    Label::DidSet,
    Label::If,
    Label::Cond,
    Label::Conditional,
    Label::DidTest,
    Label::And,
    Label::AndLoop,
    Label::DidAnd,
    Label::Or,
    Label::OrLoop,
    Label::DidOr,
    Label::Lambda,
    Label::Let,
    Label::Application,
    Label::DidOperator,
    Label::OperandLoop,
    Label::DidOperand,
    Label::Collect,
    Label::CollectArgs,
    Label::MicroApply,
    Label::Sequence,
    Label::DidSequenceStep,
    Label::Done,
];

impl Label {
    pub(crate) fn op(self) -> u8 {
        self as u8
    }

    pub(crate) fn decode(op: u8) -> Result<Label, SchemeError> {
        ALL_LABELS
            .get(op as usize)
            .copied()
            .ok_or_else(|| SchemeError::Fatal(format!("unknown label opcode {op}")))
    }
}

impl Interp {
    /// Run the machine on the expression already loaded into `exp`, in
    /// the environment in `env`. Terminates when control returns to the
    /// `Done` continuation pushed here.
    pub(crate) fn eval_loaded(&mut self, out: &mut dyn Write) -> Result<Value, SchemeError> {
        self.push_label(Label::Done)?;
        self.cont = Label::Start;
        loop {
            match self.cont {
                Label::Start => self.st_start()?,
                Label::SelfEval => self.st_self_eval()?,
                Label::Variable => self.st_variable()?,
                Label::Quoted => self.st_quoted()?,
                Label::Define => self.st_define()?,
                Label::DidDefine => self.st_did_define()?,
                Label::SetBang => self.st_set_bang()?,
                Label::DidSet => self.st_did_set()?,
                Label::If => self.st_if()?,
                Label::Cond => self.st_cond()?,
                Label::Conditional => self.st_conditional()?,
                Label::DidTest => self.st_did_test()?,
                Label::And => self.st_and()?,
                Label::AndLoop => self.st_and_loop()?,
                Label::DidAnd => self.st_did_and()?,
                Label::Or => self.st_or()?,
                Label::OrLoop => self.st_or_loop()?,
                Label::DidOr => self.st_did_or()?,
                Label::Lambda => self.st_lambda()?,
                Label::Let => self.st_let()?,
                Label::Application => self.st_application()?,
                Label::DidOperator => self.st_did_operator()?,
                Label::OperandLoop => self.st_operand_loop()?,
                Label::DidOperand => self.st_did_operand()?,
                Label::CollectArgs => self.st_collect_args()?,
                Label::MicroApply => self.st_micro_apply(out)?,
                Label::Sequence => self.st_sequence()?,
                Label::DidSequenceStep => self.st_did_sequence_step()?,
                Label::Collect => {
                    return Err(SchemeError::Fatal("collect marker dispatched".into()));
                }
                Label::Done => return Ok(self.regs.val),
            }
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// exp = expression, env = environment. Routes to the handling state.
    fn st_start(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        if self.heap.is_ordinary_pair(exp) {
            let op = self.car(exp);
            self.cont = match self.syms.reserved_of(op) {
                Some(name) if SymbolTable::is_special_form(name) => match name {
                    "quote" => Label::Quoted,
                    "define" => Label::Define,
                    "set!" => Label::SetBang,
                    "if" => Label::If,
                    "cond" => Label::Cond,
                    "and" => Label::And,
                    "or" => Label::Or,
                    "lambda" => Label::Lambda,
                    _ => Label::Let,
                },
                _ => Label::Application,
            };
        } else if self.heap.is_symbol(exp) {
            self.cont = Label::Variable;
        } else {
            self.cont = Label::SelfEval;
        }
        Ok(())
    }

    /// Numbers, booleans, characters, strings, nil evaluate to themselves.
    fn st_self_eval(&mut self) -> Result<(), SchemeError> {
        self.regs.val = self.regs.exp;
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// exp = symbol. Reserved symbols fabricate a built-in procedure on
    /// demand; anything else is looked up in the environment chain.
    fn st_variable(&mut self) -> Result<(), SchemeError> {
        let sym = self.regs.exp;
        if self.syms.reserved_of(sym).is_some() {
            let proc = self.alloc_pair2(sym, Value::NIL)?;
            self.heap.promote(proc, Hint::ProcHeader);
            self.regs.val = proc;
        } else {
            match env::lookup(&self.heap, self.regs.env, sym) {
                Some(binding) => self.regs.val = self.cdr(binding),
                None => return Err(SchemeError::Unbound(self.describe(sym))),
            }
        }
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// (quote x)
    fn st_quoted(&mut self) -> Result<(), SchemeError> {
        if self.syntax_check && self.proper_list_len(self.regs.exp) != Some(2) {
            return Err(SchemeError::Syntax("quote takes exactly one operand".into()));
        }
        self.regs.val = self.car(self.cdr(self.regs.exp));
        self.cont = self.pop_label()?;
        Ok(())
    }

    // =========================================================================
    // define / set!
    // =========================================================================

    /// (define name v) or the sugar (define (f . params) body...), which
    /// rewrites to (define f (lambda params body...)). The binding found
    /// in the topmost frame before evaluation is saved so the completion
    /// can detect a competing define of the same name.
    fn st_define(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        let form = self.cdr(exp);
        let target = self.car(form);

        let (name, value_expr) = if self.heap.is_ordinary_pair(target) {
            if self.syntax_check
                && (self.proper_list_len(exp).is_none_or(|n| n < 3)
                    || !self.heap.is_symbol(self.car(target)))
            {
                return Err(SchemeError::Syntax("malformed define".into()));
            }
            let name = self.car(target);
            let params = self.cdr(target);
            if self.syntax_check {
                self.check_params(params)?;
            }
            let body = self.cdr(form);
            // (lambda params . body)
            let tail = self.alloc_pair2(params, body)?;
            self.stack.push(tail)?;
            let lam = self.alloc_pair2(self.syms.value_of("lambda"), self.stack.peek(0)?)?;
            self.stack.pop()?;
            (name, lam)
        } else {
            if self.syntax_check
                && (self.proper_list_len(exp) != Some(3) || !self.heap.is_symbol(target))
            {
                return Err(SchemeError::Syntax("malformed define".into()));
            }
            (target, self.car(self.cdr(form)))
        };

        if self.syms.reserved_of(name).is_some() {
            return Err(SchemeError::Reserved(self.describe(name)));
        }

        let before = env::lookup_top_frame(&self.heap, self.regs.env, name).unwrap_or(Value::NIL);
        self.stack.push(self.regs.env)?;
        self.stack.push(name)?;
        self.stack.push(before)?;
        self.push_label(Label::DidDefine)?;
        self.regs.exp = value_expr;
        self.cont = Label::Start;
        Ok(())
    }

    /// val = evaluated value; stack holds [env, name, pre-binding].
    fn st_did_define(&mut self) -> Result<(), SchemeError> {
        let env_v = self.stack.peek(2)?;
        let name = self.stack.peek(1)?;
        let before = self.stack.peek(0)?;
        let after = env::lookup_top_frame(&self.heap, env_v, name).unwrap_or(Value::NIL);
        if after != before {
            return Err(SchemeError::Syntax(format!(
                "define: binding of {} changed during evaluation",
                self.describe(name)
            )));
        }
        if before.is_nil() {
            let binding = self.alloc_pair2(name, self.regs.val)?;
            self.stack.push(binding)?;
            let frame = self.cdr(env_v);
            let extended = self.alloc_pair2(self.stack.peek(0)?, frame)?;
            self.heap.set_rest(env_v, extended);
            self.stack.pop()?;
        } else {
            self.heap.set_rest(before, self.regs.val);
        }
        self.regs.val = name;
        self.regs.env = env_v;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// (set! name v). The binding must resolve before evaluation and the
    /// same binding must still resolve afterwards.
    fn st_set_bang(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        if self.syntax_check && self.proper_list_len(exp) != Some(3) {
            return Err(SchemeError::Syntax("set! takes a name and a value".into()));
        }
        let name = self.car(self.cdr(exp));
        if self.syms.reserved_of(name).is_some() {
            return Err(SchemeError::Reserved(self.describe(name)));
        }
        if !self.heap.is_symbol(name) {
            return Err(SchemeError::Syntax("set!: name must be a symbol".into()));
        }
        let Some(binding) = env::lookup(&self.heap, self.regs.env, name) else {
            return Err(SchemeError::Unbound(self.describe(name)));
        };
        self.stack.push(self.regs.env)?;
        self.stack.push(name)?;
        self.stack.push(binding)?;
        self.push_label(Label::DidSet)?;
        self.regs.exp = self.car(self.cdr(self.cdr(exp)));
        self.cont = Label::Start;
        Ok(())
    }

    fn st_did_set(&mut self) -> Result<(), SchemeError> {
        let env_v = self.stack.peek(2)?;
        let name = self.stack.peek(1)?;
        let before = self.stack.peek(0)?;
        let after = env::lookup(&self.heap, env_v, name).unwrap_or(Value::NIL);
        if after != before {
            return Err(SchemeError::Syntax(format!(
                "set!: binding of {} changed during evaluation",
                self.describe(name)
            )));
        }
        self.heap.set_rest(before, self.regs.val);
        self.regs.env = env_v;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.cont = self.pop_label()?;
        Ok(())
    }

    // =========================================================================
    // Conditionals
    // =========================================================================

    /// (if c t) or (if c t e), normalized to a clause list for the
    /// conditional loop.
    fn st_if(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        if self.syntax_check && !matches!(self.proper_list_len(exp), Some(3) | Some(4)) {
            return Err(SchemeError::Syntax("if takes two or three operands".into()));
        }
        let ops = self.cdr(exp);
        let test = self.car(ops);
        let conseq = self.car(self.cdr(ops));
        let alt = self.cdr(self.cdr(ops));

        // (test conseq)
        self.stack.push(conseq)?;
        self.stack.push(Value::NIL)?;
        self.cons_top()?;
        let one = self.stack.pop()?;
        self.stack.push(test)?;
        self.stack.push(one)?;
        self.cons_top()?;

        if self.heap.is_ordinary_pair(alt) {
            // (else alternative)
            let alternative = self.car(alt);
            self.stack.push(alternative)?;
            self.stack.push(Value::NIL)?;
            self.cons_top()?;
            let tail = self.stack.pop()?;
            self.stack.push(self.syms.value_of("else"))?;
            self.stack.push(tail)?;
            self.cons_top()?;
            self.stack.push(Value::NIL)?;
            self.cons_top()?;
            self.cons_top()?;
        } else {
            self.stack.push(Value::NIL)?;
            self.cons_top()?;
        }
        self.regs.unev = self.stack.pop()?;
        self.cont = Label::Conditional;
        Ok(())
    }

    /// (cond clause...): the clause list is already in the shape the
    /// conditional loop wants.
    fn st_cond(&mut self) -> Result<(), SchemeError> {
        let clauses = self.cdr(self.regs.exp);
        if self.syntax_check {
            self.check_cond_clauses(clauses)?;
        }
        self.regs.unev = clauses;
        self.cont = Label::Conditional;
        Ok(())
    }

    /// unev = remaining clauses. Heads are tested in textual order; an
    /// `else` head matches unconditionally.
    fn st_conditional(&mut self) -> Result<(), SchemeError> {
        let unev = self.regs.unev;
        if unev.is_nil() {
            return Err(SchemeError::Syntax("conditional without else".into()));
        }
        let clause = self.car(unev);
        let head = self.car(clause);
        if self.syms.reserved_of(head) == Some("else") {
            self.regs.unev = self.cdr(clause);
            self.cont = Label::Sequence;
            return Ok(());
        }
        self.stack.push(self.regs.env)?;
        self.stack.push(unev)?;
        self.push_label(Label::DidTest)?;
        self.regs.exp = head;
        self.cont = Label::Start;
        Ok(())
    }

    /// val = test result; stack holds [env, clauses].
    fn st_did_test(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        if self.regs.val != Value::FALSE {
            let clause = self.car(self.regs.unev);
            self.regs.unev = self.cdr(clause);
            self.cont = Label::Sequence;
        } else {
            self.regs.unev = self.cdr(self.regs.unev);
            self.cont = Label::Conditional;
        }
        Ok(())
    }

    // =========================================================================
    // and / or
    // =========================================================================

    fn st_and(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.cdr(self.regs.exp);
        if self.regs.unev.is_nil() {
            self.regs.val = Value::TRUE;
            self.cont = self.pop_label()?;
        } else {
            self.cont = Label::AndLoop;
        }
        Ok(())
    }

    fn st_and_loop(&mut self) -> Result<(), SchemeError> {
        let unev = self.regs.unev;
        if self.cdr(unev).is_nil() {
            self.regs.exp = self.car(unev);
            self.cont = Label::Start;
            return Ok(());
        }
        self.stack.push(self.regs.env)?;
        self.stack.push(self.cdr(unev))?;
        self.push_label(Label::DidAnd)?;
        self.regs.exp = self.car(unev);
        self.cont = Label::Start;
        Ok(())
    }

    fn st_did_and(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        if self.regs.val == Value::FALSE {
            self.cont = self.pop_label()?;
        } else {
            self.cont = Label::AndLoop;
        }
        Ok(())
    }

    fn st_or(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.cdr(self.regs.exp);
        if self.regs.unev.is_nil() {
            self.regs.val = Value::FALSE;
            self.cont = self.pop_label()?;
        } else {
            self.cont = Label::OrLoop;
        }
        Ok(())
    }

    fn st_or_loop(&mut self) -> Result<(), SchemeError> {
        let unev = self.regs.unev;
        if self.cdr(unev).is_nil() {
            self.regs.exp = self.car(unev);
            self.cont = Label::Start;
            return Ok(());
        }
        self.stack.push(self.regs.env)?;
        self.stack.push(self.cdr(unev))?;
        self.push_label(Label::DidOr)?;
        self.regs.exp = self.car(unev);
        self.cont = Label::Start;
        Ok(())
    }

    fn st_did_or(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        if self.regs.val != Value::FALSE {
            self.cont = self.pop_label()?;
        } else {
            self.cont = Label::OrLoop;
        }
        Ok(())
    }

    // =========================================================================
    // lambda / let
    // =========================================================================

    /// (lambda params body...) captures the current environment.
    fn st_lambda(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        if self.syntax_check {
            if self.proper_list_len(exp).is_none_or(|n| n < 3) {
                return Err(SchemeError::Syntax("lambda needs parameters and a body".into()));
            }
            self.check_params(self.car(self.cdr(exp)))?;
        }
        let proc = self.alloc_pair2(exp, self.regs.env)?;
        self.heap.promote(proc, Hint::ProcHeader);
        self.regs.val = proc;
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// (let ((name v)...) body...) desugars in place to
    /// ((lambda (name...) body...) v...).
    fn st_let(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        let bindings = self.car(self.cdr(exp));
        let body = self.cdr(self.cdr(exp));
        if self.syntax_check {
            self.check_let_form(exp, bindings)?;
        }

        let mut n = 0usize;
        let mut cur = bindings;
        while self.heap.is_ordinary_pair(cur) {
            self.stack.push(self.car(self.car(cur)))?;
            n += 1;
            cur = self.cdr(cur);
        }
        self.stack.push(Value::NIL)?;
        for _ in 0..n {
            self.cons_top()?;
        }
        // [names]
        let mut m = 0usize;
        cur = bindings;
        while self.heap.is_ordinary_pair(cur) {
            self.stack.push(self.car(self.cdr(self.car(cur))))?;
            m += 1;
            cur = self.cdr(cur);
        }
        self.stack.push(Value::NIL)?;
        for _ in 0..m {
            self.cons_top()?;
        }
        // [names, inits]
        let tail = self.alloc_pair2(self.stack.peek(1)?, body)?;
        self.stack.push(tail)?;
        let lam = self.alloc_pair2(self.syms.value_of("lambda"), self.stack.peek(0)?)?;
        self.stack.pop()?;
        self.stack.push(lam)?;
        // [names, inits, lambda-form]
        let form = self.alloc_pair2(self.stack.peek(0)?, self.stack.peek(1)?)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.regs.exp = form;
        self.cont = Label::Application;
        Ok(())
    }

    // =========================================================================
    // Application
    // =========================================================================

    /// exp = (operator operand...). Evaluate the operator first.
    fn st_application(&mut self) -> Result<(), SchemeError> {
        let exp = self.regs.exp;
        self.regs.unev = self.cdr(exp);
        self.stack.push(self.regs.env)?;
        self.stack.push(self.regs.unev)?;
        self.push_label(Label::DidOperator)?;
        self.regs.exp = self.car(exp);
        self.cont = Label::Start;
        Ok(())
    }

    /// val = procedure; stack holds [env, operands]. The procedure parks
    /// on the pointer stack for the duration of argument evaluation.
    fn st_did_operator(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        self.stack.push(self.regs.val)?;
        self.cont = Label::OperandLoop;
        Ok(())
    }

    /// Evaluate operands left to right.
    fn st_operand_loop(&mut self) -> Result<(), SchemeError> {
        let unev = self.regs.unev;
        if unev.is_nil() {
            self.cont = Label::CollectArgs;
            return Ok(());
        }
        if !self.heap.is_ordinary_pair(unev) {
            return Err(SchemeError::Syntax("improper operand list".into()));
        }
        self.regs.exp = self.car(unev);
        self.regs.unev = self.cdr(unev);
        self.stack.push(self.regs.env)?;
        self.stack.push(self.regs.unev)?;
        self.push_label(Label::DidOperand)?;
        self.cont = Label::Start;
        Ok(())
    }

    /// val = evaluated operand; stack holds [env, remaining operands].
    /// The value parks on the pointer stack under a `Collect` marker.
    fn st_did_operand(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        self.stack.push(self.regs.val)?;
        self.push_label(Label::Collect)?;
        self.cont = Label::OperandLoop;
        Ok(())
    }

    /// Pop one parked value per `Collect` marker, consing them in reverse
    /// so `argl` ends up in left-to-right order; then recover the parked
    /// procedure into `fun`.
    fn st_collect_args(&mut self) -> Result<(), SchemeError> {
        self.regs.argl = Value::NIL;
        while self.labels.peek() == Some(Label::Collect.op()) {
            self.labels.pop()?;
            let cell = self.alloc_pair2(self.stack.peek(0)?, self.regs.argl)?;
            self.regs.argl = cell;
            self.stack.pop()?;
        }
        self.regs.fun = self.stack.pop()?;
        self.cont = Label::MicroApply;
        Ok(())
    }

    /// fun = procedure, argl = forward argument list.
    fn st_micro_apply(&mut self, out: &mut dyn Write) -> Result<(), SchemeError> {
        let fun = self.regs.fun;
        if self.heap.hint(fun) != Some(Hint::ProcHeader) {
            return Err(SchemeError::Unapplicable(self.describe(fun)));
        }
        let head = self.heap.first(fun).unwrap_or(Value::NIL);
        let tail = self.heap.rest(fun).unwrap_or(Value::NIL);

        if tail.is_nil() {
            // Built-in: head is the reserved keyword.
            let Some(name) = self.syms.reserved_of(head) else {
                return Err(SchemeError::Fatal("built-in cell without keyword".into()));
            };
            self.regs.val = builtins::apply(self, name, out)?;
            self.cont = self.pop_label()?;
            return Ok(());
        }

        // Compound: head is the lambda expression, tail the captured
        // environment. Bind parameters to arguments in a fresh frame.
        let params = self.car(self.cdr(head));
        let body = self.cdr(self.cdr(head));
        let frame_env = self.alloc_pair2(tail, Value::NIL)?;
        self.heap.promote(frame_env, Hint::EnvHeader);
        self.stack.push(frame_env)?;

        let mut p = params;
        let mut a = self.regs.argl;
        loop {
            if self.heap.is_ordinary_pair(p) {
                if !self.heap.is_ordinary_pair(a) {
                    self.stack.pop()?;
                    return Err(SchemeError::ArityType(format!(
                        "too few arguments for {}",
                        writer::render(&self.heap, params, 20)
                    )));
                }
                self.bind_into_top(self.car(p), self.car(a))?;
                p = self.cdr(p);
                a = self.cdr(a);
                continue;
            }
            if p.is_nil() {
                if !a.is_nil() {
                    self.stack.pop()?;
                    return Err(SchemeError::ArityType(format!(
                        "too many arguments for {}",
                        writer::render(&self.heap, params, 20)
                    )));
                }
                break;
            }
            if self.heap.is_symbol(p) {
                // Rest parameter: bind the remaining arguments as a list.
                self.bind_into_top(p, a)?;
                break;
            }
            self.stack.pop()?;
            return Err(SchemeError::ArityType("malformed parameter list".into()));
        }

        self.regs.env = self.stack.pop()?;
        self.regs.unev = body;
        self.cont = Label::Sequence;
        Ok(())
    }

    /// Prepend (name . value) to the frame of the environment parked on
    /// top of the pointer stack.
    fn bind_into_top(&mut self, name: Value, value: Value) -> Result<(), SchemeError> {
        let binding = self.alloc_pair2(name, value)?;
        self.stack.push(binding)?;
        let env_cell = self.stack.peek(1)?;
        let frame = self.cdr(env_cell);
        let extended = self.alloc_pair2(self.stack.peek(0)?, frame)?;
        self.heap.set_rest(env_cell, extended);
        self.stack.pop()?;
        Ok(())
    }

    // =========================================================================
    // Sequences
    // =========================================================================

    /// unev = expression list. All but the last are evaluated for effect;
    /// the last is a tail jump.
    fn st_sequence(&mut self) -> Result<(), SchemeError> {
        let unev = self.regs.unev;
        if unev.is_nil() {
            self.regs.val = Value::NIL;
            self.cont = self.pop_label()?;
            return Ok(());
        }
        let remaining = self.cdr(unev);
        if remaining.is_nil() {
            self.regs.exp = self.car(unev);
            self.cont = Label::Start;
            return Ok(());
        }
        self.stack.push(self.regs.env)?;
        self.stack.push(remaining)?;
        self.push_label(Label::DidSequenceStep)?;
        self.regs.exp = self.car(unev);
        self.cont = Label::Start;
        Ok(())
    }

    fn st_did_sequence_step(&mut self) -> Result<(), SchemeError> {
        self.regs.unev = self.stack.pop()?;
        self.regs.env = self.stack.pop()?;
        self.cont = Label::Sequence;
        Ok(())
    }

    // =========================================================================
    // Syntax validation
    // =========================================================================

    /// Parameter lists: a single rest symbol, or a proper/improper list
    /// of distinct symbols.
    pub(crate) fn check_params(&self, params: Value) -> Result<(), SchemeError> {
        if params.is_nil() || self.heap.is_symbol(params) {
            return Ok(());
        }
        let mut seen: Vec<Value> = Vec::new();
        let mut cur = params;
        let mut steps = 0usize;
        while self.heap.is_ordinary_pair(cur) {
            let p = self.car(cur);
            if !self.heap.is_symbol(p) {
                return Err(SchemeError::Syntax("parameter is not a symbol".into()));
            }
            if seen.iter().any(|s| self.heap.values_eq(*s, p)) {
                return Err(SchemeError::Syntax(format!(
                    "duplicate parameter {}",
                    self.describe(p)
                )));
            }
            seen.push(p);
            cur = self.cdr(cur);
            steps += 1;
            if steps > self.heap.pair_capacity() {
                return Err(SchemeError::Syntax("cyclic parameter list".into()));
            }
        }
        if cur.is_nil() {
            return Ok(());
        }
        if self.heap.is_symbol(cur) {
            if seen.iter().any(|s| self.heap.values_eq(*s, cur)) {
                return Err(SchemeError::Syntax(format!(
                    "duplicate parameter {}",
                    self.describe(cur)
                )));
            }
            return Ok(());
        }
        Err(SchemeError::Syntax("malformed parameter list".into()))
    }

    fn check_cond_clauses(&self, clauses: Value) -> Result<(), SchemeError> {
        let Some(n) = self.proper_list_len(clauses) else {
            return Err(SchemeError::Syntax("cond clauses must form a list".into()));
        };
        if n == 0 {
            return Err(SchemeError::Syntax("cond needs at least one clause".into()));
        }
        let mut cur = clauses;
        let mut index = 0usize;
        while self.heap.is_ordinary_pair(cur) {
            let clause = self.car(cur);
            if self.proper_list_len(clause).is_none_or(|len| len < 2) {
                return Err(SchemeError::Syntax(
                    "cond clause needs a test and a consequent".into(),
                ));
            }
            let is_else = self.syms.reserved_of(self.car(clause)) == Some("else");
            if is_else && index + 1 != n {
                return Err(SchemeError::Syntax("else clause must come last".into()));
            }
            cur = self.cdr(cur);
            index += 1;
        }
        Ok(())
    }

    fn check_let_form(&self, exp: Value, bindings: Value) -> Result<(), SchemeError> {
        if self.proper_list_len(exp).is_none_or(|n| n < 3) {
            return Err(SchemeError::Syntax("let needs bindings and a body".into()));
        }
        if self.proper_list_len(bindings).is_none() {
            return Err(SchemeError::Syntax("let bindings must form a list".into()));
        }
        let mut seen: Vec<Value> = Vec::new();
        let mut cur = bindings;
        while self.heap.is_ordinary_pair(cur) {
            let binding = self.car(cur);
            if self.proper_list_len(binding) != Some(2) {
                return Err(SchemeError::Syntax(
                    "let binding must pair a name with a value".into(),
                ));
            }
            let name = self.car(binding);
            if !self.heap.is_symbol(name) {
                return Err(SchemeError::Syntax("let name must be a symbol".into()));
            }
            if seen.iter().any(|s| self.heap.values_eq(*s, name)) {
                return Err(SchemeError::Syntax(format!(
                    "duplicate let name {}",
                    self.describe(name)
                )));
            }
            seen.push(name);
            cur = self.cdr(cur);
        }
        Ok(())
    }

    // =========================================================================
    // Small helpers
    // =========================================================================

    /// Length of a proper list; `None` for improper or cyclic structure.
    /// The walk is bounded by the pair-region capacity, which no proper
    /// list can exceed.
    pub(crate) fn proper_list_len(&self, v: Value) -> Option<usize> {
        let mut n = 0usize;
        let mut cur = v;
        while self.heap.is_ordinary_pair(cur) {
            n += 1;
            if n > self.heap.pair_capacity() {
                return None; // cycle
            }
            cur = self.cdr(cur);
        }
        if cur.is_nil() { Some(n) } else { None }
    }

    /// Soft accessors: on a non-pair they yield nil, so the machine stays
    /// memory-safe even with syntax checking off.
    #[inline]
    pub(crate) fn car(&self, v: Value) -> Value {
        self.heap.first(v).unwrap_or(Value::NIL)
    }

    #[inline]
    pub(crate) fn cdr(&self, v: Value) -> Value {
        self.heap.rest(v).unwrap_or(Value::NIL)
    }

    pub(crate) fn push_label(&mut self, l: Label) -> Result<(), SchemeError> {
        self.labels.push(l.op())?;
        Ok(())
    }

    pub(crate) fn pop_label(&mut self) -> Result<Label, SchemeError> {
        Label::decode(self.labels.pop()?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn interp() -> Interp {
        Interp::new(Config::default()).unwrap()
    }

    /// Evaluate source, render the last value.
    fn ev(src: &str) -> String {
        let mut it = interp();
        let mut out = Vec::new();
        let v = it.eval_source(src, &mut out).unwrap();
        writer::render(&it.heap, v, 1000)
    }

    fn ev_err(src: &str) -> SchemeError {
        let mut it = interp();
        let mut out = Vec::new();
        it.eval_source(src, &mut out).unwrap_err()
    }

    /// Evaluate source, return (last value rendered, captured output).
    fn ev_out(src: &str) -> (String, String) {
        let mut it = interp();
        let mut out = Vec::new();
        let v = it.eval_source(src, &mut out).unwrap();
        (
            writer::render(&it.heap, v, 1000),
            String::from_utf8_lossy(&out).into_owned(),
        )
    }

    #[test]
    fn test_self_evaluation() {
        assert_eq!(ev("42"), "42");
        assert_eq!(ev("-7"), "-7");
        assert_eq!(ev("#t"), "#T");
        assert_eq!(ev("#f"), "#F");
        assert_eq!(ev("#\\q"), "#\\q");
        assert_eq!(ev("\"hello\""), "\"hello\"");
        assert_eq!(ev("()"), "()");
    }

    #[test]
    fn test_quote() {
        assert_eq!(ev("'x"), "x");
        assert_eq!(ev("'(1 2 3)"), "(1 2 3)");
        assert_eq!(ev("(quote (a . b))"), "(a . b)");
        assert!(matches!(ev_err("(quote)"), SchemeError::Syntax(_)));
        assert!(matches!(ev_err("(quote 1 2)"), SchemeError::Syntax(_)));
    }

    #[test]
    fn test_define_and_variable() {
        assert_eq!(ev("(define x 5)"), "x");
        assert_eq!(ev("(define x 5) x"), "5");
        assert_eq!(ev("(define x 5) (define x 6) x"), "6");
        assert!(matches!(ev_err("nope"), SchemeError::Unbound(_)));
        assert!(matches!(ev_err("(define car 1)"), SchemeError::Reserved(_)));
        assert!(matches!(ev_err("(define cadddr 1)"), SchemeError::Reserved(_)));
    }

    #[test]
    fn test_define_sugar_and_recursion() {
        assert_eq!(
            ev("(define (fact n) (if (< n 2) 1 (* n (fact (- n 1))))) (fact 6)"),
            "720"
        );
        assert_eq!(ev("(define (const) 99) (const)"), "99");
    }

    #[test]
    fn test_define_detects_competing_define() {
        let e = ev_err("(define a (define a 1))");
        match e {
            SchemeError::Syntax(msg) => assert!(msg.contains("changed during evaluation")),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_set_bang() {
        assert_eq!(ev("(define x 1) (set! x 2) x"), "2");
        assert_eq!(ev("(define x 1) (set! x 9)"), "9");
        assert!(matches!(ev_err("(set! nope 1)"), SchemeError::Unbound(_)));
        assert!(matches!(ev_err("(set! cdr 1)"), SchemeError::Reserved(_)));
        // set! reaches through enclosing frames.
        assert_eq!(
            ev("(define n 0) (define (bump) (set! n (+ n 1))) (bump) (bump) n"),
            "2"
        );
    }

    #[test]
    fn test_if_and_cond() {
        assert_eq!(ev("(if #t 'yes 'no)"), "yes");
        assert_eq!(ev("(if #f 'yes 'no)"), "no");
        assert_eq!(ev("(if 0 'yes 'no)"), "yes");
        assert_eq!(ev("(if #t 'yes)"), "yes");
        assert!(matches!(ev_err("(if #f 'yes)"), SchemeError::Syntax(_)));
        assert_eq!(ev("(cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c))"), "b");
        assert_eq!(ev("(cond (#f 'a) (else 'c))"), "c");
        assert_eq!(ev("(cond (#t 1 2 3))"), "3");
        assert!(matches!(ev_err("(cond (#f 1))"), SchemeError::Syntax(_)));
        assert!(matches!(ev_err("(cond)"), SchemeError::Syntax(_)));
        assert!(matches!(
            ev_err("(cond (else 1) (#t 2))"),
            SchemeError::Syntax(_)
        ));
    }

    #[test]
    fn test_and_or() {
        assert_eq!(ev("(and)"), "#T");
        assert_eq!(ev("(or)"), "#F");
        assert_eq!(ev("(and 1 2 3)"), "3");
        assert_eq!(ev("(and 1 #f 3)"), "#F");
        assert_eq!(ev("(or #f #f 7)"), "7");
        assert_eq!(ev("(or #f #f)"), "#F");
        // Short-circuit: the error operand is never evaluated.
        assert_eq!(ev("(and #f (error \"boom\"))"), "#F");
        assert_eq!(ev("(or 1 (error \"boom\"))"), "1");
    }

    #[test]
    fn test_lambda_and_application() {
        assert_eq!(ev("((lambda (x) (+ x 1)) 41)"), "42");
        assert_eq!(ev("((lambda () 7))"), "7");
        assert_eq!(ev("((lambda x x) 1 2 3)"), "(1 2 3)");
        assert_eq!(ev("((lambda (a . r) r) 1 2 3)"), "(2 3)");
        assert_eq!(ev("((lambda (a . r) a) 1)"), "1");
        assert!(matches!(
            ev_err("((lambda (a b) a) 1)"),
            SchemeError::ArityType(_)
        ));
        assert!(matches!(
            ev_err("((lambda (a) a) 1 2)"),
            SchemeError::ArityType(_)
        ));
        assert!(matches!(ev_err("(1 2 3)"), SchemeError::Unapplicable(_)));
        assert!(matches!(
            ev_err("(lambda (a a) a)"),
            SchemeError::Syntax(_)
        ));
    }

    #[test]
    fn test_closures_capture_their_environment() {
        assert_eq!(
            ev("(define (adder n) (lambda (x) (+ x n))) ((adder 3) 4)"),
            "7"
        );
        assert_eq!(
            ev("(define (counter) (define n 0) (lambda () (set! n (+ n 1)) n)) \
                (define c (counter)) (c) (c) (c)"),
            "3"
        );
    }

    #[test]
    fn test_let() {
        assert_eq!(ev("(let ((x 10) (y 20)) (+ x y))"), "30");
        assert_eq!(ev("(let ((x 1)) (let ((x 2)) x))"), "2");
        assert_eq!(ev("(define x 5) (let ((x 1) (y x)) y)"), "5");
        assert!(matches!(ev_err("(let ((x 1) (x 2)) x)"), SchemeError::Syntax(_)));
        assert!(matches!(ev_err("(let (x) x)"), SchemeError::Syntax(_)));
    }

    #[test]
    fn test_sequence_order_and_internal_define() {
        assert_eq!(ev("(define (f) (define a 1) (define b 2) (+ a b)) (f)"), "3");
        assert_eq!(ev("((lambda () 1 2 3))"), "3");
    }

    #[test]
    fn test_evaluation_order_is_left_to_right() {
        assert_eq!(
            ev("(define r '()) \
                (define (obs x) (set! r (cons x r)) x) \
                (+ (obs 1) (obs 2) (obs 3)) \
                r"),
            "(3 2 1)"
        );
    }

    #[test]
    fn test_deep_recursion_stays_flat() {
        assert_eq!(
            ev("(define (loop n) (if (= n 0) 'done (loop (- n 1)))) (loop 100000)"),
            "done"
        );
    }

    #[test]
    fn test_reserved_operator_application() {
        // A reserved symbol in operand position becomes a procedure value.
        assert_eq!(ev("(define f +) (f 1 2)"), "3");
        assert!(matches!(ev_err("(else 1)"), SchemeError::Unapplicable(_)));
    }

    #[test]
    fn test_last_result_variable() {
        assert_eq!(ev("(+ 1 2) (+ !! 10)"), "13");
        assert_eq!(ev("'first 'second !!"), "second");
    }

    #[test]
    fn test_syntax_check_toggle() {
        // With checking off, an ill-formed quote no longer raises.
        assert_eq!(ev("(synchecktoggle) (quote)"), "()");
        assert!(matches!(ev_err("(quote)"), SchemeError::Syntax(_)));
    }

    #[test]
    fn test_write_and_newline_builtins() {
        let (last, out) = ev_out("(write '(1 2)) (newline) (write \"hi\")");
        assert_eq!(out, "(1 2)\n\"hi\"");
        assert_eq!(last, "\"hi\"");
    }

    #[test]
    fn test_gc_during_evaluation_preserves_live_data() {
        // Enough churn to force several collections with the default
        // region, while a live structure must survive.
        assert_eq!(
            ev("(define keep '(1 2 3 4 5)) \
                (define (churn n) (if (= n 0) 'ok (churn (- n 1)))) \
                (churn 50000) \
                (garbagecollect) \
                keep"),
            "(1 2 3 4 5)"
        );
    }
}
