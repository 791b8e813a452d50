use crate::config::Config;
use crate::error::{Fallible, SchemeError};
use crate::heap::{GcStats, Heap};
use crate::primitives;
use crate::printer::print_val;
use crate::reader::Reader;
use crate::roots::Root;
use crate::syntax::{self, Keywords};
use crate::value::{ErrorKind, ForeignFn, Value};

/// The evaluation machine.
/// All interpreter state lives here so the collector can find every root.
pub struct Machine {
    pub heap: Heap,
    kw: Keywords,
}

/// What the trampoline does next.
enum Step {
    /// Finished with a value.
    Done(Value),
    /// Tail-jump: evaluate this expression in place.
    Eval(Value),
    /// Tail-jump: evaluate this sequence, the last element in place.
    Body(Value),
}

impl Machine {
    pub fn new(config: &Config) -> Result<Self, SchemeError> {
        let mut heap = Heap::new(config);
        let kw = Keywords::intern(&mut heap);
        primitives::install(&mut heap).map_err(|err| SchemeError::from_value(&heap, err))?;
        Ok(Machine { heap, kw })
    }

    /// Discard every value and binding, then reinstall the primitives.
    pub fn reset(&mut self) -> Result<(), SchemeError> {
        self.heap.reset();
        self.kw = Keywords::intern(&mut self.heap);
        primitives::install(&mut self.heap).map_err(|err| SchemeError::from_value(&self.heap, err))
    }

    /// Bind a native function in the base frame.
    pub fn define_foreign(&mut self, name: &'static str, func: ForeignFn) -> Result<(), SchemeError> {
        let sym = self.heap.intern(name);
        let value = self.heap.foreign_fn(name, func);
        let base = self.heap.base_env();
        self.heap
            .define(base, sym, value)
            .map(|_| ())
            .map_err(|err| SchemeError::from_value(&self.heap, err))
    }

    pub fn collect(&mut self) -> GcStats {
        self.heap.collect()
    }

    /// Run `f` with `val` held in a fresh root slot.
    pub fn rooted<T>(&mut self, val: Value, f: impl FnOnce(&mut Machine, &Root) -> T) -> T {
        let root = self.heap.acquire(val);
        let out = f(self, &root);
        self.heap.release(root);
        out
    }

    // ========================================================================
    // Host entry points
    // ========================================================================

    /// Evaluate `expr` with `env` as the current environment. Never absent:
    /// the result is either an ordinary value or an Error value. The caller's
    /// current environment is restored afterwards.
    pub fn evaluate(&mut self, expr: Value, env: Value) -> Value {
        let caller = self.heap.current_env();
        let result = self.rooted(caller, |m, _| {
            m.heap.set_current_env(env);
            let result = m.trampoline(expr);
            m.heap.set_current_env(caller);
            result
        });
        result.unwrap_or_else(|err| err)
    }

    /// Evaluate `expr` in the current environment.
    pub fn eval(&mut self, expr: Value) -> Value {
        let env = self.heap.current_env();
        self.evaluate(expr, env)
    }

    /// Read the first datum of `source`.
    pub fn read(&mut self, source: &str) -> Result<Option<Value>, SchemeError> {
        Reader::new(source, &mut self.heap).read()
    }

    /// Read and evaluate every datum in `source`, one at a time, returning
    /// the last result. Stops at the first error. Empty input yields `()`.
    ///
    /// The returned value is not rooted.
    pub fn run(&mut self, source: &str) -> Result<Value, SchemeError> {
        let last = self.heap.acquire(Value::EMPTY_LIST);
        let mut pos = 0;
        let outcome = loop {
            let mut reader = Reader::starting_at(source, pos, &mut self.heap);
            let expr = match reader.read() {
                Ok(Some(expr)) => expr,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            pos = reader.position();

            let value = self.eval(expr);
            if self.heap.is_error(value) {
                break Err(SchemeError::from_value(&self.heap, value));
            }
            self.heap.put(&last, value);
        };
        let value = self.heap.release(last);
        outcome.map(|_| value)
    }

    pub fn print(&self, val: Value) -> String {
        print_val(val, &self.heap)
    }

    // ========================================================================
    // The trampoline
    // ========================================================================

    /// Evaluate `expr` in a nested (non-tail) position: whatever the
    /// evaluation does to the current environment is undone on return.
    fn save_eval(&mut self, expr: Value) -> Fallible {
        let saved = self.heap.current_env();
        self.rooted(saved, |m, _| {
            let result = m.trampoline(expr);
            m.heap.set_current_env(saved);
            result
        })
    }

    /// The evaluation loop. One root slot holds the expression (or body
    /// sequence) being worked on; every tail position replaces its contents
    /// instead of recursing, so the native stack stays flat across tail
    /// calls. Tail jumps may switch the current environment for good.
    fn trampoline(&mut self, expr: Value) -> Fallible {
        self.rooted(expr, |m, slot| {
            let mut in_body = false;
            loop {
                let current = m.heap.get(slot);
                let step = if in_body {
                    m.step_body(current)?
                } else {
                    m.step(current)?
                };
                match step {
                    Step::Done(val) => return Ok(val),
                    Step::Eval(next) => {
                        m.heap.put(slot, next);
                        in_body = false;
                    }
                    Step::Body(seq) => {
                        m.heap.put(slot, seq);
                        in_body = true;
                    }
                }
            }
        })
    }

    /// Evaluate all but the last expression of a sequence for effect and
    /// hand the last one back as a tail jump.
    fn step_body(&mut self, seq: Value) -> Fallible<Step> {
        let mut rest = seq;
        loop {
            match self.heap.as_pair(rest) {
                Some((expr, next)) if next.is_empty_list() => return Ok(Step::Eval(expr)),
                Some((expr, next)) => {
                    self.save_eval(expr)?;
                    rest = next;
                }
                None => {
                    return self
                        .heap
                        .raise(ErrorKind::Syntax, "sequence of expressions isn't a proper list")
                }
            }
        }
    }

    fn step(&mut self, expr: Value) -> Fallible<Step> {
        let (head, operands) = match self.heap.as_pair(expr) {
            Some(parts) => parts,
            None if self.heap.is_symbol(expr) => {
                let env = self.heap.current_env();
                return self.heap.lookup(env, expr).map(Step::Done);
            }
            None if self.heap.is_closure(expr) => {
                return self.heap.raise(ErrorKind::Type, "can't evaluate a closure")
            }
            None if self.heap.is_frame(expr) => {
                return self.heap.raise(ErrorKind::Type, "can't evaluate an environment")
            }
            None => return Ok(Step::Done(expr)),
        };

        let kw = self.kw;
        match head {
            h if h == kw.quote => self.form_quote(operands),
            h if h == kw.quasiquote => self.form_quasiquote(operands),
            h if h == kw.if_ => self.form_if(operands),
            h if h == kw.begin => Ok(Step::Body(operands)),
            h if h == kw.cond => self.form_cond(operands),
            h if h == kw.define => self.form_define(operands),
            h if h == kw.set => self.form_set(operands),
            h if h == kw.and => self.form_and(operands),
            h if h == kw.or => self.form_or(operands),
            h if h == kw.let_ => syntax::desugar_let(&mut self.heap, &kw, operands).map(Step::Eval),
            h if h == kw.lambda => self.form_lambda(operands),
            h if h == kw.apply => self.form_apply(operands),
            h if h == kw.eval => self.form_eval(operands),
            h if h == kw.the_environment => self.form_the_environment(operands),
            _ => self.evcall(head, operands),
        }
    }

    // ========================================================================
    // Special forms
    // ========================================================================

    /// Exactly `N` operands, else a SyntaxError mentioning `form`.
    fn operands<const N: usize>(&mut self, operands: Value, form: &str) -> Fallible<[Value; N]> {
        let parsed = self
            .heap
            .list_to_vec(operands)
            .and_then(|items| <[Value; N]>::try_from(items).ok());
        match parsed {
            Some(items) => Ok(items),
            None => {
                let msg = format!("{} expects {} operand{}", form, N, if N == 1 { "" } else { "s" });
                self.heap.raise(ErrorKind::Syntax, msg)
            }
        }
    }

    fn form_quote(&mut self, operands: Value) -> Fallible<Step> {
        let [datum] = self.operands::<1>(operands, "quote")?;
        Ok(Step::Done(datum))
    }

    fn form_quasiquote(&mut self, operands: Value) -> Fallible<Step> {
        let [template] = self.operands::<1>(operands, "quasiquote")?;
        self.quasi(template, 0).map(Step::Done)
    }

    /// Walk a quasiquote template. `level` counts enclosing quasiquotes
    /// beyond the outermost; only level 0 unquotes are evaluated.
    ///
    /// The spine of each list is copied in a loop under one root; only
    /// element templates and nested levels recurse.
    fn quasi(&mut self, template: Value, level: usize) -> Fallible {
        let unquote_splicing = self.kw.unquote_splicing;
        let head = match self.heap.as_pair(template) {
            Some((head, _)) => head,
            None => return Ok(template),
        };
        if self.is_quasi_tag(head) {
            return self.quasi_form(template, level);
        }

        self.rooted(Value::EMPTY_LIST, |m, out| {
            let mut tail: Option<Value> = None;
            let mut rest = template;
            loop {
                let (item, next) = match m.heap.as_pair(rest) {
                    // A dotted tail written as `. ,x` reads as `(unquote x)`.
                    Some((tag, _)) if m.is_quasi_tag(tag) => {
                        let end = m.quasi_form(rest, level)?;
                        link_tail(&mut m.heap, out, tail, end);
                        return Ok(m.heap.get(out));
                    }
                    Some(parts) => parts,
                    None => {
                        link_tail(&mut m.heap, out, tail, rest);
                        return Ok(m.heap.get(out));
                    }
                };

                let splice = level == 0
                    && m
                        .heap
                        .as_pair(item)
                        .map_or(false, |(tag, _)| tag == unquote_splicing);
                if splice {
                    let form = m.heap.cdr(item);
                    let [inner] = m.operands::<1>(form, "unquote-splicing")?;
                    let spliced = m.save_eval(inner)?;
                    tail = m.splice_onto(out, tail, spliced)?;
                } else {
                    let val = m.quasi(item, level)?;
                    let cell = m.heap.cons(val, Value::EMPTY_LIST)?;
                    link_tail(&mut m.heap, out, tail, cell);
                    tail = Some(cell);
                }
                rest = next;
            }
        })
    }

    fn is_quasi_tag(&self, tag: Value) -> bool {
        let kw = self.kw;
        tag == kw.quasiquote || tag == kw.unquote || tag == kw.unquote_splicing
    }

    /// A `(quasiquote x)`, `(unquote x)` or `(unquote-splicing x)` form met
    /// while walking a template.
    fn quasi_form(&mut self, form: Value, level: usize) -> Fallible {
        let kw = self.kw;
        let (head, rest) = match self.heap.as_pair(form) {
            Some(parts) => parts,
            None => return Ok(form),
        };
        if head == kw.quasiquote {
            let [inner] = self.operands::<1>(rest, "quasiquote")?;
            let inner = self.quasi(inner, level + 1)?;
            return self.heap.list(&[kw.quasiquote, inner]);
        }
        let [inner] = self.operands::<1>(rest, "unquote")?;
        if level == 0 {
            return self.save_eval(inner);
        }
        let inner = self.quasi(inner, level - 1)?;
        self.heap.list(&[head, inner])
    }

    /// Copy the elements of `spliced` onto the list rooted in `out`,
    /// returning the new last cell.
    fn splice_onto(
        &mut self,
        out: &Root,
        tail: Option<Value>,
        spliced: Value,
    ) -> Fallible<Option<Value>> {
        let items = match self.heap.list_to_vec(spliced) {
            Some(items) => items,
            None => return self.heap.raise(ErrorKind::Type, "cannot splice an improper list"),
        };
        self.rooted(spliced, |m, _| {
            let mut tail = tail;
            for item in items {
                let cell = m.heap.cons(item, Value::EMPTY_LIST)?;
                link_tail(&mut m.heap, out, tail, cell);
                tail = Some(cell);
            }
            Ok(tail)
        })
    }

    /// `(if predicate consequent alternative)`
    fn form_if(&mut self, operands: Value) -> Fallible<Step> {
        let [predicate, consequent, alternative] = self.operands::<3>(operands, "if")?;
        if self.save_eval(predicate)?.is_true() {
            Ok(Step::Eval(consequent))
        } else {
            Ok(Step::Eval(alternative))
        }
    }

    fn form_cond(&mut self, operands: Value) -> Fallible<Step> {
        let mut clauses = operands;
        loop {
            let (clause, rest) = match self.heap.as_pair(clauses) {
                Some(parts) => parts,
                // No clause matched: unspecified.
                None if clauses.is_empty_list() => return Ok(Step::Done(Value::EMPTY_LIST)),
                None => {
                    return self
                        .heap
                        .raise(ErrorKind::Syntax, "cond clauses aren't a proper list")
                }
            };
            let (test, body) = match self.heap.as_pair(clause) {
                Some((test, body)) if self.heap.is_pair(body) => (test, body),
                _ => return self.heap.raise(ErrorKind::Syntax, "malformed cond clause"),
            };
            if test == self.kw.else_ || self.save_eval(test)?.is_true() {
                return Ok(Step::Body(body));
            }
            clauses = rest;
        }
    }

    /// `(define name expr)` or `(define (name . params) body...)`.
    fn form_define(&mut self, operands: Value) -> Fallible<Step> {
        let (target, rest) = match self.heap.as_pair(operands) {
            Some(parts) => parts,
            None => return self.heap.raise(ErrorKind::Syntax, "malformed define"),
        };

        if let Some((name, params)) = self.heap.as_pair(target) {
            if !self.heap.is_symbol(name) {
                return self
                    .heap
                    .raise(ErrorKind::Syntax, "name for defined function is not a symbol");
            }
            let closure = self.make_closure(params, rest)?;
            let env = self.heap.current_env();
            return self.heap.define(env, name, closure).map(Step::Done);
        }

        if !self.heap.is_symbol(target) {
            return self.heap.raise(ErrorKind::Syntax, "malformed define");
        }
        let [expr] = self.operands::<1>(rest, "define")?;
        let val = self.save_eval(expr)?;
        let env = self.heap.current_env();
        self.heap.define(env, target, val).map(Step::Done)
    }

    /// `(set! name expr)`
    fn form_set(&mut self, operands: Value) -> Fallible<Step> {
        let [name, expr] = self.operands::<2>(operands, "set!")?;
        if !self.heap.is_symbol(name) {
            return self.heap.raise(ErrorKind::Syntax, "set! target is not a symbol");
        }
        let val = self.save_eval(expr)?;
        let env = self.heap.current_env();
        self.heap.assign(env, name, val).map(Step::Done)
    }

    fn form_and(&mut self, operands: Value) -> Fallible<Step> {
        let mut rest = operands;
        if rest.is_empty_list() {
            return Ok(Step::Done(Value::TRUE));
        }
        loop {
            let (expr, next) = match self.heap.as_pair(rest) {
                Some(parts) => parts,
                None => {
                    return self
                        .heap
                        .raise(ErrorKind::Syntax, "operands to and aren't a proper list")
                }
            };
            if next.is_empty_list() {
                return Ok(Step::Eval(expr));
            }
            if self.save_eval(expr)?.is_false() {
                return Ok(Step::Done(Value::FALSE));
            }
            rest = next;
        }
    }

    fn form_or(&mut self, operands: Value) -> Fallible<Step> {
        let mut rest = operands;
        if rest.is_empty_list() {
            return Ok(Step::Done(Value::FALSE));
        }
        loop {
            let (expr, next) = match self.heap.as_pair(rest) {
                Some(parts) => parts,
                None => {
                    return self
                        .heap
                        .raise(ErrorKind::Syntax, "operands to or aren't a proper list")
                }
            };
            if next.is_empty_list() {
                return Ok(Step::Eval(expr));
            }
            let val = self.save_eval(expr)?;
            if val.is_true() {
                return Ok(Step::Done(val));
            }
            rest = next;
        }
    }

    /// `(lambda params body...)`
    fn form_lambda(&mut self, operands: Value) -> Fallible<Step> {
        let (params, body) = match self.heap.as_pair(operands) {
            Some(parts) => parts,
            None => return self.heap.raise(ErrorKind::Syntax, "missing parameter list to lambda"),
        };
        self.make_closure(params, body).map(Step::Done)
    }

    /// Close over the current environment after checking the parameter
    /// spec: `()`, a list of symbols, a dotted list of symbols, or a symbol.
    fn make_closure(&mut self, params: Value, body: Value) -> Fallible {
        let mut all_symbols = true;
        let end = self
            .heap
            .walk_spine(params, |name| all_symbols &= self.heap.is_symbol(name));
        if !all_symbols {
            return self.heap.raise(ErrorKind::Syntax, "lambda parameter is not a symbol");
        }
        match end {
            Some(end) if end.is_empty_list() || self.heap.is_symbol(end) => {}
            _ => return self.heap.raise(ErrorKind::Syntax, "malformed lambda parameter list"),
        }
        if !self.heap.is_pair(body) {
            return self.heap.raise(ErrorKind::Syntax, "lambda body is empty");
        }
        let env = self.heap.current_env();
        self.heap.closure(env, params, body)
    }

    /// `(apply f args)`: evaluate `args` to a list, quote each element and
    /// tail-jump into `(f 'a 'b ...)`.
    fn form_apply(&mut self, operands: Value) -> Fallible<Step> {
        let [func, arg_expr] = self.operands::<2>(operands, "apply")?;
        let args = self.save_eval(arg_expr)?;
        let items = match self.heap.list_to_vec(args) {
            Some(items) => items,
            None => return self.heap.raise(ErrorKind::Type, "apply expects a list of arguments"),
        };

        let quote = self.kw.quote;
        self.rooted(args, |m, _| {
            m.rooted(Value::EMPTY_LIST, |m, acc| {
                for &item in items.iter().rev() {
                    let quoted = m.heap.list(&[quote, item])?;
                    let pair = m.heap.cons(quoted, m.heap.get(acc))?;
                    m.heap.put(acc, pair);
                }
                m.heap.cons(func, m.heap.get(acc)).map(Step::Eval)
            })
        })
    }

    /// `(eval expr env)`: evaluate both operands, then tail-jump into the
    /// value of `expr` under `env` (`#f` means the current environment).
    fn form_eval(&mut self, operands: Value) -> Fallible<Step> {
        let [target, env_expr] = self.operands::<2>(operands, "eval")?;
        let target = self.save_eval(target)?;
        self.rooted(target, |m, _| {
            let env = m.save_eval(env_expr)?;
            if m.heap.is_frame(env) {
                m.heap.set_current_env(env);
            } else if !env.is_false() {
                return m
                    .heap
                    .raise(ErrorKind::Type, "eval expects an environment or #f");
            }
            Ok(Step::Eval(target))
        })
    }

    fn form_the_environment(&mut self, operands: Value) -> Fallible<Step> {
        let [] = self.operands::<0>(operands, "the-environment")?;
        Ok(Step::Done(self.heap.current_env()))
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Evaluate the operator, then the operands left to right, then apply.
    fn evcall(&mut self, head: Value, operands: Value) -> Fallible<Step> {
        let call = self.eval_combination(head, operands)?;
        self.rooted(call, |m, _| {
            let (func, args) = match m.heap.as_pair(call) {
                Some(parts) => parts,
                None => unreachable!("eval_combination always returns a pair"),
            };
            m.apply_procedure(func, args)
        })
    }

    /// Evaluate the operator and each operand under the environment active
    /// on entry, collecting `(func arg ...)` into one fresh list so a single
    /// root slot covers the procedure and its arguments.
    fn eval_combination(&mut self, operator: Value, operands: Value) -> Fallible {
        let func = self.save_eval(operator)?;
        let first = self.heap.cons(func, Value::EMPTY_LIST)?;
        self.rooted(first, |m, head| {
            let mut tail = first;
            let mut rest = operands;
            loop {
                let (expr, next) = match m.heap.as_pair(rest) {
                    Some(parts) => parts,
                    None if rest.is_empty_list() => return Ok(m.heap.get(head)),
                    None => {
                        return m
                            .heap
                            .raise(ErrorKind::Syntax, "operands aren't a proper list")
                    }
                };
                let val = m.save_eval(expr)?;
                let cell = m.heap.cons(val, Value::EMPTY_LIST)?;
                m.heap.set_cdr(tail, cell);
                tail = cell;
                rest = next;
            }
        })
    }

    /// Call `func` on an evaluated argument list. Both must be reachable
    /// from a root slot. Foreign functions run to completion here; closures
    /// come back as a tail jump into their body under a fresh frame.
    fn apply_procedure(&mut self, func: Value, args: Value) -> Fallible<Step> {
        if self.heap.is_foreign(func) {
            let (_, native) = self.heap.foreign(func);
            let result = native(&mut self.heap, args);
            return if self.heap.is_error(result) {
                Err(result)
            } else {
                Ok(Step::Done(result))
            };
        }
        if !self.heap.is_closure(func) {
            let kind = self.heap.datum(func).type_name();
            let msg = format!("can't apply an object of type {}", kind);
            return self.heap.raise(ErrorKind::Type, msg);
        }

        let (env, params, body) = self.heap.closure_parts(func);
        let (names, values) = self.bind_params(params, args)?;
        self.rooted(names, |m, _| {
            m.rooted(values, |m, _| {
                m.heap.set_current_env(env);
                m.heap.push_frame(names, values)
            })
        })?;
        Ok(Step::Body(body))
    }

    /// Match a parameter spec against an argument list, producing the
    /// parallel names/values lists for the new frame.
    fn bind_params(&mut self, params: Value, args: Value) -> Fallible<(Value, Value)> {
        let given = self.heap.list_len(args).unwrap_or(0);

        // Fixed arity shares the parameter list and the argument list directly.
        if let Some(wanted) = self.heap.list_len(params) {
            if wanted != given {
                let msg = format!("expected {} argument(s), got {}", wanted, given);
                return self.heap.raise(ErrorKind::Arity, msg);
            }
            return Ok((params, args));
        }

        if self.heap.is_symbol(params) {
            let names = self.heap.list(&[params])?;
            return self.rooted(names, |m, _| {
                let values = m.heap.list(&[args])?;
                Ok((names, values))
            });
        }

        // Dotted: (a b . rest). `make_closure` has already checked the spine.
        let mut names = Vec::new();
        let rest_name = self.heap.walk_spine(params, |name| names.push(name));
        let required = names.len();
        if given < required {
            let msg = format!("expected at least {} argument(s), got {}", required, given);
            return self.heap.raise(ErrorKind::Arity, msg);
        }
        let mut values = Vec::with_capacity(required + 1);
        let mut remaining = args;
        while values.len() < required {
            let (arg, more) = match self.heap.as_pair(remaining) {
                Some(parts) => parts,
                None => unreachable!("argument list shorter than its length"),
            };
            values.push(arg);
            remaining = more;
        }
        names.push(rest_name.unwrap_or(Value::EMPTY_LIST));
        values.push(remaining);

        let names = self.heap.list(&names)?;
        self.rooted(names, |m, _| {
            let values = m.heap.list(&values)?;
            Ok((names, values))
        })
    }
}

/// Hang `cell` off `tail`, or make it the whole list held in `head` when
/// nothing has been linked yet.
fn link_tail(heap: &mut Heap, head: &Root, tail: Option<Value>, cell: Value) {
    match tail {
        Some(prev) => heap.set_cdr(prev, cell),
        None => heap.put(head, cell),
    }
}
