//! Special-form keywords and the source-to-source rewrites for `let`.

use crate::error::Fallible;
use crate::heap::Heap;
use crate::value::{ErrorKind, Value};

/// Interned special-form names. Forms are recognised by handle identity
/// with the head of an expression, so looking one up never allocates.
#[derive(Debug, Clone, Copy)]
pub struct Keywords {
    pub quote: Value,
    pub quasiquote: Value,
    pub unquote: Value,
    pub unquote_splicing: Value,
    pub if_: Value,
    pub begin: Value,
    pub cond: Value,
    pub else_: Value,
    pub define: Value,
    pub set: Value,
    pub and: Value,
    pub or: Value,
    pub let_: Value,
    pub lambda: Value,
    pub apply: Value,
    pub eval: Value,
    pub the_environment: Value,
}

impl Keywords {
    pub fn intern(heap: &mut Heap) -> Self {
        Keywords {
            quote: heap.intern("quote"),
            quasiquote: heap.intern("quasiquote"),
            unquote: heap.intern("unquote"),
            unquote_splicing: heap.intern("unquote-splicing"),
            if_: heap.intern("if"),
            begin: heap.intern("begin"),
            cond: heap.intern("cond"),
            else_: heap.intern("else"),
            define: heap.intern("define"),
            set: heap.intern("set!"),
            and: heap.intern("and"),
            or: heap.intern("or"),
            let_: heap.intern("let"),
            lambda: heap.intern("lambda"),
            apply: heap.intern("apply"),
            eval: heap.intern("eval"),
            the_environment: heap.intern("the-environment"),
        }
    }
}

/// Rewrite the operands of a `let` into a lambda application:
///
/// * `(let ((n v) ...) body...)` becomes `((lambda (n ...) body...) v ...)`
/// * `(let () body...)` becomes `((lambda () body...))`
/// * `(let name ((n v) ...) body...)` becomes
///   `((lambda () (define name (lambda (n ...) body...)) (name v ...)))`
///
/// `operands` must stay reachable (the evaluator holds the whole form in a
/// root slot) since the result shares its binding expressions and body.
pub fn desugar_let(heap: &mut Heap, kw: &Keywords, operands: Value) -> Fallible {
    let (first, rest) = match heap.as_pair(operands) {
        Some(parts) => parts,
        None => return heap.raise(ErrorKind::Syntax, "malformed let"),
    };
    if heap.is_symbol(first) {
        return named_let(heap, kw, first, rest);
    }
    if !heap.is_pair(rest) {
        return heap.raise(ErrorKind::Syntax, "let has no body");
    }

    let (names, inits) = split_bindings(heap, first, "malformed let bindings")?;
    heap.rooted(names, |heap, _| {
        heap.rooted(inits, |heap, _| {
            let spec = heap.cons(names, rest)?;
            let lambda = heap.cons(kw.lambda, spec)?;
            heap.cons(lambda, inits)
        })
    })
}

fn named_let(heap: &mut Heap, kw: &Keywords, name: Value, rest: Value) -> Fallible {
    let (bindings, body) = match heap.as_pair(rest) {
        Some(parts) => parts,
        None => return heap.raise(ErrorKind::Syntax, "malformed named let"),
    };
    if !heap.is_pair(body) {
        return heap.raise(ErrorKind::Syntax, "named let has no body");
    }

    let (names, inits) = split_bindings(heap, bindings, "malformed named let bindings")?;
    heap.rooted(names, |heap, _| {
        heap.rooted(inits, |heap, _| {
            let call = heap.cons(name, inits)?;
            heap.rooted(call, |heap, _| {
                let spec = heap.cons(names, body)?;
                let inner = heap.cons(kw.lambda, spec)?;
                let define = heap.list(&[kw.define, name, inner])?;
                let outer = heap.list(&[kw.lambda, Value::EMPTY_LIST, define, call])?;
                heap.list(&[outer])
            })
        })
    })
}

/// Split `((name init) ...)` into a list of names and a list of inits.
fn split_bindings(heap: &mut Heap, bindings: Value, complaint: &str) -> Fallible<(Value, Value)> {
    let entries = match heap.list_to_vec(bindings) {
        Some(entries) => entries,
        None => return heap.raise(ErrorKind::Syntax, complaint),
    };

    let mut names = Vec::with_capacity(entries.len());
    let mut inits = Vec::with_capacity(entries.len());
    for entry in entries {
        match heap.list_to_vec(entry).as_deref() {
            Some(&[name, init]) if heap.is_symbol(name) => {
                names.push(name);
                inits.push(init);
            }
            _ => return heap.raise(ErrorKind::Syntax, complaint),
        }
    }

    let names = heap.list(&names)?;
    heap.rooted(names, |heap, _| {
        let inits = heap.list(&inits)?;
        Ok((names, inits))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn setup() -> (Heap, Keywords) {
        let mut heap = Heap::new(&Config::small());
        let kw = Keywords::intern(&mut heap);
        (heap, kw)
    }

    fn ints(heap: &mut Heap, ns: &[i64]) -> Vec<Value> {
        ns.iter().map(|&n| heap.make_int(n).unwrap()).collect()
    }

    #[test]
    fn ordinary_let_becomes_an_application() {
        let (mut heap, kw) = setup();
        let x = heap.intern("x");
        let y = heap.intern("y");
        let vals = ints(&mut heap, &[1, 2]);
        let bx = heap.list(&[x, vals[0]]).unwrap();
        let by = heap.list(&[y, vals[1]]).unwrap();
        let bindings = heap.list(&[bx, by]).unwrap();
        let operands = heap.list(&[bindings, x]).unwrap();

        let out = desugar_let(&mut heap, &kw, operands).unwrap();
        let (lambda, inits) = heap.as_pair(out).unwrap();
        assert_eq!(heap.list_to_vec(inits), Some(vals));
        let parts = heap.list_to_vec(lambda).unwrap();
        assert_eq!(parts[0], kw.lambda);
        assert_eq!(heap.list_to_vec(parts[1]), Some(vec![x, y]));
        assert_eq!(parts[2], x);
    }

    #[test]
    fn empty_bindings_give_a_thunk_call() {
        let (mut heap, kw) = setup();
        let body = heap.make_int(7).unwrap();
        let operands = heap.list(&[Value::EMPTY_LIST, body]).unwrap();
        let out = desugar_let(&mut heap, &kw, operands).unwrap();
        assert_eq!(heap.list_len(out), Some(1));
        let lambda = heap.list_to_vec(heap.car(out)).unwrap();
        assert_eq!(lambda, vec![kw.lambda, Value::EMPTY_LIST, body]);
    }

    #[test]
    fn named_let_defines_then_calls() {
        let (mut heap, kw) = setup();
        let lp = heap.intern("loop");
        let i = heap.intern("i");
        let zero = heap.make_int(0).unwrap();
        let binding = heap.list(&[i, zero]).unwrap();
        let bindings = heap.list(&[binding]).unwrap();
        let operands = heap.list(&[lp, bindings, i]).unwrap();

        let out = desugar_let(&mut heap, &kw, operands).unwrap();
        let outer = heap.list_to_vec(heap.car(out)).unwrap();
        assert_eq!(outer.len(), 4);
        assert_eq!(outer[0], kw.lambda);
        assert_eq!(outer[1], Value::EMPTY_LIST);

        let define = heap.list_to_vec(outer[2]).unwrap();
        assert_eq!(define[0], kw.define);
        assert_eq!(define[1], lp);
        assert_eq!(heap.car(define[2]), kw.lambda);

        assert_eq!(heap.list_to_vec(outer[3]), Some(vec![lp, zero]));
    }

    #[test]
    fn malformed_shapes_are_syntax_errors() {
        let (mut heap, kw) = setup();
        let x = heap.intern("x");
        let one = heap.make_int(1).unwrap();

        // (let)
        let err = desugar_let(&mut heap, &kw, Value::EMPTY_LIST).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Syntax);

        // (let ((x)) x)
        let short = heap.list(&[x]).unwrap();
        let bindings = heap.list(&[short]).unwrap();
        let operands = heap.list(&[bindings, x]).unwrap();
        let err = desugar_let(&mut heap, &kw, operands).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Syntax);

        // (let ((1 1)) x)
        let numeric = heap.list(&[one, one]).unwrap();
        let bindings = heap.list(&[numeric]).unwrap();
        let operands = heap.list(&[bindings, x]).unwrap();
        let err = desugar_let(&mut heap, &kw, operands).unwrap_err();
        assert_eq!(heap.error_message(err), "malformed let bindings");

        // (let ())
        let operands = heap.list(&[Value::EMPTY_LIST]).unwrap();
        let err = desugar_let(&mut heap, &kw, operands).unwrap_err();
        assert_eq!(heap.error_message(err), "let has no body");
    }
}
