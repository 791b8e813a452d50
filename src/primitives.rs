//! Native procedures installed into the base frame.
//!
//! Every primitive follows the foreign calling convention: it receives the
//! evaluated argument list as one value and returns one value, reporting
//! failures as Error values rather than panicking. Internally each one is
//! written against `Fallible` and wrapped by `native!`.

use std::cmp::Ordering;

use crate::error::Fallible;
use crate::heap::Heap;
use crate::value::{ErrorKind, ForeignFn, Value};

/// Adapt a `Fallible` primitive to the foreign calling convention.
macro_rules! native {
    ($f:path) => {{
        fn shim(heap: &mut Heap, args: Value) -> Value {
            $f(heap, args).unwrap_or_else(|err| err)
        }
        shim as ForeignFn
    }};
}

/// Bind every primitive in the base frame.
pub fn install(heap: &mut Heap) -> Fallible<()> {
    let table: [(&'static str, ForeignFn); 31] = [
        ("+", native!(prim_add)),
        ("-", native!(prim_sub)),
        ("*", native!(prim_mul)),
        ("/", native!(prim_div)),
        ("=", native!(prim_num_eq)),
        ("<", native!(prim_lt)),
        (">", native!(prim_gt)),
        ("<=", native!(prim_le)),
        (">=", native!(prim_ge)),
        ("car", native!(prim_car)),
        ("cdr", native!(prim_cdr)),
        ("cons", native!(prim_cons)),
        ("list", native!(prim_list)),
        ("length", native!(prim_length)),
        ("set-car!", native!(prim_set_car)),
        ("set-cdr!", native!(prim_set_cdr)),
        ("null?", native!(prim_is_null)),
        ("pair?", native!(prim_is_pair)),
        ("symbol?", native!(prim_is_symbol)),
        ("number?", native!(prim_is_number)),
        ("integer?", native!(prim_is_integer)),
        ("real?", native!(prim_is_real)),
        ("string?", native!(prim_is_string)),
        ("char?", native!(prim_is_char)),
        ("boolean?", native!(prim_is_boolean)),
        ("procedure?", native!(prim_is_procedure)),
        ("error?", native!(prim_is_error)),
        ("eq?", native!(prim_eq)),
        ("not", native!(prim_not)),
        ("error", native!(prim_error)),
        ("gc", native!(prim_gc)),
    ];

    let base = heap.base_env();
    for (name, func) in table {
        let sym = heap.intern(name);
        let value = heap.foreign_fn(name, func);
        heap.define(base, sym, value)?;
    }
    Ok(())
}

// ============================================================================
// Argument checking
// ============================================================================

/// Exactly `N` arguments, without looking at them.
fn arity<const N: usize>(heap: &mut Heap, args: Value, name: &str) -> Fallible<[Value; N]> {
    let items = heap.list_to_vec(args).unwrap_or_default();
    let given = items.len();
    match <[Value; N]>::try_from(items) {
        Ok(items) => Ok(items),
        Err(_) => {
            let msg = format!("{} expects {} argument(s), got {}", name, N, given);
            heap.raise(ErrorKind::Arity, msg)
        }
    }
}

/// Hand back the first Error among `args`, if any.
fn propagate(heap: &Heap, args: &[Value]) -> Fallible<()> {
    match args.iter().find(|&&arg| heap.is_error(arg)) {
        Some(&err) => Err(err),
        None => Ok(()),
    }
}

/// Exactly `N` arguments, none of them Error values.
fn fixed<const N: usize>(heap: &mut Heap, args: Value, name: &str) -> Fallible<[Value; N]> {
    let items = arity::<N>(heap, args, name)?;
    propagate(heap, &items)?;
    Ok(items)
}

/// At least `min` arguments, none of them Error values.
fn at_least(heap: &mut Heap, args: Value, min: usize, name: &str) -> Fallible<Vec<Value>> {
    let items = heap.list_to_vec(args).unwrap_or_default();
    if items.len() < min {
        let msg = format!("{} expects at least {} argument(s), got {}", name, min, items.len());
        return heap.raise(ErrorKind::Arity, msg);
    }
    propagate(heap, &items)?;
    Ok(items)
}

fn wrong_type<T>(heap: &mut Heap, name: &str, wanted: &str, got: Value) -> Fallible<T> {
    let msg = format!("{} expects {}, got {}", name, wanted, heap.datum(got).type_name());
    heap.raise(ErrorKind::Type, msg)
}

// ============================================================================
// Arithmetic
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Real(x) => x,
        }
    }
}

fn numbers(heap: &mut Heap, args: Value, min: usize, name: &str) -> Fallible<Vec<Num>> {
    let items = at_least(heap, args, min, name)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if heap.is_int(item) {
            out.push(Num::Int(heap.int(item)));
        } else if heap.is_real(item) {
            out.push(Num::Real(heap.real(item)));
        } else {
            return wrong_type(heap, name, "numbers", item);
        }
    }
    Ok(out)
}

fn make_num(heap: &mut Heap, n: Num) -> Fallible {
    match n {
        Num::Int(i) => heap.make_int(i),
        Num::Real(x) => heap.make_real(x),
    }
}

/// Combine two numbers: integer arithmetic while both sides are integers,
/// real arithmetic as soon as either is real.
fn combine(
    heap: &mut Heap,
    name: &str,
    a: Num,
    b: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    real_op: fn(f64, f64) -> f64,
) -> Fallible<Num> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(n) => Ok(Num::Int(n)),
            None => heap.raise(ErrorKind::Type, format!("integer overflow in {}", name)),
        },
        _ => Ok(Num::Real(real_op(a.as_f64(), b.as_f64()))),
    }
}

fn fold(
    heap: &mut Heap,
    name: &str,
    init: Num,
    nums: &[Num],
    int_op: fn(i64, i64) -> Option<i64>,
    real_op: fn(f64, f64) -> f64,
) -> Fallible {
    let mut acc = init;
    for &n in nums {
        acc = combine(heap, name, acc, n, int_op, real_op)?;
    }
    make_num(heap, acc)
}

/// (+ n ...): sum, `0` when empty.
fn prim_add(heap: &mut Heap, args: Value) -> Fallible {
    let nums = numbers(heap, args, 0, "+")?;
    fold(heap, "+", Num::Int(0), &nums, i64::checked_add, |x, y| x + y)
}

/// (* n ...): product, `1` when empty.
fn prim_mul(heap: &mut Heap, args: Value) -> Fallible {
    let nums = numbers(heap, args, 0, "*")?;
    fold(heap, "*", Num::Int(1), &nums, i64::checked_mul, |x, y| x * y)
}

/// (- n) negates; (- n m ...) subtracts left to right.
fn prim_sub(heap: &mut Heap, args: Value) -> Fallible {
    let nums = numbers(heap, args, 1, "-")?;
    match nums.as_slice() {
        [only] => fold(heap, "-", Num::Int(0), &[*only], i64::checked_sub, |x, y| x - y),
        [first, rest @ ..] => fold(heap, "-", *first, rest, i64::checked_sub, |x, y| x - y),
        [] => unreachable!("numbers() enforces at least one operand"),
    }
}

/// (/ n) is the reciprocal; (/ n m ...) divides left to right. Integer
/// division stays integral only when it is exact.
fn prim_div(heap: &mut Heap, args: Value) -> Fallible {
    let nums = numbers(heap, args, 1, "/")?;
    let (mut acc, rest) = match nums.as_slice() {
        [only] => (Num::Int(1), vec![*only]),
        [first, rest @ ..] => (*first, rest.to_vec()),
        [] => unreachable!("numbers() enforces at least one operand"),
    };
    for divisor in rest {
        if divisor.as_f64() == 0.0 {
            return heap.raise(ErrorKind::Type, "division by zero");
        }
        acc = match (acc, divisor) {
            (Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => Num::Int(x / y),
            _ => Num::Real(acc.as_f64() / divisor.as_f64()),
        };
    }
    make_num(heap, acc)
}

/// Chained numeric comparison: true when `test` holds for every adjacent
/// pair. Integers compare exactly; NaN compares false against anything.
fn compare(heap: &mut Heap, args: Value, name: &str, test: fn(Ordering) -> bool) -> Fallible {
    let nums = numbers(heap, args, 1, name)?;
    let holds = nums.windows(2).all(|w| {
        let ordering = match (w[0], w[1]) {
            (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        };
        ordering.map_or(false, test)
    });
    Ok(heap.boolean(holds))
}

fn prim_num_eq(heap: &mut Heap, args: Value) -> Fallible {
    compare(heap, args, "=", Ordering::is_eq)
}

fn prim_lt(heap: &mut Heap, args: Value) -> Fallible {
    compare(heap, args, "<", Ordering::is_lt)
}

fn prim_gt(heap: &mut Heap, args: Value) -> Fallible {
    compare(heap, args, ">", Ordering::is_gt)
}

fn prim_le(heap: &mut Heap, args: Value) -> Fallible {
    compare(heap, args, "<=", Ordering::is_le)
}

fn prim_ge(heap: &mut Heap, args: Value) -> Fallible {
    compare(heap, args, ">=", Ordering::is_ge)
}

// ============================================================================
// Pairs and lists
// ============================================================================

fn prim_car(heap: &mut Heap, args: Value) -> Fallible {
    let [pair] = fixed::<1>(heap, args, "car")?;
    match heap.as_pair(pair) {
        Some((car, _)) => Ok(car),
        None => wrong_type(heap, "car", "a pair", pair),
    }
}

fn prim_cdr(heap: &mut Heap, args: Value) -> Fallible {
    let [pair] = fixed::<1>(heap, args, "cdr")?;
    match heap.as_pair(pair) {
        Some((_, cdr)) => Ok(cdr),
        None => wrong_type(heap, "cdr", "a pair", pair),
    }
}

fn prim_cons(heap: &mut Heap, args: Value) -> Fallible {
    let [car, cdr] = fixed::<2>(heap, args, "cons")?;
    heap.cons(car, cdr)
}

/// (list x ...): a fresh copy of the argument list.
fn prim_list(heap: &mut Heap, args: Value) -> Fallible {
    at_least(heap, args, 0, "list")?;
    heap.append(args, Value::EMPTY_LIST)
}

fn prim_length(heap: &mut Heap, args: Value) -> Fallible {
    let [list] = fixed::<1>(heap, args, "length")?;
    match heap.list_len(list) {
        Some(len) => heap.make_int(len as i64),
        None => wrong_type(heap, "length", "a proper list", list),
    }
}

fn prim_set_car(heap: &mut Heap, args: Value) -> Fallible {
    let [pair, val] = fixed::<2>(heap, args, "set-car!")?;
    if !heap.is_pair(pair) {
        return wrong_type(heap, "set-car!", "a pair", pair);
    }
    heap.set_car(pair, val);
    Ok(Value::EMPTY_LIST)
}

fn prim_set_cdr(heap: &mut Heap, args: Value) -> Fallible {
    let [pair, val] = fixed::<2>(heap, args, "set-cdr!")?;
    if !heap.is_pair(pair) {
        return wrong_type(heap, "set-cdr!", "a pair", pair);
    }
    heap.set_cdr(pair, val);
    Ok(Value::EMPTY_LIST)
}

// ============================================================================
// Predicates
// ============================================================================

fn predicate(heap: &mut Heap, args: Value, name: &str, test: fn(&Heap, Value) -> bool) -> Fallible {
    let [x] = fixed::<1>(heap, args, name)?;
    Ok(heap.boolean(test(heap, x)))
}

fn prim_is_null(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "null?", |_, x| x.is_empty_list())
}

fn prim_is_pair(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "pair?", Heap::is_pair)
}

fn prim_is_symbol(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "symbol?", Heap::is_symbol)
}

fn prim_is_number(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "number?", Heap::is_number)
}

fn prim_is_integer(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "integer?", Heap::is_int)
}

fn prim_is_real(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "real?", Heap::is_real)
}

fn prim_is_string(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "string?", Heap::is_string)
}

fn prim_is_char(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "char?", Heap::is_char)
}

fn prim_is_boolean(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "boolean?", Heap::is_bool)
}

fn prim_is_procedure(heap: &mut Heap, args: Value) -> Fallible {
    predicate(heap, args, "procedure?", Heap::is_procedure)
}

/// The one primitive that looks at an Error operand instead of passing it on.
fn prim_is_error(heap: &mut Heap, args: Value) -> Fallible {
    let [x] = arity::<1>(heap, args, "error?")?;
    Ok(heap.boolean(heap.is_error(x)))
}

// ============================================================================
// Misc
// ============================================================================

/// (eq? a b): handle identity.
fn prim_eq(heap: &mut Heap, args: Value) -> Fallible {
    let [a, b] = fixed::<2>(heap, args, "eq?")?;
    Ok(heap.boolean(a == b))
}

fn prim_not(heap: &mut Heap, args: Value) -> Fallible {
    let [x] = fixed::<1>(heap, args, "not")?;
    Ok(heap.boolean(x.is_false()))
}

/// (error "message"): raise a UserError.
fn prim_error(heap: &mut Heap, args: Value) -> Fallible {
    let [msg] = fixed::<1>(heap, args, "error")?;
    if !heap.is_string(msg) {
        return wrong_type(heap, "error", "a string", msg);
    }
    let text = heap.text(msg).to_string();
    heap.raise(ErrorKind::User, text)
}

/// (gc): force a collection, returning how many cells it reclaimed.
fn prim_gc(heap: &mut Heap, args: Value) -> Fallible {
    let [] = fixed::<0>(heap, args, "gc")?;
    let stats = heap.collect();
    heap.make_int(stats.freed as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn heap() -> Heap {
        Heap::new(&Config::small())
    }

    fn ints(heap: &mut Heap, ns: &[i64]) -> Value {
        let vals: Vec<_> = ns.iter().map(|&n| heap.make_int(n).unwrap()).collect();
        heap.list(&vals).unwrap()
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        let mut heap = heap();
        let args = ints(&mut heap, &[1, 2, 3]);
        let sum = prim_add(&mut heap, args).unwrap();
        assert_eq!(heap.int(sum), 6);

        let args = ints(&mut heap, &[10, 4]);
        let diff = prim_sub(&mut heap, args).unwrap();
        assert_eq!(heap.int(diff), 6);

        let args = ints(&mut heap, &[5]);
        let neg = prim_sub(&mut heap, args).unwrap();
        assert_eq!(heap.int(neg), -5);

        let empty = prim_mul(&mut heap, Value::EMPTY_LIST).unwrap();
        assert_eq!(heap.int(empty), 1);
    }

    #[test]
    fn division_is_exact_or_real() {
        let mut heap = heap();
        let args = ints(&mut heap, &[12, 4]);
        let q = prim_div(&mut heap, args).unwrap();
        assert_eq!(heap.int(q), 3);

        let args = ints(&mut heap, &[7, 2]);
        let q = prim_div(&mut heap, args).unwrap();
        assert_eq!(heap.real(q), 3.5);

        let args = ints(&mut heap, &[1, 0]);
        let err = prim_div(&mut heap, args).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Type);
    }

    #[test]
    fn mixed_operands_promote_to_real() {
        let mut heap = heap();
        let one = heap.make_int(1).unwrap();
        let half = heap.make_real(0.5).unwrap();
        let args = heap.list(&[one, half]).unwrap();
        let sum = prim_add(&mut heap, args).unwrap();
        assert!(heap.is_real(sum));
        assert_eq!(heap.real(sum), 1.5);
    }

    #[test]
    fn comparisons_chain() {
        let mut heap = heap();
        let args = ints(&mut heap, &[1, 2, 3]);
        assert_eq!(prim_lt(&mut heap, args), Ok(Value::TRUE));
        let args = ints(&mut heap, &[1, 3, 2]);
        assert_eq!(prim_lt(&mut heap, args), Ok(Value::FALSE));
        let args = ints(&mut heap, &[2, 2]);
        assert_eq!(prim_num_eq(&mut heap, args), Ok(Value::TRUE));
        assert_eq!(prim_ge(&mut heap, args), Ok(Value::TRUE));
    }

    #[test]
    fn wrong_arity_and_type() {
        let mut heap = heap();
        let args = ints(&mut heap, &[1, 2]);
        let err = prim_car(&mut heap, args).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Arity);
        assert_eq!(heap.error_message(err), "car expects 1 argument(s), got 2");

        let args = ints(&mut heap, &[1]);
        let err = prim_car(&mut heap, args).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Type);
        assert_eq!(heap.error_message(err), "car expects a pair, got integer");

        let sym = heap.intern("x");
        let args = heap.list(&[sym]).unwrap();
        let err = prim_add(&mut heap, args).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::Type);
    }

    #[test]
    fn error_operands_pass_through_except_for_error_predicate() {
        let mut heap = heap();
        let err = heap.error(ErrorKind::User, "boom");
        let args = heap.list(&[err]).unwrap();
        assert_eq!(prim_car(&mut heap, args), Err(err));
        assert_eq!(prim_is_error(&mut heap, args), Ok(Value::TRUE));
    }

    #[test]
    fn error_primitive_raises_user_errors() {
        let mut heap = heap();
        let msg = heap.make_string("went wrong").unwrap();
        let args = heap.list(&[msg]).unwrap();
        let err = prim_error(&mut heap, args).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::User);
        assert_eq!(heap.error_message(err), "went wrong");
    }

    #[test]
    fn shims_return_errors_as_values() {
        let mut heap = heap();
        let car = native!(prim_car);
        let out = car(&mut heap, Value::EMPTY_LIST);
        assert!(heap.is_error(out));
    }

    #[test]
    fn install_binds_every_primitive() {
        let mut heap = heap();
        install(&mut heap).unwrap();
        let base = heap.base_env();
        for name in ["+", "car", "set-cdr!", "procedure?", "gc"] {
            let sym = heap.intern(name);
            let val = heap.find(base, sym).unwrap();
            assert_eq!(heap.foreign(val).0, name);
        }
    }
}
