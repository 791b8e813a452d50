use crate::heap::Heap;
use crate::value::{Datum, Value};

/// Print a value to a string.
pub fn print_val(val: Value, heap: &Heap) -> String {
    let mut out = String::new();
    print_inner(val, heap, &mut out, 0);
    out
}

fn print_inner(val: Value, heap: &Heap, out: &mut String, depth: usize) {
    if depth > 1000 {
        out.push_str("...");
        return;
    }

    match heap.datum(val) {
        Datum::EmptyList => out.push_str("()"),
        Datum::Bool(true) => out.push_str("#t"),
        Datum::Bool(false) => out.push_str("#f"),
        Datum::Int(n) => out.push_str(&n.to_string()),
        Datum::Real(x) => out.push_str(&format!("{:.6}", x)),
        Datum::Char(c) => print_char(*c, out),
        Datum::Str(s) => print_string(s, out),
        Datum::Symbol(name) => out.push_str(name),
        Datum::Error(kind, msg) => out.push_str(&format!("#<error {}: {}>", kind, msg)),
        Datum::Foreign { name, .. } => out.push_str(&format!("#<foreign-function {}>", name)),
        Datum::Closure { .. } => out.push_str("#<closure>"),
        Datum::Frame { .. } => out.push_str("#<environment>"),
        Datum::Pair(car, cdr) => {
            out.push('(');
            print_inner(*car, heap, out, depth + 1);

            // `slow` follows at half speed; meeting it means the spine is
            // circular, and the rest is elided.
            let mut slow = val;
            let mut steps = 0usize;
            let mut current = *cdr;
            loop {
                match heap.datum(current) {
                    Datum::EmptyList => break,
                    Datum::Pair(..) if current == slow => {
                        out.push_str(" ...");
                        break;
                    }
                    Datum::Pair(car, cdr) => {
                        out.push(' ');
                        print_inner(*car, heap, out, depth + 1);
                        current = *cdr;
                        steps += 1;
                        if steps % 2 == 0 {
                            slow = heap.cdr(slow);
                        }
                    }
                    _ => {
                        out.push_str(" . ");
                        print_inner(current, heap, out, depth + 1);
                        break;
                    }
                }
            }
            out.push(')');
        }
        Datum::Free { .. } => panic!("printing reclaimed cell {:?}", val),
    }
}

fn print_char(c: u8, out: &mut String) {
    out.push_str("#\\");
    match c {
        b' ' => out.push_str("space"),
        b'\n' => out.push_str("newline"),
        b'\t' => out.push_str("tab"),
        c => out.push(c as char),
    }
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::value::ErrorKind;
    use pretty_assertions::assert_eq;

    fn heap() -> Heap {
        Heap::new(&Config::small())
    }

    #[test]
    fn prints_atoms() {
        let mut heap = heap();
        let cases = [
            (heap.make_int(-12).unwrap(), "-12"),
            (heap.make_real(42.0).unwrap(), "42.000000"),
            (heap.make_real(0.125).unwrap(), "0.125000"),
            (Value::TRUE, "#t"),
            (Value::FALSE, "#f"),
            (Value::EMPTY_LIST, "()"),
            (heap.intern("foo"), "foo"),
            (heap.make_char(b'x').unwrap(), "#\\x"),
            (heap.make_char(b' ').unwrap(), "#\\space"),
            (heap.make_char(b'\n').unwrap(), "#\\newline"),
        ];
        for (val, expected) in cases {
            assert_eq!(print_val(val, &heap), expected);
        }
    }

    #[test]
    fn prints_strings_escaped() {
        let mut heap = heap();
        let s = heap.make_string("say \"hi\"\n").unwrap();
        assert_eq!(print_val(s, &heap), r#""say \"hi\"\n""#);
    }

    #[test]
    fn prints_lists_and_dotted_pairs() {
        let mut heap = heap();
        let one = heap.make_int(1).unwrap();
        let two = heap.make_int(2).unwrap();
        let list = heap.list(&[one, two]).unwrap();
        assert_eq!(print_val(list, &heap), "(1 2)");

        let pair = heap.cons(one, two).unwrap();
        assert_eq!(print_val(pair, &heap), "(1 . 2)");

        let nested = heap.list(&[list, pair]).unwrap();
        assert_eq!(print_val(nested, &heap), "((1 2) (1 . 2))");
    }

    #[test]
    fn circular_lists_are_elided() {
        let mut heap = heap();
        let one = heap.make_int(1).unwrap();
        let two = heap.make_int(2).unwrap();
        let list = heap.list(&[one, two]).unwrap();
        let second = heap.cdr(list);
        heap.set_cdr(second, list);
        assert_eq!(print_val(list, &heap), "(1 2 ...)");

        let three = heap.make_int(3).unwrap();
        let longer = heap.list(&[one, two, three]).unwrap();
        let last = heap.cdr(heap.cdr(longer));
        heap.set_cdr(last, heap.cdr(longer));
        let printed = print_val(longer, &heap);
        assert!(printed.starts_with("(1 2 3"), "{}", printed);
        assert!(printed.ends_with(" ...)"), "{}", printed);
    }

    #[test]
    fn prints_opaque_values() {
        fn nothing(_: &mut Heap, _: Value) -> Value {
            Value::EMPTY_LIST
        }
        let mut heap = heap();
        let base = heap.base_env();
        assert_eq!(print_val(base, &heap), "#<environment>");

        let f = heap.foreign_fn("nothing", nothing);
        assert_eq!(print_val(f, &heap), "#<foreign-function nothing>");

        let body = heap.list(&[Value::TRUE]).unwrap();
        let clo = heap.closure(base, Value::EMPTY_LIST, body).unwrap();
        assert_eq!(print_val(clo, &heap), "#<closure>");

        let err = heap.error(ErrorKind::User, "bad thing");
        assert_eq!(print_val(err, &heap), "#<error user-error: bad thing>");
        assert_eq!(
            print_val(Value::OUT_OF_MEMORY, &heap),
            "#<error out-of-memory: out of memory>"
        );
    }
}
