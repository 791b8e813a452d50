use crate::error::SchemeError;
use crate::heap::Heap;
use crate::roots::Root;
use crate::value::Value;

/// Reader: parses source text into `Value` trees in the arena.
///
/// Lists under construction are held in a root slot, so a collection
/// triggered halfway through a long literal cannot reclaim its head.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    heap: &'a mut Heap,
}

fn read_error<T>(msg: impl Into<String>) -> Result<T, SchemeError> {
    Err(SchemeError::Read(msg.into()))
}

/// Constructors here only ever fail by exhausting the arena.
fn oom(_: Value) -> SchemeError {
    SchemeError::OutOfMemory
}

fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')' | b'"' | b';' | b'\'' | b'`' | b','
    )
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap) -> Self {
        Reader::starting_at(input, 0, heap)
    }

    /// Resume reading `input` from byte offset `pos`.
    pub fn starting_at(input: &'a str, pos: usize, heap: &'a mut Heap) -> Self {
        Reader {
            input: input.as_bytes(),
            pos,
            heap,
        }
    }

    /// Read one expression. Returns None at EOF.
    pub fn read(&mut self) -> Result<Option<Value>, SchemeError> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let val = self.read_expr()?;
        Ok(Some(val))
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            match ch {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b';' => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_expr(&mut self) -> Result<Value, SchemeError> {
        self.skip_whitespace_and_comments();

        let ch = match self.peek() {
            Some(ch) => ch,
            None => return read_error("unexpected EOF"),
        };

        match ch {
            b'(' => self.read_list(),
            b')' => read_error("unexpected ')'"),
            b'\'' => self.read_prefixed("quote", 1),
            b'`' => self.read_prefixed("quasiquote", 1),
            b',' if self.input.get(self.pos + 1) == Some(&b'@') => {
                self.read_prefixed("unquote-splicing", 2)
            }
            b',' => self.read_prefixed("unquote", 1),
            b'"' => self.read_string(),
            b'#' => self.read_hash(),
            _ => self.read_atom(),
        }
    }

    /// Read a list: (a b c) or (a . b) or (a b . c)
    fn read_list(&mut self) -> Result<Value, SchemeError> {
        self.advance(); // consume '('
        let head = self.heap.acquire(Value::EMPTY_LIST);
        let result = self.read_list_items(&head);
        let list = self.heap.release(head);
        result.map(|_| list)
    }

    fn read_list_items(&mut self, head: &Root) -> Result<(), SchemeError> {
        let mut tail: Option<Value> = None;
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return read_error("unterminated list"),
                Some(b')') => {
                    self.advance();
                    return Ok(());
                }
                Some(b'.') if self.is_dot_separator() => {
                    let last = match tail {
                        Some(last) => last,
                        None => return read_error("nothing before '.' in list"),
                    };
                    self.advance(); // consume '.'
                    let rest = self.read_expr()?;
                    self.heap.set_cdr(last, rest);
                    self.skip_whitespace_and_comments();
                    if self.advance() != Some(b')') {
                        return read_error("expected ')' after dotted tail");
                    }
                    return Ok(());
                }
                Some(_) => {
                    let item = self.read_expr()?;
                    let cell = self.heap.cons(item, Value::EMPTY_LIST).map_err(oom)?;
                    match tail {
                        Some(last) => self.heap.set_cdr(last, cell),
                        None => self.heap.put(head, cell),
                    }
                    tail = Some(cell);
                }
            }
        }
    }

    /// A '.' on its own, as opposed to the start of `.5` or `...`.
    fn is_dot_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(&next) => is_delimiter(next),
        }
    }

    /// 'x, `x, ,x and ,@x: skip `width` bytes of prefix, then wrap the
    /// next datum as `(tag datum)`.
    fn read_prefixed(&mut self, tag: &str, width: usize) -> Result<Value, SchemeError> {
        self.pos += width;
        let tag = self.heap.intern(tag);
        let expr = self.read_expr()?;
        self.heap.list(&[tag, expr]).map_err(oom)
    }

    /// Read a string literal with `\n \t \r \\ \"` escapes.
    fn read_string(&mut self) -> Result<Value, SchemeError> {
        self.advance(); // consume '"'
        let mut bytes = Vec::new();

        loop {
            let ch = match self.advance() {
                Some(ch) => ch,
                None => return read_error("unterminated string"),
            };
            match ch {
                b'"' => break,
                b'\\' => {
                    let escaped = match self.advance() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'r') => b'\r',
                        Some(b'\\') => b'\\',
                        Some(b'"') => b'"',
                        Some(other) => {
                            return read_error(format!("unknown escape \\{}", other as char))
                        }
                        None => return read_error("unterminated string"),
                    };
                    bytes.push(escaped);
                }
                c => bytes.push(c),
            }
        }

        match String::from_utf8(bytes) {
            Ok(text) => self.heap.make_string(text).map_err(oom),
            Err(_) => read_error("string is not valid UTF-8"),
        }
    }

    /// `#t`, `#f` and character literals.
    fn read_hash(&mut self) -> Result<Value, SchemeError> {
        self.advance(); // consume '#'
        match self.advance() {
            Some(b'\\') => self.read_char(),
            Some(b't') if self.at_delimiter() => Ok(Value::TRUE),
            Some(b'f') if self.at_delimiter() => Ok(Value::FALSE),
            _ => read_error("unknown # syntax"),
        }
    }

    fn at_delimiter(&self) -> bool {
        self.peek().map_or(true, is_delimiter)
    }

    /// After `#\`: a single character, or `space` / `newline` / `tab`.
    fn read_char(&mut self) -> Result<Value, SchemeError> {
        let start = self.pos;
        if self.advance().is_none() {
            return read_error("unterminated character literal");
        }
        while !self.at_delimiter() {
            self.pos += 1;
        }
        let c = match &self.input[start..self.pos] {
            [single] => *single,
            b"space" => b' ',
            b"newline" => b'\n',
            b"tab" => b'\t',
            other => {
                let name = String::from_utf8_lossy(other).into_owned();
                return read_error(format!("unknown character name: {}", name));
            }
        };
        self.heap.make_char(c).map_err(oom)
    }

    /// Read a number or a symbol.
    fn read_atom(&mut self) -> Result<Value, SchemeError> {
        let start = self.pos;
        while !self.at_delimiter() {
            self.pos += 1;
        }
        let token = match std::str::from_utf8(&self.input[start..self.pos]) {
            Ok(token) => token,
            Err(_) => return read_error("symbol is not valid UTF-8"),
        };

        if looks_numeric(token) {
            if let Ok(n) = token.parse::<i64>() {
                return self.heap.make_int(n).map_err(oom);
            }
            if let Ok(x) = token.parse::<f64>() {
                return self.heap.make_real(x).map_err(oom);
            }
            return read_error(format!("malformed number: {}", token));
        }
        Ok(self.heap.intern(token))
    }
}

/// A digit first, or a sign or '.' followed by a digit. Keeps `+`, `-`,
/// `...` and names like `inf` as symbols.
fn looks_numeric(token: &str) -> bool {
    let bytes = token.as_bytes();
    match bytes {
        [first, ..] if first.is_ascii_digit() => true,
        [b'+' | b'-' | b'.', second, ..] if second.is_ascii_digit() => true,
        [b'+' | b'-', b'.', third, ..] if third.is_ascii_digit() => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::printer::print_val;
    use pretty_assertions::assert_eq;

    fn heap() -> Heap {
        Heap::new(&Config::small())
    }

    fn read_one(heap: &mut Heap, src: &str) -> Value {
        Reader::new(src, heap).read().unwrap().unwrap()
    }

    fn round_trip(src: &str) -> String {
        let mut heap = heap();
        let val = read_one(&mut heap, src);
        print_val(val, &heap)
    }

    #[test]
    fn reads_numbers() {
        let mut heap = heap();
        let v = read_one(&mut heap, "42");
        assert_eq!(heap.int(v), 42);
        let v = read_one(&mut heap, "-7");
        assert_eq!(heap.int(v), -7);
        let v = read_one(&mut heap, "1.5");
        assert_eq!(heap.real(v), 1.5);
        let v = read_one(&mut heap, "-2.0");
        assert_eq!(heap.real(v), -2.0);
        let v = read_one(&mut heap, ".5");
        assert_eq!(heap.real(v), 0.5);
    }

    #[test]
    fn signs_and_dots_alone_are_symbols() {
        let mut heap = heap();
        for name in ["+", "-", "...", "inf", "set!"] {
            let v = read_one(&mut heap, name);
            assert_eq!(heap.symbol_name(v), name);
        }
    }

    #[test]
    fn symbols_are_interned() {
        let mut heap = heap();
        let a = read_one(&mut heap, "x");
        let b = read_one(&mut heap, "x");
        assert_eq!(a, b);
    }

    #[test]
    fn reads_booleans_and_characters() {
        let mut heap = heap();
        assert_eq!(read_one(&mut heap, "#t"), Value::TRUE);
        assert_eq!(read_one(&mut heap, "#f"), Value::FALSE);
        let c = read_one(&mut heap, "#\\a");
        assert_eq!(heap.char(c), b'a');
        let c = read_one(&mut heap, "#\\space");
        assert_eq!(heap.char(c), b' ');
        let c = read_one(&mut heap, "#\\newline");
        assert_eq!(heap.char(c), b'\n');
        let c = read_one(&mut heap, "#\\(");
        assert_eq!(heap.char(c), b'(');
    }

    #[test]
    fn reads_strings_with_escapes() {
        let mut heap = heap();
        let s = read_one(&mut heap, r#""a\"b\\c\nd""#);
        assert_eq!(heap.text(s), "a\"b\\c\nd");
    }

    #[test]
    fn reads_lists() {
        assert_eq!(round_trip("(1 2 3)"), "(1 2 3)");
        assert_eq!(round_trip("()"), "()");
        assert_eq!(round_trip("(a . b)"), "(a . b)");
        assert_eq!(round_trip("(a b . c)"), "(a b . c)");
        assert_eq!(round_trip("((1) (2 (3)))"), "((1) (2 (3)))");
    }

    #[test]
    fn expands_quote_shorthands() {
        assert_eq!(round_trip("'x"), "(quote x)");
        assert_eq!(round_trip("`(a ,b ,@c)"), "(quasiquote (a (unquote b) (unquote-splicing c)))");
    }

    #[test]
    fn skips_comments() {
        let mut heap = heap();
        let src = "; leading\n  (1 ; inside\n 2)";
        let v = read_one(&mut heap, src);
        assert_eq!(heap.list_len(v), Some(2));
    }

    #[test]
    fn reads_successive_data_and_reports_eof() {
        let mut heap = heap();
        let mut reader = Reader::new("1 2", &mut heap);
        assert!(reader.read().unwrap().is_some());
        assert!(reader.read().unwrap().is_some());
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn malformed_input_is_a_read_error() {
        for src in ["(1 2", ")", "(. x)", "(1 . 2 3)", "\"open", "#q", "#\\bogus"] {
            let mut heap = heap();
            let err = Reader::new(src, &mut heap).read().unwrap_err();
            assert!(matches!(err, SchemeError::Read(_)), "{}: {:?}", src, err);
        }
    }

    #[test]
    fn long_literals_survive_collection_midway() {
        let mut heap = Heap::new(&Config::small().with_arena_cells(300));
        let src = format!("({})", vec!["1"; 120].join(" "));
        for _ in 0..3 {
            let v = read_one(&mut heap, &src);
            assert_eq!(heap.list_len(v), Some(120));
        }
        assert!(heap.collections() > 0);
        assert_eq!(heap.root_depth(), 0);
    }
}
