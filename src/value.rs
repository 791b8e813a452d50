use std::fmt;
use std::rc::Rc;

use crate::heap::Heap;

/// Index into the cell arena. This is the GC handle.
/// Two handles are identical iff they name the same cell, which is what
/// symbol and sentinel identity rely on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub(crate) u32);

impl Value {
    /// The canonical empty list `()`.
    pub const EMPTY_LIST: Value = Value(0);
    /// The canonical `#t`.
    pub const TRUE: Value = Value(1);
    /// The canonical `#f`. The only falsy value.
    pub const FALSE: Value = Value(2);
    /// Shared sentinel returned whenever the arena is exhausted.
    pub const OUT_OF_MEMORY: Value = Value(3);

    /// Number of sentinel cells laid out before the collectible region.
    pub(crate) const SENTINELS: u32 = 4;

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_empty_list(self) -> bool {
        self == Value::EMPTY_LIST
    }

    /// Everything except the canonical false is truthy, including `0` and `()`.
    pub fn is_true(self) -> bool {
        self != Value::FALSE
    }

    pub fn is_false(self) -> bool {
        self == Value::FALSE
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::EMPTY_LIST => write!(f, "Value(())"),
            Value::TRUE => write!(f, "Value(#t)"),
            Value::FALSE => write!(f, "Value(#f)"),
            Value::OUT_OF_MEMORY => write!(f, "Value(oom)"),
            Value(id) => write!(f, "Value({})", id),
        }
    }
}

/// Native procedure calling convention: the already-evaluated argument list
/// comes in as one value, one value goes back. Failures are Error values.
pub type ForeignFn = fn(&mut Heap, Value) -> Value;

/// Failure taxonomy carried by Error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed special form shape or arity.
    Syntax,
    /// Failed lookup or `set!`.
    UnboundVariable,
    /// Procedure argument-count mismatch.
    Arity,
    /// Operand of the wrong variant.
    Type,
    /// Arena exhausted even after a collection.
    OutOfMemory,
    /// Raised explicitly by a program.
    User,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax-error",
            ErrorKind::UnboundVariable => "unbound-variable",
            ErrorKind::Arity => "arity-error",
            ErrorKind::Type => "type-error",
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::User => "user-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of one arena cell.
#[derive(Debug)]
pub enum Datum {
    /// Unused cell threaded on the freelist.
    Free { prev: Option<u32>, next: Option<u32> },
    EmptyList,
    Bool(bool),
    Int(i64),
    Real(f64),
    Char(u8),
    Str(String),
    Symbol(Rc<str>),
    Error(ErrorKind, String),
    Foreign { name: &'static str, func: ForeignFn },
    Pair(Value, Value),
    /// Procedure value: captured environment, parameter spec, body list.
    Closure { env: Value, params: Value, body: Value },
    /// One level of lexical bindings. `parent: None` is the root marker.
    Frame { parent: Option<Value>, names: Value, values: Value },
}

impl Datum {
    /// Handles this cell holds on to. Used by the collector's mark phase,
    /// and by `alloc` to keep a pending cell's operands alive.
    pub(crate) fn children(&self) -> [Option<Value>; 3] {
        match *self {
            Datum::Pair(car, cdr) => [Some(car), Some(cdr), None],
            Datum::Closure { env, params, body } => [Some(env), Some(params), Some(body)],
            Datum::Frame { parent, names, values } => [parent, Some(names), Some(values)],
            _ => [None, None, None],
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Datum::Free { .. })
    }

    /// Variant name for diagnostics and type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Free { .. } => "free cell",
            Datum::EmptyList => "empty list",
            Datum::Bool(_) => "boolean",
            Datum::Int(_) => "integer",
            Datum::Real(_) => "real",
            Datum::Char(_) => "character",
            Datum::Str(_) => "string",
            Datum::Symbol(_) => "symbol",
            Datum::Error(..) => "error",
            Datum::Foreign { .. } => "foreign function",
            Datum::Pair(..) => "pair",
            Datum::Closure { .. } => "closure",
            Datum::Frame { .. } => "environment",
        }
    }
}
