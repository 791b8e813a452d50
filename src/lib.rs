//! A small Scheme runtime: a fixed-capacity cell arena reclaimed by a
//! mark-sweep collector, lexical environments, and a trampolined evaluator
//! whose tail calls run in constant native stack.

pub mod config;
pub mod env;
pub mod error;
pub mod eval;
pub mod heap;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod roots;
pub mod symbol;
pub mod syntax;
pub mod value;

pub use config::Config;
pub use error::{Fallible, SchemeError};
pub use eval::Machine;
pub use heap::{GcStats, Heap};
pub use roots::Root;
pub use value::{ErrorKind, ForeignFn, Value};
