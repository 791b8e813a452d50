use thiserror::Error;

use crate::heap::Heap;
use crate::value::{ErrorKind, Value};

/// Result type used throughout the runtime. The `Err` side is always an
/// Error value living in the arena, so `?` hands it up unmodified.
pub type Fallible<T = Value> = Result<T, Value>;

/// Errors reported to host code at the crate boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemeError {
    /// Source text could not be turned into a datum.
    #[error("read error: {0}")]
    Read(String),

    /// Evaluation produced an Error value.
    #[error("{kind}: {message}")]
    Eval { kind: ErrorKind, message: String },

    /// The arena stayed exhausted after a collection.
    #[error("out of memory")]
    OutOfMemory,
}

impl SchemeError {
    /// Copy an Error value out of the arena.
    pub fn from_value(heap: &Heap, err: Value) -> Self {
        match heap.error_kind(err) {
            ErrorKind::OutOfMemory => SchemeError::OutOfMemory,
            kind => SchemeError::Eval {
                kind,
                message: heap.error_message(err).to_string(),
            },
        }
    }

    /// The evaluation error kind, if this came from an Error value.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SchemeError::Read(_) => None,
            SchemeError::Eval { kind, .. } => Some(*kind),
            SchemeError::OutOfMemory => Some(ErrorKind::OutOfMemory),
        }
    }
}
