use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{Datum, Value};

/// Interned symbol table. Each unique name maps to exactly one protected
/// symbol cell, so `(eq? 'foo 'foo)` holds because both reads hand back the
/// same handle. Entries live for the lifetime of the heap and are never
/// collected.
#[derive(Default)]
pub struct SymbolTable {
    by_name: HashMap<Rc<str>, Value>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            by_name: HashMap::new(),
        }
    }

    /// Look up a symbol by name without interning it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.by_name.get(name).copied()
    }

    /// Record the canonical cell for `name`.
    pub(crate) fn insert(&mut self, name: Rc<str>, cell: Value) {
        self.by_name.insert(name, cell);
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.by_name.len()
    }
}

impl crate::heap::Heap {
    /// Intern a symbol name. Returns the existing cell if already interned,
    /// or creates a new permanent one. Interning never consumes collectible
    /// arena capacity, so it cannot fail.
    pub fn intern(&mut self, name: &str) -> Value {
        if let Some(sym) = self.symbols.lookup(name) {
            return sym;
        }
        let name: Rc<str> = Rc::from(name);
        let sym = self.alloc_permanent(Datum::Symbol(name.clone()));
        self.symbols.insert(name, sym);
        sym
    }

    /// Look up an interned symbol without creating it.
    pub fn find_symbol(&self, name: &str) -> Option<Value> {
        self.symbols.lookup(name)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.count()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::heap::Heap;

    #[test]
    fn same_name_same_handle() {
        let mut heap = Heap::new(&Config::small());
        let a = heap.intern("symbol");
        let b = heap.intern("symbol");
        assert_eq!(a, b);
        assert_eq!(heap.symbol_name(a), "symbol");
        assert_ne!(heap.intern("other"), a);
    }

    #[test]
    fn every_ascii_name_is_stable() {
        let mut heap = Heap::new(&Config::small());
        let first: Vec<_> = (0u8..128)
            .map(|b| heap.intern(&(b as char).to_string()))
            .collect();
        for b in 0u8..128 {
            assert_eq!(heap.intern(&(b as char).to_string()), first[b as usize]);
        }
    }

    #[test]
    fn interning_survives_collection_and_uses_no_arena_capacity() {
        let mut heap = Heap::new(&Config::small());
        let free_before = heap.free_cells();
        let sym = heap.intern("kept");
        assert_eq!(heap.free_cells(), free_before);
        heap.collect();
        assert!(heap.is_symbol(sym));
        assert_eq!(heap.find_symbol("kept"), Some(sym));
    }
}
