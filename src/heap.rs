use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Fallible;
use crate::roots::{Root, RootStack};
use crate::symbol::SymbolTable;
use crate::value::{Datum, ErrorKind, ForeignFn, Value};

/// A single arena cell.
pub struct Cell {
    pub datum: Datum,
    mark: bool,
    /// Permanently live: sentinels, symbols, the base frame, installed
    /// foreign functions. Never swept.
    protect: bool,
}

impl Cell {
    fn new(datum: Datum, protect: bool) -> Self {
        Cell {
            datum,
            mark: false,
            protect,
        }
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Collections run on this heap so far, including this one.
    pub collections: u64,
    /// Cells reclaimed by this collection.
    pub freed: usize,
    /// Collectible cells still in use afterwards.
    pub live: usize,
}

/// The cell arena. Every runtime value is carved from here.
///
/// Layout: the four sentinels, then `capacity` collectible cells threaded on
/// an intrusive doubly linked freelist, then permanent cells appended on
/// demand. Permanent cells never enter the freelist.
pub struct Heap {
    cells: Vec<Cell>,
    /// Head of the freelist.
    free: Option<u32>,
    free_count: usize,
    capacity: usize,
    collections: u64,
    pub(crate) roots: RootStack,
    pub(crate) symbols: SymbolTable,
    pub(crate) base_env: Value,
    pub(crate) current_env: Value,
}

impl Heap {
    pub fn new(config: &Config) -> Self {
        let capacity = config.arena_cells;
        let start = Value::SENTINELS as usize;
        let mut cells = Vec::with_capacity(start + capacity + 256);

        cells.push(Cell::new(Datum::EmptyList, true));
        cells.push(Cell::new(Datum::Bool(true), true));
        cells.push(Cell::new(Datum::Bool(false), true));
        cells.push(Cell::new(
            Datum::Error(ErrorKind::OutOfMemory, "out of memory".to_string()),
            true,
        ));

        let end = start + capacity;
        for i in start..end {
            let prev = if i > start { Some(i as u32 - 1) } else { None };
            let next = if i + 1 < end { Some(i as u32 + 1) } else { None };
            cells.push(Cell::new(Datum::Free { prev, next }, false));
        }

        let mut heap = Heap {
            cells,
            free: if capacity > 0 { Some(start as u32) } else { None },
            free_count: capacity,
            capacity,
            collections: 0,
            roots: RootStack::new(config.root_slots),
            symbols: SymbolTable::new(),
            base_env: Value::FALSE,
            current_env: Value::FALSE,
        };

        let base = heap.alloc_permanent(Datum::Frame {
            parent: None,
            names: Value::EMPTY_LIST,
            values: Value::EMPTY_LIST,
        });
        heap.base_env = base;
        heap.current_env = base;
        heap
    }

    /// Throw away every cell, symbol and binding and start over with the
    /// same sizing. A final collection runs first.
    pub fn reset(&mut self) {
        if self.roots.depth() != 0 {
            panic!("heap reset with {} live root slots", self.roots.depth());
        }
        self.collect();
        let config = Config {
            arena_cells: self.capacity,
            root_slots: self.roots.capacity(),
        };
        *self = Heap::new(&config);
    }

    // === Allocation ===

    /// Allocate a cell holding `datum`.
    ///
    /// When the freelist is empty a full collection runs first, with the
    /// handles inside `datum` treated as roots, then allocation is retried
    /// once. Persistent exhaustion yields the shared out-of-memory sentinel.
    pub fn alloc(&mut self, datum: Datum) -> Fallible {
        if self.free.is_none() {
            let pending = datum.children();
            self.collect_with(pending.iter().flatten().copied());
        }
        match self.pop_free() {
            Some(idx) => {
                let cell = &mut self.cells[idx as usize];
                cell.datum = datum;
                cell.mark = false;
                Ok(Value(idx))
            }
            None => {
                warn!(capacity = self.capacity, "arena exhausted after collection");
                Err(Value::OUT_OF_MEMORY)
            }
        }
    }

    /// Append a protected cell outside the collectible region.
    pub(crate) fn alloc_permanent(&mut self, datum: Datum) -> Value {
        let id = self.cells.len() as u32;
        self.cells.push(Cell::new(datum, true));
        Value(id)
    }

    fn pop_free(&mut self) -> Option<u32> {
        let head = self.free?;
        let next = match self.cells[head as usize].datum {
            Datum::Free { next, .. } => next,
            ref other => panic!("freelist corrupted: cell {} holds a {}", head, other.type_name()),
        };
        if let Some(n) = next {
            if let Datum::Free { prev, .. } = &mut self.cells[n as usize].datum {
                *prev = None;
            }
        }
        self.free = next;
        self.free_count -= 1;
        Some(head)
    }

    /// Link `idx` in at the head of the freelist. Overwriting the datum
    /// drops whatever text buffer the cell owned.
    fn push_free(&mut self, idx: u32) {
        let old_head = self.free;
        if let Some(h) = old_head {
            if let Datum::Free { prev, .. } = &mut self.cells[h as usize].datum {
                *prev = Some(idx);
            }
        }
        self.cells[idx as usize].datum = Datum::Free {
            prev: None,
            next: old_head,
        };
        self.free = Some(idx);
        self.free_count += 1;
    }

    // === Root protection ===

    /// Register `val` as live until the returned slot is released.
    pub fn acquire(&mut self, val: Value) -> Root {
        self.roots.push(val)
    }

    /// Deregister the most recently acquired slot, returning its contents.
    pub fn release(&mut self, root: Root) -> Value {
        self.roots.pop(root)
    }

    #[inline]
    pub fn get(&self, root: &Root) -> Value {
        self.roots.get(root)
    }

    #[inline]
    pub fn put(&mut self, root: &Root, val: Value) {
        self.roots.set(root, val)
    }

    /// Run `f` with `val` held in a fresh root slot. The slot is released
    /// when `f` returns, on every path.
    pub fn rooted<T>(&mut self, val: Value, f: impl FnOnce(&mut Heap, &Root) -> T) -> T {
        let root = self.roots.push(val);
        let out = f(self, &root);
        self.roots.pop(root);
        out
    }

    pub fn root_depth(&self) -> usize {
        self.roots.depth()
    }

    // === GC ===

    /// Run a full mark-sweep collection.
    pub fn collect(&mut self) -> GcStats {
        self.collect_with(std::iter::empty())
    }

    fn collect_with(&mut self, extra: impl IntoIterator<Item = Value>) -> GcStats {
        self.clear_marks();
        let mut worklist = Vec::new();

        for i in 0..self.cells.len() {
            if self.cells[i].protect {
                mark_value(&mut self.cells, Value(i as u32), &mut worklist);
            }
        }
        for val in self.roots.iter() {
            mark_value(&mut self.cells, val, &mut worklist);
        }
        mark_value(&mut self.cells, self.base_env, &mut worklist);
        mark_value(&mut self.cells, self.current_env, &mut worklist);
        for val in extra {
            mark_value(&mut self.cells, val, &mut worklist);
        }

        process_worklist(&mut self.cells, &mut worklist);
        let freed = self.sweep();

        self.collections += 1;
        let stats = GcStats {
            collections: self.collections,
            freed,
            live: self.capacity - self.free_count,
        };
        debug!(
            collection = stats.collections,
            freed = stats.freed,
            live = stats.live,
            "garbage collection finished"
        );
        stats
    }

    fn clear_marks(&mut self) {
        for cell in &mut self.cells {
            cell.mark = false;
        }
    }

    /// Rebuild the freelist from every unmarked, unprotected collectible
    /// cell. Returns how many in-use cells were reclaimed.
    fn sweep(&mut self) -> usize {
        self.free = None;
        self.free_count = 0;
        let mut freed = 0;

        let start = Value::SENTINELS as usize;
        // Walk backwards so the lowest free index ends up at the head.
        for i in (start..start + self.capacity).rev() {
            let cell = &self.cells[i];
            if cell.mark || cell.protect {
                continue;
            }
            if !cell.datum.is_free() {
                freed += 1;
            }
            self.push_free(i as u32);
        }
        freed
    }

    // === Introspection ===

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Collectible cells currently on the freelist.
    pub fn free_cells(&self) -> usize {
        self.free_count
    }

    /// Collectible cells currently in use.
    pub fn live_cells(&self) -> usize {
        self.capacity - self.free_count
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// False once the cell behind `val` has been reclaimed.
    pub fn is_live(&self, val: Value) -> bool {
        self.cells
            .get(val.index())
            .map(|c| !c.datum.is_free())
            .unwrap_or(false)
    }

    /// Raw payload of a cell.
    #[inline]
    pub fn datum(&self, val: Value) -> &Datum {
        &self.cells[val.index()].datum
    }

    // === Predicates ===

    pub fn is_pair(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Pair(..))
    }

    pub fn is_symbol(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Symbol(_))
    }

    pub fn is_int(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Int(_))
    }

    pub fn is_real(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Real(_))
    }

    pub fn is_number(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Int(_) | Datum::Real(_))
    }

    pub fn is_char(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Char(_))
    }

    pub fn is_string(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Str(_))
    }

    pub fn is_bool(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Bool(_))
    }

    pub fn is_error(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Error(..))
    }

    pub fn is_foreign(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Foreign { .. })
    }

    pub fn is_closure(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Closure { .. })
    }

    pub fn is_frame(&self, val: Value) -> bool {
        matches!(self.datum(val), Datum::Frame { .. })
    }

    pub fn is_procedure(&self, val: Value) -> bool {
        self.is_closure(val) || self.is_foreign(val)
    }

    // === Accessors ===
    // Each requires the matching variant; anything else is a host bug.

    fn mismatch(&self, val: Value, wanted: &str) -> ! {
        panic!(
            "expected {} but {:?} is a {}",
            wanted,
            val,
            self.datum(val).type_name()
        )
    }

    #[inline]
    pub fn car(&self, val: Value) -> Value {
        match *self.datum(val) {
            Datum::Pair(car, _) => car,
            _ => self.mismatch(val, "pair"),
        }
    }

    #[inline]
    pub fn cdr(&self, val: Value) -> Value {
        match *self.datum(val) {
            Datum::Pair(_, cdr) => cdr,
            _ => self.mismatch(val, "pair"),
        }
    }

    /// `(car, cdr)` if `val` is a pair.
    #[inline]
    pub fn as_pair(&self, val: Value) -> Option<(Value, Value)> {
        match *self.datum(val) {
            Datum::Pair(car, cdr) => Some((car, cdr)),
            _ => None,
        }
    }

    pub fn int(&self, val: Value) -> i64 {
        match *self.datum(val) {
            Datum::Int(n) => n,
            _ => self.mismatch(val, "integer"),
        }
    }

    pub fn real(&self, val: Value) -> f64 {
        match *self.datum(val) {
            Datum::Real(x) => x,
            _ => self.mismatch(val, "real"),
        }
    }

    pub fn char(&self, val: Value) -> u8 {
        match *self.datum(val) {
            Datum::Char(c) => c,
            _ => self.mismatch(val, "character"),
        }
    }

    pub fn boolean_value(&self, val: Value) -> bool {
        match *self.datum(val) {
            Datum::Bool(b) => b,
            _ => self.mismatch(val, "boolean"),
        }
    }

    /// Contents of a string.
    pub fn text(&self, val: Value) -> &str {
        match self.datum(val) {
            Datum::Str(s) => s,
            _ => self.mismatch(val, "string"),
        }
    }

    pub fn symbol_name(&self, val: Value) -> &str {
        match self.datum(val) {
            Datum::Symbol(name) => name,
            _ => self.mismatch(val, "symbol"),
        }
    }

    pub fn error_kind(&self, val: Value) -> ErrorKind {
        match self.datum(val) {
            Datum::Error(kind, _) => *kind,
            _ => self.mismatch(val, "error"),
        }
    }

    pub fn error_message(&self, val: Value) -> &str {
        match self.datum(val) {
            Datum::Error(_, msg) => msg,
            _ => self.mismatch(val, "error"),
        }
    }

    pub fn foreign(&self, val: Value) -> (&'static str, ForeignFn) {
        match *self.datum(val) {
            Datum::Foreign { name, func } => (name, func),
            _ => self.mismatch(val, "foreign function"),
        }
    }

    /// `(env, params, body)` of a closure.
    pub fn closure_parts(&self, val: Value) -> (Value, Value, Value) {
        match *self.datum(val) {
            Datum::Closure { env, params, body } => (env, params, body),
            _ => self.mismatch(val, "closure"),
        }
    }

    /// `(parent, names, values)` of an environment frame.
    pub fn frame_parts(&self, val: Value) -> (Option<Value>, Value, Value) {
        match *self.datum(val) {
            Datum::Frame {
                parent,
                names,
                values,
            } => (parent, names, values),
            _ => self.mismatch(val, "environment"),
        }
    }

    // === Mutators ===

    pub fn set_car(&mut self, pair: Value, val: Value) {
        if let Datum::Pair(car, _) = &mut self.cells[pair.index()].datum {
            *car = val;
            return;
        }
        self.mismatch(pair, "pair")
    }

    pub fn set_cdr(&mut self, pair: Value, val: Value) {
        if let Datum::Pair(_, cdr) = &mut self.cells[pair.index()].datum {
            *cdr = val;
            return;
        }
        self.mismatch(pair, "pair")
    }

    pub(crate) fn set_frame_bindings(&mut self, frame: Value, new_names: Value, new_values: Value) {
        if let Datum::Frame { names, values, .. } = &mut self.cells[frame.index()].datum {
            *names = new_names;
            *values = new_values;
            return;
        }
        self.mismatch(frame, "environment")
    }

    // === Constructors ===

    pub fn cons(&mut self, car: Value, cdr: Value) -> Fallible {
        self.alloc(Datum::Pair(car, cdr))
    }

    pub fn make_int(&mut self, n: i64) -> Fallible {
        self.alloc(Datum::Int(n))
    }

    pub fn make_real(&mut self, x: f64) -> Fallible {
        self.alloc(Datum::Real(x))
    }

    pub fn make_char(&mut self, c: u8) -> Fallible {
        self.alloc(Datum::Char(c))
    }

    pub fn make_string(&mut self, s: impl Into<String>) -> Fallible {
        self.alloc(Datum::Str(s.into()))
    }

    /// The canonical boolean. Never allocates.
    pub fn boolean(&self, b: bool) -> Value {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    pub fn closure(&mut self, env: Value, params: Value, body: Value) -> Fallible {
        self.alloc(Datum::Closure { env, params, body })
    }

    pub fn frame(&mut self, parent: Option<Value>, names: Value, values: Value) -> Fallible {
        self.alloc(Datum::Frame {
            parent,
            names,
            values,
        })
    }

    /// Build an Error value. If even that allocation fails the shared
    /// out-of-memory sentinel comes back instead.
    pub fn error(&mut self, kind: ErrorKind, msg: impl Into<String>) -> Value {
        if kind == ErrorKind::OutOfMemory {
            return Value::OUT_OF_MEMORY;
        }
        match self.alloc(Datum::Error(kind, msg.into())) {
            Ok(err) => err,
            Err(oom) => oom,
        }
    }

    /// `Err` carrying a fresh Error value, for use with `?`.
    pub fn raise<T>(&mut self, kind: ErrorKind, msg: impl Into<String>) -> Fallible<T> {
        Err(self.error(kind, msg))
    }

    /// A permanent foreign function value.
    pub fn foreign_fn(&mut self, name: &'static str, func: ForeignFn) -> Value {
        self.alloc_permanent(Datum::Foreign { name, func })
    }

    // === Lists ===

    /// Build a proper list from a slice of values. Every element is rooted
    /// while the spine is built.
    pub fn list(&mut self, items: &[Value]) -> Fallible {
        let roots: Vec<Root> = items.iter().map(|&v| self.roots.push(v)).collect();
        let mut result = Ok(Value::EMPTY_LIST);
        let mut acc = Value::EMPTY_LIST;
        for &item in items.iter().rev() {
            match self.cons(item, acc) {
                Ok(pair) => acc = pair,
                Err(oom) => {
                    result = Err(oom);
                    break;
                }
            }
        }
        for root in roots.into_iter().rev() {
            self.roots.pop(root);
        }
        result.map(|_| acc)
    }

    /// Walk the spine of `val`, handing each car to `visit`, and return
    /// whatever ends the spine: `()` for a proper list, the final cdr for a
    /// dotted one. `None` if the spine loops back on itself.
    ///
    /// Cycles are caught with a second cursor moving at half speed, so the
    /// walk never visits more than twice the number of distinct pairs.
    pub fn walk_spine(&self, val: Value, mut visit: impl FnMut(Value)) -> Option<Value> {
        let mut slow = val;
        let mut fast = val;
        loop {
            for _ in 0..2 {
                match *self.datum(fast) {
                    Datum::Pair(car, cdr) => {
                        visit(car);
                        fast = cdr;
                    }
                    _ => return Some(fast),
                }
            }
            // `slow` trails `fast` over cells already seen to be pairs.
            slow = self.cdr(slow);
            if slow == fast {
                return None;
            }
        }
    }

    /// Length of a proper list, `None` for anything else (cyclic included).
    pub fn list_len(&self, val: Value) -> Option<usize> {
        let mut count = 0;
        let end = self.walk_spine(val, |_| count += 1);
        match end {
            Some(end) if end.is_empty_list() => Some(count),
            _ => None,
        }
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    /// The Vec is invisible to the collector; don't allocate while holding
    /// it unless the list itself stays reachable.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let end = self.walk_spine(val, |car| result.push(car));
        match end {
            Some(end) if end.is_empty_list() => Some(result),
            _ => None,
        }
    }

    /// A fresh copy of the proper list `front` ending in `back`.
    pub fn append(&mut self, front: Value, back: Value) -> Fallible {
        if front.is_empty_list() {
            return Ok(back);
        }
        let items = match self.list_to_vec(front) {
            Some(items) => items,
            None => return self.raise(ErrorKind::Type, "cannot splice an improper list"),
        };
        self.rooted(front, |heap, _| {
            heap.rooted(back, |heap, acc| {
                for &item in items.iter().rev() {
                    let pair = heap.cons(item, heap.get(acc))?;
                    heap.put(acc, pair);
                }
                Ok(heap.get(acc))
            })
        })
    }
}

/// Mark a value as reachable and queue it for scanning.
fn mark_value(cells: &mut [Cell], val: Value, worklist: &mut Vec<u32>) {
    let cell = &mut cells[val.index()];
    if !cell.mark {
        debug_assert!(!cell.datum.is_free(), "live reference to free cell {:?}", val);
        cell.mark = true;
        worklist.push(val.0);
    }
}

/// Drain the worklist, marking children. Bounded by the number of cells,
/// never by structure depth.
fn process_worklist(cells: &mut [Cell], worklist: &mut Vec<u32>) {
    while let Some(id) = worklist.pop() {
        let children = cells[id as usize].datum.children();
        for child in children.into_iter().flatten() {
            mark_value(cells, child, worklist);
        }
    }
}
