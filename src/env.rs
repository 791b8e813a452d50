//! Lexical environments.
//!
//! A frame is a `Frame { parent, names, values }` cell: `names` and `values`
//! are equal-length lists, position *i* of one binding position *i* of the
//! other. Frames chain outward to the base frame, whose parent is the root
//! marker (`None`).

use tracing::trace;

use crate::error::Fallible;
use crate::heap::Heap;
use crate::value::{Datum, ErrorKind, Value};

impl Heap {
    /// The global frame. Permanent.
    pub fn base_env(&self) -> Value {
        self.base_env
    }

    /// The frame evaluation currently resolves names in.
    pub fn current_env(&self) -> Value {
        self.current_env
    }

    pub fn set_current_env(&mut self, env: Value) {
        debug_assert!(self.is_frame(env), "current environment must be a frame");
        self.current_env = env;
    }

    /// Make a child of the current frame binding `names` to `values`, and
    /// switch to it.
    pub fn push_frame(&mut self, names: Value, values: Value) -> Fallible {
        let parent = self.current_env;
        let frame = self.frame(Some(parent), names, values)?;
        trace!(?frame, ?parent, "push frame");
        self.current_env = frame;
        Ok(frame)
    }

    /// Return to the parent of the current frame.
    pub fn pop_frame(&mut self) {
        let (parent, _, _) = self.frame_parts(self.current_env);
        match parent {
            Some(parent) => {
                trace!(frame = ?self.current_env, ?parent, "pop frame");
                self.current_env = parent;
            }
            None => panic!("cannot pop the base frame"),
        }
    }

    /// The `values` cell whose car holds `sym`'s value in this one frame.
    fn local_slot(&self, frame: Value, sym: Value) -> Option<Value> {
        let (_, mut names, mut values) = self.frame_parts(frame);
        while let (&Datum::Pair(name, next_name), &Datum::Pair(_, next_value)) =
            (self.datum(names), self.datum(values))
        {
            if name == sym {
                return Some(values);
            }
            names = next_name;
            values = next_value;
        }
        None
    }

    /// Walk outward from `env` to the first frame binding `sym`.
    fn chain_slot(&self, env: Value, sym: Value) -> Option<Value> {
        let mut frame = Some(env);
        while let Some(current) = frame {
            if let Some(slot) = self.local_slot(current, sym) {
                return Some(slot);
            }
            frame = self.frame_parts(current).0;
        }
        None
    }

    /// Non-allocating lookup.
    pub fn find(&self, env: Value, sym: Value) -> Option<Value> {
        self.chain_slot(env, sym).map(|slot| self.car(slot))
    }

    /// Resolve `sym` from `env` outward; unbound names yield an
    /// `UnboundVariable` error naming the symbol.
    pub fn lookup(&mut self, env: Value, sym: Value) -> Fallible {
        match self.find(env, sym) {
            Some(val) => Ok(val),
            None => {
                let name = self.symbol_name(sym).to_string();
                self.raise(ErrorKind::UnboundVariable, name)
            }
        }
    }

    /// Bind `sym` in `env` itself. An existing binding in that same frame is
    /// overwritten in place rather than shadowed. Returns `val`.
    pub fn define(&mut self, env: Value, sym: Value, val: Value) -> Fallible {
        if let Some(slot) = self.local_slot(env, sym) {
            self.set_car(slot, val);
            return Ok(val);
        }
        self.rooted(env, |heap, _| {
            heap.rooted(val, |heap, _| {
                let (_, names, values) = heap.frame_parts(env);
                let new_names = heap.cons(sym, names)?;
                heap.rooted(new_names, |heap, _| {
                    let new_values = heap.cons(val, values)?;
                    // Both spines exist before either is installed, so the
                    // frame never sees lists of different lengths.
                    heap.set_frame_bindings(env, new_names, new_values);
                    Ok(val)
                })
            })
        })
    }

    /// `set!`: overwrite the nearest existing binding of `sym`.
    pub fn assign(&mut self, env: Value, sym: Value, val: Value) -> Fallible {
        match self.chain_slot(env, sym) {
            Some(slot) => {
                self.set_car(slot, val);
                Ok(val)
            }
            None => {
                let name = self.symbol_name(sym).to_string();
                self.raise(ErrorKind::UnboundVariable, name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::heap::Heap;
    use crate::value::{ErrorKind, Value};

    fn setup() -> Heap {
        Heap::new(&Config::small())
    }

    #[test]
    fn define_then_lookup_in_base() {
        let mut heap = setup();
        let x = heap.intern("x");
        let one = heap.make_int(1).unwrap();
        let base = heap.base_env();
        assert_eq!(heap.define(base, x, one), Ok(one));
        assert_eq!(heap.lookup(base, x), Ok(one));
    }

    #[test]
    fn unbound_lookup_names_the_symbol() {
        let mut heap = setup();
        let y = heap.intern("nowhere");
        let base = heap.base_env();
        let err = heap.lookup(base, y).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::UnboundVariable);
        assert_eq!(heap.error_message(err), "nowhere");
    }

    #[test]
    fn redefinition_overwrites_in_the_same_frame() {
        let mut heap = setup();
        let x = heap.intern("x");
        let base = heap.base_env();
        let one = heap.make_int(1).unwrap();
        let two = heap.make_int(2).unwrap();
        heap.define(base, x, one).unwrap();
        heap.define(base, x, two).unwrap();
        let (_, names, values) = heap.frame_parts(base);
        assert_eq!(heap.list_len(names), Some(1));
        assert_eq!(heap.list_len(values), Some(1));
        assert_eq!(heap.find(base, x), Some(two));
    }

    #[test]
    fn child_frames_shadow_and_pop_restores() {
        let mut heap = setup();
        let x = heap.intern("x");
        let base = heap.base_env();
        let outer = heap.make_int(1).unwrap();
        heap.define(base, x, outer).unwrap();

        let inner = heap.make_int(2).unwrap();
        let names = heap.list(&[x]).unwrap();
        let r = heap.acquire(names);
        let values = heap.list(&[inner]).unwrap();
        heap.release(r);
        let child = heap.push_frame(names, values).unwrap();

        assert_eq!(heap.current_env(), child);
        assert_eq!(heap.find(child, x), Some(inner));
        heap.pop_frame();
        assert_eq!(heap.current_env(), base);
        assert_eq!(heap.find(base, x), Some(outer));
    }

    #[test]
    fn assign_mutates_the_nearest_binding() {
        let mut heap = setup();
        let x = heap.intern("x");
        let base = heap.base_env();
        let one = heap.make_int(1).unwrap();
        heap.define(base, x, one).unwrap();
        let child = heap
            .push_frame(Value::EMPTY_LIST, Value::EMPTY_LIST)
            .unwrap();

        let nine = heap.make_int(9).unwrap();
        assert_eq!(heap.assign(child, x, nine), Ok(nine));
        assert_eq!(heap.find(base, x), Some(nine));

        let z = heap.intern("z");
        let err = heap.assign(child, z, nine).unwrap_err();
        assert_eq!(heap.error_kind(err), ErrorKind::UnboundVariable);
    }

    #[test]
    fn define_only_touches_the_given_frame() {
        let mut heap = setup();
        let x = heap.intern("x");
        let base = heap.base_env();
        let child = heap
            .push_frame(Value::EMPTY_LIST, Value::EMPTY_LIST)
            .unwrap();
        let five = heap.make_int(5).unwrap();
        heap.define(child, x, five).unwrap();
        assert_eq!(heap.find(child, x), Some(five));
        assert_eq!(heap.find(base, x), None);
    }

    #[test]
    fn bindings_survive_collection() {
        let mut heap = Heap::new(&Config::small().with_arena_cells(64));
        let base = heap.base_env();
        for n in 0..10 {
            let sym = heap.intern(&format!("v{}", n));
            let val = heap.make_int(n).unwrap();
            heap.define(base, sym, val).unwrap();
        }
        for _ in 0..200 {
            heap.make_string("garbage").unwrap();
        }
        for n in 0..10 {
            let sym = heap.intern(&format!("v{}", n));
            let val = heap.find(base, sym).unwrap();
            assert_eq!(heap.int(val), n);
        }
    }

    #[test]
    #[should_panic(expected = "base frame")]
    fn popping_the_base_frame_is_fatal() {
        let mut heap = setup();
        heap.pop_frame();
    }
}
