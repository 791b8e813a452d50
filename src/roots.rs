use crate::value::Value;

/// Bounded stack of handles the collector treats as live even though no
/// durable structure reaches them yet: operands being assembled, saved
/// environments, partially built lists.
///
/// A slot stands in for a native variable. Callers read and write the
/// variable through its [`Root`], so a collection always sees the latest
/// contents rather than whatever was there at push time.
pub struct RootStack {
    slots: Vec<Value>,
    capacity: usize,
}

/// Token for one occupied slot. Neither `Copy` nor `Clone`:
/// releasing consumes it, so a slot cannot be released twice.
#[must_use = "an acquired root must be released"]
#[derive(Debug)]
pub struct Root {
    slot: usize,
}

impl RootStack {
    pub fn new(capacity: usize) -> Self {
        RootStack {
            slots: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Push a new slot holding `val`.
    ///
    /// Panics when the configured capacity is exceeded; that bounds how many
    /// unattached temporaries can be live at once.
    pub fn push(&mut self, val: Value) -> Root {
        if self.slots.len() >= self.capacity {
            panic!("root stack overflow ({} slots)", self.capacity);
        }
        self.slots.push(val);
        Root {
            slot: self.slots.len() - 1,
        }
    }

    /// Pop the slot owned by `root` and return its final contents.
    ///
    /// Panics unless `root` is the most recently pushed live slot.
    pub fn pop(&mut self, root: Root) -> Value {
        let top = self.slots.len().checked_sub(1);
        if top != Some(root.slot) {
            panic!(
                "root released out of order: slot {} released with depth {}",
                root.slot,
                self.slots.len()
            );
        }
        self.slots.pop().unwrap_or(Value::EMPTY_LIST)
    }

    #[inline]
    pub fn get(&self, root: &Root) -> Value {
        self.slots[root.slot]
    }

    #[inline]
    pub fn set(&mut self, root: &Root, val: Value) {
        self.slots[root.slot] = val;
    }

    /// Number of occupied slots.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots.iter().copied()
    }
}
