use crate::util::ObjectReference;

/// The collector's stack of marked objects whose fields have not been scanned yet.
///
/// Starts at `initial_capacity` entries and doubles when full. Growing past `growth_limit` is a
/// fatal error: the trace cannot complete without losing objects.
pub struct MarkStack {
    name: &'static str,
    entries: Vec<ObjectReference>,
    capacity: usize,
    initial_capacity: usize,
    growth_limit: usize,
}

impl MarkStack {
    pub fn new(name: &'static str, initial_capacity: usize, growth_limit: usize) -> Self {
        assert!(initial_capacity > 0 && initial_capacity <= growth_limit);
        MarkStack {
            name,
            entries: Vec::with_capacity(initial_capacity),
            capacity: initial_capacity,
            initial_capacity,
            growth_limit,
        }
    }

    pub fn push(&mut self, object: ObjectReference) {
        if self.entries.len() == self.capacity {
            self.grow();
        }
        self.entries.push(object);
    }

    #[cold]
    fn grow(&mut self) {
        let new_capacity = self.capacity * 2;
        assert!(
            new_capacity <= self.growth_limit,
            "{} overflow: {} entries exceeds the growth limit of {}",
            self.name,
            new_capacity,
            self.growth_limit
        );
        debug!("Growing {} to {} entries", self.name, new_capacity);
        self.entries.reserve_exact(new_capacity - self.entries.len());
        self.capacity = new_capacity;
    }

    pub fn pop(&mut self) -> Option<ObjectReference> {
        self.entries.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries and give back the memory of any growth.
    pub fn reset(&mut self) {
        self.entries = Vec::with_capacity(self.initial_capacity);
        self.capacity = self.initial_capacity;
    }
}
