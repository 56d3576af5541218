use crate::policy::space::ContinuousSpace;
use crate::util::{Address, ObjectReference};

/// One contiguous address range made of the spaces a collection treats as live without tracing
/// them. Membership is a range check.
///
/// Spaces can only be added next to the range, so immune spaces have to be adjacent in the
/// address-sorted space list.
#[derive(Clone, Copy, Debug)]
pub struct ImmuneRegion {
    begin: Address,
    end: Address,
}

impl Default for ImmuneRegion {
    fn default() -> Self {
        ImmuneRegion {
            begin: Address::ZERO,
            end: Address::ZERO,
        }
    }
}

impl ImmuneRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the region by `space`. Returns false, leaving the region unchanged, if the space
    /// is not adjacent to it.
    pub fn add_continuous_space(&mut self, space: &dyn ContinuousSpace) -> bool {
        let (space_begin, space_limit) = (space.begin(), space.limit());
        if self.is_empty() {
            self.begin = space_begin;
            self.end = space_limit;
        } else if space_limit == self.begin {
            self.begin = space_begin;
        } else if space_begin == self.end {
            self.end = space_limit;
        } else {
            return false;
        }
        debug!(
            "Immune region [{}, {}) after adding {}",
            self.begin,
            self.end,
            space.name()
        );
        true
    }

    pub fn contains_space(&self, space: &dyn ContinuousSpace) -> bool {
        self.begin <= space.begin() && space.limit() <= self.end
    }

    pub fn contains_object(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        self.begin <= addr && addr < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn begin(&self) -> Address {
        self.begin
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
