use crate::util::metadata::{CardTable, ContinuousSpaceBitmap};
use crate::util::statistics::ObjectBytePair;
use crate::util::{Address, ObjectReference};

use downcast_rs::{impl_downcast, Downcast};
use std::fmt;
use std::io;
use strum_macros::Display;

/// How a collection treats the objects of a space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum GcRetentionPolicy {
    /// Objects are never reclaimed. The space is immune to every collection.
    NeverCollect,
    /// Objects are considered for reclamation by every collection.
    AlwaysCollect,
    /// Objects are only reclaimed by full collections.
    FullCollect,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum SpaceType {
    Image,
    Zygote,
    Malloc,
    BumpPointer,
    LargeObject,
}

/// A region of the heap with its own allocation and reclamation policy.
pub trait Space: Downcast + Send + Sync {
    fn name(&self) -> &str;
    fn space_type(&self) -> SpaceType;
    fn gc_retention_policy(&self) -> GcRetentionPolicy;
    fn has_address(&self, addr: Address) -> bool;

    fn contains(&self, object: ObjectReference) -> bool {
        self.has_address(object.to_raw_address())
    }

    fn is_image_space(&self) -> bool {
        self.space_type() == SpaceType::Image
    }

    fn is_zygote_space(&self) -> bool {
        self.space_type() == SpaceType::Zygote
    }
}

impl_downcast!(Space);

/// A space over one contiguous address range `[begin, limit)`, of which `[begin, end)` is in use.
pub trait ContinuousSpace: Space {
    fn begin(&self) -> Address;
    /// End of the memory currently in use.
    fn end(&self) -> Address;
    /// End of the reserved range. The space never grows beyond it.
    fn limit(&self) -> Address;

    fn size(&self) -> usize {
        self.end() - self.begin()
    }

    fn capacity(&self) -> usize {
        self.limit() - self.begin()
    }

    /// Objects live as of the last completed collection, plus everything allocated since.
    fn live_bitmap(&self) -> Option<&ContinuousSpaceBitmap>;

    /// Objects found reachable by the collection in progress.
    fn mark_bitmap(&self) -> Option<&ContinuousSpaceBitmap>;

    fn as_alloc_space(&self) -> Option<&dyn ContinuousMemMapAllocSpace> {
        None
    }

    fn as_alloc_space_mut(&mut self) -> Option<&mut dyn ContinuousMemMapAllocSpace> {
        None
    }
}

impl_downcast!(ContinuousSpace);

/// A continuous space whose objects are freed individually, with a live and a mark bitmap that
/// the collector binds, swaps and sweeps.
pub trait ContinuousMemMapAllocSpace: ContinuousSpace {
    fn bitmaps(&self) -> &SpaceBitmaps;
    fn bitmaps_mut(&mut self) -> &mut SpaceBitmaps;

    /// Free, or otherwise retire, a batch of dead objects found by [`Self::sweep`].
    fn sweep_callback(
        &self,
        objects: &[ObjectReference],
        card_table: &CardTable,
        swap_bitmaps: bool,
    ) -> ObjectBytePair;

    /// Make the mark bitmap the live bitmap, so that everything live counts as marked.
    fn bind_live_to_mark_bitmap(&mut self) {
        self.bitmaps_mut().bind();
    }

    fn unbind_bitmaps(&mut self) {
        self.bitmaps_mut().unbind();
    }

    fn has_bound_bitmaps(&self) -> bool {
        self.bitmaps().is_bound()
    }

    /// Exchange the live and mark bitmaps, making what this collection marked the live set.
    fn swap_bitmaps(&mut self) {
        self.bitmaps_mut().swap();
    }

    /// Reclaim every object that is live but not marked. With `swap_bitmaps` the roles of the
    /// bitmaps are reversed, for sweeping after they have already been swapped.
    fn sweep(&self, swap_bitmaps: bool, card_table: &CardTable) -> ObjectBytePair {
        let bitmaps = self.bitmaps();
        // Sweeping a bound space cannot free anything.
        if bitmaps.is_bound() || self.begin() >= self.end() {
            return ObjectBytePair::default();
        }
        let (live, mark) = if swap_bitmaps {
            (bitmaps.mark(), bitmaps.live())
        } else {
            (bitmaps.live(), bitmaps.mark())
        };
        let mut freed = ObjectBytePair::default();
        ContinuousSpaceBitmap::sweep_walk(live, mark, self.begin(), self.end(), |objects| {
            freed += self.sweep_callback(objects, card_table, swap_bitmaps);
        });
        debug!("Swept {}: {:?}", self.name(), freed);
        freed
    }
}

/// The live, mark and temporary bitmaps of an alloc space.
///
/// While bound, the mark bitmap is parked in `temp` and the live bitmap serves as both.
pub struct SpaceBitmaps {
    live: ContinuousSpaceBitmap,
    mark: Option<ContinuousSpaceBitmap>,
    temp: Option<ContinuousSpaceBitmap>,
}

impl SpaceBitmaps {
    pub fn new(space_name: &str, begin: Address, capacity: usize) -> io::Result<SpaceBitmaps> {
        let create = |kind: &str| {
            ContinuousSpaceBitmap::create(&format!("{} {} bitmap", space_name, kind), begin, capacity)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::OutOfMemory,
                        format!("could not create {} {} bitmap", space_name, kind),
                    )
                })
        };
        Ok(SpaceBitmaps {
            live: create("live")?,
            mark: Some(create("mark")?),
            temp: None,
        })
    }

    pub fn live(&self) -> &ContinuousSpaceBitmap {
        &self.live
    }

    pub fn mark(&self) -> &ContinuousSpaceBitmap {
        self.mark.as_ref().unwrap_or(&self.live)
    }

    pub fn is_bound(&self) -> bool {
        self.temp.is_some()
    }

    pub fn bind(&mut self) {
        assert!(!self.is_bound(), "{} is already bound", self.live.name());
        self.temp = self.mark.take();
    }

    pub fn unbind(&mut self) {
        if let Some(temp) = self.temp.take() {
            self.mark = Some(temp);
        }
    }

    pub fn swap(&mut self) {
        assert!(!self.is_bound(), "swapping bound bitmaps of {}", self.live.name());
        if let Some(mark) = self.mark.as_mut() {
            std::mem::swap(&mut self.live, mark);
            // Names follow the role, to keep diagnostics readable.
            let live_name = mark.name().to_string();
            mark.set_name(self.live.name());
            self.live.set_name(&live_name);
        }
    }

    pub fn set_heap_limit(&mut self, new_end: Address) {
        self.live.set_heap_limit(new_end);
        if let Some(mark) = self.mark.as_mut() {
            mark.set_heap_limit(new_end);
        }
    }
}

impl fmt::Debug for SpaceBitmaps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SpaceBitmaps")
            .field("live", &self.live)
            .field("mark", &self.mark)
            .field("bound", &self.is_bound())
            .finish()
    }
}
