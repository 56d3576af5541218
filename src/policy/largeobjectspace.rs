use crate::policy::space::{GcRetentionPolicy, Space, SpaceType};
use crate::util::alloc::FreeListAllocator;
use crate::util::constants::LARGE_OBJECT_ALIGNMENT;
use crate::util::conversions::raw_align_up;
use crate::util::memory::{self, MmapRegion};
use crate::util::statistics::ObjectBytePair;
use crate::util::{Address, ObjectReference};
use spin::Mutex;
use std::collections::BTreeSet;
use std::io;
use std::mem;

/// Objects too large to be copied, each on pages of its own.
///
/// Instead of bitmaps the space keeps a live set and a mark set of object addresses, which play
/// the same roles: the collector marks into the mark set, sweeping frees `live \ mark`, and the
/// two are swapped afterwards.
pub struct LargeObjectSpace {
    name: String,
    mem_map: MmapRegion,
    allocator: Mutex<FreeListAllocator>,
    live_objects: Mutex<BTreeSet<ObjectReference>>,
    mark_objects: Mutex<BTreeSet<ObjectReference>>,
}

impl LargeObjectSpace {
    pub fn new(name: &str, mem_map: MmapRegion) -> io::Result<Self> {
        let mut allocator = FreeListAllocator::new("large object space", LARGE_OBJECT_ALIGNMENT);
        allocator.add_region(mem_map.start(), mem_map.size());
        Ok(LargeObjectSpace {
            name: name.to_string(),
            mem_map,
            allocator: Mutex::new(allocator),
            live_objects: Mutex::new(BTreeSet::new()),
            mark_objects: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn begin(&self) -> Address {
        self.mem_map.start()
    }

    pub fn limit(&self) -> Address {
        self.mem_map.end()
    }

    /// Allocate `size` bytes rounded up to whole pages. The new object is live immediately.
    pub fn alloc(&self, size: usize) -> Option<Address> {
        let size = raw_align_up(size, LARGE_OBJECT_ALIGNMENT);
        let result = self.allocator.lock().alloc(size)?;
        if let Some(object) = ObjectReference::from_raw_address(result) {
            self.live_objects.lock().insert(object);
        }
        trace!("{}: allocated {} bytes at {}", self.name, size, result);
        Some(result)
    }

    pub fn is_live(&self, object: ObjectReference) -> bool {
        self.live_objects.lock().contains(&object)
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.mark_objects.lock().contains(&object)
    }

    /// Mark `object`. Returns whether it was already marked.
    pub fn test_and_set_mark(&self, object: ObjectReference) -> bool {
        debug_assert!(
            self.is_live(object),
            "{}: marking {} which was never allocated",
            self.name,
            object
        );
        !self.mark_objects.lock().insert(object)
    }

    /// Mark everything live, so that the space survives a collection that does not trace it.
    pub fn copy_live_to_marked(&self) {
        let live = self.live_objects.lock();
        self.mark_objects.lock().extend(live.iter().copied());
    }

    pub fn clear_mark_objects(&self) {
        self.mark_objects.lock().clear();
    }

    pub fn swap_bitmaps(&self) {
        let mut live = self.live_objects.lock();
        let mut mark = self.mark_objects.lock();
        mem::swap(&mut *live, &mut *mark);
    }

    /// Snapshot of the live objects in address order.
    pub fn live_objects(&self) -> Vec<ObjectReference> {
        self.live_objects.lock().iter().copied().collect()
    }

    /// Free every object that is live but not marked and give its pages back. With
    /// `swap_bitmaps` the two sets are read the other way round.
    pub fn sweep(&self, swap_bitmaps: bool) -> ObjectBytePair {
        let mut live = self.live_objects.lock();
        let mut mark = self.mark_objects.lock();
        let (live, mark) = if swap_bitmaps {
            (&mut *mark, &*live)
        } else {
            (&mut *live, &*mark)
        };
        let dead: Vec<ObjectReference> = live.difference(mark).copied().collect();
        let mut allocator = self.allocator.lock();
        let mut freed = ObjectBytePair::default();
        for object in dead {
            live.remove(&object);
            let size = allocator.free(object.to_raw_address());
            if let Err(e) = memory::madvise_dontneed(object.to_raw_address(), size) {
                warn!("{}: failed to release {}: {}", self.name, object, e);
            }
            freed += ObjectBytePair::new(1, size);
        }
        debug!("Swept {}: {:?}", self.name, freed);
        freed
    }

    pub fn objects_allocated(&self) -> usize {
        self.allocator.lock().objects_allocated()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.allocator.lock().bytes_allocated()
    }
}

impl Space for LargeObjectSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::LargeObject
    }

    fn gc_retention_policy(&self) -> GcRetentionPolicy {
        GcRetentionPolicy::AlwaysCollect
    }

    fn has_address(&self, addr: Address) -> bool {
        self.mem_map.has_address(addr)
    }
}
