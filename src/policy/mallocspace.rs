use crate::policy::space::{
    ContinuousMemMapAllocSpace, ContinuousSpace, GcRetentionPolicy, Space, SpaceBitmaps, SpaceType,
};
use crate::policy::zygotespace::ZygoteSpace;
use crate::util::alloc::FreeListAllocator;
use crate::util::constants::{BYTES_IN_PAGE, OBJECT_ALIGNMENT};
use crate::util::conversions::{align_object_size, raw_align_up};
use crate::util::memory::{self, MmapProtection, MmapRegion};
use crate::util::metadata::{CardTable, ContinuousSpaceBitmap};
use crate::util::statistics::ObjectBytePair;
use crate::util::{Address, ObjectReference};
use spin::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The non-moving space: objects are allocated from a free list and reclaimed by sweeping.
///
/// The space reserves `[begin, limit)` but only `[begin, end)` is mapped writable. The rest is
/// `PROT_NONE` until [`MallocSpace::more_core`] grows the footprint, which never goes past
/// `begin + growth_limit`.
pub struct MallocSpace {
    name: String,
    mem_map: MmapRegion,
    end: AtomicUsize,
    initial_size: usize,
    growth_limit: usize,
    bitmaps: SpaceBitmaps,
    allocator: Mutex<FreeListAllocator>,
}

impl MallocSpace {
    pub fn new(
        name: &str,
        mem_map: MmapRegion,
        initial_size: usize,
        growth_limit: usize,
    ) -> io::Result<Self> {
        let capacity = mem_map.size();
        let growth_limit = growth_limit.min(capacity);
        let initial_size = initial_size.min(growth_limit);
        debug_assert!(initial_size % BYTES_IN_PAGE == 0 && growth_limit % BYTES_IN_PAGE == 0);
        let bitmaps = SpaceBitmaps::new(name, mem_map.start(), capacity)?;
        let begin = mem_map.start();
        if capacity > initial_size {
            memory::mprotect(begin + initial_size, capacity - initial_size)?;
        }
        let mut allocator = FreeListAllocator::new("malloc space", OBJECT_ALIGNMENT);
        allocator.add_region(begin, initial_size);
        debug!(
            "{}: [{}, {}) initial size {} growth limit {}",
            name,
            begin,
            mem_map.end(),
            initial_size,
            growth_limit
        );
        Ok(MallocSpace {
            name: name.to_string(),
            end: AtomicUsize::new((begin + initial_size).as_usize()),
            mem_map,
            initial_size,
            growth_limit,
            bitmaps,
            allocator: Mutex::new(allocator),
        })
    }

    /// Allocate `size` bytes of zeroed memory, growing the footprint if needed. Returns `None`
    /// when the growth limit is reached.
    pub fn alloc(&self, size: usize) -> Option<Address> {
        let size = align_object_size(size);
        let mut allocator = self.allocator.lock();
        let result = match allocator.alloc(size) {
            Some(result) => result,
            None => {
                let increment = raw_align_up(size, BYTES_IN_PAGE);
                let old_end = self.more_core(increment as isize)?;
                allocator.add_region(old_end, increment);
                allocator.alloc(size)?
            }
        };
        self.bitmaps.live().atomic_test_and_set(result);
        Some(result)
    }

    /// Grow (or with a negative `increment`, shrink) the writable footprint by `increment`
    /// bytes and return the previous end. Growing past the growth limit returns `None`.
    ///
    /// Only the mapping changes; keeping the allocator consistent with it is up to the caller.
    pub fn more_core(&self, increment: isize) -> Option<Address> {
        let original_end = self.end();
        if increment == 0 {
            return Some(original_end);
        }
        let size = increment.unsigned_abs();
        debug_assert!(size % BYTES_IN_PAGE == 0);
        if increment > 0 {
            let new_end = original_end + size;
            if new_end > self.begin() + self.growth_limit {
                debug!(
                    "{}: cannot grow to {} past growth limit {}",
                    self.name,
                    new_end,
                    self.begin() + self.growth_limit
                );
                return None;
            }
            if let Err(e) = memory::munprotect(original_end, size) {
                panic!("{}: failed to unprotect [{}, {}): {}", self.name, original_end, new_end, e);
            }
            self.end.store(new_end.as_usize(), Ordering::Relaxed);
        } else {
            assert!(
                original_end - self.begin() >= size,
                "{}: shrinking by {} below begin",
                self.name,
                size
            );
            let new_end = original_end - size;
            let result = memory::madvise_dontneed(new_end, size)
                .and_then(|_| memory::mprotect(new_end, size));
            if let Err(e) = result {
                panic!("{}: failed to release [{}, {}): {}", self.name, new_end, original_end, e);
            }
            self.end.store(new_end.as_usize(), Ordering::Relaxed);
        }
        Some(original_end)
    }

    /// Give free memory back to the OS: the free top of the footprint is unmapped, and whole
    /// free pages below it are released. Returns the number of bytes given back.
    pub fn trim(&self) -> usize {
        let mut allocator = self.allocator.lock();
        let mut reclaimed = 0;
        let end = self.end();
        if let Some(new_end) = allocator.release_top(end, BYTES_IN_PAGE) {
            let top = end - new_end;
            self.more_core(-(top as isize));
            reclaimed += top;
        }
        for chunk in allocator.free_chunks() {
            let start = chunk.start.align_up(BYTES_IN_PAGE);
            let end = chunk.end.align_down(BYTES_IN_PAGE);
            if start < end {
                match memory::madvise_dontneed(start, end - start) {
                    Ok(()) => reclaimed += end - start,
                    Err(e) => warn!("{}: failed to release [{}, {}): {}", self.name, start, end, e),
                }
            }
        }
        debug!("{}: trimmed {} bytes", self.name, reclaimed);
        reclaimed
    }

    pub fn growth_limit(&self) -> usize {
        self.growth_limit
    }

    /// Allow the space to grow to its whole reservation.
    pub fn clear_growth_limit(&mut self) {
        self.growth_limit = self.capacity();
    }

    pub fn allocation_size(&self, object: ObjectReference) -> Option<usize> {
        self.allocator.lock().allocation_size(object.to_raw_address())
    }

    pub fn objects_allocated(&self) -> usize {
        self.allocator.lock().objects_allocated()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.allocator.lock().bytes_allocated()
    }

    /// Turn everything allocated so far into a zygote space, and continue as an empty space
    /// named `alloc_space_name` over the rest of the reservation.
    ///
    /// The split point is the current end, which is page aligned. The zygote space takes over
    /// the bitmaps, shrunk to its range; this space gets fresh ones.
    pub fn create_zygote_space(
        &mut self,
        zygote_name: &str,
        alloc_space_name: &str,
    ) -> io::Result<ZygoteSpace> {
        let split = self.end();
        assert!(split.is_aligned_to(BYTES_IN_PAGE));
        assert!(
            !self.bitmaps.is_bound(),
            "{}: splitting with bound bitmaps",
            self.name
        );
        let used = split - self.begin();
        let capacity = self.capacity() - used;
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("{} has no room left after {}", self.name, split),
            ));
        }
        let new_bitmaps = SpaceBitmaps::new(alloc_space_name, split, capacity)?;
        let initial_size = self.initial_size.min(capacity);
        if initial_size > 0 {
            memory::munprotect(split, initial_size)?;
        }

        let tail = self.mem_map.remap_at_end(split, alloc_space_name);
        let head = std::mem::replace(&mut self.mem_map, tail);
        let mut zygote_bitmaps = std::mem::replace(&mut self.bitmaps, new_bitmaps);
        zygote_bitmaps.set_heap_limit(split);

        let mut allocator = FreeListAllocator::new("malloc space", OBJECT_ALIGNMENT);
        allocator.add_region(split, initial_size);
        let old_allocator = std::mem::replace(self.allocator.get_mut(), allocator);

        self.name = alloc_space_name.to_string();
        self.growth_limit = self.growth_limit.saturating_sub(used).max(initial_size);
        self.end
            .store((split + initial_size).as_usize(), Ordering::Relaxed);
        info!(
            "Created {} [{}, {}) with {} objects",
            zygote_name,
            head.start(),
            split,
            old_allocator.objects_allocated()
        );
        Ok(ZygoteSpace::new(
            zygote_name,
            head,
            zygote_bitmaps,
            old_allocator.objects_allocated(),
        ))
    }
}

impl Space for MallocSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::Malloc
    }

    fn gc_retention_policy(&self) -> GcRetentionPolicy {
        GcRetentionPolicy::AlwaysCollect
    }

    fn has_address(&self, addr: Address) -> bool {
        self.mem_map.has_address(addr)
    }
}

impl ContinuousSpace for MallocSpace {
    fn begin(&self) -> Address {
        self.mem_map.start()
    }

    fn end(&self) -> Address {
        unsafe { Address::from_usize(self.end.load(Ordering::Relaxed)) }
    }

    fn limit(&self) -> Address {
        self.mem_map.end()
    }

    fn live_bitmap(&self) -> Option<&ContinuousSpaceBitmap> {
        Some(self.bitmaps.live())
    }

    fn mark_bitmap(&self) -> Option<&ContinuousSpaceBitmap> {
        Some(self.bitmaps.mark())
    }

    fn as_alloc_space(&self) -> Option<&dyn ContinuousMemMapAllocSpace> {
        Some(self)
    }

    fn as_alloc_space_mut(&mut self) -> Option<&mut dyn ContinuousMemMapAllocSpace> {
        Some(self)
    }
}

impl ContinuousMemMapAllocSpace for MallocSpace {
    fn bitmaps(&self) -> &SpaceBitmaps {
        &self.bitmaps
    }

    fn bitmaps_mut(&mut self) -> &mut SpaceBitmaps {
        &mut self.bitmaps
    }

    fn sweep_callback(
        &self,
        objects: &[ObjectReference],
        _card_table: &CardTable,
        swap_bitmaps: bool,
    ) -> ObjectBytePair {
        // Unless the bitmaps get swapped afterwards, the live bitmap has to forget the dead.
        if !swap_bitmaps {
            let live = self.bitmaps.live();
            for object in objects {
                live.clear(object.to_raw_address());
            }
        }
        let bytes = self.allocator.lock().free_list(objects);
        ObjectBytePair::new(objects.len(), bytes)
    }
}
