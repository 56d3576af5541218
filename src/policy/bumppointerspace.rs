use crate::policy::space::{ContinuousSpace, GcRetentionPolicy, Space, SpaceType};
use crate::util::conversions::align_object_size;
use crate::util::memory::{self, MmapProtection, MmapRegion};
use crate::util::metadata::ContinuousSpaceBitmap;
use crate::util::{Address, ObjectReference};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A space allocated by bumping a cursor, and emptied all at once. The semi-spaces are two of
/// these.
///
/// The live bitmap records every allocated object, so the objects of the space can be walked
/// and queried without parsing the heap.
pub struct BumpPointerSpace {
    name: String,
    mem_map: MmapRegion,
    end: AtomicUsize,
    objects_allocated: AtomicUsize,
    bytes_allocated: AtomicUsize,
    live_bitmap: ContinuousSpaceBitmap,
}

impl BumpPointerSpace {
    pub fn new(name: &str, mem_map: MmapRegion) -> io::Result<Self> {
        let live_bitmap = ContinuousSpaceBitmap::create(
            &format!("{} live bitmap", name),
            mem_map.start(),
            mem_map.size(),
        )
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("could not create {} live bitmap", name),
            )
        })?;
        Ok(BumpPointerSpace {
            name: name.to_string(),
            end: AtomicUsize::new(mem_map.start().as_usize()),
            mem_map,
            objects_allocated: AtomicUsize::new(0),
            bytes_allocated: AtomicUsize::new(0),
            live_bitmap,
        })
    }

    /// Allocate `size` bytes, or `None` if the space is full. The memory is zero.
    pub fn alloc(&self, size: usize) -> Option<Address> {
        let size = align_object_size(size);
        let limit = self.mem_map.end().as_usize();
        let mut old_end = self.end.load(Ordering::Relaxed);
        loop {
            let new_end = old_end + size;
            if new_end > limit {
                return None;
            }
            match self.end.compare_exchange_weak(
                old_end,
                new_end,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => old_end = current,
            }
        }
        let result = unsafe { Address::from_usize(old_end) };
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size, Ordering::Relaxed);
        self.live_bitmap.atomic_test_and_set(result);
        Some(result)
    }

    pub fn objects_allocated(&self) -> usize {
        self.objects_allocated.load(Ordering::Relaxed)
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Visit every object allocated in the space, in address order.
    pub fn walk<F: FnMut(ObjectReference)>(&self, visitor: F) {
        self.live_bitmap
            .visit_marked_range(self.begin(), self.end(), visitor)
    }

    /// Drop every object. The pages go back to the OS and read as zero afterwards.
    pub fn clear(&self) {
        if let Err(e) = self.mem_map.release_pages() {
            warn!("Failed to release pages of {}: {}", self.name, e);
            memory::zero(self.begin(), self.size());
        }
        self.end
            .store(self.mem_map.start().as_usize(), Ordering::Relaxed);
        self.objects_allocated.store(0, Ordering::Relaxed);
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.live_bitmap.clear_all();
    }

    /// Make any access to the space fault.
    pub fn protect(&self) {
        if let Err(e) = self.mem_map.protect(MmapProtection::NoAccess) {
            warn!("Failed to protect {}: {}", self.name, e);
        }
    }

    pub fn unprotect(&self) {
        if let Err(e) = self.mem_map.protect(MmapProtection::ReadWrite) {
            panic!("Failed to unprotect {}: {}", self.name, e);
        }
    }
}

impl Space for BumpPointerSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::BumpPointer
    }

    fn gc_retention_policy(&self) -> GcRetentionPolicy {
        GcRetentionPolicy::AlwaysCollect
    }

    fn has_address(&self, addr: Address) -> bool {
        self.mem_map.has_address(addr)
    }
}

impl ContinuousSpace for BumpPointerSpace {
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
        Some(&self.live_bitmap)
    }

    fn mark_bitmap(&self) -> Option<&ContinuousSpaceBitmap> {
        None
    }
}
