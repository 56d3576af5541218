use crate::policy::space::{ContinuousSpace, GcRetentionPolicy, Space, SpaceType};
use crate::util::conversions::align_object_size;
use crate::util::memory::MmapRegion;
use crate::util::metadata::ContinuousSpaceBitmap;
use crate::util::Address;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Boot image objects. Never collected, and never traced as a whole: the collector only
/// revisits the cards the mutator dirtied, through the space's mod-union table.
///
/// The space is populated by bump allocation while the heap is set up.
pub struct ImageSpace {
    name: String,
    mem_map: MmapRegion,
    end: AtomicUsize,
    live_bitmap: ContinuousSpaceBitmap,
}

impl ImageSpace {
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
        Ok(ImageSpace {
            name: name.to_string(),
            end: AtomicUsize::new(mem_map.start().as_usize()),
            mem_map,
            live_bitmap,
        })
    }

    pub fn alloc(&self, size: usize) -> Option<Address> {
        let size = align_object_size(size);
        let start = self
            .end
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |end| {
                (end + size <= self.mem_map.end().as_usize()).then_some(end + size)
            })
            .ok()?;
        let result = unsafe { Address::from_usize(start) };
        self.live_bitmap.atomic_test_and_set(result);
        Some(result)
    }
}

impl Space for ImageSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::Image
    }

    fn gc_retention_policy(&self) -> GcRetentionPolicy {
        GcRetentionPolicy::NeverCollect
    }

    fn has_address(&self, addr: Address) -> bool {
        self.mem_map.has_address(addr)
    }
}

impl ContinuousSpace for ImageSpace {
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

    /// Everything in the image is always marked.
    fn mark_bitmap(&self) -> Option<&ContinuousSpaceBitmap> {
        Some(&self.live_bitmap)
    }
}
