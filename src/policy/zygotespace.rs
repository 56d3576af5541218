use crate::policy::space::{
    ContinuousMemMapAllocSpace, ContinuousSpace, GcRetentionPolicy, Space, SpaceBitmaps, SpaceType,
};
use crate::util::memory::MmapRegion;
use crate::util::metadata::{CardTable, ContinuousSpaceBitmap};
use crate::util::statistics::ObjectBytePair;
use crate::util::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The objects allocated before the zygote fork, frozen in place.
///
/// Nothing is allocated here afterwards. Only full collections reclaim zygote objects, and the
/// memory of a dead object is never reused: sweeping just forgets it.
pub struct ZygoteSpace {
    name: String,
    mem_map: MmapRegion,
    bitmaps: SpaceBitmaps,
    objects_allocated: AtomicUsize,
}

impl ZygoteSpace {
    pub(crate) fn new(
        name: &str,
        mem_map: MmapRegion,
        bitmaps: SpaceBitmaps,
        objects_allocated: usize,
    ) -> ZygoteSpace {
        debug_assert_eq!(bitmaps.live().heap_begin(), mem_map.start());
        debug_assert_eq!(bitmaps.live().heap_limit(), mem_map.end());
        ZygoteSpace {
            name: name.to_string(),
            mem_map,
            bitmaps,
            objects_allocated: AtomicUsize::new(objects_allocated),
        }
    }

    pub fn objects_allocated(&self) -> usize {
        self.objects_allocated.load(Ordering::Relaxed)
    }
}

impl Space for ZygoteSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::Zygote
    }

    fn gc_retention_policy(&self) -> GcRetentionPolicy {
        GcRetentionPolicy::FullCollect
    }

    fn has_address(&self, addr: Address) -> bool {
        self.mem_map.has_address(addr)
    }
}

impl ContinuousSpace for ZygoteSpace {
    fn begin(&self) -> Address {
        self.mem_map.start()
    }

    fn end(&self) -> Address {
        self.mem_map.end()
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

impl ContinuousMemMapAllocSpace for ZygoteSpace {
    fn bitmaps(&self) -> &SpaceBitmaps {
        &self.bitmaps
    }

    fn bitmaps_mut(&mut self) -> &mut SpaceBitmaps {
        &mut self.bitmaps
    }

    fn sweep_callback(
        &self,
        objects: &[ObjectReference],
        card_table: &CardTable,
        swap_bitmaps: bool,
    ) -> ObjectBytePair {
        let live = self.bitmaps.live();
        for object in objects {
            if !swap_bitmaps {
                live.clear(object.to_raw_address());
            }
            // The mod-union table must drop whatever it cached for the dead object.
            card_table.mark_card(object.to_raw_address());
        }
        self.objects_allocated
            .fetch_sub(objects.len(), Ordering::Relaxed);
        ObjectBytePair::new(objects.len(), 0)
    }
}
