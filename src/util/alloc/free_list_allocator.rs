use crate::util::conversions::raw_align_up;
use crate::util::memory;
use crate::util::{Address, ObjectReference};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// A best-fit allocator over a set of address ranges. Among free chunks of the smallest
/// sufficient size, the lowest address wins.
///
/// Chunk metadata lives outside the managed memory, so free memory holds no headers and can be
/// handed back to the OS page by page. Adjacent free chunks are coalesced when freed. Every
/// allocation is zero filled.
pub struct FreeListAllocator {
    name: &'static str,
    /// Every size is rounded up to this.
    granularity: usize,
    /// Free chunks by start address.
    free_chunks: BTreeMap<Address, usize>,
    /// The same chunks by size, then start address.
    chunks_by_size: BTreeSet<(usize, Address)>,
    /// Live allocations by start address.
    allocations: BTreeMap<Address, usize>,
    bytes_allocated: usize,
}

impl FreeListAllocator {
    pub fn new(name: &'static str, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two());
        FreeListAllocator {
            name,
            granularity,
            free_chunks: BTreeMap::new(),
            chunks_by_size: BTreeSet::new(),
            allocations: BTreeMap::new(),
            bytes_allocated: 0,
        }
    }

    /// Hand `[start, start + size)` to the allocator as free memory.
    pub fn add_region(&mut self, start: Address, size: usize) {
        debug_assert!(start.is_aligned_to(self.granularity));
        debug_assert!(size % self.granularity == 0);
        if size > 0 {
            self.insert_free(start, size);
        }
    }

    fn add_chunk(&mut self, start: Address, size: usize) {
        self.free_chunks.insert(start, size);
        self.chunks_by_size.insert((size, start));
    }

    fn remove_chunk(&mut self, start: Address) -> Option<usize> {
        let size = self.free_chunks.remove(&start)?;
        self.chunks_by_size.remove(&(size, start));
        Some(size)
    }

    fn insert_free(&mut self, mut start: Address, mut size: usize) {
        // Merge with the chunk that ends at `start`.
        if let Some((&prev_start, &prev_size)) = self.free_chunks.range(..start).next_back() {
            debug_assert!(prev_start + prev_size <= start, "{}: double free", self.name);
            if prev_start + prev_size == start {
                self.remove_chunk(prev_start);
                start = prev_start;
                size += prev_size;
            }
        }
        // Merge with the chunk that starts at the end.
        if let Some(next_size) = self.remove_chunk(start + size) {
            size += next_size;
        }
        self.add_chunk(start, size);
    }

    /// Allocate `size` bytes of zeroed memory, or `None` if no free chunk is large enough.
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        let size = raw_align_up(size.max(1), self.granularity);
        let &(chunk_size, start) = self.chunks_by_size.range((size, Address::ZERO)..).next()?;
        self.remove_chunk(start);
        if chunk_size > size {
            self.add_chunk(start + size, chunk_size - size);
        }
        memory::zero(start, size);
        self.allocations.insert(start, size);
        self.bytes_allocated += size;
        trace!("{}: alloc {} bytes at {}", self.name, size, start);
        Some(start)
    }

    /// Free the allocation starting at `addr` and return its size.
    pub fn free(&mut self, addr: Address) -> usize {
        let size = match self.allocations.remove(&addr) {
            Some(size) => size,
            None => panic!("{}: freeing {} which is not allocated", self.name, addr),
        };
        self.bytes_allocated -= size;
        self.insert_free(addr, size);
        size
    }

    /// Free a batch of objects and return the number of bytes freed.
    pub fn free_list(&mut self, objects: &[ObjectReference]) -> usize {
        objects
            .iter()
            .map(|object| self.free(object.to_raw_address()))
            .sum()
    }

    /// Size of the allocation starting at `addr`.
    pub fn allocation_size(&self, addr: Address) -> Option<usize> {
        self.allocations.get(&addr).copied()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn objects_allocated(&self) -> usize {
        self.allocations.len()
    }

    /// If the free chunk ending at `end` covers at least `align` bytes, remove its `align`
    /// aligned top part from the allocator and return where the removed part starts.
    pub fn release_top(&mut self, end: Address, align: usize) -> Option<Address> {
        let (&start, &size) = self.free_chunks.range(..end).next_back()?;
        if start + size != end {
            return None;
        }
        let new_end = start.align_up(align);
        if new_end >= end {
            return None;
        }
        self.remove_chunk(start);
        if new_end > start {
            self.add_chunk(start, new_end - start);
        }
        Some(new_end)
    }

    /// The free chunks in address order.
    pub fn free_chunks(&self) -> impl Iterator<Item = Range<Address>> + '_ {
        self.free_chunks
            .iter()
            .map(|(&start, &size)| start..start + size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;
    use crate::util::memory::{MmapProtection, MmapRegion};

    fn allocator() -> (MmapRegion, FreeListAllocator) {
        let region =
            MmapRegion::map_anonymous("free list test", 4 * BYTES_IN_PAGE, MmapProtection::ReadWrite)
                .unwrap();
        let mut allocator = FreeListAllocator::new("test", 8);
        allocator.add_region(region.start(), region.size());
        (region, allocator)
    }

    #[test]
    fn coalesced_holes_are_reused() {
        let (region, mut allocator) = allocator();
        let a = allocator.alloc(24).unwrap();
        let b = allocator.alloc(10).unwrap();
        let c = allocator.alloc(32).unwrap();
        assert_eq!(a, region.start());
        assert_eq!(b, a + 24usize);
        assert_eq!(allocator.allocation_size(b), Some(16));
        assert_eq!(c, b + 16usize);
        assert_eq!(allocator.bytes_allocated(), 72);

        assert_eq!(allocator.free(a), 24);
        assert_eq!(allocator.free(b), 16);
        // a and b coalesced into one 40 byte hole, which a 40 byte request fits.
        assert_eq!(allocator.alloc(40), Some(a));
        assert_eq!(allocator.objects_allocated(), 2);
    }

    #[test]
    fn smallest_sufficient_chunk_is_used() {
        let (region, mut allocator) = allocator();
        let a = allocator.alloc(64).unwrap();
        let _b = allocator.alloc(8).unwrap();
        let c = allocator.alloc(16).unwrap();
        let _d = allocator.alloc(8).unwrap();
        allocator.free(a);
        allocator.free(c);
        // Holes of 64 and 16 bytes below the tail: a 16 byte request takes the exact hole.
        assert_eq!(allocator.alloc(16), Some(c));
        assert_eq!(allocator.alloc(24), Some(a));
        assert_eq!(allocator.alloc(40), Some(a + 24usize));
        // Nothing left below the tail fits, so the tail is split.
        let tail = allocator.alloc(8).unwrap();
        assert_eq!(tail, region.start() + 96usize);
        assert_eq!(allocator.free_chunks().count(), 1);
    }

    #[test]
    fn allocations_are_zeroed() {
        let (_region, mut allocator) = allocator();
        let a = allocator.alloc(64).unwrap();
        unsafe { a.store(0xffusize) };
        allocator.free(a);
        let b = allocator.alloc(64).unwrap();
        assert_eq!(a, b);
        assert_eq!(unsafe { b.load::<usize>() }, 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let (_region, mut allocator) = allocator();
        assert!(allocator.alloc(4 * BYTES_IN_PAGE).is_some());
        assert_eq!(allocator.alloc(8), None);
    }

    #[test]
    fn free_list_sums_sizes() {
        let (_region, mut allocator) = allocator();
        let objects: Vec<ObjectReference> = (0..4)
            .map(|_| ObjectReference::from_raw_address(allocator.alloc(48).unwrap()).unwrap())
            .collect();
        assert_eq!(allocator.free_list(&objects), 4 * 48);
        assert_eq!(allocator.bytes_allocated(), 0);
        assert_eq!(allocator.free_chunks().count(), 1);
    }

    #[test]
    fn release_top_page() {
        let (region, mut allocator) = allocator();
        let a = allocator.alloc(100).unwrap();
        let new_end = allocator.release_top(region.end(), BYTES_IN_PAGE).unwrap();
        assert_eq!(new_end, region.start() + BYTES_IN_PAGE);
        assert_eq!(
            allocator.free_chunks().collect::<Vec<_>>(),
            vec![a + 104usize..new_end]
        );
        // Nothing free at the top any more.
        assert_eq!(allocator.release_top(region.end(), BYTES_IN_PAGE), None);
    }

    #[test]
    #[should_panic]
    fn double_free_is_fatal() {
        let (_region, mut allocator) = allocator();
        let a = allocator.alloc(8).unwrap();
        allocator.free(a);
        allocator.free(a);
    }
}
