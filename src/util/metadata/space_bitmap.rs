//! One bit per granule over a contiguous address range.
//!
//! Object bitmaps use the object alignment as granule, so a set bit marks the start of an
//! object. Card bitmaps use the card size, so a set bit marks a whole card.

use crate::util::constants::*;
use crate::util::conversions::raw_align_up;
use crate::util::memory::{MmapProtection, MmapRegion};
use crate::util::{Address, ObjectReference};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bitmap with one bit for each `ALIGNMENT` bytes of `[heap_begin, heap_limit)`.
///
/// The bit array lives in its own anonymous mapping. All accessors take `&self`; single bit
/// updates that may race with other markers must use [`SpaceBitmap::atomic_test_and_set`].
pub struct SpaceBitmap<const ALIGNMENT: usize> {
    name: String,
    mem_map: MmapRegion,
    /// Size of the bit array in bytes. Always a multiple of the word size.
    bitmap_size: usize,
    heap_begin: Address,
    heap_limit: Address,
}

/// Bitmap over objects in a continuous space.
pub type ContinuousSpaceBitmap = SpaceBitmap<OBJECT_ALIGNMENT>;
/// Bitmap over cards.
pub type CardBitmap = SpaceBitmap<BYTES_IN_CARD>;

impl<const ALIGNMENT: usize> SpaceBitmap<ALIGNMENT> {
    /// Bytes of heap covered by one word of the bitmap.
    const BYTES_PER_BITMAP_WORD: usize = ALIGNMENT * BITS_IN_WORD;

    /// Number of bytes of bit array needed to cover `capacity` bytes of heap.
    pub const fn compute_bitmap_size(capacity: usize) -> usize {
        raw_align_up(capacity, Self::BYTES_PER_BITMAP_WORD) / Self::BYTES_PER_BITMAP_WORD
            * BYTES_IN_WORD
    }

    /// Number of heap bytes a bit array of `bitmap_size` bytes covers.
    pub const fn compute_heap_size(bitmap_size: usize) -> usize {
        bitmap_size / BYTES_IN_WORD * Self::BYTES_PER_BITMAP_WORD
    }

    /// Create a zeroed bitmap covering `capacity` bytes from `heap_begin`. Returns `None` if the
    /// bit array cannot be mapped.
    pub fn create(name: &str, heap_begin: Address, capacity: usize) -> Option<Self> {
        debug_assert!(ALIGNMENT.is_power_of_two());
        debug_assert!(heap_begin.is_aligned_to(ALIGNMENT));
        let bitmap_size = Self::compute_bitmap_size(capacity);
        let map_size = raw_align_up(bitmap_size, BYTES_IN_PAGE).max(BYTES_IN_PAGE);
        let mem_map = match MmapRegion::map_anonymous(name, map_size, MmapProtection::ReadWrite)
        {
            Ok(mem_map) => mem_map,
            Err(e) => {
                warn!("Failed to allocate bitmap {}: {}", name, e);
                return None;
            }
        };
        Some(SpaceBitmap {
            name: name.to_string(),
            mem_map,
            bitmap_size,
            heap_begin,
            heap_limit: heap_begin + Self::compute_heap_size(bitmap_size),
        })
    }

    fn words(&self) -> &[AtomicUsize] {
        unsafe {
            std::slice::from_raw_parts(
                self.mem_map.start().to_ptr::<AtomicUsize>(),
                self.bitmap_size / BYTES_IN_WORD,
            )
        }
    }

    /// Word index holding the bit for `offset` bytes from the heap begin.
    pub const fn offset_to_index(offset: usize) -> usize {
        offset / ALIGNMENT / BITS_IN_WORD
    }

    /// Heap offset covered by the first bit of word `index`.
    pub const fn index_to_offset(index: usize) -> usize {
        index * ALIGNMENT * BITS_IN_WORD
    }

    /// Bit position inside its word of the bit for `offset`.
    pub const fn offset_bit_index(offset: usize) -> usize {
        (offset / ALIGNMENT) % BITS_IN_WORD
    }

    pub const fn offset_to_mask(offset: usize) -> usize {
        1 << Self::offset_bit_index(offset)
    }

    pub fn heap_begin(&self) -> Address {
        self.heap_begin
    }

    /// End of the covered range. Can be above the space end since the bitmap covers whole words.
    pub fn heap_limit(&self) -> Address {
        self.heap_limit
    }

    /// Shrink the covered range so that it ends at (or just above) `new_end`.
    pub fn set_heap_limit(&mut self, new_end: Address) {
        debug_assert!(new_end.is_aligned_to(Self::BYTES_PER_BITMAP_WORD));
        let new_size = Self::offset_to_index(new_end - self.heap_begin) * BYTES_IN_WORD;
        if new_size < self.bitmap_size {
            self.bitmap_size = new_size;
        }
        self.heap_limit = self.heap_begin + Self::compute_heap_size(self.bitmap_size);
    }

    /// Size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bitmap_size
    }

    pub fn has_address(&self, addr: Address) -> bool {
        addr.as_usize().wrapping_sub(self.heap_begin.as_usize())
            < self.heap_limit - self.heap_begin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn checked_offset(&self, addr: Address) -> usize {
        assert!(
            self.has_address(addr),
            "{}: {} is outside [{}, {})",
            self.name,
            addr,
            self.heap_begin,
            self.heap_limit
        );
        debug_assert!(addr.is_aligned_to(ALIGNMENT));
        addr - self.heap_begin
    }

    pub fn test(&self, addr: Address) -> bool {
        let offset = self.checked_offset(addr);
        self.words()[Self::offset_to_index(offset)].load(Ordering::Relaxed)
            & Self::offset_to_mask(offset)
            != 0
    }

    fn modify(&self, addr: Address, set_bit: bool) -> bool {
        let offset = self.checked_offset(addr);
        let mask = Self::offset_to_mask(offset);
        let word = &self.words()[Self::offset_to_index(offset)];
        let old_word = word.load(Ordering::Relaxed);
        if set_bit {
            word.store(old_word | mask, Ordering::Relaxed);
        } else {
            word.store(old_word & !mask, Ordering::Relaxed);
        }
        debug_assert_eq!(self.test(addr), set_bit);
        old_word & mask != 0
    }

    /// Set the bit for `addr` and return its previous value. Not safe against concurrent
    /// updates of the same word.
    pub fn set(&self, addr: Address) -> bool {
        self.modify(addr, true)
    }

    /// Clear the bit for `addr` and return its previous value.
    pub fn clear(&self, addr: Address) -> bool {
        self.modify(addr, false)
    }

    /// Set the bit for `addr` with a compare-and-swap loop and return its previous value.
    pub fn atomic_test_and_set(&self, addr: Address) -> bool {
        let offset = self.checked_offset(addr);
        let mask = Self::offset_to_mask(offset);
        let word = &self.words()[Self::offset_to_index(offset)];
        let mut old_word = word.load(Ordering::Relaxed);
        loop {
            if old_word & mask != 0 {
                return true;
            }
            match word.compare_exchange_weak(
                old_word,
                old_word | mask,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => old_word = current,
            }
        }
        debug_assert!(self.test(addr));
        false
    }

    #[inline(always)]
    fn visit_word<F: FnMut(Address)>(base: Address, mut word: usize, visitor: &mut F) {
        while word != 0 {
            let shift = word.trailing_zeros() as usize;
            visitor(base + shift * ALIGNMENT);
            word ^= 1 << shift;
        }
    }

    /// Visit the address of every set bit in `[visit_begin, visit_end)` in ascending order.
    ///
    /// Works a word at a time. The first and last words are masked to the range, every word in
    /// between is visited whole.
    pub fn visit_set_bits<F: FnMut(Address)>(
        &self,
        visit_begin: Address,
        visit_end: Address,
        mut visitor: F,
    ) {
        if visit_begin >= visit_end {
            return;
        }
        debug_assert!(self.heap_begin <= visit_begin && visit_end <= self.heap_limit);
        let words = self.words();
        let offset_start = visit_begin - self.heap_begin;
        let offset_end = visit_end - self.heap_begin;
        let index_start = Self::offset_to_index(offset_start);
        let index_end = Self::offset_to_index(offset_end);
        let bit_start = Self::offset_bit_index(offset_start);
        let bit_end = Self::offset_bit_index(offset_end);

        // Drop the bits below visit_begin.
        let mut left_edge = words[index_start].load(Ordering::Relaxed);
        left_edge &= !((1usize << bit_start) - 1);

        let mut right_edge;
        if index_start < index_end {
            let base = self.heap_begin + Self::index_to_offset(index_start);
            Self::visit_word(base, left_edge, &mut visitor);

            for (i, word) in words
                .iter()
                .enumerate()
                .take(index_end)
                .skip(index_start + 1)
            {
                let w = word.load(Ordering::Relaxed);
                if w != 0 {
                    let base = self.heap_begin + Self::index_to_offset(i);
                    Self::visit_word(base, w, &mut visitor);
                }
            }

            // index_end may be one past the last word when visit_end is the heap limit.
            right_edge = if bit_end == 0 {
                0
            } else {
                words[index_end].load(Ordering::Relaxed)
            };
        } else {
            right_edge = left_edge;
        }

        // Drop the bits at and above visit_end.
        right_edge &= (1usize << bit_end) - 1;
        let base = self.heap_begin + Self::index_to_offset(index_end);
        Self::visit_word(base, right_edge, &mut visitor);
    }

    /// Visit every marked object in `[visit_begin, visit_end)` in ascending address order.
    pub fn visit_marked_range<F: FnMut(ObjectReference)>(
        &self,
        visit_begin: Address,
        visit_end: Address,
        mut visitor: F,
    ) {
        self.visit_set_bits(visit_begin, visit_end, |addr| {
            visitor(unsafe { ObjectReference::from_raw_address_unchecked(addr) })
        })
    }

    /// Visit every marked object covered by the bitmap.
    pub fn walk<F: FnMut(ObjectReference)>(&self, visitor: F) {
        self.visit_marked_range(self.heap_begin, self.heap_limit, visitor)
    }

    /// Call `callback` with batches of the objects that are set in `live` but not in `mark`,
    /// for every bitmap word overlapping `[sweep_begin, sweep_end)`.
    ///
    /// Batches are flushed before the buffer can overflow on the next word, so the callback
    /// always sees at most `BITS_IN_WORD * BYTES_IN_WORD` objects at once.
    pub fn sweep_walk<F: FnMut(&[ObjectReference])>(
        live_bitmap: &Self,
        mark_bitmap: &Self,
        sweep_begin: Address,
        sweep_end: Address,
        mut callback: F,
    ) {
        assert_eq!(
            live_bitmap.heap_begin, mark_bitmap.heap_begin,
            "sweeping {} against {} with different heap begins",
            live_bitmap.name, mark_bitmap.name
        );
        assert_eq!(
            live_bitmap.size(),
            mark_bitmap.size(),
            "sweeping {} against {} with different sizes",
            live_bitmap.name,
            mark_bitmap.name
        );
        assert!(sweep_begin <= sweep_end);
        if sweep_end <= sweep_begin {
            return;
        }

        const BUFFER_SIZE: usize = BYTES_IN_WORD * BITS_IN_WORD;
        let mut buffer: Vec<ObjectReference> = Vec::with_capacity(BUFFER_SIZE);

        let live = live_bitmap.words();
        let mark = mark_bitmap.words();
        let start = Self::offset_to_index(sweep_begin - live_bitmap.heap_begin);
        let end = Self::offset_to_index(sweep_end - live_bitmap.heap_begin - 1);
        assert!(
            end < live.len(),
            "{}: sweep end {} is outside the bitmap",
            live_bitmap.name,
            sweep_end
        );
        for i in start..=end {
            let garbage = live[i].load(Ordering::Relaxed) & !mark[i].load(Ordering::Relaxed);
            if garbage != 0 {
                let base = live_bitmap.heap_begin + Self::index_to_offset(i);
                Self::visit_word(base, garbage, &mut |addr| {
                    buffer.push(unsafe { ObjectReference::from_raw_address_unchecked(addr) })
                });
                if buffer.len() >= BUFFER_SIZE - BITS_IN_WORD {
                    callback(&buffer);
                    buffer.clear();
                }
            }
        }
        if !buffer.is_empty() {
            callback(&buffer);
        }
    }

    /// Copy the bit array of `source`. Both bitmaps must have the same size.
    pub fn copy_from(&self, source: &Self) {
        assert_eq!(
            self.size(),
            source.size(),
            "copying {} into {} of a different size",
            source.name,
            self.name
        );
        for (dst, src) in self.words().iter().zip(source.words()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Clear every bit. The pages of the bit array are given back to the OS.
    pub fn clear_all(&self) {
        if self.bitmap_size == 0 {
            return;
        }
        if let Err(e) = self.mem_map.release_pages() {
            warn!("Failed to release pages of {}: {}", self.name, e);
            for word in self.words() {
                word.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Clear the bits for `[begin, end)`.
    pub fn clear_range(&self, begin: Address, end: Address) {
        let mut begin_offset = begin - self.heap_begin;
        let end_offset = end - self.heap_begin;
        // Bit by bit until the start is word aligned.
        while begin_offset < end_offset && Self::offset_bit_index(begin_offset) != 0 {
            self.clear(self.heap_begin + begin_offset);
            begin_offset += ALIGNMENT;
        }
        let mut end_word_offset = end_offset;
        while end_word_offset > begin_offset && Self::offset_bit_index(end_word_offset) != 0 {
            end_word_offset -= ALIGNMENT;
            self.clear(self.heap_begin + end_word_offset);
        }
        let words = self.words();
        for word in &words[Self::offset_to_index(begin_offset)..Self::offset_to_index(end_word_offset)]
        {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Whether any bit is set. Used by assertions.
    pub fn is_empty(&self) -> bool {
        self.words()
            .iter()
            .all(|word| word.load(Ordering::Relaxed) == 0)
    }
}

impl<const ALIGNMENT: usize> fmt::Display for SpaceBitmap<ALIGNMENT> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}[begin={},end={}]",
            self.name, self.heap_begin, self.heap_limit
        )
    }
}

impl<const ALIGNMENT: usize> fmt::Debug for SpaceBitmap<ALIGNMENT> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
