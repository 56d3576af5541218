//! One byte per card over the whole heap. The write barrier dirties the card of every object
//! that has a reference stored into it; the collector ages or clears cards when it drains them.

use crate::util::constants::{BYTES_IN_CARD, BYTES_IN_PAGE, LOG_BYTES_IN_CARD};
use crate::util::conversions::raw_align_up;
use crate::util::memory::{MmapProtection, MmapRegion};
use crate::util::Address;
use std::sync::atomic::{AtomicU8, Ordering};

pub struct CardTable {
    mem_map: MmapRegion,
    heap_begin: Address,
    heap_capacity: usize,
}

impl CardTable {
    pub const CARD_SHIFT: u8 = LOG_BYTES_IN_CARD;
    pub const CARD_SIZE: usize = BYTES_IN_CARD;
    pub const CARD_CLEAN: u8 = 0;
    pub const CARD_DIRTY: u8 = 0x70;
    /// A card that was dirty when the collector last drained it.
    pub const CARD_AGED: u8 = Self::CARD_DIRTY - 1;

    /// Create a clean card table covering `heap_capacity` bytes from `heap_begin`.
    pub fn create(heap_begin: Address, heap_capacity: usize) -> Option<CardTable> {
        debug_assert!(heap_begin.is_aligned_to(BYTES_IN_CARD));
        let num_cards = raw_align_up(heap_capacity, BYTES_IN_CARD) >> Self::CARD_SHIFT;
        let map_size = raw_align_up(num_cards, BYTES_IN_PAGE).max(BYTES_IN_PAGE);
        let mem_map =
            match MmapRegion::map_anonymous("card table", map_size, MmapProtection::ReadWrite) {
                Ok(mem_map) => mem_map,
                Err(e) => {
                    warn!("Failed to allocate card table: {}", e);
                    return None;
                }
            };
        debug!(
            "Card table covers [{}, {}) with {} cards",
            heap_begin,
            heap_begin + heap_capacity,
            num_cards
        );
        Some(CardTable {
            mem_map,
            heap_begin,
            heap_capacity,
        })
    }

    fn cards(&self) -> &[AtomicU8] {
        unsafe {
            std::slice::from_raw_parts(
                self.mem_map.start().to_ptr::<AtomicU8>(),
                raw_align_up(self.heap_capacity, BYTES_IN_CARD) >> Self::CARD_SHIFT,
            )
        }
    }

    pub fn heap_begin(&self) -> Address {
        self.heap_begin
    }

    pub fn heap_limit(&self) -> Address {
        self.heap_begin + self.heap_capacity
    }

    pub fn covers(&self, addr: Address) -> bool {
        self.heap_begin <= addr && addr < self.heap_limit()
    }

    fn card_index(&self, addr: Address) -> usize {
        assert!(
            self.covers(addr),
            "{} is not covered by the card table [{}, {})",
            addr,
            self.heap_begin,
            self.heap_limit()
        );
        (addr - self.heap_begin) >> Self::CARD_SHIFT
    }

    /// Address of the card byte for `addr`.
    pub fn card_from_addr(&self, addr: Address) -> Address {
        self.mem_map.start() + self.card_index(addr)
    }

    /// First heap address covered by the card byte at `card`.
    pub fn addr_from_card(&self, card: Address) -> Address {
        debug_assert!(self.mem_map.has_address(card));
        self.heap_begin + ((card - self.mem_map.start()) << Self::CARD_SHIFT)
    }

    /// Dirty the card covering `addr`. This is the write barrier.
    pub fn mark_card(&self, addr: Address) {
        self.cards()[self.card_index(addr)].store(Self::CARD_DIRTY, Ordering::Relaxed);
    }

    pub fn get_card(&self, addr: Address) -> u8 {
        self.cards()[self.card_index(addr)].load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self, addr: Address) -> bool {
        self.get_card(addr) == Self::CARD_DIRTY
    }

    /// Transition every card of `[scan_begin, scan_end)` from its value `v` to `visitor(v)` with
    /// a compare-and-swap per card, so that a mutator dirtying a card concurrently is never lost.
    /// `modified(card_begin, expected, new_value)` is called for each card that changed, with the
    /// first heap address the card covers.
    pub fn modify_cards_atomic<V, M>(
        &self,
        scan_begin: Address,
        scan_end: Address,
        visitor: V,
        mut modified: M,
    ) where
        V: Fn(u8) -> u8,
        M: FnMut(Address, u8, u8),
    {
        if scan_begin >= scan_end {
            return;
        }
        let first = self.card_index(scan_begin.align_down(BYTES_IN_CARD));
        let last = self.card_index(scan_end.align_up(BYTES_IN_CARD) - BYTES_IN_CARD);
        let cards = self.cards();
        for (i, card) in cards.iter().enumerate().take(last + 1).skip(first) {
            let mut expected = card.load(Ordering::Relaxed);
            let mut new_value = visitor(expected);
            while expected != new_value {
                match card.compare_exchange_weak(
                    expected,
                    new_value,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => {
                        expected = current;
                        new_value = visitor(expected);
                    }
                }
            }
            if expected != new_value {
                modified(
                    self.heap_begin + (i << Self::CARD_SHIFT),
                    expected,
                    new_value,
                );
            }
        }
    }

    /// Reset every card to clean. The pages of the table are given back to the OS.
    pub fn clear_card_table(&self) {
        if let Err(e) = self.mem_map.release_pages() {
            warn!("Failed to release card table pages: {}", e);
            for card in self.cards() {
                card.store(Self::CARD_CLEAN, Ordering::Relaxed);
            }
        }
    }

    /// Reset the cards covering `[begin, end)` to clean.
    pub fn clear_card_range(&self, begin: Address, end: Address) {
        if begin >= end {
            return;
        }
        let first = self.card_index(begin.align_down(BYTES_IN_CARD));
        let last = self.card_index(end.align_up(BYTES_IN_CARD) - BYTES_IN_CARD);
        for card in &self.cards()[first..=last] {
            card.store(Self::CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Visit the first address of every card in `[begin, end)` whose value is at least
    /// `minimum_value`.
    pub fn scan<F: FnMut(Address)>(
        &self,
        begin: Address,
        end: Address,
        minimum_value: u8,
        mut visitor: F,
    ) {
        if begin >= end {
            return;
        }
        let first = self.card_index(begin.align_down(BYTES_IN_CARD));
        let last = self.card_index(end.align_up(BYTES_IN_CARD) - BYTES_IN_CARD);
        for i in first..=last {
            if self.cards()[i].load(Ordering::Relaxed) >= minimum_value {
                visitor(self.heap_begin + (i << Self::CARD_SHIFT));
            }
        }
    }
}

/// Card visitor that ages dirty cards and cleans everything else.
pub fn age_card(card: u8) -> u8 {
    if card == CardTable::CARD_DIRTY {
        CardTable::CARD_AGED
    } else {
        CardTable::CARD_CLEAN
    }
}
