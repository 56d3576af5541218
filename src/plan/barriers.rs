//! Write barriers.

use crate::util::metadata::CardTable;
use crate::util::ObjectReference;
use crate::vm::SimpleSlot;

/// A barrier is a combination of fast-path behaviors + slow-path semantics.
/// The runtime calls [`Barrier::object_reference_write`] for every reference store into a heap
/// object, or does the store itself and calls [`Barrier::object_reference_write_post`].
pub trait Barrier {
    /// Store `target` into `slot` of `src`, with the barrier.
    fn object_reference_write(
        &mut self,
        src: ObjectReference,
        slot: SimpleSlot,
        target: Option<ObjectReference>,
    ) {
        self.object_reference_write_pre(src, slot, target);
        match target {
            Some(target) => slot.store(target),
            None => slot.clear(),
        }
        self.object_reference_write_post(src, slot, target);
    }

    /// Called before the store.
    fn object_reference_write_pre(
        &mut self,
        _src: ObjectReference,
        _slot: SimpleSlot,
        _target: Option<ObjectReference>,
    ) {
    }

    /// Called after the store.
    fn object_reference_write_post(
        &mut self,
        _src: ObjectReference,
        _slot: SimpleSlot,
        _target: Option<ObjectReference>,
    ) {
    }
}

/// Dirties the card of every object that has a reference stored into it. Mod-union tables and
/// remembered sets are built from these cards.
pub struct CardMarkingBarrier<'a> {
    card_table: &'a CardTable,
}

impl<'a> CardMarkingBarrier<'a> {
    pub fn new(card_table: &'a CardTable) -> Self {
        CardMarkingBarrier { card_table }
    }
}

impl Barrier for CardMarkingBarrier<'_> {
    fn object_reference_write_post(
        &mut self,
        src: ObjectReference,
        _slot: SimpleSlot,
        target: Option<ObjectReference>,
    ) {
        // Storing null cannot create a cross-space reference.
        if target.is_some() {
            self.card_table.mark_card(src.to_raw_address());
        }
    }
}
