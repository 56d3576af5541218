//! Summaries of cross-space references, maintained from the card table.
//!
//! A [`ModUnionTable`] belongs to an immune space and remembers where that space refers into
//! the collected spaces, so that a collection only rescans what the mutator touched. A
//! [`RememberedSet`] belongs to a collected space and remembers which of its cards refer into
//! one other space.

mod mod_union_table;
mod remembered_set;

pub use self::mod_union_table::{CardCache, ModUnionTable, ModUnionTableError, ReferenceCache};
pub use self::remembered_set::RememberedSet;

use crate::policy::space::ContinuousSpace;
use crate::util::metadata::CardTable;
use crate::util::ObjectReference;
use crate::util::Address;
use crate::vm::{ReferenceGlue, Scanning, SimpleSlot, VMBinding};

/// A reference held by an object, as seen by the summaries.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Edge {
    /// An ordinary reference field.
    Field(SimpleSlot),
    /// The referent field of the reference object `reference`.
    Referent {
        reference: ObjectReference,
        slot: SimpleSlot,
    },
}

impl Edge {
    pub(crate) fn slot(self) -> SimpleSlot {
        match self {
            Edge::Field(slot) => slot,
            Edge::Referent { slot, .. } => slot,
        }
    }
}

/// Visit every reference field of `object`, the referent of a reference object included.
pub(crate) fn visit_edges<VM: VMBinding, F: FnMut(Edge)>(object: ObjectReference, mut visitor: F) {
    VM::VMScanning::scan_object(object, &mut |slot| visitor(Edge::Field(slot)));
    if VM::VMReferenceGlue::reference_kind(object).is_some() {
        visitor(Edge::Referent {
            reference: object,
            slot: VM::VMReferenceGlue::referent_slot(object),
        });
    }
}

/// Visit the live objects of `space` that start on the card beginning at `card`.
pub(crate) fn visit_card_objects<F: FnMut(ObjectReference)>(
    space: &dyn ContinuousSpace,
    card: Address,
    visitor: F,
) {
    let Some(live_bitmap) = space.live_bitmap() else {
        return;
    };
    let card_range = card..card + CardTable::CARD_SIZE;
    let range = Address::range_intersection(&card_range, &(space.begin()..space.end()));
    if !range.is_empty() {
        live_bitmap.visit_marked_range(range.start, range.end, visitor);
    }
}
