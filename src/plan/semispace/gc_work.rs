//! Marking and evacuation for one semi-space collection.

use super::global::SemiSpace;
use crate::heap::Heap;
use crate::plan::tracing::{ObjectMarker, ReferenceTracer};
use crate::policy::space::{ContinuousSpace, Space};
use crate::util::memory::copy_avoid_dirty;
use crate::util::object_forwarding;
use crate::util::reference_processor::ReferenceProcessor;
use crate::util::statistics::ObjectBytePair;
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, ReferenceGlue, Scanning, SimpleSlot, VMBinding};

/// The collector while it traces a heap: the collector's own state plus shared access to the
/// heap it collects.
pub struct SemiSpaceMarker<'a, VM: VMBinding> {
    pub(super) ss: &'a mut SemiSpace<VM>,
    pub(super) heap: &'a Heap<VM>,
}

impl<'a, VM: VMBinding> SemiSpaceMarker<'a, VM> {
    pub fn new(ss: &'a mut SemiSpace<VM>, heap: &'a Heap<VM>) -> Self {
        SemiSpaceMarker { ss, heap }
    }

    /// Copy `object` into to-space and return the copy. The forwarding pointer is not
    /// installed here.
    fn copy_object(&mut self, object: ObjectReference) -> ObjectReference {
        let size = VM::VMObjectModel::get_current_size(object);
        let to_space = self.heap.to_space();
        let Some(dest) = to_space.alloc(size) else {
            panic!(
                "to-space exhausted: cannot copy {} of {} bytes into {} ({} of {} bytes used)",
                object,
                size,
                to_space.name(),
                to_space.size(),
                to_space.capacity()
            );
        };
        let saved = unsafe { copy_avoid_dirty(dest, object.to_raw_address(), size) };
        self.ss.stats.moved += ObjectBytePair::new(1, size);
        self.ss.stats.saved_bytes += saved;
        // Allocation never returns address zero.
        unsafe { ObjectReference::from_raw_address_unchecked(dest) }
    }

    /// Whether the card of `holder` has to be dirtied after one of its fields was pointed at
    /// `target`. Objects outside the semi-spaces that refer into to-space must stay on a dirty
    /// card, or the next from-space-only collection would miss the reference.
    fn needs_card(&self, holder: ObjectReference, target: ObjectReference) -> bool {
        let to_space = self.heap.to_space();
        to_space.contains(target) && !to_space.contains(holder)
    }

    fn update_field(&mut self, holder: ObjectReference, slot: SimpleSlot) {
        let Some(object) = slot.load() else {
            return;
        };
        let new_object = self.mark_object(object);
        if new_object != object {
            slot.store(new_object);
        }
        if self.needs_card(holder, new_object) {
            self.heap.card_table().mark_card(holder.to_raw_address());
        }
    }

    /// Mark every object `object` refers to, and update its fields to the new addresses. The
    /// referent of a reference object is delayed.
    pub fn scan_object(&mut self, object: ObjectReference) {
        debug_assert!(
            !self.heap.from_space().contains(object),
            "scanning from-space object {}",
            object
        );
        debug_assert_eq!(
            self.is_marked(object),
            Some(object),
            "scanning unmarked object {}",
            object
        );
        VM::VMScanning::scan_object(object, &mut |slot| self.update_field(object, slot));
        if VM::VMReferenceGlue::reference_kind(object).is_some() {
            self.delay_reference_referent(object);
        }
    }
}

impl<VM: VMBinding> ObjectMarker for SemiSpaceMarker<'_, VM> {
    fn mark_object(&mut self, object: ObjectReference) -> ObjectReference {
        let heap = self.heap;
        if heap.from_space().contains(object) {
            let mut copied = false;
            let new_object = object_forwarding::forward_object::<VM, _>(object, || {
                copied = true;
                self.copy_object(object)
            });
            if copied {
                self.ss.mark_stack.push(new_object);
            }
            return new_object;
        }
        if heap.to_space().contains(object) || self.ss.immune_region.contains_object(object) {
            return object;
        }
        let los = heap.large_object_space();
        if los.contains(object) {
            if !self.ss.los_immune && !los.test_and_set_mark(object) {
                self.ss.mark_stack.push(object);
            }
            return object;
        }
        let Some(space) = heap.find_continuous_space(object) else {
            panic!("{} is not in any space", object);
        };
        let Some(mark_bitmap) = space.mark_bitmap() else {
            panic!("{} is in {}, which has no mark bitmap", object, space.name());
        };
        // With bound bitmaps this finds every live object already marked.
        if !mark_bitmap.atomic_test_and_set(object.to_raw_address()) {
            self.ss.mark_stack.push(object);
        }
        object
    }

    fn delay_reference_referent(&mut self, reference: ObjectReference) {
        let Some(referent) = VM::VMReferenceGlue::get_referent(reference) else {
            return;
        };
        match self.is_marked(referent) {
            Some(new_referent) => {
                if new_referent != referent {
                    self.store_referent(reference, new_referent);
                }
            }
            None => {
                let Some(kind) = VM::VMReferenceGlue::reference_kind(reference) else {
                    panic!("{} is not a reference object", reference);
                };
                self.ss.reference_processor.add_candidate(kind, reference);
            }
        }
    }
}

impl<VM: VMBinding> ReferenceTracer for SemiSpaceMarker<'_, VM> {
    fn is_marked(&self, object: ObjectReference) -> Option<ObjectReference> {
        let heap = self.heap;
        if heap.from_space().contains(object) {
            return object_forwarding::read_forwarding_pointer::<VM>(object);
        }
        if heap.to_space().contains(object) || self.ss.immune_region.contains_object(object) {
            return Some(object);
        }
        let los = heap.large_object_space();
        if los.contains(object) {
            return (self.ss.los_immune || los.is_marked(object)).then_some(object);
        }
        let Some(space) = heap.find_continuous_space(object) else {
            panic!("{} is not in any space", object);
        };
        space
            .mark_bitmap()
            .is_some_and(|bitmap| bitmap.test(object.to_raw_address()))
            .then_some(object)
    }

    fn process_mark_stack(&mut self) {
        while let Some(object) = self.ss.mark_stack.pop() {
            self.scan_object(object);
        }
    }

    fn store_referent(&mut self, reference: ObjectReference, referent: ObjectReference) {
        VM::VMReferenceGlue::set_referent(reference, referent);
        if self.needs_card(reference, referent) {
            self.heap.card_table().mark_card(reference.to_raw_address());
        }
    }

    fn reference_processor(&mut self) -> &mut ReferenceProcessor {
        &mut self.ss.reference_processor
    }
}
