//! Interfaces the metadata structures use to hand references to the running collector.

use crate::util::reference_processor::ReferenceProcessor;
use crate::util::ObjectReference;
use crate::vm::SimpleSlot;

/// Marks objects on behalf of code that finds references outside the collector's own scan:
/// mod-union tables, remembered sets and the reference processor.
pub trait ObjectMarker {
    /// Mark `object` and return its current address. For an object that is evacuated this is
    /// the to-space copy.
    fn mark_object(&mut self, object: ObjectReference) -> ObjectReference;

    /// Mark the object held in `slot`, and update the slot if the object moved.
    fn mark_heap_reference(&mut self, slot: SimpleSlot) {
        if let Some(object) = slot.load() {
            let new_object = self.mark_object(object);
            if new_object != object {
                slot.store(new_object);
            }
        }
    }

    /// Process the referent of the reference object `reference` later, once the strength of
    /// the referent is known.
    fn delay_reference_referent(&mut self, reference: ObjectReference);
}

/// What reference processing needs from a collector on top of marking.
pub trait ReferenceTracer: ObjectMarker {
    /// The current address of `object` if it has been marked, `None` if it is not (yet) known
    /// to be reachable.
    fn is_marked(&self, object: ObjectReference) -> Option<ObjectReference>;

    /// Scan every object pushed by marking until the mark stack is empty.
    fn process_mark_stack(&mut self);

    /// Write `referent` into the referent field of `reference`.
    fn store_referent(&mut self, reference: ObjectReference, referent: ObjectReference);

    fn reference_processor(&mut self) -> &mut ReferenceProcessor;
}
