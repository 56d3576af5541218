use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::VMBinding;

/// Callback trait of scanning functions that report slots.
pub trait SlotVisitor {
    /// Call this function for each slot.
    fn visit_slot(&mut self, slot: SimpleSlot);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(SimpleSlot)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: SimpleSlot) {
        self(slot)
    }
}

/// VM-specific methods for scanning roots and objects.
pub trait Scanning<VM: VMBinding> {
    /// Visit every reference field of `object`.
    ///
    /// The referent field of a reference object (see
    /// [`ReferenceGlue`](crate::vm::ReferenceGlue)) must not be reported. The collector
    /// handles referents separately.
    ///
    /// Arguments:
    /// * `object`: The object to be scanned.
    /// * `slot_visitor`: Called back for each slot, whether or not it currently holds null.
    fn scan_object<SV: SlotVisitor>(object: ObjectReference, slot_visitor: &mut SV);

    /// Visit every root slot: thread stacks, global handles, interned strings, class roots.
    /// The collector may overwrite any reported slot with a new address.
    fn scan_roots<SV: SlotVisitor>(slot_visitor: &mut SV);

    /// Sweep the weak tables the runtime owns (weak global handles, the monitor list, the
    /// intern table).
    ///
    /// Called once per collection after tracing is complete. `is_marked` returns the current
    /// address of a live object, or `None` if the object is dead. Entries for dead objects
    /// should be removed or cleared; entries for live objects should be updated.
    fn sweep_system_weaks(is_marked: &mut dyn FnMut(ObjectReference) -> Option<ObjectReference>);
}
