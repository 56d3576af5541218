use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::VMBinding;
use enum_map::Enum;
use strum_macros::Display;

/// The strength of a reference object, strongest first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, Display)]
pub enum ReferenceKind {
    /// Cleared only when the collector is asked to clear soft references.
    Soft,
    /// Cleared as soon as the referent is not strongly reachable.
    Weak,
    /// Keeps an object with a finalizer alive until the finalizer has run.
    Finalizer,
    /// Cleared once the referent is not reachable at all, even through finalizers.
    Phantom,
}

/// VM-specific methods for reference objects (`java.lang.ref.Reference` and friends).
pub trait ReferenceGlue<VM: VMBinding> {
    /// Return the kind of `object` if it is a reference object.
    fn reference_kind(object: ObjectReference) -> Option<ReferenceKind>;

    /// The slot holding the referent of a reference object.
    fn referent_slot(reference: ObjectReference) -> SimpleSlot;

    fn get_referent(reference: ObjectReference) -> Option<ObjectReference> {
        Self::referent_slot(reference).load()
    }

    fn set_referent(reference: ObjectReference, referent: ObjectReference) {
        Self::referent_slot(reference).store(referent)
    }

    fn clear_referent(reference: ObjectReference) {
        Self::referent_slot(reference).clear()
    }

    /// Hand references that were cleared (or, for finalizer references, whose referent was
    /// resurrected) to the runtime, which puts them on their reference queues after the
    /// collection.
    fn enqueue_references(references: &[ObjectReference]);
}
