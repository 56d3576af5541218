//! Soft, weak, finalizer and phantom reference handling.
//!
//! While tracing, reference objects whose referent is not yet marked are delayed here instead
//! of having their referent marked. Once the strong closure is complete the collector calls
//! [`ReferenceProcessor::process_references`], which decides for each delayed reference whether
//! its referent is kept, resurrected or cleared.

use crate::plan::tracing::ReferenceTracer;
use crate::util::ObjectReference;
use crate::vm::{ReferenceGlue, ReferenceKind, VMBinding};
use enum_map::EnumMap;

#[derive(Default)]
pub struct ReferenceProcessor {
    pending: EnumMap<ReferenceKind, Vec<ObjectReference>>,
}

impl ReferenceProcessor {
    pub fn add_candidate(&mut self, kind: ReferenceKind, reference: ObjectReference) {
        trace!("Delay {} reference {}", kind, reference);
        self.pending[kind].push(reference);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(|queue| queue.is_empty())
    }

    pub fn pending_count(&self, kind: ReferenceKind) -> usize {
        self.pending[kind].len()
    }

    fn take(&mut self, kind: ReferenceKind) -> Vec<ObjectReference> {
        std::mem::take(&mut self.pending[kind])
    }

    /// Decide the fate of every delayed reference. Returns the references to hand to the
    /// runtime's reference queues.
    ///
    /// Marking done here can find more reference objects, which are delayed into the same
    /// processor; each stage drains its queue until nothing new shows up.
    pub fn process_references<VM: VMBinding, T: ReferenceTracer>(
        tracer: &mut T,
        clear_soft_references: bool,
    ) -> Vec<ObjectReference> {
        let mut cleared = vec![];

        if !clear_soft_references {
            // Soft referents are kept alive, and so is everything they reach.
            loop {
                let soft = tracer.reference_processor().take(ReferenceKind::Soft);
                if soft.is_empty() {
                    break;
                }
                for reference in soft {
                    Self::retain_referent::<VM, T>(tracer, reference);
                }
                tracer.process_mark_stack();
            }
        }

        Self::clear_white_references::<VM, T>(tracer, ReferenceKind::Soft, &mut cleared);
        Self::clear_white_references::<VM, T>(tracer, ReferenceKind::Weak, &mut cleared);

        // Objects that need finalization are resurrected until their finalizer has run.
        loop {
            let finalizers = tracer.reference_processor().take(ReferenceKind::Finalizer);
            if finalizers.is_empty() {
                break;
            }
            for reference in finalizers {
                let Some(referent) = VM::VMReferenceGlue::get_referent(reference) else {
                    continue;
                };
                match tracer.is_marked(referent) {
                    Some(new_referent) => {
                        if new_referent != referent {
                            tracer.store_referent(reference, new_referent);
                        }
                    }
                    None => {
                        let new_referent = tracer.mark_object(referent);
                        tracer.store_referent(reference, new_referent);
                        trace!("Resurrect {} for finalization by {}", new_referent, reference);
                        cleared.push(reference);
                    }
                }
            }
            tracer.process_mark_stack();
        }

        // Soft and weak references only reachable from finalizable objects.
        Self::clear_white_references::<VM, T>(tracer, ReferenceKind::Soft, &mut cleared);
        Self::clear_white_references::<VM, T>(tracer, ReferenceKind::Weak, &mut cleared);
        Self::clear_white_references::<VM, T>(tracer, ReferenceKind::Phantom, &mut cleared);

        debug_assert!(tracer.reference_processor().is_empty());
        debug!("{} references cleared or resurrected", cleared.len());
        cleared
    }

    fn retain_referent<VM: VMBinding, T: ReferenceTracer>(
        tracer: &mut T,
        reference: ObjectReference,
    ) {
        if let Some(referent) = VM::VMReferenceGlue::get_referent(reference) {
            let new_referent = tracer.mark_object(referent);
            if new_referent != referent {
                tracer.store_referent(reference, new_referent);
            }
        }
    }

    /// Clear the referent of every pending reference of `kind` whose referent is unmarked.
    /// References whose referent was marked in the meantime get the referent's new address.
    fn clear_white_references<VM: VMBinding, T: ReferenceTracer>(
        tracer: &mut T,
        kind: ReferenceKind,
        cleared: &mut Vec<ObjectReference>,
    ) {
        for reference in tracer.reference_processor().take(kind) {
            let Some(referent) = VM::VMReferenceGlue::get_referent(reference) else {
                continue;
            };
            match tracer.is_marked(referent) {
                Some(new_referent) => {
                    if new_referent != referent {
                        tracer.store_referent(reference, new_referent);
                    }
                }
                None => {
                    trace!("Clear {} reference {}", kind, reference);
                    VM::VMReferenceGlue::clear_referent(reference);
                    cleared.push(reference);
                }
            }
        }
    }
}
