//! A minimal runtime binding for tests.
//!
//! Objects are laid out as:
//!
//! ```text
//! | lock word | shape word | reference fields ... | payload words ... |
//! ```
//!
//! The shape word packs the number of reference fields (bits 0..16), the object size in words
//! (bits 16..48) and the reference kind (bits 48..56, zero for ordinary objects). Field 0 of a
//! reference object is its referent; it is not reported by `scan_object`.
//!
//! Roots, the weak table and the enqueued references are thread local, so tests running in
//! parallel do not see each other's.

use crate::heap::Heap;
use crate::plan::barriers::Barrier;
use crate::plan::AllocationSemantics;
use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_PAGE, BYTES_IN_WORD};
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::{
    ObjectModel, ReferenceGlue, ReferenceKind, Scanning, SimpleSlot, SlotVisitor, VMBinding,
};
use std::cell::RefCell;

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockVM;
    type VMScanning = MockVM;
    type VMReferenceGlue = MockVM;
}

pub const HEADER_WORDS: usize = 2;
const SHAPE_OFFSET: usize = BYTES_IN_WORD;
const NUM_REFS_MASK: usize = 0xffff;
const SIZE_SHIFT: usize = 16;
const SIZE_MASK: usize = 0xffff_ffff;
const KIND_SHIFT: usize = 48;

thread_local! {
    static ROOTS: RefCell<Vec<usize>> = RefCell::new(vec![]);
    static WEAKS: RefCell<Vec<usize>> = RefCell::new(vec![]);
    static ENQUEUED: RefCell<Vec<ObjectReference>> = RefCell::new(vec![]);
}

fn encode_kind(kind: Option<ReferenceKind>) -> usize {
    match kind {
        None => 0,
        Some(ReferenceKind::Soft) => 1,
        Some(ReferenceKind::Weak) => 2,
        Some(ReferenceKind::Finalizer) => 3,
        Some(ReferenceKind::Phantom) => 4,
    }
}

fn decode_kind(bits: usize) -> Option<ReferenceKind> {
    match bits {
        0 => None,
        1 => Some(ReferenceKind::Soft),
        2 => Some(ReferenceKind::Weak),
        3 => Some(ReferenceKind::Finalizer),
        4 => Some(ReferenceKind::Phantom),
        _ => panic!("bad reference kind {}", bits),
    }
}

fn shape(object: ObjectReference) -> usize {
    unsafe { (object.to_raw_address() + SHAPE_OFFSET).load::<usize>() }
}

/// Size in bytes of an object with `num_refs` reference fields and `payload_words` words of
/// data.
pub const fn object_size(num_refs: usize, payload_words: usize) -> usize {
    (HEADER_WORDS + num_refs + payload_words) * BYTES_IN_WORD
}

/// Write the header of a new object at `addr`, which must be zeroed.
pub fn init_object(
    addr: Address,
    num_refs: usize,
    payload_words: usize,
    kind: Option<ReferenceKind>,
) -> ObjectReference {
    assert!(num_refs <= NUM_REFS_MASK);
    assert!(kind.is_none() || num_refs >= 1, "a reference object needs a referent field");
    let size_words = HEADER_WORDS + num_refs + payload_words;
    let shape = num_refs | (size_words << SIZE_SHIFT) | (encode_kind(kind) << KIND_SHIFT);
    unsafe { (addr + SHAPE_OFFSET).store(shape) };
    ObjectReference::from_raw_address(addr).unwrap()
}

pub fn num_refs(object: ObjectReference) -> usize {
    shape(object) & NUM_REFS_MASK
}

pub fn field_slot(object: ObjectReference, i: usize) -> SimpleSlot {
    assert!(i < num_refs(object), "{} has no field {}", object, i);
    SimpleSlot::from_address(object.to_raw_address() + (HEADER_WORDS + i) * BYTES_IN_WORD)
}

pub fn get_field(object: ObjectReference, i: usize) -> Option<ObjectReference> {
    field_slot(object, i).load()
}

fn payload_address(object: ObjectReference, i: usize) -> Address {
    object.to_raw_address() + (HEADER_WORDS + num_refs(object) + i) * BYTES_IN_WORD
}

pub fn payload_word(object: ObjectReference, i: usize) -> usize {
    unsafe { payload_address(object, i).load::<usize>() }
}

pub fn set_payload_word(object: ObjectReference, i: usize, value: usize) {
    unsafe { payload_address(object, i).store(value) }
}

/// Allocate and initialise an ordinary object.
pub fn alloc_object(
    heap: &Heap<MockVM>,
    semantics: AllocationSemantics,
    num_refs: usize,
    payload_words: usize,
) -> ObjectReference {
    let addr = heap
        .alloc(object_size(num_refs, payload_words), semantics)
        .unwrap();
    init_object(addr, num_refs, payload_words, None)
}

/// Allocate a reference object of `kind` pointing at `referent`.
pub fn alloc_reference(
    heap: &Heap<MockVM>,
    semantics: AllocationSemantics,
    kind: ReferenceKind,
    referent: Option<ObjectReference>,
) -> ObjectReference {
    let addr = heap.alloc(object_size(1, 0), semantics).unwrap();
    let reference = init_object(addr, 1, 0, Some(kind));
    set_field(heap, reference, 0, referent);
    reference
}

pub fn alloc_image_object(heap: &Heap<MockVM>, num_refs: usize) -> ObjectReference {
    let addr = heap.alloc_image_object(object_size(num_refs, 0)).unwrap();
    init_object(addr, num_refs, 0, None)
}

/// Store through the heap's write barrier.
pub fn set_field(
    heap: &Heap<MockVM>,
    holder: ObjectReference,
    i: usize,
    target: Option<ObjectReference>,
) {
    heap.barrier()
        .object_reference_write(holder, field_slot(holder, i), target);
}

/// Register a root. Returns its index.
pub fn add_root(object: ObjectReference) -> usize {
    ROOTS.with(|roots| {
        let mut roots = roots.borrow_mut();
        roots.push(object.to_raw_address().as_usize());
        roots.len() - 1
    })
}

pub fn root(i: usize) -> Option<ObjectReference> {
    ROOTS.with(|roots| {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(roots.borrow()[i]) })
    })
}

pub fn clear_root(i: usize) {
    ROOTS.with(|roots| roots.borrow_mut()[i] = 0)
}

/// Register an entry of the runtime's weak table. Returns its index.
pub fn add_weak(object: ObjectReference) -> usize {
    WEAKS.with(|weaks| {
        let mut weaks = weaks.borrow_mut();
        weaks.push(object.to_raw_address().as_usize());
        weaks.len() - 1
    })
}

pub fn weak(i: usize) -> Option<ObjectReference> {
    WEAKS.with(|weaks| {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(weaks.borrow()[i]) })
    })
}

/// References handed to the runtime since the last call.
pub fn take_enqueued() -> Vec<ObjectReference> {
    ENQUEUED.with(|enqueued| std::mem::take(&mut *enqueued.borrow_mut()))
}

/// Options for a heap of a few hundred kilobytes, with verification on.
pub fn small_heap_options() -> Options {
    let mut options = Options::without_env();
    options.image_space_size = 16 * BYTES_IN_PAGE;
    options.non_moving_space_initial_size = 16 * BYTES_IN_PAGE;
    options.non_moving_space_growth_limit = 64 * BYTES_IN_PAGE;
    options.non_moving_space_capacity = 128 * BYTES_IN_PAGE;
    options.semi_space_size = 64 * BYTES_IN_PAGE;
    options.large_object_space_size = 64 * BYTES_IN_PAGE;
    options.large_object_threshold = 12 * BYTES_IN_KBYTE;
    options.mark_stack_initial_capacity = 16;
    options.verify_mod_union_tables = true;
    options.verify_from_space_references = true;
    options
}

impl ObjectModel<MockVM> for MockVM {
    fn get_current_size(object: ObjectReference) -> usize {
        ((shape(object) >> SIZE_SHIFT) & SIZE_MASK) * BYTES_IN_WORD
    }

    fn dump_object(object: ObjectReference) -> String {
        format!(
            "{}(refs: {}, size: {})",
            object,
            num_refs(object),
            Self::get_current_size(object)
        )
    }
}

impl Scanning<MockVM> for MockVM {
    fn scan_object<SV: SlotVisitor>(object: ObjectReference, slot_visitor: &mut SV) {
        let first = if Self::reference_kind(object).is_some() {
            1
        } else {
            0
        };
        for i in first..num_refs(object) {
            slot_visitor.visit_slot(field_slot(object, i));
        }
    }

    fn scan_roots<SV: SlotVisitor>(slot_visitor: &mut SV) {
        // Visiting must not touch the root table, so work on a copy.
        let mut roots = ROOTS.with(|roots| roots.borrow().clone());
        for root in roots.iter_mut() {
            slot_visitor.visit_slot(SimpleSlot::from_address(Address::from_mut_ptr(root)));
        }
        ROOTS.with(|table| *table.borrow_mut() = roots);
    }

    fn sweep_system_weaks(is_marked: &mut dyn FnMut(ObjectReference) -> Option<ObjectReference>) {
        WEAKS.with(|weaks| {
            for entry in weaks.borrow_mut().iter_mut() {
                let Some(object) =
                    ObjectReference::from_raw_address(unsafe { Address::from_usize(*entry) })
                else {
                    continue;
                };
                *entry = is_marked(object).map_or(0, |new| new.to_raw_address().as_usize());
            }
        })
    }
}

impl ReferenceGlue<MockVM> for MockVM {
    fn reference_kind(object: ObjectReference) -> Option<ReferenceKind> {
        decode_kind(shape(object) >> KIND_SHIFT)
    }

    fn referent_slot(reference: ObjectReference) -> SimpleSlot {
        field_slot(reference, 0)
    }

    fn enqueue_references(references: &[ObjectReference]) {
        ENQUEUED.with(|enqueued| enqueued.borrow_mut().extend_from_slice(references))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Words([usize; 8]);

    #[test]
    fn shape_round_trip() {
        let mut words = Words([0; 8]);
        let addr = Address::from_mut_ptr(&mut words.0[0]);
        let object = init_object(addr, 2, 3, Some(ReferenceKind::Phantom));
        assert_eq!(num_refs(object), 2);
        assert_eq!(MockVM::get_current_size(object), object_size(2, 3));
        assert_eq!(MockVM::reference_kind(object), Some(ReferenceKind::Phantom));

        let mut slots = vec![];
        MockVM::scan_object(object, &mut |slot: SimpleSlot| slots.push(slot));
        // The referent is not a field.
        assert_eq!(slots, vec![field_slot(object, 1)]);
    }
}
