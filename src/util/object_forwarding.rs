//! Forwarding state of evacuated objects, kept in the lock word of the from-space copy.

use crate::util::lock_word::LockWord;
use crate::util::{Address, ObjectReference};
use crate::vm::ObjectModel;
use crate::vm::VMBinding;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Read and decode the lock word of `object`.
pub fn load_lock_word<VM: VMBinding>(object: ObjectReference) -> LockWord {
    let addr = lock_word_address::<VM>(object);
    LockWord::from_raw(unsafe { addr.atomic_load::<AtomicUsize>(Ordering::Acquire) })
}

pub fn store_lock_word<VM: VMBinding>(object: ObjectReference, word: LockWord) {
    let addr = lock_word_address::<VM>(object);
    unsafe { addr.atomic_store::<AtomicUsize>(word.to_raw(), Ordering::Release) }
}

pub fn is_forwarded<VM: VMBinding>(object: ObjectReference) -> bool {
    load_lock_word::<VM>(object).is_forwarded()
}

/// Read the forwarding pointer of `object`, or `None` if it has not been evacuated.
pub fn read_forwarding_pointer<VM: VMBinding>(object: ObjectReference) -> Option<ObjectReference> {
    load_lock_word::<VM>(object)
        .forwarding_address()
        .and_then(ObjectReference::from_raw_address)
}

/// Install `new_object` as the forwarding pointer of `object`. This overwrites the lock word, so
/// the lock, hash or monitor state of the old copy is lost; the new copy carries it.
pub fn write_forwarding_pointer<VM: VMBinding>(
    object: ObjectReference,
    new_object: ObjectReference,
) {
    debug_assert!(
        !is_forwarded::<VM>(object),
        "{} is already forwarded to {:?}",
        object,
        read_forwarding_pointer::<VM>(object)
    );
    trace!("Forwarding {} to {}", object, new_object);
    store_lock_word::<VM>(
        object,
        LockWord::ForwardingAddress(new_object.to_raw_address()),
    );
}

/// Evacuate `object` with `copy` unless it is already forwarded, and return the new location.
///
/// `copy` must produce a complete copy of `object` (header included) before it returns. The
/// forwarding pointer is only published afterwards, so anyone who observes the forwarding state
/// also observes a fully copied object.
pub fn forward_object<VM: VMBinding, F: FnOnce() -> ObjectReference>(
    object: ObjectReference,
    copy: F,
) -> ObjectReference {
    if let Some(forwarded) = read_forwarding_pointer::<VM>(object) {
        return forwarded;
    }
    let new_object = copy();
    write_forwarding_pointer::<VM>(object, new_object);
    new_object
}

/// The address the lock word of `object` lives at.
pub fn lock_word_address<VM: VMBinding>(object: ObjectReference) -> Address {
    object.to_raw_address() + VM::VMObjectModel::LOCK_WORD_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::MockVM;

    #[repr(align(8))]
    struct Words([usize; 4]);

    fn object_in(words: &mut Words, index: usize) -> ObjectReference {
        ObjectReference::from_raw_address(Address::from_mut_ptr(&mut words.0[index])).unwrap()
    }

    #[test]
    fn forward_once() {
        let mut words = Words([0; 4]);
        let old = object_in(&mut words, 0);
        let new = object_in(&mut words, 2);
        assert!(!is_forwarded::<MockVM>(old));

        let mut copies = 0;
        let first = forward_object::<MockVM, _>(old, || {
            copies += 1;
            new
        });
        let second = forward_object::<MockVM, _>(old, || {
            copies += 1;
            unreachable!()
        });
        assert_eq!(first, new);
        assert_eq!(second, new);
        assert_eq!(copies, 1);
        assert_eq!(read_forwarding_pointer::<MockVM>(old), Some(new));
        assert_eq!(lock_word_address::<MockVM>(old), old.to_raw_address());
    }

    #[test]
    fn lock_states_are_not_forwarded() {
        let mut words = Words([0; 4]);
        let obj = object_in(&mut words, 0);
        store_lock_word::<MockVM>(obj, LockWord::HashCode(99));
        assert!(!is_forwarded::<MockVM>(obj));
        assert_eq!(read_forwarding_pointer::<MockVM>(obj), None);
        assert_eq!(load_lock_word::<MockVM>(obj), LockWord::HashCode(99));
    }
}
