use crate::util::ObjectReference;
use crate::vm::VMBinding;

/// VM-specific methods for object model.
///
/// The collector only needs two things from an object: where its lock word lives, so that it can
/// install a forwarding address, and how big it is, so that it can be copied and freed. Objects
/// are assumed to be contiguous, start at the object reference and be
/// [`OBJECT_ALIGNMENT`](crate::util::constants::OBJECT_ALIGNMENT) aligned.
pub trait ObjectModel<VM: VMBinding> {
    /// Byte offset of the lock word from the object reference. The lock word is one word and is
    /// encoded by [`LockWord`](crate::util::lock_word::LockWord).
    const LOCK_WORD_OFFSET: usize = 0;

    /// Return the size of the object in bytes, header included. The result must be a multiple of
    /// the object alignment. It must remain readable after the lock word of the object has been
    /// overwritten with a forwarding address.
    ///
    /// Arguments:
    /// * `object`: The object to be queried.
    fn get_current_size(object: ObjectReference) -> usize;

    /// A short human readable description of the object, used by dumps and verification
    /// failures.
    fn dump_object(object: ObjectReference) -> String {
        format!("{}", object)
    }
}
