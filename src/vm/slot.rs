//! Slots are the places where object references are stored: object fields, root table entries,
//! reference referents.

use std::fmt::Debug;

use atomic::Atomic;

use crate::util::{Address, ObjectReference};

/// A slot holding a plain pointer, with the zero word as null.
///
/// A `SimpleSlot` points to a slot, and is not the slot itself. Copies point to the same slot.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleSlot {
    slot_addr: *mut Atomic<Address>,
}

impl SimpleSlot {
    /// Create a simple slot from an address.
    ///
    /// Arguments:
    /// *   `address`: The address in memory where an `ObjectReference` is stored.
    pub fn from_address(address: Address) -> Self {
        Self {
            slot_addr: address.to_mut_ptr(),
        }
    }

    /// Get the address of the slot.
    ///
    /// Return the address at which the `ObjectReference` is stored.
    pub fn as_address(&self) -> Address {
        Address::from_mut_ptr(self.slot_addr)
    }

    /// Load object reference from the slot. Returns `None` if the slot holds null.
    pub fn load(&self) -> Option<ObjectReference> {
        let addr = unsafe { (*self.slot_addr).load(atomic::Ordering::Relaxed) };
        ObjectReference::from_raw_address(addr)
    }

    /// Store the object reference `object` into the slot.
    pub fn store(&self, object: ObjectReference) {
        unsafe { (*self.slot_addr).store(object.to_raw_address(), atomic::Ordering::Relaxed) }
    }

    /// Store null into the slot.
    pub fn clear(&self) {
        unsafe { (*self.slot_addr).store(Address::ZERO, atomic::Ordering::Relaxed) }
    }
}

unsafe impl Send for SimpleSlot {}
unsafe impl Sync for SimpleSlot {}

impl Debug for SimpleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_address())
    }
}
