//! The object header word shared by the runtime's locking and hashing and by the collector's
//! forwarding. All bit packing of the header lives in this module.
//!
//! Layout of the raw word (64-bit):
//!
//! ```text
//! |63 62|61                          32|31                          0|
//! |state|                 state specific payload                     |
//!  00    thin lock:  recursion count (bits 32..48) | owner thread id (low 32 bits)
//!  01    fat lock:   monitor id (low 32 bits)
//!  10    hash code:  hash (low 32 bits)
//!  11    forwarding: forwarding address >> 3
//! ```
//!
//! A thin lock with owner 0 is the unlocked state, so a zeroed header is an unlocked object.

use crate::util::constants::{BYTES_IN_ADDRESS, LOG_OBJECT_ALIGNMENT};
use crate::util::Address;

// The packing below assumes a 64-bit header word.
static_assertions::const_assert_eq!(BYTES_IN_ADDRESS, 8);

const STATE_SHIFT: usize = 62;
const STATE_MASK: usize = 0b11 << STATE_SHIFT;
const STATE_THIN_OR_UNLOCKED: usize = 0b00;
const STATE_FAT: usize = 0b01;
const STATE_HASH: usize = 0b10;
const STATE_FORWARDING: usize = 0b11;

const THIN_OWNER_MASK: usize = 0xffff_ffff;
const THIN_COUNT_SHIFT: usize = 32;
const THIN_COUNT_MASK: usize = 0xffff;
const LOW_32_MASK: usize = 0xffff_ffff;
const FORWARDING_ADDRESS_SHIFT: u8 = LOG_OBJECT_ALIGNMENT;

/// The largest recursion count a thin lock can hold before it must be inflated.
pub const MAX_THIN_LOCK_COUNT: u16 = u16::MAX;

/// Decoded header state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockWord {
    Unlocked,
    ThinLocked { owner: u32, count: u16 },
    HashCode(u32),
    FatLocked(u32),
    /// The object has been evacuated to this address.
    ForwardingAddress(Address),
}

impl LockWord {
    /// Decode a raw header word.
    pub fn from_raw(raw: usize) -> LockWord {
        match (raw & STATE_MASK) >> STATE_SHIFT {
            STATE_THIN_OR_UNLOCKED => {
                let owner = (raw & THIN_OWNER_MASK) as u32;
                if owner == 0 {
                    debug_assert_eq!(raw, 0, "unlocked lock word with payload {:#x}", raw);
                    LockWord::Unlocked
                } else {
                    LockWord::ThinLocked {
                        owner,
                        count: ((raw >> THIN_COUNT_SHIFT) & THIN_COUNT_MASK) as u16,
                    }
                }
            }
            STATE_FAT => LockWord::FatLocked((raw & LOW_32_MASK) as u32),
            STATE_HASH => LockWord::HashCode((raw & LOW_32_MASK) as u32),
            STATE_FORWARDING => {
                let addr = (raw & !STATE_MASK) << FORWARDING_ADDRESS_SHIFT;
                LockWord::ForwardingAddress(unsafe { Address::from_usize(addr) })
            }
            _ => unreachable!(),
        }
    }

    /// Encode into a raw header word.
    pub fn to_raw(self) -> usize {
        match self {
            LockWord::Unlocked => 0,
            LockWord::ThinLocked { owner, count } => {
                assert!(owner != 0, "thin lock owner 0 is reserved for unlocked");
                (STATE_THIN_OR_UNLOCKED << STATE_SHIFT)
                    | ((count as usize) << THIN_COUNT_SHIFT)
                    | owner as usize
            }
            LockWord::FatLocked(monitor) => (STATE_FAT << STATE_SHIFT) | monitor as usize,
            LockWord::HashCode(hash) => (STATE_HASH << STATE_SHIFT) | hash as usize,
            LockWord::ForwardingAddress(addr) => {
                assert!(
                    addr.is_aligned_to(1 << FORWARDING_ADDRESS_SHIFT),
                    "forwarding address {} is not object aligned",
                    addr
                );
                let shifted = addr.as_usize() >> FORWARDING_ADDRESS_SHIFT;
                assert!(
                    shifted & STATE_MASK == 0,
                    "forwarding address {} does not fit in a lock word",
                    addr
                );
                (STATE_FORWARDING << STATE_SHIFT) | shifted
            }
        }
    }

    pub fn forwarding_address(self) -> Option<Address> {
        match self {
            LockWord::ForwardingAddress(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn is_forwarded(self) -> bool {
        matches!(self, LockWord::ForwardingAddress(_))
    }

    /// The thread holding the lock, if the word is thin locked.
    pub fn thin_lock_owner(self) -> Option<u32> {
        match self {
            LockWord::ThinLocked { owner, .. } => Some(owner),
            _ => None,
        }
    }
}
