//! ssgc is a stop-the-world semi-space collector for a managed heap.
//!
//! The heap ([`Heap`]) is made of:
//! * two semi-spaces, one of which mutators allocate into, evacuated by every collection,
//! * a non-moving space over a free-list allocator, reclaimed by sweeping,
//! * a large object space for objects too big to copy,
//! * an optional image space and, after [`Heap::pre_zygote_fork`], a zygote space. These are
//!   immune: collections never trace them as a whole, and learn about their references into the
//!   rest of the heap from mod-union tables built from the card table.
//!
//! The runtime embedding the collector implements [`vm::VMBinding`] to tell it how objects are
//! laid out, where the roots are and how reference objects work. Mutators store references
//! through the card-marking write barrier ([`Heap::write_barrier`]).
//!
//! A collection either covers the whole heap, or only evacuates the from-space, taking the
//! references from the non-moving space out of its remembered set.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod heap;
pub mod plan;
pub mod policy;
pub mod util;
pub mod vm;

pub use crate::heap::Heap;
pub use crate::plan::{AllocationSemantics, CollectionScope};
pub use crate::util::statistics::CollectionStats;

#[cfg(test)]
mod tests;
