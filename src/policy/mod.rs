//! Spaces, the regions of the heap that each follow one allocation and reclamation policy, and
//! the per-space summaries of cross-space references.

pub mod space;

pub mod bumppointerspace;
pub mod imagespace;
pub mod largeobjectspace;
pub mod mallocspace;
pub mod remset;
pub mod zygotespace;
