//! Types shared by the heap and the collector.

use enum_map::Enum;
use strum_macros::Display;

/// Allocation semantics the heap provides.
/// Each allocation request names the semantic of the object to allocate.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Enum, PartialEq, Eq)]
pub enum AllocationSemantics {
    /// No specific requirement. Small objects go to the current semi-space and may be moved by
    /// any collection. Objects at or above the large object threshold go to the large object
    /// space.
    Default = 0,
    /// Large objects are allocated with page granularity and are never moved.
    Los = 1,
    /// Non moving objects will not be moved by GC. They live in the non-moving space and are
    /// reclaimed by sweeping.
    NonMoving = 2,
}

/// Which part of the heap a collection reclaims.
#[derive(Clone, Copy, Debug, Enum, PartialEq, Eq, Display)]
pub enum CollectionScope {
    /// Evacuate the from-space, and trace and sweep the non-moving and large object spaces.
    WholeHeap,
    /// Only evacuate the from-space. Everything else is assumed live; references from the
    /// non-moving space come from its remembered set, references from large objects from a scan
    /// of every large object.
    FromSpaceOnly,
}
