//! The collector and the interfaces between it and the heap.
//!
//! * [`barriers`]: the write barrier the mutator runs on every reference store.
//! * [`immune_region`]: the address range a collection neither traces nor reclaims.
//! * [`tracing`]: what the metadata structures need from a running collector.
//! * [`semispace`]: the collector itself.

pub mod barriers;
pub mod global;
pub mod immune_region;
pub mod semispace;
pub mod tracing;

pub use self::global::AllocationSemantics;
pub use self::global::CollectionScope;
