//! The semi-space copying collector.

mod gc_work;
mod global;

pub use self::gc_work::SemiSpaceMarker;
pub use self::global::SemiSpace;
