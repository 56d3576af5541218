//! Allocators that back the non-moving and large object spaces.

pub mod free_list_allocator;

pub use self::free_list_allocator::FreeListAllocator;
