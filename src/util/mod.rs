//! Utilities used by the spaces and the collector.

/// Address and object reference types.
pub mod address;
/// Allocators backing the free-list spaces.
pub mod alloc;
/// Sizes and alignments.
pub mod constants;
/// Conversions between sizes and alignments.
pub mod conversions;
/// The object header word and its states.
pub mod lock_word;
/// Installs the built-in logger.
pub mod logger;
pub mod mark_stack;
/// Wrappers around `mmap` and friends.
pub mod memory;
/// Bitmaps and the card table.
pub mod metadata;
pub mod object_forwarding;
/// Run-time options.
pub mod options;
pub mod reference_processor;
pub mod statistics;
#[cfg(test)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
