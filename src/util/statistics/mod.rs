//! Per-collection and cumulative accounting.

pub mod phase_timer;

pub use self::phase_timer::PhaseTimer;

use std::fmt;
use std::ops::AddAssign;
use std::time::Duration;

/// A count of objects and the bytes they occupy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectBytePair {
    pub objects: usize,
    pub bytes: usize,
}

impl ObjectBytePair {
    pub const fn new(objects: usize, bytes: usize) -> Self {
        ObjectBytePair { objects, bytes }
    }
}

impl AddAssign for ObjectBytePair {
    fn add_assign(&mut self, other: Self) {
        self.objects += other.objects;
        self.bytes += other.bytes;
    }
}

/// What one collection did.
#[derive(Clone, Debug, Default)]
pub struct CollectionStats {
    /// Objects freed from continuous spaces, including the evacuated from-space.
    pub freed: ObjectBytePair,
    /// Objects freed from the large object space.
    pub freed_large: ObjectBytePair,
    /// Objects copied into to-space.
    pub moved: ObjectBytePair,
    /// Bytes whose write was skipped while copying, because the source page was zero.
    pub saved_bytes: usize,
    pub phase_times: Vec<(&'static str, Duration)>,
    pub duration: Duration,
}

impl fmt::Display for CollectionStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "freed {}({}B) objects, {}({}B) large objects, moved {}({}B) objects, saved {}B, paused {:?}",
            self.freed.objects,
            self.freed.bytes,
            self.freed_large.objects,
            self.freed_large.bytes,
            self.moved.objects,
            self.moved.bytes,
            self.saved_bytes,
            self.duration
        )
    }
}

/// Totals over the lifetime of a collector.
#[derive(Clone, Debug, Default)]
pub struct CumulativeStats {
    pub collections: usize,
    pub freed: ObjectBytePair,
    pub freed_large: ObjectBytePair,
    pub moved: ObjectBytePair,
    pub saved_bytes: usize,
    pub total_time: Duration,
}

impl CumulativeStats {
    pub fn record(&mut self, stats: &CollectionStats) {
        self.collections += 1;
        self.freed += stats.freed;
        self.freed_large += stats.freed_large;
        self.moved += stats.moved;
        self.saved_bytes += stats.saved_bytes;
        self.total_time += stats.duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_sums_cycles() {
        let mut total = CumulativeStats::default();
        let cycle = CollectionStats {
            freed: ObjectBytePair::new(3, 96),
            moved: ObjectBytePair::new(1, 32),
            saved_bytes: 4096,
            duration: Duration::from_millis(2),
            ..Default::default()
        };
        total.record(&cycle);
        total.record(&cycle);
        assert_eq!(total.collections, 2);
        assert_eq!(total.freed, ObjectBytePair::new(6, 192));
        assert_eq!(total.moved, ObjectBytePair::new(2, 64));
        assert_eq!(total.saved_bytes, 8192);
        assert_eq!(total.total_time, Duration::from_millis(4));
    }
}
