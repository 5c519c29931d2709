use std::sync::atomic::{AtomicIsize, Ordering};

use super::{shard_count, CachePadded};

// A sharded atomic counter.
//
// Every generation counts its own entries to decide when to grow, and the
// table keeps a second counter for its logical size. A single point of
// contention for either would serialize every insert and remove.
pub struct Counter(Box<[CachePadded<AtomicIsize>]>);

impl Default for Counter {
    fn default() -> Counter {
        let shards = (0..shard_count()).map(|_| Default::default()).collect();
        Counter(shards)
    }
}

impl Counter {
    // Return the shard for the given guard's thread.
    #[inline]
    pub fn get(&self, guard: &impl seize::Guard) -> &AtomicIsize {
        // Guard thread IDs are densely allocated, so contention between
        // shards is unlikely even with as many shards as CPUs.
        let shard = guard.thread_id() & (self.0.len() - 1);

        &self.0[shard]
    }

    // Adds one to the calling thread's shard.
    #[inline]
    pub fn increment(&self, guard: &impl seize::Guard) {
        self.get(guard).fetch_add(1, Ordering::Relaxed);
    }

    // Subtracts one from the calling thread's shard.
    #[inline]
    pub fn decrement(&self, guard: &impl seize::Guard) {
        self.get(guard).fetch_sub(1, Ordering::Relaxed);
    }

    // Returns the sum of all counter shards.
    #[inline]
    pub fn sum(&self) -> usize {
        self.0
            .iter()
            .map(|x| x.load(Ordering::Relaxed))
            .sum::<isize>()
            .try_into()
            // Depending on the order of deletion/insertions this might be negative,
            // in which case we assume the table is empty.
            .unwrap_or(0)
    }
}
