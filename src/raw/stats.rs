#[cfg(feature = "stats")]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "stats")]
use super::utils::{shard_count, CachePadded};
use super::utils::Pause;

/// Operation counters for a table.
///
/// Counters are only collected when the `stats` feature is enabled. Without
/// it, every field is always zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Stats {
    /// Successful inserts.
    pub insert: usize,
    /// Inserts that found the key already present.
    pub insert_dup: usize,
    /// Attempts to publish a claimed slot.
    pub insert_attempt: usize,
    /// Inserts redirected to a newer generation.
    pub insert_forwarded: usize,
    /// Entries moved into a newer generation by a resize.
    pub insert_resize: usize,
    /// Remove calls.
    pub remove: usize,
    /// Removals that found the key.
    pub remove_found: usize,
    /// Removals redirected to a newer generation.
    pub remove_forwarded: usize,
    /// Membership tests.
    pub contains: usize,
    /// Membership tests that found the key.
    pub contains_found: usize,
    /// Membership tests redirected to a newer generation.
    pub contains_forwarded: usize,
    /// Lookups.
    pub lookup: usize,
    /// Lookups that found the key.
    pub lookup_found: usize,
    /// Lookups redirected to a newer generation.
    pub lookup_forwarded: usize,
    /// Resizes started.
    pub resize: usize,
    /// Resizes joined by a thread that lost the election.
    pub resize_assist: usize,
    /// Buckets copied during resize finalization.
    pub resize_cleanup: usize,
    /// Tombstones physically unlinked.
    pub reclaim: usize,
    /// Slot claims that exhausted a neighborhood.
    pub neighborhood_full: usize,
    /// Lost compare-and-swap races.
    pub cas_collision: usize,
    /// Busy-wait pauses.
    pub spin: usize,
    /// Scheduler yields.
    pub yields: usize,
    /// Sleeps.
    pub sleep: usize,
}

#[derive(Clone, Copy)]
pub enum Stat {
    Insert,
    InsertDup,
    InsertAttempt,
    InsertForwarded,
    InsertResize,
    Remove,
    RemoveFound,
    RemoveForwarded,
    Contains,
    ContainsFound,
    ContainsForwarded,
    Lookup,
    LookupFound,
    LookupForwarded,
    Resize,
    ResizeAssist,
    ResizeCleanup,
    Reclaim,
    NeighborhoodFull,
    CasCollision,
    Spin,
    Yield,
    Sleep,
}

#[cfg(feature = "stats")]
const STATS: usize = Stat::Sleep as usize + 1;

// Per-thread counters, aggregated on demand.
pub struct StatsCollector {
    #[cfg(feature = "stats")]
    shards: Box<[CachePadded<[AtomicUsize; STATS]>]>,
}

impl StatsCollector {
    pub fn new() -> StatsCollector {
        StatsCollector {
            #[cfg(feature = "stats")]
            shards: (0..shard_count())
                .map(|_| Default::default())
                .collect(),
        }
    }

    // Record a single occurrence of `stat`.
    #[inline(always)]
    pub fn record(&self, stat: Stat, guard: &impl seize::Guard) {
        #[cfg(feature = "stats")]
        {
            let shard = guard.thread_id() & (self.shards.len() - 1);
            self.shards[shard][stat as usize].fetch_add(1, Ordering::Relaxed);
        }

        #[cfg(not(feature = "stats"))]
        let _ = (stat, guard);
    }

    // Record a backoff pause.
    #[inline(always)]
    pub fn pause(&self, pause: Pause, guard: &impl seize::Guard) {
        let stat = match pause {
            Pause::Spin => Stat::Spin,
            Pause::Yield => Stat::Yield,
            Pause::Sleep => Stat::Sleep,
        };

        self.record(stat, guard);
    }

    // Sum the counters of every thread.
    pub fn snapshot(&self) -> Stats {
        #[cfg(feature = "stats")]
        {
            let mut totals = [0; STATS];
            for shard in self.shards.iter() {
                for (total, counter) in totals.iter_mut().zip(shard.iter()) {
                    *total += counter.load(Ordering::Relaxed);
                }
            }

            let get = |stat: Stat| totals[stat as usize];

            Stats {
                insert: get(Stat::Insert),
                insert_dup: get(Stat::InsertDup),
                insert_attempt: get(Stat::InsertAttempt),
                insert_forwarded: get(Stat::InsertForwarded),
                insert_resize: get(Stat::InsertResize),
                remove: get(Stat::Remove),
                remove_found: get(Stat::RemoveFound),
                remove_forwarded: get(Stat::RemoveForwarded),
                contains: get(Stat::Contains),
                contains_found: get(Stat::ContainsFound),
                contains_forwarded: get(Stat::ContainsForwarded),
                lookup: get(Stat::Lookup),
                lookup_found: get(Stat::LookupFound),
                lookup_forwarded: get(Stat::LookupForwarded),
                resize: get(Stat::Resize),
                resize_assist: get(Stat::ResizeAssist),
                resize_cleanup: get(Stat::ResizeCleanup),
                reclaim: get(Stat::Reclaim),
                neighborhood_full: get(Stat::NeighborhoodFull),
                cas_collision: get(Stat::CasCollision),
                spin: get(Stat::Spin),
                yields: get(Stat::Yield),
                sleep: get(Stat::Sleep),
            }
        }

        #[cfg(not(feature = "stats"))]
        Stats::default()
    }

    // Reset every counter.
    pub fn clear(&self) {
        #[cfg(feature = "stats")]
        for shard in self.shards.iter() {
            for counter in shard.iter() {
                counter.store(0, Ordering::Relaxed);
            }
        }
    }
}
