use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;

use seize::Guard;

use super::alloc::{self, State, SEGMENT_SIZE};
use super::stats::Stat;
use super::table::{reclaim_table, EntryState, Entry, HashTable, Insert, Node, Table};
use super::utils::{Backoff, FetchTag};
use crate::trace::{debug, trace, warning};

// Capacities below this double on growth, larger ones grow by half.
const GROWTH_BAND: usize = 1 << 24;

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    // Grow a generation whose neighborhoods or load are exhausted.
    //
    // Returns `true` if the generation is now being resized.
    pub(super) fn auto_resize(&self, table: &Table<K, V>, guard: &impl Guard) -> bool {
        if table.next_table().is_some() {
            return true;
        }

        let state = table.state();
        let count = state.count.sum();

        let capacity = if count <= state.threshold.load(Ordering::Relaxed) {
            if table.capacity < GROWTH_BAND {
                table.capacity * 2
            } else {
                table.capacity + table.capacity / 2
            }
        } else {
            count * 2
        };

        self.resize(table, capacity, true, guard)
    }

    // Resize a generation to the given number of buckets.
    //
    // Returns `true` if the generation is being resized by this or another
    // thread.
    pub(super) fn resize(
        &self,
        table: &Table<K, V>,
        capacity: usize,
        enlarge_only: bool,
        guard: &impl Guard,
    ) -> bool {
        let state = table.state();

        if table.next_table().is_some() {
            return true;
        }

        // Never shrink below the entries currently present.
        let count = state.count.sum();
        let mut capacity = alloc::normalize_capacity(capacity);
        if alloc::threshold(capacity, self.max_fill()) < count {
            capacity = alloc::normalize_capacity(alloc::size_for_capacity(count + 1, self.max_fill()));
        }

        if capacity == table.capacity
            || (enlarge_only && (capacity as f64) < table.capacity as f64 * 1.1)
        {
            trace!("canceled resize from {} to {} buckets", table.capacity, capacity);
            return false;
        }

        // Another thread is allocating the next generation.
        if state.resize_lock.swap(true, Ordering::AcqRel) {
            return self.assist_resize(table, guard);
        }

        self.stats.record(Stat::Resize, guard);

        let threshold = alloc::threshold(capacity, self.max_fill());
        let Some(next) = Table::<K, V>::try_alloc(capacity, threshold) else {
            warning!(
                "failed to allocate {} buckets, continuing with {}",
                capacity, table.capacity
            );

            // Tolerate a higher load before trying again.
            let threshold = state.threshold.load(Ordering::Relaxed);
            state
                .threshold
                .store(threshold + (table.capacity - threshold) / 2, Ordering::Relaxed);

            state.status.set(State::ABORTED);
            state.resize_lock.store(false, Ordering::Release);
            return false;
        };

        debug!("resizing from {} to {} buckets", table.capacity, capacity);

        // Publish the next generation. From here on, writers to this
        // generation forward to it.
        state.next.store(next.raw, Ordering::Release);
        state.status.set(State::STARTED);

        self.notify_helper();
        self.copy_segments(table, usize::MAX, guard);
        true
    }

    // Wait for the winner of a resize election to publish the next
    // generation, then help copy.
    fn assist_resize(&self, table: &Table<K, V>, guard: &impl Guard) -> bool {
        self.stats.record(Stat::ResizeAssist, guard);

        table.state().status.wait_while(State::IDLE);
        self.copy_segments(table, usize::MAX, guard);

        table.next_table().is_some()
    }

    // Copy up to `budget` unclaimed segments of a generation.
    //
    // The thread that claims the index one past the last segment finalizes
    // the resize.
    pub(super) fn copy_segments(&self, table: &Table<K, V>, mut budget: usize, guard: &impl Guard) {
        let state = table.state();

        if state.status.load() != State::STARTED {
            return;
        }

        while budget > 0 {
            if state.claimed.load(Ordering::Relaxed) > state.segments {
                return;
            }

            let segment = state.claimed.fetch_add(1, Ordering::AcqRel);

            if segment < state.segments {
                self.copy_segment(table, segment, guard);
                budget -= 1;
                continue;
            }

            if segment == state.segments {
                self.finish_resize(table, guard);
            }

            return;
        }
    }

    // Copy every bucket of a segment.
    fn copy_segment(&self, table: &Table<K, V>, segment: usize, guard: &impl Guard) {
        let state = table.state();
        let start = segment * SEGMENT_SIZE;
        let end = (start + SEGMENT_SIZE).min(table.capacity);

        for bucket in start..end {
            // Another thread is copying this bucket, it will be revisited
            // during finalization.
            if !self.copy_chain(table, bucket, guard) {
                state.first_incomplete.fetch_min(bucket, Ordering::AcqRel);
                state.last_incomplete.fetch_max(bucket, Ordering::AcqRel);
            }
        }

        state.pending.consume();
    }

    // Copy a bucket's chain into the next generation.
    //
    // Returns `false` if another thread is copying the bucket and has not
    // finished yet.
    pub(super) fn copy_chain(&self, table: &Table<K, V>, bucket: usize, guard: &impl Guard) -> bool {
        let Some(next) = table.next_table() else {
            return false;
        };

        let hash_ptr = table.hash_ptr(bucket);
        let prev = hash_ptr.mark_stale();
        if prev.is_stale() {
            return prev.is_copied() || hash_ptr.load(Ordering::Acquire).is_copied();
        }

        // Let an in-place tombstone reuse finish.
        let mut backoff = Backoff::new();
        while hash_ptr.load(Ordering::Acquire).is_reclaiming() {
            self.stats.pause(backoff.snooze(), guard);
        }

        // Freeze the chain. Removals, updates and tombstone reuse fail from
        // here on and forward to the next generation.
        Self::walk_chain(table, bucket, |pos, _| {
            table.entry(pos).fetch_tag(Entry::FROZEN, Ordering::AcqRel);
        });

        Self::walk_chain(table, bucket, |_, raw| {
            if let EntryState::Live(entry) = EntryState::of(raw) {
                self.copy_node(next, entry.ptr, guard);
            }
        });

        hash_ptr.mark_copied();
        true
    }

    // Move a frozen node into the next generation.
    fn copy_node(&self, next: Table<K, V>, node: *mut Node<K, V>, guard: &impl Guard) {
        // Safety: Frozen nodes cannot be removed, so the node stays valid
        // for the duration of the copy.
        let hash = self.hash(unsafe { &(*node).key });
        self.stats.record(Stat::InsertResize, guard);

        match self.insert_from(next, hash, node, guard) {
            Insert::Inserted => {}
            // Keys are unique within a generation, and the next generation
            // sees no writes for this bucket until it is copied.
            Insert::Found { .. } => debug_assert!(false, "duplicate key copied into next generation"),
        }
    }

    // Wait for all segments to be copied, then promote the next generation.
    fn finish_resize(&self, table: &Table<K, V>, guard: &impl Guard) {
        let state = table.state();
        state.pending.wait();

        // Copy any buckets that raced with a forwarded operation.
        let first = state.first_incomplete.load(Ordering::Acquire);
        let last = state.last_incomplete.load(Ordering::Acquire);
        if first <= last {
            for bucket in first..=last {
                if table.hash_ptr(bucket).load(Ordering::Acquire).is_copied() {
                    continue;
                }

                self.stats.record(Stat::ResizeCleanup, guard);
                if !self.copy_chain(table, bucket, guard) {
                    self.wait_until_copied(table, bucket, guard);
                }
            }
        }

        state.status.set(State::DONE);
        debug!("finished copying {} buckets", table.capacity);

        self.promote(guard);
    }

    // Make sure a bucket has been copied to the next generation, copying it
    // ourselves if nobody else has started.
    pub(super) fn ensure_copied(&self, table: &Table<K, V>, bucket: usize, guard: &impl Guard) {
        if table.hash_ptr(bucket).load(Ordering::Acquire).is_copied() {
            return;
        }

        // Help the resize along.
        self.copy_segments(table, 1, guard);

        if !self.copy_chain(table, bucket, guard) {
            self.wait_until_copied(table, bucket, guard);
        }
    }

    fn wait_until_copied(&self, table: &Table<K, V>, bucket: usize, guard: &impl Guard) {
        let mut backoff = Backoff::new();

        while !table.hash_ptr(bucket).load(Ordering::Acquire).is_copied() {
            self.stats.pause(backoff.snooze(), guard);
        }
    }

    // Replace the root with its successor for as long as the root has
    // finished resizing.
    pub(super) fn promote(&self, guard: &impl Guard) {
        loop {
            let raw = guard.protect(self.root_ptr(), Ordering::Acquire);

            // Safety: The root is protected by the guard.
            let root: Table<K, V> = unsafe { Table::from_raw(raw) };

            if root.state().status.load() != State::DONE {
                return;
            }

            let Some(next) = root.next_table() else {
                return;
            };

            if self
                .root_ptr()
                .compare_exchange(raw, next.raw, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                trace!("promoted generation with {} buckets", next.capacity);

                // Safety: The old root is unreachable for new guards. Its
                // nodes now belong to the new root and are not dropped.
                unsafe { guard.defer_retire(raw, reclaim_table) };
            }
        }
    }

    // Complete any in-progress resize, returning the newest generation.
    pub(super) fn linearize(&self, guard: &impl Guard) -> Table<K, V> {
        loop {
            let table = self.root(guard);

            if table.next_table().is_none() {
                return table;
            }

            self.copy_segments(&table, usize::MAX, guard);
            table.state().status.wait_while(State::STARTED);
            self.promote(guard);
        }
    }

    // Resize the table to hold the given number of buckets.
    pub fn resize_to(&self, capacity: usize, enlarge_only: bool, guard: &impl Guard) -> bool {
        let table = self.linearize(guard);
        let resized = self.resize(&table, capacity, enlarge_only, guard);
        self.linearize(guard);
        resized
    }

    // Grow the table to hold `additional` more entries without resizing.
    pub fn reserve(&self, additional: usize, guard: &impl Guard) -> bool {
        let count = self.len().saturating_add(additional);
        self.resize_to(alloc::size_for_capacity(count, self.max_fill()), true, guard)
    }

    // Resize the table to the smallest capacity that holds its entries.
    pub fn shrink_to_fit(&self, guard: &impl Guard) -> bool {
        self.resize_to(alloc::size_for_capacity(self.len(), self.max_fill()), false, guard)
    }

    // Change the fill factor, applying it to the current generation's
    // threshold and to every later generation.
    pub fn set_max_fill(&self, max_fill: f64, guard: &impl Guard) {
        let max_fill = max_fill.clamp(0.25, 0.99);
        self.max_fill.store(max_fill.to_bits(), Ordering::Relaxed);

        let table = self.linearize(guard);
        table
            .state()
            .threshold
            .store(alloc::threshold(table.capacity, max_fill), Ordering::Relaxed);

        debug!("set fill factor to {}", max_fill);
    }

    // Help an in-progress resize with a few segments.
    //
    // Returns `true` if there is unclaimed work left.
    pub(super) fn help_resize(&self, segments: usize, guard: &impl Guard) -> bool {
        let table = self.root(guard);

        if table.next_table().is_none() {
            return false;
        }

        self.copy_segments(&table, segments, guard);
        self.promote(guard);

        // Once every segment is claimed, the finalizer completes the resize.
        let table = self.root(guard);
        let state = table.state();
        table.next_table().is_some() && state.claimed.load(Ordering::Relaxed) <= state.segments
    }
}
