use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::ops::Range;
use std::ptr;
use std::sync::atomic::Ordering;

use super::hashptr::Link;
use super::stats::Stat;
use super::table::{EntryState, HashTable, Table};
use crate::trace::debug;

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    // Finish any in-progress resize and return a handle for reclaiming
    // tombstones.
    //
    // # Safety
    //
    // No other thread may operate on the table for the lifetime of the
    // returned handle, apart from a resize helper.
    pub unsafe fn quiesce(&self) -> Quiescent<'_, K, V, S> {
        let guard = self.guard();
        let table = self.linearize(&guard);

        Quiescent { map: self, table }
    }

    // Remove `key`, unlinking its slot and dropping the node immediately.
    //
    // # Safety
    //
    // No other thread may operate on the table concurrently, apart from a
    // resize helper.
    pub unsafe fn remove_unlinked<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = self.guard();
        self.stats.record(Stat::Remove, &guard);

        let table = self.linearize(&guard);
        let bucket = table.bucket(self.hash(key));

        let mut prev = None;
        let mut link = table.hash_ptr(bucket).load(Ordering::Acquire).head();

        while let Some(offset) = link.offset() {
            let pos = bucket + offset;
            let next = table.hash_ptr(pos).load(Ordering::Acquire).next();

            if let EntryState::Live(entry) = EntryState::of(table.entry(pos).load(Ordering::Acquire)) {
                // Safety: We have exclusive access, so the node is valid.
                let node = unsafe { &*entry.ptr };

                if node.key.borrow() == key {
                    unlink(&table, bucket, prev, pos, next);
                    table.state().count.decrement(&guard);
                    self.removed(node, &guard);

                    // Safety: The node was unlinked, and no reader can be
                    // holding a reference to it.
                    drop(unsafe { Box::from_raw(entry.ptr) });
                    return true;
                }
            }

            prev = Some(pos);
            link = next;
        }

        false
    }
}

/// Exclusive access to a table for reclaiming tombstones.
///
/// Removals leave tombstones behind in their chains. Tombstones are reused
/// by later inserts into the same chain, but are otherwise only unlinked
/// while the table is quiescent, as nothing else may be traversing the
/// chains.
///
/// This type is created by [`HashTable::quiesce`](crate::HashTable::quiesce).
/// It is `Sync`, so the work may be split across threads with
/// [`reclaim_fragment`](Quiescent::reclaim_fragment).
pub struct Quiescent<'a, K, V, S> {
    map: &'a HashTable<K, V, S>,
    table: Table<K, V>,
}

// Safety: Fragments touch disjoint chains, and every update to a shared
// metadata word is atomic.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for Quiescent<'_, K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Send for Quiescent<'_, K, V, S> {}

impl<K, V, S> Quiescent<'_, K, V, S> {
    /// Unlinks every tombstone in the table, returning the number of slots
    /// freed.
    pub fn reclaim_deletions(&self) -> usize {
        self.reclaim_range(0..self.table.capacity)
    }

    /// Unlinks the tombstones in one fragment of the table, returning the
    /// number of slots freed.
    ///
    /// The buckets are split into `total` contiguous fragments. Reclaiming
    /// each fragment in `0..total`, in any order or in parallel, is
    /// equivalent to calling [`reclaim_deletions`](Quiescent::reclaim_deletions).
    ///
    /// # Panics
    ///
    /// Panics if `fragment >= total`.
    pub fn reclaim_fragment(&self, total: usize, fragment: usize) -> usize {
        assert!(fragment < total, "fragment {fragment} out of range for {total} fragments");

        let capacity = self.table.capacity;
        let start = capacity * fragment / total;
        let end = capacity * (fragment + 1) / total;

        self.reclaim_range(start..end)
    }

    /// Returns the number of buckets in the table.
    pub fn bucket_count(&self) -> usize {
        self.table.capacity
    }

    fn reclaim_range(&self, buckets: Range<usize>) -> usize {
        let guard = self.map.guard();
        let table = &self.table;
        let mut reclaimed = 0;

        for bucket in buckets.clone() {
            let mut prev = None;
            let mut link = table.hash_ptr(bucket).load(Ordering::Acquire).head();

            while let Some(offset) = link.offset() {
                let pos = bucket + offset;
                let next = table.hash_ptr(pos).load(Ordering::Acquire).next();

                match EntryState::of(table.entry(pos).load(Ordering::Acquire)) {
                    EntryState::Deleted { .. } => {
                        unlink(table, bucket, prev, pos, next);
                        self.map.stats.record(Stat::Reclaim, &guard);
                        reclaimed += 1;
                    }
                    _ => prev = Some(pos),
                }

                link = next;
            }
        }

        debug!(
            "reclaimed {} tombstones in buckets {}..{}",
            reclaimed, buckets.start, buckets.end
        );

        reclaimed
    }
}

// Unlink the member at `pos` from a bucket's chain and return its slot to
// the unused state.
fn unlink<K, V>(table: &Table<K, V>, bucket: usize, prev: Option<usize>, pos: usize, next: Link) {
    match prev {
        Some(prev) => table.hash_ptr(prev).set_next(next),
        None => table.hash_ptr(bucket).set_head(next),
    }

    table.entry(pos).store(ptr::null_mut(), Ordering::Release);
    table.hash_ptr(pos).release();
}
