use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::ops::Add;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use seize::{Collector, Guard, LocalGuard};

use super::alloc::{self, RawTable};
use super::hashptr::{Link, Word};
use super::helper::{Assist, ResizeHelper};
use super::stats::{Stat, Stats, StatsCollector};
use super::utils::{Backoff, Counter, Tagged, Unpack};

// Once a claim has to probe this far from its bucket, the generation checks
// its load and grows proactively.
const PROBE_CHECK: usize = 16;

/// A callback invoked with an entry's key and value.
pub type Hook<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// A lock-free hash table.
///
/// Entries live in bounded neighborhood chains within a generation. A resize
/// publishes a successor generation and copies chains into it bucket by
/// bucket, while operations on copied buckets are forwarded.
pub struct HashTable<K, V, S> {
    // The current generation.
    root: AtomicPtr<RawTable>,
    // Reclaims removed nodes and superseded generations.
    pub collector: Collector,
    // The hasher for keys.
    pub hasher: S,
    // The number of live entries.
    count: Counter,
    // The fraction of buckets a generation may fill before growing, as the
    // bits of an `f64`.
    pub(super) max_fill: AtomicU64,
    pub(super) stats: StatsCollector,
    on_remove: Option<Hook<K, V>>,
    on_delete: Option<Hook<K, V>>,
    // The background helper this table is registered with.
    helper: Option<Registration>,
    _kv: PhantomData<(K, V)>,
}

// A table's registration with a resize helper.
pub struct Registration {
    pub helper: Arc<ResizeHelper>,
    pub job: Weak<dyn Assist>,
}

// Safety: Keys and values are only handed out by shared reference, and are
// dropped by whichever thread removes them or reclaims them.
unsafe impl<K: Send, V: Send, S: Send> Send for HashTable<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for HashTable<K, V, S> {}

/// Options for constructing a [`HashTable`].
pub struct Config<K, V> {
    pub capacity: usize,
    pub max_fill: f64,
    pub collector: Collector,
    pub on_remove: Option<Hook<K, V>>,
    pub on_delete: Option<Hook<K, V>>,
}

// A generation holding nodes of this table.
pub(super) type Table<K, V> = alloc::Table<Node<K, V>>;

/// An immutable key-value pair.
///
/// Updating a value replaces the whole node.
#[repr(C, align(8))]
pub struct Node<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Unpack for Node<K, V> {
    const MASK: usize = !Entry::TAG;
}

// Tag bits of an entry pointer.
pub(super) struct Entry;

impl Entry {
    // The entry belongs to a bucket being copied and can no longer change.
    pub const FROZEN: usize = 0b01;
    // The entry is a tombstone.
    pub const DELETED: usize = 0b10;

    const TAG: usize = 0b11;

    // The tombstone sentinel, which is never a live node.
    #[inline]
    pub fn deleted<T>() -> *mut T {
        Entry::DELETED as *mut T
    }
}

// The decoded state of an entry.
pub(super) enum EntryState<K, V> {
    Unused,
    Deleted { frozen: bool },
    Live(Tagged<Node<K, V>>),
}

impl<K, V> EntryState<K, V> {
    #[inline]
    pub fn of(raw: *mut Node<K, V>) -> EntryState<K, V> {
        let entry = Tagged::new(raw);

        if !entry.ptr.is_null() {
            EntryState::Live(entry)
        } else if entry.tag() & Entry::DELETED != 0 {
            EntryState::Deleted {
                frozen: entry.tag() & Entry::FROZEN != 0,
            }
        } else {
            EntryState::Unused
        }
    }
}

#[inline]
pub(super) fn is_frozen<K, V>(entry: Tagged<Node<K, V>>) -> bool {
    entry.tag() & Entry::FROZEN != 0
}

// The result of searching a chain.
pub(super) enum Search<K, V> {
    Found {
        pos: usize,
        entry: Tagged<Node<K, V>>,
    },
    Missing {
        // The first tombstone seen on the chain.
        tombstone: Option<usize>,
    },
}

// The result of an insert.
pub(super) enum Insert<K, V> {
    // The node was published.
    Inserted,
    // An entry with an equal key is present.
    Found {
        table: Table<K, V>,
        pos: usize,
        entry: Tagged<Node<K, V>>,
    },
}

/// What to do with an entry visited by [`HashTable::update_each`].
pub enum Update<V> {
    /// Swap in a new value and continue.
    Replace(V),
    /// Leave the entry unchanged and stop.
    Stop,
}

// Why an insert attempt has to be retried.
enum Retry {
    // Lost the race for the chain head after claiming the given offset.
    Collision(usize),
    // The neighborhood was full and a resize was started.
    Resized,
    // The neighborhood was full and no resize could be started.
    Full,
}

impl<K, V, S> HashTable<K, V, S> {
    // Creates a table with the given configuration.
    pub fn new(config: Config<K, V>, hasher: S, helper: Option<Registration>) -> HashTable<K, V, S> {
        let max_fill = config.max_fill.clamp(0.25, 0.99);
        let capacity = alloc::normalize_capacity(alloc::size_for_capacity(config.capacity, max_fill));
        let table = Table::<K, V>::alloc(capacity, alloc::threshold(capacity, max_fill));

        HashTable {
            root: AtomicPtr::new(table.raw),
            collector: config.collector,
            hasher,
            count: Counter::default(),
            max_fill: AtomicU64::new(max_fill.to_bits()),
            stats: StatsCollector::new(),
            on_remove: config.on_remove,
            on_delete: config.on_delete,
            helper,
            _kv: PhantomData,
        }
    }

    // Enter the collector, marking the current generation as in use for
    // the lifetime of the guard.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    // Returns the current generation.
    #[inline]
    pub(super) fn root(&self, guard: &impl Guard) -> Table<K, V> {
        let raw = guard.protect(&self.root, Ordering::Acquire);

        // Safety: The root is always a valid generation, and is protected
        // from reclamation by the guard.
        unsafe { Table::from_raw(raw) }
    }

    // Returns a reference to the root pointer.
    #[inline]
    pub(super) fn root_ptr(&self) -> &AtomicPtr<RawTable> {
        &self.root
    }

    // Notify the resize helper, if any, that a resize is in progress.
    pub(super) fn notify_helper(&self) {
        if let Some(registration) = &self.helper {
            registration.helper.submit(registration.job.clone());
        }
    }

    // Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.sum()
    }

    // Returns the number of buckets in the current generation.
    #[inline]
    pub fn bucket_count(&self, guard: &impl Guard) -> usize {
        self.root(guard).capacity
    }

    // Returns the fraction of buckets a generation may fill before growing.
    #[inline]
    pub fn max_fill(&self) -> f64 {
        f64::from_bits(self.max_fill.load(Ordering::Relaxed))
    }

    // Returns the aggregated operation counters.
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn clear_stats(&self) {
        self.stats.clear()
    }

    // Notify the removal hook of a removed node.
    #[inline]
    pub(super) fn removed(&self, node: &Node<K, V>, guard: &impl Guard) {
        self.count.decrement(guard);
        self.stats.record(Stat::RemoveFound, guard);

        if let Some(on_remove) = &self.on_remove {
            on_remove(&node.key, &node.value);
        }
    }

    // The callbacks the table was configured with.
    pub fn hooks(&self) -> (Option<Hook<K, V>>, Option<Hook<K, V>>) {
        (self.on_remove.clone(), self.on_delete.clone())
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    pub fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }

    // Walk a bucket's chain looking for `key`.
    pub(super) fn search<Q>(
        &self,
        table: &Table<K, V>,
        bucket: usize,
        key: &Q,
        head: Word,
        guard: &impl Guard,
    ) -> Search<K, V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut tombstone = None;
        let mut link = head.head();

        while let Some(offset) = link.offset() {
            let pos = bucket + offset;
            let mut raw = guard.protect(table.entry(pos), Ordering::Acquire);

            loop {
                match EntryState::of(raw) {
                    // Safety: Live nodes are protected by the guard.
                    EntryState::Live(entry) if unsafe { (*entry.ptr).key.borrow() } == key => {
                        // Re-read the slot to detect a racing removal or update.
                        let current = guard.protect(table.entry(pos), Ordering::Acquire);
                        if current == raw {
                            return Search::Found { pos, entry };
                        }

                        raw = current;
                        continue;
                    }
                    EntryState::Deleted { frozen: false } if tombstone.is_none() => {
                        tombstone = Some(pos);
                    }
                    _ => {}
                }

                break;
            }

            link = table.hash_ptr(pos).load(Ordering::Acquire).next();
        }

        Search::Missing { tombstone }
    }

    // Returns the node for `key`, following copied buckets into newer
    // generations.
    pub fn find<'g, Q>(
        &self,
        hash: u64,
        key: &Q,
        forwarded: Stat,
        guard: &'g impl Guard,
    ) -> Option<&'g Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut table = self.root(guard);

        loop {
            let bucket = table.bucket(hash);
            let head = table.hash_ptr(bucket).load(Ordering::Acquire);

            // The local chain may be out of date, read the successor instead.
            if head.is_copied() {
                if let Some(next) = table.next_table() {
                    self.stats.record(forwarded, guard);
                    table = next;
                    continue;
                }
            }

            return match self.search(&table, bucket, key, head, guard) {
                // Safety: Live nodes are protected by the guard.
                Search::Found { entry, .. } => Some(unsafe { &*entry.ptr }),
                Search::Missing { .. } => None,
            };
        }
    }

    // Returns the node for `key`.
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stats.record(Stat::Lookup, guard);

        let node = self.find(self.hash(key), key, Stat::LookupForwarded, guard);
        if node.is_some() {
            self.stats.record(Stat::LookupFound, guard);
        }

        node
    }

    // Returns `true` if `key` is present.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stats.record(Stat::Contains, guard);

        let found = self
            .find(self.hash(key), key, Stat::ContainsForwarded, guard)
            .is_some();

        if found {
            self.stats.record(Stat::ContainsFound, guard);
        }

        found
    }

    // Returns the position of the mutable entry for `key`, following stale
    // buckets into newer generations.
    pub(super) fn locate<Q>(
        &self,
        hash: u64,
        key: &Q,
        forwarded: Stat,
        guard: &impl Guard,
    ) -> Option<(Table<K, V>, usize, Tagged<Node<K, V>>)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut table = self.root(guard);

        loop {
            let bucket = table.bucket(hash);
            let head = table.hash_ptr(bucket).load(Ordering::Acquire);

            if head.is_stale() {
                if let Some(next) = table.next_table() {
                    self.ensure_copied(&table, bucket, guard);
                    self.stats.record(forwarded, guard);
                    table = next;
                    continue;
                }
            }

            match self.search(&table, bucket, key, head, guard) {
                // The bucket was frozen after we read it, retry to forward.
                Search::Found { entry, .. } if is_frozen(entry) => continue,
                Search::Found { pos, entry } => return Some((table, pos, entry)),
                Search::Missing { .. } => return None,
            }
        }
    }

    // Insert `node` unless its key is already present, starting at the
    // given generation.
    pub(super) fn insert_from(
        &self,
        mut table: Table<K, V>,
        hash: u64,
        node: *mut Node<K, V>,
        guard: &impl Guard,
    ) -> Insert<K, V> {
        // Safety: The node is owned by the caller until it is published.
        let key = unsafe { &(*node).key };

        let mut hint = None;
        let mut backoff = Backoff::new();

        loop {
            let bucket = table.bucket(hash);

            // Writers always go to the newest generation, once the bucket
            // has been copied there.
            if let Some(next) = table.next_table() {
                self.ensure_copied(&table, bucket, guard);
                self.stats.record(Stat::InsertForwarded, guard);
                table = next;
                continue;
            }

            let head = table.hash_ptr(bucket).load(Ordering::Acquire);

            // The bucket is being copied, so the successor is about to be
            // visible.
            if head.is_stale() {
                continue;
            }

            // Another thread is reusing a tombstone in this chain.
            if head.is_reclaiming() {
                self.stats.pause(backoff.snooze(), guard);
                continue;
            }

            match self.search(&table, bucket, key, head, guard) {
                Search::Found { entry, .. } if is_frozen(entry) => continue,
                Search::Found { pos, entry } => return Insert::Found { table, pos, entry },
                Search::Missing {
                    tombstone: Some(pos),
                } => {
                    if self.reuse(&table, bucket, pos, head, node, guard) {
                        return Insert::Inserted;
                    }

                    self.stats.record(Stat::CasCollision, guard);
                }
                Search::Missing { tombstone: None } => {
                    match self.insert_key(&table, bucket, head, node, hint, guard) {
                        Ok(()) => return Insert::Inserted,
                        Err(Retry::Collision(offset)) => hint = Some(offset),
                        Err(Retry::Resized) => {}
                        Err(Retry::Full) => self.stats.pause(backoff.snooze(), guard),
                    }
                }
            }
        }
    }

    // Replace the tombstone at `pos` with `node`, provided the chain is
    // unchanged since `head` was observed.
    fn reuse(
        &self,
        table: &Table<K, V>,
        bucket: usize,
        pos: usize,
        head: Word,
        node: *mut Node<K, V>,
        guard: &impl Guard,
    ) -> bool {
        let hash_ptr = table.hash_ptr(bucket);
        if !hash_ptr.lock_reclaim(head) {
            return false;
        }

        // Tombstones only change under the reclaim flag or after the bucket
        // is marked stale, so this can only fail if the bucket started
        // being copied.
        let reused = table
            .entry(pos)
            .compare_exchange(Entry::deleted(), node, Ordering::Release, Ordering::Relaxed)
            .is_ok();

        hash_ptr.unlock_reclaim();

        if reused {
            table.state().count.increment(guard);
        }

        reused
    }

    // Claim a fresh slot in the neighborhood and publish it as the head of
    // the bucket's chain.
    fn insert_key(
        &self,
        table: &Table<K, V>,
        bucket: usize,
        head: Word,
        node: *mut Node<K, V>,
        hint: Option<usize>,
        guard: &impl Guard,
    ) -> Result<(), Retry> {
        self.stats.record(Stat::InsertAttempt, guard);

        let Some(offset) = Self::claim_slot(table, bucket, head.head(), node, hint) else {
            self.stats.record(Stat::NeighborhoodFull, guard);

            return if self.auto_resize(table, guard) {
                Err(Retry::Resized)
            } else {
                Err(Retry::Full)
            };
        };

        let pos = bucket + offset;

        if table.hash_ptr(bucket).publish(head, Link::new(offset)) {
            let state = table.state();
            state.count.increment(guard);

            if offset >= PROBE_CHECK
                && state.count.sum() > state.threshold.load(Ordering::Relaxed)
            {
                self.auto_resize(table, guard);
            }

            return Ok(());
        }

        // The chain changed under us, release the slot.
        table.entry(pos).store(ptr::null_mut(), Ordering::Relaxed);
        table.hash_ptr(pos).release();
        self.stats.record(Stat::CasCollision, guard);

        Err(Retry::Collision(offset))
    }

    // Claim the first free slot in the bucket's neighborhood, starting after
    // `hint` and wrapping around the window.
    fn claim_slot(
        table: &Table<K, V>,
        bucket: usize,
        head: Link,
        node: *mut Node<K, V>,
        hint: Option<usize>,
    ) -> Option<usize> {
        let window = table.window;
        let start = hint.map_or(0, |hint| (hint + 1) % window);

        for i in 0..window {
            let offset = (start + i) % window;
            let pos = bucket + offset;

            if table.hash_ptr(pos).claim(head) {
                table.entry(pos).store(node, Ordering::Release);
                return Some(offset);
            }
        }

        None
    }

    // Replace the node at `pos` with a copy holding `value`.
    fn replace<'g>(
        &self,
        table: &Table<K, V>,
        pos: usize,
        entry: Tagged<Node<K, V>>,
        value: V,
        guard: &'g impl Guard,
    ) -> Option<&'g Node<K, V>>
    where
        K: Clone,
    {
        // Safety: Live nodes are protected by the guard.
        let key = unsafe { (*entry.ptr).key.clone() };
        let new = Box::into_raw(Box::new(Node { key, value }));

        match table
            .entry(pos)
            .compare_exchange(entry.raw, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // Safety: The old node is unreachable from the current
                // generation, and any readers are protected by their guards.
                unsafe { guard.defer_retire(entry.ptr, reclaim_node::<K, V>) };

                // Safety: `new` was published and is protected by the guard.
                Some(unsafe { &*new })
            }
            Err(_) => {
                // Safety: `new` was never published.
                drop(unsafe { Box::from_raw(new) });
                self.stats.record(Stat::CasCollision, guard);
                None
            }
        }
    }

    // Insert a key-value pair, returning `false` if the key was present.
    pub fn add(&self, key: K, value: V, guard: &impl Guard) -> bool {
        let hash = self.hash(&key);
        let node = Box::into_raw(Box::new(Node { key, value }));

        match self.insert_from(self.root(guard), hash, node, guard) {
            Insert::Inserted => {
                self.count.increment(guard);
                self.stats.record(Stat::Insert, guard);
                true
            }
            Insert::Found { .. } => {
                // Safety: The node was never published.
                drop(unsafe { Box::from_raw(node) });
                self.stats.record(Stat::InsertDup, guard);
                false
            }
        }
    }

    // Insert a key-value pair, replacing the node of an equal key if one is
    // present. Returns `true` if the key was absent.
    pub fn insert_or_replace(&self, key: K, value: V, guard: &impl Guard) -> bool {
        let hash = self.hash(&key);
        let node = Box::into_raw(Box::new(Node { key, value }));

        loop {
            match self.insert_from(self.root(guard), hash, node, guard) {
                Insert::Inserted => {
                    self.count.increment(guard);
                    self.stats.record(Stat::Insert, guard);
                    return true;
                }
                Insert::Found { table, pos, entry } => {
                    match table.entry(pos).compare_exchange(
                        entry.raw,
                        node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.stats.record(Stat::InsertDup, guard);

                            // The replaced pair leaves the table.
                            if let Some(on_remove) = &self.on_remove {
                                // Safety: The old node is protected by the guard.
                                let old = unsafe { &*entry.ptr };
                                on_remove(&old.key, &old.value);
                            }

                            // Safety: The old node is unreachable from the
                            // current generation, and any readers are
                            // protected by their guards.
                            unsafe { guard.defer_retire(entry.ptr, reclaim_node::<K, V>) };
                            return false;
                        }
                        Err(_) => self.stats.record(Stat::CasCollision, guard),
                    }
                }
            }
        }
    }

    // Add `incr` to the value of `key`, inserting it if absent, and return
    // the new value.
    pub fn add_count(&self, key: K, incr: V, guard: &impl Guard) -> V
    where
        K: Clone,
        V: Clone + Add<Output = V>,
    {
        let hash = self.hash(&key);
        let node = Box::into_raw(Box::new(Node { key, value: incr }));

        loop {
            match self.insert_from(self.root(guard), hash, node, guard) {
                Insert::Inserted => {
                    self.count.increment(guard);
                    self.stats.record(Stat::Insert, guard);

                    // Safety: The node was published and is protected by the guard.
                    return unsafe { (*node).value.clone() };
                }
                Insert::Found { table, pos, entry } => {
                    // Safety: Live nodes are protected by the guard, and our
                    // node is still owned by us.
                    let value = unsafe { (*entry.ptr).value.clone() + (*node).value.clone() };

                    if let Some(new) = self.replace(&table, pos, entry, value, guard) {
                        self.stats.record(Stat::InsertDup, guard);

                        // Safety: The node was never published.
                        drop(unsafe { Box::from_raw(node) });
                        return new.value.clone();
                    }
                }
            }
        }
    }

    // Swap the value of `key` with its default, returning the old value.
    pub fn lookup_clear<Q>(&self, key: &Q, guard: &impl Guard) -> Option<V>
    where
        K: Borrow<Q> + Clone,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        self.stats.record(Stat::Lookup, guard);
        let hash = self.hash(key);

        loop {
            let (table, pos, entry) = self.locate(hash, key, Stat::LookupForwarded, guard)?;

            if self.replace(&table, pos, entry, V::default(), guard).is_some() {
                self.stats.record(Stat::LookupFound, guard);

                // Safety: The old node was retired after our guard was
                // entered.
                return Some(unsafe { (*entry.ptr).value.clone() });
            }
        }
    }

    // Visit every entry of the current generation, replacing values as `f`
    // directs. Returns `false` if `f` stopped the walk.
    //
    // Each key found is updated through the newest generation, so a resize
    // running alongside never causes an entry to be visited twice.
    pub fn update_each<F>(&self, mut f: F, guard: &impl Guard) -> bool
    where
        K: Clone,
        F: FnMut(&K, &V) -> Update<V>,
    {
        let table = self.linearize(guard);

        for bucket in 0..table.capacity {
            let mut link = table.hash_ptr(bucket).load(Ordering::Acquire).head();

            while let Some(offset) = link.offset() {
                let pos = bucket + offset;
                let raw = guard.protect(table.entry(pos), Ordering::Acquire);

                if let EntryState::Live(entry) = EntryState::of(raw) {
                    // Safety: Live nodes are protected by the guard.
                    let key = unsafe { &(*entry.ptr).key };

                    if !self.update_key(key, &mut f, guard) {
                        return false;
                    }
                }

                link = table.hash_ptr(pos).load(Ordering::Acquire).next();
            }
        }

        true
    }

    // Apply `f` to the current value of `key`, calling it again with the
    // newer value if the entry changes before the update lands.
    fn update_key<F>(&self, key: &K, f: &mut F, guard: &impl Guard) -> bool
    where
        K: Clone,
        F: FnMut(&K, &V) -> Update<V>,
    {
        let hash = self.hash(key);

        loop {
            // Removed concurrently.
            let Some((table, pos, entry)) = self.locate(hash, key, Stat::LookupForwarded, guard)
            else {
                return true;
            };

            // Safety: Live nodes are protected by the guard.
            let node = unsafe { &*entry.ptr };

            let value = match f(&node.key, &node.value) {
                Update::Stop => return false,
                Update::Replace(value) => value,
            };

            if self.replace(&table, pos, entry, value, guard).is_some() {
                return true;
            }
        }
    }

    // Remove `key`, returning `true` if it was present.
    pub fn remove<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stats.record(Stat::Remove, guard);
        let hash = self.hash(key);

        loop {
            let Some((table, pos, entry)) = self.locate(hash, key, Stat::RemoveForwarded, guard)
            else {
                return false;
            };

            match table.entry(pos).compare_exchange(
                entry.raw,
                Entry::deleted(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    table.state().count.decrement(guard);

                    // Safety: The node is protected by the guard.
                    self.removed(unsafe { &*entry.ptr }, guard);

                    // Safety: The node is now unreachable from the current
                    // generation, and any readers are protected by their
                    // guards.
                    unsafe { guard.defer_retire(entry.ptr, reclaim_node::<K, V>) };
                    return true;
                }
                Err(_) => self.stats.record(Stat::CasCollision, guard),
            }
        }
    }

    // Remove every entry.
    pub fn clear(&self, guard: &impl Guard) {
        'restart: loop {
            let table = self.linearize(guard);

            for bucket in 0..table.capacity {
                let mut link = table.hash_ptr(bucket).load(Ordering::Acquire).head();

                while let Some(offset) = link.offset() {
                    let pos = bucket + offset;
                    let mut raw = guard.protect(table.entry(pos), Ordering::Acquire);

                    loop {
                        let EntryState::Live(entry) = EntryState::of(raw) else {
                            break;
                        };

                        // A resize started, finish it and resume on the new
                        // generation.
                        if is_frozen(entry) {
                            continue 'restart;
                        }

                        match table.entry(pos).compare_exchange(
                            entry.raw,
                            Entry::deleted(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                table.state().count.decrement(guard);

                                // Safety: See `remove`.
                                self.removed(unsafe { &*entry.ptr }, guard);
                                unsafe { guard.defer_retire(entry.ptr, reclaim_node::<K, V>) };
                                break;
                            }
                            Err(found) => raw = found,
                        }
                    }

                    link = table.hash_ptr(pos).load(Ordering::Acquire).next();
                }
            }

            return;
        }
    }
}

impl<K, V, S> HashTable<K, V, S> {
    // Returns an iterator over the live entries of the current generation,
    // completing any in-progress resize first.
    pub fn iter<'g, G>(&self, guard: &'g G) -> Iter<'g, K, V, G>
    where
        G: Guard,
        K: Hash + Eq,
        S: BuildHasher,
    {
        let table = self.linearize(guard);

        Iter {
            table,
            bucket: 0,
            end: table.capacity,
            link: table.hash_ptr(0).load(Ordering::Acquire).head(),
            guard,
        }
    }

    // Returns an iterator over the live entries of a single bucket of the
    // current generation.
    pub fn bucket_iter<'g, G>(&self, bucket: usize, guard: &'g G) -> Iter<'g, K, V, G>
    where
        G: Guard,
        K: Hash + Eq,
        S: BuildHasher,
    {
        let table = self.linearize(guard);
        let bucket = bucket.min(table.capacity);
        let link = if bucket < table.capacity {
            table.hash_ptr(bucket).load(Ordering::Acquire).head()
        } else {
            Link::NULL
        };

        Iter {
            table,
            bucket,
            end: (bucket + 1).min(table.capacity),
            link,
            guard,
        }
    }

    // Count the live and deleted entries of the current generation.
    pub fn count_entries(&self, guard: &impl Guard) -> (usize, usize)
    where
        K: Hash + Eq,
        S: BuildHasher,
    {
        let table = self.linearize(guard);
        let (mut live, mut deleted) = (0, 0);

        for bucket in 0..table.capacity {
            Self::walk_chain(&table, bucket, |_, raw| match EntryState::of(raw) {
                EntryState::Live(_) => live += 1,
                EntryState::Deleted { .. } => deleted += 1,
                EntryState::Unused => {}
            });
        }

        (live, deleted)
    }

    // Returns a histogram of live chain lengths in the current generation.
    pub fn chain_lengths(&self, guard: &impl Guard) -> Vec<usize>
    where
        K: Hash + Eq,
        S: BuildHasher,
    {
        let table = self.linearize(guard);
        let mut lengths = Vec::new();

        for bucket in 0..table.capacity {
            let mut length = 0;
            Self::walk_chain(&table, bucket, |_, raw| {
                if let EntryState::Live(_) = EntryState::of(raw) {
                    length += 1;
                }
            });

            if lengths.len() <= length {
                lengths.resize(length + 1, 0);
            }

            lengths[length] += 1;
        }

        lengths
    }

    // Returns a histogram of the number of used slots in each bucket's
    // neighborhood in the current generation.
    pub fn neighborhood_densities(&self, guard: &impl Guard) -> Vec<usize>
    where
        K: Hash + Eq,
        S: BuildHasher,
    {
        let table = self.linearize(guard);

        // Concurrent claims and releases may flip slots while we slide, so
        // every slot is read exactly once.
        let used = (0..table.len())
            .map(|pos| table.hash_ptr(pos).load(Ordering::Acquire).in_use() as usize)
            .collect::<Vec<_>>();

        let mut densities = vec![0; table.window + 1];
        let mut density = used[..table.window].iter().sum::<usize>();

        // Slide the window across the table.
        for bucket in 0..table.capacity {
            densities[density] += 1;
            density = density + used[bucket + table.window] - used[bucket];
        }

        densities
    }

    // Calls `f` with the slot position and raw entry of every member of a
    // bucket's chain.
    pub(super) fn walk_chain(
        table: &Table<K, V>,
        bucket: usize,
        mut f: impl FnMut(usize, *mut Node<K, V>),
    ) {
        let mut link = table.hash_ptr(bucket).load(Ordering::Acquire).head();

        while let Some(offset) = link.offset() {
            let pos = bucket + offset;
            f(pos, table.entry(pos).load(Ordering::Acquire));
            link = table.hash_ptr(pos).load(Ordering::Acquire).next();
        }
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    // Check that every live entry is in its home bucket's chain and
    // reachable through a lookup.
    pub fn verify(&self, guard: &impl Guard) -> bool {
        let table = self.linearize(guard);
        let mut ok = true;

        for bucket in 0..table.capacity {
            Self::walk_chain(&table, bucket, |_, raw| {
                let EntryState::Live(entry) = EntryState::of(raw) else {
                    return;
                };

                // Safety: Live nodes are protected by the guard.
                let node = unsafe { &*entry.ptr };
                let hash = self.hash(&node.key);

                if table.bucket(hash) != bucket {
                    ok = false;
                    return;
                }

                match self.find(hash, &node.key, Stat::LookupForwarded, guard) {
                    Some(found) if ptr::eq(found, node) => {}
                    // The entry was concurrently removed or replaced.
                    _ if table.next_table().is_some() => {}
                    _ => ok = false,
                }
            });
        }

        ok
    }
}

/// An iterator over the live entries of a generation.
pub struct Iter<'g, K, V, G> {
    table: Table<K, V>,
    bucket: usize,
    end: usize,
    link: Link,
    guard: &'g G,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Iter<'g, K, V, G>
where
    G: Guard,
{
    type Item = (&'g K, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.bucket >= self.end {
                return None;
            }

            let Some(offset) = self.link.offset() else {
                self.bucket += 1;
                if self.bucket < self.end {
                    self.link = self
                        .table
                        .hash_ptr(self.bucket)
                        .load(Ordering::Acquire)
                        .head();
                }

                continue;
            };

            let pos = self.bucket + offset;
            self.link = self.table.hash_ptr(pos).load(Ordering::Acquire).next();

            let raw = self.guard.protect(self.table.entry(pos), Ordering::Acquire);
            if let EntryState::Live(entry) = EntryState::of(raw) {
                // Safety: Live nodes are protected by the guard.
                let node = unsafe { &*entry.ptr };
                return Some((&node.key, &node.value));
            }
        }
    }
}

impl<K, V, G> Clone for Iter<'_, K, V, G> {
    fn clone(&self) -> Self {
        Iter {
            table: self.table,
            bucket: self.bucket,
            end: self.end,
            link: self.link,
            guard: self.guard,
        }
    }
}

impl<K, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        let mut raw = *self.root.get_mut();

        while !raw.is_null() {
            // Safety: We have exclusive access, so every generation still
            // linked from the root is valid.
            let table: Table<K, V> = unsafe { Table::from_raw(raw) };
            let next = table.next_table();

            for bucket in 0..table.capacity {
                let head = table.hash_ptr(bucket).load(Ordering::Relaxed);

                // The chain's nodes were moved into the next generation.
                if next.is_some() && head.is_copied() {
                    continue;
                }

                Self::walk_chain(&table, bucket, |_, raw| {
                    if let EntryState::Live(entry) = EntryState::of(raw) {
                        // Safety: Each live node is owned by exactly one
                        // uncopied chain.
                        let node = unsafe { Box::from_raw(entry.ptr) };

                        if let Some(on_delete) = &self.on_delete {
                            on_delete(&node.key, &node.value);
                        }
                    }
                });
            }

            // Safety: The generation is no longer reachable.
            unsafe { Table::dealloc(table) };
            raw = next.map_or(ptr::null_mut(), |next| next.raw);
        }
    }
}

// Reclaims a removed node.
pub(super) unsafe fn reclaim_node<K, V>(node: *mut Node<K, V>, _collector: &Collector) {
    unsafe { drop(Box::from_raw(node)) }
}

// Reclaims a superseded generation, without dropping its entries.
pub(super) unsafe fn reclaim_table(raw: *mut RawTable, _collector: &Collector) {
    unsafe { alloc::Table::<()>::dealloc(alloc::Table::from_raw(raw)) }
}
