use crate::raw::{self, Assist, Config, Quiescent, Registration, ResizeHelper, Stats, Update};
use seize::{Collector, Guard, LocalGuard};

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Add;
use std::sync::{Arc, Weak};

/// The default fraction of buckets a table fills before it grows.
pub const DEFAULT_MAX_FILL: f64 = 0.97;

/// A concurrent hash table.
///
/// Every operation enters the table's garbage collector for its own
/// duration, so no guard has to be managed by the caller. Borrowed access to
/// keys and values is available through [`HashTable::pin`]. See the
/// [crate-level documentation](crate) for details.
pub struct HashTable<K, V, S = RandomState> {
    pub(crate) raw: Arc<raw::HashTable<K, V, S>>,
}

// Converts a table into a job for a resize helper.
type AssistJob<K, V, S> = fn(Weak<raw::HashTable<K, V, S>>) -> Weak<dyn Assist>;

fn assist_job<K, V, S>(table: Weak<raw::HashTable<K, V, S>>) -> Weak<dyn Assist>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    table
}

/// A builder for a [`HashTable`].
///
/// # Examples
///
/// ```rust
/// use hoptable::{HashTable, ResizeHelper};
/// use seize::Collector;
/// use std::collections::hash_map::RandomState;
///
/// let table: HashTable<u64, String> = HashTable::builder()
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Set the initial capacity.
///     .capacity(2048)
///     // Grow once a generation is three quarters full.
///     .max_fill(0.75)
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Finish resizes in the background.
///     .resize_helper(ResizeHelper::global())
///     // Construct the table.
///     .build();
/// ```
pub struct HashTableBuilder<K, V, S = RandomState> {
    hasher: S,
    capacity: usize,
    max_fill: f64,
    collector: Collector,
    on_remove: Option<raw::Hook<K, V>>,
    on_delete: Option<raw::Hook<K, V>>,
    helper: Option<(Arc<ResizeHelper>, AssistJob<K, V, S>)>,
}

impl<K, V> HashTableBuilder<K, V> {
    /// Set the hash builder used to hash keys.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed
    /// to allow tables to be resistant to attacks that cause many collisions
    /// and very poor performance. Setting it manually using this function can
    /// expose a DoS attack vector.
    ///
    /// A resize helper registers the table with its hasher type, so this must
    /// be called before [`resize_helper`](HashTableBuilder::resize_helper).
    /// Any helper set earlier is discarded.
    pub fn hasher<S>(self, hasher: S) -> HashTableBuilder<K, V, S> {
        HashTableBuilder {
            hasher,
            capacity: self.capacity,
            max_fill: self.max_fill,
            collector: self.collector,
            on_remove: self.on_remove,
            on_delete: self.on_delete,
            helper: None,
        }
    }
}

impl<K, V, S> HashTableBuilder<K, V, S> {
    /// Set the initial capacity of the table.
    ///
    /// The table should be able to hold at least `capacity` entries before
    /// resizing. However, a resize may happen sooner if a neighborhood fills
    /// up due to poor hash distribution. Tables never have fewer than 131
    /// buckets.
    pub fn capacity(self, capacity: usize) -> HashTableBuilder<K, V, S> {
        HashTableBuilder { capacity, ..self }
    }

    /// Set the fraction of buckets a generation may fill before it grows.
    ///
    /// Values are clamped to `0.25..=0.99`. Defaults to `0.97`.
    pub fn max_fill(self, max_fill: f64) -> HashTableBuilder<K, V, S> {
        HashTableBuilder { max_fill, ..self }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    ///
    /// This method may be useful when you want more control over garbage
    /// collection, or to share a collector between tables.
    pub fn collector(self, collector: Collector) -> HashTableBuilder<K, V, S> {
        HashTableBuilder { collector, ..self }
    }

    /// Set a callback invoked with every entry removed from the table.
    ///
    /// The callback runs synchronously on the removing thread, once per
    /// successful [`remove`](HashTable::remove), [`remove_mut`](HashTable::remove_mut)
    /// or entry removed by [`clear`](HashTable::clear). It must not access
    /// the table.
    pub fn on_remove<F>(self, f: F) -> HashTableBuilder<K, V, S>
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        HashTableBuilder {
            on_remove: Some(Arc::new(f)),
            ..self
        }
    }

    /// Set a callback invoked with every entry still present when the table
    /// is dropped.
    ///
    /// The callback must not access the table.
    pub fn on_delete<F>(self, f: F) -> HashTableBuilder<K, V, S>
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        HashTableBuilder {
            on_delete: Some(Arc::new(f)),
            ..self
        }
    }

    /// Construct a [`HashTable`] from the builder, using the configured options.
    pub fn build(self) -> HashTable<K, V, S> {
        let config = Config {
            capacity: self.capacity,
            max_fill: self.max_fill,
            collector: self.collector,
            on_remove: self.on_remove,
            on_delete: self.on_delete,
        };

        let (hasher, helper) = (self.hasher, self.helper);

        HashTable {
            raw: Arc::new_cyclic(|table| {
                let registration = helper.map(|(helper, job)| Registration {
                    helper,
                    job: job(table.clone()),
                });

                raw::HashTable::new(config, hasher, registration)
            }),
        }
    }
}

impl<K, V, S> HashTableBuilder<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Register the table with a [`ResizeHelper`].
    ///
    /// Resizes are always completed by the threads operating on the table.
    /// A helper additionally copies buckets in the background, so that a
    /// resize completes even if the table goes idle.
    pub fn resize_helper(self, helper: Arc<ResizeHelper>) -> HashTableBuilder<K, V, S> {
        HashTableBuilder {
            helper: Some((helper, assist_job::<K, V, S>)),
            ..self
        }
    }
}

impl<K, V, S> fmt::Debug for HashTableBuilder<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTableBuilder")
            .field("capacity", &self.capacity)
            .field("max_fill", &self.max_fill)
            .field("collector", &self.collector)
            .field("resize_helper", &self.helper.is_some())
            .finish()
    }
}

impl<K, V> HashTable<K, V> {
    /// Creates an empty `HashTable`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    /// let table: HashTable<&str, i32> = HashTable::new();
    /// ```
    pub fn new() -> HashTable<K, V> {
        HashTable::with_capacity_and_hasher(0, RandomState::new())
    }

    /// Creates an empty `HashTable` with the specified capacity.
    ///
    /// The table should be able to hold at least `capacity` entries before
    /// resizing.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    /// let table: HashTable<&str, i32> = HashTable::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashTable<K, V> {
        HashTable::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashTable`.
    ///
    /// The builder can be used for more complex configuration, such as
    /// removal hooks or a background [`ResizeHelper`].
    pub fn builder() -> HashTableBuilder<K, V> {
        HashTableBuilder {
            capacity: 0,
            hasher: RandomState::default(),
            max_fill: DEFAULT_MAX_FILL,
            collector: Collector::new(),
            on_remove: None,
            on_delete: None,
            helper: None,
        }
    }
}

impl<K, V, S> Default for HashTable<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        HashTable::with_hasher(S::default())
    }
}

impl<K, V, S> HashTable<K, V, S> {
    /// Creates an empty `HashTable` which will use the given hash builder to
    /// hash keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let table = HashTable::with_hasher(RandomState::new());
    /// table.add(1, "a");
    /// ```
    pub fn with_hasher(hash_builder: S) -> HashTable<K, V, S> {
        HashTable::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty `HashTable` with at least the specified capacity,
    /// using `hash_builder` to hash the keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> HashTable<K, V, S> {
        let config = Config {
            capacity,
            max_fill: DEFAULT_MAX_FILL,
            collector: Collector::new(),
            on_remove: None,
            on_delete: None,
        };

        HashTable {
            raw: Arc::new(raw::HashTable::new(config, hash_builder, None)),
        }
    }

    /// Returns a pinned reference to the table.
    ///
    /// The returned reference manages a guard internally, preventing garbage
    /// collection for as long as it is held. References to keys and values
    /// borrowed from it stay valid for the same duration.
    #[inline]
    pub fn pin(&self) -> HashTableRef<'_, K, V, S> {
        HashTableRef {
            guard: self.raw.guard(),
            map: self,
        }
    }

    /// Returns the number of entries in the table.
    ///
    /// The count is maintained incrementally and may be momentarily stale
    /// under concurrent modification.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1, "a");
    /// table.add(2, "b");
    /// assert_eq!(table.len(), 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns the number of entries in the table. Equivalent to [`len`](HashTable::len).
    #[inline]
    pub fn current_size(&self) -> usize {
        self.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fraction of buckets a generation fills before it grows.
    #[inline]
    pub fn max_fill(&self) -> f64 {
        self.raw.max_fill()
    }

    /// Returns the number of buckets in the current generation.
    pub fn bucket_count(&self) -> usize {
        let guard = self.raw.guard();
        self.raw.bucket_count(&guard)
    }

    /// Returns the ratio of entries to buckets.
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.bucket_count() as f64
    }

    /// Returns the operation counters collected for this table.
    ///
    /// Counters are only collected when the `stats` feature is enabled.
    pub fn stats(&self) -> Stats {
        self.raw.stats()
    }

    /// Resets the operation counters.
    pub fn clear_stats(&self) {
        self.raw.clear_stats()
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts a key-value pair into the table.
    ///
    /// Returns `false`, dropping the pair, if the key was already present.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// assert!(table.add(37, "a"));
    /// assert!(!table.add(37, "b"));
    /// assert_eq!(table.lookup(&37), Some("a"));
    /// ```
    #[inline]
    pub fn add(&self, key: K, value: V) -> bool {
        let guard = self.raw.guard();
        self.raw.add(key, value, &guard)
    }

    /// Inserts a key-value pair, replacing the value of the key if it is
    /// already present.
    ///
    /// Returns `true` if the key was absent. A replaced pair is passed to the
    /// [`on_remove`](HashTableBuilder::on_remove) callback.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// assert!(table.insert_or_replace(37, "a"));
    /// assert!(!table.insert_or_replace(37, "b"));
    /// assert_eq!(table.lookup(&37), Some("b"));
    /// ```
    pub fn insert_or_replace(&self, key: K, value: V) -> bool {
        let guard = self.raw.guard();
        self.raw.insert_or_replace(key, value, &guard)
    }

    /// Atomically adds `incr` to the value of `key`, inserting `incr` if the
    /// key is absent, and returns the resulting value.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// assert_eq!(table.add_count("a", 1), 1);
    /// assert_eq!(table.add_count("a", 5), 6);
    /// ```
    pub fn add_count(&self, key: K, incr: V) -> V
    where
        K: Clone,
        V: Clone + Add<Output = V>,
    {
        let guard = self.raw.guard();
        self.raw.add_count(key, incr, &guard)
    }

    /// Returns `true` if the table contains a value for the specified key.
    ///
    /// The key may be any borrowed form of the table's key type, but
    /// [`Hash`] and [`Eq`] on the borrowed form *must* match those for
    /// the key type.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = self.raw.guard();
        self.raw.contains_key(key, &guard)
    }

    /// Returns a clone of the value corresponding to the key.
    #[inline]
    pub fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let guard = self.raw.guard();
        self.raw.get(key, &guard).map(|node| node.value.clone())
    }

    /// Atomically replaces the value of `key` with its default, returning the
    /// previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add("a", 10);
    /// assert_eq!(table.lookup_clear(&"a"), Some(10));
    /// assert_eq!(table.lookup(&"a"), Some(0));
    /// ```
    pub fn lookup_clear<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q> + Clone,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        let guard = self.raw.guard();
        self.raw.lookup_clear(key, &guard)
    }

    /// Returns a reference to the value corresponding to the key, without
    /// holding a guard.
    ///
    /// # Safety
    ///
    /// The key must not be removed or its value updated, by
    /// [`add_count`](HashTable::add_count), [`lookup_clear`](HashTable::lookup_clear)
    /// or [`clear`](HashTable::clear), while the returned reference is alive.
    pub unsafe fn lookup_value_ptr<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = self.raw.guard();
        let node: *const raw::Node<K, V> = self.raw.get(key, &guard)?;

        // Safety: Resizes move nodes without freeing them, and the caller
        // guarantees the node is not retired.
        Some(unsafe { &(*node).value })
    }

    /// Removes a key from the table, returning `true` if it was present.
    ///
    /// The entry is replaced by a tombstone. Tombstones are reused by later
    /// inserts into the same chain, or unlinked by [`quiesce`](HashTable::quiesce).
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1, "a");
    /// assert!(table.remove(&1));
    /// assert!(!table.remove(&1));
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = self.raw.guard();
        self.raw.remove(key, &guard)
    }

    /// Removes a key from the table, unlinking its slot immediately instead
    /// of leaving a tombstone.
    pub fn remove_mut<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Safety: We have exclusive access to the table. A resize helper
        // only copies buckets of an in-progress resize, and the removal
        // completes any resize first.
        unsafe { self.raw.remove_unlinked(key) }
    }

    /// Removes every entry from the table.
    ///
    /// Entries inserted concurrently with the call may survive it.
    pub fn clear(&self) {
        let guard = self.raw.guard();
        self.raw.clear(&guard)
    }

    /// Resizes the table to hold `buckets` buckets, rounded to an acceptable
    /// bucket count.
    ///
    /// The table is never shrunk below what its entries require. Returns
    /// `true` if a resize took place.
    pub fn resize_to(&self, buckets: usize) -> bool {
        let guard = self.raw.guard();
        self.raw.resize_to(buckets, false, &guard)
    }

    /// Grows the table so it can hold at least `additional` more entries
    /// without resizing. Returns `true` if a resize took place.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table: HashTable<&str, i32> = HashTable::new();
    /// assert!(table.reserve(10_000));
    /// assert!(table.bucket_count() >= 10_000);
    /// assert!(!table.reserve(10));
    /// ```
    pub fn reserve(&self, additional: usize) -> bool {
        let guard = self.raw.guard();
        self.raw.reserve(additional, &guard)
    }

    /// Shrinks the table to the smallest bucket count that holds its
    /// entries. Returns `true` if a resize took place.
    pub fn shrink_to_fit(&self) -> bool {
        let guard = self.raw.guard();
        self.raw.shrink_to_fit(&guard)
    }

    /// Completes any in-progress resize and returns exclusive access for
    /// reclaiming tombstones.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// for i in 0..100 {
    ///     table.add(i, i);
    /// }
    /// for i in 0..50 {
    ///     table.remove(&i);
    /// }
    ///
    /// assert_eq!(table.count_deleted_items(), 50);
    /// assert_eq!(table.quiesce().reclaim_deletions(), 50);
    /// assert_eq!(table.count_deleted_items(), 0);
    /// ```
    pub fn quiesce(&mut self) -> Quiescent<'_, K, V, S> {
        // Safety: We have exclusive access to the table.
        unsafe { self.raw.quiesce() }
    }

    /// Counts the live entries by walking the table.
    pub fn count_items(&self) -> usize {
        let guard = self.raw.guard();
        self.raw.count_entries(&guard).0
    }

    /// Counts the tombstones by walking the table.
    pub fn count_deleted_items(&self) -> usize {
        let guard = self.raw.guard();
        self.raw.count_entries(&guard).1
    }

    /// Returns the number of live entries whose home is the given bucket.
    pub fn bucket_size(&self, bucket: usize) -> usize {
        let guard = self.raw.guard();
        self.raw.bucket_iter(bucket, &guard).count()
    }

    /// Calls `f` with every entry in the table, stopping early if `f` returns
    /// `false`.
    ///
    /// Returns `true` if every entry was visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1, 10);
    /// table.add(2, 20);
    ///
    /// let mut sum = 0;
    /// assert!(table.iterate(|_, v| {
    ///     sum += v;
    ///     true
    /// }));
    /// assert_eq!(sum, 30);
    /// assert!(!table.iterate(|_, _| false));
    /// ```
    pub fn iterate<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        let guard = self.raw.guard();
        let mut iter = self.raw.iter(&guard);
        iter.all(|(key, value)| f(key, value))
    }

    /// Calls `f` with every entry in the table, atomically resetting the
    /// value to its default whenever `f` returns `true`.
    ///
    /// The walk stops at the first entry for which `f` returns `false`,
    /// leaving that entry unchanged. If an entry is updated concurrently
    /// before it can be reset, `f` is called again with the newer value.
    /// Returns `true` if every entry was visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add("a", 3);
    /// table.add("b", 4);
    ///
    /// let mut drained = 0;
    /// assert!(table.iterate_and_clear(|_, count| {
    ///     drained += count;
    ///     true
    /// }));
    ///
    /// assert_eq!(drained, 7);
    /// assert_eq!(table.lookup(&"a"), Some(0));
    /// ```
    pub fn iterate_and_clear<F>(&self, mut f: F) -> bool
    where
        K: Clone,
        V: Default,
        F: FnMut(&K, &V) -> bool,
    {
        let guard = self.raw.guard();
        self.raw.update_each(
            |key, value| {
                if f(key, value) {
                    Update::Replace(V::default())
                } else {
                    Update::Stop
                }
            },
            &guard,
        )
    }

    /// Calls `f` with every entry in the table, allowing it to modify a copy
    /// of the value that then atomically replaces the original.
    ///
    /// The walk stops at the first entry for which `f` returns `false`, and
    /// the changes made to that entry are discarded. An entry removed before
    /// its copy lands stays removed, and one updated concurrently is handed
    /// to `f` again with the newer value. Returns `true` if every entry was
    /// visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1, String::from("a"));
    /// table.add(2, String::from("b"));
    ///
    /// assert!(table.iterate_and_modify(|_, value| {
    ///     value.push('!');
    ///     true
    /// }));
    ///
    /// assert_eq!(table.lookup(&1).as_deref(), Some("a!"));
    /// ```
    pub fn iterate_and_modify<F>(&self, mut f: F) -> bool
    where
        K: Clone,
        V: Clone,
        F: FnMut(&K, &mut V) -> bool,
    {
        let guard = self.raw.guard();
        self.raw.update_each(
            |key, value| {
                let mut value = value.clone();
                if f(key, &mut value) {
                    Update::Replace(value)
                } else {
                    Update::Stop
                }
            },
            &guard,
        )
    }

    /// Sets the fraction of buckets a generation may fill before it grows.
    ///
    /// Values are clamped to `0.25..=0.99`. The new limit applies to the
    /// current generation immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table: HashTable<u64, u64> = HashTable::new();
    /// table.set_max_fill(0.5);
    /// assert_eq!(table.max_fill(), 0.5);
    ///
    /// table.set_max_fill(2.0);
    /// assert_eq!(table.max_fill(), 0.99);
    /// ```
    pub fn set_max_fill(&self, max_fill: f64) {
        let guard = self.raw.guard();
        self.raw.set_max_fill(max_fill, &guard)
    }

    /// Returns a snapshot of the keys in the table.
    pub fn all_keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let guard = self.raw.guard();
        self.raw.iter(&guard).map(|(key, _)| key.clone()).collect()
    }

    /// Returns a histogram of chain lengths, indexed by the number of live
    /// entries in a bucket's chain.
    pub fn chain_lengths(&self) -> Vec<usize> {
        let guard = self.raw.guard();
        self.raw.chain_lengths(&guard)
    }

    /// Returns a histogram of neighborhood densities, indexed by the number
    /// of used slots in a bucket's neighborhood.
    pub fn neighborhood_densities(&self) -> Vec<usize> {
        let guard = self.raw.guard();
        self.raw.neighborhood_densities(&guard)
    }

    /// Checks that every live entry is reachable from its home bucket.
    pub fn verify(&self) -> bool {
        let guard = self.raw.guard();
        self.raw.verify(&guard)
    }
}

/// Copies every entry into a new table.
///
/// The copy shares the hasher configuration, fill limit and callbacks of the
/// original, but uses its own garbage collector and is not registered with
/// any [`ResizeHelper`].
impl<K, V, S> Clone for HashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        let (on_remove, on_delete) = self.raw.hooks();
        let config = Config {
            capacity: self.len(),
            max_fill: self.max_fill(),
            collector: Collector::new(),
            on_remove,
            on_delete,
        };

        let table = HashTable {
            raw: Arc::new(raw::HashTable::new(config, self.raw.hasher.clone(), None)),
        };

        {
            let (guard, copy) = (self.raw.guard(), table.raw.guard());
            for (key, value) in self.raw.iter(&guard) {
                table.raw.add(key.clone(), value.clone(), &copy);
            }
        }

        table
    }
}

impl<K, V, S> PartialEq for HashTable<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        let (this, other) = (self.pin(), other.pin());

        let mut iter = this.iter();
        iter.all(|(key, value)| other.get(key).is_some_and(|v| *value == *v))
    }
}

impl<K, V, S> Eq for HashTable<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> fmt::Debug for HashTable<K, V, S>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pinned = self.pin();
        f.debug_map().entries(pinned.iter()).finish()
    }
}

impl<K, V, S> Extend<(K, V)> for &HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        // Keys may be present already or appear multiple times, so only
        // reserve the full hint for an empty table.
        let iter = iter.into_iter();
        let reserve = if self.is_empty() {
            iter.size_hint().0
        } else {
            iter.size_hint().0.div_ceil(2)
        };

        let guard = self.raw.guard();
        self.raw.reserve(reserve, &guard);

        for (key, value) in iter {
            self.raw.add(key, value, &guard);
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HashTable<K, V, RandomState>
where
    K: Hash + Eq,
{
    fn from(arr: [(K, V); N]) -> Self {
        HashTable::from_iter(arr)
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let table = HashTable::with_capacity_and_hasher(iter.size_hint().0, S::default());

        {
            let guard = table.raw.guard();
            for (key, value) in iter {
                table.raw.add(key, value, &guard);
            }
        }

        table
    }
}

/// A pinned reference to a [`HashTable`].
///
/// This type is created with [`HashTable::pin`] and holds a guard for its
/// lifetime, so keys and values can be borrowed from the table.
pub struct HashTableRef<'map, K, V, S> {
    guard: LocalGuard<'map>,
    map: &'map HashTable<K, V, S>,
}

impl<'map, K, V, S> HashTableRef<'map, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a reference to the inner [`HashTable`].
    #[inline]
    pub fn map(&self) -> &'map HashTable<K, V, S> {
        self.map
    }

    /// Returns the number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the table contains a value for the specified key.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.raw.contains_key(key, &self.guard)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1, "a".to_owned());
    ///
    /// let pinned = table.pin();
    /// assert_eq!(pinned.get(&1).map(String::as_str), Some("a"));
    /// assert_eq!(pinned.get(&2), None);
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.raw.get(key, &self.guard).map(|node| &node.value)
    }

    /// Returns the number of buckets in the current generation.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.map.raw.bucket_count(&self.guard)
    }

    /// An iterator visiting all entries in arbitrary order.
    ///
    /// Any in-progress resize is completed first. Entries added or removed
    /// concurrently may or may not be observed.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V, LocalGuard<'map>> {
        Iter {
            raw: self.map.raw.iter(&self.guard),
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, LocalGuard<'map>> {
        Keys { iter: self.iter() }
    }

    /// An iterator visiting all values in arbitrary order.
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, LocalGuard<'map>> {
        Values { iter: self.iter() }
    }

    /// An iterator visiting the entries whose home is the given bucket.
    ///
    /// Buckets past [`bucket_count`](HashTableRef::bucket_count) are empty.
    #[inline]
    pub fn bucket(&self, bucket: usize) -> Iter<'_, K, V, LocalGuard<'map>> {
        Iter {
            raw: self.map.raw.bucket_iter(bucket, &self.guard),
        }
    }
}

impl<K, V, S> fmt::Debug for HashTableRef<'_, K, V, S>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, 'map, K, V, S> IntoIterator for &'a HashTableRef<'map, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, LocalGuard<'map>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a table's entries.
///
/// This struct is created by the [`iter`](HashTableRef::iter) method on
/// [`HashTableRef`]. See its documentation for details.
pub struct Iter<'g, K, V, G> {
    raw: raw::Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Iter<'g, K, V, G>
where
    G: Guard,
{
    type Item = (&'g K, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next()
    }
}

impl<K, V, G> fmt::Debug for Iter<'_, K, V, G>
where
    K: fmt::Debug,
    V: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(Iter {
                raw: self.raw.clone(),
            })
            .finish()
    }
}

/// An iterator over a table's keys.
///
/// This struct is created by the [`keys`](HashTableRef::keys) method on
/// [`HashTableRef`]. See its documentation for details.
pub struct Keys<'g, K, V, G> {
    iter: Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Keys<'g, K, V, G>
where
    G: Guard,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (key, _) = self.iter.next()?;
        Some(key)
    }
}

impl<K, V, G> fmt::Debug for Keys<'_, K, V, G>
where
    K: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Keys {
                iter: Iter {
                    raw: self.iter.raw.clone(),
                },
            })
            .finish()
    }
}

/// An iterator over a table's values.
///
/// This struct is created by the [`values`](HashTableRef::values) method on
/// [`HashTableRef`]. See its documentation for details.
pub struct Values<'g, K, V, G> {
    iter: Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Values<'g, K, V, G>
where
    G: Guard,
{
    type Item = &'g V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (_, value) = self.iter.next()?;
        Some(value)
    }
}

impl<K, V, G> fmt::Debug for Values<'_, K, V, G>
where
    V: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Values {
                iter: Iter {
                    raw: self.iter.raw.clone(),
                },
            })
            .finish()
    }
}
