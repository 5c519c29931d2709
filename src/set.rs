use crate::map::{self, HashTable, HashTableBuilder, HashTableRef};
use crate::raw::{Quiescent, ResizeHelper, Stats};
use seize::{Collector, Guard, LocalGuard};

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A concurrent hash set.
///
/// A set is a [`HashTable`] with zero-sized values, so no value storage is
/// allocated. See the [crate-level documentation](crate) for details.
pub struct HashSet<K, S = RandomState> {
    pub(crate) map: HashTable<K, (), S>,
}

/// A builder for a [`HashSet`].
///
/// # Examples
///
/// ```rust
/// use hoptable::HashSet;
/// use seize::Collector;
/// use std::collections::hash_map::RandomState;
///
/// let set: HashSet<i32> = HashSet::builder()
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Construct the hash set.
///     .build();
/// ```
pub struct HashSetBuilder<K, S = RandomState> {
    builder: HashTableBuilder<K, (), S>,
}

impl<K> HashSetBuilder<K> {
    /// Set the hash builder used to hash keys.
    ///
    /// This must be called before [`resize_helper`](HashSetBuilder::resize_helper).
    /// See [`HashTableBuilder::hasher`] for details.
    pub fn hasher<S>(self, hasher: S) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            builder: self.builder.hasher(hasher),
        }
    }
}

impl<K, S> HashSetBuilder<K, S> {
    /// Set the initial capacity of the set.
    pub fn capacity(self, capacity: usize) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            builder: self.builder.capacity(capacity),
        }
    }

    /// Set the fraction of buckets a generation may fill before it grows.
    pub fn max_fill(self, max_fill: f64) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            builder: self.builder.max_fill(max_fill),
        }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    pub fn collector(self, collector: Collector) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            builder: self.builder.collector(collector),
        }
    }

    /// Set a callback invoked with every key removed from the set.
    pub fn on_remove<F>(self, f: F) -> HashSetBuilder<K, S>
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        HashSetBuilder {
            builder: self.builder.on_remove(move |key, _| f(key)),
        }
    }

    /// Set a callback invoked with every key still present when the set is
    /// dropped.
    pub fn on_delete<F>(self, f: F) -> HashSetBuilder<K, S>
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        HashSetBuilder {
            builder: self.builder.on_delete(move |key, _| f(key)),
        }
    }

    /// Construct a [`HashSet`] from the builder, using the configured options.
    pub fn build(self) -> HashSet<K, S> {
        HashSet {
            map: self.builder.build(),
        }
    }
}

impl<K, S> HashSetBuilder<K, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Register the set with a [`ResizeHelper`].
    pub fn resize_helper(self, helper: Arc<ResizeHelper>) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            builder: self.builder.resize_helper(helper),
        }
    }
}

impl<K, S> fmt::Debug for HashSetBuilder<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HashSetBuilder").field(&self.builder).finish()
    }
}

impl<K> HashSet<K> {
    /// Creates an empty `HashSet`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashSet;
    /// let set: HashSet<&str> = HashSet::new();
    /// ```
    pub fn new() -> HashSet<K> {
        HashSet::with_capacity_and_hasher(0, RandomState::new())
    }

    /// Creates an empty `HashSet` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> HashSet<K> {
        HashSet::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashSet`.
    pub fn builder() -> HashSetBuilder<K> {
        HashSetBuilder {
            builder: HashTable::builder(),
        }
    }
}

impl<K, S> Default for HashSet<K, S>
where
    S: Default,
{
    fn default() -> Self {
        HashSet::with_hasher(S::default())
    }
}

impl<K, S> HashSet<K, S> {
    /// Creates an empty `HashSet` which will use the given hash builder to
    /// hash keys.
    pub fn with_hasher(hash_builder: S) -> HashSet<K, S> {
        HashSet::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty `HashSet` with at least the specified capacity, using
    /// `hash_builder` to hash the keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> HashSet<K, S> {
        HashSet {
            map: HashTable::with_capacity_and_hasher(capacity, hash_builder),
        }
    }

    /// Returns a pinned reference to the set.
    ///
    /// The returned reference manages a guard internally, preventing garbage
    /// collection for as long as it is held.
    #[inline]
    pub fn pin(&self) -> HashSetRef<'_, K, S> {
        HashSetRef {
            map: self.map.pin(),
        }
    }

    /// Returns the number of keys in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the number of buckets in the current generation.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.map.bucket_count()
    }

    /// Returns the operation counters collected for this set.
    pub fn stats(&self) -> Stats {
        self.map.stats()
    }
}

impl<K, S> HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts a key into the set, returning `false` if it was already
    /// present.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashSet;
    ///
    /// let set = HashSet::new();
    /// assert!(set.insert(37));
    /// assert!(!set.insert(37));
    /// assert!(set.contains(&37));
    /// ```
    #[inline]
    pub fn insert(&self, key: K) -> bool {
        self.map.add(key, ())
    }

    /// Returns `true` if the set contains the key.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains(key)
    }

    /// Removes a key from the set, returning `true` if it was present.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key)
    }

    /// Removes a key from the set, unlinking its slot immediately.
    ///
    /// See [`HashTable::remove_mut`] for details.
    pub fn remove_mut<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove_mut(key)
    }

    /// Removes every key from the set.
    pub fn clear(&self) {
        self.map.clear()
    }

    /// Grows the set so it can hold at least `additional` more keys without
    /// resizing.
    pub fn reserve(&self, additional: usize) -> bool {
        self.map.reserve(additional)
    }

    /// Sets the fraction of buckets a generation may fill before it grows.
    ///
    /// See [`HashTable::set_max_fill`] for details.
    pub fn set_max_fill(&self, max_fill: f64) {
        self.map.set_max_fill(max_fill)
    }

    /// Counts the keys by walking the set.
    pub fn count_items(&self) -> usize {
        self.map.count_items()
    }

    /// Returns a snapshot of the keys in the set.
    pub fn all_keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.map.all_keys()
    }

    /// Completes any in-progress resize and returns exclusive access for
    /// reclaiming tombstones.
    ///
    /// See [`HashTable::quiesce`] for details.
    pub fn quiesce(&mut self) -> Quiescent<'_, K, (), S> {
        self.map.quiesce()
    }
}

impl<K, S> Clone for HashSet<K, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        HashSet {
            map: self.map.clone(),
        }
    }
}

impl<K, S> PartialEq for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<K, S> Eq for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
}

impl<K, S> fmt::Debug for HashSet<K, S>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pinned = self.pin();
        f.debug_set().entries(pinned.iter()).finish()
    }
}

impl<K, S> Extend<K> for &HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        let mut map = &self.map;
        map.extend(iter.into_iter().map(|key| (key, ())));
    }
}

impl<K, const N: usize> From<[K; N]> for HashSet<K, RandomState>
where
    K: Hash + Eq,
{
    fn from(arr: [K; N]) -> Self {
        HashSet::from_iter(arr)
    }
}

impl<K, S> FromIterator<K> for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        HashSet {
            map: iter.into_iter().map(|key| (key, ())).collect(),
        }
    }
}

/// A pinned reference to a [`HashSet`].
///
/// This type is created with [`HashSet::pin`] and holds a guard for its
/// lifetime, so keys can be borrowed from the set.
pub struct HashSetRef<'set, K, S> {
    map: HashTableRef<'set, K, (), S>,
}

impl<'set, K, S> HashSetRef<'set, K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns the number of keys in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if the set contains the key.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains(key)
    }

    /// An iterator visiting all keys in arbitrary order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, LocalGuard<'set>> {
        Iter {
            keys: self.map.keys(),
        }
    }
}

impl<K, S> fmt::Debug for HashSetRef<'_, K, S>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, 'set, K, S> IntoIterator for &'a HashSetRef<'set, K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a K;
    type IntoIter = Iter<'a, K, LocalGuard<'set>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a set's keys.
///
/// This struct is created by the [`iter`](HashSetRef::iter) method on
/// [`HashSetRef`]. See its documentation for details.
pub struct Iter<'g, K, G> {
    keys: map::Keys<'g, K, (), G>,
}

impl<'g, K: 'g, G> Iterator for Iter<'g, K, G>
where
    G: Guard,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.keys.next()
    }
}

impl<K, G> fmt::Debug for Iter<'_, K, G>
where
    K: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.keys, f)
    }
}
