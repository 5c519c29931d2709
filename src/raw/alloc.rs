use std::alloc::Layout;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::{alloc, mem, ptr};

use super::hashptr::{HashPtr, SEARCH_RANGE};
use super::utils::{Countdown, Counter, Event};

// The number of buckets copied as a single unit of resize work.
pub const SEGMENT_SIZE: usize = 2048;

// The smallest capacity a generation is allocated with.
pub const MIN_CAPACITY: usize = 128;

// Capacities are clamped here, well past anything that can be allocated.
const MAX_CAPACITY: usize = isize::MAX as usize >> 5;

// Makes every allocation on the current thread fail.
#[cfg(test)]
thread_local! {
    pub static FAIL_ALLOC: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

// A generation laid out in a single allocation.
#[repr(transparent)]
pub struct RawTable(u8);

// The layout of the table allocation.
#[repr(C)]
struct TableLayout {
    capacity: usize,
    window: usize,
    state: State,
    hash_ptrs: [HashPtr; 0],
    entries: [AtomicPtr<()>; 0],
}

// The resize state of a generation.
pub struct State {
    // The generation superseding this one, set at most once.
    pub next: AtomicPtr<RawTable>,
    // Elects the thread that allocates the next generation.
    pub resize_lock: AtomicBool,
    // The resize status, one of `State::{IDLE, STARTED, DONE, ABORTED}`.
    pub status: Event,
    // The number of segments in this generation.
    pub segments: usize,
    // The next segment to be handed out.
    pub claimed: AtomicUsize,
    // Segments that are claimed but not yet copied.
    pub pending: Countdown,
    // Buckets that could not be copied by their segment owner.
    pub first_incomplete: AtomicUsize,
    pub last_incomplete: AtomicUsize,
    // The entry count past which this generation grows.
    pub threshold: AtomicUsize,
    // The number of live entries in this generation.
    pub count: Counter,
}

impl State {
    pub const IDLE: u32 = 0;
    pub const STARTED: u32 = 1;
    pub const DONE: u32 = 2;
    pub const ABORTED: u32 = 3;

    fn new(capacity: usize, threshold: usize) -> State {
        let segments = capacity.div_ceil(SEGMENT_SIZE);

        State {
            next: AtomicPtr::new(ptr::null_mut()),
            resize_lock: AtomicBool::new(false),
            status: Event::new(State::IDLE),
            segments,
            claimed: AtomicUsize::new(0),
            pending: Countdown::new(segments as u32),
            first_incomplete: AtomicUsize::new(usize::MAX),
            last_incomplete: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold),
            count: Counter::default(),
        }
    }
}

// Manages a table allocation.
pub struct Table<T> {
    // The number of buckets.
    pub capacity: usize,
    // The neighborhood size of every bucket.
    pub window: usize,
    // The raw table pointer.
    pub raw: *mut RawTable,
    _t: PhantomData<T>,
}

impl<T> Copy for Table<T> {}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Table<T> {
    // Allocate a generation with the given (normalized) capacity, aborting
    // on allocation failure.
    pub fn alloc(capacity: usize, threshold: usize) -> Table<T> {
        if let Some(table) = Table::try_alloc(capacity, threshold) {
            return table;
        }

        match Self::layout(capacity + capacity.min(SEARCH_RANGE)) {
            Some(layout) => alloc::handle_alloc_error(layout),
            None => panic!("capacity overflow allocating {capacity} buckets"),
        }
    }

    // Allocate a generation with the given (normalized) capacity.
    //
    // Returns `None` if the allocation fails.
    pub fn try_alloc(capacity: usize, threshold: usize) -> Option<Table<T>> {
        let window = capacity.min(SEARCH_RANGE);
        let len = capacity + window;

        let layout = Self::layout(len)?;

        #[cfg(test)]
        if FAIL_ALLOC.with(std::cell::Cell::get) {
            return None;
        }

        unsafe {
            // Allocate the table, zeroing the entries.
            let ptr = alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                return None;
            }

            // Write the table state.
            ptr.cast::<TableLayout>().write(TableLayout {
                capacity,
                window,
                state: State::new(capacity, threshold),
                hash_ptrs: [],
                entries: [],
            });

            // Every chain starts out empty.
            let hash_ptrs = ptr.add(mem::size_of::<TableLayout>()).cast::<HashPtr>();
            for i in 0..len {
                hash_ptrs.add(i).write(HashPtr::default());
            }

            Some(Table {
                capacity,
                window,
                raw: ptr.cast::<RawTable>(),
                _t: PhantomData,
            })
        }
    }

    // Creates a `Table` from a raw pointer.
    #[inline]
    pub unsafe fn from_raw(raw: *mut RawTable) -> Table<T> {
        let layout = unsafe { &*raw.cast::<TableLayout>() };

        Table {
            raw,
            capacity: layout.capacity,
            window: layout.window,
            _t: PhantomData,
        }
    }

    // Returns the number of slots, including the overflow of the last
    // neighborhood.
    #[inline]
    pub fn len(&self) -> usize {
        self.capacity + self.window
    }

    // Returns the home bucket of a hash.
    #[inline]
    pub fn bucket(&self, hash: u64) -> usize {
        (hash % self.capacity as u64) as usize
    }

    // Returns the metadata word of the given slot.
    #[inline]
    pub fn hash_ptr(&self, i: usize) -> &HashPtr {
        debug_assert!(i < self.len());

        unsafe {
            &*self
                .raw
                .add(mem::size_of::<TableLayout>())
                .cast::<HashPtr>()
                .add(i)
        }
    }

    // Returns the entry of the given slot.
    #[inline]
    pub fn entry(&self, i: usize) -> &AtomicPtr<T> {
        debug_assert!(i < self.len());

        unsafe {
            &*self
                .raw
                .add(mem::size_of::<TableLayout>() + mem::size_of::<HashPtr>() * self.len())
                .cast::<AtomicPtr<T>>()
                .add(i)
        }
    }

    // Returns a reference to the table state.
    #[inline]
    pub fn state(&self) -> &State {
        unsafe { &(*self.raw.cast::<TableLayout>()).state }
    }

    // Returns the generation superseding this one, if any.
    #[inline]
    pub fn next_table(&self) -> Option<Table<T>> {
        let next = self.state().next.load(Ordering::Acquire);

        // Safety: `next` is only ever set to a valid allocation, and is
        // retired no earlier than this generation.
        (!next.is_null()).then(|| unsafe { Table::from_raw(next) })
    }

    // Deallocate the table.
    //
    // Entries are not dropped.
    pub unsafe fn dealloc(table: Table<T>) {
        unsafe {
            // Safety: The layout was validated when the table was allocated.
            let layout = Self::layout(table.len()).unwrap_unchecked();

            ptr::drop_in_place(table.raw.cast::<TableLayout>());
            alloc::dealloc(table.raw.cast::<u8>(), layout)
        }
    }

    // The table layout used for allocation.
    fn layout(len: usize) -> Option<Layout> {
        let slot = mem::size_of::<HashPtr>() + mem::size_of::<AtomicPtr<()>>();
        let size = len
            .checked_mul(slot)?
            .checked_add(mem::size_of::<TableLayout>())?;

        Layout::from_size_align(size, mem::align_of::<TableLayout>()).ok()
    }
}

// The primes below 128. Capacities avoid their multiples to reduce
// clustering from weak hashes.
const SMALL_PRIMES: [usize; 31] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127,
];

// Rounds a requested capacity up to the next acceptable bucket count.
pub fn normalize_capacity(capacity: usize) -> usize {
    let mut capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY) | 1;

    'bump: loop {
        for prime in SMALL_PRIMES {
            if capacity % prime == 0 {
                capacity += 2;
                continue 'bump;
            }
        }

        return capacity;
    }
}

// Returns the entry count past which a generation of the given capacity grows.
pub fn threshold(capacity: usize, max_fill: f64) -> usize {
    ((capacity as f64 * max_fill + 0.5) as usize).min(capacity - 1)
}

// Returns the capacity needed to hold `count` entries below the threshold.
pub fn size_for_capacity(count: usize, max_fill: f64) -> usize {
    (count as f64 / max_fill).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        unsafe {
            let table: Table<u8> = Table::alloc(131, 127);
            let table: Table<u8> = Table::from_raw(table.raw);
            assert_eq!(table.capacity, 131);
            // Small tables use the whole table as their neighborhood.
            assert_eq!(table.window, 131);
            assert_eq!(table.len(), 262);
            assert_eq!(table.state().segments, 1);
            assert!(table.next_table().is_none());
            assert!(table.entry(261).load(Ordering::Relaxed).is_null());
            assert_eq!(
                table.hash_ptr(261).load(Ordering::Relaxed).head(),
                super::super::hashptr::Link::NULL
            );
            Table::dealloc(table);
        }
    }

    #[test]
    fn window_is_bounded() {
        unsafe {
            let table: Table<u8> = Table::try_alloc(10_007, 9_000).unwrap();
            assert_eq!(table.window, SEARCH_RANGE);
            assert_eq!(table.state().segments, 5);
            Table::dealloc(table);
        }
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_capacity(0), 131);
        assert_eq!(normalize_capacity(2), 131);
        assert_eq!(normalize_capacity(1031), 1031);
        // 1032 -> 1033 (prime).
        assert_eq!(normalize_capacity(1032), 1033);

        for capacity in [500, 4096, 100_000, 1 << 20] {
            let normalized = normalize_capacity(capacity);
            assert!(normalized >= capacity);
            assert!(SMALL_PRIMES.iter().all(|p| normalized % p != 0));
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(threshold(1000, 0.97), 970);
        assert_eq!(threshold(131, 0.99), 130);
        assert!(threshold(size_for_capacity(970, 0.97), 0.97) >= 970);
    }
}
