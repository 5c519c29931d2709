mod backoff;
mod counter;
mod event;

pub use backoff::{Backoff, Pause};
pub use counter::Counter;
pub use event::{Countdown, Event};

use std::ops::Deref;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

// A pointee whose pointers carry tag bits in their alignment.
pub trait Unpack {
    // Clears the tag bits of an address.
    const MASK: usize;
}

// A tagged pointer split into its address and tag.
pub struct Tagged<T> {
    // The pointer as stored, tag included.
    pub raw: *mut T,
    // The pointer with its tag cleared.
    pub ptr: *mut T,
}

impl<T: Unpack> Tagged<T> {
    #[inline]
    pub fn new(raw: *mut T) -> Tagged<T> {
        Tagged {
            raw,
            ptr: raw.map_addr(|addr| addr & T::MASK),
        }
    }

    #[inline]
    pub fn tag(self) -> usize {
        self.raw.addr() & !T::MASK
    }
}

impl<T> Copy for Tagged<T> {}

impl<T> Clone for Tagged<T> {
    fn clone(&self) -> Self {
        *self
    }
}

// Atomically sets tag bits on a pointer, keeping its provenance.
pub trait FetchTag<T> {
    // Returns the previous pointer.
    fn fetch_tag(&self, tag: usize, ordering: Ordering) -> *mut T;
}

impl<T> FetchTag<T> for AtomicPtr<T> {
    #[inline]
    fn fetch_tag(&self, tag: usize, ordering: Ordering) -> *mut T {
        let mut current = self.load(Ordering::Relaxed);

        loop {
            let tagged = current.map_addr(|addr| addr | tag);
            match self.compare_exchange_weak(current, tagged, ordering, Ordering::Relaxed) {
                Ok(previous) => return previous,
                Err(found) => current = found,
            }
        }
    }
}

/// A value aligned to its own cache line, so that neighboring shards do not
/// contend.
#[derive(Default)]
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
    repr(align(64))
)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

// The number of shards for per-thread counters, a power of two.
pub fn shard_count() -> usize {
    static SHARDS: OnceLock<usize> = OnceLock::new();

    *SHARDS.get_or_init(|| {
        std::thread::available_parallelism()
            .map_or(1, usize::from)
            .next_power_of_two()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Aligned;

    impl Unpack for Aligned {
        const MASK: usize = !0b11;
    }

    #[test]
    fn tags() {
        let mut value = 0u32;
        let base = (&mut value as *mut u32).cast::<Aligned>();

        let entry = AtomicPtr::new(base);
        assert_eq!(entry.fetch_tag(0b01, Ordering::AcqRel), base);
        assert_eq!(entry.fetch_tag(0b10, Ordering::AcqRel).addr(), base.addr() | 0b01);

        let tagged = Tagged::new(entry.load(Ordering::Relaxed));
        assert_eq!(tagged.ptr, base);
        assert_eq!(tagged.tag(), 0b11);
    }

    #[test]
    fn shards() {
        assert!(shard_count().is_power_of_two());
    }
}
