use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// The maximum distance between a bucket and any member of its chain.
pub const SEARCH_RANGE: usize = Link::MAX as usize;

/// A bounded offset from a bucket to a slot in its neighborhood.
///
/// Chain members are always addressed relative to the bucket that owns the
/// chain, both from the chain head and from each member's next link.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Link(u16);

impl Link {
    pub const NULL: Link = Link(0x0FFF);
    pub const MAX: u16 = 0x0FFE;

    const MASK: u64 = 0x0FFF;

    #[inline]
    pub fn new(offset: usize) -> Link {
        debug_assert!(offset <= Link::MAX as usize);
        Link(offset as u16)
    }

    #[inline]
    pub fn offset(self) -> Option<usize> {
        (self != Link::NULL).then_some(self.0 as usize)
    }

    #[inline]
    fn from_bits(bits: u64) -> Link {
        Link((bits & Link::MASK) as u16)
    }

    #[inline]
    fn bits(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset() {
            Some(offset) => write!(f, "Link({offset})"),
            None => write!(f, "Link(NULL)"),
        }
    }
}

/// Per-slot atomic metadata.
///
/// A single word packs two independent halves. The bucket half holds the
/// head of the chain rooted at this slot's bucket, the stale, copied and
/// reclaiming flags, and a stamp bumped whenever the chain gains a member.
/// The slot half holds the in-use flag and the next link of whichever chain
/// this slot is a member of.
///
/// ```text
///  63            32  28 27      16 14 13 12 11       0
/// +----------------+--+----------+--+--+--+----------+
/// |     stamp      |IU|   next   |RC|CP|ST|   head   |
/// +----------------+--+----------+--+--+--+----------+
/// ```
pub struct HashPtr(AtomicU64);

impl HashPtr {
    pub const STALE: u64 = 1 << 12;
    pub const COPIED: u64 = 1 << 13;
    pub const RECLAIMING: u64 = 1 << 14;
    pub const IN_USE: u64 = 1 << 28;

    const NEXT_SHIFT: u32 = 16;
    const STAMP_SHIFT: u32 = 32;
    const STAMP_ONE: u64 = 1 << HashPtr::STAMP_SHIFT;

    const HEAD: u64 = Link::MASK;
    const NEXT: u64 = Link::MASK << HashPtr::NEXT_SHIFT;
    const STAMP: u64 = (u32::MAX as u64) << HashPtr::STAMP_SHIFT;
    const BUCKET: u64 = HashPtr::HEAD
        | HashPtr::STALE
        | HashPtr::COPIED
        | HashPtr::RECLAIMING
        | HashPtr::STAMP;

    // An unused slot heading an empty chain.
    pub const EMPTY: u64 = Link::NULL.0 as u64 | ((Link::NULL.0 as u64) << HashPtr::NEXT_SHIFT);

    #[inline]
    pub fn load(&self, ordering: Ordering) -> Word {
        Word(self.0.load(ordering))
    }

    // Applies `f` atomically, returning the previous word.
    #[inline]
    fn update(&self, f: impl Fn(u64) -> u64) -> Word {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| Some(f(word)))
        {
            Ok(prev) | Err(prev) => Word(prev),
        }
    }

    // Publish `head` as the new chain head, provided the bucket half is
    // unchanged since `expected` was observed.
    //
    // Concurrent changes to the slot half are tolerated.
    pub fn publish(&self, expected: Word, head: Link) -> bool {
        let mut current = self.load(Ordering::Acquire);

        loop {
            if current.bucket() != expected.bucket() {
                return false;
            }

            let new = (current.0 & !HashPtr::HEAD) | head.bits();
            let new = new.wrapping_add(HashPtr::STAMP_ONE);

            match self
                .0
                .compare_exchange_weak(current.0, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(found) => current = Word(found),
            }
        }
    }

    // Set the reclaiming flag, provided the bucket half is unchanged since
    // `expected` was observed.
    pub fn lock_reclaim(&self, expected: Word) -> bool {
        let mut current = self.load(Ordering::Acquire);

        loop {
            if current.bucket() != expected.bucket() {
                return false;
            }

            match self.0.compare_exchange_weak(
                current.0,
                current.0 | HashPtr::RECLAIMING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(found) => current = Word(found),
            }
        }
    }

    // Clear the reclaiming flag and bump the stamp.
    pub fn unlock_reclaim(&self) {
        self.update(|word| (word & !HashPtr::RECLAIMING).wrapping_add(HashPtr::STAMP_ONE));
    }

    // Mark the bucket as stale, returning the previous word.
    #[inline]
    pub fn mark_stale(&self) -> Word {
        Word(self.0.fetch_or(HashPtr::STALE, Ordering::AcqRel))
    }

    #[inline]
    pub fn mark_copied(&self) {
        self.0.fetch_or(HashPtr::COPIED, Ordering::Release);
    }

    // Claim this slot for a chain whose current head is `next`.
    pub fn claim(&self, next: Link) -> bool {
        let mut current = self.load(Ordering::Relaxed);

        loop {
            if current.in_use() {
                return false;
            }

            let new = (current.0 & !HashPtr::NEXT)
                | HashPtr::IN_USE
                | (next.bits() << HashPtr::NEXT_SHIFT);

            match self
                .0
                .compare_exchange_weak(current.0, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(found) => current = Word(found),
            }
        }
    }

    // Return this slot to the unused state.
    pub fn release(&self) {
        self.update(|word| {
            (word & !(HashPtr::NEXT | HashPtr::IN_USE))
                | (Link::NULL.bits() << HashPtr::NEXT_SHIFT)
        });
    }

    // Rewrite the head link of this bucket's chain.
    //
    // Only used with exclusive access to the chain.
    pub fn set_head(&self, head: Link) {
        self.update(|word| (word & !HashPtr::HEAD) | head.bits());
    }

    // Rewrite the next link of this slot.
    //
    // Only used with exclusive access to the chain.
    pub fn set_next(&self, next: Link) {
        self.update(|word| (word & !HashPtr::NEXT) | (next.bits() << HashPtr::NEXT_SHIFT));
    }
}

impl Default for HashPtr {
    fn default() -> HashPtr {
        HashPtr(AtomicU64::new(HashPtr::EMPTY))
    }
}

/// A snapshot of a [`HashPtr`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Word(u64);

impl Word {
    #[inline]
    pub fn head(self) -> Link {
        Link::from_bits(self.0)
    }

    #[inline]
    pub fn next(self) -> Link {
        Link::from_bits(self.0 >> HashPtr::NEXT_SHIFT)
    }

    #[inline]
    pub fn is_stale(self) -> bool {
        self.0 & HashPtr::STALE != 0
    }

    #[inline]
    pub fn is_copied(self) -> bool {
        self.0 & HashPtr::COPIED != 0
    }

    #[inline]
    pub fn is_reclaiming(self) -> bool {
        self.0 & HashPtr::RECLAIMING != 0
    }

    #[inline]
    pub fn in_use(self) -> bool {
        self.0 & HashPtr::IN_USE != 0
    }

    #[inline]
    fn bucket(self) -> u64 {
        self.0 & HashPtr::BUCKET
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Word")
            .field("head", &self.head())
            .field("next", &self.next())
            .field("stale", &self.is_stale())
            .field("copied", &self.is_copied())
            .field("reclaiming", &self.is_reclaiming())
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        let ptr = HashPtr::default();
        let word = ptr.load(Ordering::Relaxed);
        assert_eq!(word.head(), Link::NULL);
        assert_eq!(word.next(), Link::NULL);
        assert!(!word.in_use() && !word.is_stale() && !word.is_copied());
    }

    #[test]
    fn halves_are_independent() {
        let ptr = HashPtr::default();
        let observed = ptr.load(Ordering::Relaxed);

        // Claiming the slot for another chain does not disturb this bucket.
        assert!(ptr.claim(Link::new(7)));
        assert!(!ptr.claim(Link::new(9)));
        assert!(ptr.publish(observed, Link::new(3)));

        let word = ptr.load(Ordering::Relaxed);
        assert_eq!(word.head(), Link::new(3));
        assert_eq!(word.next(), Link::new(7));
        assert!(word.in_use());

        // The bucket half moved on, so the stale observation fails.
        assert!(!ptr.publish(observed, Link::new(4)));

        ptr.release();
        let word = ptr.load(Ordering::Relaxed);
        assert!(!word.in_use());
        assert_eq!(word.next(), Link::NULL);
        assert_eq!(word.head(), Link::new(3));
    }

    #[test]
    fn reclaim_lock_bumps_stamp() {
        let ptr = HashPtr::default();
        let observed = ptr.load(Ordering::Relaxed);

        assert!(ptr.lock_reclaim(observed));
        assert!(ptr.load(Ordering::Relaxed).is_reclaiming());
        assert!(!ptr.lock_reclaim(observed));
        ptr.unlock_reclaim();

        // Same head and flags as before, but a newer stamp.
        let word = ptr.load(Ordering::Relaxed);
        assert!(!word.is_reclaiming());
        assert_eq!(word.head(), observed.head());
        assert!(!ptr.publish(observed, Link::new(0)));
    }

    #[test]
    fn latches() {
        let ptr = HashPtr::default();
        let observed = ptr.load(Ordering::Relaxed);

        assert!(!ptr.mark_stale().is_stale());
        assert!(ptr.mark_stale().is_stale());
        assert!(!ptr.publish(observed, Link::new(1)));

        ptr.mark_copied();
        let word = ptr.load(Ordering::Relaxed);
        assert!(word.is_stale() && word.is_copied());
    }
}
