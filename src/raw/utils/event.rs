use std::sync::atomic::{AtomicU32, Ordering};

// A multi-state event that threads can block on.
//
// Waiting threads park on the futex until the state moves away from the
// value they are waiting out.
pub struct Event(AtomicU32);

impl Event {
    pub const fn new(state: u32) -> Event {
        Event(AtomicU32::new(state))
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    // Move to `state` and wake all waiters.
    pub fn set(&self, state: u32) {
        self.0.store(state, Ordering::Release);
        atomic_wait::wake_all(&self.0);
    }

    // Block while the event is in the given state.
    pub fn wait_while(&self, state: u32) {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current != state {
                return;
            }

            atomic_wait::wait(&self.0, current);
        }
    }
}

// A countdown latch.
pub struct Countdown(AtomicU32);

impl Countdown {
    pub fn new(count: u32) -> Countdown {
        Countdown(AtomicU32::new(count))
    }

    // Decrement the count, waking any waiters if it reaches zero.
    pub fn consume(&self) {
        if self.0.fetch_sub(1, Ordering::AcqRel) == 1 {
            atomic_wait::wake_all(&self.0);
        }
    }

    // Block until the count reaches zero.
    pub fn wait(&self) {
        loop {
            let remaining = self.0.load(Ordering::Acquire);
            if remaining == 0 {
                return;
            }

            atomic_wait::wait(&self.0, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn countdown() {
        let latch = Countdown::new(4);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| latch.consume());
            }

            latch.wait();
        });

        // Stays released.
        latch.wait();
    }

    #[test]
    fn event() {
        let event = Event::new(0);

        thread::scope(|s| {
            s.spawn(|| event.wait_while(0));
            s.spawn(|| event.wait_while(0));
            event.set(2);
        });

        assert_eq!(event.load(), 2);
        // Waiting out a different state returns immediately.
        event.wait_while(1);
    }
}
