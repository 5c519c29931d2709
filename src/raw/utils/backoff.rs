use std::hint;
use std::thread;
use std::time::Duration;

/// The kind of pause taken by a single [`Backoff::snooze`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pause {
    Spin,
    Yield,
    Sleep,
}

// Exponential backoff for threads waiting on another thread's progress.
//
// Spins first, then yields to the scheduler, then sleeps for increasingly
// long periods.
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    const SLEEP_LIMIT: u32 = 10;

    #[inline]
    pub fn new() -> Backoff {
        Backoff { step: 0 }
    }

    // Pause the current thread, returning the kind of pause taken.
    #[inline]
    pub fn snooze(&mut self) -> Pause {
        let pause = if self.step <= Backoff::SPIN_LIMIT {
            for _ in 0..1 << self.step {
                hint::spin_loop();
            }

            Pause::Spin
        } else if self.step <= Backoff::YIELD_LIMIT {
            thread::yield_now();
            Pause::Yield
        } else {
            // Sleep for at most ~1ms.
            let exp = (self.step - Backoff::YIELD_LIMIT).min(Backoff::SLEEP_LIMIT);
            thread::sleep(Duration::from_micros(1 << exp));
            Pause::Sleep
        };

        self.step += 1;
        pause
    }
}
