use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use super::table::HashTable;
use crate::trace::{debug, trace};

// The number of segments the helper copies before yielding to other tables.
const HELPER_SEGMENTS: usize = 4;

// A table with resize work that a helper thread can perform.
pub trait Assist: Send + Sync {
    // Perform a bounded amount of resize work, returning `true` if more
    // work remains.
    fn assist(&self) -> bool;
}

impl<K, V, S> Assist for HashTable<K, V, S>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn assist(&self) -> bool {
        let guard = self.guard();
        self.help_resize(HELPER_SEGMENTS, &guard)
    }
}

/// A background thread that helps tables finish their resizes.
///
/// Resizes are completed by the threads operating on a table, so a helper
/// is never required for progress. It bounds how long a resize stays in
/// flight when the table is otherwise idle.
///
/// The thread is started lazily when the first resize is submitted, and
/// runs until [`shutdown`](ResizeHelper::shutdown) is called or the helper is
/// dropped.
pub struct ResizeHelper {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Weak<dyn Assist>>,
    shutdown: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResizeHelper {
    /// Creates a new resize helper.
    pub fn new() -> ResizeHelper {
        ResizeHelper {
            shared: Arc::new(Shared {
                queue: Mutex::default(),
                available: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Returns the process-wide resize helper.
    pub fn global() -> Arc<ResizeHelper> {
        static GLOBAL: OnceLock<Arc<ResizeHelper>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ResizeHelper::new())).clone()
    }

    // Queue a table with an in-progress resize.
    pub(crate) fn submit(&self, job: Weak<dyn Assist>) {
        {
            let mut queue = self.shared.lock();
            if queue.shutdown {
                return;
            }

            queue.jobs.push_back(job);
        }

        self.start();
        self.shared.available.notify_one();
    }

    // Start the helper thread if it is not running.
    fn start(&self) {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("hoptable-resize".to_owned())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                debug!("started resize helper");
                *thread = Some(handle);
            }
            // Resizes still complete without the helper.
            Err(_err) => {
                debug!("failed to start resize helper: {}", _err);
            }
        }
    }

    /// Returns `true` if the helper thread is running.
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the helper thread and waits for it to exit.
    ///
    /// Tables submitted after shutdown are not helped.
    pub fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.available.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            // The helper may drop the last reference to itself through a
            // table it was assisting, in which case it exits on its own.
            if handle.thread().id() == thread::current().id() {
                return;
            }

            // A panicking job has already reported itself.
            let _ = handle.join();
            debug!("stopped resize helper");
        }
    }
}

impl Shared {
    fn run(&self) {
        loop {
            let job = {
                let mut queue = self.lock();

                loop {
                    if queue.shutdown {
                        return;
                    }

                    if let Some(job) = queue.jobs.pop_front() {
                        break job;
                    }

                    queue = self
                        .available
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            // The table may have been dropped in the meantime.
            let Some(table) = job.upgrade() else {
                continue;
            };

            if table.assist() {
                trace!("requeueing resize");
                self.lock().jobs.push_back(job);
            }
        }
    }
}

impl Default for ResizeHelper {
    fn default() -> ResizeHelper {
        ResizeHelper::new()
    }
}

impl Drop for ResizeHelper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
