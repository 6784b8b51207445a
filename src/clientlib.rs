//! Per-thread initialization for native client libraries.
//!
//! Some backend client libraries require an explicit "register this thread"
//! call before use from a new OS thread, and one global shutdown once no
//! registered thread remains. Query code never calls those hooks directly:
//! it calls `ThreadRegistrar::ensure_initialized()`, which lazily installs a
//! thread-local guard on first touch. The guard's `Drop` runs when the
//! owning thread's TLS is torn down, decrements the shared live-thread
//! count, and performs the global shutdown when the count hits zero.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Hooks of a native client library that is not callable from arbitrary
/// threads without registration. Implemented by backend drivers; drivers
/// over thread-agnostic libraries simply expose no client library.
pub trait ClientLibrary: Send + Sync {
    /// Register the current OS thread with the library.
    fn initialize_thread(&self);

    /// Deregister the current OS thread.
    fn finalize_thread(&self);

    /// Global library shutdown, called once after the last registered
    /// thread has finalized.
    fn shutdown_library(&self);
}

struct RegistrarInner {
    library: Arc<dyn ClientLibrary>,
    live_threads: Mutex<usize>,
}

struct ThreadGuard {
    inner: Arc<RegistrarInner>,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.inner.library.finalize_thread();
        let mut live = self.inner.live_threads.lock().unwrap();
        *live -= 1;
        if *live == 0 {
            debug!("last registered thread exited; shutting down client library");
            self.inner.library.shutdown_library();
        }
    }
}

thread_local! {
    // one slot per registrar instance this thread has touched
    static THREAD_GUARDS: RefCell<Vec<ThreadGuard>> = const { RefCell::new(Vec::new()) };
}

/// Collection-scoped owner of one client library's thread bookkeeping. No
/// process-wide state: two registrars over two libraries count their
/// threads independently.
pub struct ThreadRegistrar {
    inner: Arc<RegistrarInner>,
}

impl ThreadRegistrar {
    pub fn new(library: Arc<dyn ClientLibrary>) -> ThreadRegistrar {
        ThreadRegistrar { inner: Arc::new(RegistrarInner { library, live_threads: Mutex::new(0) }) }
    }

    /// Register the calling thread if it has not been registered with this
    /// registrar's library yet. Idempotent per thread.
    pub fn ensure_initialized(&self) {
        THREAD_GUARDS.with(|guards| {
            let mut guards = guards.borrow_mut();
            if guards.iter().any(|g| Arc::ptr_eq(&g.inner, &self.inner)) {
                return;
            }
            self.inner.library.initialize_thread();
            *self.inner.live_threads.lock().unwrap() += 1;
            guards.push(ThreadGuard { inner: Arc::clone(&self.inner) });
        });
    }

    /// Number of threads currently registered with the library.
    pub fn live_threads(&self) -> usize {
        *self.inner.live_threads.lock().unwrap()
    }
}
