//! Write-failure notification hook.
//!
//! When a write-class operation fails against a server (and tracking is
//! enabled for the call), the router notifies every subscriber with the
//! affected key, after I/O has completed and outside any pool lock. There
//! is no persistent queue behind this; subscribers decide what to do with
//! the dirty key.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use protocol_meta::Key;

type Subscriber = Arc<dyn Fn(&Key) + Send + Sync>;

/// A per-client list of write-failure subscribers.
///
/// Subscribers must be non-blocking; they run synchronously on the failing
/// caller's thread, against a snapshot of the list, so a subscriber may
/// safely re-enter the hook (register another subscriber, or perform a
/// cache write whose own failure notifies again). A panicking subscriber
/// is caught and logged, and the remaining subscribers still run.
#[derive(Clone, Default)]
pub struct WriteFailureHook {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl WriteFailureHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, subscriber: impl Fn(&Key) + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(subscriber));
    }

    pub(crate) fn emit(&self, key: &Key) {
        // Snapshot under the lock, invoke outside it: the list lock is not
        // reentrant, and subscribers are allowed to call back in.
        let subscribers: Vec<Subscriber> = self.subscribers.lock().clone();
        for subscriber in &subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(key))).is_err() {
                tracing::error!("write-failure subscriber panicked for key {}", key);
            }
        }
    }
}
