//! Per-project debounce scheduling.
//!
//! Each project has at most one pending delayed task; a newer event cancels
//! and replaces it (last write wins). Firing does not cancel work already in
//! flight, so the scheduler also hands out a per-project async lock that
//! serializes version creation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cancellable delayed tasks and serialization locks, keyed by project.
///
/// Both maps are swept on access: finished timer handles are dropped the
/// next time any project reschedules, and a lock entry lives only while
/// someone holds its `Arc`.
pub struct ProjectScheduler {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl ProjectScheduler {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `task` to run after `delay`, cancelling any pending task for
    /// the same project. Must be called within a tokio runtime.
    pub fn reschedule<F>(&self, project_id: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut timers = self.timers.lock();
        timers.retain(|_, pending| !pending.is_finished());
        if let Some(previous) = timers.insert(project_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel any pending task for the project. In-flight work is not
    /// interrupted once its quiet period has elapsed and it has begun.
    pub fn cancel(&self, project_id: &str) {
        if let Some(handle) = self.timers.lock().remove(project_id) {
            handle.abort();
        }
    }

    /// The async lock serializing version creation for one project.
    ///
    /// The map holds weak references, so a project's lock entry disappears
    /// once the last holder drops its `Arc`.
    pub fn serialize_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(project_id).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(project_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Default for ProjectScheduler {
    fn default() -> Self {
        Self::new()
    }
}
