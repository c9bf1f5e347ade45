//! Per-key delayed jobs on the tokio timer.
//!
//! `schedule` replaces whatever was pending for the key, so debounce call
//! sites cannot forget to cancel before restarting. `schedule_once` leaves a
//! pending job alone, which gives trailing-edge throttling. A job that has
//! already started running is never aborted by a later schedule.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

struct ScheduledJob {
    id: u64,
    handle: JoinHandle<()>,
}

pub struct KeyedScheduler<K> {
    name: &'static str,
    jobs: Arc<Mutex<HashMap<K, ScheduledJob>>>,
    next_id: Arc<AtomicU64>,
}

impl<K> Clone for KeyedScheduler<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            jobs: self.jobs.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K> KeyedScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Runs `job` after `delay`, cancelling the job pending for `key`.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: K, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = lock(&self.jobs);
        let scheduled = self.spawn_job(key.clone(), delay, job);
        if let Some(previous) = jobs.insert(key.clone(), scheduled) {
            previous.handle.abort();
            tracing::debug!(scheduler = self.name, key = ?key, "rescheduled pending job");
        }
    }

    /// Runs `job` after `delay` unless something is already pending for
    /// `key`. Returns whether the job was accepted.
    pub fn schedule_once<F>(&self, key: K, delay: Duration, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&key) {
            return false;
        }
        let scheduled = self.spawn_job(key.clone(), delay, job);
        jobs.insert(key, scheduled);
        true
    }

    fn spawn_job<F>(&self, key: K, delay: Duration, job: F) -> ScheduledJob
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let jobs = self.jobs.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut jobs = lock(&jobs);
                match jobs.get(&key) {
                    Some(current) if current.id == id => {
                        jobs.remove(&key);
                    }
                    _ => return,
                }
            }
            job.await;
        });
        ScheduledJob { id, handle }
    }

    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.jobs).remove(key) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let mut jobs = lock(&self.jobs);
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
        if count > 0 {
            tracing::debug!(scheduler = self.name, count, "cancelled pending jobs");
        }
        count
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.jobs).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.jobs).len()
    }
}
