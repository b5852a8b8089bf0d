//! Per-resource exclusive locks
//!
//! A `LockRegistry` maps resource keys to the label of whoever holds them.
//! Acquisition polls on a fixed interval until the key is free or the
//! timeout runs out. Waiters are not queued: whichever poll finds the key
//! free first wins.
//!
//! Holder labels are for display only. They are never compared, so a second
//! attempt with the same label still waits, and `release` removes whatever
//! entry is present.

use crate::error::{LockError, LockResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Default interval between acquisition attempts
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who holds a resource and since when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Caller-supplied label
    pub holder: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

impl LockEntry {
    fn new(holder: &str) -> Self {
        LockEntry {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
        }
    }
}

/// Process-wide table of held resources
#[derive(Debug)]
pub struct LockRegistry<K> {
    locks: Mutex<HashMap<K, LockEntry>>,
    poll_interval: Duration,
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty registry
    pub fn new() -> Self {
        LockRegistry {
            locks: Mutex::new(HashMap::new()),
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }

    /// Set the interval between acquisition attempts
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Interval between acquisition attempts
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, LockEntry>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id` if nobody holds it
    pub fn try_acquire(&self, id: &K, holder: &str) -> bool {
        let mut locks = self.table();
        if locks.contains_key(id) {
            return false;
        }
        locks.insert(id.clone(), LockEntry::new(holder));
        true
    }

    /// Claim `id`, polling until it is free or `timeout` has passed since
    /// the first attempt
    pub fn acquire(&self, id: &K, holder: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.try_acquire(id, holder) {
                tracing::debug!(resource = ?id, holder, "lock acquired");
                return true;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                tracing::info!(resource = ?id, holder, ?waited, "lock acquisition timed out");
                return false;
            }
            thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Remove the entry for `id`, whoever holds it
    pub fn release(&self, id: &K) -> Option<LockEntry> {
        let released = self.table().remove(id);
        if let Some(entry) = &released {
            tracing::debug!(resource = ?id, holder = %entry.holder, "lock released");
        }
        released
    }

    /// Current entry for `id`
    pub fn holder(&self, id: &K) -> Option<LockEntry> {
        self.table().get(id).cloned()
    }

    /// Whether anybody holds `id`
    pub fn is_locked(&self, id: &K) -> bool {
        self.table().contains_key(id)
    }

    /// Snapshot of every held resource
    pub fn locks(&self) -> Vec<(K, LockEntry)> {
        self.table()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Acquire `id` and return a guard that releases it when dropped
    pub fn lock(&self, id: &K, holder: &str, timeout: Duration) -> LockResult<LockGuard<'_, K>> {
        if self.acquire(id, holder, timeout) {
            Ok(LockGuard {
                registry: self,
                id: id.clone(),
            })
        } else {
            Err(LockError::Timeout {
                resource: format!("{:?}", id),
                waited: timeout,
            })
        }
    }

    /// Run `body` while holding `id`.
    ///
    /// The lock is released however `body` ends, including by panic, which
    /// then continues to unwind. If the lock cannot be taken in time,
    /// `on_timeout` runs once and `body` never runs.
    pub fn with_lock<T, F, E>(
        &self,
        id: &K,
        holder: &str,
        timeout: Duration,
        body: F,
        on_timeout: Option<E>,
    ) -> LockResult<T>
    where
        F: FnOnce() -> T,
        E: FnOnce(),
    {
        match self.lock(id, holder, timeout) {
            Ok(_guard) => Ok(body()),
            Err(e) => {
                if let Some(callback) = on_timeout {
                    callback();
                }
                Err(e)
            }
        }
    }
}

impl<K> Default for LockRegistry<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a resource until dropped
#[derive(Debug)]
pub struct LockGuard<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    registry: &'a LockRegistry<K>,
    id: K,
}

impl<K> LockGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// The locked resource
    pub fn id(&self) -> &K {
        &self.id
    }
}

impl<K> Drop for LockGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
