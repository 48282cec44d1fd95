//! Lock manager and the named-lock guard.

use crate::backoff::Backoff;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Non-blocking lock table.
///
/// The trait is the seam for a cluster-wide binding (file-system or
/// network); only the in-process implementation ships. Acquisition
/// returns an epoch that the holder must present on release, so that
/// a holder whose lock was stolen cannot release the thief's hold.
pub trait LockManager: Send + Sync {
    /// Attempts to acquire `name`. `steal_ms` permits taking over a
    /// lock whose current holder is older than the threshold. Returns
    /// the hold epoch on success.
    fn try_acquire(&self, name: &str, steal_ms: Option<u64>) -> Option<u64>;

    /// Releases `name` if `epoch` still identifies the current hold.
    /// Returns true if the lock was released.
    fn release(&self, name: &str, epoch: u64) -> bool;
}

#[derive(Debug)]
struct Holder {
    since_ms: u64,
    epoch: u64,
}

/// Counters exported by the lock manager.
#[derive(Debug, Clone, Default)]
pub struct LockManagerStats {
    pub acquisitions: u64,
    pub steals: u64,
    pub contentions: u64,
}

/// Process-wide in-memory lock table.
pub struct InMemoryLockManager {
    table: Mutex<HashMap<String, Holder>>,
    next_epoch: AtomicU64,
    acquisitions: AtomicU64,
    steals: AtomicU64,
    contentions: AtomicU64,
}

impl InMemoryLockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            acquisitions: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            contentions: AtomicU64::new(0),
        }
    }

    /// Returns current counters.
    pub fn stats(&self) -> LockManagerStats {
        LockManagerStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            contentions: self.contentions.load(Ordering::Relaxed),
        }
    }

    /// Number of currently held locks.
    pub fn held_count(&self) -> usize {
        self.table.lock().len()
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for InMemoryLockManager {
    fn try_acquire(&self, name: &str, steal_ms: Option<u64>) -> Option<u64> {
        let now = now_ms();
        let mut table = self.table.lock();
        if let Some(holder) = table.get(name) {
            let age = now.saturating_sub(holder.since_ms);
            match steal_ms {
                Some(threshold) if age >= threshold => {
                    let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                    warn!(name, age_ms = age, "stealing stale lock");
                    table.insert(
                        name.to_string(),
                        Holder {
                            since_ms: now,
                            epoch,
                        },
                    );
                    self.steals.fetch_add(1, Ordering::Relaxed);
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    Some(epoch)
                }
                _ => {
                    self.contentions.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        } else {
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            table.insert(
                name.to_string(),
                Holder {
                    since_ms: now,
                    epoch,
                },
            );
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            Some(epoch)
        }
    }

    fn release(&self, name: &str, epoch: u64) -> bool {
        let mut table = self.table.lock();
        match table.get(name) {
            Some(holder) if holder.epoch == epoch => {
                table.remove(name);
                true
            }
            _ => {
                // The hold was stolen; the thief owns the lock now.
                debug!(name, epoch, "release skipped, hold superseded");
                false
            }
        }
    }
}

/// A reference to one named lock.
///
/// States: unheld, held by this guard, or held elsewhere. Dropping a
/// guard that still holds releases it.
pub struct NamedLock {
    manager: Arc<dyn LockManager>,
    name: String,
    epoch: Option<u64>,
}

impl NamedLock {
    /// Creates an unheld reference to `name`.
    pub fn new(manager: Arc<dyn LockManager>, name: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
            epoch: None,
        }
    }

    /// True while this guard holds the lock.
    pub fn held(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks up to `wait` for the lock; returns true iff held on
    /// return. A canceled waiter returns false and does not acquire
    /// afterward.
    pub async fn lock_timed_wait(&mut self, wait: Duration, cancel: &CancellationToken) -> bool {
        self.wait_internal(wait, None, cancel).await
    }

    /// Like [`lock_timed_wait`](Self::lock_timed_wait), but may evict
    /// a holder older than `steal`.
    pub async fn lock_timed_wait_steal_old(
        &mut self,
        wait: Duration,
        steal: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        self.wait_internal(wait, Some(steal.as_millis() as u64), cancel)
            .await
    }

    /// Releases the lock if held. Double release is a programming
    /// error.
    pub fn unlock(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            self.manager.release(&self.name, epoch);
        } else {
            debug_assert!(false, "unlock of unheld NamedLock");
        }
    }

    async fn wait_internal(
        &mut self,
        wait: Duration,
        steal_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> bool {
        debug_assert!(self.epoch.is_none(), "lock wait while already holding");
        let deadline = tokio::time::Instant::now() + wait;
        let mut backoff = Backoff::new();
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if let Some(epoch) = self.manager.try_acquire(&self.name, steal_ms) {
                self.epoch = Some(epoch);
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let delay = backoff.next_delay().min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            self.manager.release(&self.name, epoch);
        }
    }
}
