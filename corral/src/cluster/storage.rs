//! Identity storage: the pluggable consistency anchor of the cluster.
//!
//! Everything the cluster knows durably about virtual actors flows through
//! [`IdentityStorage`]: spawn locks, recorded activations, and member
//! cleanup. The in-memory implementation backs tests; a production cluster
//! would put a database behind the same trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::identity::{ClusterIdentity, SpawnLock, StoredActivation};
use crate::error::StorageError;
use crate::pid::Pid;

/// Durable identity records shared by all cluster members.
#[async_trait]
pub trait IdentityStorage: Send + Sync + fmt::Debug {
    /// Look up a recorded activation.
    async fn try_get_existing_activation(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<StoredActivation>, StorageError>;

    /// Atomically acquire the spawn lock for `identity`. `None` when an
    /// activation already exists or another unexpired lock is held.
    async fn try_acquire_lock(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<SpawnLock>, StorageError>;

    /// Wait up to `timeout` for another node's in-flight activation to be
    /// recorded. `None` when the wait expires.
    async fn wait_for_activation(
        &self,
        identity: &ClusterIdentity,
        timeout: Duration,
    ) -> Result<Option<StoredActivation>, StorageError>;

    /// Release a spawn lock without recording an activation.
    async fn remove_lock(&self, lock: SpawnLock) -> Result<(), StorageError>;

    /// Durably record an activation under `lock`. Fails with a lock-lost
    /// error when the lock is no longer held by the caller.
    async fn store_activation(
        &self,
        member_id: &str,
        lock: &SpawnLock,
        pid: &Pid,
    ) -> Result<(), StorageError>;

    /// Remove a recorded activation, matching on the exact pid.
    async fn remove_activation(
        &self,
        identity: &ClusterIdentity,
        pid: &Pid,
    ) -> Result<(), StorageError>;

    /// Remove every record owned by a member that left the cluster.
    async fn remove_member(&self, member_id: &str) -> Result<(), StorageError>;

    /// Called once before the first operation.
    async fn init(&self) -> Result<(), StorageError>;

    /// Called once after the last operation.
    async fn dispose(&self) -> Result<(), StorageError>;
}

struct LockEntry {
    lock_id: String,
    acquired_at: Instant,
}

#[derive(Default)]
struct StoreState {
    activations: HashMap<ClusterIdentity, StoredActivation>,
    locks: HashMap<ClusterIdentity, LockEntry>,
    waiters: HashMap<ClusterIdentity, Arc<Notify>>,
}

/// In-memory [`IdentityStorage`], shared by every node in one test process.
pub struct InMemoryIdentityStorage {
    state: Mutex<StoreState>,
    next_lock_id: AtomicU64,
    lock_ttl: Duration,
}

impl fmt::Debug for InMemoryIdentityStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return f.write_str("InMemoryIdentityStorage(poisoned)"),
        };
        f.debug_struct("InMemoryIdentityStorage")
            .field("activations", &state.activations.len())
            .field("locks", &state.locks.len())
            .finish()
    }
}

impl Default for InMemoryIdentityStorage {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl InMemoryIdentityStorage {
    /// Storage whose abandoned locks expire after `lock_ttl`.
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            next_lock_id: AtomicU64::new(1),
            lock_ttl,
        }
    }

    /// Number of recorded activations.
    pub fn activation_count(&self) -> usize {
        self.state.lock().map(|s| s.activations.len()).unwrap_or(0)
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::OperationFailed("storage mutex poisoned".to_string()))
    }
}

#[async_trait]
impl IdentityStorage for InMemoryIdentityStorage {
    async fn try_get_existing_activation(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<StoredActivation>, StorageError> {
        Ok(self.locked()?.activations.get(identity).cloned())
    }

    async fn try_acquire_lock(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<SpawnLock>, StorageError> {
        let mut state = self.locked()?;
        if state.activations.contains_key(identity) {
            return Ok(None);
        }
        if let Some(existing) = state.locks.get(identity) {
            if existing.acquired_at.elapsed() < self.lock_ttl {
                return Ok(None);
            }
            tracing::debug!(identity = %identity, "expired spawn lock evicted");
        }
        let lock_id = format!("lock-{}", self.next_lock_id.fetch_add(1, Ordering::Relaxed));
        state.locks.insert(
            identity.clone(),
            LockEntry {
                lock_id: lock_id.clone(),
                acquired_at: Instant::now(),
            },
        );
        Ok(Some(SpawnLock {
            lock_id,
            identity: identity.clone(),
        }))
    }

    async fn wait_for_activation(
        &self,
        identity: &ClusterIdentity,
        timeout: Duration,
    ) -> Result<Option<StoredActivation>, StorageError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notify = {
                let mut state = self.locked()?;
                if let Some(activation) = state.activations.get(identity) {
                    return Ok(Some(activation.clone()));
                }
                Arc::clone(
                    state
                        .waiters
                        .entry(identity.clone())
                        .or_insert_with(|| Arc::new(Notify::new())),
                )
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove_lock(&self, lock: SpawnLock) -> Result<(), StorageError> {
        let mut state = self.locked()?;
        // Only the owner's release removes the entry.
        if state
            .locks
            .get(&lock.identity)
            .is_some_and(|entry| entry.lock_id == lock.lock_id)
        {
            state.locks.remove(&lock.identity);
        }
        Ok(())
    }

    async fn store_activation(
        &self,
        member_id: &str,
        lock: &SpawnLock,
        pid: &Pid,
    ) -> Result<(), StorageError> {
        let notify = {
            let mut state = self.locked()?;
            let held = state
                .locks
                .get(&lock.identity)
                .is_some_and(|entry| entry.lock_id == lock.lock_id);
            if !held {
                return Err(StorageError::LockLost {
                    lock_id: lock.lock_id.clone(),
                });
            }
            state.locks.remove(&lock.identity);
            state.activations.insert(
                lock.identity.clone(),
                StoredActivation {
                    pid: pid.clone(),
                    member_id: member_id.to_string(),
                },
            );
            state.waiters.remove(&lock.identity)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
        Ok(())
    }

    async fn remove_activation(
        &self,
        identity: &ClusterIdentity,
        pid: &Pid,
    ) -> Result<(), StorageError> {
        let mut state = self.locked()?;
        if state
            .activations
            .get(identity)
            .is_some_and(|activation| &activation.pid == pid)
        {
            state.activations.remove(identity);
        }
        Ok(())
    }

    async fn remove_member(&self, member_id: &str) -> Result<(), StorageError> {
        let mut state = self.locked()?;
        state
            .activations
            .retain(|_, activation| activation.member_id != member_id);
        Ok(())
    }

    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
