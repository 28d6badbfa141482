//! Fault-injecting decorator over any [`IdentityStorage`].
//!
//! Each storage operation independently fails with probability
//! `1 - success_rate` before reaching the inner store. Seeded, so a failing
//! chaos run reproduces from its seed.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::identity::{ClusterIdentity, SpawnLock, StoredActivation};
use super::storage::IdentityStorage;
use crate::error::StorageError;
use crate::pid::Pid;

/// Decorator that makes a storage backend unreliable.
pub struct FlakyIdentityStorage {
    inner: Arc<dyn IdentityStorage>,
    success_rate: f64,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for FlakyIdentityStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyIdentityStorage")
            .field("success_rate", &self.success_rate)
            .finish()
    }
}

impl FlakyIdentityStorage {
    /// Wrap `inner`, succeeding each operation with `success_rate` and
    /// drawing failures from a seeded generator.
    pub fn new(inner: Arc<dyn IdentityStorage>, success_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            success_rate: success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn roll(&self) -> Result<(), StorageError> {
        let unlucky = self
            .rng
            .lock()
            .map(|mut rng| rng.gen::<f64>() >= self.success_rate)
            .unwrap_or(false);
        if unlucky {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IdentityStorage for FlakyIdentityStorage {
    async fn try_get_existing_activation(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<StoredActivation>, StorageError> {
        self.roll()?;
        self.inner.try_get_existing_activation(identity).await
    }

    async fn try_acquire_lock(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Option<SpawnLock>, StorageError> {
        self.roll()?;
        self.inner.try_acquire_lock(identity).await
    }

    async fn wait_for_activation(
        &self,
        identity: &ClusterIdentity,
        timeout: Duration,
    ) -> Result<Option<StoredActivation>, StorageError> {
        self.roll()?;
        self.inner.wait_for_activation(identity, timeout).await
    }

    async fn remove_lock(&self, lock: SpawnLock) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.remove_lock(lock).await
    }

    async fn store_activation(
        &self,
        member_id: &str,
        lock: &SpawnLock,
        pid: &Pid,
    ) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.store_activation(member_id, lock, pid).await
    }

    async fn remove_activation(
        &self,
        identity: &ClusterIdentity,
        pid: &Pid,
    ) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.remove_activation(identity, pid).await
    }

    async fn remove_member(&self, member_id: &str) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.remove_member(member_id).await
    }

    // Lifecycle calls are kept reliable; chaos targets the data path.
    async fn init(&self) -> Result<(), StorageError> {
        self.inner.init().await
    }

    async fn dispose(&self) -> Result<(), StorageError> {
        self.inner.dispose().await
    }
}
