//! The placement activator: hosts virtual actors on this member.
//!
//! Registered under the well-known local name [`PLACEMENT_ACTIVATOR`], one
//! per member. It answers [`ActivationRequest`]s idempotently: an identity
//! already hosted returns its existing pid, a spawn already pending joins
//! the pending entry, anything else spawns optimistically and then persists
//! the activation under the requester's lock.
//!
//! The spawn is optimistic: the actor exists before the durable record
//! does, and a failed persist compensates by stopping it. That relies on
//! spawned actors being stoppable before they have observably acted, which
//! holds because the grain's first message is the local [`ClusterInit`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::config::ClusterConfig;
use super::identity::{ClusterIdentity, SpawnLock};
use super::messages::{ActivationRequest, ActivationResponse, ClusterInit};
use super::pid_cache::PidCache;
use super::storage::IdentityStorage;
use crate::actor::{Actor, Context, Props, Terminated};
use crate::error::{ActorError, StorageError};
use crate::pid::Pid;
use crate::process::MessageEnvelope;

/// Well-known node-local name of the placement activator.
pub const PLACEMENT_ACTIVATOR: &str = "placement-activator";

#[derive(Debug)]
struct PersistOutcome {
    identity: ClusterIdentity,
    pid: Pid,
    result: Result<(), StorageError>,
}

/// Activator actor for one member.
pub struct PlacementActor {
    kinds: Arc<HashMap<String, Props>>,
    storage: Arc<dyn IdentityStorage>,
    pid_cache: Arc<PidCache>,
    member_id: String,
    config: ClusterConfig,
    my_actors: HashMap<ClusterIdentity, Pid>,
    by_pid: HashMap<Pid, ClusterIdentity>,
    pending: HashMap<ClusterIdentity, Vec<Pid>>,
}

impl PlacementActor {
    /// Activator hosting `kinds` on behalf of member `member_id`.
    pub fn new(
        kinds: Arc<HashMap<String, Props>>,
        storage: Arc<dyn IdentityStorage>,
        pid_cache: Arc<PidCache>,
        member_id: String,
        config: ClusterConfig,
    ) -> Self {
        Self {
            kinds,
            storage,
            pid_cache,
            member_id,
            config,
            my_actors: HashMap::new(),
            by_pid: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn respond_to(ctx: &Context, waiter: &Pid, pid: Option<Pid>) {
        ctx.system()
            .send(waiter, MessageEnvelope::new(ActivationResponse { pid }));
    }

    fn handle_request(&mut self, ctx: &Context, request: &ActivationRequest) {
        let identity = &request.identity;

        if let Some(pid) = self.my_actors.get(identity) {
            // Re-activation of a hosted identity is answered, not re-spawned.
            if let Some(sender) = ctx.sender() {
                Self::respond_to(ctx, sender, Some(pid.clone()));
            }
            return;
        }

        if let Some(waiters) = self.pending.get_mut(identity) {
            if let Some(sender) = ctx.sender() {
                waiters.push(sender.clone());
            }
            return;
        }

        let Some(props) = self.kinds.get(&identity.kind) else {
            tracing::warn!(identity = %identity, "activation request for unknown kind");
            if let Some(sender) = ctx.sender() {
                Self::respond_to(ctx, sender, None);
            }
            return;
        };

        let pid = ctx.spawn(props.clone());
        ctx.send(
            &pid,
            ClusterInit {
                identity: identity.clone(),
            },
        );
        ctx.watch(&pid);
        self.pending.insert(
            identity.clone(),
            ctx.sender().cloned().into_iter().collect(),
        );

        let storage = Arc::clone(&self.storage);
        let member_id = self.member_id.clone();
        let lock = SpawnLock {
            lock_id: request.lock_id.clone(),
            identity: identity.clone(),
        };
        let attempts = self.config.store_attempts;
        let backoff = self.config.store_backoff;
        let outcome_identity = identity.clone();
        let outcome_pid = pid.clone();
        ctx.reenter_after(async move {
            let result =
                persist_activation(&*storage, &member_id, &lock, &outcome_pid, attempts, backoff)
                    .await;
            PersistOutcome {
                identity: outcome_identity,
                pid: outcome_pid,
                result,
            }
        });
    }

    fn handle_persist_outcome(&mut self, ctx: &Context, outcome: &PersistOutcome) {
        let waiters = self.pending.remove(&outcome.identity).unwrap_or_default();
        match &outcome.result {
            Ok(()) => {
                self.my_actors
                    .insert(outcome.identity.clone(), outcome.pid.clone());
                self.by_pid
                    .insert(outcome.pid.clone(), outcome.identity.clone());
                self.pid_cache
                    .set(outcome.identity.clone(), outcome.pid.clone());
                tracing::info!(
                    identity = %outcome.identity,
                    pid = %outcome.pid,
                    "identity activated"
                );
                for waiter in waiters {
                    Self::respond_to(ctx, &waiter, Some(outcome.pid.clone()));
                }
            }
            Err(error) => {
                if error.is_lock_lost() {
                    tracing::info!(
                        identity = %outcome.identity,
                        "spawn lock lost; another member owns this identity"
                    );
                } else {
                    tracing::warn!(
                        identity = %outcome.identity,
                        %error,
                        "activation could not be persisted"
                    );
                }
                for waiter in waiters {
                    Self::respond_to(ctx, &waiter, None);
                }
                // The record never existed, so the speculative actor must not.
                ctx.stop(&outcome.pid);
            }
        }
    }

    fn handle_terminated(&mut self, who: &Pid) {
        let Some(identity) = self.by_pid.remove(who) else {
            return;
        };
        self.my_actors.remove(&identity);
        self.pid_cache.remove_if_pid(&identity, who);
        tracing::debug!(identity = %identity, pid = %who, "hosted identity terminated");

        let storage = Arc::clone(&self.storage);
        let pid = who.clone();
        tokio::spawn(async move {
            if let Err(error) = storage.remove_activation(&identity, &pid).await {
                tracing::debug!(identity = %identity, %error, "activation removal failed");
            }
        });
    }
}

#[async_trait]
impl Actor for PlacementActor {
    async fn receive(
        &mut self,
        ctx: &Context,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(request) = envelope.message.downcast_ref::<ActivationRequest>() {
            self.handle_request(ctx, request);
            Ok(())
        } else if let Some(outcome) = envelope.message.downcast_ref::<PersistOutcome>() {
            self.handle_persist_outcome(ctx, outcome);
            Ok(())
        } else if let Some(Terminated { who }) = envelope.message.downcast_ref::<Terminated>() {
            self.handle_terminated(who);
            Ok(())
        } else {
            Err(ActorError::UnexpectedMessage(envelope.type_name))
        }
    }
}

/// Store the activation, retrying transient failures with jittered backoff.
/// A lock-lost failure is authoritative and never retried.
async fn persist_activation(
    storage: &dyn IdentityStorage,
    member_id: &str,
    lock: &SpawnLock,
    pid: &Pid,
    attempts: u32,
    backoff: Duration,
) -> Result<(), StorageError> {
    let mut last = StorageError::Unavailable;
    for attempt in 1..=attempts.max(1) {
        match storage.store_activation(member_id, lock, pid).await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_lock_lost() => return Err(error),
            Err(error) => {
                tracing::debug!(
                    identity = %lock.identity,
                    attempt,
                    %error,
                    "store attempt failed"
                );
                last = error;
                if attempt < attempts {
                    let jitter = rand::thread_rng()
                        .gen_range(0..=backoff.as_millis().max(1) as u64);
                    tokio::time::sleep(backoff * attempt + Duration::from_millis(jitter)).await;
                }
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::actor::ActorSystem;
    use crate::cluster::identity::StoredActivation;
    use crate::cluster::storage::InMemoryIdentityStorage;
    use crate::future::FutureProcess;

    /// Delegating store whose `store_activation` takes a while, keeping the
    /// persist in flight long enough for more requests to arrive.
    #[derive(Debug)]
    struct SlowStore {
        inner: InMemoryIdentityStorage,
        store_delay: Duration,
    }

    #[async_trait]
    impl IdentityStorage for SlowStore {
        async fn try_get_existing_activation(
            &self,
            identity: &ClusterIdentity,
        ) -> Result<Option<StoredActivation>, StorageError> {
            self.inner.try_get_existing_activation(identity).await
        }

        async fn try_acquire_lock(
            &self,
            identity: &ClusterIdentity,
        ) -> Result<Option<SpawnLock>, StorageError> {
            self.inner.try_acquire_lock(identity).await
        }

        async fn wait_for_activation(
            &self,
            identity: &ClusterIdentity,
            timeout: Duration,
        ) -> Result<Option<StoredActivation>, StorageError> {
            self.inner.wait_for_activation(identity, timeout).await
        }

        async fn remove_lock(&self, lock: SpawnLock) -> Result<(), StorageError> {
            self.inner.remove_lock(lock).await
        }

        async fn store_activation(
            &self,
            member_id: &str,
            lock: &SpawnLock,
            pid: &Pid,
        ) -> Result<(), StorageError> {
            tokio::time::sleep(self.store_delay).await;
            self.inner.store_activation(member_id, lock, pid).await
        }

        async fn remove_activation(
            &self,
            identity: &ClusterIdentity,
            pid: &Pid,
        ) -> Result<(), StorageError> {
            self.inner.remove_activation(identity, pid).await
        }

        async fn remove_member(&self, member_id: &str) -> Result<(), StorageError> {
            self.inner.remove_member(member_id).await
        }

        async fn init(&self) -> Result<(), StorageError> {
            self.inner.init().await
        }

        async fn dispose(&self) -> Result<(), StorageError> {
            self.inner.dispose().await
        }
    }

    struct CountingGrain {
        spawns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for CountingGrain {
        async fn started(&mut self, _ctx: &Context) -> Result<(), ActorError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn receive(
            &mut self,
            _ctx: &Context,
            _envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            Ok(())
        }
    }

    async fn response_of(
        handle: crate::future::FutureHandle,
    ) -> ActivationResponse {
        handle
            .result(Duration::from_secs(2))
            .await
            .expect("activation response")
            .message
            .downcast_ref::<ActivationResponse>()
            .cloned()
            .expect("response type")
    }

    #[tokio::test]
    async fn test_repeated_requests_share_one_spawn_and_one_pid() {
        let storage = Arc::new(SlowStore {
            inner: InMemoryIdentityStorage::default(),
            store_delay: Duration::from_millis(50),
        });
        let identity = ClusterIdentity::new("counter", "c-1");
        let lock = storage
            .try_acquire_lock(&identity)
            .await
            .expect("acquire")
            .expect("lock");

        let system = ActorSystem::new("node-a:1");
        let spawns = Arc::new(AtomicUsize::new(0));
        let grain_spawns = Arc::clone(&spawns);
        let kinds: Arc<HashMap<String, Props>> = Arc::new(HashMap::from([(
            "counter".to_string(),
            Props::new(move || CountingGrain {
                spawns: grain_spawns.clone(),
            }),
        )]));
        let pid_cache = Arc::new(PidCache::new());
        {
            let storage = Arc::clone(&storage);
            let cache = Arc::clone(&pid_cache);
            system
                .spawn_named(
                    Props::new(move || {
                        PlacementActor::new(
                            Arc::clone(&kinds),
                            Arc::clone(&storage) as Arc<dyn IdentityStorage>,
                            Arc::clone(&cache),
                            "m-1".to_string(),
                            ClusterConfig::default(),
                        )
                    }),
                    PLACEMENT_ACTIVATOR,
                )
                .expect("spawn activator");
        }

        let target = Pid::new("node-a:1", PLACEMENT_ACTIVATOR);
        let request = ActivationRequest {
            identity,
            lock_id: lock.lock_id.clone(),
        };

        // Both requests land while the persist is still sleeping; the second
        // joins the pending entry instead of spawning again.
        let (reply1, h1) = FutureProcess::spawn(&system);
        system.send(&target, MessageEnvelope::with_sender(request.clone(), reply1));
        let (reply2, h2) = FutureProcess::spawn(&system);
        system.send(&target, MessageEnvelope::with_sender(request.clone(), reply2));

        let first = response_of(h1).await;
        let second = response_of(h2).await;
        assert!(first.pid.is_some());
        assert_eq!(first.pid, second.pid);
        assert_eq!(spawns.load(Ordering::SeqCst), 1);

        // Re-activation of a hosted identity answers with the existing pid.
        let (reply3, h3) = FutureProcess::spawn(&system);
        system.send(&target, MessageEnvelope::with_sender(request, reply3));
        let third = response_of(h3).await;
        assert_eq!(third.pid, first.pid);
        assert_eq!(spawns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persist_retries_transient_failures() {
        use crate::cluster::flaky::FlakyIdentityStorage;

        let inner = Arc::new(InMemoryIdentityStorage::default());
        let identity = ClusterIdentity::new("counter", "c-1");
        let lock = inner
            .try_acquire_lock(&identity)
            .await
            .expect("acquire")
            .expect("lock");

        // Seeded, so the failure pattern is identical on every run; ten
        // attempts at a 50% rate always land within the budget.
        let flaky = FlakyIdentityStorage::new(inner.clone(), 0.5, 3);

        let pid = Pid::new("node-a:1", "grain");
        let result = persist_activation(
            &flaky,
            "m-1",
            &lock,
            &pid,
            10,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(inner.activation_count(), 1);
    }

    #[tokio::test]
    async fn test_persist_does_not_retry_lock_lost() {
        let storage = InMemoryIdentityStorage::default();
        let identity = ClusterIdentity::new("counter", "c-1");
        let stale = SpawnLock {
            lock_id: "lock-never-issued".to_string(),
            identity,
        };
        let pid = Pid::new("node-a:1", "grain");

        let started = std::time::Instant::now();
        let result =
            persist_activation(&storage, "m-1", &stale, &pid, 3, Duration::from_millis(200))
                .await;
        assert!(matches!(result, Err(StorageError::LockLost { .. })));
        // No backoff sleeps happened.
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
