//! Identity resolution against storage and the live topology.
//!
//! One [`IdentityStorageLookup`] per node owns the resolution pipeline the
//! worker actor runs off-mailbox: consult storage, validate the recorded
//! owner against the member list, clean up after dead members, and drive
//! remote activation under a spawn lock. The stale-member dedup set belongs
//! to this instance, so each departed member is cleaned up at most once per
//! node lifetime.

use std::sync::Arc;

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;

use super::config::ClusterConfig;
use super::identity::{ClusterIdentity, Member, SpawnLock};
use super::member_list::MemberList;
use super::messages::{ActivationRequest, ActivationResponse};
use super::pid_cache::PidCache;
use super::placement::PLACEMENT_ACTIVATOR;
use super::storage::IdentityStorage;
use super::ClusterEvent;
use crate::actor::ActorSystem;
use crate::event_stream::EventStream;
use crate::future::{FutureProcess, SharedFutureProcess};
use crate::pid::Pid;
use crate::process::MessageEnvelope;

/// Storage-backed identity resolver.
#[derive(Debug)]
pub struct IdentityStorageLookup {
    system: Arc<ActorSystem>,
    storage: Arc<dyn IdentityStorage>,
    member_list: Arc<MemberList>,
    pid_cache: Arc<PidCache>,
    futures: Arc<SharedFutureProcess>,
    events: Arc<EventStream<ClusterEvent>>,
    config: ClusterConfig,
    shutdown: CancellationToken,
    cleaned_members: DashSet<String>,
}

impl IdentityStorageLookup {
    /// Wire a lookup to its node-local collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        system: Arc<ActorSystem>,
        storage: Arc<dyn IdentityStorage>,
        member_list: Arc<MemberList>,
        pid_cache: Arc<PidCache>,
        futures: Arc<SharedFutureProcess>,
        events: Arc<EventStream<ClusterEvent>>,
        config: ClusterConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            system,
            storage,
            member_list,
            pid_cache,
            futures,
            events,
            config,
            shutdown,
            cleaned_members: DashSet::new(),
        }
    }

    /// The node-local placement cache.
    pub fn pid_cache(&self) -> &Arc<PidCache> {
        &self.pid_cache
    }

    /// Resolve `identity` to a live placement, activating it somewhere in
    /// the cluster if needed. `None` means "not resolvable right now"; the
    /// caller retries later.
    pub async fn resolve(&self, identity: &ClusterIdentity) -> Option<Pid> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            resolved = self.resolve_inner(identity) => resolved,
        }
    }

    async fn resolve_inner(&self, identity: &ClusterIdentity) -> Option<Pid> {
        match self.storage.try_get_existing_activation(identity).await {
            Ok(Some(activation)) => {
                if self.member_list.contains_member_id(&activation.member_id) {
                    self.pid_cache.set(identity.clone(), activation.pid.clone());
                    return Some(activation.pid);
                }
                // Recorded owner is gone; its records are garbage.
                self.cleanup_stale_member(&activation.member_id).await;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(identity = %identity, %error, "activation lookup failed");
                return None;
            }
        }

        let activator = match self.member_list.get_activator(&identity.kind, None) {
            Some(member) => member,
            None => {
                tracing::debug!(identity = %identity, "no member hosts this kind");
                return None;
            }
        };

        match self.storage.try_acquire_lock(identity).await {
            Err(error) => {
                tracing::warn!(identity = %identity, %error, "lock acquisition failed");
                None
            }
            Ok(None) => {
                // Someone else is activating; wait for their record.
                match self
                    .storage
                    .wait_for_activation(identity, self.config.activation_wait_timeout)
                    .await
                {
                    Ok(Some(activation)) => {
                        self.pid_cache.set(identity.clone(), activation.pid.clone());
                        Some(activation.pid)
                    }
                    Ok(None) => {
                        tracing::debug!(identity = %identity, "gave up waiting for activation");
                        None
                    }
                    Err(error) => {
                        tracing::warn!(identity = %identity, %error, "activation wait failed");
                        None
                    }
                }
            }
            Ok(Some(lock)) => {
                let mut pid = self.request_activation(&activator, &lock).await;
                if pid.is_none() {
                    // The lock is still ours; one other member gets a chance
                    // before it is given up.
                    let failed = activator.address();
                    if let Some(fallback) = self
                        .member_list
                        .get_activator(&identity.kind, Some(failed.as_str()))
                    {
                        pid = self.request_activation(&fallback, &lock).await;
                    }
                }
                match pid {
                    Some(pid) => {
                        self.pid_cache.set(identity.clone(), pid.clone());
                        Some(pid)
                    }
                    None => {
                        if let Err(error) = self.storage.remove_lock(lock).await {
                            tracing::debug!(identity = %identity, %error, "lock release failed");
                        }
                        None
                    }
                }
            }
        }
    }

    async fn cleanup_stale_member(&self, member_id: &str) {
        // The dedup set keeps one cleanup in flight per member. A failed
        // attempt is forgotten so a later resolution can retry; otherwise
        // the dead member's records would block its identities forever.
        if !self.cleaned_members.insert(member_id.to_string()) {
            return;
        }
        tracing::info!(member_id, "cleaning up records of a departed member");
        self.events.publish(ClusterEvent::StaleMemberDetected {
            member_id: member_id.to_string(),
        });
        if let Err(error) = self.storage.remove_member(member_id).await {
            tracing::warn!(member_id, %error, "stale member cleanup failed");
            self.cleaned_members.remove(member_id);
        }
    }

    /// Ask `activator` to host the identity under our lock. Prefers a slot
    /// from the shared reply pool; falls back to a one-shot future when the
    /// pool is exhausted.
    async fn request_activation(&self, activator: &Member, lock: &SpawnLock) -> Option<Pid> {
        let request = ActivationRequest {
            identity: lock.identity.clone(),
            lock_id: lock.lock_id.clone(),
        };
        let target = Pid::new(activator.address(), PLACEMENT_ACTIVATOR);

        let envelope = match self.futures.try_create_handle() {
            Some(handle) => {
                self.system.send(
                    &target,
                    MessageEnvelope::with_sender(request, handle.pid().clone()),
                );
                handle.result(self.config.request_timeout).await
            }
            None => {
                let (reply_to, handle) = FutureProcess::spawn(&self.system);
                self.system
                    .send(&target, MessageEnvelope::with_sender(request, reply_to));
                handle.result(self.config.request_timeout).await
            }
        };

        match envelope {
            Ok(envelope) => envelope
                .message
                .downcast_ref::<ActivationResponse>()
                .and_then(|response| response.pid.clone()),
            Err(error) => {
                tracing::debug!(
                    identity = %lock.identity,
                    activator = %target.address,
                    %error,
                    "activation request failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::actor::{Actor, ActorSystem, Context, Props};
    use crate::cluster::placement::PlacementActor;
    use crate::cluster::storage::InMemoryIdentityStorage;
    use crate::error::ActorError;

    struct Grain;

    #[async_trait]
    impl Actor for Grain {
        async fn receive(
            &mut self,
            _ctx: &Context,
            _envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolution_falls_back_to_another_activator() {
        let system = ActorSystem::new("127.0.0.1:4400");
        let storage: Arc<dyn IdentityStorage> = Arc::new(InMemoryIdentityStorage::default());
        let events = Arc::new(EventStream::new());
        let pid_cache = Arc::new(PidCache::new());
        let member_list = Arc::new(MemberList::new(Arc::clone(&events), Arc::clone(&pid_cache)));
        // Sorted by id, so round-robin picks the dead member first.
        member_list.update(vec![
            Member::new("a-dead", "127.0.0.1", 9999, vec!["counter".to_string()]),
            Member::new("b-live", "127.0.0.1", 4400, vec!["counter".to_string()]),
        ]);

        let config = ClusterConfig::default()
            .with_request_timeout(Duration::from_millis(150))
            .with_activation_wait_timeout(Duration::from_millis(50));
        let futures =
            SharedFutureProcess::register(&system, "$cluster-futures", 8).expect("pool");

        let kinds: Arc<HashMap<String, Props>> =
            Arc::new(HashMap::from([("counter".to_string(), Props::new(|| Grain))]));
        {
            let storage = Arc::clone(&storage);
            let cache = Arc::clone(&pid_cache);
            let config = config.clone();
            system
                .spawn_named(
                    Props::new(move || {
                        PlacementActor::new(
                            Arc::clone(&kinds),
                            Arc::clone(&storage),
                            Arc::clone(&cache),
                            "b-live".to_string(),
                            config.clone(),
                        )
                    }),
                    PLACEMENT_ACTIVATOR,
                )
                .expect("spawn activator");
        }

        let lookup = IdentityStorageLookup::new(
            Arc::clone(&system),
            storage,
            member_list,
            pid_cache,
            futures,
            events,
            config,
            CancellationToken::new(),
        );

        // The first activation request goes to the unreachable member and
        // times out; the retry excludes it and lands on the live one.
        let pid = lookup
            .resolve(&ClusterIdentity::new("counter", "c-1"))
            .await
            .expect("fallback resolution");
        assert_eq!(pid.address, "127.0.0.1:4400");
    }
}
