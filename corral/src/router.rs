//! Message routers: one pid fronting a set of routees.
//!
//! A router registers a [`Process`] whose user-message path forks: router
//! management messages ([`RouterAddRoutee`], [`RouterRemoveRoutee`],
//! [`RouterBroadcast`], [`RouterGetRoutees`]) are forwarded to a small
//! management actor so they serialize with each other, while every other
//! message is routed synchronously on the sender's thread without touching
//! an actor loop.
//!
//! Routees are watched; a routee that stops is removed from the set.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rand::Rng;

use crate::actor::{Actor, ActorSystem, Context, Props, Terminated};
use crate::error::{ActorError, SpawnError};
use crate::hash_ring::HashRing;
use crate::mailbox::SystemMessage;
use crate::pid::Pid;
use crate::process::{AnyMessage, MessageEnvelope, Process};

/// Key extractor for consistent-hash routing.
pub type HashKeyFn = Arc<dyn Fn(&AnyMessage) -> Option<String> + Send + Sync>;

/// Routing strategy.
#[derive(Clone)]
pub enum RouterKind {
    /// Every routee receives every message.
    Broadcast,
    /// Routees take turns.
    RoundRobin,
    /// A uniformly random routee per message.
    Random,
    /// Messages with equal keys always reach the same routee.
    ConsistentHash {
        /// Virtual ring entries per routee.
        replicas: usize,
        /// Extracts the routing key from a message; `None` drops it.
        key_of: HashKeyFn,
    },
}

impl fmt::Debug for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterKind::Broadcast => f.write_str("Broadcast"),
            RouterKind::RoundRobin => f.write_str("RoundRobin"),
            RouterKind::Random => f.write_str("Random"),
            RouterKind::ConsistentHash { replicas, .. } => f
                .debug_struct("ConsistentHash")
                .field("replicas", replicas)
                .finish(),
        }
    }
}

/// Add a routee to the set. Idempotent.
#[derive(Debug, Clone)]
pub struct RouterAddRoutee(
    /// The routee to add.
    pub Pid,
);

/// Remove a routee from the set. Idempotent.
#[derive(Debug, Clone)]
pub struct RouterRemoveRoutee(
    /// The routee to remove.
    pub Pid,
);

/// Deliver one payload to every current routee.
#[derive(Clone)]
pub struct RouterBroadcast(
    /// The payload to fan out.
    pub AnyMessage,
);

impl fmt::Debug for RouterBroadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RouterBroadcast(..)")
    }
}

/// Ask the router for its current routees; it responds with [`RouterRoutees`].
#[derive(Debug, Clone)]
pub struct RouterGetRoutees;

/// Reply to [`RouterGetRoutees`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouterRoutees(
    /// The current routee set, in insertion order.
    pub Vec<Pid>,
);

struct RouteeSet {
    routees: Vec<Pid>,
    by_key: HashMap<String, Pid>,
}

/// Shared routing state, read on the hot path without the actor loop.
struct RouterState {
    kind: RouterKind,
    set: RwLock<RouteeSet>,
    ring: HashRing,
    next: AtomicUsize,
}

impl RouterState {
    fn new(kind: RouterKind) -> Self {
        let replicas = match &kind {
            RouterKind::ConsistentHash { replicas, .. } => (*replicas).max(1),
            _ => 1,
        };
        Self {
            kind,
            set: RwLock::new(RouteeSet {
                routees: Vec::new(),
                by_key: HashMap::new(),
            }),
            ring: HashRing::new(replicas),
            next: AtomicUsize::new(0),
        }
    }

    fn add(&self, pid: Pid) -> bool {
        let Ok(mut set) = self.set.write() else {
            return false;
        };
        if set.routees.contains(&pid) {
            return false;
        }
        let key = pid.to_string();
        self.ring.add_node(&key);
        set.by_key.insert(key, pid.clone());
        set.routees.push(pid);
        true
    }

    fn remove(&self, pid: &Pid) -> bool {
        let Ok(mut set) = self.set.write() else {
            return false;
        };
        let Some(position) = set.routees.iter().position(|p| p == pid) else {
            return false;
        };
        set.routees.remove(position);
        let key = pid.to_string();
        self.ring.remove_node(&key);
        set.by_key.remove(&key);
        true
    }

    fn routees(&self) -> Vec<Pid> {
        self.set
            .read()
            .map(|set| set.routees.clone())
            .unwrap_or_default()
    }

    fn route(&self, system: &ActorSystem, envelope: MessageEnvelope) {
        match &self.kind {
            RouterKind::Broadcast => {
                for routee in self.routees() {
                    system.send(&routee, envelope.clone());
                }
            }
            RouterKind::RoundRobin => {
                let routees = self.routees();
                if routees.is_empty() {
                    tracing::warn!("round-robin router has no routees");
                    return;
                }
                let index = self.next.fetch_add(1, Ordering::Relaxed) % routees.len();
                system.send(&routees[index], envelope);
            }
            RouterKind::Random => {
                let routees = self.routees();
                if routees.is_empty() {
                    tracing::warn!("random router has no routees");
                    return;
                }
                let index = rand::thread_rng().gen_range(0..routees.len());
                system.send(&routees[index], envelope);
            }
            RouterKind::ConsistentHash { key_of, .. } => {
                let Some(key) = key_of(&envelope.message) else {
                    tracing::warn!(
                        message_type = envelope.type_name,
                        "message has no hash key; dropped"
                    );
                    return;
                };
                let target = self.ring.get_node(&key).and_then(|node| {
                    self.set
                        .read()
                        .ok()
                        .and_then(|set| set.by_key.get(&node).cloned())
                });
                match target {
                    Some(routee) => system.send(&routee, envelope),
                    None => tracing::warn!(key, "consistent-hash router has no routees"),
                }
            }
        }
    }
}

/// Management actor serializing routee-set changes and watch bookkeeping.
struct RouterManager {
    state: Arc<RouterState>,
}

#[async_trait]
impl Actor for RouterManager {
    async fn receive(
        &mut self,
        ctx: &Context,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(RouterAddRoutee(pid)) = envelope.message.downcast_ref::<RouterAddRoutee>() {
            if self.state.add(pid.clone()) {
                ctx.watch(pid);
            }
        } else if let Some(RouterRemoveRoutee(pid)) =
            envelope.message.downcast_ref::<RouterRemoveRoutee>()
        {
            if self.state.remove(pid) {
                ctx.unwatch(pid);
            }
        } else if let Some(RouterBroadcast(payload)) =
            envelope.message.downcast_ref::<RouterBroadcast>()
        {
            for routee in self.state.routees() {
                ctx.system().send(
                    &routee,
                    MessageEnvelope::from_any(Arc::clone(payload), None, "RouterBroadcast"),
                );
            }
        } else if envelope.message.downcast_ref::<RouterGetRoutees>().is_some() {
            ctx.respond(RouterRoutees(self.state.routees()));
        } else if let Some(Terminated { who }) = envelope.message.downcast_ref::<Terminated>() {
            if self.state.remove(who) {
                tracing::debug!(routee = %who, "terminated routee removed from router");
            }
        } else {
            return Err(ActorError::UnexpectedMessage(envelope.type_name));
        }
        Ok(())
    }
}

/// The registered router process: forks management from routed traffic.
struct RouterProcess {
    system: Arc<ActorSystem>,
    state: Arc<RouterState>,
    manager: Pid,
}

impl fmt::Debug for RouterProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterProcess")
            .field("kind", &self.state.kind)
            .field("manager", &self.manager)
            .finish()
    }
}

impl RouterProcess {
    fn is_management(envelope: &MessageEnvelope) -> bool {
        let m = &envelope.message;
        m.downcast_ref::<RouterAddRoutee>().is_some()
            || m.downcast_ref::<RouterRemoveRoutee>().is_some()
            || m.downcast_ref::<RouterBroadcast>().is_some()
            || m.downcast_ref::<RouterGetRoutees>().is_some()
    }
}

impl Process for RouterProcess {
    fn send_user_message(&self, _target: &Pid, envelope: MessageEnvelope) {
        if Self::is_management(&envelope) {
            self.system.send(&self.manager, envelope);
        } else {
            self.state.route(&self.system, envelope);
        }
    }

    fn send_system_message(&self, _target: &Pid, message: SystemMessage) {
        self.system.send_system(&self.manager, message);
    }
}

/// Spawn a router under `name` with an initial routee set.
pub fn spawn_router(
    system: &Arc<ActorSystem>,
    name: &str,
    kind: RouterKind,
    routees: Vec<Pid>,
) -> Result<Pid, SpawnError> {
    let state = Arc::new(RouterState::new(kind));
    let manager_state = Arc::clone(&state);
    let manager = system.spawn_named(
        Props::new(move || RouterManager {
            state: Arc::clone(&manager_state),
        }),
        &format!("{name}-manager"),
    )?;
    let pid = system.register_process(
        name,
        Arc::new(RouterProcess {
            system: Arc::clone(system),
            state,
            manager,
        }),
    )?;
    for routee in routees {
        system.send(&pid, MessageEnvelope::new(RouterAddRoutee(routee)));
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone)]
    struct Tagged {
        key: String,
        value: u32,
    }

    struct CollectingActor {
        tag: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, u32)>>>,
    }

    #[async_trait]
    impl Actor for CollectingActor {
        async fn receive(
            &mut self,
            _ctx: &Context,
            envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            if let Some(tagged) = envelope.message.downcast_ref::<Tagged>() {
                self.seen.lock().unwrap().push((self.tag, tagged.value));
            }
            Ok(())
        }
    }

    fn collectors(
        system: &Arc<ActorSystem>,
        tags: &[&'static str],
    ) -> (Vec<Pid>, Arc<Mutex<Vec<(&'static str, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pids = tags
            .iter()
            .map(|tag| {
                let tag = *tag;
                let seen = seen.clone();
                system
                    .spawn_named(
                        Props::new(move || CollectingActor {
                            tag,
                            seen: seen.clone(),
                        }),
                        tag,
                    )
                    .expect("spawn collector")
            })
            .collect();
        (pids, seen)
    }

    fn tagged(value: u32) -> MessageEnvelope {
        MessageEnvelope::new(Tagged {
            key: format!("key-{value}"),
            value,
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_routee() {
        let system = ActorSystem::new("node-a:1");
        let (pids, seen) = collectors(&system, &["r1", "r2", "r3"]);
        let router = spawn_router(&system, "router", RouterKind::Broadcast, pids)
            .expect("spawn router");
        settle().await;

        system.send(&router, tagged(7));
        settle().await;

        let mut log = seen.lock().unwrap().clone();
        log.sort();
        assert_eq!(log, vec![("r1", 7), ("r2", 7), ("r3", 7)]);
    }

    #[tokio::test]
    async fn test_round_robin_takes_turns() {
        let system = ActorSystem::new("node-a:1");
        let (pids, seen) = collectors(&system, &["r1", "r2"]);
        let router = spawn_router(&system, "router", RouterKind::RoundRobin, pids)
            .expect("spawn router");
        settle().await;

        for i in 0..6 {
            system.send(&router, tagged(i));
        }
        settle().await;

        let log = seen.lock().unwrap().clone();
        assert_eq!(log.len(), 6);
        let r1 = log.iter().filter(|(tag, _)| *tag == "r1").count();
        let r2 = log.iter().filter(|(tag, _)| *tag == "r2").count();
        assert_eq!(r1, 3);
        assert_eq!(r2, 3);
    }

    #[tokio::test]
    async fn test_random_router_uses_only_routees() {
        let system = ActorSystem::new("node-a:1");
        let (pids, seen) = collectors(&system, &["r1", "r2", "r3"]);
        let router = spawn_router(&system, "router", RouterKind::Random, pids)
            .expect("spawn router");
        settle().await;

        for i in 0..30 {
            system.send(&router, tagged(i));
        }
        settle().await;
        assert_eq!(seen.lock().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_consistent_hash_is_sticky_per_key() {
        let system = ActorSystem::new("node-a:1");
        let (pids, seen) = collectors(&system, &["r1", "r2", "r3"]);
        let kind = RouterKind::ConsistentHash {
            replicas: 100,
            key_of: Arc::new(|message| {
                message.downcast_ref::<Tagged>().map(|t| t.key.clone())
            }),
        };
        let router = spawn_router(&system, "router", kind, pids).expect("spawn router");
        settle().await;

        // The same key sent repeatedly always lands on one routee.
        for _ in 0..5 {
            system.send(
                &router,
                MessageEnvelope::new(Tagged {
                    key: "sticky".to_string(),
                    value: 1,
                }),
            );
        }
        settle().await;

        let log = seen.lock().unwrap().clone();
        assert_eq!(log.len(), 5);
        let first = log[0].0;
        assert!(log.iter().all(|(tag, _)| *tag == first));
    }

    #[tokio::test]
    async fn test_get_routees_and_idempotent_add_remove() {
        let system = ActorSystem::new("node-a:1");
        let (pids, _seen) = collectors(&system, &["r1", "r2"]);
        let router = spawn_router(&system, "router", RouterKind::RoundRobin, pids.clone())
            .expect("spawn router");
        settle().await;

        // Duplicate add is a no-op.
        system.send(
            &router,
            MessageEnvelope::new(RouterAddRoutee(pids[0].clone())),
        );
        settle().await;

        let routees: RouterRoutees = system
            .request(&router, RouterGetRoutees, Duration::from_secs(1))
            .await
            .expect("get routees");
        assert_eq!(routees.0.len(), 2);

        system.send(
            &router,
            MessageEnvelope::new(RouterRemoveRoutee(pids[0].clone())),
        );
        system.send(
            &router,
            MessageEnvelope::new(RouterRemoveRoutee(pids[0].clone())),
        );
        settle().await;

        let routees: RouterRoutees = system
            .request(&router, RouterGetRoutees, Duration::from_secs(1))
            .await
            .expect("get routees");
        assert_eq!(routees.0, vec![pids[1].clone()]);
    }

    #[tokio::test]
    async fn test_terminated_routee_is_removed() {
        let system = ActorSystem::new("node-a:1");
        let (pids, _seen) = collectors(&system, &["r1", "r2"]);
        let router = spawn_router(&system, "router", RouterKind::RoundRobin, pids.clone())
            .expect("spawn router");
        settle().await;

        system.stop(&pids[0]);
        settle().await;

        let routees: RouterRoutees = system
            .request(&router, RouterGetRoutees, Duration::from_secs(1))
            .await
            .expect("get routees");
        assert_eq!(routees.0, vec![pids[1].clone()]);
    }
}
