//! Cluster layer: virtual actor identity, placement, and membership.
//!
//! A [`Cluster`] wires one node's actor system to the shared identity
//! storage and the member list, registers the two well-known cluster actors
//! (the identity resolution worker and the placement activator), and speaks
//! the wire protocol through a transport. Tests run several clusters in one
//! process over the [`LoopbackNetwork`], which JSON round-trips every
//! protocol message so the wire encoding stays honest.

pub mod config;
pub mod flaky;
pub mod handover;
pub mod identity;
pub mod lookup;
pub mod member_list;
pub mod messages;
pub mod pid_cache;
pub mod placement;
pub mod storage;
pub mod worker;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::actor::{ActorSystem, Props};
use crate::error::{ClusterError, RequestError};
use crate::event_stream::EventStream;
use crate::future::{FutureProcess, SharedFutureProcess};
use crate::pid::Pid;
use crate::process::{MessageEnvelope, RemoteTransport};

use config::ClusterConfig;
use handover::HandoverSink;
use identity::{ClusterIdentity, ClusterTopology, Member};
use lookup::IdentityStorageLookup;
use member_list::MemberList;
use messages::WireMessage;
use pid_cache::PidCache;
use placement::{PlacementActor, PLACEMENT_ACTIVATOR};
use storage::IdentityStorage;
use worker::{GetPid, IdentityWorker, PidResult, IDENTITY_WORKER};

/// Cluster-level events published on each node's cluster event stream.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// The member set changed.
    TopologyChanged(ClusterTopology),
    /// An activation record pointed at a member that is no longer alive.
    StaleMemberDetected {
        /// The departed member's id.
        member_id: String,
    },
}

/// A hostable actor kind: its cluster-wide name and spawn recipe.
#[derive(Debug, Clone)]
pub struct ClusterKind {
    /// Kind name, matched against [`ClusterIdentity::kind`].
    pub name: String,
    /// Props used to spawn one activation.
    pub props: Props,
}

impl ClusterKind {
    /// Define a kind.
    pub fn new(name: impl Into<String>, props: Props) -> Self {
        Self {
            name: name.into(),
            props,
        }
    }
}

/// In-process network: node address to actor system.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    nodes: DashMap<String, Arc<ActorSystem>>,
}

impl LoopbackNetwork {
    /// Empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a node reachable.
    pub fn register(&self, system: Arc<ActorSystem>) {
        self.nodes.insert(system.address().to_string(), system);
    }

    /// Make a node unreachable; messages to it are dropped from then on.
    pub fn unregister(&self, address: &str) {
        self.nodes.remove(address);
    }

    fn get(&self, address: &str) -> Option<Arc<ActorSystem>> {
        self.nodes.get(address).map(|n| n.value().clone())
    }
}

/// Transport delivering cross-node messages inside one process.
struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("nodes", &self.network.nodes.len())
            .finish()
    }
}

impl RemoteTransport for LoopbackTransport {
    fn deliver(&self, target: &Pid, envelope: MessageEnvelope) {
        let Some(system) = self.network.get(&target.address) else {
            tracing::debug!(target = %target, "node unreachable; message dropped");
            return;
        };
        match WireMessage::from_payload(&envelope.message) {
            Some(wire) => {
                // Round-trip through JSON so the wire encoding is exercised
                // even without a real network.
                let decoded = serde_json::to_string(&wire)
                    .and_then(|json| serde_json::from_str::<WireMessage>(&json));
                match decoded {
                    Ok(message) => system.send(target, message.into_envelope(envelope.sender)),
                    Err(error) => {
                        tracing::warn!(target = %target, %error, "wire encoding failed");
                    }
                }
            }
            None => {
                // Payloads outside the protocol set cross by reference.
                system.send(target, envelope);
            }
        }
    }
}

/// One cluster member: actor system plus identity machinery.
pub struct Cluster {
    system: Arc<ActorSystem>,
    member: Member,
    config: ClusterConfig,
    storage: Arc<dyn IdentityStorage>,
    member_list: Arc<MemberList>,
    pid_cache: Arc<PidCache>,
    events: Arc<EventStream<ClusterEvent>>,
    futures: Arc<SharedFutureProcess>,
    worker: Pid,
    network: Arc<LoopbackNetwork>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("member", &self.member)
            .finish()
    }
}

impl Cluster {
    /// Start a cluster node: init storage, register the well-known actors,
    /// and join the loopback network.
    pub async fn start(
        network: &Arc<LoopbackNetwork>,
        member: Member,
        kinds: Vec<ClusterKind>,
        storage: Arc<dyn IdentityStorage>,
        config: ClusterConfig,
    ) -> Result<Arc<Self>, ClusterError> {
        storage.init().await?;

        let system = ActorSystem::new(member.address());
        let events: Arc<EventStream<ClusterEvent>> = Arc::new(EventStream::new());
        events.attach_publisher(Arc::clone(system.dispatcher()));
        let pid_cache = Arc::new(PidCache::new());
        let member_list = Arc::new(MemberList::new(Arc::clone(&events), Arc::clone(&pid_cache)));
        let futures = SharedFutureProcess::register(
            &system,
            "$cluster-futures",
            config.shared_future_pool_size,
        )?;

        let kind_map: Arc<HashMap<String, Props>> = Arc::new(
            kinds
                .into_iter()
                .map(|kind| (kind.name, kind.props))
                .collect(),
        );
        {
            let kinds = Arc::clone(&kind_map);
            let storage = Arc::clone(&storage);
            let pid_cache = Arc::clone(&pid_cache);
            let member_id = member.id.clone();
            let config = config.clone();
            system.spawn_named(
                Props::new(move || {
                    PlacementActor::new(
                        Arc::clone(&kinds),
                        Arc::clone(&storage),
                        Arc::clone(&pid_cache),
                        member_id.clone(),
                        config.clone(),
                    )
                }),
                PLACEMENT_ACTIVATOR,
            )?;
        }

        let shutdown = CancellationToken::new();
        let lookup = Arc::new(IdentityStorageLookup::new(
            Arc::clone(&system),
            Arc::clone(&storage),
            Arc::clone(&member_list),
            Arc::clone(&pid_cache),
            Arc::clone(&futures),
            Arc::clone(&events),
            config.clone(),
            shutdown.clone(),
        ));
        let worker = {
            let lookup = Arc::clone(&lookup);
            system.spawn_named(
                Props::new(move || IdentityWorker::new(Arc::clone(&lookup))),
                IDENTITY_WORKER,
            )?
        };

        system.set_transport(Arc::new(LoopbackTransport {
            network: Arc::clone(network),
        }));
        network.register(Arc::clone(&system));
        tracing::info!(member = %member.address(), id = %member.id, "cluster node started");

        Ok(Arc::new(Self {
            system,
            member,
            config,
            storage,
            member_list,
            pid_cache,
            events,
            futures,
            worker,
            network: Arc::clone(network),
            shutdown,
        }))
    }

    /// This node's actor system.
    pub fn system(&self) -> &Arc<ActorSystem> {
        &self.system
    }

    /// This node's member record.
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// This node's cluster event stream.
    pub fn events(&self) -> &Arc<EventStream<ClusterEvent>> {
        &self.events
    }

    /// This node's view of the membership.
    pub fn member_list(&self) -> &Arc<MemberList> {
        &self.member_list
    }

    /// This node's placement cache.
    pub fn pid_cache(&self) -> &Arc<PidCache> {
        &self.pid_cache
    }

    /// Sink for one identity handover round against the current topology.
    ///
    /// Reconciliation is caller-driven: the caller feeds in the
    /// [`messages::IdentityHandover`] chunks it receives from members and
    /// bounds the round, starting a fresh sink to retry an incomplete one.
    pub fn handover_sink(&self) -> HandoverSink {
        let members = self.member_list.members();
        HandoverSink::new(
            self.member_list.current_hash(),
            members.iter().map(|m| m.address()),
        )
    }

    /// Token cancelled when this node shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Apply a new topology snapshot.
    pub fn update_topology(&self, members: Vec<Member>) {
        self.member_list.update(members);
    }

    /// Resolve an identity to its cluster-wide placement, activating it if
    /// necessary. `None` means "not resolvable right now".
    pub async fn get_pid(&self, identity: &ClusterIdentity) -> Option<Pid> {
        let request = GetPid {
            identity: identity.clone(),
        };
        match self
            .system
            .request::<PidResult>(&self.worker, request, self.config.request_timeout)
            .await
        {
            Ok(result) => result.pid,
            Err(error) => {
                tracing::debug!(identity = %identity, %error, "get_pid failed");
                None
            }
        }
    }

    /// Request-response against a virtual actor: resolve, send, await the
    /// typed reply. Resolution is retried until `timeout`.
    pub async fn request<T>(
        &self,
        identity: &ClusterIdentity,
        message: impl Any + Send + Sync,
        timeout: Duration,
    ) -> Result<T, RequestError>
    where
        T: Any + Send + Sync + Clone,
    {
        let deadline = Instant::now() + timeout;
        let pid = loop {
            if let Some(pid) = self.get_pid(identity).await {
                break pid;
            }
            if Instant::now() >= deadline {
                return Err(RequestError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let envelope = match self.futures.try_create_handle() {
            Some(handle) => {
                self.system
                    .send(&pid, MessageEnvelope::with_sender(message, handle.pid().clone()));
                handle.result(remaining).await?
            }
            None => {
                let (reply_to, handle) = FutureProcess::spawn(&self.system);
                self.system
                    .send(&pid, MessageEnvelope::with_sender(message, reply_to));
                handle.result(remaining).await?
            }
        };
        envelope
            .message
            .downcast_ref::<T>()
            .cloned()
            .ok_or(RequestError::UnexpectedReply)
    }

    /// Leave the network gracefully and release storage.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        self.shutdown.cancel();
        self.network.unregister(self.system.address());
        self.system.stop(&self.worker);
        self.system
            .stop(&Pid::new(self.system.address().to_string(), PLACEMENT_ACTIVATOR));
        self.storage.dispose().await?;
        tracing::info!(member = %self.member.address(), "cluster node shut down");
        Ok(())
    }

    /// Simulated crash: vanish from the network without any cleanup, leaving
    /// stale records behind for the survivors to discover.
    pub fn kill(&self) {
        self.shutdown.cancel();
        self.network.unregister(self.system.address());
        tracing::info!(member = %self.member.address(), "cluster node killed");
    }
}
