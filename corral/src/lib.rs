//! # Corral
//!
//! A cluster actor runtime with virtual actor placement.
//!
//! Corral hosts actors on a shared worker pool behind lock-free mailboxes
//! and gives each one a location-transparent [`Pid`](pid::Pid). On top of
//! that runtime sits a cluster layer in the Orleans style: a virtual actor
//! is named by a [`ClusterIdentity`](cluster::identity::ClusterIdentity)
//! rather than a pid, and the cluster activates it on some member on first
//! use, records the placement in shared identity storage, and heals the
//! record when members die.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      cluster                             │
//! │  identity worker • placement activator • member list     │
//! │  identity storage seam • handover reconciliation         │
//! ├──────────────────────────────────────────────────────────┤
//! │                      runtime                             │
//! │  mailbox • actor system • futures • routers              │
//! │  event stream • hash ring • process registry             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use corral::cluster::{Cluster, ClusterKind, LoopbackNetwork};
//! use corral::cluster::identity::{ClusterIdentity, Member};
//!
//! let network = LoopbackNetwork::new();
//! let node = Cluster::start(
//!     &network,
//!     Member::new("m-1", "127.0.0.1", 4001, vec!["counter".into()]),
//!     vec![ClusterKind::new("counter", counter_props())],
//!     storage,
//!     Default::default(),
//! )
//! .await?;
//!
//! let pid = node
//!     .get_pid(&ClusterIdentity::new("counter", "user-7"))
//!     .await;
//! ```
//!
//! The single consistency rule of the cluster layer: for one identity, at
//! most one activation is ever observable at a time, even under storage
//! faults, member crashes and concurrent resolution.

#![deny(missing_docs)]

pub mod actor;
pub mod cluster;
pub mod error;
pub mod event_stream;
pub mod future;
pub mod hash_ring;
pub mod mailbox;
pub mod pid;
pub mod process;
pub mod router;

pub use actor::{Actor, ActorSystem, Context, Props, SystemEvent, Terminated};
pub use error::{ActorError, ClusterError, RequestError, SpawnError, StorageError};
pub use pid::Pid;
pub use process::{msg, AnyMessage, MessageEnvelope, Process, ProcessRegistry, RemoteTransport};

/// Commonly used items for building on corral.
pub mod prelude {
    pub use crate::actor::{Actor, ActorSystem, Context, Props, SystemEvent, Terminated};
    pub use crate::cluster::config::ClusterConfig;
    pub use crate::cluster::identity::{ClusterIdentity, Member};
    pub use crate::cluster::storage::{IdentityStorage, InMemoryIdentityStorage};
    pub use crate::cluster::{Cluster, ClusterEvent, ClusterKind, LoopbackNetwork};
    pub use crate::error::{ActorError, RequestError};
    pub use crate::pid::Pid;
    pub use crate::process::{msg, AnyMessage, MessageEnvelope};
}
