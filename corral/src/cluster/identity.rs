//! Cluster identities, members, and topology snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash_ring::murmur2;
use crate::pid::Pid;

/// Cluster-wide name of a virtual actor: `(kind, identity)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    /// The actor kind, mapped to spawn props by each hosting member.
    pub kind: String,
    /// The logical identity within the kind.
    pub identity: String,
}

impl ClusterIdentity {
    /// Create a cluster identity.
    pub fn new(kind: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identity)
    }
}

/// One cluster member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Stable unique member id, distinct from the address so a member
    /// restarting on the same address is a different member.
    pub id: String,
    /// Host name or IP.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Actor kinds this member can host.
    pub kinds: Vec<String>,
}

impl Member {
    /// Create a member.
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        kinds: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            kinds,
        }
    }

    /// The member's node address, `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when this member can host `kind`.
    pub fn hosts_kind(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }
}

/// A topology snapshot with the deltas that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterTopology {
    /// Deterministic hash of the member set; equal sets hash equally on
    /// every node regardless of update order.
    pub topology_hash: u64,
    /// All current members.
    pub members: Vec<Member>,
    /// Members present now but not before.
    pub joined: Vec<Member>,
    /// Members present before but not now.
    pub left: Vec<Member>,
}

/// Hash of a member set, stable across nodes and update order.
pub fn topology_hash(members: &[Member]) -> u64 {
    let mut ids: Vec<&str> = members.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    let joined = ids.join(",");
    murmur2(joined.as_bytes()) as u64
}

/// The lease one node holds while it activates an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnLock {
    /// Unique id of this lease.
    pub lock_id: String,
    /// The identity being activated.
    pub identity: ClusterIdentity,
}

/// A durably recorded activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredActivation {
    /// Where the activation lives.
    pub pid: Pid,
    /// Which member recorded it.
    pub member_id: String,
}
