//! Live member set and activator selection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::identity::{topology_hash, ClusterTopology, Member};
use super::pid_cache::PidCache;
use super::ClusterEvent;
use crate::event_stream::EventStream;

/// This node's view of the cluster membership.
///
/// Topology updates compute joined/left deltas, invalidate PID-cache
/// entries for departed members, and publish [`ClusterEvent::TopologyChanged`].
#[derive(Debug)]
pub struct MemberList {
    members: RwLock<Vec<Member>>,
    round_robin: AtomicUsize,
    events: Arc<EventStream<ClusterEvent>>,
    pid_cache: Arc<PidCache>,
}

impl MemberList {
    /// Empty member list wired to the cluster event stream and PID cache.
    pub fn new(events: Arc<EventStream<ClusterEvent>>, pid_cache: Arc<PidCache>) -> Self {
        Self {
            members: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            events,
            pid_cache,
        }
    }

    /// Replace the member set with a fresh topology snapshot.
    pub fn update(&self, mut members: Vec<Member>) {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        let (joined, left) = {
            let Ok(mut current) = self.members.write() else {
                return;
            };
            let old_ids: HashSet<&str> = current.iter().map(|m| m.id.as_str()).collect();
            let new_ids: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
            let joined: Vec<Member> = members
                .iter()
                .filter(|m| !old_ids.contains(m.id.as_str()))
                .cloned()
                .collect();
            let left: Vec<Member> = current
                .iter()
                .filter(|m| !new_ids.contains(m.id.as_str()))
                .cloned()
                .collect();
            *current = members.clone();
            (joined, left)
        };

        if joined.is_empty() && left.is_empty() {
            return;
        }

        for member in &left {
            self.pid_cache.remove_by_address(&member.address());
        }

        let topology = ClusterTopology {
            topology_hash: topology_hash(&members),
            members,
            joined,
            left,
        };
        tracing::info!(
            hash = topology.topology_hash,
            members = topology.members.len(),
            joined = topology.joined.len(),
            left = topology.left.len(),
            "cluster topology changed"
        );
        self.events.publish(ClusterEvent::TopologyChanged(topology));
    }

    /// All current members.
    pub fn members(&self) -> Vec<Member> {
        self.members.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// True when a member with `id` is in the current topology.
    pub fn contains_member_id(&self, id: &str) -> bool {
        self.members
            .read()
            .map(|members| members.iter().any(|m| m.id == id))
            .unwrap_or(false)
    }

    /// Hash of the current topology.
    pub fn current_hash(&self) -> u64 {
        self.members
            .read()
            .map(|members| topology_hash(&members))
            .unwrap_or(0)
    }

    /// Pick a member that can host `kind`, round-robin across candidates,
    /// optionally excluding one address.
    pub fn get_activator(&self, kind: &str, exclude_address: Option<&str>) -> Option<Member> {
        let candidates: Vec<Member> = self
            .members
            .read()
            .ok()?
            .iter()
            .filter(|m| m.hosts_kind(kind))
            .filter(|m| exclude_address != Some(m.address().as_str()))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }
}
