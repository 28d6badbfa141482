//! Node-local cache of resolved identity placements.

use dashmap::DashMap;

use super::identity::ClusterIdentity;
use crate::pid::Pid;

/// Concurrent `ClusterIdentity -> Pid` cache.
///
/// Entries are hints, not truth: storage stays authoritative, and the cache
/// is invalidated on member loss and actor termination.
#[derive(Debug, Default)]
pub struct PidCache {
    entries: DashMap<ClusterIdentity, Pid>,
}

impl PidCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached placement for `identity`, if any.
    pub fn get(&self, identity: &ClusterIdentity) -> Option<Pid> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    /// Record a placement.
    pub fn set(&self, identity: ClusterIdentity, pid: Pid) {
        self.entries.insert(identity, pid);
    }

    /// Drop one identity's entry.
    pub fn remove(&self, identity: &ClusterIdentity) {
        self.entries.remove(identity);
    }

    /// Drop the entry only if it still points at `pid`; a newer placement
    /// recorded concurrently survives.
    pub fn remove_if_pid(&self, identity: &ClusterIdentity, pid: &Pid) {
        self.entries
            .remove_if(identity, |_, cached| cached == pid);
    }

    /// Drop every entry pointing at a node address. Used when a member
    /// leaves the topology.
    pub fn remove_by_address(&self, address: &str) {
        self.entries.retain(|_, pid| pid.address != address);
    }

    /// Number of cached placements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> ClusterIdentity {
        ClusterIdentity::new("counter", name)
    }

    #[test]
    fn test_set_get_remove() {
        let cache = PidCache::new();
        let pid = Pid::new("node-a:1", "x");
        cache.set(identity("a"), pid.clone());
        assert_eq!(cache.get(&identity("a")), Some(pid));
        cache.remove(&identity("a"));
        assert!(cache.get(&identity("a")).is_none());
    }

    #[test]
    fn test_remove_if_pid_spares_newer_entries() {
        let cache = PidCache::new();
        let old = Pid::new("node-a:1", "x");
        let new = Pid::new("node-b:1", "y");
        cache.set(identity("a"), new.clone());
        cache.remove_if_pid(&identity("a"), &old);
        assert_eq!(cache.get(&identity("a")), Some(new));
    }

    #[test]
    fn test_remove_by_address_clears_only_that_node() {
        let cache = PidCache::new();
        cache.set(identity("a"), Pid::new("node-a:1", "x"));
        cache.set(identity("b"), Pid::new("node-b:1", "y"));
        cache.remove_by_address("node-a:1");
        assert!(cache.get(&identity("a")).is_none());
        assert!(cache.get(&identity("b")).is_some());
        assert_eq!(cache.len(), 1);
    }
}
