//! Consistent hash ring for identity and message placement.
//!
//! Every member appears on the ring `replicas` times; a key resolves to the
//! first entry clockwise from its hash, wrapping at the end. The ring array
//! is immutable once built: `add_node`/`remove_node` rebuild a fresh sorted
//! array and swap it in atomically, so readers resolving concurrently never
//! observe a torn ring.
//!
//! The hash is MurmurHash2 with a fixed seed so independently built members
//! make identical routing decisions for the same topology.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

const MURMUR_SEED: u32 = 0xc58f_1a7a;
const MURMUR_M: u32 = 0x5bd1_e995;
const MURMUR_R: u32 = 24;

/// MurmurHash2, bit-for-bit compatible across platforms.
pub fn murmur2(data: &[u8]) -> u32 {
    let mut h = MURMUR_SEED ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);
        h = h.wrapping_mul(MURMUR_M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(MURMUR_M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> 15;
    h
}

struct RingState {
    nodes: BTreeSet<String>,
    ring: Arc<Vec<(u32, String)>>,
}

/// Consistent hash ring over string-named nodes.
pub struct HashRing {
    replicas: usize,
    state: RwLock<RingState>,
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return f.write_str("HashRing(poisoned)"),
        };
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("nodes", &state.nodes.len())
            .finish()
    }
}

impl HashRing {
    /// Empty ring with `replicas` virtual entries per node.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            state: RwLock::new(RingState {
                nodes: BTreeSet::new(),
                ring: Arc::new(Vec::new()),
            }),
        }
    }

    /// Ring pre-populated with `nodes`.
    pub fn with_nodes<I, S>(nodes: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ring = Self::new(replicas);
        if let Ok(mut state) = ring.state.write() {
            state.nodes.extend(nodes.into_iter().map(Into::into));
            state.ring = Arc::new(Self::build(&state.nodes, ring.replicas));
        }
        ring
    }

    fn build(nodes: &BTreeSet<String>, replicas: usize) -> Vec<(u32, String)> {
        let mut entries: Vec<(u32, String)> = nodes
            .iter()
            .flat_map(|node| {
                (0..replicas).map(move |i| {
                    let key = format!("{node}{i}");
                    (murmur2(key.as_bytes()), node.clone())
                })
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        entries
    }

    /// Add a node. Idempotent.
    pub fn add_node(&self, node: &str) {
        if let Ok(mut state) = self.state.write() {
            if state.nodes.insert(node.to_string()) {
                state.ring = Arc::new(Self::build(&state.nodes, self.replicas));
            }
        }
    }

    /// Remove a node. Idempotent.
    pub fn remove_node(&self, node: &str) {
        if let Ok(mut state) = self.state.write() {
            if state.nodes.remove(node) {
                state.ring = Arc::new(Self::build(&state.nodes, self.replicas));
            }
        }
    }

    /// Resolve `key` to its owning node. `None` on an empty ring.
    pub fn get_node(&self, key: &str) -> Option<String> {
        let ring = match self.state.read() {
            Ok(state) => Arc::clone(&state.ring),
            Err(_) => return None,
        };
        if ring.is_empty() {
            return None;
        }
        let hash = murmur2(key.as_bytes());
        // First entry at or clockwise of the hash, wrapping past the end.
        let index = ring.partition_point(|(h, _)| *h < hash);
        let (_, node) = &ring[index % ring.len()];
        Some(node.clone())
    }

    /// Current node set, sorted.
    pub fn nodes(&self) -> Vec<String> {
        self.state
            .read()
            .map(|state| state.nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().map(|state| state.nodes.len()).unwrap_or(0)
    }
}
