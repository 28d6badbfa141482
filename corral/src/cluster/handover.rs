//! Chunked identity handover reconciliation.
//!
//! After a topology change, each member streams its activation inventory as
//! numbered [`IdentityHandover`] chunks. A [`HandoverSink`] collects one
//! round: chunks may arrive in any order and may be duplicated by the
//! transport, but each is counted once. The round is complete only when
//! every expected member has sent its final chunk and no chunk before a
//! final one is missing. The sink never times out by itself; the owner
//! bounds the round and starts a new sink to retry.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::messages::{Activation, IdentityHandover};

/// What [`HandoverSink::receive`] did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Counted toward completion.
    Accepted,
    /// Seen before; not re-counted.
    Duplicate,
    /// Belongs to a different reconciliation round.
    TopologyMismatch,
    /// Sent by a member outside the expected set.
    UnknownMember,
}

#[derive(Debug, Default)]
struct MemberProgress {
    chunks: BTreeSet<u32>,
    final_chunk: Option<u32>,
}

/// Collects one reconciliation round of handover chunks.
pub struct HandoverSink {
    topology_hash: u64,
    expected: HashSet<String>,
    progress: HashMap<String, MemberProgress>,
    activations: Vec<Activation>,
    on_duplicate: Option<Box<dyn Fn(&IdentityHandover) + Send>>,
}

impl std::fmt::Debug for HandoverSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoverSink")
            .field("topology_hash", &self.topology_hash)
            .field("expected", &self.expected.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl HandoverSink {
    /// Sink for one round identified by `topology_hash`, expecting a chunk
    /// stream from each member address in `expected`.
    pub fn new<I, S>(topology_hash: u64, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topology_hash,
            expected: expected.into_iter().map(Into::into).collect(),
            progress: HashMap::new(),
            activations: Vec::new(),
            on_duplicate: None,
        }
    }

    /// Invoke `callback` whenever a duplicate chunk arrives.
    pub fn with_duplicate_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&IdentityHandover) + Send + 'static,
    {
        self.on_duplicate = Some(Box::new(callback));
        self
    }

    /// Consume one chunk.
    pub fn receive(&mut self, chunk: IdentityHandover) -> ChunkOutcome {
        if chunk.topology_hash != self.topology_hash {
            tracing::warn!(
                expected = self.topology_hash,
                got = chunk.topology_hash,
                from = %chunk.address,
                "handover chunk from a different round"
            );
            return ChunkOutcome::TopologyMismatch;
        }
        if !self.expected.contains(&chunk.address) {
            tracing::warn!(from = %chunk.address, "handover chunk from unexpected member");
            return ChunkOutcome::UnknownMember;
        }

        let progress = self.progress.entry(chunk.address.clone()).or_default();
        if !progress.chunks.insert(chunk.chunk_id) {
            if let Some(callback) = &self.on_duplicate {
                callback(&chunk);
            }
            return ChunkOutcome::Duplicate;
        }
        if chunk.final_chunk {
            progress.final_chunk = Some(chunk.chunk_id);
        }
        self.activations.extend(chunk.actors);
        ChunkOutcome::Accepted
    }

    /// True when every expected member finished and no chunk is missing.
    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|address| {
            let Some(progress) = self.progress.get(address) else {
                return false;
            };
            let Some(last) = progress.final_chunk else {
                return false;
            };
            (1..=last).all(|id| progress.chunks.contains(&id))
        })
    }

    /// Activations collected so far, each counted once.
    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::cluster::identity::ClusterIdentity;
    use crate::pid::Pid;

    const HASH: u64 = 777;

    fn chunk(address: &str, id: u32, last: bool, actors: u32) -> IdentityHandover {
        IdentityHandover {
            address: address.to_string(),
            chunk_id: id,
            final_chunk: last,
            topology_hash: HASH,
            actors: (0..actors)
                .map(|i| Activation {
                    identity: ClusterIdentity::new("k", format!("{address}-{id}-{i}")),
                    pid: Pid::new(address, format!("grain-{id}-{i}")),
                })
                .collect(),
        }
    }

    #[test]
    fn test_in_order_round_completes() {
        let mut sink = HandoverSink::new(HASH, ["a:1", "b:1"]);
        assert_eq!(sink.receive(chunk("a:1", 1, false, 2)), ChunkOutcome::Accepted);
        assert_eq!(sink.receive(chunk("a:1", 2, true, 1)), ChunkOutcome::Accepted);
        assert!(!sink.is_complete());
        assert_eq!(sink.receive(chunk("b:1", 1, true, 3)), ChunkOutcome::Accepted);
        assert!(sink.is_complete());
        assert_eq!(sink.activations().len(), 6);
    }

    #[test]
    fn test_out_of_order_round_completes() {
        let mut sink = HandoverSink::new(HASH, ["a:1"]);
        assert_eq!(sink.receive(chunk("a:1", 3, true, 1)), ChunkOutcome::Accepted);
        assert!(!sink.is_complete());
        assert_eq!(sink.receive(chunk("a:1", 1, false, 1)), ChunkOutcome::Accepted);
        assert_eq!(sink.receive(chunk("a:1", 2, false, 1)), ChunkOutcome::Accepted);
        assert!(sink.is_complete());
    }

    #[test]
    fn test_duplicates_counted_once_and_reported() {
        let duplicates = Arc::new(AtomicUsize::new(0));
        let counter = duplicates.clone();
        let mut sink = HandoverSink::new(HASH, ["a:1"])
            .with_duplicate_callback(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });

        assert_eq!(sink.receive(chunk("a:1", 1, true, 2)), ChunkOutcome::Accepted);
        assert_eq!(sink.receive(chunk("a:1", 1, true, 2)), ChunkOutcome::Duplicate);
        assert_eq!(duplicates.load(Ordering::Relaxed), 1);
        assert_eq!(sink.activations().len(), 2);
        assert!(sink.is_complete());
    }

    #[test]
    fn test_missing_chunk_blocks_completion() {
        let mut sink = HandoverSink::new(HASH, ["a:1"]);
        sink.receive(chunk("a:1", 1, false, 1));
        // Chunk 2 never arrives.
        sink.receive(chunk("a:1", 3, true, 1));
        assert!(!sink.is_complete());
    }

    #[test]
    fn test_wrong_round_and_unknown_member_rejected() {
        let mut sink = HandoverSink::new(HASH, ["a:1"]);
        let mut stale = chunk("a:1", 1, true, 1);
        stale.topology_hash = HASH + 1;
        assert_eq!(sink.receive(stale), ChunkOutcome::TopologyMismatch);
        assert_eq!(
            sink.receive(chunk("stranger:9", 1, true, 1)),
            ChunkOutcome::UnknownMember
        );
        assert!(sink.activations().is_empty());
    }
}
