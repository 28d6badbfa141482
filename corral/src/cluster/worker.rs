//! The per-node identity resolution worker.
//!
//! Serializes `get_pid` requests for this node: the cache fast path answers
//! immediately, and concurrent requests for the same identity collapse into
//! one in-flight resolution whose answer fans out to every waiter. The
//! resolution itself runs off-mailbox and re-enters as a message, so the
//! worker keeps answering cache hits while storage is slow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::identity::ClusterIdentity;
use super::lookup::IdentityStorageLookup;
use crate::actor::{Actor, Context};
use crate::error::ActorError;
use crate::pid::Pid;
use crate::process::MessageEnvelope;

/// Well-known node-local name of the resolution worker.
pub const IDENTITY_WORKER: &str = "identity-worker";

/// Resolve an identity to a pid. Answered with [`PidResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPid {
    /// The identity to resolve.
    pub identity: ClusterIdentity,
}

/// Answer to [`GetPid`]. `None` means "try again later".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidResult {
    /// The identity that was resolved.
    pub identity: ClusterIdentity,
    /// Its placement, when resolution succeeded.
    pub pid: Option<Pid>,
}

#[derive(Debug, Clone)]
struct ResolutionDone {
    identity: ClusterIdentity,
    pid: Option<Pid>,
}

/// Worker actor owning this node's in-flight resolution bookkeeping.
pub struct IdentityWorker {
    lookup: Arc<IdentityStorageLookup>,
    in_flight: HashMap<ClusterIdentity, Vec<Pid>>,
}

impl IdentityWorker {
    /// Worker over a node's lookup pipeline.
    pub fn new(lookup: Arc<IdentityStorageLookup>) -> Self {
        Self {
            lookup,
            in_flight: HashMap::new(),
        }
    }

    fn handle_get_pid(&mut self, ctx: &Context, request: &GetPid) {
        let identity = &request.identity;
        if let Some(pid) = self.lookup.pid_cache().get(identity) {
            ctx.respond(PidResult {
                identity: identity.clone(),
                pid: Some(pid),
            });
            return;
        }

        let already_resolving = self.in_flight.contains_key(identity);
        let waiters = self.in_flight.entry(identity.clone()).or_default();
        if let Some(sender) = ctx.sender() {
            waiters.push(sender.clone());
        }
        if already_resolving {
            return;
        }

        let lookup = Arc::clone(&self.lookup);
        let identity = identity.clone();
        ctx.reenter_after(async move {
            let pid = lookup.resolve(&identity).await;
            ResolutionDone { identity, pid }
        });
    }

    fn handle_resolution_done(&mut self, ctx: &Context, done: &ResolutionDone) {
        let waiters = self.in_flight.remove(&done.identity).unwrap_or_default();
        tracing::debug!(
            identity = %done.identity,
            resolved = done.pid.is_some(),
            waiters = waiters.len(),
            "identity resolution finished"
        );
        for waiter in waiters {
            ctx.send(
                &waiter,
                PidResult {
                    identity: done.identity.clone(),
                    pid: done.pid.clone(),
                },
            );
        }
    }
}

#[async_trait]
impl Actor for IdentityWorker {
    async fn receive(
        &mut self,
        ctx: &Context,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(request) = envelope.message.downcast_ref::<GetPid>() {
            self.handle_get_pid(ctx, request);
            Ok(())
        } else if let Some(done) = envelope.message.downcast_ref::<ResolutionDone>() {
            self.handle_resolution_done(ctx, done);
            Ok(())
        } else {
            Err(ActorError::UnexpectedMessage(envelope.type_name))
        }
    }
}
