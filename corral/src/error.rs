//! Error types for the corral actor runtime.

use thiserror::Error;

/// Errors surfaced by actor message handlers and the runtime around them.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The handler failed while processing a message.
    #[error("message handling failed: {0}")]
    HandlingFailed(String),

    /// The handler received a message type it does not understand.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),

    /// An in-flight operation was cancelled rather than failed.
    ///
    /// Cancellation is kept distinct from a fault so that the mailbox does
    /// not escalate it to the failure path.
    #[error("operation cancelled")]
    Cancelled,

    /// Actor spawning failed.
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// A storage operation failed.
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from registering a new process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// A process with the same name already exists on this node.
    #[error("process name already taken: {0}")]
    NameTaken(String),
}

/// Errors from awaiting a request-response future.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The response did not arrive before the deadline.
    #[error("request timed out")]
    Timeout,

    /// The responder dropped the reply channel without answering.
    #[error("request was dropped without a response")]
    Dropped,

    /// A response arrived but carried an unexpected message type.
    #[error("unexpected reply type")]
    UnexpectedReply,
}

/// Errors from starting or stopping a cluster node.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A well-known cluster actor could not be registered.
    #[error("cluster actor spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// The identity storage backend failed during init or dispose.
    #[error("cluster storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the identity storage backend.
///
/// `LockLost` is deliberately its own variant: it is an authoritative signal
/// that another node owns the identity, and callers must not retry on it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The spawn lock was lost to a competing holder between acquire and store.
    #[error("spawn lock no longer owned: {lock_id}")]
    LockLost {
        /// The lock id that was expected to still be held.
        lock_id: String,
    },

    /// The storage backend is unreachable or rejected the call transiently.
    #[error("identity storage unavailable")]
    Unavailable,

    /// Generic storage operation failure.
    #[error("storage operation failed: {0}")]
    OperationFailed(String),
}

impl StorageError {
    /// True when the error means the spawn lock passed to the call is no
    /// longer owned by the caller.
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, StorageError::LockLost { .. })
    }
}
