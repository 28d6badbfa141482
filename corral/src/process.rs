//! Processes and the per-node process registry.
//!
//! A [`Process`] is anything addressable by a [`Pid`]: an actor with a
//! mailbox, a future awaiting one reply, a router. The [`ProcessRegistry`]
//! maps node-local process names to live processes; messages to other nodes
//! go through the pluggable [`RemoteTransport`] seam.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::mailbox::SystemMessage;
use crate::pid::Pid;

/// Type-erased message payload.
///
/// Messages are shared (`Arc`) so broadcast routing and event delivery can
/// fan one payload out without cloning it. Receivers downcast to their own
/// closed message set and match exhaustively.
pub type AnyMessage = Arc<dyn Any + Send + Sync>;

/// Box a concrete value into an [`AnyMessage`].
pub fn msg<T: Any + Send + Sync>(value: T) -> AnyMessage {
    Arc::new(value)
}

/// A user message together with its optional reply-to sender.
#[derive(Clone)]
pub struct MessageEnvelope {
    /// The payload.
    pub message: AnyMessage,
    /// Pid to address replies to, when the sender expects one.
    pub sender: Option<Pid>,
    /// Concrete type name of the payload, kept for dead-letter reporting.
    pub type_name: &'static str,
}

impl MessageEnvelope {
    /// Envelope with no reply-to sender.
    pub fn new<T: Any + Send + Sync>(message: T) -> Self {
        Self {
            message: Arc::new(message),
            sender: None,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Envelope carrying a reply-to pid.
    pub fn with_sender<T: Any + Send + Sync>(message: T, sender: Pid) -> Self {
        Self {
            message: Arc::new(message),
            sender: Some(sender),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap an already type-erased payload.
    pub fn from_any(message: AnyMessage, sender: Option<Pid>, type_name: &'static str) -> Self {
        Self {
            message,
            sender,
            type_name,
        }
    }
}

impl fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("type_name", &self.type_name)
            .field("sender", &self.sender)
            .finish()
    }
}

/// Anything addressable by a [`Pid`] on this node.
pub trait Process: Send + Sync + fmt::Debug {
    /// Deliver a user message. The `target` pid carries the request slot
    /// when the process is a shared future.
    fn send_user_message(&self, target: &Pid, envelope: MessageEnvelope);

    /// Deliver a system message (lifecycle, watch, suspension).
    fn send_system_message(&self, target: &Pid, message: SystemMessage);
}

/// Transport seam for messages addressed to other nodes.
///
/// Production wiring would put a gRPC endpoint behind this; tests use an
/// in-process loopback that round-trips every envelope through its wire
/// encoding.
pub trait RemoteTransport: Send + Sync + fmt::Debug {
    /// Deliver a user envelope to a process on another node.
    fn deliver(&self, target: &Pid, envelope: MessageEnvelope);
}

/// Per-node map of process name to live process.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: DashMap<String, Arc<dyn Process>>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Register a process under `id`. Returns `false` when the name is taken.
    pub fn add(&self, id: &str, process: Arc<dyn Process>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.processes.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(process);
                true
            }
        }
    }

    /// Look up a process by its node-local name.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Process>> {
        self.processes.get(id).map(|p| p.value().clone())
    }

    /// Remove a process. Idempotent.
    pub fn remove(&self, id: &str) {
        self.processes.remove(id);
    }

    /// Node-local names of all registered processes.
    pub fn ids(&self) -> Vec<String> {
        self.processes.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True when no process is registered.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullProcess;

    impl Process for NullProcess {
        fn send_user_message(&self, _target: &Pid, _envelope: MessageEnvelope) {}
        fn send_system_message(&self, _target: &Pid, _message: SystemMessage) {}
    }

    #[test]
    fn test_add_and_get() {
        let registry = ProcessRegistry::new();
        assert!(registry.add("a", Arc::new(NullProcess)));
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let registry = ProcessRegistry::new();
        assert!(registry.add("a", Arc::new(NullProcess)));
        assert!(!registry.add("a", Arc::new(NullProcess)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ProcessRegistry::new();
        registry.add("a", Arc::new(NullProcess));
        registry.remove("a");
        registry.remove("a");
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_envelope_records_type_name() {
        let envelope = MessageEnvelope::new(42_u32);
        assert!(envelope.type_name.contains("u32"));
        assert!(envelope.sender.is_none());
    }
}
