//! Future processes: addressable reply slots for request-response.
//!
//! A [`FutureProcess`] is a one-shot process registered for a single call;
//! the first message it receives completes it and it deregisters itself.
//!
//! A [`SharedFutureProcess`] amortizes that per-call registration for hot
//! paths: it pre-allocates a fixed pool of reply slots under one process
//! name and addresses each pending call as `pid.with_request_id(rid)`. The
//! request id both selects the slot (`(rid - 1) % capacity`) and guards it
//! against late replies: recycling a slot advances its id by the pool
//! capacity, so a reply carrying a stale id can never complete the slot's
//! next occupant.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tokio::sync::oneshot;

use crate::actor::ActorSystem;
use crate::error::{RequestError, SpawnError};
use crate::mailbox::SystemMessage;
use crate::pid::Pid;
use crate::process::{MessageEnvelope, Process};

/// One-shot reply process for a single request.
pub struct FutureProcess {
    system: Arc<ActorSystem>,
    name: String,
    tx: Mutex<Option<oneshot::Sender<MessageEnvelope>>>,
}

impl fmt::Debug for FutureProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureProcess")
            .field("name", &self.name)
            .finish()
    }
}

impl FutureProcess {
    /// Register a fresh future process on `system`. Returns the pid to use
    /// as the reply-to sender and the handle to await.
    pub fn spawn(system: &Arc<ActorSystem>) -> (Pid, FutureHandle) {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        loop {
            let name = system.auto_name("$future-");
            let process = Arc::new(FutureProcess {
                system: Arc::clone(system),
                name: name.clone(),
                tx: Mutex::new(tx.take()),
            });
            if system.registry().add(&name, Arc::clone(&process) as Arc<dyn Process>) {
                // request_id 1 marks the pid as expecting a correlated reply.
                let pid = Pid::new(system.address().to_string(), name.clone())
                    .with_request_id(1);
                return (
                    pid,
                    FutureHandle {
                        system: Arc::clone(system),
                        name,
                        rx,
                    },
                );
            }
            // Name collision: reclaim the sender and retry under a new name.
            tx = process.tx.lock().ok().and_then(|mut slot| slot.take());
        }
    }
}

impl Process for FutureProcess {
    fn send_user_message(&self, _target: &Pid, envelope: MessageEnvelope) {
        let taken = self.tx.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => {
                tracing::debug!(name = %self.name, "late reply to a completed future");
            }
        }
        self.system.registry().remove(&self.name);
    }

    fn send_system_message(&self, _target: &Pid, message: SystemMessage) {
        if matches!(message, SystemMessage::Stop) {
            // Dropping the sender surfaces as `Dropped` at the caller.
            if let Ok(mut slot) = self.tx.lock() {
                slot.take();
            }
            self.system.registry().remove(&self.name);
        }
    }
}

/// Caller side of a [`FutureProcess`].
pub struct FutureHandle {
    system: Arc<ActorSystem>,
    name: String,
    rx: oneshot::Receiver<MessageEnvelope>,
}

impl FutureHandle {
    /// Await the reply, bounded by `timeout`. The process is deregistered on
    /// every exit path.
    pub async fn result(self, timeout: Duration) -> Result<MessageEnvelope, RequestError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(RequestError::Dropped),
            Err(_) => {
                self.system.registry().remove(&self.name);
                Err(RequestError::Timeout)
            }
        }
    }
}

struct SharedSlot {
    /// Request id currently assigned to this slot. Advances by the pool
    /// capacity on every recycle, so `(rid - 1) % capacity` always recovers
    /// the slot index.
    request_id: AtomicU32,
    tx: Mutex<Option<oneshot::Sender<MessageEnvelope>>>,
}

/// Pool of pre-allocated reply slots registered as one process.
pub struct SharedFutureProcess {
    pid: Pid,
    slots: Vec<SharedSlot>,
    free: SegQueue<usize>,
    timeouts: AtomicU64,
    /// Largest request id before ids wrap back to the first cycle.
    wrap_at: u32,
}

impl fmt::Debug for SharedFutureProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFutureProcess")
            .field("pid", &self.pid)
            .field("capacity", &self.slots.len())
            .field("free", &self.free.len())
            .finish()
    }
}

impl SharedFutureProcess {
    /// Register a pool of `capacity` slots on `system` under `name`.
    pub fn register(
        system: &Arc<ActorSystem>,
        name: &str,
        capacity: usize,
    ) -> Result<Arc<Self>, SpawnError> {
        let capacity = capacity.max(1) as u32;
        let slots = (0..capacity)
            .map(|i| SharedSlot {
                request_id: AtomicU32::new(i + 1),
                tx: Mutex::new(None),
            })
            .collect();
        let free = SegQueue::new();
        for i in 0..capacity as usize {
            free.push(i);
        }
        let pool = Arc::new(Self {
            pid: Pid::new(system.address().to_string(), name),
            slots,
            free,
            timeouts: AtomicU64::new(0),
            wrap_at: (u32::MAX / capacity) * capacity,
        });
        system.register_process(name, Arc::clone(&pool) as Arc<dyn Process>)?;
        Ok(pool)
    }

    /// Capacity of the pool.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently available.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// How many pending requests have expired so far.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Claim a free slot. `None` when the pool is exhausted; callers fall
    /// back to a one-shot [`FutureProcess`].
    pub fn try_create_handle(self: &Arc<Self>) -> Option<SharedFutureHandle> {
        let index = self.free.pop()?;
        let (tx, rx) = oneshot::channel();
        let slot = &self.slots[index];
        if let Ok(mut pending) = slot.tx.lock() {
            *pending = Some(tx);
        }
        let rid = slot.request_id.load(Ordering::Acquire);
        Some(SharedFutureHandle {
            pool: Arc::clone(self),
            index,
            rid,
            pid: self.pid.with_request_id(rid),
            rx,
        })
    }

    /// Advance the slot's request id past the retired one and return the
    /// slot to the free pool.
    fn recycle(&self, index: usize) {
        let slot = &self.slots[index];
        let current = slot.request_id.load(Ordering::Acquire);
        let capacity = self.slots.len() as u32;
        let next = if current >= self.wrap_at - capacity + 1 {
            index as u32 + 1
        } else {
            current + capacity
        };
        slot.request_id.store(next, Ordering::Release);
        self.free.push(index);
    }

    /// Force-complete an expired slot. Only the taker of the pending sender
    /// recycles, so a reply racing the deadline cannot double-free the slot.
    fn expire(&self, index: usize, rid: u32) {
        let slot = &self.slots[index];
        if slot.request_id.load(Ordering::Acquire) != rid {
            return;
        }
        let taken = slot.tx.lock().ok().and_then(|mut pending| pending.take());
        if taken.is_some() {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            self.recycle(index);
        }
    }
}

impl Process for SharedFutureProcess {
    fn send_user_message(&self, target: &Pid, envelope: MessageEnvelope) {
        let rid = target.request_id;
        if rid == 0 {
            tracing::debug!(pid = %self.pid, "reply without a request id; dropped");
            return;
        }
        let index = ((rid - 1) % self.slots.len() as u32) as usize;
        let slot = &self.slots[index];
        if slot.request_id.load(Ordering::Acquire) != rid {
            // Slot was recycled since this request went out.
            tracing::debug!(pid = %self.pid, request_id = rid, "stale reply ignored");
            return;
        }
        let taken = slot.tx.lock().ok().and_then(|mut pending| pending.take());
        match taken {
            Some(tx) => {
                let _ = tx.send(envelope);
                self.recycle(index);
            }
            None => {
                tracing::debug!(pid = %self.pid, request_id = rid, "duplicate reply ignored");
            }
        }
    }

    fn send_system_message(&self, _target: &Pid, _message: SystemMessage) {}
}

/// Caller side of one pending slot in a [`SharedFutureProcess`].
pub struct SharedFutureHandle {
    pool: Arc<SharedFutureProcess>,
    index: usize,
    rid: u32,
    pid: Pid,
    rx: oneshot::Receiver<MessageEnvelope>,
}

impl fmt::Debug for SharedFutureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFutureHandle")
            .field("pid", &self.pid)
            .finish()
    }
}

impl SharedFutureHandle {
    /// Pid to use as the reply-to sender for this request.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Await the reply, bounded by `timeout`. On expiry the slot is
    /// force-completed and returned to the pool.
    pub async fn result(self, timeout: Duration) -> Result<MessageEnvelope, RequestError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(RequestError::Dropped),
            Err(_) => {
                self.pool.expire(self.index, self.rid);
                Err(RequestError::Timeout)
            }
        }
    }
}
