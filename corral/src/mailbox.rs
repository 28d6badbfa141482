//! Per-actor mailbox: ordered delivery atop a shared worker pool.
//!
//! Every actor owns one [`Mailbox`] holding two lock-free queues: a system
//! lane (lifecycle, watch, suspension) and a user lane. Producers enqueue
//! from any thread; at most one dispatch loop runs per mailbox at a time,
//! enforced by a compare-and-swap on the status word rather than a lock.
//!
//! # Dispatch cycle
//!
//! Each cycle drains the system lane fully before considering a user
//! message. When a handler returns a future that is not immediately ready,
//! the mailbox transitions to `Suspended`, parks on the future and hands the
//! worker thread back to the pool; resumption may land on a different
//! thread. Handler faults escalate to the invoker's failure path; a
//! cancellation is logged and never escalated.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::Poll;

use async_trait::async_trait;
use crossbeam_queue::SegQueue;

use crate::error::ActorError;
use crate::pid::Pid;
use crate::process::MessageEnvelope;

/// System messages, always processed ahead of user messages.
#[derive(Debug, Clone)]
pub enum SystemMessage {
    /// First message any actor sees.
    Started,
    /// Stop the actor: run its stop hook, notify watchers, deregister.
    Stop,
    /// Gate user-message processing until `Resume`.
    Suspend,
    /// Lift a previous `Suspend`.
    Resume,
    /// `who` wants a `Terminated` notification when this process stops.
    Watch(Pid),
    /// Cancel a previous `Watch`.
    Unwatch(Pid),
    /// A watched process stopped.
    Terminated {
        /// The process that stopped.
        who: Pid,
    },
}

/// Observable dispatch state of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxStatus {
    /// No dispatch loop scheduled.
    Idle,
    /// A dispatch loop is running.
    Busy,
    /// The running loop is parked on an incomplete handler future.
    Suspended,
}

const STATUS_IDLE: u8 = 0;
const STATUS_BUSY: u8 = 1;
const STATUS_SUSPENDED: u8 = 2;

/// Receives the messages a mailbox dequeues.
///
/// Implemented by the actor process; the mailbox knows nothing about actors
/// beyond this seam.
#[async_trait]
pub trait MessageInvoker: Send + Sync + 'static {
    /// Handle one user message.
    async fn invoke_user(&self, envelope: MessageEnvelope) -> Result<(), ActorError>;

    /// Handle one system message.
    async fn invoke_system(&self, message: SystemMessage) -> Result<(), ActorError>;

    /// A handler faulted. The invoker decides what happens next (publish a
    /// failure event, resume, stop); the mailbox itself never retries.
    fn escalate_failure(&self, error: ActorError);
}

/// Schedules mailbox dispatch loops onto a worker pool.
pub trait Dispatcher: Send + Sync + fmt::Debug + 'static {
    /// Run `task` on the pool.
    fn schedule(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Default dispatcher backed by the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDispatcher;

impl Dispatcher for TokioDispatcher {
    fn schedule(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(task);
    }
}

/// Two-lane mailbox with a single-active-worker dispatch loop.
pub struct Mailbox {
    system_queue: SegQueue<SystemMessage>,
    user_queue: SegQueue<MessageEnvelope>,
    status: AtomicU8,
    /// Explicit suspension gate toggled by `Suspend`/`Resume`. While set,
    /// system messages still flow but user messages stay queued.
    user_gate: AtomicBool,
    invoker: OnceLock<Arc<dyn MessageInvoker>>,
    dispatcher: Arc<dyn Dispatcher>,
    /// Messages handled per scheduling turn before yielding the thread.
    throughput: usize,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("status", &self.status())
            .field("system_len", &self.system_queue.len())
            .field("user_len", &self.user_queue.len())
            .finish()
    }
}

impl Mailbox {
    /// Create a mailbox. The invoker is attached separately because mailbox
    /// and actor process reference each other.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, throughput: usize) -> Arc<Self> {
        Arc::new(Self {
            system_queue: SegQueue::new(),
            user_queue: SegQueue::new(),
            status: AtomicU8::new(STATUS_IDLE),
            user_gate: AtomicBool::new(false),
            invoker: OnceLock::new(),
            dispatcher,
            throughput: throughput.max(1),
        })
    }

    /// Attach the message invoker. Must be called exactly once before the
    /// first message is posted.
    pub fn register_invoker(&self, invoker: Arc<dyn MessageInvoker>) {
        if self.invoker.set(invoker).is_err() {
            tracing::warn!("mailbox invoker registered twice; keeping the first");
        }
    }

    /// Current dispatch state.
    pub fn status(&self) -> MailboxStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_BUSY => MailboxStatus::Busy,
            STATUS_SUSPENDED => MailboxStatus::Suspended,
            _ => MailboxStatus::Idle,
        }
    }

    /// Number of queued user messages.
    pub fn user_len(&self) -> usize {
        self.user_queue.len()
    }

    /// Enqueue a user message and schedule dispatch if idle.
    pub fn post_user_message(self: &Arc<Self>, envelope: MessageEnvelope) {
        self.user_queue.push(envelope);
        self.schedule();
    }

    /// Enqueue a system message and schedule dispatch if idle.
    pub fn post_system_message(self: &Arc<Self>, message: SystemMessage) {
        self.system_queue.push(message);
        self.schedule();
    }

    /// Start a dispatch loop unless one is already in flight.
    fn schedule(self: &Arc<Self>) {
        if self
            .status
            .compare_exchange(
                STATUS_IDLE,
                STATUS_BUSY,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let mailbox = Arc::clone(self);
            self.dispatcher.schedule(Box::pin(async move {
                mailbox.run().await;
            }));
        }
    }

    async fn run(self: Arc<Self>) {
        let Some(invoker) = self.invoker.get().cloned() else {
            tracing::error!("mailbox scheduled without an invoker; dropping turn");
            self.status.store(STATUS_IDLE, Ordering::Release);
            return;
        };

        loop {
            let mut handled = 0_usize;

            loop {
                // System lane drains completely before any user message.
                if let Some(message) = self.system_queue.pop() {
                    match message {
                        SystemMessage::Suspend => {
                            self.user_gate.store(true, Ordering::Release);
                        }
                        SystemMessage::Resume => {
                            self.user_gate.store(false, Ordering::Release);
                        }
                        other => {
                            if let Err(error) =
                                self.invoke(invoker.invoke_system(other)).await
                            {
                                self.handle_failure(&invoker, error);
                            }
                        }
                    }
                } else if self.user_gate.load(Ordering::Acquire) {
                    break;
                } else if let Some(envelope) = self.user_queue.pop() {
                    if let Err(error) = self.invoke(invoker.invoke_user(envelope)).await {
                        self.handle_failure(&invoker, error);
                    }
                } else {
                    break;
                }

                handled += 1;
                if handled >= self.throughput {
                    // Hand the worker thread back to the pool so one busy
                    // actor cannot starve the rest.
                    handled = 0;
                    tokio::task::yield_now().await;
                }
            }

            // Double-check: a producer may have enqueued between the last
            // pop and going idle.
            self.status.store(STATUS_IDLE, Ordering::Release);
            let more_system = !self.system_queue.is_empty();
            let more_user =
                !self.user_gate.load(Ordering::Acquire) && !self.user_queue.is_empty();
            if (more_system || more_user)
                && self
                    .status
                    .compare_exchange(
                        STATUS_IDLE,
                        STATUS_BUSY,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                continue;
            }
            return;
        }
    }

    /// Await a handler future, flipping the status to `Suspended` while it
    /// is pending so the suspension is observable.
    async fn invoke<F>(&self, future: F) -> Result<(), ActorError>
    where
        F: Future<Output = Result<(), ActorError>>,
    {
        tokio::pin!(future);
        let first = std::future::poll_fn(|cx| Poll::Ready(future.as_mut().poll(cx))).await;
        match first {
            Poll::Ready(result) => result,
            Poll::Pending => {
                self.status.store(STATUS_SUSPENDED, Ordering::Release);
                let result = future.await;
                self.status.store(STATUS_BUSY, Ordering::Release);
                result
            }
        }
    }

    fn handle_failure(&self, invoker: &Arc<dyn MessageInvoker>, error: ActorError) {
        if matches!(error, ActorError::Cancelled) {
            // Cancellation is not a fault; do not wake the supervision path.
            tracing::debug!("mailbox observed a cancelled handler");
            return;
        }
        // Gate user messages until the failure sink resumes us.
        self.user_gate.store(true, Ordering::Release);
        invoker.escalate_failure(error);
    }
}
