//! Actors, their lifecycle, and the per-node actor system.
//!
//! An [`Actor`] owns mutable state and handles one message at a time; the
//! mailbox guarantees it is never entered concurrently, so handlers take
//! `&mut self` without locks in user code. The [`ActorSystem`] is the
//! per-node root object: it owns the process registry, the system event
//! stream and the dispatcher, and routes every message either to a local
//! process, to the remote transport, or to the dead-letter path.
//!
//! # Supervision
//!
//! A handler fault suspends the mailbox, publishes
//! [`SystemEvent::ActorFailure`] on the system event stream, and resumes the
//! actor with the next message. Failed messages are never retried.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ActorError, RequestError, SpawnError};
use crate::event_stream::EventStream;
use crate::future::FutureProcess;
use crate::mailbox::{Dispatcher, Mailbox, MessageInvoker, SystemMessage, TokioDispatcher};
use crate::pid::Pid;
use crate::process::{MessageEnvelope, Process, ProcessRegistry, RemoteTransport};

/// Events the runtime itself publishes on the system event stream.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// A message was addressed to a process that does not exist.
    DeadLetter {
        /// The pid the message was addressed to.
        target: Pid,
        /// Concrete type name of the undeliverable payload.
        type_name: &'static str,
        /// Reply-to sender of the undeliverable message, when present.
        sender: Option<Pid>,
    },
    /// An actor's message handler faulted.
    ActorFailure {
        /// The failing actor.
        pid: Pid,
        /// Rendered handler error.
        reason: String,
    },
}

/// Notification that a watched process stopped.
///
/// Delivered through the watcher's ordinary `receive` so actors handle it
/// like any other message.
#[derive(Debug, Clone)]
pub struct Terminated {
    /// The process that stopped.
    pub who: Pid,
}

/// A message-handling state machine hosted by the actor system.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Called once before the first message.
    async fn started(&mut self, _ctx: &Context) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called once when the actor stops, before watchers are notified.
    async fn stopped(&mut self, _ctx: &Context) -> Result<(), ActorError> {
        Ok(())
    }

    /// Handle one user message.
    async fn receive(&mut self, ctx: &Context, envelope: MessageEnvelope)
        -> Result<(), ActorError>;
}

/// Recipe for spawning an actor: the state producer plus mailbox tuning.
#[derive(Clone)]
pub struct Props {
    producer: Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>,
    throughput: usize,
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("throughput", &self.throughput)
            .finish()
    }
}

impl Props {
    /// Props producing a fresh actor state per spawn.
    pub fn new<A, F>(producer: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(move || Box::new(producer())),
            throughput: 300,
        }
    }

    /// Override how many messages the mailbox handles per scheduling turn.
    pub fn with_throughput(mut self, throughput: usize) -> Self {
        self.throughput = throughput.max(1);
        self
    }
}

/// Per-message view an actor gets of itself and the system.
pub struct Context {
    system: Arc<ActorSystem>,
    self_pid: Pid,
    sender: Option<Pid>,
}

impl Context {
    /// The hosting actor system.
    pub fn system(&self) -> &Arc<ActorSystem> {
        &self.system
    }

    /// This actor's own pid.
    pub fn self_pid(&self) -> &Pid {
        &self.self_pid
    }

    /// Reply-to sender of the message being handled, when present.
    pub fn sender(&self) -> Option<&Pid> {
        self.sender.as_ref()
    }

    /// Fire-and-forget send.
    pub fn send<T: Any + Send + Sync>(&self, target: &Pid, message: T) {
        self.system.send(target, MessageEnvelope::new(message));
    }

    /// Send carrying this actor as the reply-to sender.
    pub fn request_async<T: Any + Send + Sync>(&self, target: &Pid, message: T) {
        self.system.send(
            target,
            MessageEnvelope::with_sender(message, self.self_pid.clone()),
        );
    }

    /// Reply to the sender of the current message.
    pub fn respond<T: Any + Send + Sync>(&self, message: T) {
        match &self.sender {
            Some(sender) => self.system.send(sender, MessageEnvelope::new(message)),
            None => {
                tracing::warn!(pid = %self.self_pid, "respond called with no sender");
            }
        }
    }

    /// Ask `target` to notify this actor with [`Terminated`] when it stops.
    pub fn watch(&self, target: &Pid) {
        self.system
            .send_system(target, SystemMessage::Watch(self.self_pid.clone()));
    }

    /// Cancel a previous [`Context::watch`].
    pub fn unwatch(&self, target: &Pid) {
        self.system
            .send_system(target, SystemMessage::Unwatch(self.self_pid.clone()));
    }

    /// Stop a process.
    pub fn stop(&self, target: &Pid) {
        self.system.stop(target);
    }

    /// Stop this actor after the current message.
    pub fn stop_self(&self) {
        self.system.stop(&self.self_pid);
    }

    /// Spawn a child with an auto-generated name.
    pub fn spawn(&self, props: Props) -> Pid {
        self.system.spawn(props)
    }

    /// Spawn a child under an explicit node-local name.
    pub fn spawn_named(&self, props: Props, name: &str) -> Result<Pid, SpawnError> {
        self.system.spawn_named(props, name)
    }

    /// Run `future` off the mailbox and deliver its output back to this
    /// actor as an ordinary message.
    ///
    /// This keeps the actor responsive to other messages while a slow
    /// external call (storage, another node) is in flight; the continuation
    /// re-enters through the mailbox like everything else.
    pub fn reenter_after<F, M>(&self, future: F)
    where
        F: std::future::Future<Output = M> + Send + 'static,
        M: Any + Send + Sync,
    {
        let system = Arc::clone(&self.system);
        let target = self.self_pid.clone();
        tokio::spawn(async move {
            let message = future.await;
            system.send(&target, MessageEnvelope::new(message));
        });
    }
}

/// The registry entry for a spawned actor: mailbox plus invoker.
struct ActorProcess {
    system: Arc<ActorSystem>,
    pid: Pid,
    mailbox: Arc<Mailbox>,
    actor: tokio::sync::Mutex<Box<dyn Actor>>,
    watchers: Mutex<HashSet<Pid>>,
    stopped: AtomicBool,
}

impl fmt::Debug for ActorProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorProcess")
            .field("pid", &self.pid)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

impl ActorProcess {
    fn context(&self, sender: Option<Pid>) -> Context {
        Context {
            system: Arc::clone(&self.system),
            self_pid: self.pid.clone(),
            sender,
        }
    }
}

impl Process for ActorProcess {
    fn send_user_message(&self, _target: &Pid, envelope: MessageEnvelope) {
        if self.stopped.load(Ordering::Acquire) {
            self.system.dead_letter(&self.pid, &envelope);
            return;
        }
        self.mailbox.post_user_message(envelope);
    }

    fn send_system_message(&self, _target: &Pid, message: SystemMessage) {
        if self.stopped.load(Ordering::Acquire) {
            // A watch racing with the stop still gets its notification.
            if let SystemMessage::Watch(watcher) = message {
                self.system.send_system(
                    &watcher,
                    SystemMessage::Terminated {
                        who: self.pid.clone(),
                    },
                );
            }
            return;
        }
        self.mailbox.post_system_message(message);
    }
}

#[async_trait]
impl MessageInvoker for ActorProcess {
    async fn invoke_user(&self, envelope: MessageEnvelope) -> Result<(), ActorError> {
        let ctx = self.context(envelope.sender.clone());
        let mut actor = self.actor.lock().await;
        actor.receive(&ctx, envelope).await
    }

    async fn invoke_system(&self, message: SystemMessage) -> Result<(), ActorError> {
        match message {
            SystemMessage::Started => {
                let ctx = self.context(None);
                let mut actor = self.actor.lock().await;
                actor.started(&ctx).await
            }
            SystemMessage::Stop => {
                if self.stopped.swap(true, Ordering::AcqRel) {
                    return Ok(());
                }
                let ctx = self.context(None);
                let result = {
                    let mut actor = self.actor.lock().await;
                    actor.stopped(&ctx).await
                };
                let watchers: Vec<Pid> =
                    self.watchers.lock().map(|w| w.iter().cloned().collect()).unwrap_or_default();
                for watcher in watchers {
                    self.system.send_system(
                        &watcher,
                        SystemMessage::Terminated {
                            who: self.pid.clone(),
                        },
                    );
                }
                self.system.registry.remove(&self.pid.id);
                tracing::debug!(pid = %self.pid, "actor stopped");
                result
            }
            SystemMessage::Watch(watcher) => {
                if let Ok(mut watchers) = self.watchers.lock() {
                    watchers.insert(watcher);
                }
                Ok(())
            }
            SystemMessage::Unwatch(watcher) => {
                if let Ok(mut watchers) = self.watchers.lock() {
                    watchers.remove(&watcher);
                }
                Ok(())
            }
            SystemMessage::Terminated { who } => {
                // Watched-process death re-enters as a user-style message.
                let ctx = self.context(None);
                let mut actor = self.actor.lock().await;
                actor.receive(&ctx, MessageEnvelope::new(Terminated { who })).await
            }
            // Suspend and Resume never reach the invoker.
            SystemMessage::Suspend | SystemMessage::Resume => Ok(()),
        }
    }

    fn escalate_failure(&self, error: ActorError) {
        tracing::warn!(pid = %self.pid, %error, "actor handler faulted");
        self.system.events.publish(SystemEvent::ActorFailure {
            pid: self.pid.clone(),
            reason: error.to_string(),
        });
        // Default supervision: drop the failed message and move on.
        self.mailbox.post_system_message(SystemMessage::Resume);
    }
}

/// Per-node actor runtime root.
pub struct ActorSystem {
    address: String,
    registry: ProcessRegistry,
    events: Arc<EventStream<SystemEvent>>,
    dispatcher: Arc<dyn Dispatcher>,
    transport: OnceLock<Arc<dyn RemoteTransport>>,
    next_auto_name: AtomicU64,
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("address", &self.address)
            .field("processes", &self.registry.len())
            .finish()
    }
}

impl ActorSystem {
    /// Create a system identified by `address` (the node's `host:port`).
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        Self::with_dispatcher(address, Arc::new(TokioDispatcher))
    }

    /// Create a system with an explicit dispatcher.
    pub fn with_dispatcher(
        address: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Arc<Self> {
        let events = Arc::new(EventStream::new());
        events.attach_publisher(Arc::clone(&dispatcher));
        Arc::new(Self {
            address: address.into(),
            registry: ProcessRegistry::new(),
            events,
            dispatcher,
            transport: OnceLock::new(),
            next_auto_name: AtomicU64::new(1),
        })
    }

    /// This node's address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The system event stream (dead letters, failures).
    pub fn events(&self) -> &Arc<EventStream<SystemEvent>> {
        &self.events
    }

    /// The process registry for this node.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// The dispatcher actors on this node are scheduled with.
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Install the transport used for pids addressed to other nodes.
    pub fn set_transport(&self, transport: Arc<dyn RemoteTransport>) {
        if self.transport.set(transport).is_err() {
            tracing::warn!("remote transport installed twice; keeping the first");
        }
    }

    pub(crate) fn auto_name(&self, prefix: &str) -> String {
        let n = self.next_auto_name.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{n}")
    }

    /// Spawn an actor under an auto-generated name.
    pub fn spawn(self: &Arc<Self>, props: Props) -> Pid {
        loop {
            let name = self.auto_name("$actor-");
            match self.spawn_named(props.clone(), &name) {
                Ok(pid) => return pid,
                Err(SpawnError::NameTaken(_)) => continue,
            }
        }
    }

    /// Spawn an actor under an explicit node-local name.
    pub fn spawn_named(self: &Arc<Self>, props: Props, name: &str) -> Result<Pid, SpawnError> {
        let pid = Pid::new(self.address.clone(), name);
        let mailbox = Mailbox::new(Arc::clone(&self.dispatcher), props.throughput);
        let process = Arc::new(ActorProcess {
            system: Arc::clone(self),
            pid: pid.clone(),
            mailbox: Arc::clone(&mailbox),
            actor: tokio::sync::Mutex::new((props.producer)()),
            watchers: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
        });
        mailbox.register_invoker(Arc::clone(&process) as Arc<dyn MessageInvoker>);
        if !self.registry.add(name, process) {
            return Err(SpawnError::NameTaken(name.to_string()));
        }
        mailbox.post_system_message(SystemMessage::Started);
        tracing::debug!(pid = %pid, "actor spawned");
        Ok(pid)
    }

    /// Register a non-actor process (futures, routers) under `name`.
    pub fn register_process(
        &self,
        name: &str,
        process: Arc<dyn Process>,
    ) -> Result<Pid, SpawnError> {
        if !self.registry.add(name, process) {
            return Err(SpawnError::NameTaken(name.to_string()));
        }
        Ok(Pid::new(self.address.clone(), name))
    }

    /// Route a user envelope: local process, remote transport, or dead letter.
    pub fn send(&self, target: &Pid, envelope: MessageEnvelope) {
        if target.address == self.address {
            match self.registry.get(&target.id) {
                Some(process) => process.send_user_message(target, envelope),
                None => self.dead_letter(target, &envelope),
            }
        } else {
            match self.transport.get() {
                Some(transport) => transport.deliver(target, envelope),
                None => {
                    tracing::warn!(target = %target, "no remote transport installed");
                    self.dead_letter(target, &envelope);
                }
            }
        }
    }

    /// Route a system message to a local process; remote system messages are
    /// not part of the wire protocol and are dropped with a log line.
    pub fn send_system(&self, target: &Pid, message: SystemMessage) {
        if target.address != self.address {
            tracing::warn!(target = %target, "system message addressed to a remote pid");
            return;
        }
        if let Some(process) = self.registry.get(&target.id) {
            process.send_system_message(target, message);
        } else if let SystemMessage::Watch(watcher) = message {
            // Watching a dead process resolves immediately.
            self.send_system(
                &watcher,
                SystemMessage::Terminated {
                    who: target.clone(),
                },
            );
        }
    }

    /// Stop a process.
    pub fn stop(&self, target: &Pid) {
        self.send_system(target, SystemMessage::Stop);
    }

    pub(crate) fn dead_letter(&self, target: &Pid, envelope: &MessageEnvelope) {
        tracing::warn!(
            target = %target,
            message_type = envelope.type_name,
            "dead letter"
        );
        // A system event that itself becomes undeliverable must not spawn
        // another event, or a missing subscriber target loops forever.
        if envelope.message.downcast_ref::<SystemEvent>().is_some() {
            return;
        }
        self.events.publish(SystemEvent::DeadLetter {
            target: target.clone(),
            type_name: envelope.type_name,
            sender: envelope.sender.clone(),
        });
    }

    /// Request-response: send `message` to `target` and await a reply of
    /// type `T`, bounded by `timeout`.
    pub async fn request<T>(
        self: &Arc<Self>,
        target: &Pid,
        message: impl Any + Send + Sync,
        timeout: Duration,
    ) -> Result<T, RequestError>
    where
        T: Any + Send + Sync + Clone,
    {
        let (reply_to, handle) = FutureProcess::spawn(self);
        self.send(target, MessageEnvelope::with_sender(message, reply_to));
        let envelope = handle.result(timeout).await?;
        envelope
            .message
            .downcast_ref::<T>()
            .cloned()
            .ok_or(RequestError::UnexpectedReply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::process::msg;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);
    #[derive(Debug, Clone, PartialEq)]
    struct Pong(u32);

    struct EchoActor;

    #[async_trait]
    impl Actor for EchoActor {
        async fn receive(
            &mut self,
            ctx: &Context,
            envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            if let Some(Ping(n)) = envelope.message.downcast_ref::<Ping>() {
                ctx.respond(Pong(*n));
                return Ok(());
            }
            Err(ActorError::UnexpectedMessage(envelope.type_name))
        }
    }

    struct LifecycleActor {
        log: Arc<StdMutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Actor for LifecycleActor {
        async fn started(&mut self, _ctx: &Context) -> Result<(), ActorError> {
            self.log.lock().unwrap().push("started");
            Ok(())
        }

        async fn stopped(&mut self, _ctx: &Context) -> Result<(), ActorError> {
            self.log.lock().unwrap().push("stopped");
            Ok(())
        }

        async fn receive(
            &mut self,
            _ctx: &Context,
            _envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            self.log.lock().unwrap().push("received");
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let system = ActorSystem::new("node-a:1");
        let pid = system
            .spawn_named(Props::new(|| EchoActor), "echo")
            .expect("spawn echo");

        let pong: Pong = system
            .request(&pid, Ping(5), Duration::from_secs(1))
            .await
            .expect("request should succeed");
        assert_eq!(pong, Pong(5));
    }

    #[tokio::test]
    async fn test_request_times_out_without_reply() {
        struct SilentActor;

        #[async_trait]
        impl Actor for SilentActor {
            async fn receive(
                &mut self,
                _ctx: &Context,
                _envelope: MessageEnvelope,
            ) -> Result<(), ActorError> {
                Ok(())
            }
        }

        let system = ActorSystem::new("node-a:1");
        let pid = system
            .spawn_named(Props::new(|| SilentActor), "silent")
            .expect("spawn silent");

        let result: Result<Pong, _> = system
            .request(&pid, Ping(1), Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(RequestError::Timeout)));
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_and_stop_deregisters() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let system = ActorSystem::new("node-a:1");
        let producer_log = log.clone();
        let pid = system
            .spawn_named(
                Props::new(move || LifecycleActor {
                    log: producer_log.clone(),
                }),
                "life",
            )
            .expect("spawn");

        system.send(&pid, MessageEnvelope::new(Ping(1)));
        settle().await;
        system.stop(&pid);
        settle().await;

        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["started", "received", "stopped"]
        );
        assert!(system.registry().get("life").is_none());
    }

    #[tokio::test]
    async fn test_watch_delivers_terminated() {
        #[derive(Debug)]
        struct WatcherActor {
            seen: Arc<StdMutex<Vec<Pid>>>,
        }

        #[async_trait]
        impl Actor for WatcherActor {
            async fn receive(
                &mut self,
                _ctx: &Context,
                envelope: MessageEnvelope,
            ) -> Result<(), ActorError> {
                if let Some(t) = envelope.message.downcast_ref::<Terminated>() {
                    self.seen.lock().unwrap().push(t.who.clone());
                } else if let Some(target) = envelope.message.downcast_ref::<Pid>() {
                    _ctx.watch(target);
                }
                Ok(())
            }
        }

        let system = ActorSystem::new("node-a:1");
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let watcher_seen = seen.clone();
        let watcher = system
            .spawn_named(
                Props::new(move || WatcherActor {
                    seen: watcher_seen.clone(),
                }),
                "watcher",
            )
            .expect("spawn watcher");
        let target = system
            .spawn_named(Props::new(|| EchoActor), "target")
            .expect("spawn target");

        system.send(&watcher, MessageEnvelope::new(target.clone()));
        settle().await;
        system.stop(&target);
        settle().await;

        assert_eq!(seen.lock().unwrap().clone(), vec![target]);
    }

    #[tokio::test]
    async fn test_failure_publishes_event_and_actor_continues() {
        let system = ActorSystem::new("node-a:1");
        let failures = Arc::new(StdMutex::new(Vec::new()));
        let sink = failures.clone();
        system.events().subscribe(move |event| {
            if let SystemEvent::ActorFailure { reason, .. } = event {
                sink.lock().unwrap().push(reason.clone());
            }
        });

        let pid = system
            .spawn_named(Props::new(|| EchoActor), "echo")
            .expect("spawn");
        // Unknown message type faults the handler.
        system.send(&pid, MessageEnvelope::new("junk".to_string()));
        settle().await;
        assert_eq!(failures.lock().unwrap().len(), 1);

        // The actor still answers after the fault.
        let pong: Pong = system
            .request(&pid, Ping(9), Duration::from_secs(1))
            .await
            .expect("request after failure");
        assert_eq!(pong, Pong(9));
    }

    #[tokio::test]
    async fn test_dead_letter_published_for_unknown_target() {
        let system = ActorSystem::new("node-a:1");
        let dead = Arc::new(StdMutex::new(Vec::new()));
        let sink = dead.clone();
        system.events().subscribe(move |event| {
            if let SystemEvent::DeadLetter { target, .. } = event {
                sink.lock().unwrap().push(target.clone());
            }
        });

        let ghost = Pid::new("node-a:1", "nobody");
        system.send(&ghost, MessageEnvelope::new(Ping(1)));
        settle().await;

        assert_eq!(dead.lock().unwrap().clone(), vec![ghost]);
    }

    #[tokio::test]
    async fn test_spawn_named_rejects_duplicates() {
        let system = ActorSystem::new("node-a:1");
        system
            .spawn_named(Props::new(|| EchoActor), "echo")
            .expect("first spawn");
        let second = system.spawn_named(Props::new(|| EchoActor), "echo");
        assert!(matches!(second, Err(SpawnError::NameTaken(_))));
    }

    #[tokio::test]
    async fn test_reenter_after_delivers_back_to_self() {
        #[derive(Debug, Clone)]
        struct Kick;
        #[derive(Debug, Clone)]
        struct SlowResult(u32);

        struct ReentrantActor {
            results: Arc<StdMutex<Vec<u32>>>,
        }

        #[async_trait]
        impl Actor for ReentrantActor {
            async fn receive(
                &mut self,
                ctx: &Context,
                envelope: MessageEnvelope,
            ) -> Result<(), ActorError> {
                if envelope.message.downcast_ref::<Kick>().is_some() {
                    ctx.reenter_after(async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        SlowResult(42)
                    });
                } else if let Some(SlowResult(n)) =
                    envelope.message.downcast_ref::<SlowResult>()
                {
                    self.results.lock().unwrap().push(*n);
                }
                Ok(())
            }
        }

        let system = ActorSystem::new("node-a:1");
        let results = Arc::new(StdMutex::new(Vec::new()));
        let producer_results = results.clone();
        let pid = system
            .spawn_named(
                Props::new(move || ReentrantActor {
                    results: producer_results.clone(),
                }),
                "reentrant",
            )
            .expect("spawn");

        system.send(&pid, MessageEnvelope::from_any(msg(Kick), None, "Kick"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(results.lock().unwrap().clone(), vec![42]);
    }
}
