//! Publish/subscribe event stream.
//!
//! Subscriptions live in a concurrent map so `subscribe`/`unsubscribe` are
//! safe from any thread while publishes are in flight. Delivery is funneled
//! through a dedicated publisher mailbox so events that matter to each other
//! (dead letters, failures, topology changes) are observed in one global
//! order. Until a publisher is attached, delivery happens inline on the
//! publishing thread.
//!
//! A subscriber that panics is isolated: the panic is caught and logged, and
//! the remaining subscribers still receive the event.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ActorError;
use crate::mailbox::{Dispatcher, Mailbox, MessageInvoker, SystemMessage};
use crate::process::MessageEnvelope;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscription<E> {
    handler: Handler<E>,
    filter: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered publish/subscribe stream of events of type `E`.
pub struct EventStream<E> {
    subscriptions: DashMap<u64, Subscription<E>>,
    next_id: AtomicU64,
    publisher: OnceLock<Arc<Mailbox>>,
}

impl<E> std::fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl<E: Clone + Send + Sync + 'static> Default for EventStream<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + Sync + 'static> EventStream<E> {
    /// Create a stream with no publisher mailbox; publishes deliver inline
    /// until [`EventStream::attach_publisher`] is called.
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            publisher: OnceLock::new(),
        }
    }

    /// Route publishes through a dedicated mailbox on `dispatcher` so
    /// delivery order is global rather than per-publisher.
    pub fn attach_publisher(self: &Arc<Self>, dispatcher: Arc<dyn Dispatcher>) {
        let mailbox = Mailbox::new(dispatcher, 300);
        mailbox.register_invoker(Arc::new(PublisherInvoker {
            stream: Arc::clone(self),
        }));
        if self.publisher.set(mailbox).is_err() {
            tracing::warn!("event stream publisher attached twice; keeping the first");
        }
    }

    /// Register a handler for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(Arc::new(handler), None)
    }

    /// Register a handler for events matching `filter`.
    pub fn subscribe_filtered<F, P>(&self, handler: F, filter: P) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.insert(Arc::new(handler), Some(Arc::new(filter)))
    }

    fn insert(
        &self,
        handler: Handler<E>,
        filter: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.insert(id, Subscription { handler, filter });
        SubscriptionId(id)
    }

    /// Remove a subscription. Safe concurrently with `publish`; an event
    /// already in flight may still reach the removed handler once.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.remove(&id.0);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Publish an event to all matching subscribers.
    pub fn publish(&self, event: E) {
        match self.publisher.get() {
            Some(mailbox) => mailbox.post_user_message(MessageEnvelope::new(event)),
            None => self.deliver(&event),
        }
    }

    fn deliver(&self, event: &E) {
        for entry in self.subscriptions.iter() {
            let subscription = entry.value();
            if let Some(filter) = &subscription.filter {
                if !filter(event) {
                    continue;
                }
            }
            let handler = Arc::clone(&subscription.handler);
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                tracing::warn!(
                    subscription = entry.key(),
                    "event subscriber panicked; continuing with the rest"
                );
            }
        }
    }
}

/// Invoker behind the publisher mailbox; fans each event out to subscribers.
struct PublisherInvoker<E> {
    stream: Arc<EventStream<E>>,
}

#[async_trait]
impl<E: Clone + Send + Sync + 'static> MessageInvoker for PublisherInvoker<E> {
    async fn invoke_user(&self, envelope: MessageEnvelope) -> Result<(), ActorError> {
        match envelope.message.downcast_ref::<E>() {
            Some(event) => {
                self.stream.deliver(event);
                Ok(())
            }
            None => Err(ActorError::UnexpectedMessage(envelope.type_name)),
        }
    }

    async fn invoke_system(&self, _message: SystemMessage) -> Result<(), ActorError> {
        Ok(())
    }

    fn escalate_failure(&self, error: ActorError) {
        tracing::warn!(%error, "event stream publisher failed to deliver");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::mailbox::TokioDispatcher;

    #[test]
    fn test_inline_delivery_without_publisher() {
        let stream = EventStream::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        stream.subscribe(move |e| sink.lock().unwrap().push(*e));

        stream.publish(1);
        stream.publish(2);
        assert_eq!(seen.lock().unwrap().clone(), vec![1, 2]);
    }

    #[test]
    fn test_filtered_subscription() {
        let stream = EventStream::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        stream.subscribe_filtered(move |e| sink.lock().unwrap().push(*e), |e| e % 2 == 0);

        for i in 0..6 {
            stream.publish(i);
        }
        assert_eq!(seen.lock().unwrap().clone(), vec![0, 2, 4]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let stream = EventStream::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = stream.subscribe(move |e| sink.lock().unwrap().push(*e));

        stream.publish(1);
        stream.unsubscribe(id);
        stream.publish(2);
        assert_eq!(seen.lock().unwrap().clone(), vec![1]);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let stream = EventStream::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        stream.subscribe(|_| panic!("bad subscriber"));
        let sink = seen.clone();
        stream.subscribe(move |e| sink.lock().unwrap().push(*e));

        stream.publish(7);
        assert_eq!(seen.lock().unwrap().clone(), vec![7]);
    }

    #[tokio::test]
    async fn test_publisher_orders_events_globally() {
        let stream = Arc::new(EventStream::<u32>::new());
        stream.attach_publisher(Arc::new(TokioDispatcher));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        stream.subscribe(move |e| sink.lock().unwrap().push(*e));

        let mut tasks = Vec::new();
        for chunk in 0..4_u32 {
            let stream = stream.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    stream.publish(chunk * 100 + i);
                }
            }));
        }
        for task in tasks {
            task.await.expect("publisher task");
        }

        for _ in 0..100 {
            if seen.lock().unwrap().len() == 100 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let log = seen.lock().unwrap().clone();
        assert_eq!(log.len(), 100);
        // Per-publisher order survives the funnel.
        for chunk in 0..4_u32 {
            let ours: Vec<u32> = log
                .iter()
                .copied()
                .filter(|e| e / 100 == chunk)
                .collect();
            let expected: Vec<u32> = (0..25).map(|i| chunk * 100 + i).collect();
            assert_eq!(ours, expected);
        }
    }
}
