//! Event Broker
//!
//! Topic-keyed fan-out of stream events to independent subscribers.
//!
//! Every subscriber owns a bounded mailbox. Publishing copies the event into
//! each mailbox of the topic and never waits on a subscriber: when a mailbox
//! is full the overflow policy decides whether the oldest buffered event is
//! dropped or the subscriber is disconnected. A slow viewer therefore only
//! ever loses its own events. Events preloaded at subscribe time are pinned:
//! they sit outside the capacity and are never evicted.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;
use uuid::Uuid;

use pipeviz_core::domain::RunRef;

/// Default mailbox capacity per subscriber
pub const DEFAULT_BUFFER: usize = 256;

/// Name of an event channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Topic carrying running-pipeline snapshots and updates
    pub fn running() -> Self {
        Self::new("running")
    }

    /// Topic private to one live-log viewer session
    pub fn live_log(run: &RunRef, session: Uuid) -> Self {
        Self(format!("logs/{}#{}", run, session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens when a subscriber's mailbox is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to make room
    #[default]
    DropOldest,
    /// Close the subscription; the viewer is expected to reconnect
    Disconnect,
}

pub type SubscriberId = u64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Mailbox
// =============================================================================

enum Delivery {
    Delivered,
    Evicted,
    Closed,
}

struct Queue<E> {
    events: VecDeque<E>,
    /// Leading events that were preloaded and cannot be evicted
    pinned: usize,
}

impl<E> Queue<E> {
    fn is_full(&self, capacity: usize) -> bool {
        self.events.len() - self.pinned >= capacity
    }
}

struct Mailbox<E> {
    queue: Mutex<Queue<E>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<E> Mailbox<E> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                events: VecDeque::with_capacity(capacity.min(64)),
                pinned: 0,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: E, policy: OverflowPolicy) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }

        let mut queue = lock(&self.queue);
        let delivery = if queue.is_full(self.capacity) {
            match policy {
                OverflowPolicy::DropOldest => {
                    let oldest = queue.pinned;
                    queue.events.remove(oldest);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Delivery::Evicted
                }
                OverflowPolicy::Disconnect => {
                    drop(queue);
                    self.close();
                    return Delivery::Closed;
                }
            }
        } else {
            Delivery::Delivered
        };
        queue.events.push_back(event);
        drop(queue);

        self.notify.notify_one();
        delivery
    }

    /// Queues an event ahead of any published one, exempt from eviction
    fn preload(&self, event: E) {
        let mut queue = lock(&self.queue);
        let at = queue.pinned;
        queue.events.insert(at, event);
        queue.pinned += 1;
    }

    fn pop(&self) -> Option<E> {
        let mut queue = lock(&self.queue);
        let event = queue.events.pop_front()?;
        queue.pinned = queue.pinned.saturating_sub(1);
        Some(event)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut queue = lock(&self.queue);
        queue.events.clear();
        queue.pinned = 0;
        drop(queue);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Broker
// =============================================================================

type TopicTable<E> = HashMap<Topic, HashMap<SubscriberId, Arc<Mailbox<E>>>>;

struct BrokerInner<E> {
    topics: Mutex<TopicTable<E>>,
    next_id: AtomicU64,
    buffer: usize,
    policy: OverflowPolicy,
}

impl<E> BrokerInner<E> {
    /// Detaches a subscriber; returns its mailbox if it was still attached
    fn detach(&self, topic: &Topic, id: SubscriberId) -> Option<Arc<Mailbox<E>>> {
        let mut topics = lock(&self.topics);
        let subscribers = topics.get_mut(topic)?;
        let mailbox = subscribers.remove(&id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        mailbox
    }
}

/// Fan-out hub shared by the registry, the log streamers and the HTTP layer
///
/// Cloning is cheap and every clone publishes into the same topics.
pub struct Broker<E> {
    inner: Arc<BrokerInner<E>>,
}

impl<E> Clone for Broker<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Clone> Broker<E> {
    pub fn new(buffer: usize) -> Self {
        Self::with_policy(buffer, OverflowPolicy::default())
    }

    pub fn with_policy(buffer: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                policy,
            }),
        }
    }

    /// Registers a subscriber on a topic
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self, topic: Topic) -> Subscription<E> {
        self.subscribe_with(topic, std::iter::empty())
    }

    /// Registers a subscriber whose mailbox starts with the given events
    ///
    /// The preloaded events are queued before the subscriber becomes visible
    /// to publishers, so they are always received first. They do not count
    /// against the buffer and are never dropped for a lagging subscriber.
    pub fn subscribe_with(
        &self,
        topic: Topic,
        initial: impl IntoIterator<Item = E>,
    ) -> Subscription<E> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new(self.inner.buffer));
        for event in initial {
            mailbox.preload(event);
        }

        lock(&self.inner.topics)
            .entry(topic.clone())
            .or_default()
            .insert(id, mailbox.clone());

        tracing::debug!("Subscriber {} attached to {}", id, topic);

        Subscription {
            id,
            topic,
            mailbox,
            broker: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers an event to every current subscriber of a topic
    ///
    /// Never blocks on subscribers. Returns how many subscribers received it.
    pub fn publish(&self, topic: &Topic, event: E) -> usize {
        let subscribers: Vec<(SubscriberId, Arc<Mailbox<E>>)> = {
            let topics = lock(&self.inner.topics);
            match topics.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|(id, mailbox)| (*id, mailbox.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, mailbox) in subscribers {
            match mailbox.push(event.clone(), self.inner.policy) {
                Delivery::Delivered => delivered += 1,
                Delivery::Evicted => {
                    delivered += 1;
                    tracing::debug!(
                        "Subscriber {} on {} is lagging, dropped oldest event",
                        id,
                        topic
                    );
                }
                Delivery::Closed => {
                    tracing::warn!("Detaching closed subscriber {} on {}", id, topic);
                    self.inner.detach(topic, id);
                }
            }
        }
        delivered
    }

    /// Removes a subscriber; unknown or already removed ids are a no-op
    pub fn unsubscribe(&self, topic: &Topic, id: SubscriberId) -> bool {
        match self.inner.detach(topic, id) {
            Some(mailbox) => {
                mailbox.close();
                true
            }
            None => false,
        }
    }

    /// Closes every subscription on every topic
    ///
    /// Pending receivers observe the end of their stream. Used on shutdown so
    /// long-lived event streams let the server drain.
    pub fn close_all(&self) {
        let topics = std::mem::take(&mut *lock(&self.inner.topics));
        for mailbox in topics.into_values().flat_map(HashMap::into_values) {
            mailbox.close();
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        lock(&self.inner.topics).get(topic).map_or(0, HashMap::len)
    }

    pub fn topic_count(&self) -> usize {
        lock(&self.inner.topics).len()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Receiving end of one subscriber
///
/// Dropping it unsubscribes.
pub struct Subscription<E> {
    id: SubscriberId,
    topic: Topic,
    mailbox: Arc<Mailbox<E>>,
    broker: Weak<BrokerInner<E>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Waits for the next event; `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            if let Some(event) = self.mailbox.pop() {
                return Some(event);
            }
            if self.mailbox.is_closed() {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Takes the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<E> {
        self.mailbox.pop()
    }

    /// Number of events evicted from this subscriber's mailbox
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Unsubscribes; safe to call more than once
    pub fn close(&self) {
        self.mailbox.close();
        if let Some(broker) = self.broker.upgrade() {
            broker.detach(&self.topic, self.id);
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn topic() -> Topic {
        Topic::new("test")
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_every_event() {
        let broker = Broker::new(8);
        let mut a = broker.subscribe(topic());
        let mut b = broker.subscribe(topic());

        assert_eq!(broker.publish(&topic(), 1), 2);
        assert_eq!(broker.publish(&topic(), 2), 2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broker = Broker::new(8);
        let mut other = broker.subscribe(Topic::new("other"));
        let _sub = broker.subscribe(topic());

        broker.publish(&topic(), 1);

        assert_eq!(other.try_recv(), None);
        assert_eq!(broker.topic_count(), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broker: Broker<u32> = Broker::new(8);
        assert_eq!(broker.publish(&topic(), 1), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_before_publish_receives_nothing() {
        let broker = Broker::new(8);
        let mut sub = broker.subscribe(topic());

        assert!(broker.unsubscribe(&topic(), sub.id()));
        assert_eq!(broker.publish(&topic(), 1), 0);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_publish_sees_only_later_events() {
        let broker = Broker::new(8);
        broker.publish(&topic(), 1);

        let mut sub = broker.subscribe(topic());
        broker.publish(&topic(), 2);

        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broker: Broker<u32> = Broker::new(8);
        let sub = broker.subscribe(topic());
        let id = sub.id();

        assert!(broker.unsubscribe(&topic(), id));
        assert!(!broker.unsubscribe(&topic(), id));
        sub.close();
        sub.close();
        drop(sub);

        assert!(!broker.unsubscribe(&topic(), 999));
        assert_eq!(broker.subscriber_count(&topic()), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker: Broker<u32> = Broker::new(8);
        let sub = broker.subscribe(topic());
        assert_eq!(broker.subscriber_count(&topic()), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(&topic()), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_preloaded_events_come_first() {
        let broker = Broker::new(8);
        let mut sub = broker.subscribe_with(topic(), [0]);
        broker.publish(&topic(), 1);

        assert_eq!(sub.recv().await, Some(0));
        assert_eq!(sub.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_preloaded_events_survive_overflow() {
        let broker = Broker::new(2);
        let mut sub = broker.subscribe_with(topic(), [0]);
        for i in 1..=5 {
            broker.publish(&topic(), i);
        }

        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.try_recv(), Some(0));
        assert_eq!(sub.try_recv(), Some(4));
        assert_eq!(sub.try_recv(), Some(5));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_preloaded_events_do_not_trip_disconnect() {
        let broker = Broker::with_policy(1, OverflowPolicy::Disconnect);
        let mut sub = broker.subscribe_with(topic(), [0, 1]);

        assert_eq!(broker.publish(&topic(), 2), 1);
        assert!(!sub.is_closed());
        assert_eq!(sub.try_recv(), Some(0));
        assert_eq!(sub.try_recv(), Some(1));
        assert_eq!(sub.try_recv(), Some(2));
    }

    #[tokio::test]
    async fn test_stuck_subscriber_does_not_block_publish() {
        let broker = Broker::new(4);
        let mut fast = broker.subscribe(topic());
        let stuck = broker.subscribe(topic());

        let publisher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    broker.publish(&topic(), i);
                }
            })
        };
        tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publish blocked on a stuck subscriber")
            .unwrap();

        assert_eq!(stuck.dropped(), 96);
        // the fast reader still sees the newest events in order
        let mut received = Vec::new();
        while let Some(event) = fast.try_recv() {
            received.push(event);
        }
        assert_eq!(received, vec![96, 97, 98, 99]);
    }

    #[tokio::test]
    async fn test_disconnect_policy_closes_full_mailbox() {
        let broker = Broker::with_policy(2, OverflowPolicy::Disconnect);
        let mut sub = broker.subscribe(topic());

        assert_eq!(broker.publish(&topic(), 1), 1);
        assert_eq!(broker.publish(&topic(), 2), 1);
        assert_eq!(broker.publish(&topic(), 3), 0);

        assert!(sub.is_closed());
        assert_eq!(sub.recv().await, None);
        assert_eq!(broker.subscriber_count(&topic()), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let broker = Broker::new(8);
        let mut sub = broker.subscribe(topic());

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish(&topic(), 7);

        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let broker: Broker<u32> = Broker::new(8);
        let mut a = broker.subscribe(topic());
        let mut b = broker.subscribe(Topic::new("other"));

        broker.close_all();

        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert_eq!(broker.topic_count(), 0);
    }

    #[test]
    fn test_live_log_topics_are_per_session() {
        let run = RunRef::new("acme", "widgets", "main", 42);
        let a = Topic::live_log(&run, Uuid::new_v4());
        let b = Topic::live_log(&run, Uuid::new_v4());

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("logs/acme/widgets/main/42#"));
    }
}
