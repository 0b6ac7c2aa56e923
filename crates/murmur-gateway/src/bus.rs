use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use murmur_types::events::{MessageEvent, NotificationEvent, PresenceEvent};
use murmur_types::UserId;

use crate::filter::{EventFilter, MessageFilter, NotificationFilter, PresenceFilter};

/// Per-subscription delivery queue depth.
///
/// Queue policy: **drop-newest**. When a subscriber's queue is full the event
/// being published is dropped for that subscriber only; the publisher never
/// blocks and other subscribers are unaffected. There is no persistence or
/// replay — a subscriber registered after publish never sees that event.
pub const DELIVERY_QUEUE_CAPACITY: usize = 64;

/// One named event channel. Every registered subscription gets its own
/// bounded FIFO queue, so per-subscriber delivery order equals publish order
/// on this topic; there is no cross-topic ordering.
pub struct Topic<F: EventFilter> {
    name: &'static str,
    capacity: usize,
    ids: Arc<AtomicU64>,
    subscribers: RwLock<HashMap<u64, TopicEntry<F>>>,
    dropped: AtomicU64,
}

struct TopicEntry<F: EventFilter> {
    filter: F,
    tx: mpsc::Sender<F::Event>,
}

impl<F: EventFilter> Topic<F> {
    fn new(name: &'static str, ids: Arc<AtomicU64>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity,
            ids,
            subscribers: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Deliver to every current subscriber whose filter accepts the event.
    /// At-least-once, best-effort; see `DELIVERY_QUEUE_CAPACITY` for the
    /// full-queue policy.
    fn publish(&self, event: F::Event) {
        let subs = self.subscribers.read().expect("bus registry poisoned");
        for (id, entry) in subs.iter() {
            if !entry.filter.accepts(&event) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("{}: subscriber {} queue full, event dropped", self.name, id);
                }
                // Receiver already gone; its cancel handle removes the entry.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    fn subscribe(self: &Arc<Self>, filter: F) -> Subscription<F> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .write()
            .expect("bus registry poisoned")
            .insert(id, TopicEntry { filter, tx });
        debug!("{}: subscription {} registered", self.name, id);
        Subscription {
            handle: SubscriptionHandle {
                id,
                topic: self.clone(),
            },
            rx,
        }
    }

    /// Idempotent: removing an already-removed id is a no-op.
    fn unsubscribe(&self, id: u64) {
        if self
            .subscribers
            .write()
            .expect("bus registry poisoned")
            .remove(&id)
            .is_some()
        {
            debug!("{}: subscription {} removed", self.name, id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("bus registry poisoned").len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A live, filtered listener on one topic. Dropping it unsubscribes
/// synchronously.
pub struct Subscription<F: EventFilter> {
    handle: SubscriptionHandle<F>,
    rx: mpsc::Receiver<F::Event>,
}

impl<F: EventFilter> Subscription<F> {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    pub async fn recv(&mut self) -> Option<F::Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<F::Event, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// A handle that can cancel this subscription from another task.
    pub fn cancel_handle(&self) -> SubscriptionHandle<F> {
        self.handle.clone()
    }
}

impl<F: EventFilter> Drop for Subscription<F> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

pub struct SubscriptionHandle<F: EventFilter> {
    id: u64,
    topic: Arc<Topic<F>>,
}

impl<F: EventFilter> Clone for SubscriptionHandle<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            topic: self.topic.clone(),
        }
    }
}

impl<F: EventFilter> SubscriptionHandle<F> {
    pub fn cancel(&self) {
        self.topic.unsubscribe(self.id);
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Object-safe cancel interface so a connection can hold handles for
/// subscriptions across all three topics in one registry.
pub trait CancelSubscription: Send + Sync {
    fn cancel(&self);
    fn id(&self) -> u64;
}

impl<F: EventFilter> CancelSubscription for SubscriptionHandle<F> {
    fn cancel(&self) {
        SubscriptionHandle::cancel(self);
    }

    fn id(&self) -> u64 {
        self.id
    }
}

/// The in-process publish/subscribe hub. Explicitly constructed and passed
/// by handle to every mutation handler and every connection — no ambient
/// global. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    messages: Arc<Topic<MessageFilter>>,
    notifications: Arc<Topic<NotificationFilter>>,
    presence: Arc<Topic<PresenceFilter>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_capacity(DELIVERY_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        // Subscription ids are unique across topics so a connection can key
        // its unsubscribe map by id alone.
        let ids = Arc::new(AtomicU64::new(1));
        Self {
            inner: Arc::new(BusInner {
                messages: Topic::new("message-created", ids.clone(), capacity),
                notifications: Topic::new("notification-changed", ids.clone(), capacity),
                presence: Topic::new("presence-changed", ids, capacity),
            }),
        }
    }

    pub fn publish_message_created(&self, event: MessageEvent) {
        self.inner.messages.publish(event);
    }

    pub fn publish_notification_changed(&self, event: NotificationEvent) {
        self.inner.notifications.publish(event);
    }

    pub fn publish_presence_changed(&self, event: PresenceEvent) {
        self.inner.presence.publish(event);
    }

    pub fn subscribe_messages(
        &self,
        auth_user_id: Option<UserId>,
        counterpart_id: UserId,
    ) -> Subscription<MessageFilter> {
        self.inner.messages.subscribe(MessageFilter {
            auth_user_id,
            counterpart_id,
        })
    }

    pub fn subscribe_notifications(
        &self,
        auth_user_id: Option<UserId>,
    ) -> Subscription<NotificationFilter> {
        self.inner
            .notifications
            .subscribe(NotificationFilter { auth_user_id })
    }

    pub fn subscribe_presence(&self, watched_user_id: UserId) -> Subscription<PresenceFilter> {
        self.inner
            .presence
            .subscribe(PresenceFilter { watched_user_id })
    }

    pub fn message_topic(&self) -> &Topic<MessageFilter> {
        &self.inner.messages
    }

    pub fn notification_topic(&self) -> &Topic<NotificationFilter> {
        &self.inner.notifications
    }

    pub fn presence_topic(&self) -> &Topic<PresenceFilter> {
        &self.inner.presence
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_types::events::{NotificationOperation, PresenceEvent};
    use murmur_types::models::{Notification, NotificationPayload, UserProfile};

    fn profile(id: UserId) -> UserProfile {
        UserProfile {
            id,
            username: format!("user{}", id),
            full_name: format!("User {}", id),
            image: None,
            is_online: true,
        }
    }

    fn message(id: i64, sender: UserId, receiver: UserId) -> MessageEvent {
        MessageEvent {
            id,
            sender: profile(sender),
            receiver: profile(receiver),
            body: format!("message {}", id),
            seen: false,
            created_at: Utc::now(),
        }
    }

    fn like_notification(recipient: UserId) -> NotificationEvent {
        NotificationEvent {
            operation: NotificationOperation::Create,
            notification: Notification {
                id: 1,
                user_id: recipient,
                author: profile(9),
                payload: NotificationPayload::Like { like_id: 2, post_id: 3 },
                post: None,
                seen: false,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn message_fan_out_reaches_matching_pairs_only() {
        let bus = EventBus::new();
        let mut sub_ab = bus.subscribe_messages(Some(1), 2);
        let mut sub_ba = bus.subscribe_messages(Some(2), 1);
        let mut sub_other = bus.subscribe_messages(Some(3), 4);

        bus.publish_message_created(message(10, 1, 2));

        assert_eq!(sub_ab.try_recv().unwrap().id, 10);
        assert_eq!(sub_ba.try_recv().unwrap().id, 10);
        assert!(sub_other.try_recv().is_err());
    }

    #[test]
    fn notification_fan_out_is_recipient_scoped() {
        let bus = EventBus::new();
        let mut sub_five = bus.subscribe_notifications(Some(5));
        let mut sub_six = bus.subscribe_notifications(Some(6));

        bus.publish_notification_changed(like_notification(5));

        let got = sub_five.try_recv().unwrap();
        assert_eq!(got.notification.user_id, 5);
        assert_eq!(got.operation, NotificationOperation::Create);
        assert!(sub_six.try_recv().is_err());
    }

    #[test]
    fn per_subscriber_delivery_preserves_publish_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_messages(Some(1), 2);

        for i in 0..5 {
            bus.publish_message_created(message(i, 1, 2));
        }
        for i in 0..5 {
            assert_eq!(sub.try_recv().unwrap().id, i);
        }
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_newest_for_that_subscriber_only() {
        let bus = EventBus::with_queue_capacity(2);
        let mut slow = bus.subscribe_messages(Some(1), 2);
        let mut fast = bus.subscribe_messages(Some(2), 1);

        bus.publish_message_created(message(1, 1, 2));
        bus.publish_message_created(message(2, 1, 2));
        // Slow subscriber's queue is now full; drain the fast one first.
        assert_eq!(fast.try_recv().unwrap().id, 1);
        assert_eq!(fast.try_recv().unwrap().id, 2);

        bus.publish_message_created(message(3, 1, 2));

        // Newest event dropped for the slow subscriber...
        assert_eq!(slow.try_recv().unwrap().id, 1);
        assert_eq!(slow.try_recv().unwrap().id, 2);
        assert!(slow.try_recv().is_err());
        assert_eq!(bus.message_topic().dropped_count(), 1);
        // ...but delivered to the one that kept up.
        assert_eq!(fast.try_recv().unwrap().id, 3);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe_presence(7);
        assert_eq!(bus.presence_topic().subscriber_count(), 1);

        let handle = sub.cancel_handle();
        handle.cancel();
        handle.cancel();
        assert_eq!(bus.presence_topic().subscriber_count(), 0);

        // Drop runs cancel a third time; still fine.
        drop(sub);
        assert_eq!(bus.presence_topic().subscriber_count(), 0);
    }

    #[test]
    fn dropped_subscription_receives_nothing_further() {
        let bus = EventBus::new();
        let sub = bus.subscribe_presence(7);
        drop(sub);

        assert_eq!(bus.presence_topic().subscriber_count(), 0);
        // Publishing into an empty registry is a no-op, not an error.
        bus.publish_presence_changed(PresenceEvent {
            user_id: 7,
            online: true,
            at: Utc::now(),
        });
    }

    #[test]
    fn subscription_ids_are_unique_across_topics() {
        let bus = EventBus::new();
        let a = bus.subscribe_messages(Some(1), 2);
        let b = bus.subscribe_notifications(Some(1));
        let c = bus.subscribe_presence(2);
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_ne!(a.id(), c.id());
    }
}
