use murmur_types::events::{MessageEvent, NotificationEvent, PresenceEvent};
use murmur_types::UserId;

/// A subscription's delivery predicate: pure, side-effect-free, matched
/// against every event published on its topic. Filter context is captured as
/// plain struct fields at subscribe time, never as a live-request closure,
/// so filters stay testable without a connection.
pub trait EventFilter: Send + Sync + 'static {
    type Event: Clone + Send + 'static;

    fn accepts(&self, event: &Self::Event) -> bool;
}

/// Matches messages exchanged between the authenticated user and one
/// counterpart, in either direction. A missing auth context accepts nothing.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pub auth_user_id: Option<UserId>,
    pub counterpart_id: UserId,
}

impl EventFilter for MessageFilter {
    type Event = MessageEvent;

    fn accepts(&self, event: &MessageEvent) -> bool {
        let Some(auth) = self.auth_user_id else {
            return false;
        };
        let pair = (event.sender.id, event.receiver.id);
        pair == (auth, self.counterpart_id) || pair == (self.counterpart_id, auth)
    }
}

/// Matches notifications addressed to the authenticated user.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub auth_user_id: Option<UserId>,
}

impl EventFilter for NotificationFilter {
    type Event = NotificationEvent;

    fn accepts(&self, event: &NotificationEvent) -> bool {
        self.auth_user_id == Some(event.notification.user_id)
    }
}

/// Matches online/offline transitions of one watched user.
#[derive(Debug, Clone)]
pub struct PresenceFilter {
    pub watched_user_id: UserId,
}

impl EventFilter for PresenceFilter {
    type Event = PresenceEvent;

    fn accepts(&self, event: &PresenceEvent) -> bool {
        event.user_id == self.watched_user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_types::models::UserProfile;

    fn profile(id: UserId) -> UserProfile {
        UserProfile {
            id,
            username: format!("user{}", id),
            full_name: format!("User {}", id),
            image: None,
            is_online: true,
        }
    }

    fn message(sender: UserId, receiver: UserId) -> MessageEvent {
        MessageEvent {
            id: 1,
            sender: profile(sender),
            receiver: profile(receiver),
            body: "hey".into(),
            seen: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn message_filter_matches_both_orientations() {
        let filter = MessageFilter {
            auth_user_id: Some(1),
            counterpart_id: 2,
        };
        assert!(filter.accepts(&message(1, 2)));
        assert!(filter.accepts(&message(2, 1)));
    }

    #[test]
    fn message_filter_rejects_other_pairs() {
        let filter = MessageFilter {
            auth_user_id: Some(1),
            counterpart_id: 2,
        };
        assert!(!filter.accepts(&message(1, 3)));
        assert!(!filter.accepts(&message(3, 2)));
        assert!(!filter.accepts(&message(3, 4)));
    }

    #[test]
    fn message_filter_fails_closed_without_auth() {
        let filter = MessageFilter {
            auth_user_id: None,
            counterpart_id: 2,
        };
        assert!(!filter.accepts(&message(1, 2)));
    }

    #[test]
    fn notification_filter_matches_recipient_only() {
        use murmur_types::events::{NotificationOperation, NotificationEvent};
        use murmur_types::models::{Notification, NotificationPayload};

        let event = |recipient: UserId| NotificationEvent {
            operation: NotificationOperation::Create,
            notification: Notification {
                id: 1,
                user_id: recipient,
                author: profile(9),
                payload: NotificationPayload::Follow { follow_id: 4 },
                post: None,
                seen: false,
                created_at: Utc::now(),
            },
        };

        let filter = NotificationFilter { auth_user_id: Some(5) };
        assert!(filter.accepts(&event(5)));
        assert!(!filter.accepts(&event(6)));

        let unauthenticated = NotificationFilter { auth_user_id: None };
        assert!(!unauthenticated.accepts(&event(5)));
    }

    #[test]
    fn presence_filter_matches_watched_user() {
        let filter = PresenceFilter { watched_user_id: 3 };
        let event = |user_id| PresenceEvent {
            user_id,
            online: true,
            at: Utc::now(),
        };
        assert!(filter.accepts(&event(3)));
        assert!(!filter.accepts(&event(4)));
    }
}
