use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Notification, UserProfile};
use crate::UserId;

/// A newly created message, hydrated with both participant profiles so
/// subscribers can render it without a follow-up query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: i64,
    pub sender: UserProfile,
    pub receiver: UserProfile,
    pub body: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationOperation {
    Create,
    Delete,
}

/// Published when a notification is created or deleted. For deletions the
/// notification is the pre-deletion snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub operation: NotificationOperation,
    pub notification: Notification,
}

/// An online/offline edge transition. Repeated sets of the same flag never
/// produce an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub online: bool,
    pub at: DateTime<Utc>,
}

/// Events sent from the server to a WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection is authenticated and ready for commands.
    Ready { user_id: UserId, username: String },

    /// Acknowledges a subscribe command with the id to use for Unsubscribe.
    Subscribed { subscription_id: u64 },

    MessageCreated(MessageEvent),

    NotificationChanged(NotificationEvent),

    PresenceChanged(PresenceEvent),
}

/// Commands sent from a WebSocket client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Live messages exchanged with one counterpart, either direction.
    SubscribeMessages { user_id: UserId },

    /// Create/delete events for the authenticated user's notifications.
    SubscribeNotifications,

    /// Online/offline transitions of one watched user.
    SubscribePresence { user_id: UserId },

    Unsubscribe { subscription_id: u64 },
}
