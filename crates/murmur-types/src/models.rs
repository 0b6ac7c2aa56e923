use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Public profile fields attached to messages, conversations and
/// notifications. Never carries the password hash or email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub image: Option<String>,
    pub is_online: bool,
}

/// A direct message between two users. Immutable once created except the
/// `seen` flag, which only ever transitions false -> true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: UserId,
    pub title: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub post_id: i64,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub id: i64,
    /// The user being followed.
    pub user_id: UserId,
    pub follower_id: UserId,
}

/// The typed payload of a notification. Exactly one arm, fixed at creation —
/// this replaces the storage layer's three nullable foreign keys with a
/// variant that cannot represent a notification with zero or two payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationPayload {
    Follow { follow_id: i64 },
    Comment { comment_id: i64, post_id: i64 },
    Like { like_id: i64, post_id: i64 },
}

impl NotificationPayload {
    /// Builds a payload from the wire triple (kind, referenced id, post id).
    /// Returns `None` for an unrecognized kind, or for comment/like without
    /// a post id — callers treat that as a validation error before any write.
    pub fn from_parts(kind: &str, type_id: i64, post_id: Option<i64>) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "follow" => Some(Self::Follow { follow_id: type_id }),
            "comment" => post_id.map(|post_id| Self::Comment {
                comment_id: type_id,
                post_id,
            }),
            "like" => post_id.map(|post_id| Self::Like {
                like_id: type_id,
                post_id,
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Follow { .. } => "follow",
            Self::Comment { .. } => "comment",
            Self::Like { .. } => "like",
        }
    }

    pub fn post_id(&self) -> Option<i64> {
        match self {
            Self::Follow { .. } => None,
            Self::Comment { post_id, .. } | Self::Like { post_id, .. } => Some(*post_id),
        }
    }
}

/// A fully hydrated notification: the base record plus its author profile,
/// typed payload and, for comment/like, the associated post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    /// Recipient.
    pub user_id: UserId,
    pub author: UserProfile,
    pub payload: NotificationPayload,
    pub post: Option<Post>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_from_known_kinds() {
        assert!(matches!(
            NotificationPayload::from_parts("follow", 7, None),
            Some(NotificationPayload::Follow { follow_id: 7 })
        ));
        assert!(matches!(
            NotificationPayload::from_parts("Comment", 3, Some(9)),
            Some(NotificationPayload::Comment { comment_id: 3, post_id: 9 })
        ));
        assert!(matches!(
            NotificationPayload::from_parts("LIKE", 4, Some(2)),
            Some(NotificationPayload::Like { like_id: 4, post_id: 2 })
        ));
    }

    #[test]
    fn payload_rejects_unknown_kind() {
        assert!(NotificationPayload::from_parts("banana", 1, Some(1)).is_none());
    }

    #[test]
    fn comment_and_like_require_post_id() {
        assert!(NotificationPayload::from_parts("comment", 3, None).is_none());
        assert!(NotificationPayload::from_parts("like", 4, None).is_none());
    }
}
