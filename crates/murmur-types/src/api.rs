use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Notification, UserProfile};
use crate::UserId;

// -- JWT Claims --

/// JWT claims shared between murmur-api (REST middleware) and the server's
/// WebSocket upgrade handler. Canonical definition lives here in murmur-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigninRequest {
    pub email_or_username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SigninResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

/// `GET /me` — profile plus unseen summaries, assembled at read time.
#[derive(Debug, Serialize)]
pub struct AuthUserResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub new_notifications: Vec<Notification>,
    pub new_conversations: Vec<UnseenConversation>,
}

/// Stub for a conversation with unseen messages, shown on login.
#[derive(Debug, Serialize)]
pub struct UnseenConversation {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub image: Option<String>,
    pub last_message: String,
    pub last_message_created_at: DateTime<Utc>,
}

// -- Messages & conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub sender: UserProfile,
    pub receiver: UserProfile,
    pub body: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Derived "most recent exchange per counterpart" view. Recomputed on each
/// read, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub image: Option<String>,
    pub is_online: bool,
    pub last_message: String,
    pub last_message_created_at: DateTime<Utc>,
    /// True iff the viewing user sent the last message.
    pub last_message_sender: bool,
    pub seen: bool,
}

#[derive(Debug, Serialize)]
pub struct SeenResponse {
    pub updated: usize,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNotificationRequest {
    /// Recipient.
    pub user_id: UserId,
    pub author_id: UserId,
    /// One of "follow", "comment", "like".
    pub kind: String,
    /// Id of the follow/comment/like the notification refers to.
    pub type_id: i64,
    /// Required for comment and like kinds.
    pub post_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub count: i64,
}

// -- User browsing --

#[derive(Debug, Serialize)]
pub struct UserPage {
    pub users: Vec<UserProfile>,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

// -- Posts & social graph --

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
}

fn default_page_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub title: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostPage {
    pub posts: Vec<crate::models::Post>,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub post_id: i64,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLikeRequest {
    pub post_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFollowRequest {
    /// The user to follow.
    pub user_id: UserId,
}
