/// Database row types — these map directly to SQLite rows.
/// Distinct from murmur-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub image: Option<String>,
    pub is_online: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub seen: bool,
    pub created_at: String,
}

pub struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub image: Option<String>,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub body: String,
    pub created_at: String,
}

pub struct LikeRow {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
}

pub struct FollowRow {
    pub id: i64,
    pub user_id: i64,
    pub follower_id: i64,
}

/// A notification row joined with its author profile and optional post,
/// loaded in one query to avoid N+1 hydration.
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub author_id: i64,
    pub follow_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub like_id: Option<i64>,
    pub post_id: Option<i64>,
    pub seen: bool,
    pub created_at: String,

    pub author_username: String,
    pub author_full_name: String,
    pub author_image: Option<String>,
    pub author_online: bool,

    pub post_author_id: Option<i64>,
    pub post_title: Option<String>,
    pub post_image: Option<String>,
    pub post_created_at: Option<String>,
}
