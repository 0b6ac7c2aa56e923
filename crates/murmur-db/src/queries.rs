use anyhow::Result;
use rusqlite::Connection;

use murmur_types::models::NotificationPayload;

use crate::models::{
    CommentRow, FollowRow, LikeRow, MessageRow, NotificationRecord, PostRow, UserRow,
};
use crate::Database;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        full_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, full_name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (username, full_name, email, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", rusqlite::params![id]))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", rusqlite::params![username]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", rusqlite::params![email]))
    }

    /// Batch-fetch profiles for a set of user ids.
    pub fn get_users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, full_name, email, password, image, is_online, created_at
                 FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Everyone except the viewer, newest account first.
    pub fn list_users(&self, exclude: i64, skip: u32, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, email, password, image, is_online, created_at
                 FROM users WHERE id != ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![exclude, limit, skip], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_users(&self, exclude: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE id != ?1",
                [exclude],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Substring match on username or full name, viewer excluded.
    pub fn search_users(&self, query: &str, exclude: i64, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", query);
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, email, password, image, is_online, created_at
                 FROM users
                 WHERE id != ?1 AND (username LIKE ?2 OR full_name LIKE ?2)
                 ORDER BY username ASC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![exclude, pattern, limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Random users the viewer does not already follow.
    pub fn suggest_users(&self, user_id: i64, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, email, password, image, is_online, created_at
                 FROM users
                 WHERE id != ?1
                   AND id NOT IN (SELECT user_id FROM follows WHERE follower_id = ?1)
                 ORDER BY RANDOM() LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_user_online(&self, id: i64, online: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?1 WHERE id = ?2",
                rusqlite::params![online, id],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(&self, sender_id: i64, receiver_id: i64, body: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, body) VALUES (?1, ?2, ?3)",
                rusqlite::params![sender_id, receiver_id, body],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, sender_id, receiver_id, body, seen, created_at
                 FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )?;
            Ok(row)
        })
    }

    /// Full history between two users, either direction, oldest first.
    pub fn messages_between(&self, a: i64, b: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, body, seen, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every message the user sent or received, oldest first. Input to the
    /// conversation aggregator.
    pub fn messages_for_user(&self, user_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, body, seen, created_at
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Bulk seen update for a (sender, receiver) pair. Affecting zero rows
    /// is not an error.
    pub fn mark_messages_seen(&self, sender_id: i64, receiver_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET seen = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                rusqlite::params![sender_id, receiver_id],
            )?;
            Ok(updated)
        })
    }

    pub fn unseen_messages_for(&self, receiver_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, body, seen, created_at
                 FROM messages
                 WHERE receiver_id = ?1 AND seen = 0
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([receiver_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn create_notification(
        &self,
        user_id: i64,
        author_id: i64,
        payload: &NotificationPayload,
    ) -> Result<i64> {
        let (follow_id, comment_id, like_id) = match payload {
            NotificationPayload::Follow { follow_id } => (Some(*follow_id), None, None),
            NotificationPayload::Comment { comment_id, .. } => (None, Some(*comment_id), None),
            NotificationPayload::Like { like_id, .. } => (None, None, Some(*like_id)),
        };
        let post_id = payload.post_id();

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, author_id, follow_id, comment_id, like_id, post_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![user_id, author_id, follow_id, comment_id, like_id, post_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&notification_sql("n.id = ?1"))?;
            stmt.query_row([id], notification_from_row).optional()
        })
    }

    pub fn delete_notification(&self, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
            Ok(deleted)
        })
    }

    /// One page of the recipient's notifications, newest first.
    pub fn list_notifications(
        &self,
        user_id: i64,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} ORDER BY n.created_at DESC, n.id DESC LIMIT ?2 OFFSET ?3",
                notification_sql("n.user_id = ?1")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, skip], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_notifications(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn unseen_notifications(&self, user_id: i64) -> Result<Vec<NotificationRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} ORDER BY n.created_at DESC, n.id DESC",
                notification_sql("n.user_id = ?1 AND n.seen = 0")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_notifications_seen(&self, user_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET seen = 1 WHERE user_id = ?1 AND seen = 0",
                [user_id],
            )?;
            Ok(updated)
        })
    }

    // -- Posts --

    pub fn create_post(&self, author_id: i64, title: &str, image: Option<&str>) -> Result<PostRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (author_id, title, image) VALUES (?1, ?2, ?3)",
                rusqlite::params![author_id, title, image],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, author_id, title, image, created_at FROM posts WHERE id = ?1",
                [id],
                post_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, author_id, title, image, created_at FROM posts WHERE id = ?1",
                [id],
                post_from_row,
            )
            .optional()
        })
    }

    /// Deletes a post together with everything referencing it. The child
    /// tables have no ON DELETE CASCADE, so likes, comments and
    /// notifications go first, in one transaction.
    pub fn delete_post(&self, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM notifications WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM likes WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM comments WHERE post_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Explore feed: everyone's posts except the viewer's own, newest first.
    pub fn list_posts(&self, exclude_author: i64, skip: u32, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, title, image, created_at
                 FROM posts WHERE author_id != ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![exclude_author, limit, skip], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_posts(&self, exclude_author: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE author_id != ?1",
                [exclude_author],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Home feed: posts from followed users plus the viewer's own.
    pub fn list_followed_posts(&self, user_id: i64, skip: u32, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, title, image, created_at
                 FROM posts
                 WHERE author_id = ?1
                    OR author_id IN (SELECT user_id FROM follows WHERE follower_id = ?1)
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, skip], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_followed_posts(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM posts
                 WHERE author_id = ?1
                    OR author_id IN (SELECT user_id FROM follows WHERE follower_id = ?1)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// One author's posts, newest first.
    pub fn list_posts_by_author(&self, author_id: i64, skip: u32, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, title, image, created_at
                 FROM posts WHERE author_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![author_id, limit, skip], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_posts_by_author(&self, author_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                [author_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Comments --

    pub fn create_comment(&self, post_id: i64, author_id: i64, body: &str) -> Result<CommentRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO comments (post_id, author_id, body) VALUES (?1, ?2, ?3)",
                rusqlite::params![post_id, author_id, body],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, post_id, author_id, body, created_at FROM comments WHERE id = ?1",
                [id],
                |row| {
                    Ok(CommentRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        author_id: row.get(2)?,
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, post_id, author_id, body, created_at FROM comments WHERE id = ?1",
                [id],
                |row| {
                    Ok(CommentRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        author_id: row.get(2)?,
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_comment(&self, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(deleted)
        })
    }

    // -- Likes --

    pub fn create_like(&self, post_id: i64, user_id: i64) -> Result<LikeRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO likes (post_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![post_id, user_id],
            )?;
            Ok(LikeRow {
                id: conn.last_insert_rowid(),
                post_id,
                user_id,
            })
        })
    }

    pub fn get_like(&self, id: i64) -> Result<Option<LikeRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, post_id, user_id FROM likes WHERE id = ?1",
                [id],
                |row| {
                    Ok(LikeRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        user_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_like(&self, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM likes WHERE id = ?1", [id])?;
            Ok(deleted)
        })
    }

    // -- Follows --

    pub fn create_follow(&self, user_id: i64, follower_id: i64) -> Result<FollowRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO follows (user_id, follower_id) VALUES (?1, ?2)",
                rusqlite::params![user_id, follower_id],
            )?;
            Ok(FollowRow {
                id: conn.last_insert_rowid(),
                user_id,
                follower_id,
            })
        })
    }

    pub fn get_follow(&self, id: i64) -> Result<Option<FollowRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, follower_id FROM follows WHERE id = ?1",
                [id],
                |row| {
                    Ok(FollowRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        follower_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_follow(&self, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM follows WHERE id = ?1", [id])?;
            Ok(deleted)
        })
    }
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, full_name, email, password, image, is_online, created_at
         FROM users WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(params, user_from_row).optional()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        password: row.get(4)?,
        image: row.get(5)?,
        is_online: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        seen: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn post_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<PostRow, rusqlite::Error> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        image: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Notification rows are always loaded hydrated: JOIN the author profile and
/// LEFT JOIN the optional post in a single query.
fn notification_sql(predicate: &str) -> String {
    format!(
        "SELECT n.id, n.user_id, n.author_id, n.follow_id, n.comment_id, n.like_id, n.post_id,
                n.seen, n.created_at,
                u.username, u.full_name, u.image, u.is_online,
                p.author_id, p.title, p.image, p.created_at
         FROM notifications n
         JOIN users u ON n.author_id = u.id
         LEFT JOIN posts p ON n.post_id = p.id
         WHERE {}",
        predicate
    )
}

fn notification_from_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<NotificationRecord, rusqlite::Error> {
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        author_id: row.get(2)?,
        follow_id: row.get(3)?,
        comment_id: row.get(4)?,
        like_id: row.get(5)?,
        post_id: row.get(6)?,
        seen: row.get(7)?,
        created_at: row.get(8)?,
        author_username: row.get(9)?,
        author_full_name: row.get(10)?,
        author_image: row.get(11)?,
        author_online: row.get(12)?,
        post_author_id: row.get(13)?,
        post_title: row.get(14)?,
        post_image: row.get(15)?,
        post_created_at: row.get(16)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
