use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::debug;

use murmur_db::models::NotificationRecord;
use murmur_db::parse_created_at;
use murmur_types::api::{Claims, CreateNotificationRequest, NotificationPage, PageQuery, SeenResponse};
use murmur_types::events::{NotificationEvent, NotificationOperation};
use murmur_types::models::{Notification, NotificationPayload, Post, UserProfile};

use crate::error::ApiError;
use crate::{run_blocking, AppState};

const MAX_PAGE_LIMIT: u32 = 100;

/// Turns a joined storage record into the hydrated model. A record whose
/// reference columns don't resolve to exactly one payload arm is corrupt
/// and surfaces as a storage error, never as a half-built notification.
pub(crate) fn hydrate(record: NotificationRecord) -> Result<Notification, ApiError> {
    let payload = match (record.follow_id, record.comment_id, record.like_id) {
        (Some(follow_id), None, None) => NotificationPayload::Follow { follow_id },
        (None, Some(comment_id), None) => {
            let post_id = record.post_id.ok_or_else(|| {
                ApiError::Storage(anyhow::anyhow!(
                    "comment notification {} has no post_id",
                    record.id
                ))
            })?;
            NotificationPayload::Comment { comment_id, post_id }
        }
        (None, None, Some(like_id)) => {
            let post_id = record.post_id.ok_or_else(|| {
                ApiError::Storage(anyhow::anyhow!(
                    "like notification {} has no post_id",
                    record.id
                ))
            })?;
            NotificationPayload::Like { like_id, post_id }
        }
        _ => {
            return Err(ApiError::Storage(anyhow::anyhow!(
                "notification {} does not reference exactly one of follow/comment/like",
                record.id
            )))
        }
    };

    let post = match (record.post_id, record.post_author_id, record.post_title) {
        (Some(id), Some(author_id), Some(title)) => Some(Post {
            id,
            author_id,
            title,
            image: record.post_image,
            created_at: record
                .post_created_at
                .as_deref()
                .map(parse_created_at)
                .unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Notification {
        id: record.id,
        user_id: record.user_id,
        author: UserProfile {
            id: record.author_id,
            username: record.author_username,
            full_name: record.author_full_name,
            image: record.author_image,
            is_online: record.author_online,
        },
        payload,
        post,
        seen: record.seen,
        created_at: parse_created_at(&record.created_at),
    })
}

/// Validates, persists and publishes one notification. The row is committed
/// before the CREATE event goes out, and nothing is published on any
/// rejection path.
pub async fn create_notification_inner(
    state: &AppState,
    req: CreateNotificationRequest,
) -> Result<Notification, ApiError> {
    let payload = NotificationPayload::from_parts(&req.kind, req.type_id, req.post_id)
        .ok_or_else(|| match req.kind.to_ascii_lowercase().as_str() {
            "comment" | "like" => {
                ApiError::Validation(format!("post_id is required for '{}' notifications", req.kind))
            }
            _ => ApiError::Validation(format!("unrecognized notification kind '{}'", req.kind)),
        })?;

    let db = state.db.clone();
    let recipient = req.user_id;
    let author = req.author_id;
    let record = run_blocking(move || {
        if db.get_user_by_id(recipient)?.is_none() {
            return Ok(Err(ApiError::NotFound("recipient")));
        }
        if db.get_user_by_id(author)?.is_none() {
            return Ok(Err(ApiError::NotFound("author")));
        }
        // The typed ref must resolve to a live row, and for comment/like it
        // must actually belong to the given post. Checked before the insert
        // so no dangling payload reference is ever stored.
        match &payload {
            NotificationPayload::Follow { follow_id } => {
                if db.get_follow(*follow_id)?.is_none() {
                    return Ok(Err(ApiError::NotFound("follow")));
                }
            }
            NotificationPayload::Comment { comment_id, post_id } => {
                match db.get_comment(*comment_id)? {
                    Some(comment) if comment.post_id == *post_id => {}
                    _ => return Ok(Err(ApiError::NotFound("comment"))),
                }
            }
            NotificationPayload::Like { like_id, post_id } => {
                match db.get_like(*like_id)? {
                    Some(like) if like.post_id == *post_id => {}
                    _ => return Ok(Err(ApiError::NotFound("like"))),
                }
            }
        }
        let id = db.create_notification(recipient, author, &payload)?;
        let record = db
            .get_notification(id)?
            .ok_or_else(|| anyhow::anyhow!("notification {} vanished after insert", id))?;
        Ok(Ok(record))
    })
    .await??;

    let notification = hydrate(record)?;
    debug!(
        id = notification.id,
        recipient = notification.user_id,
        kind = notification.payload.kind(),
        "notification created"
    );

    state.bus.publish_notification_changed(NotificationEvent {
        operation: NotificationOperation::Create,
        notification: notification.clone(),
    });

    Ok(notification)
}

/// Deletes one notification and publishes a DELETE event carrying its
/// pre-deletion snapshot. Missing id is a not-found, and publishes nothing.
pub async fn delete_notification_inner(
    state: &AppState,
    id: i64,
) -> Result<Notification, ApiError> {
    let db = state.db.clone();
    let record = run_blocking(move || {
        let Some(record) = db.get_notification(id)? else {
            return Ok(None);
        };
        db.delete_notification(id)?;
        Ok(Some(record))
    })
    .await?
    .ok_or(ApiError::NotFound("notification"))?;

    let notification = hydrate(record)?;
    debug!(id = notification.id, "notification deleted");

    state.bus.publish_notification_changed(NotificationEvent {
        operation: NotificationOperation::Delete,
        notification: notification.clone(),
    });

    Ok(notification)
}

pub async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = create_notification_inner(&state, req).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = delete_notification_inner(&state, id).await?;
    Ok(Json(notification))
}

/// `GET /notifications?skip=0&limit=20` — one page, newest first, plus the
/// recipient's total count.
pub async fn get_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let skip = page.skip;
    let limit = page.limit.min(MAX_PAGE_LIMIT);

    let db = state.db.clone();
    let (records, count) = run_blocking(move || {
        let records = db.list_notifications(user_id, skip, limit)?;
        let count = db.count_notifications(user_id)?;
        Ok((records, count))
    })
    .await?;

    let notifications = records
        .into_iter()
        .map(hydrate)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(NotificationPage { notifications, count }))
}

/// Marks all of the caller's unseen notifications seen. Succeeds silently
/// when there is nothing to update.
pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let updated = run_blocking(move || db.mark_notifications_seen(user_id)).await?;
    Ok(Json(SeenResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use murmur_db::Database;
    use murmur_gateway::bus::EventBus;

    use crate::AppStateInner;

    fn test_state() -> AppState {
        let db = Database::open_in_memory().unwrap();
        Arc::new(AppStateInner {
            db: Arc::new(db),
            bus: EventBus::new(),
            jwt_secret: "test-secret".into(),
        })
    }

    fn seed_user(state: &AppState, username: &str) -> i64 {
        state
            .db
            .create_user(username, "Full Name", &format!("{}@test.io", username), "hash")
            .unwrap()
    }

    fn follow_request(user_id: i64, author_id: i64, follow_id: i64) -> CreateNotificationRequest {
        CreateNotificationRequest {
            user_id,
            author_id,
            kind: "follow".into(),
            type_id: follow_id,
            post_id: None,
        }
    }

    #[tokio::test]
    async fn create_follow_notification_persists_and_publishes_once() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let follow = state.db.create_follow(alice, bob).unwrap();
        let mut sub = state.bus.subscribe_notifications(Some(alice));

        let created = create_notification_inner(&state, follow_request(alice, bob, follow.id))
            .await
            .unwrap();

        assert_eq!(created.user_id, alice);
        assert_eq!(created.author.id, bob);
        assert!(matches!(
            created.payload,
            NotificationPayload::Follow { follow_id } if follow_id == follow.id
        ));
        assert!(!created.seen);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.operation, NotificationOperation::Create);
        assert_eq!(event.notification.id, created.id);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected_before_any_write() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mut sub = state.bus.subscribe_notifications(Some(alice));

        let req = CreateNotificationRequest {
            user_id: alice,
            author_id: bob,
            kind: "banana".into(),
            type_id: 1,
            post_id: None,
        };
        let err = create_notification_inner(&state, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        assert_eq!(state.db.count_notifications(alice).unwrap(), 0);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn comment_without_post_id_is_a_validation_error() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let req = CreateNotificationRequest {
            user_id: alice,
            author_id: bob,
            kind: "comment".into(),
            type_id: 3,
            post_id: None,
        };
        let err = create_notification_inner(&state, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg.contains("post_id")));
    }

    #[tokio::test]
    async fn like_notification_carries_the_post() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let post = state.db.create_post(alice, "sunset", None).unwrap();
        let like = state.db.create_like(post.id, bob).unwrap();

        let req = CreateNotificationRequest {
            user_id: alice,
            author_id: bob,
            kind: "like".into(),
            type_id: like.id,
            post_id: Some(post.id),
        };
        let created = create_notification_inner(&state, req).await.unwrap();

        let attached = created.post.expect("post attached");
        assert_eq!(attached.id, post.id);
        assert_eq!(attached.title, "sunset");
        assert_eq!(attached.author_id, alice);
    }

    #[tokio::test]
    async fn dangling_follow_ref_is_rejected_before_any_write() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mut sub = state.bus.subscribe_notifications(Some(alice));

        let err = create_notification_inner(&state, follow_request(alice, bob, 999))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("follow")));

        assert_eq!(state.db.count_notifications(alice).unwrap(), 0);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn comment_ref_must_belong_to_the_given_post() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let post = state.db.create_post(alice, "first", None).unwrap();
        let other = state.db.create_post(alice, "second", None).unwrap();
        let comment = state.db.create_comment(post.id, bob, "hi").unwrap();

        let req = CreateNotificationRequest {
            user_id: alice,
            author_id: bob,
            kind: "comment".into(),
            type_id: comment.id,
            post_id: Some(other.id),
        };
        let err = create_notification_inner(&state, req).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("comment")));
        assert_eq!(state.db.count_notifications(alice).unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_publishes_the_snapshot_once() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let follow = state.db.create_follow(alice, bob).unwrap();
        let created = create_notification_inner(&state, follow_request(alice, bob, follow.id))
            .await
            .unwrap();

        let mut sub = state.bus.subscribe_notifications(Some(alice));
        let deleted = delete_notification_inner(&state, created.id).await.unwrap();
        assert_eq!(deleted.id, created.id);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.operation, NotificationOperation::Delete);
        assert_eq!(event.notification.id, created.id);
        assert_eq!(event.notification.user_id, alice);
        assert!(sub.try_recv().is_err());

        assert_eq!(state.db.count_notifications(alice).unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_missing_notification_is_not_found_and_silent() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let mut sub = state.bus.subscribe_notifications(Some(alice));

        let err = delete_notification_inner(&state, 999).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(sub.try_recv().is_err());
    }
}
