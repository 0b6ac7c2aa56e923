use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use murmur_types::api::{Claims, CreateCommentRequest, CreateFollowRequest, CreateLikeRequest};
use murmur_types::models::{Comment, Follow, Like};

use crate::error::ApiError;
use crate::{run_blocking, AppState};

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::Validation("comment body cannot be empty".into()));
    }

    let author_id = claims.sub;
    let db = state.db.clone();
    let row = run_blocking(move || {
        if db.get_post(req.post_id)?.is_none() {
            return Ok(None);
        }
        let row = db.create_comment(req.post_id, author_id, req.body.trim())?;
        Ok(Some(row))
    })
    .await?
    .ok_or(ApiError::NotFound("post"))?;

    Ok((
        StatusCode::CREATED,
        Json(Comment {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            body: row.body,
            created_at: murmur_db::parse_created_at(&row.created_at),
        }),
    ))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let author_id = claims.sub;
    let db = state.db.clone();
    let owned = run_blocking(move || {
        let Some(comment) = db.get_comment(id)? else {
            return Ok(None);
        };
        if comment.author_id != author_id {
            return Ok(Some(false));
        }
        db.delete_comment(id)?;
        Ok(Some(true))
    })
    .await?
    .ok_or(ApiError::NotFound("comment"))?;

    if !owned {
        return Err(ApiError::Unauthorized);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateLikeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let row = run_blocking(move || {
        if db.get_post(req.post_id)?.is_none() {
            return Ok(None);
        }
        let row = db.create_like(req.post_id, user_id)?;
        Ok(Some(row))
    })
    .await
    .map_err(like_conflict)?
    .ok_or(ApiError::NotFound("post"))?;

    Ok((
        StatusCode::CREATED,
        Json(Like {
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
        }),
    ))
}

pub async fn delete_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();
    let owned = run_blocking(move || {
        let Some(like) = db.get_like(id)? else {
            return Ok(None);
        };
        if like.user_id != user_id {
            return Ok(Some(false));
        }
        db.delete_like(id)?;
        Ok(Some(true))
    })
    .await?
    .ok_or(ApiError::NotFound("like"))?;

    if !owned {
        return Err(ApiError::Unauthorized);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFollowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let follower_id = claims.sub;
    if req.user_id == follower_id {
        return Err(ApiError::Validation("you cannot follow yourself".into()));
    }

    let db = state.db.clone();
    let row = run_blocking(move || {
        if db.get_user_by_id(req.user_id)?.is_none() {
            return Ok(None);
        }
        let row = db.create_follow(req.user_id, follower_id)?;
        Ok(Some(row))
    })
    .await
    .map_err(follow_conflict)?
    .ok_or(ApiError::NotFound("user"))?;

    Ok((
        StatusCode::CREATED,
        Json(Follow {
            id: row.id,
            user_id: row.user_id,
            follower_id: row.follower_id,
        }),
    ))
}

pub async fn delete_follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let follower_id = claims.sub;
    let db = state.db.clone();
    let owned = run_blocking(move || {
        let Some(follow) = db.get_follow(id)? else {
            return Ok(None);
        };
        if follow.follower_id != follower_id {
            return Ok(Some(false));
        }
        db.delete_follow(id)?;
        Ok(Some(true))
    })
    .await?
    .ok_or(ApiError::NotFound("follow"))?;

    if !owned {
        return Err(ApiError::Unauthorized);
    }
    Ok(StatusCode::NO_CONTENT)
}

// UNIQUE(post_id, user_id) / UNIQUE(user_id, follower_id) violations surface
// as 409s, not 500s.
fn like_conflict(e: ApiError) -> ApiError {
    remap_unique(e, "post already liked")
}

fn follow_conflict(e: ApiError) -> ApiError {
    remap_unique(e, "already following this user")
}

fn remap_unique(e: ApiError, message: &str) -> ApiError {
    match e {
        ApiError::Storage(inner) if inner.to_string().contains("UNIQUE constraint failed") => {
            ApiError::Conflict(message.into())
        }
        other => other,
    }
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

    fn claims(user_id: i64) -> Claims {
        Claims {
            sub: user_id,
            username: format!("user{}", user_id),
            exp: usize::MAX,
        }
    }

    #[tokio::test]
    async fn only_the_author_can_delete_a_comment() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let post = state.db.create_post(alice, "topic", None).unwrap();
        let comment = state.db.create_comment(post.id, bob, "mine").unwrap();

        let denied = delete_comment(
            State(state.clone()),
            Extension(claims(alice)),
            Path(comment.id),
        )
        .await;
        assert!(matches!(denied.err().unwrap(), ApiError::Unauthorized));
        assert!(state.db.get_comment(comment.id).unwrap().is_some());

        let allowed = delete_comment(
            State(state.clone()),
            Extension(claims(bob)),
            Path(comment.id),
        )
        .await;
        assert!(allowed.is_ok());
        assert!(state.db.get_comment(comment.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn only_the_liker_can_remove_a_like() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let post = state.db.create_post(alice, "topic", None).unwrap();
        let like = state.db.create_like(post.id, bob).unwrap();

        let denied = delete_like(
            State(state.clone()),
            Extension(claims(alice)),
            Path(like.id),
        )
        .await;
        assert!(matches!(denied.err().unwrap(), ApiError::Unauthorized));

        let allowed = delete_like(
            State(state.clone()),
            Extension(claims(bob)),
            Path(like.id),
        )
        .await;
        assert!(allowed.is_ok());
        assert!(state.db.get_like(like.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn only_the_follower_can_unfollow() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let follow = state.db.create_follow(alice, bob).unwrap();

        // The followed user cannot sever someone else's follow.
        let denied = delete_follow(
            State(state.clone()),
            Extension(claims(alice)),
            Path(follow.id),
        )
        .await;
        assert!(matches!(denied.err().unwrap(), ApiError::Unauthorized));

        let allowed = delete_follow(
            State(state.clone()),
            Extension(claims(bob)),
            Path(follow.id),
        )
        .await;
        assert!(allowed.is_ok());
        assert!(state.db.get_follow(follow.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_missing_comment_is_not_found() {
        let state = test_state();
        let alice = seed_user(&state, "alice");

        let res = delete_comment(State(state), Extension(claims(alice)), Path(999)).await;
        assert!(matches!(res.err().unwrap(), ApiError::NotFound("comment")));
    }
}
