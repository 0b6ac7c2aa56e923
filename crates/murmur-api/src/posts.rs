use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use murmur_db::models::PostRow;
use murmur_db::parse_created_at;
use murmur_types::api::{Claims, CreatePostRequest, PageQuery, PostPage};
use murmur_types::models::Post;

use crate::error::ApiError;
use crate::{run_blocking, AppState};

const MAX_PAGE_LIMIT: u32 = 100;

pub(crate) fn post_from_row(row: &PostRow) -> Post {
    Post {
        id: row.id,
        author_id: row.author_id,
        title: row.title.clone(),
        image: row.image.clone(),
        created_at: parse_created_at(&row.created_at),
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() && req.image.is_none() {
        return Err(ApiError::Validation(
            "a post needs a title or an image".into(),
        ));
    }

    let author_id = claims.sub;
    let db = state.db.clone();
    let row = run_blocking(move || {
        db.create_post(author_id, req.title.trim(), req.image.as_deref())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(post_from_row(&row))))
}

/// `GET /posts/:id` — one post.
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let row = run_blocking(move || db.get_post(id))
        .await?
        .ok_or(ApiError::NotFound("post"))?;
    Ok(Json(post_from_row(&row)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let author_id = claims.sub;
    let db = state.db.clone();
    let deleted = run_blocking(move || {
        let Some(post) = db.get_post(id)? else {
            return Ok(None);
        };
        if post.author_id != author_id {
            return Ok(Some(false));
        }
        db.delete_post(id)?;
        Ok(Some(true))
    })
    .await?
    .ok_or(ApiError::NotFound("post"))?;

    if !deleted {
        return Err(ApiError::Unauthorized);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /posts` — everyone else's posts, newest first.
pub async fn get_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let skip = page.skip;
    let limit = page.limit.min(MAX_PAGE_LIMIT);

    let db = state.db.clone();
    let (rows, count) = run_blocking(move || {
        let rows = db.list_posts(viewer, skip, limit)?;
        let count = db.count_posts(viewer)?;
        Ok((rows, count))
    })
    .await?;

    Ok(Json(PostPage {
        posts: rows.iter().map(post_from_row).collect(),
        count,
    }))
}

/// `GET /posts/feed` — the viewer's own posts plus posts from people they
/// follow, newest first.
pub async fn get_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let skip = page.skip;
    let limit = page.limit.min(MAX_PAGE_LIMIT);

    let db = state.db.clone();
    let (rows, count) = run_blocking(move || {
        let rows = db.list_followed_posts(viewer, skip, limit)?;
        let count = db.count_followed_posts(viewer)?;
        Ok((rows, count))
    })
    .await?;

    Ok(Json(PostPage {
        posts: rows.iter().map(post_from_row).collect(),
        count,
    }))
}
