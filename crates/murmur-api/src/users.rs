use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};

use murmur_types::api::{Claims, PageQuery, PostPage, SearchQuery, UserPage};
use murmur_types::models::UserProfile;

use crate::error::ApiError;
use crate::posts::post_from_row;
use crate::{profile_from_row, run_blocking, AppState};

const MAX_PAGE_LIMIT: u32 = 100;
const SUGGESTION_LIMIT: u32 = 5;
const SEARCH_LIMIT: u32 = 50;

/// `GET /users/:username` — one public profile.
pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = run_blocking(move || db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(profile_from_row(&user)))
}

/// `GET /users/:username/posts` — one author's posts, newest first.
pub async fn get_user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let skip = page.skip;
    let limit = page.limit.min(MAX_PAGE_LIMIT);

    let db = state.db.clone();
    let (rows, count) = run_blocking(move || {
        let Some(user) = db.get_user_by_username(&username)? else {
            return Ok(None);
        };
        let rows = db.list_posts_by_author(user.id, skip, limit)?;
        let count = db.count_posts_by_author(user.id)?;
        Ok(Some((rows, count)))
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(PostPage {
        posts: rows.iter().map(post_from_row).collect(),
        count,
    }))
}

/// `GET /users` — everyone except the viewer, newest account first.
pub async fn get_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let skip = page.skip;
    let limit = page.limit.min(MAX_PAGE_LIMIT);

    let db = state.db.clone();
    let (rows, count) = run_blocking(move || {
        let rows = db.list_users(viewer, skip, limit)?;
        let count = db.count_users(viewer)?;
        Ok((rows, count))
    })
    .await?;

    Ok(Json(UserPage {
        users: rows.iter().map(profile_from_row).collect(),
        count,
    }))
}

/// `GET /users/search?q=...` — substring match on username or full name.
/// A blank query matches nobody.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let term = query.q.trim().to_string();
    if term.is_empty() {
        return Ok(Json(Vec::<UserProfile>::new()));
    }

    let viewer = claims.sub;
    let db = state.db.clone();
    let rows = run_blocking(move || db.search_users(&term, viewer, SEARCH_LIMIT)).await?;

    Ok(Json(
        rows.iter().map(profile_from_row).collect::<Vec<_>>(),
    ))
}

/// `GET /users/suggestions` — a handful of people the viewer does not
/// already follow.
pub async fn suggest_people(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let db = state.db.clone();
    let rows = run_blocking(move || db.suggest_users(viewer, SUGGESTION_LIMIT)).await?;

    Ok(Json(
        rows.iter().map(profile_from_row).collect::<Vec<_>>(),
    ))
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

    #[tokio::test]
    async fn unknown_username_is_not_found() {
        let state = test_state();
        let res = get_user(State(state), Path("nobody".into())).await;
        assert!(matches!(res.err().unwrap(), ApiError::NotFound("user")));
    }

    #[tokio::test]
    async fn known_username_resolves() {
        let state = test_state();
        seed_user(&state, "alice");
        let res = get_user(State(state), Path("alice".into())).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn posts_for_unknown_user_are_not_found() {
        let state = test_state();
        let res = get_user_posts(
            State(state),
            Path("nobody".into()),
            Query(PageQuery { skip: 0, limit: 20 }),
        )
        .await;
        assert!(matches!(res.err().unwrap(), ApiError::NotFound("user")));
    }

    #[tokio::test]
    async fn blank_search_matches_nobody() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let res = search_users(
            State(state),
            Extension(Claims {
                sub: alice,
                username: "alice".into(),
                exp: usize::MAX,
            }),
            Query(SearchQuery { q: "   ".into() }),
        )
        .await;
        assert!(res.is_ok());
    }
}
