pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod social;
pub mod users;

use std::sync::Arc;

use murmur_db::models::UserRow;
use murmur_db::Database;
use murmur_gateway::bus::EventBus;
use murmur_types::models::UserProfile;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub jwt_secret: String,
}

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::Storage),
        Err(e) => Err(ApiError::Storage(anyhow::anyhow!(
            "spawn_blocking join error: {}",
            e
        ))),
    }
}

pub(crate) fn profile_from_row(row: &UserRow) -> UserProfile {
    UserProfile {
        id: row.id,
        username: row.username.clone(),
        full_name: row.full_name.clone(),
        image: row.image.clone(),
        is_online: row.is_online,
    }
}
