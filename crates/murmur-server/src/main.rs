use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_api::middleware::require_auth;
use murmur_api::{auth, conversations, messages, notifications, posts, social, users};
use murmur_api::{AppState, AppStateInner};
use murmur_gateway::bus::EventBus;
use murmur_gateway::connection::{self, GatewayState};
use murmur_gateway::presence::PresenceTracker;
use murmur_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    gateway: GatewayState,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("MURMUR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "murmur.db".into());
    let host = std::env::var("MURMUR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("MURMUR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(murmur_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let bus = EventBus::new();
    let presence = PresenceTracker::new();

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        bus: bus.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let server_state = ServerState {
        gateway: GatewayState { db, bus, presence },
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/signin", post(auth::signin))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/me", get(auth::get_auth_user))
        .route("/conversations", get(conversations::get_conversations))
        .route("/messages/{user_id}", get(messages::get_messages))
        .route("/messages/{user_id}", post(messages::send_message))
        .route("/messages/{user_id}/seen", post(messages::mark_seen))
        .route("/notifications", get(notifications::get_notifications))
        .route("/notifications", post(notifications::create_notification))
        .route("/notifications/seen", put(notifications::mark_seen))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        .route("/users", get(users::get_users))
        .route("/users/search", get(users::search_users))
        .route("/users/suggestions", get(users::suggest_people))
        .route("/users/{username}", get(users::get_user))
        .route("/users/{username}/posts", get(users::get_user_posts))
        .route("/posts", get(posts::get_posts))
        .route("/posts", post(posts::create_post))
        .route("/posts/feed", get(posts::get_feed))
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{id}", delete(posts::delete_post))
        .route("/comments", post(social::create_comment))
        .route("/comments/{id}", delete(social::delete_comment))
        .route("/likes", post(social::create_like))
        .route("/likes/{id}", delete(social::delete_like))
        .route("/follows", post(social::create_follow))
        .route("/follows/{id}", delete(social::delete_follow))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

/// WebSockets can't carry an Authorization header from browsers, so the JWT
/// arrives as a `token` query parameter and is validated before the upgrade.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token_data = match decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let claims = token_data.claims;
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, claims.sub, claims.username)
    })
    .into_response()
}
