use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::debug;

use murmur_db::models::{MessageRow, UserRow};
use murmur_db::parse_created_at;
use murmur_types::api::{Claims, MessageView, SeenResponse, SendMessageRequest};
use murmur_types::events::MessageEvent;
use murmur_types::UserId;

use crate::error::ApiError;
use crate::{profile_from_row, run_blocking, AppState};

fn view_from_row(row: &MessageRow, sender: &UserRow, receiver: &UserRow) -> MessageView {
    MessageView {
        id: row.id,
        sender: profile_from_row(sender),
        receiver: profile_from_row(receiver),
        body: row.body.clone(),
        seen: row.seen,
        created_at: parse_created_at(&row.created_at),
    }
}

/// `GET /messages/:user_id` — full history with one counterpart, oldest
/// first, both directions.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(counterpart_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_id = claims.sub;
    let db = state.db.clone();

    let (rows, auth, counterpart) = run_blocking(move || {
        let auth = db
            .get_user_by_id(auth_id)?
            .ok_or_else(|| anyhow::anyhow!("authenticated user {} missing", auth_id))?;
        let Some(counterpart) = db.get_user_by_id(counterpart_id)? else {
            return Ok(None);
        };
        let rows = db.messages_between(auth_id, counterpart_id)?;
        Ok(Some((rows, auth, counterpart)))
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    let views: Vec<MessageView> = rows
        .iter()
        .map(|row| {
            if row.sender_id == auth.id {
                view_from_row(row, &auth, &counterpart)
            } else {
                view_from_row(row, &counterpart, &auth)
            }
        })
        .collect();

    Ok(Json(views))
}

/// Persists one message and publishes it. The row is committed before the
/// event goes out; validation and missing-receiver failures publish nothing.
pub async fn send_message_inner(
    state: &AppState,
    sender_id: UserId,
    receiver_id: UserId,
    body: &str,
) -> Result<MessageView, ApiError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ApiError::Validation("message body cannot be empty".into()));
    }

    let db = state.db.clone();
    let text = body.to_string();
    let (row, sender, receiver) = run_blocking(move || {
        let sender = db
            .get_user_by_id(sender_id)?
            .ok_or_else(|| anyhow::anyhow!("authenticated user {} missing", sender_id))?;
        let Some(receiver) = db.get_user_by_id(receiver_id)? else {
            return Ok(None);
        };
        let row = db.insert_message(sender_id, receiver_id, &text)?;
        Ok(Some((row, sender, receiver)))
    })
    .await?
    .ok_or(ApiError::NotFound("receiver"))?;

    let view = view_from_row(&row, &sender, &receiver);
    debug!(id = row.id, sender = sender_id, receiver = receiver_id, "message sent");

    state.bus.publish_message_created(MessageEvent {
        id: row.id,
        sender: view.sender.clone(),
        receiver: view.receiver.clone(),
        body: row.body.clone(),
        seen: row.seen,
        created_at: view.created_at,
    });

    Ok(view)
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(receiver_id): Path<UserId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = send_message_inner(&state, claims.sub, receiver_id, &req.body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `POST /messages/:user_id/seen` — marks everything the counterpart sent to
/// the caller as seen. Zero matches is a silent success.
pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(sender_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let receiver_id = claims.sub;
    let db = state.db.clone();
    let updated = run_blocking(move || db.mark_messages_seen(sender_id, receiver_id)).await?;
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

    #[tokio::test]
    async fn sent_message_reaches_subscribers_of_that_pair() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let carol = seed_user(&state, "carol");

        let mut bob_sub = state.bus.subscribe_messages(Some(bob), alice);
        let mut carol_sub = state.bus.subscribe_messages(Some(carol), alice);

        let view = send_message_inner(&state, alice, bob, "hey bob").await.unwrap();
        assert_eq!(view.body, "hey bob");
        assert!(!view.seen);

        let event = bob_sub.try_recv().expect("bob receives the event");
        assert_eq!(event.id, view.id);
        assert_eq!(event.sender.id, alice);
        assert_eq!(event.receiver.id, bob);

        assert!(carol_sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_body_is_rejected_and_nothing_published() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mut sub = state.bus.subscribe_messages(Some(bob), alice);

        let err = send_message_inner(&state, alice, bob, "   ").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        assert!(state.db.messages_between(alice, bob).unwrap().is_empty());
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_receiver_is_not_found_and_nothing_published() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let mut sub = state.bus.subscribe_messages(Some(alice), 999);

        let err = send_message_inner(&state, alice, 999, "anyone there?")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn sender_side_subscription_sees_its_own_messages() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        // Alice watching her conversation with Bob sees her own sends too.
        let mut alice_sub = state.bus.subscribe_messages(Some(alice), bob);
        send_message_inner(&state, alice, bob, "from me").await.unwrap();

        let event = alice_sub.try_recv().unwrap();
        assert_eq!(event.sender.id, alice);
    }
}
