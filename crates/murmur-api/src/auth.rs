use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use jsonwebtoken::{encode, EncodingKey, Header};

use murmur_types::api::{
    AuthUserResponse, Claims, SigninRequest, SigninResponse, SignupRequest, SignupResponse,
    UnseenConversation,
};
use murmur_types::UserId;

use crate::error::ApiError;
use crate::{notifications, profile_from_row, run_blocking, AppState};

/// Front-end routes a username must not shadow.
const RESERVED_USERNAMES: &[&str] = &[
    "explore",
    "people",
    "notifications",
    "post",
    "forgot-password",
    "reset-password",
];

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_signup(&req)?;

    let db = state.db.clone();
    let full_name = req.full_name.clone();
    let email = req.email.clone();
    let username = req.username.clone();

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("password hash failed: {}", e)))?
        .to_string();

    // Uniqueness is enforced by the UNIQUE columns themselves; a violation
    // maps to 409 regardless of how the race between two signups falls.
    let user_id =
        run_blocking(move || db.create_user(&username, &full_name, &email, &password_hash))
            .await
            .map_err(signup_conflict)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    Ok((StatusCode::CREATED, Json(SignupResponse { user_id, token })))
}

pub async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let handle = req.email_or_username.clone();
    let user = run_blocking(move || {
        // Handle may be either field; try email first, then username.
        match db.get_user_by_email(&handle)? {
            Some(user) => Ok(Some(user)),
            None => db.get_user_by_username(&handle),
        }
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(SigninResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

/// `GET /me` — the authenticated user's profile plus unseen notification and
/// conversation summaries, assembled from current storage state.
pub async fn get_auth_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let db = state.db.clone();

    let (user, unseen_notifications, unseen_messages, senders) = run_blocking(move || {
        db.set_user_online(user_id, true)?;
        let user = db
            .get_user_by_id(user_id)?
            .ok_or_else(|| anyhow::anyhow!("authenticated user {} missing", user_id))?;
        let unseen_notifications = db.unseen_notifications(user_id)?;
        let unseen_messages = db.unseen_messages_for(user_id)?;
        let sender_ids: Vec<i64> = unseen_messages.iter().map(|m| m.sender_id).collect();
        let senders = db.get_users_by_ids(&sender_ids)?;
        Ok((user, unseen_notifications, unseen_messages, senders))
    })
    .await?;

    let new_notifications = unseen_notifications
        .into_iter()
        .map(notifications::hydrate)
        .collect::<Result<Vec<_>, _>>()?;

    // One stub per sender with unseen messages; rows are ascending so the
    // newest message per sender wins.
    let mut stubs: std::collections::HashMap<UserId, UnseenConversation> =
        std::collections::HashMap::new();
    for message in &unseen_messages {
        let Some(sender) = senders.iter().find(|u| u.id == message.sender_id) else {
            continue;
        };
        stubs.insert(
            sender.id,
            UnseenConversation {
                id: sender.id,
                username: sender.username.clone(),
                full_name: sender.full_name.clone(),
                image: sender.image.clone(),
                last_message: message.body.clone(),
                last_message_created_at: murmur_db::parse_created_at(&message.created_at),
            },
        );
    }
    let mut new_conversations: Vec<UnseenConversation> = stubs.into_values().collect();
    new_conversations.sort_by(|a, b| {
        b.last_message_created_at
            .cmp(&a.last_message_created_at)
            .then(a.id.cmp(&b.id))
    });

    let mut profile = profile_from_row(&user);
    profile.is_online = true;

    Ok(Json(AuthUserResponse {
        profile,
        new_notifications,
        new_conversations,
    }))
}

fn signup_conflict(e: ApiError) -> ApiError {
    let ApiError::Storage(inner) = e else {
        return e;
    };
    let message = inner.to_string();
    if message.contains("UNIQUE constraint failed: users.email") {
        ApiError::Conflict("user with given email already exists".into())
    } else if message.contains("UNIQUE constraint failed: users.username") {
        ApiError::Conflict("user with given username already exists".into())
    } else {
        ApiError::Storage(inner)
    }
}

fn validate_signup(req: &SignupRequest) -> Result<(), ApiError> {
    if req.full_name.is_empty() || req.email.is_empty() || req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("all fields are required".into()));
    }
    if req.full_name.len() < 4 || req.full_name.len() > 40 {
        return Err(ApiError::Validation(
            "full name must be between 4 and 40 characters".into(),
        ));
    }
    if !req.email.contains('@') || !req.email.contains('.') {
        return Err(ApiError::Validation("enter a valid email address".into()));
    }
    if req.username.len() < 3 || req.username.len() > 20 {
        return Err(ApiError::Validation(
            "username must be between 3 and 20 characters".into(),
        ));
    }
    if !req
        .username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(ApiError::Validation(
            "usernames can only use letters, numbers, underscores and periods".into(),
        ));
    }
    if RESERVED_USERNAMES.contains(&req.username.as_str()) {
        return Err(ApiError::Validation(
            "this username isn't available, please try another".into(),
        ));
    }
    if req.password.len() < 6 {
        return Err(ApiError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    Ok(())
}

pub(crate) fn create_token(secret: &str, user_id: UserId, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Storage(anyhow::anyhow!("token encoding failed: {}", e)))
}
