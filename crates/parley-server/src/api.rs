//! JSON HTTP endpoints: login, contacts, history and sending.
//!
//! Sending is the only path that creates messages. It persists first and
//! then offers the stored record to the delivery router; whether the push
//! lands has no bearing on the response.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use parley_auth::bearer_token;
use parley_core::{OutboundEvent, PersistedMessage, UserId};
use parley_store::UserSummary;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::ApiError;
use crate::server::AppState;

/// The caller's identity, resolved from `Authorization: Bearer <token>`.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(ApiError::Unauthorized)?;
        let user = state.verifier.verify(token).await.map_err(|e| {
            debug!(error_kind = e.error_kind(), "rejected bearer token");
            ApiError::Unauthorized
        })?;
        Ok(Self(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// POST /api/login
#[instrument(skip_all, fields(username = %req.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let users = state.users.clone();
    let LoginRequest { username, password } = req;
    // argon2 verification blocks.
    let found = tokio::task::spawn_blocking(move || users.verify_password(&username, &password))
        .await
        .map_err(|e| ApiError::Internal(format!("login task: {e}")))??;

    let Some(user) = found else {
        info!("login failed");
        return Err(ApiError::Unauthorized);
    };
    let token = state.issuer.issue(user.id, &user.username)?;
    info!(user_id = %user.id, "login succeeded");
    Ok(Json(LoginResponse { token }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
}

/// GET /api/users
pub async fn list_users(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.users.list_except(me)?;
    Ok(Json(UsersResponse { users }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub messages: Vec<PersistedMessage>,
}

/// GET /api/messages/{contact_id}
pub async fn conversation(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(contact): Path<UserId>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let messages = state.messages.conversation(me, contact)?;
    Ok(Json(ConversationResponse { messages }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: UserId,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub ok: bool,
    pub message: PersistedMessage,
}

/// POST /api/messages
#[instrument(skip_all, fields(sender = %me, receiver = %req.receiver_id))]
pub async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let receiver = state.users.get(req.receiver_id)?;

    let stored = state.messages.append(me, req.receiver_id, &req.message)?;
    let outcome = state.router.deliver(
        req.receiver_id,
        &OutboundEvent::NewMessage {
            message: stored.clone(),
        },
    );
    debug!(message_id = %stored.id, receiver = %receiver.username, %outcome, "message stored");

    Ok(Json(SendMessageResponse {
        ok: true,
        message: stored,
    }))
}
