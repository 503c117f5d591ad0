use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_auth::AuthError;
use parley_store::StoreError;
use serde_json::json;
use tracing::error;

/// Failures surfaced by the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Details are logged, never returned to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(what) => Self::BadRequest(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::Expired => {
                Self::Unauthorized
            }
            AuthError::Signing(msg) | AuthError::Hashing(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                error!(detail = %detail, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Failures starting or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_errors_map() {
        assert!(matches!(
            ApiError::from(StoreError::NotFound("user 3".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::Database("disk".into())),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn credential_errors_are_unauthorized() {
        assert!(matches!(ApiError::from(AuthError::Expired), ApiError::Unauthorized));
        assert!(matches!(
            ApiError::from(AuthError::InvalidToken("sig".into())),
            ApiError::Unauthorized
        ));
    }

    #[tokio::test]
    async fn internal_detail_is_hidden() {
        let response = ApiError::Internal("secret path /var/db".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "internal server error");
    }
}
