//! Authentication error types.

use thiserror::Error;

/// Why a credential could not be turned into an identity, or a token minted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl AuthError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::Expired => "expired",
            Self::Signing(_) => "signing",
            Self::Hashing(_) => "hashing",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::InvalidToken(e.to_string()),
        }
    }
}
