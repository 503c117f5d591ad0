//! HS256 bearer tokens.
//!
//! The same key material both signs tokens at login and verifies them when a
//! connection registers or an HTTP request presents `Authorization: Bearer`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_core::UserId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::verifier::IdentityVerifier;

const GENERATED_SECRET_LEN: usize = 48;

/// Claims carried by a parley token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: UserId,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing + verification key pair derived from one shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Random per-process secret. Tokens do not survive a restart.
    pub fn generate() -> Self {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SECRET_LEN)
            .map(char::from)
            .collect();
        Self::from_secret(&secret)
    }
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

/// Mints tokens for users who passed the password check.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    keys: JwtKeys,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(keys: JwtKeys, ttl: Duration) -> Self {
        Self { keys, ttl }
    }

    pub fn issue(&self, id: UserId, username: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id,
            username: username.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with this issuer's key.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.keys.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Verifies HS256 tokens and resolves them to the embedded user id.
#[derive(Clone, Debug)]
pub struct JwtVerifier {
    keys: JwtKeys,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(keys: JwtKeys) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self { keys, validation }
    }

    /// Decode and validate a token, returning its claims.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.keys.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        self.decode(credential).map(|claims| claims.id)
    }
}

/// Extract the token from an `Authorization` header value (`Bearer <token>`).
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (TokenIssuer, JwtVerifier) {
        let keys = JwtKeys::from_secret("test-secret");
        (
            TokenIssuer::new(keys.clone(), Duration::from_secs(900)),
            JwtVerifier::new(keys),
        )
    }

    #[tokio::test]
    async fn issued_token_verifies_to_user() {
        let (issuer, verifier) = pair();
        let token = issuer.issue(UserId::new(1), "usuario1").unwrap();
        assert_eq!(verifier.verify(&token).await.unwrap(), UserId::new(1));

        let claims = verifier.decode(&token).unwrap();
        assert_eq!(claims.username, "usuario1");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let (issuer, verifier) = pair();
        let now = Utc::now().timestamp();
        let token = issuer
            .sign(&Claims {
                id: UserId::new(1),
                username: "usuario1".into(),
                iat: now - 3600,
                exp: now - 60,
            })
            .unwrap();
        assert_eq!(verifier.verify(&token).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn token_from_other_secret_rejected() {
        let (_, verifier) = pair();
        let other = TokenIssuer::new(JwtKeys::from_secret("other"), Duration::from_secs(60));
        let token = other.issue(UserId::new(1), "x").unwrap();
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn malformed_and_empty_tokens_rejected() {
        let (_, verifier) = pair();
        assert!(matches!(verifier.verify("not.a.jwt").await, Err(AuthError::InvalidToken(_))));
        assert_eq!(verifier.verify("").await, Err(AuthError::MissingToken));
        assert_eq!(verifier.verify("   ").await, Err(AuthError::MissingToken));
    }

    #[tokio::test]
    async fn generated_keys_are_independent() {
        let a = TokenIssuer::new(JwtKeys::generate(), Duration::from_secs(60));
        let b = JwtVerifier::new(JwtKeys::generate());
        let token = a.issue(UserId::new(2), "usuario2").unwrap();
        assert!(b.verify(&token).await.is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
