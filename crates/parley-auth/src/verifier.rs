use async_trait::async_trait;
use parley_core::UserId;

use crate::errors::AuthError;

/// Resolves an opaque credential to the identity it was issued for.
///
/// Called once per registration attempt on a connection; implementations may
/// perform I/O.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}
