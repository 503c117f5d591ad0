//! # parley-auth
//!
//! Identity verification for live connections and HTTP requests, token
//! issuance for the login endpoint, and password hashing.

#![deny(unsafe_code)]

pub mod errors;
pub mod password;
pub mod token;
pub mod verifier;

pub use errors::AuthError;
pub use password::{hash_password, verify_password};
pub use token::{bearer_token, Claims, JwtKeys, JwtVerifier, TokenIssuer};
pub use verifier::IdentityVerifier;
