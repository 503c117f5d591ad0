#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("password hashing error: {0}")]
    Hashing(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("no matching row".into()),
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<parley_auth::AuthError> for StoreError {
    fn from(e: parley_auth::AuthError) -> Self {
        StoreError::Hashing(e.to_string())
    }
}
