use parley_core::UserId;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Accounts inserted by [`UserRepo::seed_demo_users`]: (id, username, password).
pub const DEMO_USERS: [(i64, &str, &str); 2] =
    [(1, "usuario1", "123456"), (2, "usuario2", "123456")];

/// The public face of a user. Password hashes never leave this module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an account. A taken username is a `Conflict`.
    #[instrument(skip(self, password))]
    pub fn create(&self, username: &str, password: &str) -> Result<UserSummary, StoreError> {
        let hash = parley_auth::hash_password(password)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                rusqlite::params![username, hash],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("username {username} is taken"))
                }
                other => other,
            })?;
            Ok(UserSummary {
                id: UserId::new(conn.last_insert_rowid()),
                username: username.to_string(),
            })
        })
    }

    /// Insert the demo accounts unless their ids are already taken.
    /// Returns how many rows were inserted.
    #[instrument(skip(self))]
    pub fn seed_demo_users(&self) -> Result<usize, StoreError> {
        let mut hashed = Vec::with_capacity(DEMO_USERS.len());
        for (id, username, password) in DEMO_USERS {
            hashed.push((id, username, parley_auth::hash_password(password)?));
        }
        self.db.with_conn(|conn| {
            let mut inserted = 0;
            for (id, username, hash) in &hashed {
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO users (id, username, password_hash) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, username, hash],
                )?;
            }
            Ok(inserted)
        })
    }

    /// Check a username/password pair. `None` covers both an unknown user and
    /// a wrong password so callers cannot tell them apart.
    #[instrument(skip(self, password))]
    pub fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserSummary>, StoreError> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok((
                        UserSummary {
                            id: UserId::new(row.get(0)?),
                            username: row.get(1)?,
                        },
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)
        })?;

        Ok(row.and_then(|(user, hash)| {
            parley_auth::verify_password(password, &hash).then_some(user)
        }))
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserSummary, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT id, username FROM users WHERE id = ?1", [id.get()], |row| {
                Ok(UserSummary {
                    id: UserId::new(row.get(0)?),
                    username: row.get(1)?,
                })
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Everyone except `id`, ordered by id. Used as the caller's contact list.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn list_except(&self, id: UserId) -> Result<Vec<UserSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username FROM users WHERE id != ?1 ORDER BY id")?;
            let rows = stmt
                .query_map([id.get()], |row| {
                    Ok(UserSummary {
                        id: UserId::new(row.get(0)?),
                        username: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
