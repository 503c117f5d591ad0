use chrono::{SecondsFormat, Utc};
use parley_core::{MessageId, PersistedMessage, UserId};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Append-only direct message history.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a message. The store assigns the id (monotonic) and the
    /// creation timestamp.
    #[instrument(skip(self, body), fields(sender = %sender, receiver = %receiver))]
    pub fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
    ) -> Result<PersistedMessage, StoreError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender.get(), receiver.get(), body, created_at],
            )?;
            Ok(PersistedMessage {
                id: MessageId::new(conn.last_insert_rowid()),
                sender_id: sender,
                receiver_id: receiver,
                body: body.to_string(),
                created_at,
            })
        })
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<PersistedMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, message, created_at FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([a.get(), b.get()], |row| {
                    Ok(PersistedMessage {
                        id: MessageId::new(row.get(0)?),
                        sender_id: UserId::new(row.get(1)?),
                        receiver_id: UserId::new(row.get(2)?),
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (MessageRepo, UserId, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let a = users.create("a", "pw").unwrap().id;
        let b = users.create("b", "pw").unwrap().id;
        let c = users.create("c", "pw").unwrap().id;
        (MessageRepo::new(db), a, b, c)
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let (repo, a, b, _) = setup();
        let first = repo.append(a, b, "one").unwrap();
        let second = repo.append(b, a, "two").unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.sender_id, a);
        assert_eq!(first.receiver_id, b);
        assert_eq!(first.body, "one");
        assert!(first.created_at.ends_with('Z'));
    }

    #[test]
    fn conversation_includes_both_directions_in_order() {
        let (repo, a, b, c) = setup();
        repo.append(a, b, "hi").unwrap();
        repo.append(b, a, "hello").unwrap();
        repo.append(a, c, "elsewhere").unwrap();
        repo.append(a, b, "how are you").unwrap();

        let history = repo.conversation(a, b).unwrap();
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["hi", "hello", "how are you"]);
        let pair_ok = |m: &PersistedMessage| {
            let pair = (m.sender_id, m.receiver_id);
            pair == (a, b) || pair == (b, a)
        };
        assert!(history.iter().all(pair_ok));

        let mirrored = repo.conversation(b, a).unwrap();
        assert_eq!(mirrored, history);
    }

    #[test]
    fn empty_conversation() {
        let (repo, a, _, c) = setup();
        assert!(repo.conversation(a, c).unwrap().is_empty());
    }

    #[test]
    fn unknown_receiver_violates_foreign_key() {
        let (repo, a, _, _) = setup();
        assert!(matches!(
            repo.append(a, UserId::new(999), "lost"),
            Err(StoreError::Conflict(_))
        ));
    }
}
