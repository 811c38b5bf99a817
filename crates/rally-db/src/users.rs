use rusqlite::Connection;
use uuid::Uuid;

use rally_types::models::User;

use crate::models::{OptionalExt, now_ts, ts_col, uuid_col};
use crate::{Database, Result, StoreError};

impl Database {
    /// Record (or rename) the shadow row for an authenticated user.
    pub fn upsert_user(&self, id: Uuid, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username
                 WHERE users.username != excluded.username",
                (id.to_string(), username, now_ts()),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        [id.to_string()],
        |row| {
            Ok(User {
                id: uuid_col(row, 0)?,
                username: row.get(1)?,
                created_at: ts_col(row, 2)?,
            })
        },
    )
    .optional()
}

/// Fails with NotFound unless every id has a user row.
pub(crate) fn require_users(conn: &Connection, ids: &[Uuid]) -> Result<()> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM users WHERE id = ?1")?;
    for id in ids {
        if !stmt.exists([id.to_string()])? {
            return Err(StoreError::not_found("User", id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::testing::db;
    use uuid::Uuid;

    #[test]
    fn upsert_renames_existing_user() {
        let db = db();
        let id = Uuid::new_v4();
        db.upsert_user(id, "ana").unwrap();
        db.upsert_user(id, "ana.k").unwrap();

        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.username, "ana.k");
        assert!(db.get_user(Uuid::new_v4()).unwrap().is_none());
    }
}
