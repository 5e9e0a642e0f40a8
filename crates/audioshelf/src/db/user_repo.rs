//! User repository: account records and their credential bundles.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw user row. `credentials` is the opaque JSON bundle issued by the
/// content provider's login flow.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub credentials: String,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            credentials: row.get("credentials")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Creates a user or replaces the credential bundle of an existing one.
pub fn upsert(
    db: &Database,
    name: &str,
    credentials: &str,
    created_at: &str,
) -> Result<UserRow, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn.query_row(
            "INSERT INTO users (name, credentials, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET credentials = excluded.credentials
             RETURNING *",
            params![name, credentials, created_at],
            UserRow::from_row,
        )?;
        Ok(row)
    })
}

/// Finds a user by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![id],
                UserRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
