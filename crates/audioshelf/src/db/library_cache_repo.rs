//! Library cache repository: one opaque JSON snapshot per user.
//!
//! Read-through only: there is no invalidation beyond overwrite-on-refresh.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns the cached library JSON for a user, if any.
pub fn get(db: &Database, user_id: i64) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let json = conn
            .query_row(
                "SELECT library_json FROM library_cache WHERE user_id = ?1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(json)
    })
}

/// Stores (or overwrites) a user's library snapshot.
pub fn save(
    db: &Database,
    user_id: i64,
    library_json: &str,
    cached_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO library_cache (user_id, library_json, cached_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
               library_json = excluded.library_json,
               cached_at = excluded.cached_at",
            params![user_id, library_json, cached_at],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repo;

    #[test]
    fn test_save_overwrites() {
        let db = Database::open_in_memory().unwrap();
        let user = user_repo::upsert(&db, "reader", "{}", "2026-01-01T00:00:00Z").unwrap();

        assert!(get(&db, user.id).unwrap().is_none());
        save(&db, user.id, "[1]", "2026-01-01T00:00:00Z").unwrap();
        save(&db, user.id, "[1,2]", "2026-01-02T00:00:00Z").unwrap();
        assert_eq!(get(&db, user.id).unwrap().as_deref(), Some("[1,2]"));
    }
}
