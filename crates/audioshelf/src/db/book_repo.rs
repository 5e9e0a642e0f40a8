//! Book repository: durable output records for completed jobs.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw book row from the database.
#[derive(Debug, Clone)]
pub struct BookRow {
    pub id: i64,
    pub user_id: i64,
    pub content_id: String,
    pub title: String,
    pub author: String,
    pub path: String,
    pub created_at: String,
}

impl BookRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            content_id: row.get("content_id")?,
            title: row.get("title")?,
            author: row.get("author")?,
            path: row.get("path")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Values for a book upsert.
#[derive(Debug, Clone)]
pub struct NewBook<'a> {
    pub user_id: i64,
    pub content_id: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    pub path: &'a str,
    pub created_at: &'a str,
}

pub(crate) fn upsert_with_conn(
    conn: &Connection,
    book: &NewBook<'_>,
) -> Result<BookRow, rusqlite::Error> {
    conn.query_row(
        "INSERT INTO books (user_id, content_id, title, author, path, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, content_id) DO UPDATE SET
           title = excluded.title,
           author = excluded.author,
           path = excluded.path
         RETURNING *",
        params![
            book.user_id,
            book.content_id,
            book.title,
            book.author,
            book.path,
            book.created_at,
        ],
        BookRow::from_row,
    )
}

/// Inserts a book, or replaces title/author/path of the existing
/// `(user_id, content_id)` record.
pub fn upsert(db: &Database, book: &NewBook<'_>) -> Result<BookRow, DatabaseError> {
    db.with_conn(|conn| Ok(upsert_with_conn(conn, book)?))
}

/// Finds a user's book by content id.
pub fn find(db: &Database, user_id: i64, content_id: &str) -> Result<Option<BookRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM books WHERE user_id = ?1 AND content_id = ?2",
                params![user_id, content_id],
                BookRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists a user's books, newest first.
pub fn list_by_user(db: &Database, user_id: i64) -> Result<Vec<BookRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM books WHERE user_id = ?1 ORDER BY created_at DESC, id DESC")?;
        let rows = stmt
            .query_map(params![user_id], BookRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the artifact path of every book.
pub fn all_paths(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT path FROM books")?;
        let paths = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    })
}

/// Deletes a user's book and returns its artifact path.
pub fn delete(db: &Database, id: i64, user_id: i64) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let path = conn
            .query_row(
                "DELETE FROM books WHERE id = ?1 AND user_id = ?2 RETURNING path",
                params![id, user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(path)
    })
}
