//! Job repository: row-level operations for the `jobs` table.
//!
//! Every mutation here is a single SQL statement (or one explicit
//! transaction), which is what makes claim-and-transition atomic with
//! respect to the other worker and to administrative deletes.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::book_repo::{self, BookRow, NewBook};
use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub user_id: i64,
    pub content_id: String,
    pub title: String,
    pub stage: String,
    pub status: String,
    pub progress: i64,
    pub progress_detail: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            content_id: row.get("content_id")?,
            title: row.get("title")?,
            stage: row.get("stage")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            progress_detail: row.get("progress_detail")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Values for a freshly submitted job.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub user_id: i64,
    pub content_id: &'a str,
    pub title: &'a str,
    pub stage: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
}

/// Columns written together by every stage transition.
#[derive(Debug, Clone)]
pub struct StageUpdate<'a> {
    pub stage: &'a str,
    pub status: &'a str,
    pub progress: i64,
    pub progress_detail: Option<&'a str>,
    pub error: Option<&'a str>,
    pub updated_at: &'a str,
    pub completed_at: Option<&'a str>,
}

/// Inserts a new job row and returns it as stored.
pub fn insert(db: &Database, job: &NewJob<'_>) -> Result<JobRow, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn.query_row(
            "INSERT INTO jobs (user_id, content_id, title, stage, status, progress,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
             RETURNING *",
            params![
                job.user_id,
                job.content_id,
                job.title,
                job.stage,
                job.status,
                job.created_at,
            ],
            JobRow::from_row,
        )?;
        Ok(row)
    })
}

/// Claims the oldest job in `from_stage` and applies `update` to it in one
/// statement. Returns `None` when the stage is empty.
pub fn claim_next(
    db: &Database,
    from_stage: &str,
    update: &StageUpdate<'_>,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE jobs SET stage = ?1, status = ?2, progress = ?3, progress_detail = ?4,
                 error = ?5, updated_at = ?6, completed_at = ?7
                 WHERE id = (
                     SELECT id FROM jobs WHERE stage = ?8
                     ORDER BY created_at ASC, id ASC LIMIT 1
                 )
                 RETURNING *",
                params![
                    update.stage,
                    update.status,
                    update.progress,
                    update.progress_detail,
                    update.error,
                    update.updated_at,
                    update.completed_at,
                    from_stage,
                ],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

fn transition_with_conn(
    conn: &Connection,
    id: i64,
    allowed_from: &[&str],
    update: &StageUpdate<'_>,
) -> Result<Option<JobRow>, rusqlite::Error> {
    if allowed_from.is_empty() {
        return Ok(None);
    }

    let placeholders: Vec<String> = (0..allowed_from.len())
        .map(|i| format!("?{}", i + 9))
        .collect();
    let sql = format!(
        "UPDATE jobs SET stage = ?2, status = ?3, progress = ?4, progress_detail = ?5,
         error = ?6, updated_at = ?7, completed_at = ?8
         WHERE id = ?1 AND stage IN ({})
         RETURNING *",
        placeholders.join(", ")
    );

    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(id),
        Box::new(update.stage.to_string()),
        Box::new(update.status.to_string()),
        Box::new(update.progress),
        Box::new(update.progress_detail.map(str::to_string)),
        Box::new(update.error.map(str::to_string)),
        Box::new(update.updated_at.to_string()),
        Box::new(update.completed_at.map(str::to_string)),
    ];
    for stage in allowed_from {
        values.push(Box::new(stage.to_string()));
    }

    let params_ref: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|p| p.as_ref()).collect();
    conn.query_row(&sql, params_ref.as_slice(), JobRow::from_row)
        .optional()
}

/// Moves job `id` to a new stage, but only while it currently sits in one of
/// `allowed_from`. Returns `None` if the job is missing or in another stage.
pub fn transition(
    db: &Database,
    id: i64,
    allowed_from: &[&str],
    update: &StageUpdate<'_>,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| Ok(transition_with_conn(conn, id, allowed_from, update)?))
}

/// Applies a terminal transition and upserts the resulting book in one
/// transaction. Nothing is written when the transition is not allowed.
pub fn complete_with_book(
    db: &Database,
    id: i64,
    allowed_from: &[&str],
    update: &StageUpdate<'_>,
    book: &NewBook<'_>,
) -> Result<Option<(JobRow, BookRow)>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = rusqlite::Transaction::new_unchecked(
            conn,
            rusqlite::TransactionBehavior::Immediate,
        )?;
        let Some(job) = transition_with_conn(&tx, id, allowed_from, update)? else {
            tx.rollback()?;
            return Ok(None);
        };
        let book = book_repo::upsert_with_conn(&tx, book)?;
        tx.commit()?;
        Ok(Some((job, book)))
    })
}

/// Moves every job in `from_stage` to the stage described by `update`.
/// Returns the rows that were moved.
pub fn requeue_stage(
    db: &Database,
    from_stage: &str,
    update: &StageUpdate<'_>,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE jobs SET stage = ?1, status = ?2, progress = ?3, progress_detail = ?4,
             error = ?5, updated_at = ?6, completed_at = ?7
             WHERE stage = ?8
             RETURNING *",
        )?;
        let rows = stmt
            .query_map(
                params![
                    update.stage,
                    update.status,
                    update.progress,
                    update.progress_detail,
                    update.error,
                    update.updated_at,
                    update.completed_at,
                    from_stage,
                ],
                JobRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Writes progress for a job that is still in `stage`. Returns false when
/// the job has left that stage or no longer exists.
pub fn update_progress(
    db: &Database,
    id: i64,
    stage: &str,
    progress: i64,
    progress_detail: Option<&str>,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET progress = ?3, progress_detail = ?4, updated_at = ?5
             WHERE id = ?1 AND stage = ?2",
            params![id, stage, progress, progress_detail, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists a user's jobs, newest first.
pub fn list_by_user(db: &Database, user_id: i64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE user_id = ?1 ORDER BY created_at DESC, id DESC")?;
        let rows = stmt
            .query_map(params![user_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists all jobs in a stage in claim order (oldest first).
pub fn list_by_stage(db: &Database, stage: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE stage = ?1 ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map(params![stage], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the ids of every job whose stage is not `stage`.
pub fn ids_excluding_stage(db: &Database, stage: &str) -> Result<Vec<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT id FROM jobs WHERE stage != ?1")?;
        let ids = stmt
            .query_map(params![stage], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    })
}

/// Deletes a job owned by `user_id`. Returns true if a row was removed.
pub fn delete(db: &Database, id: i64, user_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM jobs WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(removed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repo;

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let user = user_repo::upsert(&db, "reader", "{}", "2026-01-01T00:00:00Z").unwrap();
        (db, user.id)
    }

    fn new_job<'a>(user_id: i64, content_id: &'a str, created_at: &'a str) -> NewJob<'a> {
        NewJob {
            user_id,
            content_id,
            title: "A Book",
            stage: "pending_download",
            status: "pending",
            created_at,
        }
    }

    fn update<'a>(stage: &'a str, status: &'a str, progress: i64) -> StageUpdate<'a> {
        StageUpdate {
            stage,
            status,
            progress,
            progress_detail: None,
            error: None,
            updated_at: "2026-01-02T00:00:00Z",
            completed_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let (db, user_id) = test_db();
        let row = insert(&db, &new_job(user_id, "X1", "2026-01-01T00:00:00Z")).unwrap();
        assert!(row.id > 0);
        assert_eq!(row.progress, 0);

        let found = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(found.content_id, "X1");
        assert_eq!(found.stage, "pending_download");
        assert!(find_by_id(&db, 9999).unwrap().is_none());
    }

    #[test]
    fn test_claim_next_takes_oldest() {
        let (db, user_id) = test_db();
        let newer = insert(&db, &new_job(user_id, "N", "2026-01-05T00:00:00Z")).unwrap();
        let older = insert(&db, &new_job(user_id, "O", "2026-01-01T00:00:00Z")).unwrap();

        let claimed = claim_next(&db, "pending_download", &update("downloading", "running", 0))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, older.id);
        assert_eq!(claimed.stage, "downloading");

        let claimed = claim_next(&db, "pending_download", &update("downloading", "running", 0))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, newer.id);

        assert!(
            claim_next(&db, "pending_download", &update("downloading", "running", 0))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_transition_respects_allowed_from() {
        let (db, user_id) = test_db();
        let row = insert(&db, &new_job(user_id, "X1", "2026-01-01T00:00:00Z")).unwrap();

        let moved = transition(
            &db,
            row.id,
            &["converting"],
            &update("completed", "completed", 100),
        )
        .unwrap();
        assert!(moved.is_none());

        let moved = transition(
            &db,
            row.id,
            &["pending_download"],
            &update("downloading", "running", 0),
        )
        .unwrap()
        .unwrap();
        assert_eq!(moved.stage, "downloading");
    }

    #[test]
    fn test_requeue_stage_moves_all() {
        let (db, user_id) = test_db();
        for id in ["a", "b"] {
            insert(&db, &new_job(user_id, id, "2026-01-01T00:00:00Z")).unwrap();
        }
        claim_next(&db, "pending_download", &update("downloading", "running", 30)).unwrap();
        claim_next(&db, "pending_download", &update("downloading", "running", 40)).unwrap();

        let moved =
            requeue_stage(&db, "downloading", &update("pending_download", "pending", 0)).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|r| r.progress == 0));
        assert_eq!(list_by_stage(&db, "pending_download").unwrap().len(), 2);
    }

    #[test]
    fn test_update_progress_guarded_by_stage() {
        let (db, user_id) = test_db();
        let row = insert(&db, &new_job(user_id, "X1", "2026-01-01T00:00:00Z")).unwrap();

        assert!(!update_progress(&db, row.id, "downloading", 20, Some("x"), "t").unwrap());
        assert!(update_progress(&db, row.id, "pending_download", 5, Some("x"), "t").unwrap());
        let found = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(found.progress, 5);
        assert_eq!(found.progress_detail.as_deref(), Some("x"));
    }

    #[test]
    fn test_delete_requires_owner() {
        let (db, user_id) = test_db();
        let row = insert(&db, &new_job(user_id, "X1", "2026-01-01T00:00:00Z")).unwrap();

        assert!(!delete(&db, row.id, user_id + 1).unwrap());
        assert!(delete(&db, row.id, user_id).unwrap());
        assert!(find_by_id(&db, row.id).unwrap().is_none());
    }

    #[test]
    fn test_complete_with_book_is_all_or_nothing() {
        let (db, user_id) = test_db();
        let row = insert(&db, &new_job(user_id, "X1", "2026-01-01T00:00:00Z")).unwrap();
        let book = NewBook {
            user_id,
            content_id: "X1",
            title: "A Book",
            author: "Someone",
            path: "/books/job-1",
            created_at: "2026-01-03T00:00:00Z",
        };

        // Not in converting yet: nothing written.
        let done = complete_with_book(
            &db,
            row.id,
            &["converting"],
            &update("completed", "completed", 100),
            &book,
        )
        .unwrap();
        assert!(done.is_none());
        assert!(book_repo::find(&db, user_id, "X1").unwrap().is_none());

        let (job, book_row) = complete_with_book(
            &db,
            row.id,
            &["pending_download"],
            &update("completed", "completed", 100),
            &book,
        )
        .unwrap()
        .unwrap();
        assert_eq!(job.stage, "completed");
        assert_eq!(book_row.path, "/books/job-1");
    }

    #[test]
    fn test_ids_excluding_stage() {
        let (db, user_id) = test_db();
        let a = insert(&db, &new_job(user_id, "a", "2026-01-01T00:00:00Z")).unwrap();
        let b = insert(&db, &new_job(user_id, "b", "2026-01-01T00:00:00Z")).unwrap();
        transition(&db, b.id, &["pending_download"], &update("completed", "completed", 100))
            .unwrap();

        let ids = ids_excluding_stage(&db, "completed").unwrap();
        assert_eq!(ids, vec![a.id]);
    }
}
