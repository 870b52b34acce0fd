//! Job repository: persistence for the `jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub strategy: String,
    pub state: String,
    pub percent: u8,
    pub phase: Option<String>,
    pub message: Option<String>,
    pub submitted_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
    /// JSON-encoded `JobOutput`.
    pub output: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            strategy: row.get("strategy")?,
            state: row.get("state")?,
            percent: row.get("percent")?,
            phase: row.get("phase")?,
            message: row.get("message")?,
            submitted_at: row.get("submitted_at")?,
            updated_at: row.get("updated_at")?,
            finished_at: row.get("finished_at")?,
            output: row.get("output")?,
            error_kind: row.get("error_kind")?,
            error_message: row.get("error_message")?,
        })
    }
}

/// Query filter for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<String>,
    pub limit: Option<u64>,
}

/// Inserts a job row or overwrites every mutable column of an existing one.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, strategy, state, percent, phase, message, submitted_at,
             updated_at, finished_at, output, error_kind, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET state=?3, percent=?4, phase=?5, message=?6,
             updated_at=?8, finished_at=?9, output=?10, error_kind=?11, error_message=?12",
            params![
                job.id,
                job.strategy,
                job.state,
                job.percent,
                job.phase,
                job.message,
                job.submitted_at,
                job.updated_at,
                job.finished_at,
                job.output,
                job.error_kind,
                job.error_message,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let limit = filter.limit.unwrap_or(100) as i64;
        let rows = match filter.state {
            Some(ref state) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY submitted_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![state, limit], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM jobs ORDER BY submitted_at DESC LIMIT ?1")?;
                let rows = stmt
                    .query_map(params![limit], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Fails every job left non-terminal by a previous process.
///
/// Returns the number of rows updated.
pub fn mark_interrupted(
    db: &Database,
    now: &str,
    error_kind: &str,
    error_message: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET state = 'Failed', updated_at = ?1, finished_at = ?1,
             phase = 'failed', message = ?3, error_kind = ?2, error_message = ?3,
             output = NULL
             WHERE state IN ('Pending', 'InProgress')",
            params![now, error_kind, error_message],
        )?;
        Ok(updated)
    })
}

/// Removes a single job row.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(())
    })
}

/// Deletes terminal jobs that finished before `cutoff` (RFC 3339).
pub fn delete_finished_before(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}
