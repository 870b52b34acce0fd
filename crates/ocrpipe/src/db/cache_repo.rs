//! Cache repository: persistence for the `cache_entries` table.

use rusqlite::params;

use super::{Database, DatabaseError};

/// Returns the cached text for `(fingerprint, strategy)`.
pub fn get(db: &Database, fingerprint: &str, strategy: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT text FROM cache_entries WHERE fingerprint = ?1 AND strategy = ?2")?;
        let mut rows = stmt.query_map(params![fingerprint, strategy], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(text)) => Ok(Some(text)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Writes an entry, replacing any previous value for the same key.
pub fn put(
    db: &Database,
    fingerprint: &str,
    strategy: &str,
    text: &str,
    created_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (fingerprint, strategy, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![fingerprint, strategy, text, created_at],
        )?;
        Ok(())
    })
}

/// Deletes every entry. Returns the number removed.
pub fn clear(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| Ok(conn.execute("DELETE FROM cache_entries", [])?))
}
