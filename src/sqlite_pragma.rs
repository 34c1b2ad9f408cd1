//! Connection tuning shared by every SQLite handle

use rusqlite::Connection;

/// Apply WAL journaling plus the throughput PRAGMAs used for batch imports.
///
/// WAL lets analysis readers proceed while a batch transaction is open; they
/// see the last committed batch and never a partial one.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", -16_000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1_000)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
