use libsql::Connection;

use super::PersistenceError;

/// Schema version - increment when the table layout changes.
/// Snapshots record the version they were written with.
///
/// - 1: `status_checks`, `summary_reports`
/// - 2: adds `stores`
pub const SCHEMA_VERSION: u32 = 2;

/// Create the monitoring tables on a fresh connection
pub async fn create_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            store_id TEXT NOT NULL,
            checked_at INTEGER NOT NULL,
            is_online INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS summary_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_time INTEGER NOT NULL,
            total_stores INTEGER NOT NULL,
            online_count INTEGER NOT NULL,
            offline_count INTEGER NOT NULL,
            uptime_percent REAL NOT NULL,
            CHECK (online_count + offline_count = total_stores)
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stores (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            platform TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_checks_checked_at ON status_checks(checked_at DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_checks_store_checked_at ON status_checks(store_id, checked_at DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_summary_reports_report_time ON summary_reports(report_time DESC)",
        (),
    )
    .await?;

    tracing::debug!(version = SCHEMA_VERSION, "Monitoring schema ready");
    Ok(())
}
