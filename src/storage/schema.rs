//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS egress_events (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            workspace_id TEXT,
            creation_time TEXT NOT NULL,
            last_modified_time TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_duration_secs INTEGER NOT NULL,
            egress_megabytes REAL NOT NULL,
            threshold_megabytes REAL NOT NULL,
            raw_signal TEXT NOT NULL,
            status TEXT NOT NULL,
            incident_count INTEGER
        );

        CREATE TABLE IF NOT EXISTS remediation_tasks (
            id INTEGER PRIMARY KEY,
            event_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            attempts INTEGER NOT NULL DEFAULT 0,
            available_at TEXT NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_events_user_status
            ON egress_events(user_id, status, creation_time);
        CREATE INDEX IF NOT EXISTS idx_events_status ON egress_events(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_status_available
            ON remediation_tasks(status, available_at);",
    )?;

    Ok(())
}
