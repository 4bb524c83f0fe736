//! SQLite storage layer -- schema, connection pool, and the event store.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::detect::{EgressEvent, EventStatus};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Serialize a timestamp for storage. Fixed-width RFC3339 so lexicographic
/// comparison in SQL matches chronological order.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, tolerating rows written by older builds.
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Durable keyed storage for egress events.
#[derive(Clone)]
pub struct EventStore {
    pool: Pool,
}

impl EventStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn insert(&self, event: &EgressEvent) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO egress_events
                (id, user_id, workspace_id, creation_time, last_modified_time,
                 window_start, window_duration_secs, egress_megabytes,
                 threshold_megabytes, raw_signal, status, incident_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id.to_string(),
                event.user_id,
                event.workspace_id,
                ts(event.creation_time),
                ts(event.last_modified_time),
                ts(event.window_start),
                event.window_duration_secs,
                event.egress_megabytes,
                event.threshold_megabytes,
                event.raw_signal,
                event.status.as_str(),
                event.incident_count,
            ],
        )
        .context("failed to insert egress event")?;
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<EgressEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM egress_events WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id.to_string()], map_event)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Pending events for the same (user, workspace, window duration) tuple,
    /// used by the deduplicator's overlap check.
    pub fn find_pending_similar(
        &self,
        user_id: &str,
        workspace_id: Option<&str>,
        window_duration_secs: i64,
    ) -> Result<Vec<EgressEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM egress_events
             WHERE user_id = ?1 AND workspace_id IS ?2
               AND status = 'PENDING' AND window_duration_secs = ?3"
        ))?;
        let rows = stmt.query_map(params![user_id, workspace_id, window_duration_secs], map_event)?;
        collect(rows)
    }

    /// Event history for clustering: `PENDING` and `REMEDIATED` events for
    /// the user created at or before `as_of`, oldest first. Events verified
    /// as false positives are excluded here and never counted again.
    pub fn find_history(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<Vec<EgressEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM egress_events
             WHERE user_id = ?1
               AND status IN ('PENDING', 'REMEDIATED')
               AND creation_time <= ?2
             ORDER BY creation_time ASC"
        ))?;
        let rows = stmt.query_map(params![user_id, ts(as_of)], map_event)?;
        collect(rows)
    }

    /// Atomically commit the `PENDING -> REMEDIATED` transition. Returns
    /// false if another worker already moved the event out of `PENDING`.
    pub fn mark_remediated(
        &self,
        id: Uuid,
        incident_count: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE egress_events
             SET status = 'REMEDIATED', incident_count = ?2, last_modified_time = ?3
             WHERE id = ?1 AND status = 'PENDING'",
            params![id.to_string(), incident_count, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// Reviewer verdict: the event was a false positive. Only a pending
    /// event can be reclassified.
    pub fn mark_false_positive(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE egress_events
             SET status = 'VERIFIED_FALSE_POSITIVE', last_modified_time = ?2
             WHERE id = ?1 AND status = 'PENDING'",
            params![id.to_string(), ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// Whether some other event for this user and workspace reached
    /// `REMEDIATED` at or after `since`. Drives the notification cooldown.
    pub fn any_remediated_since(
        &self,
        user_id: &str,
        workspace_id: Option<&str>,
        since: DateTime<Utc>,
        exclude_id: Uuid,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM egress_events
             WHERE user_id = ?1 AND workspace_id IS ?2
               AND status = 'REMEDIATED'
               AND last_modified_time >= ?3
               AND id != ?4",
            params![user_id, workspace_id, ts(since), exclude_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Most recently created events, for the operator read API.
    pub fn recent(&self, limit: usize) -> Result<Vec<EgressEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM egress_events ORDER BY creation_time DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], map_event)?;
        collect(rows)
    }
}

const COLUMNS: &str = "id, user_id, workspace_id, creation_time, last_modified_time, \
                       window_start, window_duration_secs, egress_megabytes, \
                       threshold_megabytes, raw_signal, status, incident_count";

fn map_event(row: &Row<'_>) -> rusqlite::Result<EgressEvent> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(10)?;
    let status = EventStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            10,
            rusqlite::types::Type::Text,
            format!("unknown event status: {status_str}").into(),
        )
    })?;

    Ok(EgressEvent {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        user_id: row.get(1)?,
        workspace_id: row.get(2)?,
        creation_time: parse_ts(&row.get::<_, String>(3)?),
        last_modified_time: parse_ts(&row.get::<_, String>(4)?),
        window_start: parse_ts(&row.get::<_, String>(5)?),
        window_duration_secs: row.get(6)?,
        egress_megabytes: row.get(7)?,
        threshold_megabytes: row.get(8)?,
        raw_signal: row.get(9)?,
        status,
        incident_count: row.get(11)?,
    })
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<EgressEvent>>,
) -> Result<Vec<EgressEvent>> {
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}
