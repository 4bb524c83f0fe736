//! At-least-once remediation task queue, persisted in SQLite.
//!
//! Ingestion enqueues one task per created event; the worker loop claims due
//! tasks, runs the remediation executor, and reschedules or abandons on
//! failure. Claiming advances `available_at` by a lease so a crashed worker's
//! tasks are redelivered instead of lost. The executor's idempotent status
//! commit makes duplicate delivery safe.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::remediate::executor::RemediationExecutor;
use crate::storage::{ts, Pool};

/// How long a claimed task stays invisible before redelivery.
const CLAIM_LEASE_SECS: i64 = 300;

/// A claimed remediation task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub event_id: Uuid,
    /// Delivery attempts including the one that claimed this task.
    pub attempts: i64,
}

#[derive(Clone)]
pub struct TaskQueue {
    pool: Pool,
}

impl TaskQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Enqueue a remediation task for an event. At-least-once: a duplicate
    /// enqueue produces a duplicate delivery, which the executor tolerates.
    pub fn enqueue(&self, event_id: Uuid) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO remediation_tasks (event_id, status, available_at)
             VALUES (?1, 'queued', ?2)",
            params![event_id.to_string(), ts(Utc::now())],
        )
        .context("failed to enqueue remediation task")?;
        Ok(())
    }

    /// Claim up to `limit` due tasks, bumping their attempt counter and
    /// pushing `available_at` past the claim lease in the same transaction.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let rows: Vec<(i64, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, event_id, attempts FROM remediation_tasks
                 WHERE status = 'queued' AND available_at <= ?1
                 ORDER BY id LIMIT ?2",
            )?;
            let mapped = stmt.query_map(params![ts(now), limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let lease_until = ts(now + Duration::seconds(CLAIM_LEASE_SECS));
        let mut tasks = Vec::with_capacity(rows.len());
        for (id, event_id, attempts) in rows {
            tx.execute(
                "UPDATE remediation_tasks
                 SET attempts = attempts + 1, available_at = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, lease_until, ts(now)],
            )?;
            let event_id = match Uuid::parse_str(&event_id) {
                Ok(id) => id,
                Err(_) => {
                    // Unparseable rows would redeliver forever.
                    error!(task_id = id, event_id = %event_id, "dropping task with malformed event id");
                    tx.execute(
                        "UPDATE remediation_tasks SET status = 'failed', last_error = 'malformed event id' WHERE id = ?1",
                        params![id],
                    )?;
                    continue;
                }
            };
            tasks.push(Task {
                id,
                event_id,
                attempts: attempts + 1,
            });
        }

        tx.commit()?;
        Ok(tasks)
    }

    pub fn complete(&self, task_id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE remediation_tasks SET status = 'done', updated_at = ?2 WHERE id = ?1",
            params![task_id, ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Schedule a failed task for redelivery with exponential backoff.
    pub fn retry_later(&self, task: &Task, err: &str, base: Duration, now: DateTime<Utc>) -> Result<()> {
        let exponent = (task.attempts - 1).clamp(0, 16) as u32;
        let delay = base * 2_i32.saturating_pow(exponent);
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE remediation_tasks
             SET available_at = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?1",
            params![task.id, ts(now + delay), err, ts(now)],
        )?;
        Ok(())
    }

    /// Abandon a task after its retry budget is exhausted.
    pub fn mark_failed(&self, task_id: i64, err: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE remediation_tasks
             SET status = 'failed', last_error = ?2, updated_at = ?3
             WHERE id = ?1",
            params![task_id, err, ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Queued-task count, for health reporting and tests.
    pub fn queued_count(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM remediation_tasks WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    #[cfg(test)]
    fn next_available_at(&self, task_id: i64) -> Result<DateTime<Utc>> {
        let conn = self.pool.get()?;
        let raw: String = conn.query_row(
            "SELECT available_at FROM remediation_tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(crate::storage::parse_ts(&raw))
    }
}

/// Main worker execution loop. Polls for due tasks and spawns one handling
/// task per claim.
pub async fn run_worker_loop(queue: TaskQueue, executor: Arc<RemediationExecutor>, cfg: TaskConfig) {
    info!("remediation worker started");

    let mut interval = tokio::time::interval(StdDuration::from_secs(cfg.poll_interval_secs));

    loop {
        interval.tick().await;

        let due = match queue.claim_due(Utc::now(), cfg.claim_limit) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("failed to claim due tasks: {e:#}");
                continue;
            }
        };

        for task in due {
            let queue = queue.clone();
            let executor = executor.clone();
            let cfg = cfg.clone();

            tokio::spawn(async move {
                handle_task(&queue, &executor, &cfg, task).await;
            });
        }
    }
}

async fn handle_task(queue: &TaskQueue, executor: &RemediationExecutor, cfg: &TaskConfig, task: Task) {
    match executor.remediate(task.event_id).await {
        Ok(outcome) => {
            info!(event_id = %task.event_id, outcome = %outcome, "remediation task finished");
            if let Err(e) = queue.complete(task.id) {
                error!(task_id = task.id, "failed to mark task done: {e:#}");
            }
        }
        Err(e) if e.retryable() && task.attempts < cfg.max_attempts => {
            warn!(
                event_id = %task.event_id,
                attempt = task.attempts,
                "remediation failed, will retry: {e}"
            );
            if let Err(e) = queue.retry_later(
                &task,
                &e.to_string(),
                Duration::seconds(cfg.retry_base_secs),
                Utc::now(),
            ) {
                error!(task_id = task.id, "failed to reschedule task: {e:#}");
            }
        }
        Err(e) => {
            // Abandoned: the event stays PENDING, so a later signal or a
            // manual reprocess can retry the whole pipeline.
            error!(
                event_id = %task.event_id,
                attempts = task.attempts,
                "remediation abandoned: {e}"
            );
            if let Err(e) = queue.mark_failed(task.id, &e.to_string()) {
                error!(task_id = task.id, "failed to mark task failed: {e:#}");
            }
        }
    }
}
