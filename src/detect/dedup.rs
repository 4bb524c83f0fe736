//! Signal ingestion and deduplication.
//!
//! The inbound-signal path: resolve the actor, decide whether the signal is
//! an already-tracked anomaly, and otherwise persist a `PENDING` event and
//! enqueue its remediation task. Runs synchronously and never waits on
//! downstream compute or mail calls.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::detect::{ActorResolver, EgressEvent, EgressSignal, EventStatus};
use crate::queue::TaskQueue;
use crate::remediate::Ticketing;
use crate::storage::EventStore;

/// Result of ingesting one raw signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New event persisted and remediation enqueued.
    Created(Uuid),
    /// The signal re-describes an already-tracked pending anomaly.
    Deduplicated(Uuid),
    /// Signal dropped; the reason is logged and returned to the caller.
    Skipped(&'static str),
}

pub struct Deduplicator {
    store: EventStore,
    queue: TaskQueue,
    resolver: Arc<dyn ActorResolver>,
    ticketing: Arc<dyn Ticketing>,
}

impl Deduplicator {
    pub fn new(
        store: EventStore,
        queue: TaskQueue,
        resolver: Arc<dyn ActorResolver>,
        ticketing: Arc<dyn Ticketing>,
    ) -> Self {
        Self {
            store,
            queue,
            resolver,
            ticketing,
        }
    }

    /// Ingest one raw signal from the upstream anomaly monitor.
    pub async fn ingest(&self, signal: &EgressSignal) -> Result<IngestOutcome> {
        if signal.time_window_duration <= 0 {
            warn!(
                duration = signal.time_window_duration,
                "dropping signal with invalid window"
            );
            return Ok(IngestOutcome::Skipped("invalid_window"));
        }

        let Some(user_id) = self.resolver.resolve_user(signal).await else {
            warn!(
                vm_name = signal.vm_name.as_deref().unwrap_or("<none>"),
                "dropping unattributable egress signal"
            );
            return Ok(IngestOutcome::Skipped("unattributable"));
        };
        let workspace_id = self.resolver.resolve_workspace(signal).await;

        // Repeated webhook deliveries of the same anomaly arrive with
        // overlapping or adjacent windows; one pending event absorbs them.
        if let Some(existing) = self.find_overlapping(&user_id, workspace_id.as_deref(), signal)? {
            info!(
                event_id = %existing,
                user_id = %user_id,
                "signal deduplicated against pending event"
            );
            return Ok(IngestOutcome::Deduplicated(existing));
        }

        let now = Utc::now();
        let event = EgressEvent {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            workspace_id,
            creation_time: now,
            last_modified_time: now,
            window_start: signal.window_start(),
            window_duration_secs: signal.time_window_duration,
            egress_megabytes: signal.egress_mib,
            threshold_megabytes: signal.egress_mib_threshold,
            raw_signal: serde_json::to_string(signal)?,
            status: EventStatus::Pending,
            incident_count: None,
        };
        self.store.insert(&event)?;
        self.queue.enqueue(event.id)?;

        // The audit trail records every new detection even if ticketing is
        // briefly down; the event itself is already durable.
        if let Err(e) = self
            .ticketing
            .fire_audit_event(&event, &user_id, "egress_event_created")
            .await
        {
            warn!(event_id = %event.id, "failed to audit event creation: {e}");
        }

        info!(
            event_id = %event.id,
            user_id = %user_id,
            egress_mb = event.egress_megabytes,
            "created egress event and enqueued remediation"
        );
        Ok(IngestOutcome::Created(event.id))
    }

    /// A pending event for the same (user, workspace, window duration) whose
    /// window start is within twice the duration of the candidate's.
    fn find_overlapping(
        &self,
        user_id: &str,
        workspace_id: Option<&str>,
        signal: &EgressSignal,
    ) -> Result<Option<Uuid>> {
        let candidates =
            self.store
                .find_pending_similar(user_id, workspace_id, signal.time_window_duration)?;
        let window_start = signal.window_start();
        let adjacency = chrono::Duration::seconds(signal.time_window_duration * 2);

        Ok(candidates
            .iter()
            .find(|existing| {
                let gap = (existing.window_start - window_start).abs();
                gap < adjacency
            })
            .map(|existing| existing.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::VmNameResolver;
    use crate::remediate::mock::MockTicketing;
    use crate::storage::testutil::test_pool;
    use crate::storage::Pool;

    fn dedup(pool: Pool) -> (Deduplicator, Arc<MockTicketing>) {
        let ticketing = Arc::new(MockTicketing::default());
        let d = Deduplicator::new(
            EventStore::new(pool.clone()),
            TaskQueue::new(pool),
            Arc::new(VmNameResolver::new("wb")),
            ticketing.clone(),
        );
        (d, ticketing)
    }

    fn signal(window_start: i64) -> EgressSignal {
        EgressSignal {
            project_name: Some("ws-proj-1".to_string()),
            vm_name: Some("wb-alice-1".to_string()),
            gke_service_name: None,
            time_window_start: window_start,
            time_window_duration: 600,
            egress_mib: 120.7,
            egress_mib_threshold: 100.0,
        }
    }

    #[tokio::test]
    async fn creates_event_and_enqueues_once() {
        let (_dir, pool) = test_pool();
        let queue = TaskQueue::new(pool.clone());
        let (d, ticketing) = dedup(pool.clone());

        let first = d.ingest(&signal(1_700_000_000)).await.unwrap();
        let IngestOutcome::Created(id) = first else {
            panic!("expected Created, got {first:?}");
        };

        // Same anomaly, next webhook delivery: overlapping window.
        let second = d.ingest(&signal(1_700_000_300)).await.unwrap();
        assert_eq!(second, IngestOutcome::Deduplicated(id));

        assert_eq!(queue.queued_count().unwrap(), 1);
        let store = EventStore::new(pool);
        assert_eq!(store.recent(10).unwrap().len(), 1);
        // Only the creation fired an audit record.
        assert_eq!(ticketing.audits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn distant_window_is_a_new_event() {
        let (_dir, pool) = test_pool();
        let (d, _) = dedup(pool.clone());

        d.ingest(&signal(1_700_000_000)).await.unwrap();
        // Two full durations later: adjacent no more.
        let outcome = d.ingest(&signal(1_700_001_200)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Created(_)));
        assert_eq!(TaskQueue::new(pool).queued_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn remediated_event_no_longer_absorbs_signals() {
        let (_dir, pool) = test_pool();
        let (d, _) = dedup(pool.clone());
        let store = EventStore::new(pool);

        let IngestOutcome::Created(id) = d.ingest(&signal(1_700_000_000)).await.unwrap() else {
            panic!("expected Created");
        };
        store.mark_remediated(id, 1, Utc::now()).unwrap();

        let outcome = d.ingest(&signal(1_700_000_300)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Created(_)));
    }

    #[tokio::test]
    async fn unattributable_signal_is_skipped() {
        let (_dir, pool) = test_pool();
        let queue = TaskQueue::new(pool.clone());
        let (d, ticketing) = dedup(pool);

        let mut s = signal(1_700_000_000);
        s.vm_name = Some("intruder-vm".to_string());
        assert_eq!(
            d.ingest(&s).await.unwrap(),
            IngestOutcome::Skipped("unattributable")
        );
        s.vm_name = None;
        assert_eq!(
            d.ingest(&s).await.unwrap(),
            IngestOutcome::Skipped("unattributable")
        );
        assert_eq!(queue.queued_count().unwrap(), 0);
        assert!(ticketing.audits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_window_is_skipped() {
        let (_dir, pool) = test_pool();
        let (d, _) = dedup(pool);
        let mut s = signal(1_700_000_000);
        s.time_window_duration = 0;
        assert_eq!(
            d.ingest(&s).await.unwrap(),
            IngestOutcome::Skipped("invalid_window")
        );
    }
}
