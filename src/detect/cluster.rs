//! Temporal clustering of a user's egress events into incidents.
//!
//! The scan is strictly left-to-right over creation time and compares each
//! candidate only to the current incident's latest event. Chains therefore
//! merge transitively: events at t=0, t=50, t=100 with a 60s window form one
//! incident even though t=0 and t=100 are further apart than the window.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::detect::{EgressEvent, Incident};
use crate::storage::EventStore;

/// Group an ascending-by-creation-time event slice into incidents.
///
/// A candidate joins the current incident iff it shares the incident's
/// workspace (unattributed events never match anything, including each
/// other) and its creation time is within `merge_window` of the incident's
/// latest event. Any other candidate starts a new incident.
pub fn cluster_events(events: &[EgressEvent], merge_window: Duration) -> Vec<Incident> {
    let mut incidents: Vec<Incident> = Vec::new();

    for event in events {
        let merged = match incidents.last_mut() {
            Some(current) if joins(current, event, merge_window) => {
                current.event_count += 1;
                current.latest_time = event.creation_time;
                true
            }
            _ => false,
        };
        if !merged {
            incidents.push(Incident {
                workspace_id: event.workspace_id.clone(),
                event_count: 1,
                earliest_time: event.creation_time,
                latest_time: event.creation_time,
            });
        }
    }

    incidents
}

fn joins(current: &Incident, candidate: &EgressEvent, merge_window: Duration) -> bool {
    let same_workspace = match (&current.workspace_id, &candidate.workspace_id) {
        (Some(a), Some(b)) => a == b,
        // NULL workspace is always distinct, even from another NULL.
        _ => false,
    };
    if !same_workspace {
        return false;
    }
    let gap = candidate.creation_time - current.latest_time;
    gap <= merge_window
}

/// Incident count for the event being remediated: cluster everything the
/// user did up to and including `as_of` and count the groups. History is
/// closed-world at `as_of.creation_time`; later events never shift an
/// earlier decision.
pub fn incident_count_for(
    store: &EventStore,
    as_of: &EgressEvent,
    merge_window: Duration,
) -> anyhow::Result<i64> {
    let history = store.find_history(&as_of.user_id, as_of.creation_time)?;
    let incidents = cluster_events(&history, merge_window);
    debug!(
        user_id = %as_of.user_id,
        events = history.len(),
        incidents = incidents.len(),
        "clustered egress history"
    );
    Ok(incidents.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::EventStatus;
    use crate::storage::testutil::{event_at, test_pool};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(workspace: Option<&str>, secs: i64) -> EgressEvent {
        event_at("alice", workspace, at(secs), EventStatus::Pending)
    }

    #[test]
    fn chained_events_merge_transitively() {
        let events = vec![
            event(Some("ws-1"), 0),
            event(Some("ws-1"), 50),
            event(Some("ws-1"), 100),
        ];
        let incidents = cluster_events(&events, Duration::seconds(60));
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].event_count, 3);
        assert_eq!(incidents[0].earliest_time, at(0));
        assert_eq!(incidents[0].latest_time, at(100));
    }

    #[test]
    fn gap_beyond_window_starts_new_incident() {
        let events = vec![event(Some("ws-1"), 0), event(Some("ws-1"), 61)];
        let incidents = cluster_events(&events, Duration::seconds(60));
        assert_eq!(incidents.len(), 2);
    }

    #[test]
    fn different_workspaces_never_merge() {
        let events = vec![event(Some("ws-1"), 0), event(Some("ws-2"), 0)];
        let incidents = cluster_events(&events, Duration::seconds(60));
        assert_eq!(incidents.len(), 2);
    }

    #[test]
    fn null_workspaces_never_merge_with_each_other() {
        let events = vec![event(None, 0), event(None, 1)];
        let incidents = cluster_events(&events, Duration::seconds(60));
        assert_eq!(incidents.len(), 2);
    }

    #[test]
    fn interleaved_workspace_breaks_the_chain() {
        // The scan keeps a single current incident, so a foreign-workspace
        // event in the middle splits the surrounding run.
        let events = vec![
            event(Some("ws-1"), 0),
            event(Some("ws-2"), 10),
            event(Some("ws-1"), 20),
        ];
        let incidents = cluster_events(&events, Duration::seconds(60));
        assert_eq!(incidents.len(), 3);
    }

    #[test]
    fn empty_history_clusters_to_nothing() {
        assert!(cluster_events(&[], Duration::seconds(60)).is_empty());
    }

    #[test]
    fn count_is_closed_world_and_skips_false_positives() {
        let (_dir, pool) = test_pool();
        let store = EventStore::new(pool);

        let first = event_at("alice", Some("ws-1"), at(0), EventStatus::Remediated);
        let fp = event_at("alice", Some("ws-1"), at(30), EventStatus::VerifiedFalsePositive);
        let current = event_at("alice", Some("ws-1"), at(7_200), EventStatus::Pending);
        let later = event_at("alice", Some("ws-1"), at(7_260), EventStatus::Pending);
        for e in [&first, &fp, &current, &later] {
            store.insert(e).unwrap();
        }

        // first and current are >1h apart: two incidents. fp and later are
        // invisible to this decision.
        let count = incident_count_for(&store, &current, Duration::seconds(3_600)).unwrap();
        assert_eq!(count, 2);
    }
}
