//! Remediation executor: the per-event state machine.
//!
//! Invoked by the queue worker with at-least-once delivery, so everything
//! here is idempotent up to the single commit point, the conditional
//! `PENDING -> REMEDIATED` status update. Workload and bypass exclusions
//! are evaluated before the policy ladder is consulted.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::detect::cluster::incident_count_for;
use crate::detect::EgressEvent;
use crate::policy::{EscalationAction, EscalationPolicy};
use crate::remediate::notify::Notifier;
use crate::remediate::{merge_suspension_until, Collaborators, RemediationError};
use crate::storage::EventStore;

/// Immutable per-run configuration snapshot for the executor.
#[derive(Clone)]
pub struct RemediationConfig {
    pub policy: EscalationPolicy,
    pub merge_window: Duration,
    pub bypass_hard_ceiling_mib: f64,
}

impl RemediationConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            policy: cfg.escalation_policy(),
            merge_window: Duration::seconds(cfg.clustering.incident_merge_window_secs),
            bypass_hard_ceiling_mib: cfg.bypass.hard_ceiling_mib,
        }
    }
}

/// What a remediation run did, for task logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RemediationOutcome {
    /// Event already left `PENDING`; duplicate delivery is a no-op.
    AlreadyProcessed,
    /// Incident count below the lowest tier; event stays `PENDING`.
    NoApplicableTier { incident_count: i64 },
    /// Platform-managed workload: no action, no status change.
    SkippedManagedWorkload,
    /// Active bypass window below the hard ceiling; event marked
    /// `REMEDIATED` so redelivery cannot loop on it.
    SkippedBypass,
    Executed {
        action: EscalationAction,
        incident_count: i64,
    },
}

impl std::fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationOutcome::AlreadyProcessed => f.write_str("already_processed"),
            RemediationOutcome::NoApplicableTier { incident_count } => {
                write!(f, "no_applicable_tier(incidents={incident_count})")
            }
            RemediationOutcome::SkippedManagedWorkload => f.write_str("skipped_managed_workload"),
            RemediationOutcome::SkippedBypass => f.write_str("skipped_bypass"),
            RemediationOutcome::Executed {
                action,
                incident_count,
            } => write!(f, "executed({}, incidents={incident_count})", action.kind()),
        }
    }
}

pub struct RemediationExecutor {
    store: EventStore,
    collaborators: Collaborators,
    notifier: Notifier,
    config: RemediationConfig,
}

impl RemediationExecutor {
    pub fn new(
        store: EventStore,
        collaborators: Collaborators,
        notifier: Notifier,
        config: RemediationConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            notifier,
            config,
        }
    }

    /// Process one enqueued event end to end.
    pub async fn remediate(&self, event_id: Uuid) -> Result<RemediationOutcome, RemediationError> {
        let event = self
            .store
            .find_by_id(event_id)?
            .ok_or(RemediationError::EventNotFound(event_id))?;

        if event.status.is_terminal() {
            return Ok(RemediationOutcome::AlreadyProcessed);
        }

        if event.signal().is_some_and(|s| s.is_managed_workload()) {
            info!(
                event_id = %event.id,
                user_id = %event.user_id,
                "egress attributed to managed workload, skipping remediation"
            );
            if let Err(e) = self
                .collaborators
                .ticketing
                .fire_audit_event(&event, &event.user_id, "managed_workload")
                .await
            {
                warn!(event_id = %event.id, "failed to audit workload skip: {e}");
            }
            return Ok(RemediationOutcome::SkippedManagedWorkload);
        }

        let now = Utc::now();
        if let Some(window) = self
            .collaborators
            .bypass
            .current_bypass_window(&event.user_id)
            .await?
        {
            if window.is_active(now) && event.egress_megabytes < self.config.bypass_hard_ceiling_mib
            {
                return self.skip_for_bypass(&event).await;
            }
        }

        let incident_count = incident_count_for(&self.store, &event, self.config.merge_window)?;
        let Some(tier) = self.config.policy.evaluate(incident_count) else {
            info!(
                event_id = %event.id,
                user_id = %event.user_id,
                incident_count,
                "incident count below lowest escalation tier, leaving event pending"
            );
            return Ok(RemediationOutcome::NoApplicableTier { incident_count });
        };
        let action = tier.action.clone();

        self.execute_action(&event, &action).await?;

        self.collaborators
            .ticketing
            .file_incident_record(&event, &action)
            .await?;

        // Best-effort: remediation correctness never depends on delivery.
        if let Err(e) = self.notifier.maybe_notify(&event, &action).await {
            warn!(event_id = %event.id, "remediation email not delivered: {e:#}");
        }

        if !self.store.mark_remediated(event.id, incident_count, Utc::now())? {
            // Another worker committed first; its actions were equivalent.
            return Ok(RemediationOutcome::AlreadyProcessed);
        }

        info!(
            event_id = %event.id,
            user_id = %event.user_id,
            incident_count,
            action = action.kind(),
            "egress event remediated"
        );
        Ok(RemediationOutcome::Executed {
            action,
            incident_count,
        })
    }

    /// Active bypass below the hard ceiling: no action or email, but the
    /// event is committed as processed so redelivery cannot loop while the
    /// bypass stays active.
    async fn skip_for_bypass(
        &self,
        event: &EgressEvent,
    ) -> Result<RemediationOutcome, RemediationError> {
        let incident_count = incident_count_for(&self.store, event, self.config.merge_window)?;
        if let Err(e) = self
            .collaborators
            .ticketing
            .fire_audit_event(event, &event.user_id, "bypass_active")
            .await
        {
            warn!(event_id = %event.id, "failed to audit bypass skip: {e}");
        }
        self.store
            .mark_remediated(event.id, incident_count, Utc::now())?;
        info!(
            event_id = %event.id,
            user_id = %event.user_id,
            "active egress bypass window, remediation skipped"
        );
        Ok(RemediationOutcome::SkippedBypass)
    }

    async fn execute_action(
        &self,
        event: &EgressEvent,
        action: &EscalationAction,
    ) -> Result<(), RemediationError> {
        match action {
            EscalationAction::SuspendCompute { duration_minutes } => {
                let proposed = Utc::now() + Duration::minutes(*duration_minutes);
                let existing = self
                    .collaborators
                    .accounts
                    .security_suspended_until(&event.user_id)
                    .await?;
                let until = merge_suspension_until(existing.filter(|t| *t > Utc::now()), proposed);
                self.collaborators
                    .compute
                    .suspend_all_user_compute(&event.user_id, until)
                    .await?;
                self.collaborators
                    .accounts
                    .set_security_suspended_until(&event.user_id, until)
                    .await?;
            }
            EscalationAction::DisableUser => {
                // Disabling alone does not stop already-running resources.
                self.collaborators
                    .accounts
                    .set_disabled(&event.user_id, true)
                    .await?;
                self.collaborators
                    .compute
                    .stop_all_user_compute(&event.user_id)
                    .await?;
            }
        }
        Ok(())
    }
}
