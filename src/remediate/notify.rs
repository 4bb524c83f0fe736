//! Remediation emails with duplicate suppression.
//!
//! A second email for the same user and workspace is suppressed while any
//! other event there reached `REMEDIATED` within the cooldown window;
//! unrelated incidents in other workspaces still notify. Delivery is
//! best-effort and never fails the pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use askama::Template;
use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::detect::{EgressEvent, EnvironmentLabel};
use crate::policy::EscalationAction;
use crate::remediate::Mailer;
use crate::storage::EventStore;

#[derive(Template)]
#[template(path = "suspend_email.txt")]
struct SuspendEmail<'a> {
    user_id: &'a str,
    environment: EnvironmentLabel,
    workspace: &'a Option<String>,
    egress_mb: String,
    threshold_mb: String,
    duration_minutes: i64,
    support_email: &'a str,
}

#[derive(Template)]
#[template(path = "disable_email.txt")]
struct DisableEmail<'a> {
    user_id: &'a str,
    environment: EnvironmentLabel,
    workspace: &'a Option<String>,
    egress_mb: String,
    threshold_mb: String,
    support_email: &'a str,
}

pub struct Notifier {
    store: EventStore,
    mailer: Arc<dyn Mailer>,
    cooldown: Duration,
    support_email: String,
}

impl Notifier {
    pub fn new(
        store: EventStore,
        mailer: Arc<dyn Mailer>,
        cooldown: Duration,
        support_email: String,
    ) -> Self {
        Self {
            store,
            mailer,
            cooldown,
            support_email,
        }
    }

    /// Email the affected user about `action`, unless a recent remediation
    /// in the same workspace already did. Returns whether a mail was sent.
    pub async fn maybe_notify(
        &self,
        event: &EgressEvent,
        action: &EscalationAction,
    ) -> Result<bool> {
        let since = Utc::now() - self.cooldown;
        let suppressed = self
            .store
            .any_remediated_since(&event.user_id, event.workspace_id.as_deref(), since, event.id)
            .context("cooldown lookup failed")?;
        if suppressed {
            debug!(
                event_id = %event.id,
                user_id = %event.user_id,
                "suppressing remediation email within cooldown"
            );
            return Ok(false);
        }

        let (subject, body) = compose(event, action, &self.support_email)?;
        self.mailer
            .send_remediation_email(&event.user_id, &subject, &body)
            .await
            .context("mail relay rejected remediation email")?;
        info!(event_id = %event.id, user_id = %event.user_id, "sent remediation email");
        Ok(true)
    }
}

/// Render subject and body for an action. Copy varies by action kind and by
/// the originating environment when the raw signal still reveals it.
fn compose(
    event: &EgressEvent,
    action: &EscalationAction,
    support_email: &str,
) -> Result<(String, String)> {
    let environment = event.environment_label();
    let egress_mb = format!("{:.1}", event.egress_megabytes);
    let threshold_mb = format!("{:.1}", event.threshold_megabytes);

    match action {
        EscalationAction::SuspendCompute { duration_minutes } => {
            let body = SuspendEmail {
                user_id: &event.user_id,
                environment,
                workspace: &event.workspace_id,
                egress_mb,
                threshold_mb,
                duration_minutes: *duration_minutes,
                support_email,
            }
            .render()
            .context("failed to render suspension email")?;
            Ok((
                "Your compute environments have been temporarily paused".to_string(),
                body,
            ))
        }
        EscalationAction::DisableUser => {
            let body = DisableEmail {
                user_id: &event.user_id,
                environment,
                workspace: &event.workspace_id,
                egress_mb,
                threshold_mb,
                support_email,
            }
            .render()
            .context("failed to render disablement email")?;
            Ok(("Your Research Workbench account has been disabled".to_string(), body))
        }
    }
}
