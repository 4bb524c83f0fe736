//! Ticketing and audit client: the durable record of detections and of
//! every action taken or skipped.

use reqwest::Client;
use serde_json::json;

use crate::clients::{check_status, retry::with_backoff, ClientError};
use crate::config::RetryConfig;
use crate::detect::EgressEvent;
use crate::policy::EscalationAction;
use crate::remediate::Ticketing;

pub struct HttpTicketing {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpTicketing {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
        }
    }

    async fn file_once(
        &self,
        event: &EgressEvent,
        action: &EscalationAction,
    ) -> Result<(), ClientError> {
        let url = format!("{}/api/tickets", self.base_url);
        let summary = format!(
            "High-egress event for {} ({:.1} MB over {} MB threshold)",
            event.user_id, event.egress_megabytes, event.threshold_megabytes
        );
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "summary": summary,
                "eventId": event.id,
                "userId": event.user_id,
                "workspaceId": event.workspace_id,
                "windowStart": event.window_start.to_rfc3339(),
                "windowDurationSecs": event.window_duration_secs,
                "action": action.kind(),
            }))
            .send()
            .await?;
        check_status(&resp)
    }

    async fn audit_once(
        &self,
        event: &EgressEvent,
        user_id: &str,
        reason: &str,
    ) -> Result<(), ClientError> {
        let url = format!("{}/api/audit", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "eventId": event.id,
                "userId": user_id,
                "reason": reason,
            }))
            .send()
            .await?;
        check_status(&resp)
    }
}

#[async_trait::async_trait]
impl Ticketing for HttpTicketing {
    async fn file_incident_record(
        &self,
        event: &EgressEvent,
        action: &EscalationAction,
    ) -> Result<(), ClientError> {
        with_backoff(&self.retry, "ticket.file", || self.file_once(event, action)).await
    }

    async fn fire_audit_event(
        &self,
        event: &EgressEvent,
        user_id: &str,
        reason: &str,
    ) -> Result<(), ClientError> {
        with_backoff(&self.retry, "ticket.audit", || {
            self.audit_once(event, user_id, reason)
        })
        .await
    }
}
