//! Compute control-plane client: pause and stop user environments.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;

use crate::clients::{check_status, retry::with_backoff, ClientError};
use crate::config::RetryConfig;
use crate::remediate::ComputeControl;

pub struct HttpComputeControl {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpComputeControl {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
        }
    }

    async fn suspend_once(&self, user_id: &str, until: DateTime<Utc>) -> Result<(), ClientError> {
        let url = format!("{}/api/admin/users/{}/compute/suspend", self.base_url, user_id);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "suspendUntil": until.to_rfc3339() }))
            .send()
            .await?;
        check_status(&resp)
    }

    async fn stop_once(&self, user_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/admin/users/{}/compute/stop", self.base_url, user_id);
        let resp = self.client.post(&url).send().await?;
        check_status(&resp)
    }
}

#[async_trait::async_trait]
impl ComputeControl for HttpComputeControl {
    async fn suspend_all_user_compute(
        &self,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        with_backoff(&self.retry, "compute.suspend", || {
            self.suspend_once(user_id, until)
        })
        .await
    }

    async fn stop_all_user_compute(&self, user_id: &str) -> Result<(), ClientError> {
        with_backoff(&self.retry, "compute.stop", || self.stop_once(user_id)).await
    }
}
