//! Account-service client: disablement flag, security-suspension end time,
//! and administrator-granted egress bypass windows.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::clients::{check_status, retry::with_backoff, ClientError};
use crate::config::RetryConfig;
use crate::remediate::{AccountControl, BypassLookup, BypassWindow};

pub struct HttpAccountService {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpAccountService {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
        }
    }

    async fn set_disabled_once(&self, user_id: &str, disabled: bool) -> Result<(), ClientError> {
        let url = format!("{}/api/admin/users/{}/disabled", self.base_url, user_id);
        let resp = self
            .client
            .put(&url)
            .json(&json!({ "disabled": disabled }))
            .send()
            .await?;
        check_status(&resp)
    }

    async fn get_suspension_once(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Suspension {
            suspended_until: Option<DateTime<Utc>>,
        }

        let url = format!(
            "{}/api/admin/users/{}/security-suspension",
            self.base_url, user_id
        );
        let resp = self.client.get(&url).send().await?;
        check_status(&resp)?;
        let body: Suspension = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.suspended_until)
    }

    async fn set_suspension_once(
        &self,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/api/admin/users/{}/security-suspension",
            self.base_url, user_id
        );
        let resp = self
            .client
            .put(&url)
            .json(&json!({ "suspendedUntil": until.to_rfc3339() }))
            .send()
            .await?;
        check_status(&resp)
    }

    async fn bypass_once(&self, user_id: &str) -> Result<Option<BypassWindow>, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Bypass {
            bypass_window: Option<BypassWindow>,
        }

        let url = format!("{}/api/admin/users/{}/egress-bypass", self.base_url, user_id);
        let resp = self.client.get(&url).send().await?;
        check_status(&resp)?;
        let body: Bypass = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.bypass_window)
    }
}

#[async_trait::async_trait]
impl AccountControl for HttpAccountService {
    async fn set_disabled(&self, user_id: &str, disabled: bool) -> Result<(), ClientError> {
        with_backoff(&self.retry, "accounts.set_disabled", || {
            self.set_disabled_once(user_id, disabled)
        })
        .await
    }

    async fn security_suspended_until(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ClientError> {
        with_backoff(&self.retry, "accounts.get_suspension", || {
            self.get_suspension_once(user_id)
        })
        .await
    }

    async fn set_security_suspended_until(
        &self,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        with_backoff(&self.retry, "accounts.set_suspension", || {
            self.set_suspension_once(user_id, until)
        })
        .await
    }
}

#[async_trait::async_trait]
impl BypassLookup for HttpAccountService {
    async fn current_bypass_window(
        &self,
        user_id: &str,
    ) -> Result<Option<BypassWindow>, ClientError> {
        with_backoff(&self.retry, "accounts.bypass", || self.bypass_once(user_id)).await
    }
}
