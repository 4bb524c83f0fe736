//! Mail-relay client. Delivery failures are the caller's concern to
//! downgrade; the client itself only retries transient faults.

use reqwest::Client;
use serde_json::json;

use crate::clients::{check_status, retry::with_backoff, ClientError};
use crate::config::RetryConfig;
use crate::remediate::Mailer;

pub struct HttpMailer {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpMailer {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
        }
    }

    async fn send_once(&self, user_id: &str, subject: &str, body: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/mail/send", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "recipient": user_id,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await?;
        check_status(&resp)
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send_remediation_email(
        &self,
        user_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ClientError> {
        with_backoff(&self.retry, "mail.send", || {
            self.send_once(user_id, subject, body)
        })
        .await
    }
}
