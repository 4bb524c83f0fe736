//! Downstream collaborator clients -- compute control plane, account
//! service, mail relay, and ticketing.
//!
//! Every client shares one failure taxonomy and one retry wrapper; the
//! retryability classification (5xx and transport-level failures) lives on
//! the error type so no client reimplements it.

pub mod accounts;
pub mod compute;
pub mod mail;
pub mod retry;
pub mod ticket;

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("downstream returned HTTP {status}")]
    Http { status: u16 },
    #[error("downstream request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode downstream response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transient failures worth a bounded-backoff retry: server errors,
    /// timeouts, and connection-level faults. 4xx responses are contract
    /// violations and surface immediately.
    pub fn retryable(&self) -> bool {
        match self {
            ClientError::Http { status } => *status >= 500,
            ClientError::Timeout | ClientError::Transport(_) => true,
            ClientError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Map a response's status line into the shared taxonomy.
pub(crate) fn check_status(resp: &reqwest::Response) -> Result<(), ClientError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::Http {
            status: status.as_u16(),
        })
    }
}

/// Shared reqwest client with the configured per-request timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(client)
}
