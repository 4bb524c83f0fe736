//! Remediation: collaborator seams, the executor state machine, and the
//! notifier.
//!
//! The executor is composed from an injected collaborator bundle and an
//! immutable config snapshot; deployments vary by swapping collaborator
//! implementations, not by subclassing.

pub mod executor;
pub mod notify;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::clients::ClientError;
use crate::detect::EgressEvent;
use crate::policy::EscalationAction;

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("event {0} not found")]
    EventNotFound(uuid::Uuid),
    #[error("downstream call failed: {0}")]
    Downstream(#[from] ClientError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RemediationError {
    /// Whether redelivering the task can change the outcome.
    pub fn retryable(&self) -> bool {
        match self {
            RemediationError::EventNotFound(_) => false,
            RemediationError::Downstream(e) => e.retryable(),
            RemediationError::Storage(_) => true,
        }
    }
}

/// Compute control plane: pause or stop a user's running environments.
/// Suspending an already-suspended resource and stopping an already-stopped
/// one are contracted to be no-ops downstream.
#[async_trait::async_trait]
pub trait ComputeControl: Send + Sync {
    async fn suspend_all_user_compute(
        &self,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), ClientError>;
    async fn stop_all_user_compute(&self, user_id: &str) -> Result<(), ClientError>;
}

/// Account service: disablement flag and the persisted security-suspension
/// end time on the user record.
#[async_trait::async_trait]
pub trait AccountControl: Send + Sync {
    async fn set_disabled(&self, user_id: &str, disabled: bool) -> Result<(), ClientError>;
    async fn security_suspended_until(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ClientError>;
    async fn set_security_suspended_until(
        &self,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), ClientError>;
}

/// Administrator-granted allowance for expected large downloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BypassWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BypassWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

#[async_trait::async_trait]
pub trait BypassLookup: Send + Sync {
    async fn current_bypass_window(
        &self,
        user_id: &str,
    ) -> Result<Option<BypassWindow>, ClientError>;
}

/// Mail relay. Delivery is best-effort; remediation correctness never
/// depends on it.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_remediation_email(
        &self,
        user_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ClientError>;
}

/// Ticketing and audit sink; the durable record of every action taken.
#[async_trait::async_trait]
pub trait Ticketing: Send + Sync {
    async fn file_incident_record(
        &self,
        event: &EgressEvent,
        action: &EscalationAction,
    ) -> Result<(), ClientError>;
    async fn fire_audit_event(
        &self,
        event: &EgressEvent,
        user_id: &str,
        reason: &str,
    ) -> Result<(), ClientError>;
}

/// Bundle of collaborator handles injected into the executor and notifier.
#[derive(Clone)]
pub struct Collaborators {
    pub compute: Arc<dyn ComputeControl>,
    pub accounts: Arc<dyn AccountControl>,
    pub bypass: Arc<dyn BypassLookup>,
    pub mailer: Arc<dyn Mailer>,
    pub ticketing: Arc<dyn Ticketing>,
}

/// Later of the proposed suspension end and any still-standing one; a
/// shorter concurrent action must never shorten an existing suspension.
pub fn merge_suspension_until(
    existing: Option<DateTime<Utc>>,
    proposed: DateTime<Utc>,
) -> DateTime<Utc> {
    match existing {
        Some(existing) if existing > proposed => existing,
        _ => proposed,
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Counting mock collaborators shared by executor and notifier tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockCompute {
        pub suspend_calls: AtomicUsize,
        pub stop_calls: AtomicUsize,
        pub last_until: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait::async_trait]
    impl ComputeControl for MockCompute {
        async fn suspend_all_user_compute(
            &self,
            _user_id: &str,
            until: DateTime<Utc>,
        ) -> Result<(), ClientError> {
            self.suspend_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_until.lock().unwrap() = Some(until);
            Ok(())
        }

        async fn stop_all_user_compute(&self, _user_id: &str) -> Result<(), ClientError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockAccounts {
        pub disable_calls: AtomicUsize,
        pub suspended_until: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait::async_trait]
    impl AccountControl for MockAccounts {
        async fn set_disabled(&self, _user_id: &str, _disabled: bool) -> Result<(), ClientError> {
            self.disable_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn security_suspended_until(
            &self,
            _user_id: &str,
        ) -> Result<Option<DateTime<Utc>>, ClientError> {
            Ok(*self.suspended_until.lock().unwrap())
        }

        async fn set_security_suspended_until(
            &self,
            _user_id: &str,
            until: DateTime<Utc>,
        ) -> Result<(), ClientError> {
            *self.suspended_until.lock().unwrap() = Some(until);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockBypass {
        pub window: Mutex<Option<BypassWindow>>,
    }

    #[async_trait::async_trait]
    impl BypassLookup for MockBypass {
        async fn current_bypass_window(
            &self,
            _user_id: &str,
        ) -> Result<Option<BypassWindow>, ClientError> {
            Ok(self.window.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    pub struct MockMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Mailer for MockMailer {
        async fn send_remediation_email(
            &self,
            user_id: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), ClientError> {
            if self.fail.load(Ordering::SeqCst) > 0 {
                return Err(ClientError::Http { status: 502 });
            }
            self.sent.lock().unwrap().push((
                user_id.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockTicketing {
        pub incidents: AtomicUsize,
        pub audits: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Ticketing for MockTicketing {
        async fn file_incident_record(
            &self,
            _event: &EgressEvent,
            _action: &EscalationAction,
        ) -> Result<(), ClientError> {
            self.incidents.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fire_audit_event(
            &self,
            _event: &EgressEvent,
            _user_id: &str,
            reason: &str,
        ) -> Result<(), ClientError> {
            self.audits.lock().unwrap().push(reason.to_string());
            Ok(())
        }
    }

    pub struct MockBundle {
        pub compute: Arc<MockCompute>,
        pub accounts: Arc<MockAccounts>,
        pub bypass: Arc<MockBypass>,
        pub mailer: Arc<MockMailer>,
        pub ticketing: Arc<MockTicketing>,
    }

    impl MockBundle {
        pub fn new() -> Self {
            Self {
                compute: Arc::new(MockCompute::default()),
                accounts: Arc::new(MockAccounts::default()),
                bypass: Arc::new(MockBypass::default()),
                mailer: Arc::new(MockMailer::default()),
                ticketing: Arc::new(MockTicketing::default()),
            }
        }

        pub fn collaborators(&self) -> Collaborators {
            Collaborators {
                compute: self.compute.clone(),
                accounts: self.accounts.clone(),
                bypass: self.bypass.clone(),
                mailer: self.mailer.clone(),
                ticketing: self.ticketing.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn suspension_never_regresses() {
        let now = Utc::now();
        let longer = now + Duration::minutes(10);
        let shorter = now + Duration::minutes(5);

        assert_eq!(merge_suspension_until(Some(longer), shorter), longer);
        assert_eq!(merge_suspension_until(Some(shorter), longer), longer);
        assert_eq!(merge_suspension_until(None, shorter), shorter);
        // An expired suspension never wins.
        assert_eq!(
            merge_suspension_until(Some(now - Duration::minutes(1)), shorter),
            shorter
        );
    }

    #[test]
    fn bypass_window_activity() {
        let now = Utc::now();
        let window = BypassWindow {
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
        };
        assert!(window.is_active(now));
        assert!(!window.is_active(now + Duration::hours(2)));
        assert!(!window.is_active(now - Duration::hours(2)));
    }
}
