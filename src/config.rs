//! TOML configuration for the egressguard daemon.
//!
//! Layered load: an environment variable can point at an explicit config
//! file, otherwise the standard system location is tried, otherwise the
//! compiled-in defaults apply. The escalation policy is validated at load
//! time; an invalid policy degrades to "no escalation applies" with a loud
//! log rather than aborting the process.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::policy::{EscalationPolicy, EscalationTier};

/// Environment variable that overrides the config file path.
pub const CONFIG_ENV_VAR: &str = "EGRESSGUARD_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/egressguard/egressguard.toml";

/// Root configuration for the egressguard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub clustering: ClusteringConfig,
    pub notification: NotificationConfig,
    pub bypass: BypassConfig,
    pub retry: RetryConfig,
    pub tasks: TaskConfig,
    pub services: ServicesConfig,
    pub resolver: ResolverConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded egressguard configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `EGRESSGUARD_CONFIG` environment variable.
    /// 2. `/etc/egressguard/egressguard.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "EGRESSGUARD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Build the validated escalation policy from the configured tiers.
    ///
    /// A misconfigured policy (non-monotonic thresholds) silently disables
    /// remediation, so the rejection is logged at error level and an empty
    /// policy is returned.
    pub fn escalation_policy(&self) -> EscalationPolicy {
        match EscalationPolicy::new(self.policy.escalations.clone()) {
            Ok(policy) => {
                if policy.is_empty() {
                    warn!("escalation policy is empty; no remediation action will ever be taken");
                }
                policy
            }
            Err(e) => {
                error!(error = %e, "rejecting escalation policy; remediation is disabled");
                EscalationPolicy::empty()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the ingest/read API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/egressguard/egressguard.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation policy
// ---------------------------------------------------------------------------

/// Ordered escalation ladder, lowest threshold first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub escalations: Vec<EscalationTier>,
}

// ---------------------------------------------------------------------------
// Incident clustering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Maximum gap, in seconds, between an incident's latest event and a
    /// candidate event for the candidate to join the incident.
    pub incident_merge_window_secs: i64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            // Same-day scale: events within 24h of the incident's tail chain
            // into one incident.
            incident_merge_window_secs: 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Suppress a second email for the same user+workspace if one event was
    /// already remediated within this many seconds.
    pub cooldown_secs: i64,
    /// Support contact shown in remediation emails.
    pub support_email: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3_600,
            support_email: "support@workbench.example.org".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bypass windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassConfig {
    /// Hard ceiling in MiB above which an event is remediated even while an
    /// administrator-granted bypass window is active.
    pub hard_ceiling_mib: f64,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            hard_ceiling_mib: 51_200.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Downstream-call retry
// ---------------------------------------------------------------------------

/// Shared retry policy for every downstream collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Remediation task queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Worker poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Maximum delivery attempts before a task is marked failed.
    pub max_attempts: i64,
    /// Base redelivery delay in seconds (doubled per attempt).
    pub retry_base_secs: i64,
    /// Maximum tasks claimed per poll.
    pub claim_limit: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_attempts: 5,
            retry_base_secs: 30,
            claim_limit: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Downstream services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Compute control plane (VM suspend/stop).
    pub compute_base_url: String,
    /// Account service (disable, security suspension, bypass windows).
    pub accounts_base_url: String,
    /// Mail relay.
    pub mail_base_url: String,
    /// Ticketing / audit sink.
    pub ticketing_base_url: String,
    /// Per-request timeout in seconds for all downstream clients.
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            compute_base_url: "http://localhost:8081".to_string(),
            accounts_base_url: "http://localhost:8082".to_string(),
            mail_base_url: "http://localhost:8083".to_string(),
            ticketing_base_url: "http://localhost:8084".to_string(),
            request_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// VM name prefix for user-owned compute; the user id is the segment
    /// after this prefix (e.g. "wb-<user>" for vm "wb-alice-2").
    pub vm_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            vm_prefix: "wb".to_string(),
        }
    }
}
