//! Egress event model, signal deduplication, and incident clustering.

pub mod cluster;
pub mod dedup;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an egress event.
///
/// `Pending` is the only state eligible for (re-)processing; the other two
/// are terminal. `VerifiedFalsePositive` is set by an external reviewer and
/// excludes the event from all future incident counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Remediated,
    VerifiedFalsePositive,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Remediated => "REMEDIATED",
            EventStatus::VerifiedFalsePositive => "VERIFIED_FALSE_POSITIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EventStatus::Pending),
            "REMEDIATED" => Some(EventStatus::Remediated),
            "VERIFIED_FALSE_POSITIVE" => Some(EventStatus::VerifiedFalsePositive),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, deduplicated egress anomaly record.
#[derive(Debug, Clone, Serialize)]
pub struct EgressEvent {
    pub id: Uuid,
    pub user_id: String,
    /// `None` means unattributed; unattributed events never merge with each
    /// other during clustering.
    pub workspace_id: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_duration_secs: i64,
    pub egress_megabytes: f64,
    pub threshold_megabytes: f64,
    /// Opaque upstream payload, kept for diagnostics and environment-label
    /// extraction only.
    pub raw_signal: String,
    pub status: EventStatus,
    /// Cached at remediation time for audit reads; decisions always
    /// recompute from history.
    pub incident_count: Option<i64>,
}

impl EgressEvent {
    /// Re-parse the stored raw signal, if it is still intelligible.
    pub fn signal(&self) -> Option<EgressSignal> {
        serde_json::from_str(&self.raw_signal).ok()
    }

    /// Environment label for notification copy and workload exclusions.
    pub fn environment_label(&self) -> EnvironmentLabel {
        self.signal()
            .map(|s| s.environment_label())
            .unwrap_or(EnvironmentLabel::Unknown)
    }
}

/// Raw anomaly notification from the upstream traffic monitor.
///
/// The shape follows the monitor's webhook payload; this subsystem only
/// interprets the actor/window/magnitude fields and the VM/app naming used
/// for environment labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressSignal {
    /// Cloud project backing the workspace, when the monitor could attribute
    /// the traffic to one.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Name of the VM the traffic originated from.
    #[serde(default)]
    pub vm_name: Option<String>,
    /// Kubernetes app name for in-cluster environments (RStudio, Cromwell).
    #[serde(default)]
    pub gke_service_name: Option<String>,
    /// Epoch seconds of the anomalous window's start.
    pub time_window_start: i64,
    /// Window length in seconds.
    pub time_window_duration: i64,
    /// Observed egress over the window, MiB.
    pub egress_mib: f64,
    /// Threshold the window exceeded, MiB.
    pub egress_mib_threshold: f64,
}

impl EgressSignal {
    pub fn window_start(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.time_window_start, 0).unwrap_or_default()
    }

    /// Classify the originating environment from VM/app naming.
    pub fn environment_label(&self) -> EnvironmentLabel {
        if let Some(app) = &self.gke_service_name {
            let app = app.to_ascii_lowercase();
            if app.contains("cromwell") {
                return EnvironmentLabel::Cromwell;
            }
            if app.contains("rstudio") {
                return EnvironmentLabel::RStudio;
            }
        }
        if self.vm_name.is_some() {
            return EnvironmentLabel::Jupyter;
        }
        EnvironmentLabel::Unknown
    }

    /// Whether the traffic came from a platform-managed batch workload run
    /// on the user's behalf rather than an interactive environment.
    pub fn is_managed_workload(&self) -> bool {
        matches!(self.environment_label(), EnvironmentLabel::Cromwell)
    }
}

/// Originating compute environment, as far as the signal reveals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvironmentLabel {
    Jupyter,
    RStudio,
    Cromwell,
    Unknown,
}

impl std::fmt::Display for EnvironmentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentLabel::Jupyter => "Jupyter",
            EnvironmentLabel::RStudio => "RStudio",
            EnvironmentLabel::Cromwell => "Cromwell",
            EnvironmentLabel::Unknown => "analysis",
        };
        f.write_str(s)
    }
}

/// A derived cluster of temporally related events for one user, judged to
/// represent one continuous abuse episode. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub workspace_id: Option<String>,
    pub event_count: usize,
    pub earliest_time: DateTime<Utc>,
    pub latest_time: DateTime<Utc>,
}

/// Resolves the actor behind a raw signal. Production implementations may
/// consult external directories; tests substitute fixed mappings.
#[async_trait::async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve_user(&self, signal: &EgressSignal) -> Option<String>;
    async fn resolve_workspace(&self, signal: &EgressSignal) -> Option<String>;
}

/// Resolver that derives the user from the VM naming convention
/// `<prefix>-<user>[-<suffix>]` and the workspace from the project name.
pub struct VmNameResolver {
    vm_prefix: String,
}

impl VmNameResolver {
    pub fn new(vm_prefix: impl Into<String>) -> Self {
        Self {
            vm_prefix: vm_prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl ActorResolver for VmNameResolver {
    async fn resolve_user(&self, signal: &EgressSignal) -> Option<String> {
        let vm_name = signal.vm_name.as_deref()?;
        let prefix = format!("{}-", self.vm_prefix);
        let rest = vm_name.strip_prefix(prefix.as_str())?;
        // Trailing "-<n>" runtime suffixes are not part of the user id.
        let user = rest.split('-').next()?;
        if user.is_empty() {
            None
        } else {
            Some(user.to_string())
        }
    }

    async fn resolve_workspace(&self, signal: &EgressSignal) -> Option<String> {
        signal.project_name.clone()
    }
}
