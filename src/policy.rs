//! Escalation policy: an ordered ladder mapping incident counts to
//! remediation actions.
//!
//! The ladder is loaded once from config, validated, and read-only
//! afterward. Evaluation is a pure lookup: the tier with the largest
//! threshold at or below the incident count wins.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("escalation thresholds must be strictly increasing: tier {index} has threshold {threshold} after {previous}")]
    NonMonotonic {
        index: usize,
        threshold: i64,
        previous: i64,
    },
    #[error("escalation threshold must be at least 1, got {0}")]
    ThresholdBelowOne(i64),
}

/// Remediation action attached to an escalation tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationAction {
    /// Temporarily pause all of the user's compute resources.
    SuspendCompute { duration_minutes: i64 },
    /// Disable the account and stop all running compute.
    DisableUser,
}

impl EscalationAction {
    /// Short machine-readable name, used in audit records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EscalationAction::SuspendCompute { .. } => "suspend_compute",
            EscalationAction::DisableUser => "disable_user",
        }
    }
}

/// One rung of the escalation ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTier {
    /// Minimum incident count (inclusive) for this tier to apply.
    pub after_incident_count: i64,
    pub action: EscalationAction,
}

/// Validated, immutable escalation ladder.
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    tiers: Vec<EscalationTier>,
}

impl EscalationPolicy {
    /// Validate and build a policy. Thresholds must be >= 1 and strictly
    /// increasing; anything else is rejected at load time so the evaluator
    /// never has to tie-break.
    pub fn new(tiers: Vec<EscalationTier>) -> Result<Self, PolicyError> {
        let mut previous: Option<i64> = None;
        for (index, tier) in tiers.iter().enumerate() {
            if tier.after_incident_count < 1 {
                return Err(PolicyError::ThresholdBelowOne(tier.after_incident_count));
            }
            if let Some(prev) = previous {
                if tier.after_incident_count <= prev {
                    return Err(PolicyError::NonMonotonic {
                        index,
                        threshold: tier.after_incident_count,
                        previous: prev,
                    });
                }
            }
            previous = Some(tier.after_incident_count);
        }
        Ok(Self { tiers })
    }

    /// A policy under which no incident count ever escalates.
    pub fn empty() -> Self {
        Self { tiers: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Select the tier with the largest threshold `<= incident_count`, or
    /// `None` if the count is below the lowest rung.
    pub fn evaluate(&self, incident_count: i64) -> Option<&EscalationTier> {
        self.tiers
            .iter()
            .rev()
            .find(|tier| tier.after_incident_count <= incident_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tier_policy() -> EscalationPolicy {
        EscalationPolicy::new(vec![
            EscalationTier {
                after_incident_count: 1,
                action: EscalationAction::SuspendCompute { duration_minutes: 1 },
            },
            EscalationTier {
                after_incident_count: 2,
                action: EscalationAction::SuspendCompute { duration_minutes: 2 },
            },
            EscalationTier {
                after_incident_count: 3,
                action: EscalationAction::DisableUser,
            },
        ])
        .unwrap()
    }

    #[test]
    fn evaluates_highest_applicable_tier() {
        let policy = three_tier_policy();
        let cases: &[(i64, Option<EscalationAction>)] = &[
            (0, None),
            (1, Some(EscalationAction::SuspendCompute { duration_minutes: 1 })),
            (2, Some(EscalationAction::SuspendCompute { duration_minutes: 2 })),
            (3, Some(EscalationAction::DisableUser)),
            (4, Some(EscalationAction::DisableUser)),
            (100, Some(EscalationAction::DisableUser)),
        ];
        for (count, expected) in cases {
            let got = policy.evaluate(*count).map(|t| t.action.clone());
            assert_eq!(&got, expected, "incident count {count}");
        }
    }

    #[test]
    fn empty_policy_never_escalates() {
        let policy = EscalationPolicy::empty();
        assert!(policy.evaluate(0).is_none());
        assert!(policy.evaluate(10).is_none());
    }

    #[test]
    fn rejects_non_increasing_thresholds() {
        let err = EscalationPolicy::new(vec![
            EscalationTier {
                after_incident_count: 2,
                action: EscalationAction::DisableUser,
            },
            EscalationTier {
                after_incident_count: 2,
                action: EscalationAction::DisableUser,
            },
        ]);
        assert!(matches!(err, Err(PolicyError::NonMonotonic { .. })));
    }

    #[test]
    fn rejects_zero_threshold() {
        let err = EscalationPolicy::new(vec![EscalationTier {
            after_incident_count: 0,
            action: EscalationAction::DisableUser,
        }]);
        assert!(matches!(err, Err(PolicyError::ThresholdBelowOne(0))));
    }
}
