//! # AuthProxyWorkload Status
//!
//! Status types for tracking whether selected workloads run the latest proxy configuration.

use serde::{Deserialize, Serialize};

/// Condition type signalling that every selected workload runs the current generation
pub const CONDITION_UP_TO_DATE: &str = "UpToDate";

pub const REASON_FINISHED_RECONCILE: &str = "FinishedReconcile";
pub const REASON_WORKLOAD_NEEDS_UPDATE: &str = "WorkloadNeedsUpdate";
pub const REASON_NO_WORKLOADS_FOUND: &str = "NoWorkloadsFound";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_UP_TO_DATE: &str = "UpToDate";

/// Status of the AuthProxyWorkload resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthProxyWorkloadStatus {
    /// Top-level conditions, `UpToDate` being the canonical one
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// One entry per workload currently selected by the resource
    #[serde(default)]
    pub workload_status: Vec<WorkloadStatus>,
    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Rollout state of a single selected workload
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
    /// Generation the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Build a condition without a transition time; see [`Condition::carry_transition_time`]
    #[must_use]
    pub fn new(
        type_: &str,
        status: bool,
        reason: &str,
        message: impl Into<String>,
        generation: i64,
    ) -> Self {
        Self {
            r#type: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            observed_generation: Some(generation),
        }
    }

    /// Keep the previous transition time when the status did not flip, otherwise stamp `now`
    pub fn carry_transition_time(&mut self, previous: &[Condition], now: &str) {
        self.last_transition_time = match previous.iter().find(|c| c.r#type == self.r#type) {
            Some(prev) if prev.status == self.status => prev
                .last_transition_time
                .clone()
                .or_else(|| Some(now.to_string())),
            _ => Some(now.to_string()),
        };
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl AuthProxyWorkloadStatus {
    /// The top-level `UpToDate` condition, if any
    #[must_use]
    pub fn up_to_date(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == CONDITION_UP_TO_DATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let previous = vec![Condition {
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            ..Condition::new(CONDITION_UP_TO_DATE, true, REASON_FINISHED_RECONCILE, "done", 1)
        }];
        let mut next =
            Condition::new(CONDITION_UP_TO_DATE, true, REASON_FINISHED_RECONCILE, "done", 2);
        next.carry_transition_time(&previous, "2024-02-02T00:00:00Z");
        assert_eq!(next.last_transition_time.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_transition_time_stamped_when_status_flips() {
        let previous = vec![Condition::new(
            CONDITION_UP_TO_DATE,
            true,
            REASON_FINISHED_RECONCILE,
            "done",
            1,
        )];
        let mut next = Condition::new(
            CONDITION_UP_TO_DATE,
            false,
            REASON_WORKLOAD_NEEDS_UPDATE,
            "pending",
            2,
        );
        next.carry_transition_time(&previous, "2024-02-02T00:00:00Z");
        assert_eq!(next.last_transition_time.as_deref(), Some("2024-02-02T00:00:00Z"));
        assert!(!next.is_true());
    }
}
