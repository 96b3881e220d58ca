//! Rotation status condition model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type reported after each terminal reconciliation outcome
pub const CLUSTER_CERTIFICATE_ROTATED: &str = "ClusterCertificateRotated";

/// Reason reported with a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionReason {
    /// A new client certificate was persisted
    ClientCertificateUpdated,
    /// Rotation failed or was halted
    ClientCertificateUpdateFailed,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::ClientCertificateUpdated => "ClientCertificateUpdated",
            ConditionReason::ClientCertificateUpdateFailed => "ClientCertificateUpdateFailed",
        }
    }
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observational status of the last rotation attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationCondition {
    /// Always `ClusterCertificateRotated`
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    pub reason: ConditionReason,
    pub message: String,
}

impl RotationCondition {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            condition_type: CLUSTER_CERTIFICATE_ROTATED.to_string(),
            status: true,
            reason: ConditionReason::ClientCertificateUpdated,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            condition_type: CLUSTER_CERTIFICATE_ROTATED.to_string(),
            status: false,
            reason: ConditionReason::ClientCertificateUpdateFailed,
            message: message.into(),
        }
    }

    /// Success condition naming the new validity window
    pub fn rotated(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self::succeeded(format!(
            "client certificate rotated starting from {} to {}",
            not_before, not_after
        ))
    }
}

/// A condition as last recorded for an identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCondition {
    pub identity: String,
    pub condition: RotationCondition,
    /// Changes only when `status` flips
    pub last_transition_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
