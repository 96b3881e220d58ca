//! Rotation decision
//!
//! Decides whether the stored credential should be replaced. The checks run
//! in order and the first one that asks for rotation wins:
//!
//! 1. the certificate is missing, malformed, expired or for another subject
//! 2. a configured additional data pair is missing or differs
//! 3. the remaining share of the lifetime dropped below a jittered threshold

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::IdentityConfig;
use crate::models::CredentialRecord;
use crate::services::events::{
    EventRecorder, ADDITIONAL_SECRET_DATA_CHANGED, CERTIFICATE_ROTATION_STARTED,
    CERTIFICATE_VALIDATION_FAILED, NO_VALID_CERTIFICATE_FOUND,
};
use crate::services::jitter::JitterPolicy;
use crate::services::validity::{self, CertificateProblem};
use crate::utils::error::{RotationError, RotationResult};

/// Why a credential is kept or rotated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationReason {
    /// Enough lifetime remains
    Keep,
    /// Nothing usable is stored
    NoValidCredential(String),
    /// The named additional data key is missing or stale
    AdditionalDataChanged(String),
    /// The certificate is inside its rotation window
    RemainingLifeBelowThreshold { remaining: Duration },
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationReason::Keep => write!(f, "remaining lifetime above threshold"),
            RotationReason::NoValidCredential(details) => {
                write!(f, "no valid credential: {}", details)
            }
            RotationReason::AdditionalDataChanged(key) => {
                write!(f, "additional data changed: {}", key)
            }
            RotationReason::RemainingLifeBelowThreshold { remaining } => {
                write!(
                    f,
                    "remaining life below threshold: expires in {}",
                    format_duration(*remaining)
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationDecision {
    pub should_rotate: bool,
    pub reason: RotationReason,
}

impl RotationDecision {
    fn keep() -> Self {
        Self {
            should_rotate: false,
            reason: RotationReason::Keep,
        }
    }

    fn rotate(reason: RotationReason) -> Self {
        Self {
            should_rotate: true,
            reason,
        }
    }
}

/// Decide whether `record` has to be rotated at `now`.
///
/// Errors only when the certificate's validity window is empty or inverted;
/// nothing is rotated in that case.
pub fn decide(
    record: &CredentialRecord,
    identity: &IdentityConfig,
    policy: &JitterPolicy,
    now: DateTime<Utc>,
    recorder: &dyn EventRecorder,
) -> RotationResult<RotationDecision> {
    let validity = validity::evaluate(record.certificate(), Some(&identity.subject), now);
    let window = match (validity.is_valid, validity.window) {
        (true, Some(window)) => window,
        _ => {
            let problem = validity.problem.unwrap_or(CertificateProblem::Missing);
            match problem {
                CertificateProblem::Malformed(ref details) => recorder.event(
                    CERTIFICATE_VALIDATION_FAILED,
                    &format!(
                        "Failed to validate client certificate for {}: {}",
                        identity.name, details
                    ),
                ),
                _ => recorder.event(
                    NO_VALID_CERTIFICATE_FOUND,
                    &format!(
                        "No valid client certificate for {} is found. Bootstrap is required",
                        identity.name
                    ),
                ),
            }
            return Ok(RotationDecision::rotate(RotationReason::NoValidCredential(
                problem.to_string(),
            )));
        }
    };

    for (key, value) in &identity.additional_data {
        if record.get(key) != Some(value.as_bytes()) {
            recorder.event(
                ADDITIONAL_SECRET_DATA_CHANGED,
                &format!(
                    "The additional secret data is changed for {}. Re-create the client certificate for {}",
                    key, identity.name
                ),
            );
            return Ok(RotationDecision::rotate(
                RotationReason::AdditionalDataChanged(key.clone()),
            ));
        }
    }

    let total = window.total();
    if total <= Duration::zero() {
        return Err(RotationError::InvalidValidityWindow {
            not_before: window.not_before.to_rfc3339(),
            not_after: window.not_after.to_rfc3339(),
        });
    }
    let remaining = window.remaining(now);
    let ratio = seconds(remaining) / seconds(total);
    let threshold = policy.threshold();

    if ratio > threshold {
        debug!(
            identity = %identity.name,
            ratio,
            threshold,
            "Client certificate does not need rotation yet"
        );
        return Ok(RotationDecision::keep());
    }

    recorder.event(
        CERTIFICATE_ROTATION_STARTED,
        &format!(
            "The current client certificate for {} expires in {}. Start certificate rotation",
            identity.name,
            format_duration(remaining)
        ),
    );
    Ok(RotationDecision::rotate(
        RotationReason::RemainingLifeBelowThreshold { remaining },
    ))
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Render a duration rounded to whole seconds, e.g. `624h0m0s`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.num_milliseconds();
    let total = (millis as f64 / 1000.0).round() as i64;
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{}{}h{}m{}s",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
