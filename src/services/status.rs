//! Status reporting
//!
//! Every pass that reaches a terminal outcome reports exactly one
//! [`RotationCondition`]. Pure no-ops report nothing.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::RotationCondition;
use crate::utils::error::RotationResult;

/// Sink for rotation conditions
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, identity: &str, condition: &RotationCondition) -> RotationResult<()>;
}

/// Writes conditions to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusReporter;

#[async_trait]
impl StatusReporter for LogStatusReporter {
    async fn report(&self, identity: &str, condition: &RotationCondition) -> RotationResult<()> {
        if condition.status {
            info!(
                identity,
                reason = %condition.reason,
                "{}: {}",
                condition.condition_type,
                condition.message
            );
        } else {
            warn!(
                identity,
                reason = %condition.reason,
                "{}: {}",
                condition.condition_type,
                condition.message
            );
        }
        Ok(())
    }
}

/// Keeps reported conditions in memory
#[derive(Debug, Default)]
pub struct RecordingStatusReporter {
    conditions: Mutex<Vec<(String, RotationCondition)>>,
}

impl RecordingStatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> Vec<(String, RotationCondition)> {
        self.conditions
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<RotationCondition> {
        self.conditions().pop().map(|(_, condition)| condition)
    }
}

#[async_trait]
impl StatusReporter for RecordingStatusReporter {
    async fn report(&self, identity: &str, condition: &RotationCondition) -> RotationResult<()> {
        if let Ok(mut conditions) = self.conditions.lock() {
            conditions.push((identity.to_string(), condition.clone()));
        }
        Ok(())
    }
}
