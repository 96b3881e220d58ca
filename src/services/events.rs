//! Rotation events
//!
//! Human-readable breadcrumbs for operators. Events never drive control flow.

use std::sync::Mutex;
use tracing::info;

pub const CERTIFICATE_VALIDATION_FAILED: &str = "CertificateValidationFailed";
pub const NO_VALID_CERTIFICATE_FOUND: &str = "NoValidCertificateFound";
pub const ADDITIONAL_SECRET_DATA_CHANGED: &str = "AdditionalSecretDataChanged";
pub const CERTIFICATE_ROTATION_STARTED: &str = "CertificateRotationStarted";
pub const CLIENT_CERTIFICATE_CREATED: &str = "ClientCertificateCreated";
pub const CLIENT_CERTIFICATE_CREATION_HALTED: &str = "ClientCertificateCreationHalted";

/// Sink for rotation events
pub trait EventRecorder: Send + Sync {
    fn event(&self, reason: &str, message: &str);
}

/// Emits events as structured log lines
#[derive(Debug, Clone)]
pub struct TracingEventRecorder {
    identity: String,
}

impl TracingEventRecorder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl EventRecorder for TracingEventRecorder {
    fn event(&self, reason: &str, message: &str) {
        info!(identity = %self.identity, reason, "{}", message);
    }
}

/// Keeps every event in memory, in order
#[derive(Debug, Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(reason, message)` pairs
    pub fn events(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(reason, _)| reason).collect()
    }
}

impl EventRecorder for RecordingEventRecorder {
    fn event(&self, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((reason.to_string(), message.to_string()));
        }
    }
}
