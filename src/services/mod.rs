//! Rotation services

pub mod admission;
pub mod credential_store;
pub mod csr_authority;
pub mod events;
pub mod jitter;
pub mod keys;
pub mod reconciler;
pub mod request_state;
pub mod rotation_decision;
pub mod rotation_scheduler;
pub mod status;
pub mod validity;

pub use admission::{AdmissionGuard, NeverHalt, RateLimitedAdmission};
pub use credential_store::{CredentialStore, MemoryCredentialStore};
pub use csr_authority::{CsrAuthority, HttpCsrAuthority, RequestMeta};
pub use events::{EventRecorder, RecordingEventRecorder, TracingEventRecorder};
pub use jitter::{jitter, JitterPolicy};
pub use reconciler::{Reconciler, SyncContext, SyncOutcome, HALT_MESSAGE};
pub use request_state::{PendingRequest, RequestOutcome};
pub use rotation_decision::{RotationDecision, RotationReason};
pub use rotation_scheduler::{run_once, start_rotation_scheduler, RotationSchedulerState};
pub use status::{LogStatusReporter, RecordingStatusReporter, StatusReporter};
pub use validity::{CertificateProblem, CertificateValidity, ValidityWindow};
