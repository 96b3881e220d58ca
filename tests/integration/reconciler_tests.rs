//! Reconciler integration tests
//!
//! Drives full reconciliation passes against the mock authority and store,
//! covering bootstrap, issuance, failures and the halt path.

use std::sync::Arc;

use certrotate::models::{ConditionReason, CredentialRecord};
use certrotate::services::events::{
    ADDITIONAL_SECRET_DATA_CHANGED, CLIENT_CERTIFICATE_CREATED,
    CLIENT_CERTIFICATE_CREATION_HALTED, NO_VALID_CERTIFICATE_FOUND,
};
use certrotate::services::{
    keys, AdmissionGuard, PendingRequest, Reconciler, RecordingEventRecorder,
    RecordingStatusReporter, SyncContext, SyncOutcome, HALT_MESSAGE,
};
use certrotate::{RotationError, RotationResult};

use crate::common::*;

/// Reconciler wired to inspectable collaborators
struct Harness {
    reconciler: Reconciler,
    authority: Arc<MockAuthority>,
    store: Arc<MockStore>,
    reporter: Arc<RecordingStatusReporter>,
    events: Arc<RecordingEventRecorder>,
    ca: TestCa,
}

impl Harness {
    fn new() -> Self {
        Self::with_admission(None)
    }

    fn with_admission(admission: Option<Arc<dyn AdmissionGuard>>) -> Self {
        let authority = Arc::new(MockAuthority::new());
        let store = Arc::new(MockStore::new());
        let reporter = Arc::new(RecordingStatusReporter::new());
        let events = Arc::new(RecordingEventRecorder::new());

        let mut reconciler =
            Reconciler::new(identity(), store.clone(), authority.clone(), reporter.clone())
                .with_events(events.clone());
        if let Some(admission) = admission {
            reconciler = reconciler.with_admission(admission);
        }

        Self {
            reconciler,
            authority,
            store,
            reporter,
            events,
            ca: TestCa::new(),
        }
    }

    async fn sync_at(&mut self, now: chrono::DateTime<chrono::Utc>) -> RotationResult<SyncOutcome> {
        let result = self.reconciler.sync(&SyncContext::new(now)).await;
        assert!(
            self.reconciler.pending().is_consistent(),
            "pending request half set after pass: {:?}",
            self.reconciler.pending()
        );
        result
    }

    async fn stored(&self) -> Option<CredentialRecord> {
        use certrotate::services::CredentialStore;
        self.store.get(IDENTITY_NAME).await.unwrap()
    }

    fn request_id(&self) -> String {
        self.reconciler
            .pending()
            .request_id()
            .expect("request outstanding")
            .to_string()
    }
}

#[tokio::test]
async fn test_bootstrap_submits_request() {
    let mut h = Harness::new();

    let outcome = h.sync_at(ymd(2030, 1, 1)).await.unwrap();

    let request = h.authority.last_request().expect("request created");
    assert_eq!(
        outcome,
        SyncOutcome::RequestSubmitted {
            request_id: request.request_id.clone()
        }
    );
    assert!(matches!(h.reconciler.pending(), PendingRequest::Submitted { .. }));
    assert_eq!(request.signer_name, SIGNER_NAME);
    assert_eq!(request.expiration_seconds, Some(86_400));
    assert!(request.meta.name_prefix.starts_with("agent1-"));
    assert_eq!(h.events.reasons(), vec![NO_VALID_CERTIFICATE_FOUND]);
    assert!(h.reporter.conditions().is_empty());
    assert!(h.stored().await.is_none());
}

#[tokio::test]
async fn test_outstanding_request_is_not_duplicated() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();

    // not approved, then approved without a certificate
    assert_eq!(h.sync_at(ymd(2030, 1, 1)).await.unwrap(), SyncOutcome::Waiting);
    h.authority.approve(&h.request_id());
    assert_eq!(h.sync_at(ymd(2030, 1, 1)).await.unwrap(), SyncOutcome::Waiting);

    assert_eq!(h.authority.request_count(), 1);
    assert!(h.reporter.conditions().is_empty());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_issuance_completes_rotation() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    let request_id = h.request_id();
    h.authority
        .approve_and_issue(&request_id, &h.ca, not_before(), not_after());

    let outcome = h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Rotated {
            not_before: not_before(),
            not_after: not_after(),
        }
    );
    assert!(h.reconciler.pending().is_idle());

    let stored = h.stored().await.expect("credential stored");
    let certificate = stored.certificate().unwrap();
    let private_key = stored.private_key().unwrap();
    assert!(keys::certificate_matches_key(certificate, private_key));
    assert_eq!(stored.get(CLUSTER_NAME_KEY), Some(&b"cluster1"[..]));

    let condition = h.reporter.last().unwrap();
    assert!(condition.status);
    assert_eq!(condition.reason, ConditionReason::ClientCertificateUpdated);
    assert!(condition.message.contains("client certificate rotated starting from"));
    assert_eq!(h.reporter.conditions().len(), 1);
    assert_eq!(
        h.events.reasons().last().map(String::as_str),
        Some(CLIENT_CERTIFICATE_CREATED)
    );

    // the fresh credential is kept on the next pass
    assert_eq!(
        h.sync_at(ymd(2030, 1, 2)).await.unwrap(),
        SyncOutcome::Unchanged
    );
    assert_eq!(h.authority.request_count(), 1);
}

#[tokio::test]
async fn test_key_mismatch_discards_request() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    let request_id = h.request_id();

    let unrelated = keys::generate_private_key_pem().unwrap();
    let certificate = h
        .ca
        .issue_for_key(&unrelated, &subject(), not_before(), not_after());
    h.authority.approve_with_certificate(&request_id, certificate);

    let err = h.sync_at(ymd(2030, 1, 1)).await.unwrap_err();
    assert_eq!(err, RotationError::KeyMismatch(request_id));
    assert!(h.reconciler.pending().is_idle());
    assert!(h.stored().await.is_none());

    let condition = h.reporter.last().unwrap();
    assert!(!condition.status);
    assert_eq!(condition.reason, ConditionReason::ClientCertificateUpdateFailed);
    assert!(condition
        .message
        .starts_with("Failed to rotated client certificate"));

    // the next pass starts over with a new request
    let outcome = h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::RequestSubmitted { .. }));
    assert_eq!(h.authority.request_count(), 2);
}

#[tokio::test]
async fn test_additional_data_drift_forces_rotation() {
    let mut h = Harness::new();
    let mut record = h.ca.credential(&identity());
    record
        .data
        .insert(CLUSTER_NAME_KEY.to_string(), b"cluster0".to_vec());
    h.store.seed(IDENTITY_NAME, &record).await;

    let outcome = h.sync_at(ymd(2030, 1, 2)).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::RequestSubmitted { .. }));
    assert_eq!(h.events.reasons(), vec![ADDITIONAL_SECRET_DATA_CHANGED]);
}

#[tokio::test]
async fn test_valid_credential_is_kept() {
    let mut h = Harness::new();
    h.store.seed(IDENTITY_NAME, &h.ca.credential(&identity())).await;

    let outcome = h.sync_at(ymd(2030, 2, 1)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);
    assert_eq!(h.authority.request_count(), 0);
    assert!(h.reporter.conditions().is_empty());
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn test_expiring_credential_is_rotated() {
    let mut h = Harness::new();
    h.store.seed(IDENTITY_NAME, &h.ca.credential(&identity())).await;

    // 10 of 100 days left
    let outcome = h.sync_at(ymd(2030, 4, 1)).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::RequestSubmitted { .. }));
    assert_eq!(h.authority.request_count(), 1);
}

#[tokio::test]
async fn test_halt_reports_and_creates_nothing() {
    let halt: Arc<dyn AdmissionGuard> = Arc::new(|| true);
    let mut h = Harness::with_admission(Some(halt));

    let outcome = h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Halted);
    assert_eq!(h.authority.request_count(), 0);
    assert!(h.reconciler.pending().is_idle());

    let condition = h.reporter.last().unwrap();
    assert!(!condition.status);
    assert_eq!(condition.message, HALT_MESSAGE);

    let reasons = h.events.reasons();
    assert_eq!(
        reasons.last().map(String::as_str),
        Some(CLIENT_CERTIFICATE_CREATION_HALTED)
    );
    assert!(!reasons.iter().any(|r| r == CLIENT_CERTIFICATE_CREATED));
}

#[tokio::test]
async fn test_failed_save_keeps_request_for_retry() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    let request_id = h.request_id();
    h.authority
        .approve_and_issue(&request_id, &h.ca, not_before(), not_after());

    h.store.fail_saves(true);
    let err = h.sync_at(ymd(2030, 1, 1)).await.unwrap_err();
    assert!(matches!(err, RotationError::Store(_)));
    assert_eq!(h.reconciler.pending().request_id(), Some(request_id.as_str()));
    assert!(!h.reporter.last().unwrap().status);

    h.store.fail_saves(false);
    let outcome = h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Rotated { .. }));
    assert!(h.reporter.last().unwrap().status);
    assert_eq!(h.authority.request_count(), 1);
}

#[tokio::test]
async fn test_transient_authority_error_keeps_request() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();
    let request_id = h.request_id();

    h.authority.set_error_mode(MockError::Unavailable);
    let err = h.sync_at(ymd(2030, 1, 1)).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.reconciler.pending().request_id(), Some(request_id.as_str()));
    assert!(h.reporter.conditions().is_empty());

    h.authority.clear_error_mode();
    assert_eq!(h.sync_at(ymd(2030, 1, 1)).await.unwrap(), SyncOutcome::Waiting);
}

#[tokio::test]
async fn test_rejected_request_is_dropped() {
    let mut h = Harness::new();
    h.sync_at(ymd(2030, 1, 1)).await.unwrap();

    h.authority.set_error_mode(MockError::Rejected);
    let err = h.sync_at(ymd(2030, 1, 1)).await.unwrap_err();
    assert!(matches!(err, RotationError::RequestRejected(_)));
    assert!(h.reconciler.pending().is_idle());
    assert!(!h.reporter.last().unwrap().status);
}

#[tokio::test]
async fn test_request_creation_failure_stays_idle() {
    let mut h = Harness::new();
    h.authority.set_error_mode(MockError::Unavailable);

    let err = h.sync_at(ymd(2030, 1, 1)).await.unwrap_err();
    assert!(matches!(err, RotationError::Authority(_)));
    assert!(h.reconciler.pending().is_idle());

    let condition = h.reporter.last().unwrap();
    assert!(!condition.status);
    assert!(condition.message.starts_with("Failed to create CSR"));
}

#[tokio::test]
async fn test_status_error_wins_over_failure() {
    let authority = Arc::new(MockAuthority::new());
    authority.set_error_mode(MockError::Unavailable);
    let mut reconciler = Reconciler::new(
        identity(),
        Arc::new(MockStore::new()),
        authority,
        Arc::new(FailingReporter),
    );

    let err = reconciler
        .sync(&SyncContext::new(ymd(2030, 1, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::Status(_)));
}

#[tokio::test]
async fn test_pending_state_consistent_across_pass_sequence() {
    let mut h = Harness::new();
    let now = ymd(2030, 1, 1);

    // bootstrap, wait, mismatch, retry, transient error, issue
    h.sync_at(now).await.unwrap();
    h.sync_at(now).await.unwrap();
    let unrelated = keys::generate_private_key_pem().unwrap();
    let bad = h
        .ca
        .issue_for_key(&unrelated, &subject(), not_before(), not_after());
    h.authority.approve_with_certificate(&h.request_id(), bad);
    assert!(h.sync_at(now).await.is_err());
    h.sync_at(now).await.unwrap();
    h.authority.set_error_mode(MockError::NotFound);
    assert!(h.sync_at(now).await.is_err());
    h.authority.clear_error_mode();
    h.sync_at(now).await.unwrap();
    let request_id = h.request_id();
    h.authority
        .approve_and_issue(&request_id, &h.ca, not_before(), not_after());
    assert!(matches!(
        h.sync_at(now).await.unwrap(),
        SyncOutcome::Rotated { .. }
    ));
    assert!(h.reconciler.pending().is_idle());
    assert_eq!(h.authority.request_count(), 3);
}
