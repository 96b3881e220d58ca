//! Rotation reconciler
//!
//! One [`Reconciler`] owns the credential of one identity. Each call to
//! [`Reconciler::sync`] reads the stored record and either advances the
//! outstanding signing request or decides whether a new one is needed.
//! Passes are serialized by `&mut self`; the store is written only after
//! the issued certificate was verified against the held key.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::models::{CredentialRecord, RotationCondition};
use crate::services::admission::{AdmissionGuard, NeverHalt};
use crate::services::credential_store::CredentialStore;
use crate::services::csr_authority::{CsrAuthority, RequestMeta};
use crate::services::events::{
    EventRecorder, TracingEventRecorder, CLIENT_CERTIFICATE_CREATED,
    CLIENT_CERTIFICATE_CREATION_HALTED,
};
use crate::services::jitter::JitterPolicy;
use crate::services::keys;
use crate::services::request_state::{self, PendingRequest, RequestOutcome};
use crate::services::rotation_decision;
use crate::services::status::StatusReporter;
use crate::services::validity;
use crate::utils::error::{RotationError, RotationResult};

/// Message reported when the admission guard halts request creation
pub const HALT_MESSAGE: &str =
    "Stop creating csr since there are too many csr created already on hub";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Ambient inputs of one pass
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Clock reading used for every time comparison in the pass
    pub now: DateTime<Utc>,
    pub cancellation: CancellationToken,
    /// Upper bound of each store, authority and reporter call
    pub call_timeout: Duration,
}

impl SyncContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            cancellation: CancellationToken::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run a remote call bounded by the deadline and the cancellation token
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> RotationResult<T>
    where
        F: Future<Output = RotationResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(RotationError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(RotationError::Timeout(operation.to_string())),
            },
        }
    }
}

/// What a pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stored credential is fine
    Unchanged,
    /// A request is outstanding and not issued yet
    Waiting,
    /// A new request was submitted
    RequestSubmitted { request_id: String },
    /// A new credential was stored
    Rotated {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    },
    /// Rotation is due but the admission guard stopped it
    Halted,
}

/// Reconciles the client credential of one identity
pub struct Reconciler {
    identity: IdentityConfig,
    policy: JitterPolicy,
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn CsrAuthority>,
    reporter: Arc<dyn StatusReporter>,
    admission: Arc<dyn AdmissionGuard>,
    events: Arc<dyn EventRecorder>,
    pending: PendingRequest,
}

impl Reconciler {
    pub fn new(
        identity: IdentityConfig,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn CsrAuthority>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let events = Arc::new(TracingEventRecorder::new(identity.name.clone()));
        Self {
            identity,
            policy: JitterPolicy::default(),
            store,
            authority,
            reporter,
            admission: Arc::new(NeverHalt),
            events,
            pending: PendingRequest::Idle,
        }
    }

    pub fn with_policy(mut self, policy: JitterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_admission(mut self, admission: Arc<dyn AdmissionGuard>) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventRecorder>) -> Self {
        self.events = events;
        self
    }

    pub fn identity(&self) -> &IdentityConfig {
        &self.identity
    }

    pub fn pending(&self) -> &PendingRequest {
        &self.pending
    }

    /// Run one reconciliation pass
    pub async fn sync(&mut self, ctx: &SyncContext) -> RotationResult<SyncOutcome> {
        if ctx.cancellation.is_cancelled() {
            return Err(RotationError::Cancelled);
        }

        let record = ctx
            .call("credential read", self.store.get(&self.identity.name))
            .await?
            .unwrap_or_else(CredentialRecord::empty);

        if self.pending.is_idle() {
            self.start_rotation(record, ctx).await
        } else {
            self.complete_pending(record, ctx).await
        }
    }

    async fn complete_pending(
        &mut self,
        mut record: CredentialRecord,
        ctx: &SyncContext,
    ) -> RotationResult<SyncOutcome> {
        let outcome = match request_state::advance(&self.pending, self.authority.as_ref(), ctx)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    identity = %self.identity.name,
                    request = ?self.pending.request_id(),
                    "Unable to check certificate request: {}",
                    e
                );
                return Err(e);
            }
        };

        let issued = match outcome {
            RequestOutcome::Waiting => return Ok(SyncOutcome::Waiting),
            RequestOutcome::Failed(e) => {
                self.pending.clear();
                return self.fail(ctx, rotation_failed_message(&e), e).await;
            }
            RequestOutcome::Issued(issued) => issued,
        };

        record.replace_payload(issued);
        record.merge_additional_data(&self.identity.additional_data_bytes());

        // The pending request survives a failed save so the next pass
        // fetches the same certificate again.
        if let Err(e) = ctx
            .call(
                "credential save",
                self.store.save(&self.identity.name, &record),
            )
            .await
        {
            return self.fail(ctx, rotation_failed_message(&e), e).await;
        }

        let window = match validity::validity_window(record.certificate()) {
            Ok(window) => window,
            Err(e) => {
                self.pending.clear();
                return self.fail(ctx, rotation_failed_message(&e), e).await;
            }
        };

        self.report(
            ctx,
            RotationCondition::rotated(window.not_before, window.not_after),
        )
        .await?;
        self.events.event(
            CLIENT_CERTIFICATE_CREATED,
            &format!(
                "A new client certificate for {} is available",
                self.identity.name
            ),
        );
        info!(
            identity = %self.identity.name,
            not_before = %window.not_before,
            not_after = %window.not_after,
            "Client certificate rotated"
        );
        self.pending.clear();

        Ok(SyncOutcome::Rotated {
            not_before: window.not_before,
            not_after: window.not_after,
        })
    }

    async fn start_rotation(
        &mut self,
        record: CredentialRecord,
        ctx: &SyncContext,
    ) -> RotationResult<SyncOutcome> {
        let decision = rotation_decision::decide(
            &record,
            &self.identity,
            &self.policy,
            ctx.now,
            self.events.as_ref(),
        )?;
        if !decision.should_rotate {
            debug!(identity = %self.identity.name, "Client certificate is up to date");
            return Ok(SyncOutcome::Unchanged);
        }
        info!(
            identity = %self.identity.name,
            reason = %decision.reason,
            "Client certificate rotation required"
        );

        if self.admission.should_halt() {
            self.report(ctx, RotationCondition::failed(HALT_MESSAGE))
                .await?;
            self.events
                .event(CLIENT_CERTIFICATE_CREATION_HALTED, HALT_MESSAGE);
            return Ok(SyncOutcome::Halted);
        }

        match self.create_request(ctx).await {
            Ok(pending) => {
                let request_id = pending.request_id().unwrap_or_default().to_string();
                info!(
                    identity = %self.identity.name,
                    request = %request_id,
                    "Certificate request submitted"
                );
                self.pending = pending;
                Ok(SyncOutcome::RequestSubmitted { request_id })
            }
            Err(e) => {
                let message = format!("Failed to create CSR {}", e);
                self.fail(ctx, message, e).await
            }
        }
    }

    async fn create_request(&self, ctx: &SyncContext) -> RotationResult<PendingRequest> {
        let private_key = keys::generate_private_key_pem()?;
        let csr = keys::build_csr(
            &private_key,
            &self.identity.subject,
            &self.identity.dns_names,
        )?;
        let meta = RequestMeta::for_identity(&self.identity);

        let request_id = ctx
            .call(
                "certificate request creation",
                self.authority.create(
                    &meta,
                    &csr,
                    &self.identity.signer_name,
                    self.identity.expiration_seconds,
                ),
            )
            .await?;

        PendingRequest::submitted(request_id, private_key)
    }

    async fn report(&self, ctx: &SyncContext, condition: RotationCondition) -> RotationResult<()> {
        ctx.call(
            "status report",
            self.reporter.report(&self.identity.name, &condition),
        )
        .await
    }

    /// Report a failure condition, then surface `err`. A reporting error
    /// wins over `err`.
    async fn fail(
        &self,
        ctx: &SyncContext,
        message: String,
        err: RotationError,
    ) -> RotationResult<SyncOutcome> {
        warn!(identity = %self.identity.name, "{}", message);
        self.report(ctx, RotationCondition::failed(message)).await?;
        Err(err)
    }
}

fn rotation_failed_message(err: &RotationError) -> String {
    format!("Failed to rotated client certificate {}", err)
}
