//! Outstanding signing request state
//!
//! An identity has at most one request in flight. The request id and the
//! private key generated for it travel together in [`PendingRequest::Submitted`]
//! so a half-set state cannot be built through the public constructors.

use tracing::{debug, warn};

use crate::models::CredentialRecord;
use crate::services::csr_authority::CsrAuthority;
use crate::services::keys;
use crate::services::reconciler::SyncContext;
use crate::utils::error::{RotationError, RotationResult};

/// Request state of one identity
#[derive(Clone, PartialEq, Eq, Default)]
pub enum PendingRequest {
    /// No rotation in progress
    #[default]
    Idle,
    /// Request submitted; key held until the certificate is issued
    Submitted {
        request_id: String,
        private_key: Vec<u8>,
    },
}

// Keys stay out of logs.
impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingRequest::Idle => write!(f, "Idle"),
            PendingRequest::Submitted {
                request_id,
                private_key,
            } => f
                .debug_struct("Submitted")
                .field("request_id", request_id)
                .field("private_key_len", &private_key.len())
                .finish(),
        }
    }
}

impl PendingRequest {
    /// Enter `Submitted`; rejects an empty request id or key
    pub fn submitted(
        request_id: impl Into<String>,
        private_key: Vec<u8>,
    ) -> RotationResult<Self> {
        let request_id = request_id.into();
        if request_id.is_empty() {
            return Err(RotationError::Authority(
                "authority returned an empty request id".to_string(),
            ));
        }
        if private_key.is_empty() {
            return Err(RotationError::MissingPrivateKey(request_id));
        }
        Ok(PendingRequest::Submitted {
            request_id,
            private_key,
        })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PendingRequest::Idle)
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            PendingRequest::Idle => None,
            PendingRequest::Submitted { request_id, .. } => Some(request_id),
        }
    }

    /// Whether the request id and key are either both set or both absent
    pub fn is_consistent(&self) -> bool {
        match self {
            PendingRequest::Idle => true,
            PendingRequest::Submitted {
                request_id,
                private_key,
            } => !request_id.is_empty() && !private_key.is_empty(),
        }
    }

    pub fn clear(&mut self) {
        *self = PendingRequest::Idle;
    }
}

/// Result of polling the authority for an outstanding request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Not approved, or approved without a certificate yet
    Waiting,
    /// Certificate issued for the held key
    Issued(CredentialRecord),
    /// The request cannot complete; the pending state must be cleared
    Failed(RotationError),
}

/// Poll the authority for `pending`.
///
/// Transient authority errors come back as `Err` and leave the request
/// outstanding. Errors that end the request come back as
/// [`RequestOutcome::Failed`].
pub async fn advance(
    pending: &PendingRequest,
    authority: &dyn CsrAuthority,
    ctx: &SyncContext,
) -> RotationResult<RequestOutcome> {
    let (request_id, private_key) = match pending {
        PendingRequest::Idle => return Ok(RequestOutcome::Failed(RotationError::NoOngoingRequest)),
        PendingRequest::Submitted {
            request_id,
            private_key,
        } => (request_id.as_str(), private_key.as_slice()),
    };

    let approved = match ctx
        .call("certificate request approval check", authority.is_approved(request_id))
        .await
    {
        Ok(approved) => approved,
        Err(e) if e.is_terminal_for_request() => return Ok(RequestOutcome::Failed(e)),
        Err(e) => return Err(e),
    };
    if !approved {
        debug!("Certificate request {} is not approved yet", request_id);
        return Ok(RequestOutcome::Waiting);
    }

    let certificate = match ctx
        .call(
            "issued certificate fetch",
            authority.issued_certificate(request_id),
        )
        .await
    {
        Ok(certificate) => certificate,
        Err(e) if e.is_terminal_for_request() => return Ok(RequestOutcome::Failed(e)),
        Err(e) => return Err(e),
    };
    if certificate.is_empty() {
        debug!(
            "Certificate request {} is approved but not issued yet",
            request_id
        );
        return Ok(RequestOutcome::Waiting);
    }

    if private_key.is_empty() {
        warn!("Private key of certificate request {} is gone", request_id);
        return Ok(RequestOutcome::Failed(RotationError::MissingPrivateKey(
            request_id.to_string(),
        )));
    }

    if !keys::certificate_matches_key(&certificate, private_key) {
        return Ok(RequestOutcome::Failed(RotationError::KeyMismatch(
            request_id.to_string(),
        )));
    }

    Ok(RequestOutcome::Issued(CredentialRecord::issued(
        certificate,
        private_key.to_vec(),
    )))
}
