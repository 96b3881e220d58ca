//! Certificate validity evaluation
//!
//! Parses the stored PEM chain and decides whether it still represents a
//! usable client credential for the configured subject. Malformed or missing
//! data is never an error here: it simply means the credential is not valid
//! and must be rotated.

use chrono::{DateTime, Duration, TimeZone, Utc};
use x509_parser::pem::Pem;

use crate::models::Subject;
use crate::utils::error::{RotationError, RotationResult};

/// Effective validity window of a certificate chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn total(&self) -> Duration {
        self.not_after - self.not_before
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.not_after - now
    }
}

/// Why a stored certificate is not valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateProblem {
    /// No certificate data stored
    Missing,
    /// Data present but not a parsable certificate chain
    Malformed(String),
    /// Some certificate of the chain is past its notAfter
    Expired { not_after: DateTime<Utc> },
    /// Leaf subject differs from the configured subject
    SubjectMismatch { expected: String, actual: String },
}

impl std::fmt::Display for CertificateProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateProblem::Missing => write!(f, "no client certificate found"),
            CertificateProblem::Malformed(details) => write!(f, "{}", details),
            CertificateProblem::Expired { not_after } => {
                write!(f, "part of the certificate chain expired at {}", not_after)
            }
            CertificateProblem::SubjectMismatch { expected, actual } => {
                write!(f, "certificate subject {} does not match {}", actual, expected)
            }
        }
    }
}

/// Outcome of evaluating a stored certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateValidity {
    pub is_valid: bool,
    /// Present whenever the chain could be parsed
    pub window: Option<ValidityWindow>,
    /// Present whenever `is_valid` is false
    pub problem: Option<CertificateProblem>,
}

impl CertificateValidity {
    fn invalid(problem: CertificateProblem, window: Option<ValidityWindow>) -> Self {
        Self {
            is_valid: false,
            window,
            problem: Some(problem),
        }
    }
}

/// Fields of one parsed certificate that rotation cares about
#[derive(Debug, Clone)]
struct ParsedCertificate {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    common_name: Option<String>,
    organizations: Vec<String>,
}

/// Evaluate stored certificate bytes against `subject` at `now`
pub fn evaluate(
    certificate: Option<&[u8]>,
    subject: Option<&Subject>,
    now: DateTime<Utc>,
) -> CertificateValidity {
    let data = match certificate {
        Some(data) if !data.is_empty() => data,
        _ => return CertificateValidity::invalid(CertificateProblem::Missing, None),
    };

    let chain = match parse_chain(data) {
        Ok(chain) => chain,
        Err(e) => {
            return CertificateValidity::invalid(CertificateProblem::Malformed(e.to_string()), None)
        }
    };
    let window = effective_window(&chain);

    // make sure no certificate in the chain expired
    if let Some(expired) = chain.iter().find(|cert| now > cert.not_after) {
        return CertificateValidity::invalid(
            CertificateProblem::Expired {
                not_after: expired.not_after,
            },
            Some(window),
        );
    }

    if let Some(subject) = subject {
        let leaf = &chain[0];
        let common_name = leaf.common_name.clone().unwrap_or_default();
        if common_name != subject.common_name || leaf.organizations != subject.organizations {
            return CertificateValidity::invalid(
                CertificateProblem::SubjectMismatch {
                    expected: subject.to_string(),
                    actual: describe_subject(&common_name, &leaf.organizations),
                },
                Some(window),
            );
        }
    }

    CertificateValidity {
        is_valid: true,
        window: Some(window),
        problem: None,
    }
}

/// Effective validity window of the stored chain: latest notBefore, earliest notAfter
pub fn validity_window(certificate: Option<&[u8]>) -> RotationResult<ValidityWindow> {
    let data = match certificate {
        Some(data) if !data.is_empty() => data,
        _ => {
            return Err(RotationError::Certificate(
                "no client certificate found".to_string(),
            ))
        }
    };
    let chain = parse_chain(data)?;
    Ok(effective_window(&chain))
}

fn effective_window(chain: &[ParsedCertificate]) -> ValidityWindow {
    let mut window = ValidityWindow {
        not_before: chain[0].not_before,
        not_after: chain[0].not_after,
    };
    for cert in &chain[1..] {
        if cert.not_before > window.not_before {
            window.not_before = cert.not_before;
        }
        if cert.not_after < window.not_after {
            window.not_after = cert.not_after;
        }
    }
    window
}

/// Parse every CERTIFICATE block; errors when none is present
fn parse_chain(data: &[u8]) -> RotationResult<Vec<ParsedCertificate>> {
    let mut chain = Vec::new();
    for pem in Pem::iter_from_buffer(data) {
        let pem = pem.map_err(|e| {
            RotationError::Certificate(format!("unable to parse certificate PEM: {}", e))
        })?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        let cert = pem.parse_x509().map_err(|e| {
            RotationError::Certificate(format!("unable to parse certificate: {}", e))
        })?;

        let validity = cert.validity();
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(String::from);
        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(String::from)
            .collect();

        chain.push(ParsedCertificate {
            not_before: to_utc(validity.not_before.timestamp())?,
            not_after: to_utc(validity.not_after.timestamp())?,
            common_name,
            organizations,
        });
    }

    if chain.is_empty() {
        return Err(RotationError::Certificate(
            "no cert found in certificate".to_string(),
        ));
    }
    Ok(chain)
}

fn to_utc(timestamp: i64) -> RotationResult<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single().ok_or_else(|| {
        RotationError::Certificate(format!("certificate time out of range: {}", timestamp))
    })
}

fn describe_subject(common_name: &str, organizations: &[String]) -> String {
    if organizations.is_empty() {
        format!("CN={}", common_name)
    } else {
        format!("CN={},O={}", common_name, organizations.join("+"))
    }
}
