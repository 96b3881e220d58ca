//! CSR authority client
//!
//! The reconciler talks to the signing backend through [`CsrAuthority`].
//! [`HttpCsrAuthority`] implements it against a Puppet CA compatible HTTP API:
//! requests are submitted with `PUT certificate_request/<name>`, approval is
//! read from `certificate_status/<name>` and the issued certificate is fetched
//! from `certificate/<name>`.

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Identity, StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AuthorityConfig, IdentityConfig};
use crate::utils::error::{RotationError, RotationResult};

/// Characters used for generated request name suffixes
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const NAME_SUFFIX_LEN: usize = 5;

/// Identity metadata attached to a new request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// The authority appends a random suffix to build the request name
    pub name_prefix: String,
    pub labels: BTreeMap<String, String>,
}

impl RequestMeta {
    pub fn for_identity(identity: &IdentityConfig) -> Self {
        Self {
            name_prefix: identity.request_name_prefix(),
            labels: identity.request_labels.clone(),
        }
    }
}

/// Signing backend contract
///
/// `RequestRejected` and `RequestNotFound` errors end the request; every
/// other error is retried on the next pass.
#[async_trait]
pub trait CsrAuthority: Send + Sync {
    /// Submit a request and return its identifier
    async fn create(
        &self,
        meta: &RequestMeta,
        csr_pem: &[u8],
        signer_name: &str,
        expiration_seconds: Option<u32>,
    ) -> RotationResult<String>;

    async fn is_approved(&self, request_id: &str) -> RotationResult<bool>;

    /// PEM certificate issued for the request; empty while not issued yet
    async fn issued_certificate(&self, request_id: &str) -> RotationResult<Vec<u8>>;
}

/// Build a request name from `prefix` and a random suffix
pub fn generate_request_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_SUFFIX_ALPHABET[rng.gen_range(0..NAME_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Puppet CA style HTTP authority
#[derive(Clone)]
pub struct HttpCsrAuthority {
    client: Client,
    base_url: String,
}

impl HttpCsrAuthority {
    /// Create a new HTTP authority client from configuration
    pub fn new(config: &AuthorityConfig) -> RotationResult<Self> {
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .use_rustls_tls();

        // CA bundle goes in before the identity for rustls
        if let Some(ca_path) = config.effective_ssl_ca() {
            let ca_pem = std::fs::read(ca_path)
                .map_err(|e| RotationError::Config(format!("Failed to read CA bundle: {}", e)))?;
            let ca_cert = reqwest::Certificate::from_pem(&ca_pem).map_err(|e| {
                RotationError::Config(format!("Failed to parse CA certificate: {}", e))
            })?;
            client_builder = client_builder.add_root_certificate(ca_cert);
        }

        if let (Some(cert_path), Some(key_path)) =
            (config.effective_ssl_cert(), config.effective_ssl_key())
        {
            let cert_pem = std::fs::read(cert_path).map_err(|e| {
                RotationError::Config(format!("Failed to read client certificate: {}", e))
            })?;
            let key_pem = std::fs::read(key_path)
                .map_err(|e| RotationError::Config(format!("Failed to read client key: {}", e)))?;

            let mut pem_bundle = cert_pem;
            pem_bundle.push(b'\n');
            pem_bundle.extend_from_slice(&key_pem);

            let identity = Identity::from_pem(&pem_bundle).map_err(|e| {
                RotationError::Config(format!("Failed to create client identity: {}", e))
            })?;
            client_builder = client_builder.identity(identity);
        }

        if !config.effective_ssl_verify() {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| RotationError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, resource: &str, name: &str) -> RotationResult<Url> {
        let url = format!("{}/puppet-ca/v1/{}/{}", self.base_url, resource, name);
        Url::parse(&url)
            .map_err(|e| RotationError::Config(format!("Invalid authority URL {}: {}", url, e)))
    }
}

#[async_trait]
impl CsrAuthority for HttpCsrAuthority {
    async fn create(
        &self,
        meta: &RequestMeta,
        csr_pem: &[u8],
        signer_name: &str,
        expiration_seconds: Option<u32>,
    ) -> RotationResult<String> {
        let name = generate_request_name(&meta.name_prefix);
        let mut url = self.endpoint("certificate_request", &name)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("signer_name", signer_name);
            if let Some(seconds) = expiration_seconds {
                query.append_pair("expiration_seconds", &seconds.to_string());
            }
            for (key, value) in &meta.labels {
                query.append_pair(&format!("label.{}", key), value);
            }
        }

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(csr_pem.to_vec())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!("Submitted certificate request {}", name);
                Ok(name)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RotationError::Authority(format!(
                    "CSR authority returned status {} for request {}: {}",
                    status, name, body
                )))
            }
        }
    }

    async fn is_approved(&self, request_id: &str) -> RotationResult<bool> {
        let url = self.endpoint("certificate_status", request_id)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let status: serde_json::Value = response.json().await?;
                match status["state"].as_str() {
                    Some("signed") => Ok(true),
                    Some("requested") => Ok(false),
                    Some("revoked") => Err(RotationError::RequestRejected(request_id.to_string())),
                    other => Err(RotationError::Authority(format!(
                        "Unknown state {:?} for request {}",
                        other, request_id
                    ))),
                }
            }
            StatusCode::NOT_FOUND => Err(RotationError::RequestNotFound(request_id.to_string())),
            status => Err(RotationError::Authority(format!(
                "CSR authority returned status: {}",
                status
            ))),
        }
    }

    async fn issued_certificate(&self, request_id: &str) -> RotationResult<Vec<u8>> {
        let url = self.endpoint("certificate", request_id)?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/plain")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => {
                debug!("Certificate for request {} is not issued yet", request_id);
                Ok(Vec::new())
            }
            status => Err(RotationError::Authority(format!(
                "CSR authority returned status: {}",
                status
            ))),
        }
    }
}
