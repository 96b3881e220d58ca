//! Credential record and subject models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload key holding the PEM private key
pub const TLS_KEY_FILE: &str = "tls.key";
/// Payload key holding the PEM certificate (chain)
pub const TLS_CERT_FILE: &str = "tls.crt";

/// Subject requested for the client certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Subject {
    /// Common name (CN)
    pub common_name: String,
    /// Organizations (O), the groups of the client, in certificate order
    #[serde(default)]
    pub organizations: Vec<String>,
}

impl Subject {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organizations: Vec::new(),
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organizations.push(organization.into());
        self
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CN={}", self.common_name)?;
        if !self.organizations.is_empty() {
            write!(f, ",O={}", self.organizations.join("+"))?;
        }
        Ok(())
    }
}

/// Persisted client credential
///
/// The payload always holds `tls.key` and `tls.crt` together once a rotation
/// has completed, plus any configured additional data. A record is replaced
/// as a whole by the store, never field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Payload keyed by file name
    pub data: BTreeMap<String, Vec<u8>>,
    /// Store version; `None` when the record does not exist in the store yet
    pub version: Option<i64>,
}

impl CredentialRecord {
    /// Empty record standing in for a credential that does not exist yet
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record holding a freshly issued certificate and its private key
    pub fn issued(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        let mut data = BTreeMap::new();
        data.insert(TLS_CERT_FILE.to_string(), certificate);
        data.insert(TLS_KEY_FILE.to_string(), private_key);
        Self {
            data,
            version: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.version.is_some()
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        self.data.get(TLS_CERT_FILE).map(Vec::as_slice)
    }

    pub fn private_key(&self) -> Option<&[u8]> {
        self.data.get(TLS_KEY_FILE).map(Vec::as_slice)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Merge additional data pairs into the payload, overwriting existing keys
    pub fn merge_additional_data(&mut self, additional: &BTreeMap<String, Vec<u8>>) {
        for (key, value) in additional {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Replace the payload with `other`'s, keeping this record's store version
    pub fn replace_payload(&mut self, other: CredentialRecord) {
        self.data = other.data;
    }
}
