//! Credential store contract and in-memory store
//!
//! `save` creates the record when it carries no version and replaces it
//! wholesale otherwise. Saving the same payload twice leaves the store as a
//! single save would.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::CredentialRecord;
use crate::utils::error::RotationResult;

/// Durable home of credential records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored record, `None` when absent
    async fn get(&self, key: &str) -> RotationResult<Option<CredentialRecord>>;

    /// Create or replace the record stored under `key`
    async fn save(&self, key: &str, record: &CredentialRecord) -> RotationResult<()>;
}

/// Process-local store, mostly useful for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> RotationResult<Option<CredentialRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, record: &CredentialRecord) -> RotationResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(existing) => {
                if existing.data != record.data {
                    existing.data = record.data.clone();
                    existing.version = existing.version.map(|v| v + 1).or(Some(1));
                }
            }
            None => {
                let mut stored = record.clone();
                stored.version = Some(1);
                records.insert(key.to_string(), stored);
            }
        }
        Ok(())
    }
}
