//! Credential repository - SQLite backed credential store
//!
//! The payload is stored as a JSON object of base64 encoded values. The
//! version only moves when the payload changes, so saving the same record
//! twice is indistinguishable from saving it once.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

use super::DbPool;
use crate::models::CredentialRecord;
use crate::services::credential_store::CredentialStore;
use crate::utils::error::{RotationError, RotationResult};

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn encode_payload(data: &BTreeMap<String, Vec<u8>>) -> RotationResult<String> {
    let encoded: BTreeMap<&str, String> = data
        .iter()
        .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
        .collect();
    Ok(serde_json::to_string(&encoded)?)
}

fn decode_payload(payload: &str) -> RotationResult<BTreeMap<String, Vec<u8>>> {
    let encoded: BTreeMap<String, String> = serde_json::from_str(payload)?;
    encoded
        .into_iter()
        .map(|(key, value)| {
            let bytes = STANDARD.decode(value.as_bytes()).map_err(|e| {
                RotationError::Store(format!("Invalid payload value for {}: {}", key, e))
            })?;
            Ok((key, bytes))
        })
        .collect()
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, key: &str) -> RotationResult<Option<CredentialRecord>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT data, version
            FROM credentials
            WHERE identity = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((data, version)) => Ok(Some(CredentialRecord {
                data: decode_payload(&data)?,
                version: Some(version),
            })),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, record: &CredentialRecord) -> RotationResult<()> {
        let data = encode_payload(&record.data)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO credentials (identity, data, version, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                data = excluded.data,
                version = credentials.version + 1,
                updated_at = excluded.updated_at
            WHERE credentials.data != excluded.data
            "#,
        )
        .bind(key)
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(
            identity = key,
            created = record.version.is_none(),
            rows = result.rows_affected(),
            "Saved credential record"
        );
        Ok(())
    }
}
