//! Condition repository - latest rotation condition per identity

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DbPool;
use crate::models::{ConditionReason, RotationCondition, StoredCondition};
use crate::services::status::StatusReporter;
use crate::utils::error::{RotationError, RotationResult};

/// Persists reported conditions; `last_transition_time` only moves when the
/// status flips
#[derive(Clone)]
pub struct SqliteStatusReporter {
    pool: DbPool,
}

type ConditionRow = (String, String, bool, String, String, String, String);

impl SqliteStatusReporter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Latest condition of `identity`
    pub async fn get(&self, identity: &str) -> RotationResult<Option<StoredCondition>> {
        let row: Option<ConditionRow> = sqlx::query_as(
            r#"
            SELECT identity, condition_type, status, reason, message,
                   last_transition_time, updated_at
            FROM rotation_conditions
            WHERE identity = ?
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RotationError::Status(e.to_string()))?;

        row.map(row_to_condition).transpose()
    }

    /// Conditions of every identity, ordered by identity
    pub async fn list(&self) -> RotationResult<Vec<StoredCondition>> {
        let rows: Vec<ConditionRow> = sqlx::query_as(
            r#"
            SELECT identity, condition_type, status, reason, message,
                   last_transition_time, updated_at
            FROM rotation_conditions
            ORDER BY identity
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RotationError::Status(e.to_string()))?;

        rows.into_iter().map(row_to_condition).collect()
    }
}

fn parse_reason(reason: &str) -> RotationResult<ConditionReason> {
    match reason {
        "ClientCertificateUpdated" => Ok(ConditionReason::ClientCertificateUpdated),
        "ClientCertificateUpdateFailed" => Ok(ConditionReason::ClientCertificateUpdateFailed),
        other => Err(RotationError::Status(format!(
            "Unknown condition reason: {}",
            other
        ))),
    }
}

fn parse_time(value: &str) -> RotationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RotationError::Status(format!("Invalid timestamp {}: {}", value, e)))
}

fn row_to_condition(row: ConditionRow) -> RotationResult<StoredCondition> {
    let (identity, condition_type, status, reason, message, last_transition_time, updated_at) =
        row;
    Ok(StoredCondition {
        identity,
        condition: RotationCondition {
            condition_type,
            status,
            reason: parse_reason(&reason)?,
            message,
        },
        last_transition_time: parse_time(&last_transition_time)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[async_trait]
impl StatusReporter for SqliteStatusReporter {
    async fn report(&self, identity: &str, condition: &RotationCondition) -> RotationResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO rotation_conditions (
                identity, condition_type, status, reason, message,
                last_transition_time, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                condition_type = excluded.condition_type,
                last_transition_time = CASE
                    WHEN rotation_conditions.status = excluded.status
                    THEN rotation_conditions.last_transition_time
                    ELSE excluded.last_transition_time
                END,
                status = excluded.status,
                reason = excluded.reason,
                message = excluded.message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(identity)
        .bind(&condition.condition_type)
        .bind(condition.status)
        .bind(condition.reason.as_str())
        .bind(&condition.message)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| RotationError::Status(e.to_string()))?;

        Ok(())
    }
}
