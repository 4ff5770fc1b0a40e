//! Fence Database Layer
//!
//! PostgreSQL-backed fence log. Shared by every participant instance, so
//! the row is the single source of truth for (xid, branch_id) ordering.
//! All transitions are atomic conditional UPDATEs, and claim staleness is
//! measured against the database clock so instances with skewed clocks agree.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::state::{FenceRecord, FenceStatus};
use super::store::FenceStore;
use crate::tcc::error::FenceError;
use crate::tcc::status::Phase;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tcc_fence_log (
    xid          VARCHAR(128) NOT NULL,
    branch_id    BIGINT       NOT NULL,
    action_name  VARCHAR(64)  NOT NULL,
    status       SMALLINT     NOT NULL,
    claim_phase  SMALLINT,
    claim_id     BIGINT       NOT NULL DEFAULT 0,
    created_at   TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
    updated_at   TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
    PRIMARY KEY (xid, branch_id)
)
"#;

const ADD_CLAIM_COLUMNS: &str = r#"
ALTER TABLE tcc_fence_log
    ADD COLUMN IF NOT EXISTS claim_phase SMALLINT,
    ADD COLUMN IF NOT EXISTS claim_id BIGINT NOT NULL DEFAULT 0
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tcc_fence_log_updated_at ON tcc_fence_log (updated_at)
"#;

/// Fence log stored in PostgreSQL
pub struct PgFenceStore {
    pool: PgPool,
}

impl PgFenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create `tcc_fence_log` if missing
    pub async fn ensure_schema(&self) -> Result<(), FenceError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(ADD_CLAIM_COLUMNS).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    fn millis_to_ts(millis: i64) -> Result<DateTime<Utc>, FenceError> {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| FenceError::Store(format!("timestamp out of range: {}", millis)))
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<FenceRecord, FenceError> {
        let status_id: i16 = row.get("status");
        let status = FenceStatus::from_id(status_id)
            .ok_or_else(|| FenceError::Store(format!("Invalid fence status: {}", status_id)))?;

        let claim_phase = match row.get::<Option<i16>, _>("claim_phase") {
            Some(id) => Some(
                Phase::from_id(id)
                    .ok_or_else(|| FenceError::Store(format!("Invalid claim phase: {}", id)))?,
            ),
            None => None,
        };

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(FenceRecord {
            xid: row.get("xid"),
            branch_id: row.get("branch_id"),
            action_name: row.get("action_name"),
            status,
            claim_phase,
            claim_id: row.get("claim_id"),
            created_at: created_at.timestamp_millis(),
            updated_at: updated_at.timestamp_millis(),
        })
    }
}

#[async_trait]
impl FenceStore for PgFenceStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: &FenceRecord) -> Result<bool, FenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tcc_fence_log
                (xid, branch_id, action_name, status, claim_phase, claim_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (xid, branch_id) DO NOTHING
            "#,
        )
        .bind(&record.xid)
        .bind(record.branch_id)
        .bind(&record.action_name)
        .bind(record.status.id())
        .bind(record.claim_phase.map(|p| p.id()))
        .bind(record.claim_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, xid: &str, branch_id: i64) -> Result<Option<FenceRecord>, FenceError> {
        let row = sqlx::query(
            r#"
            SELECT xid, branch_id, action_name, status, claim_phase, claim_id, created_at, updated_at
            FROM tcc_fence_log
            WHERE xid = $1 AND branch_id = $2
            "#,
        )
        .bind(xid)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn acquire_claim(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
    ) -> Result<Option<i64>, FenceError> {
        let row = sqlx::query(
            r#"
            UPDATE tcc_fence_log
            SET status = $1, claim_phase = $2, claim_id = claim_id + 1, updated_at = NOW()
            WHERE xid = $3 AND branch_id = $4 AND status = $5
            RETURNING claim_id
            "#,
        )
        .bind(FenceStatus::Suspicious.id())
        .bind(phase.id())
        .bind(xid)
        .bind(branch_id)
        .bind(FenceStatus::NotStarted.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("claim_id")))
    }

    async fn reclaim_stale(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
        stale_after: Duration,
    ) -> Result<Option<i64>, FenceError> {
        let row = sqlx::query(
            r#"
            UPDATE tcc_fence_log
            SET claim_id = claim_id + 1, updated_at = NOW()
            WHERE xid = $1 AND branch_id = $2 AND status = $3 AND claim_phase = $4
              AND updated_at < NOW() - make_interval(secs => $5)
            RETURNING claim_id
            "#,
        )
        .bind(xid)
        .bind(branch_id)
        .bind(FenceStatus::Suspicious.id())
        .bind(phase.id())
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("claim_id")))
    }

    async fn claim_is_stale(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        stale_after: Duration,
    ) -> Result<bool, FenceError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS stale
            FROM tcc_fence_log
            WHERE xid = $1 AND branch_id = $2 AND status = $3 AND claim_id = $4
              AND updated_at < NOW() - make_interval(secs => $5)
            "#,
        )
        .bind(xid)
        .bind(branch_id)
        .bind(FenceStatus::Suspicious.id())
        .bind(claim_id)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn renew_claim(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
    ) -> Result<bool, FenceError> {
        let result = sqlx::query(
            r#"
            UPDATE tcc_fence_log
            SET updated_at = NOW()
            WHERE xid = $1 AND branch_id = $2 AND status = $3 AND claim_id = $4
            "#,
        )
        .bind(xid)
        .bind(branch_id)
        .bind(FenceStatus::Suspicious.id())
        .bind(claim_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resolve_claim(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        new: FenceStatus,
    ) -> Result<bool, FenceError> {
        let result = sqlx::query(
            r#"
            UPDATE tcc_fence_log
            SET status = $1,
                claim_phase = CASE WHEN $1 = $5 THEN NULL ELSE claim_phase END,
                updated_at = NOW()
            WHERE xid = $2 AND branch_id = $3 AND status = $4 AND claim_id = $6
            "#,
        )
        .bind(new.id())
        .bind(xid)
        .bind(branch_id)
        .bind(FenceStatus::Suspicious.id())
        .bind(FenceStatus::NotStarted.id())
        .bind(claim_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_terminal_before(
        &self,
        before: i64,
        limit: usize,
    ) -> Result<u64, FenceError> {
        let result = sqlx::query(
            r#"
            DELETE FROM tcc_fence_log
            WHERE ctid IN (
                SELECT ctid FROM tcc_fence_log
                WHERE status IN ($1, $2) AND updated_at < $3
                LIMIT $4
            )
            "#,
        )
        .bind(FenceStatus::Committed.id())
        .bind(FenceStatus::RolledBack.id())
        .bind(Self::millis_to_ts(before)?)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
