//! PostgreSQL-backed store.
//!
//! Claims and outcomes are single conditional `UPDATE` statements; the
//! database's per-statement atomicity is the only lock between dispatchers.
//! Upserts run [`merge_record`] inside one transaction that holds the row lock.

use async_trait::async_trait;
use sqlx::PgPool;

use agentdesk_common::error::AppError;
use agentdesk_common::types::NotificationRecord;

use super::{ClaimOptions, NotificationStore, SelectOptions};
use crate::merge::{RecordUpdate, merge_record};

/// Eligibility predicate shared by the selector and the claimer.
/// `$1` = now, `$2` = max retries.
macro_rules! eligible_predicate {
    () => {
        "notified_at IS NULL \
         AND completed_at IS NOT NULL \
         AND status IN ('completed', 'failed', 'cancelled') \
         AND retry_count < $2 \
         AND (next_retry_at IS NULL OR next_retry_at <= $1)"
    };
}

const SELECT_ELIGIBLE_SQL: &str = concat!(
    "SELECT task_id FROM task_notifications WHERE ",
    eligible_predicate!(),
    " ORDER BY COALESCE(next_retry_at, 0) ASC, completed_at ASC, created_at ASC, task_id ASC \
     LIMIT $3"
);

const CLAIM_SQL: &str = concat!(
    "UPDATE task_notifications SET next_retry_at = $3 WHERE task_id = $4 AND ",
    eligible_predicate!()
);

/// Attempts before an upsert gives up on a row that keeps being inserted
/// concurrently. The second pass always finds the row, so two is enough.
const UPSERT_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn upsert(
        &self,
        update: &RecordUpdate,
        now: i64,
    ) -> Result<NotificationRecord, AppError> {
        let mut tx = self.pool.begin().await?;

        for _ in 0..UPSERT_ATTEMPTS {
            let existing: Option<NotificationRecord> = sqlx::query_as(
                "SELECT * FROM task_notifications WHERE task_id = $1 FOR UPDATE",
            )
            .bind(&update.task_id)
            .fetch_optional(&mut *tx)
            .await?;

            let merged = merge_record(existing.as_ref(), update, now);

            if existing.is_some() {
                sqlx::query(
                    r#"
                    UPDATE task_notifications
                    SET workspace_root = $2, project_id = $3, project_name = $4,
                        task_title = $5, delivery_target = $6, status = $7,
                        started_at = $8, completed_at = $9, last_error = $10,
                        next_retry_at = $11
                    WHERE task_id = $1
                    "#,
                )
                .bind(&merged.task_id)
                .bind(&merged.workspace_root)
                .bind(&merged.project_id)
                .bind(&merged.project_name)
                .bind(&merged.task_title)
                .bind(&merged.delivery_target)
                .bind(&merged.status)
                .bind(merged.started_at)
                .bind(merged.completed_at)
                .bind(&merged.last_error)
                .bind(merged.next_retry_at)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                return Ok(merged);
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO task_notifications (
                    task_id, workspace_root, project_id, project_name, task_title,
                    delivery_target, status, started_at, completed_at, created_at,
                    notified_at, last_error, retry_count, next_retry_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, $11, 0, NULL)
                ON CONFLICT (task_id) DO NOTHING
                "#,
            )
            .bind(&merged.task_id)
            .bind(&merged.workspace_root)
            .bind(&merged.project_id)
            .bind(&merged.project_name)
            .bind(&merged.task_title)
            .bind(&merged.delivery_target)
            .bind(&merged.status)
            .bind(merged.started_at)
            .bind(merged.completed_at)
            .bind(merged.created_at)
            .bind(&merged.last_error)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 1 {
                tx.commit().await?;
                return Ok(merged);
            }

            // Another writer inserted the row first; re-read it under lock and merge.
            tracing::debug!(task_id = %update.task_id, "Insert raced, merging into existing row");
        }

        Err(AppError::Store(format!(
            "upsert for task {} did not converge",
            update.task_id
        )))
    }

    async fn get(&self, task_id: &str) -> Result<Option<NotificationRecord>, AppError> {
        let record = sqlx::query_as("SELECT * FROM task_notifications WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn select_eligible(
        &self,
        now: i64,
        options: SelectOptions,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(SELECT_ELIGIBLE_SQL)
            .bind(now)
            .bind(options.max_retries)
            .bind(options.limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(task_id,)| task_id).collect())
    }

    async fn claim(
        &self,
        task_id: &str,
        now: i64,
        options: ClaimOptions,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(CLAIM_SQL)
            .bind(now)
            .bind(options.max_retries)
            .bind(now.saturating_add(options.lease_duration_ms))
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_delivered(&self, task_id: &str, now: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE task_notifications
            SET notified_at = $1, last_error = NULL, next_retry_at = NULL
            WHERE task_id = $2 AND notified_at IS NULL
            "#,
        )
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        task_id: &str,
        message: &str,
        next_retry_at: Option<i64>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE task_notifications
            SET last_error = $1, retry_count = retry_count + 1, next_retry_at = $2
            WHERE task_id = $3 AND notified_at IS NULL
            "#,
        )
        .bind(message)
        .bind(next_retry_at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
