//! Notification record store.
//!
//! The store is the only synchronization point between dispatchers: every
//! operation is a single atomic step against one record. [`NotificationStore::claim`]
//! is the mutual-exclusion primitive; everything else is a plain read or an
//! idempotent write.

mod memory;
mod postgres;

use async_trait::async_trait;

use agentdesk_common::error::AppError;
use agentdesk_common::types::NotificationRecord;

use crate::merge::RecordUpdate;

pub use self::memory::InMemoryNotificationStore;
pub use self::postgres::PgNotificationStore;

/// Default number of candidates returned by one eligibility poll.
pub const DEFAULT_SELECT_LIMIT: i64 = 20;

/// Default delivery attempts before a record stops being eligible.
pub const DEFAULT_MAX_RETRIES: i32 = 10;

/// Default lease length for a claimed record.
pub const DEFAULT_LEASE_DURATION_MS: i64 = 60_000;

/// Per-call options for [`NotificationStore::select_eligible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    pub limit: i64,
    pub max_retries: i32,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SELECT_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Per-call options for [`NotificationStore::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    pub lease_duration_ms: i64,
    pub max_retries: i32,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Durable table of one notification record per task.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Merge-upsert keyed on `task_id`, applying [`crate::merge::merge_record`]
    /// atomically. Returns the stored record.
    async fn upsert(&self, update: &RecordUpdate, now: i64)
    -> Result<NotificationRecord, AppError>;

    /// Fetch one record for inspection.
    async fn get(&self, task_id: &str) -> Result<Option<NotificationRecord>, AppError>;

    /// Task ids eligible for a delivery attempt at `now`, ordered by
    /// `COALESCE(next_retry_at, 0)`, `completed_at`, `created_at`, `task_id`.
    async fn select_eligible(
        &self,
        now: i64,
        options: SelectOptions,
    ) -> Result<Vec<String>, AppError>;

    /// Take the lease on an eligible record by moving `next_retry_at` to
    /// `now + lease_duration_ms`. Returns `false` when the record is not
    /// eligible, which includes losing a race to another dispatcher.
    async fn claim(&self, task_id: &str, now: i64, options: ClaimOptions)
    -> Result<bool, AppError>;

    /// Terminal success. No-op once `notified_at` is set.
    async fn mark_delivered(&self, task_id: &str, now: i64) -> Result<bool, AppError>;

    /// Record a failed attempt and schedule the next one. `None` makes the
    /// record eligible again immediately (while under the retry cap).
    async fn record_failure(
        &self,
        task_id: &str,
        message: &str,
        next_retry_at: Option<i64>,
    ) -> Result<bool, AppError>;
}
