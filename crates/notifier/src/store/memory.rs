//! Single-process store. One mutex guards the table, so each operation is
//! atomic exactly like a single SQL statement would be.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use agentdesk_common::error::AppError;
use agentdesk_common::types::NotificationRecord;

use super::{ClaimOptions, NotificationStore, SelectOptions};
use crate::merge::{RecordUpdate, is_eligible, merge_record};

#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    records: Mutex<HashMap<String, NotificationRecord>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, NotificationRecord>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Store("notification table lock poisoned".to_string()))
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn upsert(
        &self,
        update: &RecordUpdate,
        now: i64,
    ) -> Result<NotificationRecord, AppError> {
        let mut records = self.lock()?;
        let merged = merge_record(records.get(&update.task_id), update, now);
        records.insert(update.task_id.clone(), merged.clone());
        Ok(merged)
    }

    async fn get(&self, task_id: &str) -> Result<Option<NotificationRecord>, AppError> {
        Ok(self.lock()?.get(task_id).cloned())
    }

    async fn select_eligible(
        &self,
        now: i64,
        options: SelectOptions,
    ) -> Result<Vec<String>, AppError> {
        let records = self.lock()?;
        let mut eligible: Vec<&NotificationRecord> = records
            .values()
            .filter(|r| is_eligible(r, now, options.max_retries))
            .collect();

        eligible.sort_by(|a, b| {
            (a.next_retry_at.unwrap_or(0), a.completed_at, a.created_at, &a.task_id).cmp(&(
                b.next_retry_at.unwrap_or(0),
                b.completed_at,
                b.created_at,
                &b.task_id,
            ))
        });

        let limit = usize::try_from(options.limit.max(0)).unwrap_or(usize::MAX);
        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|r| r.task_id.clone())
            .collect())
    }

    async fn claim(
        &self,
        task_id: &str,
        now: i64,
        options: ClaimOptions,
    ) -> Result<bool, AppError> {
        let mut records = self.lock()?;
        match records.get_mut(task_id) {
            Some(record) if is_eligible(record, now, options.max_retries) => {
                record.next_retry_at = Some(now.saturating_add(options.lease_duration_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_delivered(&self, task_id: &str, now: i64) -> Result<bool, AppError> {
        let mut records = self.lock()?;
        match records.get_mut(task_id) {
            Some(record) if !record.is_notified() => {
                record.notified_at = Some(now);
                record.last_error = None;
                record.next_retry_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        task_id: &str,
        message: &str,
        next_retry_at: Option<i64>,
    ) -> Result<bool, AppError> {
        let mut records = self.lock()?;
        match records.get_mut(task_id) {
            Some(record) if !record.is_notified() => {
                record.last_error = Some(message.to_string());
                record.retry_count += 1;
                record.next_retry_at = next_retry_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agentdesk_common::types::TerminalStatus;

    use super::*;
    use crate::merge::UpdateKind;

    fn completed(task_id: &str) -> RecordUpdate {
        RecordUpdate {
            task_id: task_id.to_string(),
            workspace_root: "/w".to_string(),
            project_id: "p-w".to_string(),
            project_name: "w".to_string(),
            task_title: String::new(),
            delivery_target: "chat-1".to_string(),
            last_error: None,
            kind: UpdateKind::Terminal {
                status: TerminalStatus::Completed,
                started_at: Some(1_000),
                completed_at: Some(1_000),
            },
        }
    }

    #[tokio::test]
    async fn test_claim_lease_saturates() {
        let store = InMemoryNotificationStore::new();
        store.upsert(&completed("t1"), 1_000).await.unwrap();

        let options = ClaimOptions {
            lease_duration_ms: i64::MAX,
            ..Default::default()
        };
        assert!(store.claim("t1", 1_000, options).await.unwrap());

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.next_retry_at, Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_poisoned_lock_surfaces_store_error() {
        let store = Arc::new(InMemoryNotificationStore::new());
        store.upsert(&completed("t1"), 1_000).await.unwrap();
        assert_eq!(store.len().unwrap(), 1);

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.lock().unwrap();
            panic!("poison the table lock");
        })
        .join();

        assert!(matches!(store.len(), Err(AppError::Store(_))));
        assert!(matches!(store.is_empty(), Err(AppError::Store(_))));
        assert!(matches!(store.get("t1").await, Err(AppError::Store(_))));
    }
}
