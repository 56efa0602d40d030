//! Dispatcher loop: select → claim → send → record outcome.
//!
//! Any number of dispatchers may poll the same store. They share nothing but
//! the store; a lost claim just means another dispatcher owns the record.
//! Delivery is at-least-once: if a dispatcher dies mid-send, the lease expires
//! and another dispatcher picks the record up again.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use agentdesk_common::error::AppError;

use crate::clock::Clock;
use crate::resolver::DeliveryConfigResolver;
use crate::retry::RetryPolicy;
use crate::sender::NotificationSender;
use crate::store::{
    ClaimOptions, DEFAULT_LEASE_DURATION_MS, DEFAULT_MAX_RETRIES, DEFAULT_SELECT_LIMIT,
    NotificationStore, SelectOptions,
};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Candidates fetched per poll.
    pub batch_size: i64,
    pub lease_duration_ms: i64,
    pub max_retries: i32,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: DEFAULT_SELECT_LIMIT,
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub candidates: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub lost_races: usize,
    /// Claimed but left to expire because no delivery target is known.
    pub deferred: usize,
}

pub struct Dispatcher {
    id: Uuid,
    store: Arc<dyn NotificationStore>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    delivery_config: Arc<dyn DeliveryConfigResolver>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        delivery_config: Arc<dyn DeliveryConfigResolver>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            sender,
            clock,
            delivery_config,
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Poll forever. Store errors are logged and the next poll proceeds.
    pub async fn run(&self) {
        tracing::info!(
            dispatcher_id = %self.id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Notification dispatcher started"
        );

        loop {
            match self.run_once().await {
                Ok(summary) if summary.claimed > 0 || summary.lost_races > 0 => {
                    tracing::debug!(dispatcher_id = %self.id, ?summary, "Dispatch poll finished");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(dispatcher_id = %self.id, error = %e, "Dispatch poll failed");
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One pass over the currently eligible records.
    pub async fn run_once(&self) -> Result<DispatchSummary, AppError> {
        let mut summary = DispatchSummary::default();

        let candidates = self
            .store
            .select_eligible(
                self.clock.now_ms(),
                SelectOptions {
                    limit: self.config.batch_size,
                    max_retries: self.config.max_retries,
                },
            )
            .await?;
        summary.candidates = candidates.len();

        let claim_options = ClaimOptions {
            lease_duration_ms: self.config.lease_duration_ms,
            max_retries: self.config.max_retries,
        };

        for task_id in candidates {
            let now = self.clock.now_ms();
            if !self.store.claim(&task_id, now, claim_options).await? {
                tracing::debug!(dispatcher_id = %self.id, task_id = %task_id, "Claim lost to another dispatcher");
                summary.lost_races += 1;
                continue;
            }
            summary.claimed += 1;

            let Some(record) = self.store.get(&task_id).await? else {
                continue;
            };

            let target = if record.delivery_target.is_empty() {
                match self.delivery_config.resolve().usable_target() {
                    Some(target) => target.to_string(),
                    None => {
                        tracing::debug!(
                            task_id = %task_id,
                            "No delivery target configured; leaving lease to expire"
                        );
                        summary.deferred += 1;
                        continue;
                    }
                }
            } else {
                record.delivery_target.clone()
            };

            match self.sender.send(&target, &record).await {
                Ok(()) => {
                    if self.store.mark_delivered(&task_id, self.clock.now_ms()).await? {
                        summary.delivered += 1;
                        tracing::info!(
                            task_id = %task_id,
                            status = %record.status,
                            attempts = record.retry_count + 1,
                            "Task notification delivered"
                        );
                    }
                }
                Err(e) => {
                    let attempts = record.retry_count + 1;
                    let next_retry_at = (attempts < self.config.max_retries)
                        .then(|| self.config.retry.next_retry_at(self.clock.now_ms(), attempts));

                    self.store
                        .record_failure(&task_id, &e.delivery_message(), next_retry_at)
                        .await?;
                    summary.failed += 1;

                    if next_retry_at.is_some() {
                        tracing::warn!(
                            task_id = %task_id,
                            attempts,
                            ?next_retry_at,
                            error = %e,
                            "Task notification failed, will retry"
                        );
                    } else {
                        tracing::error!(
                            task_id = %task_id,
                            attempts,
                            error = %e,
                            "Task notification failed permanently"
                        );
                    }
                }
            }
        }

        Ok(summary)
    }
}
