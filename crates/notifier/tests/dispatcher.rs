//! Dispatcher loop driven by a scripted sender over the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use agentdesk_common::error::AppError;
use agentdesk_common::types::{NotificationRecord, TerminalStatus};
use agentdesk_notifier::merge::{RecordUpdate, UpdateKind};
use agentdesk_notifier::resolver::StaticDeliveryConfig;
use agentdesk_notifier::retry::RetryPolicy;
use agentdesk_notifier::sender::NotificationSender;
use agentdesk_notifier::{
    Dispatcher, DispatcherConfig, FixedClock, InMemoryNotificationStore, NotificationStore,
};

/// Fails the first `failures` sends, then succeeds. Records every attempt.
#[derive(Default)]
struct ScriptedSender {
    failures: AtomicUsize,
    attempts: Mutex<Vec<(String, String)>>,
}

impl ScriptedSender {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send(&self, target: &str, record: &NotificationRecord) -> Result<(), AppError> {
        self.attempts
            .lock()
            .unwrap()
            .push((target.to_string(), record.task_id.clone()));
        tokio::task::yield_now().await;

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            Err(AppError::Delivery("telegram returned 502".to_string()))
        } else {
            Ok(())
        }
    }
}

fn completed(task_id: &str, target: &str, completed_at: i64) -> RecordUpdate {
    RecordUpdate {
        task_id: task_id.to_string(),
        workspace_root: "/w".to_string(),
        project_id: "p-w".to_string(),
        project_name: "w".to_string(),
        task_title: "Build".to_string(),
        delivery_target: target.to_string(),
        last_error: None,
        kind: UpdateKind::Terminal {
            status: TerminalStatus::Completed,
            started_at: Some(completed_at),
            completed_at: Some(completed_at),
        },
    }
}

fn config(max_retries: i32) -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 20,
        lease_duration_ms: 60_000,
        max_retries,
        retry: RetryPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        },
    }
}

fn dispatcher(
    store: &Arc<InMemoryNotificationStore>,
    sender: &Arc<ScriptedSender>,
    clock: &Arc<FixedClock>,
    fallback_target: Option<&str>,
    max_retries: i32,
) -> Dispatcher {
    Dispatcher::new(
        store.clone(),
        sender.clone(),
        clock.clone(),
        Arc::new(StaticDeliveryConfig::new(fallback_target.map(str::to_string))),
        config(max_retries),
    )
}

#[tokio::test]
async fn test_delivers_and_marks_notified() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::default());
    let clock = Arc::new(FixedClock::new(1_000));
    store.upsert(&completed("t1", "chat-1", 1_000), 1_000).await.unwrap();

    let d = dispatcher(&store, &sender, &clock, None, 10);
    let summary = d.run_once().await.unwrap();

    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(sender.attempts(), vec![("chat-1".to_string(), "t1".to_string())]);

    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.notified_at, Some(1_000));
    assert!(record.next_retry_at.is_none());

    let again = d.run_once().await.unwrap();
    assert_eq!(again.candidates, 0);
    assert_eq!(sender.attempts().len(), 1);
}

#[tokio::test]
async fn test_failure_schedules_backoff_then_succeeds() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::failing(2));
    let clock = Arc::new(FixedClock::new(1_000));
    store.upsert(&completed("t1", "chat-1", 1_000), 1_000).await.unwrap();

    let d = dispatcher(&store, &sender, &clock, None, 10);

    let first = d.run_once().await.unwrap();
    assert_eq!(first.failed, 1);
    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.next_retry_at, Some(1_100));
    assert_eq!(record.last_error.as_deref(), Some("telegram returned 502"));

    // not due yet
    assert_eq!(d.run_once().await.unwrap().candidates, 0);

    clock.set(1_100);
    let second = d.run_once().await.unwrap();
    assert_eq!(second.failed, 1);
    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.next_retry_at, Some(1_300));

    clock.set(1_300);
    let third = d.run_once().await.unwrap();
    assert_eq!(third.delivered, 1);
    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.notified_at, Some(1_300));
    assert!(record.last_error.is_none());
    assert_eq!(record.retry_count, 2);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::failing(usize::MAX));
    let clock = Arc::new(FixedClock::new(1_000));
    store.upsert(&completed("t1", "chat-1", 1_000), 1_000).await.unwrap();

    let d = dispatcher(&store, &sender, &clock, None, 2);

    assert_eq!(d.run_once().await.unwrap().failed, 1);
    clock.advance(10_000);
    assert_eq!(d.run_once().await.unwrap().failed, 1);

    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert!(record.next_retry_at.is_none());
    assert!(record.notified_at.is_none());

    clock.advance(1_000_000);
    let summary = d.run_once().await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert_eq!(sender.attempts().len(), 2);
}

#[tokio::test]
async fn test_defers_without_target_and_keeps_retry_count() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::default());
    let clock = Arc::new(FixedClock::new(1_000));
    store.upsert(&completed("t1", "", 1_000), 1_000).await.unwrap();

    let unconfigured = dispatcher(&store, &sender, &clock, None, 10);
    let summary = unconfigured.run_once().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.deferred, 1);
    assert!(sender.attempts().is_empty());

    let record = store.get("t1").await.unwrap().unwrap();
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.next_retry_at, Some(61_000));

    // once the lease expires a configured dispatcher picks it up
    clock.set(61_000);
    let configured = dispatcher(&store, &sender, &clock, Some("chat-default"), 10);
    assert_eq!(configured.run_once().await.unwrap().delivered, 1);
    assert_eq!(
        sender.attempts(),
        vec![("chat-default".to_string(), "t1".to_string())]
    );
}

#[tokio::test]
async fn test_two_dispatchers_deliver_once() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::default());
    let clock = Arc::new(FixedClock::new(5_000));
    for (i, task_id) in ["a", "b", "c"].iter().enumerate() {
        store
            .upsert(&completed(task_id, "chat-1", 1_000 + i as i64), 1_000)
            .await
            .unwrap();
    }

    let d1 = dispatcher(&store, &sender, &clock, None, 10);
    let d2 = dispatcher(&store, &sender, &clock, None, 10);
    assert_ne!(d1.id(), d2.id());

    let (s1, s2) = tokio::join!(d1.run_once(), d2.run_once());
    let (s1, s2) = (s1.unwrap(), s2.unwrap());

    assert_eq!(s1.delivered + s2.delivered, 3);
    assert_eq!(s1.claimed + s2.claimed, 3);

    let mut delivered: Vec<String> = sender.attempts().into_iter().map(|(_, id)| id).collect();
    delivered.sort();
    assert_eq!(delivered, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_run_loop_delivers_in_background() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = Arc::new(ScriptedSender::default());
    let clock = Arc::new(FixedClock::new(1_000));
    store.upsert(&completed("t1", "chat-1", 1_000), 1_000).await.unwrap();

    let d = dispatcher(&store, &sender, &clock, None, 10);
    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::select! {
            _ = d.run() => {}
            _ = async {
                loop {
                    let record = store.get("t1").await.unwrap().unwrap();
                    if record.notified_at.is_some() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            } => {}
        }
    })
    .await;

    assert!(delivered.is_ok());
    assert_eq!(sender.attempts().len(), 1);
}
