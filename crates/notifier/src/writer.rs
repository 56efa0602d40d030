//! Lifecycle writers: bind a task when it starts, record its terminal status
//! when it finishes.
//!
//! Both are called from fire-and-forget task hooks. Calls missing a task id or
//! workspace root are dropped (`Ok(None)`), and a missing delivery target is
//! recorded as the `missing_delivery_config` sentinel rather than an error.

use std::sync::Arc;

use agentdesk_common::error::AppError;
use agentdesk_common::types::{MISSING_DELIVERY_CONFIG, NotificationRecord, TerminalStatus};

use crate::clock::Clock;
use crate::merge::{RecordUpdate, UpdateKind};
use crate::resolver::{
    DeliveryConfigResolver, ProjectNameResolver, WorkspaceNormalizer, default_project_name,
};
use crate::store::NotificationStore;

/// A task started, or its notification target was (re-)bound.
#[derive(Debug, Clone, Default)]
pub struct BindTask {
    pub task_id: String,
    pub workspace_root: String,
    pub task_title: String,
    pub user_id: Option<String>,
    /// Overrides the writer's clock.
    pub now: Option<i64>,
}

/// A task reached a terminal state.
#[derive(Debug, Clone)]
pub struct TerminalTask {
    pub task_id: String,
    pub workspace_root: String,
    pub task_title: String,
    pub status: TerminalStatus,
    /// Defaults to now.
    pub started_at: Option<i64>,
    /// Defaults to now.
    pub completed_at: Option<i64>,
    pub user_id: Option<String>,
    /// Overrides the writer's clock.
    pub now: Option<i64>,
}

impl TerminalTask {
    pub fn new(
        task_id: impl Into<String>,
        workspace_root: impl Into<String>,
        status: TerminalStatus,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workspace_root: workspace_root.into(),
            task_title: String::new(),
            status,
            started_at: None,
            completed_at: None,
            user_id: None,
            now: None,
        }
    }
}

/// Binding and terminal-status writer over an injected store.
pub struct NotificationWriter {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    project_names: Arc<dyn ProjectNameResolver>,
    delivery_config: Arc<dyn DeliveryConfigResolver>,
    normalizer: Arc<dyn WorkspaceNormalizer>,
}

impl NotificationWriter {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        project_names: Arc<dyn ProjectNameResolver>,
        delivery_config: Arc<dyn DeliveryConfigResolver>,
        normalizer: Arc<dyn WorkspaceNormalizer>,
    ) -> Self {
        Self {
            store,
            clock,
            project_names,
            delivery_config,
            normalizer,
        }
    }

    /// Create the record for a task, or merge new binding metadata into it.
    pub async fn bind_task(&self, task: BindTask) -> Result<Option<NotificationRecord>, AppError> {
        let Some(update) = self.prepare(
            &task.task_id,
            &task.workspace_root,
            &task.task_title,
            task.user_id.as_deref(),
            UpdateKind::Binding,
        ) else {
            return Ok(None);
        };

        let now = task.now.unwrap_or_else(|| self.clock.now_ms());
        let record = self.store.upsert(&update, now).await?;

        tracing::debug!(task_id = %record.task_id, project_id = %record.project_id, "Task bound for notification");
        Ok(Some(record))
    }

    /// Record a terminal status. Releases an expired lease so the record is
    /// immediately eligible, but leaves a live lease alone.
    pub async fn record_terminal(
        &self,
        task: TerminalTask,
    ) -> Result<Option<NotificationRecord>, AppError> {
        let now = task.now.unwrap_or_else(|| self.clock.now_ms());
        let kind = UpdateKind::Terminal {
            status: task.status,
            started_at: Some(task.started_at.unwrap_or(now)),
            completed_at: Some(task.completed_at.unwrap_or(now)),
        };

        let Some(update) = self.prepare(
            &task.task_id,
            &task.workspace_root,
            &task.task_title,
            task.user_id.as_deref(),
            kind,
        ) else {
            return Ok(None);
        };

        let record = self.store.upsert(&update, now).await?;

        tracing::info!(
            task_id = %record.task_id,
            status = %record.status,
            "Task terminal status recorded"
        );
        Ok(Some(record))
    }

    /// Resolve collaborators into a [`RecordUpdate`]. `None` means the call
    /// lacks a task id or workspace root and must not write.
    fn prepare(
        &self,
        task_id: &str,
        workspace_root: &str,
        task_title: &str,
        user_id: Option<&str>,
        kind: UpdateKind,
    ) -> Option<RecordUpdate> {
        let task_id = task_id.trim();
        if task_id.is_empty() || workspace_root.trim().is_empty() {
            tracing::debug!(task_id, "Dropping notification write without task id or workspace root");
            return None;
        }

        let normalized = self.normalizer.normalize(workspace_root);
        if normalized.is_empty() {
            return None;
        }
        let project_id = self.normalizer.project_id(&normalized);

        let mut project_name = self
            .project_names
            .resolve(&normalized, user_id)
            .trim()
            .to_string();
        if project_name.is_empty() {
            project_name = default_project_name(&normalized);
        }

        let delivery = self.delivery_config.resolve();
        let (delivery_target, last_error) = match delivery.usable_target() {
            Some(target) => (target.to_string(), None),
            None => {
                tracing::warn!(task_id, "Delivery not configured; notification will wait for a target");
                (String::new(), Some(MISSING_DELIVERY_CONFIG.to_string()))
            }
        };

        Some(RecordUpdate {
            task_id: task_id.to_string(),
            workspace_root: normalized,
            project_id,
            project_name,
            task_title: task_title.trim().to_string(),
            delivery_target,
            last_error,
            kind,
        })
    }
}
