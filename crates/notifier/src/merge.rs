//! Merge rules for notification records.
//!
//! Every write to `task_notifications` goes through [`merge_record`], which
//! combines the stored row (if any) with an incoming lifecycle update. Stores
//! apply the result atomically, so the rules stay identical across backends.
//!
//! Summary of the rules:
//! - `workspace_root` / `project_id` always take the latest value.
//! - `project_name`, `task_title`, `delivery_target` are first-writer-wins:
//!   a late call with an empty value never blanks a good one.
//! - `last_error` keeps a recorded failure, and clears the
//!   `missing_delivery_config` sentinel once a delivery target shows up.
//!   It never changes after `notified_at` is set.
//! - Terminal updates coalesce timestamps and release an expired lease, but
//!   never revoke a live one.

use agentdesk_common::types::{
    MISSING_DELIVERY_CONFIG, NotificationRecord, STATUS_CREATED, TerminalStatus,
};

/// What kind of lifecycle event produced an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// Task started, or its notification target was (re-)bound.
    Binding,
    /// Task reached a terminal state.
    Terminal {
        status: TerminalStatus,
        started_at: Option<i64>,
        completed_at: Option<i64>,
    },
}

/// Incoming values for a merge-upsert, already resolved by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub task_id: String,
    pub workspace_root: String,
    pub project_id: String,
    pub project_name: String,
    pub task_title: String,
    pub delivery_target: String,
    /// `Some(MISSING_DELIVERY_CONFIG)` when no delivery target could be resolved.
    pub last_error: Option<String>,
    pub kind: UpdateKind,
}

/// Combine the stored record (if any) with an incoming update.
pub fn merge_record(
    existing: Option<&NotificationRecord>,
    incoming: &RecordUpdate,
    now: i64,
) -> NotificationRecord {
    match existing {
        None => insert_record(incoming, now),
        Some(current) => update_record(current, incoming, now),
    }
}

fn insert_record(incoming: &RecordUpdate, now: i64) -> NotificationRecord {
    let (status, started_at, completed_at) = match &incoming.kind {
        UpdateKind::Binding => (STATUS_CREATED.to_string(), None, None),
        UpdateKind::Terminal {
            status,
            started_at,
            completed_at,
        } => (status.to_string(), *started_at, *completed_at),
    };

    NotificationRecord {
        task_id: incoming.task_id.clone(),
        workspace_root: incoming.workspace_root.clone(),
        project_id: incoming.project_id.clone(),
        project_name: incoming.project_name.clone(),
        task_title: incoming.task_title.clone(),
        delivery_target: incoming.delivery_target.clone(),
        status,
        started_at,
        completed_at,
        created_at: now,
        notified_at: None,
        last_error: non_empty(incoming.last_error.as_deref()).map(str::to_string),
        retry_count: 0,
        next_retry_at: None,
    }
}

fn update_record(
    current: &NotificationRecord,
    incoming: &RecordUpdate,
    now: i64,
) -> NotificationRecord {
    let mut merged = current.clone();

    merged.workspace_root = incoming.workspace_root.clone();
    merged.project_id = incoming.project_id.clone();
    merged.project_name = fill_if_empty(&current.project_name, &incoming.project_name);
    merged.task_title = fill_if_empty(&current.task_title, &incoming.task_title);
    merged.delivery_target = fill_if_empty(&current.delivery_target, &incoming.delivery_target);
    // delivery outcome fields are frozen once notified
    if !current.is_notified() {
        merged.last_error = merge_last_error(
            current.last_error.as_deref(),
            incoming.last_error.as_deref(),
            &incoming.delivery_target,
        );
    }

    if let UpdateKind::Terminal {
        status,
        started_at,
        completed_at,
    } = &incoming.kind
    {
        merged.status = status.to_string();
        merged.started_at = started_at.or(current.started_at);
        merged.completed_at = completed_at.or(current.completed_at);

        if !current.is_notified() && !current.has_live_lease(now) {
            merged.next_retry_at = None;
        }
    }

    merged
}

fn fill_if_empty(existing: &str, incoming: &str) -> String {
    if existing.is_empty() {
        incoming.to_string()
    } else {
        existing.to_string()
    }
}

fn merge_last_error(
    existing: Option<&str>,
    incoming: Option<&str>,
    incoming_target: &str,
) -> Option<String> {
    let existing = non_empty(existing);

    if existing == Some(MISSING_DELIVERY_CONFIG) && !incoming_target.is_empty() {
        return None;
    }

    match non_empty(incoming) {
        Some(new_error) => Some(existing.unwrap_or(new_error).to_string()),
        None => existing.map(str::to_string),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// The eligibility predicate, evaluated in memory.
///
/// Must agree exactly with the SQL predicate used by the PostgreSQL store.
pub fn is_eligible(record: &NotificationRecord, now: i64, max_retries: i32) -> bool {
    record.notified_at.is_none()
        && record.completed_at.is_some()
        && TerminalStatus::is_terminal(&record.status)
        && record.retry_count < max_retries
        && record.next_retry_at.is_none_or(|at| at <= now)
}
