use serde::{Deserialize, Serialize};

/// `last_error` sentinel: the record cannot be delivered yet because no
/// delivery target is configured. Distinct from a real delivery failure.
pub const MISSING_DELIVERY_CONFIG: &str = "missing_delivery_config";

/// Status written when a task is first bound, before it finishes.
pub const STATUS_CREATED: &str = "created";

/// Task states from which no further task-level transition occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Cancelled,
}

impl TerminalStatus {
    pub const ALL: [TerminalStatus; 3] = [
        TerminalStatus::Completed,
        TerminalStatus::Failed,
        TerminalStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Completed => "completed",
            TerminalStatus::Failed => "failed",
            TerminalStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a free-form status string names a terminal state.
    pub fn is_terminal(status: &str) -> bool {
        status.parse::<TerminalStatus>().is_ok()
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TerminalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TerminalStatus::Completed),
            "failed" => Ok(TerminalStatus::Failed),
            "cancelled" => Ok(TerminalStatus::Cancelled),
            other => Err(format!("'{}' is not a terminal status", other)),
        }
    }
}

/// Delivery state for one task. One row per `task_id` in `task_notifications`.
///
/// Timestamps are epoch milliseconds. `next_retry_at` is both the earliest
/// retry time and, while a dispatcher holds a claim, the lease expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub task_id: String,
    pub workspace_root: String,
    pub project_id: String,
    pub project_name: String,
    pub task_title: String,
    pub delivery_target: String,
    pub status: String,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub notified_at: Option<i64>,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<i64>,
}

impl NotificationRecord {
    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }

    /// A claim is live while `next_retry_at` lies in the future.
    pub fn has_live_lease(&self, now: i64) -> bool {
        self.next_retry_at.is_some_and(|at| at > now)
    }

    pub fn is_missing_delivery_config(&self) -> bool {
        self.last_error.as_deref() == Some(MISSING_DELIVERY_CONFIG)
    }
}
