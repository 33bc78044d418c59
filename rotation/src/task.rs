//! Rotation tasks and the rotation event log.

use std::collections::BTreeSet;
use std::fmt;

use keyguard_types::{KeyStatus, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    Automatic,
    Manual,
    SecurityEvent,
    Compliance,
    Migration,
    Expiry,
    Compromise,
}

/// `Pending -> InProgress -> Completed | Failed`, `Pending | InProgress ->
/// Cancelled`, `Completed -> RolledBack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl TaskStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// What a completed rotation replaced, so it can be undone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub old_key_id: String,
    pub old_status: KeyStatus,
    pub new_key_id: String,
    pub last_rotation: Option<Timestamp>,
    pub next_rotation: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationTask {
    pub task_id: String,
    /// Logical key id; stays stable across rotations.
    pub key_id: String,
    pub trigger: RotationTrigger,
    pub status: TaskStatus,
    pub initiated_by: String,
    pub old_key_id: String,
    pub new_key_id: Option<String>,
    /// Users named to approve this task.
    pub approvers: Vec<String>,
    pub approvals: BTreeSet<String>,
    pub required_approvals: usize,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub rollback: Option<RollbackSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
    PolicyCreated,
    PolicyAssigned,
    KeyRegistered,
    RotationInitiated,
    RotationApproved,
    RotationStarted,
    RotationCompleted,
    RotationFailed,
    RotationCancelled,
    RotationRolledBack,
    KeyArchived,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationEvent {
    pub event_id: String,
    pub timestamp: Timestamp,
    pub kind: RotationEventKind,
    pub key_id: Option<String>,
    pub task_id: Option<String>,
    pub actor: Option<String>,
    pub message: String,
}
