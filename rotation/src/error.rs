use keyguard_keystore::KeystoreError;
use thiserror::Error;

use crate::TaskStatus;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("key not managed: {0}")]
    KeyNotFound(String),

    #[error("key already managed: {0}")]
    KeyAlreadyManaged(String),

    #[error("rotation policy not found: {0}")]
    PolicyNotFound(String),

    #[error("rotation policy already exists: {0}")]
    PolicyExists(String),

    #[error("invalid rotation policy: {0}")]
    InvalidPolicy(String),

    #[error("rotation task not found: {0}")]
    TaskNotFound(String),

    #[error("key {key_id} already has open rotation task {task_id}")]
    RotationInProgress { key_id: String, task_id: String },

    #[error("rotation needs {required} approvers, {provided} named")]
    InsufficientApprovals { required: usize, provided: usize },

    #[error("{0} may not approve this rotation")]
    PermissionDenied(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("task {task_id} is {status}")]
    InvalidTransition { task_id: String, status: TaskStatus },

    #[error("rotation task {task_id} failed: {reason}")]
    RotationFailed { task_id: String, reason: String },

    #[error("keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
