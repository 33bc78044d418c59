//! Key rotation lifecycle.
//!
//! Keys are registered under a rotation policy. A rotation runs as a task
//! that may have to collect approvals before the backing store replaces the
//! key; completed rotations can be rolled back while they are still the
//! latest for their key.

pub mod backend;
pub mod error;
pub mod manager;
pub mod notify;
pub mod policy;
pub mod task;

pub use backend::KeyBackend;
pub use error::RotationError;
pub use manager::{
    AutoRotateReport, HistoryEntry, KeyRotationManager, KeyRotationStatus, ManagedKey,
    RotationSettings, RotationSummary,
};
pub use notify::RotationListener;
pub use policy::{
    RotationPolicy, COMPLIANCE_POLICY, DAY_SECS, DEFAULT_POLICY, HIGH_SECURITY_POLICY,
};
pub use task::{
    RollbackSnapshot, RotationEvent, RotationEventKind, RotationTask, RotationTrigger, TaskStatus,
};
