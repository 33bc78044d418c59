//! Role-based access control.
//!
//! [`RoleManager`] is the gate in front of every custody operation: callers
//! authenticate to get a [`Session`] under one role, and each later call is
//! checked against that session's permission set. Every check and every
//! state change lands in a hash-chained audit log.

pub mod audit;
pub mod error;
pub mod manager;
pub mod roles;
pub mod session;

pub use audit::{
    AuditEvent, AuditLog, AuditQuery, AuditRecord, AuditResult, AuditSink, JsonLinesAuditSink,
    TracingAuditSink,
};
pub use error::RbacError;
pub use manager::{RbacSettings, RbacSummary, RoleManager, SweepReport};
pub use roles::{AccessLevel, Permission, Role, RoleDefinition};
pub use session::{ClientInfo, RoleAssignment, Session, SessionStatus};
