use keyguard_crypto::CryptoError;
use thiserror::Error;

use crate::{Permission, Role};

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("session revoked: {0}")]
    SessionRevoked(String),

    #[error("session suspended: {0}")]
    SessionSuspended(String),

    #[error("{role} lacks permission {permission}")]
    PermissionDenied { role: Role, permission: Permission },

    #[error("{by} may not assign or revoke the {role} role")]
    RoleNotAssignable { role: Role, by: Role },

    #[error("{user} has no active {role} assignment")]
    NoAssignment { user: String, role: Role },

    #[error("role {0} is disabled")]
    RoleInactive(Role),

    #[error("role assignments already exist")]
    AlreadyBootstrapped,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("too many failed logins, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error("audit chain broken at event {0}")]
    AuditChainBroken(u64),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RbacError {
    /// Whether this error is an authorization refusal rather than a fault.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::SessionExpired(_)
                | Self::SessionRevoked(_)
                | Self::SessionSuspended(_)
                | Self::PermissionDenied { .. }
                | Self::RoleNotAssignable { .. }
                | Self::NoAssignment { .. }
                | Self::RoleInactive(_)
                | Self::AlreadyBootstrapped
                | Self::InvalidCredentials
                | Self::LockedOut { .. }
        )
    }
}
