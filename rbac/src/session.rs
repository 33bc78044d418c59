//! Role assignments and the sessions opened under them.

use std::collections::BTreeSet;

use keyguard_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{AccessLevel, Permission, Role};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub assignment_id: String,
    pub user_id: String,
    pub role: Role,
    pub assigned_by: String,
    pub assigned_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub active: bool,
    pub revoked_by: Option<String>,
    pub revoked_at: Option<Timestamp>,
    pub revoke_reason: Option<String>,
}

impl RoleAssignment {
    /// Active and not past its expiry.
    pub fn is_current(&self, now: Timestamp) -> bool {
        self.active && self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
    Suspended,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    /// Resolved at creation; later changes to the role do not widen it.
    pub permissions: BTreeSet<Permission>,
    pub access_level: AccessLevel,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_activity: Timestamp,
    pub status: SessionStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_live(&self, now: Timestamp) -> bool {
        self.status == SessionStatus::Active && now < self.expires_at
    }
}

/// Where a session comes from, for the audit trail.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        }
    }
}
