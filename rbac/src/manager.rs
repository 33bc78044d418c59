//! Sessions, role assignments, credentials and the audit trail.
//!
//! Every call that changes state or checks a permission appends exactly one
//! audit event, whatever its outcome. The state mutex is always released
//! before the audit mutex is taken.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use keyguard_crypto::{hash_password, verify_password, KdfParams};
use keyguard_types::{random_id, SharedClock, Timestamp};
use keyguard_utils::{format_duration, read_json, write_json_atomic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditQuery, AuditRecord, AuditResult, AuditSink};
use crate::{
    AuditEvent, ClientInfo, Permission, RbacError, Role, RoleAssignment, RoleDefinition, Session,
    SessionStatus,
};

const DAY_SECS: u64 = 86_400;

#[derive(Clone, Debug)]
pub struct RbacSettings {
    /// Upper bound on any session, whatever the role allows.
    pub max_session_secs: u64,
    pub audit_retention_days: u64,
    pub max_failed_logins: u32,
    pub lockout_secs: u64,
    pub credential_kdf: KdfParams,
    /// `None` keeps assignments, sessions and credentials in memory only.
    pub state_file: Option<PathBuf>,
}

impl Default for RbacSettings {
    fn default() -> Self {
        Self {
            max_session_secs: 8 * 3600,
            audit_retention_days: 90,
            max_failed_logins: 5,
            lockout_secs: 1800,
            credential_kdf: KdfParams::default(),
            state_file: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub pruned_events: usize,
    /// Failed-login records dropped because they lapsed.
    pub pruned_failures: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RbacSummary {
    pub active_assignments: usize,
    pub live_sessions: usize,
    pub users_with_credentials: usize,
    pub locked_out_users: usize,
    pub audit_events: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct LoginFailures {
    count: u32,
    locked_until: Option<Timestamp>,
    #[serde(default)]
    last_failure: Option<Timestamp>,
}

impl LoginFailures {
    /// Not locked out and quiet for a whole lockout window.
    fn lapsed(&self, lockout_secs: u64, now: Timestamp) -> bool {
        self.locked_until.map_or(true, |until| until <= now)
            && self
                .last_failure
                .map_or(true, |at| at.has_expired(lockout_secs, now))
    }
}

#[derive(Default, Serialize, Deserialize)]
struct RbacState {
    assignments: BTreeMap<String, RoleAssignment>,
    sessions: BTreeMap<String, Session>,
    /// user id -> Argon2id PHC string
    credentials: BTreeMap<String, String>,
    failures: BTreeMap<String, LoginFailures>,
}

impl RbacState {
    fn current_assignment(&self, user: &str, role: Role, now: Timestamp) -> Option<&RoleAssignment> {
        self.assignments
            .values()
            .find(|a| a.user_id == user && a.role == role && a.is_current(now))
    }
}

/// Who made a call, as far as the audit trail is concerned.
struct Caller {
    id: String,
    role: Option<Role>,
    client: ClientInfo,
}

impl Caller {
    fn user(user: &str, role: Option<Role>, client: &ClientInfo) -> Self {
        Self {
            id: user.to_string(),
            role,
            client: client.clone(),
        }
    }
}

pub struct RoleManager {
    clock: SharedClock,
    settings: RbacSettings,
    definitions: BTreeMap<Role, RoleDefinition>,
    state: Mutex<RbacState>,
    audit: Mutex<AuditLog>,
}

impl RoleManager {
    pub fn new(
        clock: SharedClock,
        settings: RbacSettings,
        sinks: Vec<Arc<dyn AuditSink>>,
    ) -> Result<Self, RbacError> {
        let state = match &settings.state_file {
            Some(path) => match read_json::<RbacState>(path) {
                Ok(state) => state,
                Err(e) if e.kind() == io::ErrorKind::NotFound => RbacState::default(),
                Err(e) => return Err(e.into()),
            },
            None => RbacState::default(),
        };
        let definitions = RoleDefinition::builtin()
            .into_iter()
            .map(|d| (d.role, d))
            .collect();
        info!(
            assignments = state.assignments.len(),
            sessions = state.sessions.len(),
            "role manager ready"
        );
        Ok(Self {
            clock,
            settings,
            definitions,
            state: Mutex::new(state),
            audit: Mutex::new(AuditLog::new(sinks)),
        })
    }

    pub fn definitions(&self) -> Vec<RoleDefinition> {
        self.definitions.values().cloned().collect()
    }

    pub fn definition(&self, role: Role) -> Option<&RoleDefinition> {
        self.definitions.get(&role)
    }

    /// Give `user` the master role. Only allowed while no assignment exists.
    pub fn bootstrap_master(&self, user: &str) -> Result<RoleAssignment, RbacError> {
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            if !state.assignments.is_empty() {
                return Err(RbacError::AlreadyBootstrapped);
            }
            let assignment = new_assignment(user, Role::Master, "bootstrap", now, None);
            state
                .assignments
                .insert(assignment.assignment_id.clone(), assignment.clone());
            self.commit(&state)?;
            info!(user, "master role bootstrapped");
            Ok(assignment)
        })();
        self.audited(
            Caller::user(user, Some(Role::Master), &ClientInfo::default()),
            "bootstrap_master",
            format!("user/{user}"),
            result,
        )
    }

    pub fn assign_role(
        &self,
        user: &str,
        role: Role,
        by_session: &str,
        expires_at: Option<Timestamp>,
    ) -> Result<RoleAssignment, RbacError> {
        let caller = self.caller(by_session);
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            let assigner = self.checked_session(&mut state, by_session, Permission::AssignRole, now)?;
            self.check_assignable(assigner.role, role)?;
            if !self.definitions.get(&role).is_some_and(|d| d.active) {
                return Err(RbacError::RoleInactive(role));
            }

            let existing = state
                .current_assignment(user, role, now)
                .map(|a| a.assignment_id.clone());
            let assignment = match existing.and_then(|id| state.assignments.get_mut(&id)) {
                Some(current) => {
                    current.expires_at = expires_at;
                    current.clone()
                }
                None => {
                    let assignment = new_assignment(user, role, &assigner.user_id, now, expires_at);
                    state
                        .assignments
                        .insert(assignment.assignment_id.clone(), assignment.clone());
                    assignment
                }
            };
            self.commit(&state)?;
            info!(user, role = %role, by = %assigner.user_id, "role assigned");
            Ok(assignment)
        })();
        self.audited(caller, "assign_role", format!("user/{user}/{role}"), result)
    }

    /// Soft-revoke `user`'s assignment of `role` and revoke their sessions
    /// under it.
    pub fn revoke_role(
        &self,
        user: &str,
        role: Role,
        by_session: &str,
        reason: &str,
    ) -> Result<(), RbacError> {
        let caller = self.caller(by_session);
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            let revoker = self.checked_session(&mut state, by_session, Permission::RevokeRole, now)?;
            self.check_assignable(revoker.role, role)?;

            let id = state
                .current_assignment(user, role, now)
                .map(|a| a.assignment_id.clone())
                .ok_or_else(|| RbacError::NoAssignment {
                    user: user.to_string(),
                    role,
                })?;
            if let Some(assignment) = state.assignments.get_mut(&id) {
                assignment.active = false;
                assignment.revoked_by = Some(revoker.user_id.clone());
                assignment.revoked_at = Some(now);
                assignment.revoke_reason = Some(reason.to_string());
            }
            let mut sessions = 0;
            for session in state.sessions.values_mut() {
                if session.user_id == user && session.role == role && session.status == SessionStatus::Active {
                    session.status = SessionStatus::Revoked;
                    sessions += 1;
                }
            }
            self.commit(&state)?;
            info!(user, role = %role, by = %revoker.user_id, sessions, "role revoked");
            Ok(())
        })();
        self.audited(caller, "revoke_role", format!("user/{user}/{role}"), result)
    }

    /// Open a session for `user` under `role`. Requires a current
    /// assignment; callers are expected to have authenticated `user`.
    pub fn create_session(
        &self,
        user: &str,
        role: Role,
        client: &ClientInfo,
    ) -> Result<Session, RbacError> {
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            let session = self.open_session(&mut state, user, role, client, now)?;
            self.commit(&state)?;
            Ok(session)
        })();
        self.audited(
            Caller::user(user, Some(role), client),
            "create_session",
            format!("user/{user}/{role}"),
            result,
        )
    }

    pub fn set_credential(&self, user: &str, password: &str) -> Result<(), RbacError> {
        let result = (|| -> Result<_, RbacError> {
            let phc = hash_password(password, &self.settings.credential_kdf)?;
            let mut state = self.state.lock();
            state.credentials.insert(user.to_string(), phc);
            state.failures.remove(user);
            self.commit(&state)?;
            debug!(user, "credential stored");
            Ok(())
        })();
        self.audited(
            Caller::user(user, None, &ClientInfo::default()),
            "set_credential",
            format!("user/{user}"),
            result,
        )
    }

    /// Check `password` and open a session under `role`. Consecutive
    /// failures lock the user out for `lockout_secs`.
    pub fn authenticate(
        &self,
        user: &str,
        password: &str,
        role: Role,
        client: &ClientInfo,
    ) -> Result<Session, RbacError> {
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let phc = {
                let state = self.state.lock();
                if let Some(until) = state.failures.get(user).and_then(|f| f.locked_until) {
                    if until > now {
                        return Err(RbacError::LockedOut {
                            retry_after_secs: until.secs_until(now),
                        });
                    }
                }
                state.credentials.get(user).cloned()
            };

            let valid = phc.is_some_and(|phc| verify_password(password, &phc));
            let mut state = self.state.lock();
            if !valid {
                let failures = state.failures.entry(user.to_string()).or_default();
                if failures.locked_until.is_some_and(|until| until <= now) {
                    *failures = LoginFailures::default();
                }
                failures.count += 1;
                failures.last_failure = Some(now);
                if failures.count >= self.settings.max_failed_logins {
                    failures.count = 0;
                    failures.locked_until = Some(now.plus_secs(self.settings.lockout_secs));
                    warn!(
                        user,
                        lockout = %format_duration(self.settings.lockout_secs),
                        "user locked out after failed logins"
                    );
                }
                self.commit(&state)?;
                return Err(RbacError::InvalidCredentials);
            }

            state.failures.remove(user);
            let session = self.open_session(&mut state, user, role, client, now)?;
            self.commit(&state)?;
            Ok(session)
        })();
        self.audited(
            Caller::user(user, Some(role), client),
            "authenticate",
            format!("user/{user}/{role}"),
            result,
        )
    }

    /// Whether the session may use `permission`. Expired sessions are
    /// marked as such on the way.
    pub fn check_permission(&self, session_id: &str, permission: Permission) -> bool {
        self.authorize(session_id, permission).is_ok()
    }

    pub fn authorize(&self, session_id: &str, permission: Permission) -> Result<Session, RbacError> {
        self.authorize_on(session_id, permission, permission.as_str())
    }

    /// Like [`authorize`](Self::authorize), recording `resource` as what the
    /// permission was checked against.
    pub fn authorize_on(
        &self,
        session_id: &str,
        permission: Permission,
        resource: &str,
    ) -> Result<Session, RbacError> {
        let caller = self.caller(session_id);
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            let session = self.checked_session(&mut state, session_id, permission, now)?;
            if let Some(live) = state.sessions.get_mut(session_id) {
                live.last_activity = now;
            }
            Ok(session)
        })();
        self.audited(
            caller,
            "check_permission",
            format!("{resource} ({permission})"),
            result,
        )
    }

    /// End a session. Revoking a revoked session succeeds. Sessions of other
    /// users need [`Permission::RevokeRole`].
    pub fn revoke_session(&self, session_id: &str, by_session: &str, reason: &str) -> Result<(), RbacError> {
        let caller = self.caller(by_session);
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            let target_user = match state.sessions.get(session_id) {
                None => return Err(RbacError::SessionNotFound(session_id.to_string())),
                Some(s) if s.status == SessionStatus::Revoked => return Ok(()),
                Some(s) => s.user_id.clone(),
            };
            if by_session != session_id {
                let by = self.live_session(&mut state, by_session, now)?.clone();
                if by.user_id != target_user && !by.allows(Permission::RevokeRole) {
                    return Err(RbacError::PermissionDenied {
                        role: by.role,
                        permission: Permission::RevokeRole,
                    });
                }
            }
            if let Some(session) = state.sessions.get_mut(session_id) {
                session.status = SessionStatus::Revoked;
            }
            self.commit(&state)?;
            info!(session = %session_id, user = %target_user, reason, "session revoked");
            Ok(())
        })();
        self.audited(caller, "revoke_session", format!("session/{session_id}"), result)
    }

    pub fn suspend_session(&self, session_id: &str, by_session: &str) -> Result<(), RbacError> {
        let caller = self.caller(by_session);
        let result = (|| -> Result<_, RbacError> {
            let now = self.clock.now();
            let mut state = self.state.lock();
            self.checked_session(&mut state, by_session, Permission::RevokeRole, now)?;
            let session = self.live_session(&mut state, session_id, now)?;
            session.status = SessionStatus::Suspended;
            self.commit(&state)?;
            info!(session = %session_id, "session suspended");
            Ok(())
        })();
        self.audited(caller, "suspend_session", format!("session/{session_id}"), result)
    }

    /// Current assignments of `user`.
    pub fn user_roles(&self, user: &str) -> Vec<RoleAssignment> {
        let now = self.clock.now();
        self.state
            .lock()
            .assignments
            .values()
            .filter(|a| a.user_id == user && a.is_current(now))
            .cloned()
            .collect()
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        let now = self.clock.now();
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_live(now))
            .cloned()
            .collect()
    }

    /// Expire overdue sessions, forget long-dead ones and prune audit
    /// events past the retention window.
    pub fn sweep(&self) -> Result<SweepReport, RbacError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        {
            let mut state = self.state.lock();
            for session in state.sessions.values_mut() {
                if session.status == SessionStatus::Active && now >= session.expires_at {
                    session.status = SessionStatus::Expired;
                    report.expired_sessions += 1;
                }
            }
            let horizon = self.settings.max_session_secs;
            let before = state.sessions.len();
            state
                .sessions
                .retain(|_, s| s.status == SessionStatus::Active || !s.expires_at.has_expired(horizon, now));
            let lockout = self.settings.lockout_secs;
            let failures_before = state.failures.len();
            state.failures.retain(|_, f| !f.lapsed(lockout, now));
            report.pruned_failures = failures_before - state.failures.len();
            if report.expired_sessions > 0
                || report.pruned_failures > 0
                || state.sessions.len() != before
            {
                self.commit(&state)?;
            }
        }

        let cutoff = now.minus_secs(self.settings.audit_retention_days * DAY_SECS);
        report.pruned_events = self.audit.lock().prune_before(cutoff);
        if report.expired_sessions > 0 || report.pruned_events > 0 || report.pruned_failures > 0 {
            info!(
                expired_sessions = report.expired_sessions,
                pruned_events = report.pruned_events,
                pruned_failures = report.pruned_failures,
                "rbac sweep"
            );
        }
        Ok(report)
    }

    /// Audit events matching `query`, newest first.
    pub fn get_audit_log(&self, session_id: &str, query: &AuditQuery) -> Result<Vec<AuditEvent>, RbacError> {
        let caller = self.caller(session_id);
        let result = self
            .gate(session_id, Permission::ViewAuditLog)
            .map(|_| self.audit.lock().query(query));
        self.audited(caller, "get_audit_log", "audit".to_string(), result)
    }

    /// Write matching events to `out` as JSON lines, oldest first.
    pub fn export_audit_log<W: Write>(
        &self,
        session_id: &str,
        query: &AuditQuery,
        out: W,
    ) -> Result<usize, RbacError> {
        let caller = self.caller(session_id);
        let result = self.gate(session_id, Permission::ExportAuditLog).and_then(|_| {
            self.audit
                .lock()
                .export_json_lines(query, out)
                .map_err(RbacError::from)
        });
        self.audited(caller, "export_audit_log", "audit".to_string(), result)
    }

    /// Check the audit hash chain. Returns the number of events verified.
    pub fn verify_audit_chain(&self) -> Result<usize, RbacError> {
        self.audit.lock().verify()
    }

    pub fn status(&self) -> RbacSummary {
        let now = self.clock.now();
        let audit_events = self.audit.lock().len();
        let state = self.state.lock();
        RbacSummary {
            active_assignments: state.assignments.values().filter(|a| a.is_current(now)).count(),
            live_sessions: state.sessions.values().filter(|s| s.is_live(now)).count(),
            users_with_credentials: state.credentials.len(),
            locked_out_users: state
                .failures
                .values()
                .filter(|f| f.locked_until.is_some_and(|until| until > now))
                .count(),
            audit_events,
        }
    }

    fn gate(&self, session_id: &str, permission: Permission) -> Result<Session, RbacError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.checked_session(&mut state, session_id, permission, now)
    }

    fn open_session(
        &self,
        state: &mut RbacState,
        user: &str,
        role: Role,
        client: &ClientInfo,
        now: Timestamp,
    ) -> Result<Session, RbacError> {
        let definition = self
            .definitions
            .get(&role)
            .filter(|d| d.active)
            .ok_or(RbacError::RoleInactive(role))?;
        let assignment = state
            .current_assignment(user, role, now)
            .ok_or_else(|| RbacError::NoAssignment {
                user: user.to_string(),
                role,
            })?;

        let lifetime = definition.max_session_secs.min(self.settings.max_session_secs);
        let mut expires_at = now.plus_secs(lifetime);
        if let Some(until) = assignment.expires_at {
            expires_at = expires_at.min(until);
        }
        let session = Session {
            session_id: random_id(),
            user_id: user.to_string(),
            role,
            permissions: definition.permissions.clone(),
            access_level: definition.access_level,
            created_at: now,
            expires_at,
            last_activity: now,
            status: SessionStatus::Active,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        };
        state.sessions.insert(session.session_id.clone(), session.clone());
        info!(user, role = %role, session = %session.session_id, "session created");
        Ok(session)
    }

    /// The session, if it is live. An active session past its deadline is
    /// flipped to `Expired` here.
    fn live_session<'a>(
        &self,
        state: &'a mut RbacState,
        session_id: &str,
        now: Timestamp,
    ) -> Result<&'a mut Session, RbacError> {
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RbacError::SessionNotFound(session_id.to_string()))?;
        match session.status {
            SessionStatus::Active if now >= session.expires_at => {
                session.status = SessionStatus::Expired;
                debug!(session = %session_id, "session expired");
                Err(RbacError::SessionExpired(session_id.to_string()))
            }
            SessionStatus::Active => Ok(session),
            SessionStatus::Expired => Err(RbacError::SessionExpired(session_id.to_string())),
            SessionStatus::Revoked => Err(RbacError::SessionRevoked(session_id.to_string())),
            SessionStatus::Suspended => Err(RbacError::SessionSuspended(session_id.to_string())),
        }
    }

    fn checked_session(
        &self,
        state: &mut RbacState,
        session_id: &str,
        permission: Permission,
        now: Timestamp,
    ) -> Result<Session, RbacError> {
        let session = self.live_session(state, session_id, now)?;
        if !session.allows(permission) {
            return Err(RbacError::PermissionDenied {
                role: session.role,
                permission,
            });
        }
        Ok(session.clone())
    }

    fn check_assignable(&self, by: Role, role: Role) -> Result<(), RbacError> {
        match self.definitions.get(&by) {
            Some(d) if d.can_assign(role) => Ok(()),
            _ => Err(RbacError::RoleNotAssignable { role, by }),
        }
    }

    fn caller(&self, session_id: &str) -> Caller {
        match self.state.lock().sessions.get(session_id) {
            Some(s) => Caller {
                id: s.user_id.clone(),
                role: Some(s.role),
                client: ClientInfo {
                    ip_address: s.ip_address.clone(),
                    user_agent: s.user_agent.clone(),
                },
            },
            None => Caller {
                id: format!("session:{session_id}"),
                role: None,
                client: ClientInfo::default(),
            },
        }
    }

    fn audited<T>(
        &self,
        caller: Caller,
        action: &str,
        resource: String,
        result: Result<T, RbacError>,
    ) -> Result<T, RbacError> {
        let (outcome, detail) = match &result {
            Ok(_) => (AuditResult::Success, String::new()),
            Err(e) if e.is_denial() => (AuditResult::Denied, e.to_string()),
            Err(e) => (AuditResult::Failure, e.to_string()),
        };
        if outcome == AuditResult::Failure {
            warn!(actor = %caller.id, action, error = %detail, "rbac call failed");
        }
        let record = AuditRecord {
            actor: caller.id,
            role: caller.role,
            action: action.to_string(),
            resource,
            result: outcome,
            detail,
            client: caller.client,
        };
        self.audit.lock().append(record, self.clock.now());
        result
    }

    fn commit(&self, state: &RbacState) -> Result<(), RbacError> {
        if let Some(path) = &self.settings.state_file {
            write_json_atomic(path, state)?;
        }
        Ok(())
    }
}

fn new_assignment(
    user: &str,
    role: Role,
    by: &str,
    now: Timestamp,
    expires_at: Option<Timestamp>,
) -> RoleAssignment {
    RoleAssignment {
        assignment_id: random_id(),
        user_id: user.to_string(),
        role,
        assigned_by: by.to_string(),
        assigned_at: now,
        expires_at,
        active: true,
        revoked_by: None,
        revoked_at: None,
        revoke_reason: None,
    }
}
