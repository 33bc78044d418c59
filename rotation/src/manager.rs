//! Rotation scheduling, approval gating and rollback.
//!
//! All state sits behind one mutex, held for the whole of an operation
//! including the backing store call. Two rotations of the same key can
//! therefore never interleave, and a task is never observed half-applied.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use keyguard_types::{random_id, KeyStatus, SharedClock, Timestamp};
use keyguard_utils::{read_json, write_json_atomic};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::notify::Listeners;
use crate::policy::DEFAULT_POLICY;
use crate::{
    KeyBackend, RollbackSnapshot, RotationError, RotationEvent, RotationEventKind, RotationPolicy,
    RotationTask, RotationTrigger, TaskStatus,
};

#[derive(Clone, Debug)]
pub struct RotationSettings {
    pub event_capacity: usize,
    /// Where to keep policies, managed keys and tasks across restarts.
    /// `None` keeps everything in memory.
    pub state_file: Option<PathBuf>,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            event_capacity: 10_000,
            state_file: None,
        }
    }
}

/// A key under rotation management. `key_id` is the id it was registered
/// with; `active_key_id` follows it through rotations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedKey {
    pub key_id: String,
    pub active_key_id: String,
    pub policy_id: String,
    pub registered_at: Timestamp,
    pub last_rotation: Option<Timestamp>,
    pub next_rotation: Timestamp,
    pub rotation_count: u32,
    /// Predecessor key ids, oldest first.
    pub history: VecDeque<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct KeyRotationStatus {
    pub key: ManagedKey,
    pub key_status: KeyStatus,
    pub active_task: Option<RotationTask>,
    pub due: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub key_id: String,
    /// `None` when the store no longer has the key.
    pub status: Option<KeyStatus>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AutoRotateReport {
    /// `(key_id, task_id)` of rotations that ran.
    pub rotated: Vec<(String, String)>,
    /// Due keys whose policy wants approvals or has auto-rotation off.
    pub needs_attention: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RotationSummary {
    pub policies: usize,
    pub managed_keys: usize,
    pub open_tasks: usize,
    pub due: usize,
    pub events: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct RotationState {
    policies: BTreeMap<String, RotationPolicy>,
    keys: BTreeMap<String, ManagedKey>,
    tasks: BTreeMap<String, RotationTask>,
    events: VecDeque<RotationEvent>,
    /// Events recorded under the current lock, handed to listeners on
    /// release.
    #[serde(skip)]
    outbox: Vec<RotationEvent>,
}

impl RotationState {
    fn policy_for(&self, key: &ManagedKey) -> Result<&RotationPolicy, RotationError> {
        self.policies
            .get(&key.policy_id)
            .ok_or_else(|| RotationError::PolicyNotFound(key.policy_id.clone()))
    }

    fn open_task(&self, key_id: &str) -> Option<&RotationTask> {
        self.tasks
            .values()
            .find(|t| t.key_id == key_id && t.status.is_open())
    }

    fn is_due(&self, key: &ManagedKey, now: Timestamp) -> bool {
        now >= key.next_rotation && self.open_task(&key.key_id).is_none()
    }
}

pub struct KeyRotationManager {
    backend: Arc<dyn KeyBackend>,
    clock: SharedClock,
    settings: RotationSettings,
    state: Mutex<RotationState>,
    listeners: Listeners,
}

impl KeyRotationManager {
    /// Build a manager, restoring saved state when a state file is
    /// configured. Tasks that were mid-flight at shutdown are failed.
    pub fn new(
        backend: Arc<dyn KeyBackend>,
        clock: SharedClock,
        settings: RotationSettings,
    ) -> Result<Self, RotationError> {
        let now = clock.now();
        let mut state = match &settings.state_file {
            Some(path) => match read_json::<RotationState>(path) {
                Ok(state) => state,
                Err(e) if e.kind() == io::ErrorKind::NotFound => RotationState::default(),
                Err(e) => return Err(e.into()),
            },
            None => RotationState::default(),
        };
        for policy in RotationPolicy::builtin(now) {
            state.policies.entry(policy.policy_id.clone()).or_insert(policy);
        }
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                warn!(task = %task.task_id, key_id = %task.key_id, "rotation interrupted by restart");
                task.status = TaskStatus::Failed;
                task.error = Some("interrupted by restart".into());
                task.completed_at = Some(now);
            }
        }
        let manager = Self {
            backend,
            clock,
            settings,
            state: Mutex::new(state),
            listeners: Listeners::default(),
        };
        {
            let state = manager.state.lock();
            manager.commit(&state)?;
        }
        Ok(manager)
    }

    pub fn create_policy(
        &self,
        mut policy: RotationPolicy,
        created_by: &str,
    ) -> Result<(), RotationError> {
        policy.validate()?;
        let mut state = self.state.lock();
        if state.policies.contains_key(&policy.policy_id) {
            return Err(RotationError::PolicyExists(policy.policy_id));
        }
        let now = self.clock.now();
        policy.created_at = now;
        let policy_id = policy.policy_id.clone();
        state.policies.insert(policy_id.clone(), policy);
        self.event(
            &mut state,
            RotationEventKind::PolicyCreated,
            None,
            None,
            Some(created_by),
            format!("created rotation policy {policy_id}"),
        );
        info!(policy = %policy_id, by = created_by, "rotation policy created");
        let committed = self.commit(&state);
        self.release(state);
        committed
    }

    pub fn policy(&self, policy_id: &str) -> Option<RotationPolicy> {
        self.state.lock().policies.get(policy_id).cloned()
    }

    pub fn policies(&self) -> Vec<RotationPolicy> {
        self.state.lock().policies.values().cloned().collect()
    }

    /// Called for every task lifecycle event: initiated, started,
    /// completed, failed, cancelled and rolled back.
    pub fn add_rotation_listener(&self, listener: impl Fn(&RotationEvent) + Send + Sync + 'static) {
        self.listeners.add_rotation(Box::new(listener));
    }

    /// Called once per recorded approval. Repeat approvals are not events.
    pub fn add_approval_listener(&self, listener: impl Fn(&RotationEvent) + Send + Sync + 'static) {
        self.listeners.add_approval(Box::new(listener));
    }

    /// Called when an execution finishes, completed or failed.
    pub fn add_completion_listener(&self, listener: impl Fn(&RotationEvent) + Send + Sync + 'static) {
        self.listeners.add_completion(Box::new(listener));
    }

    /// Put a store key under management. Without a policy it gets
    /// [`DEFAULT_POLICY`].
    pub fn register_key(
        &self,
        key_id: &str,
        policy_id: Option<&str>,
    ) -> Result<ManagedKey, RotationError> {
        let policy_id = policy_id.unwrap_or(DEFAULT_POLICY);
        self.backend.key_status(key_id)?;
        let mut state = self.state.lock();
        if state.keys.contains_key(key_id) {
            return Err(RotationError::KeyAlreadyManaged(key_id.to_string()));
        }
        let interval = state
            .policies
            .get(policy_id)
            .ok_or_else(|| RotationError::PolicyNotFound(policy_id.to_string()))?
            .interval_secs();
        let now = self.clock.now();
        let key = ManagedKey {
            key_id: key_id.to_string(),
            active_key_id: key_id.to_string(),
            policy_id: policy_id.to_string(),
            registered_at: now,
            last_rotation: None,
            next_rotation: now.plus_secs(interval),
            rotation_count: 0,
            history: VecDeque::new(),
        };
        state.keys.insert(key_id.to_string(), key.clone());
        self.event(
            &mut state,
            RotationEventKind::KeyRegistered,
            Some(key_id),
            None,
            None,
            format!("registered under policy {policy_id}"),
        );
        let committed = self.commit(&state);
        self.release(state);
        committed?;
        Ok(key)
    }

    /// Move a key to another policy and restart its schedule from now.
    pub fn assign_policy(
        &self,
        key_id: &str,
        policy_id: &str,
        assigned_by: &str,
    ) -> Result<(), RotationError> {
        let mut state = self.state.lock();
        let interval = state
            .policies
            .get(policy_id)
            .ok_or_else(|| RotationError::PolicyNotFound(policy_id.to_string()))?
            .interval_secs();
        let now = self.clock.now();
        let key = state
            .keys
            .get_mut(key_id)
            .ok_or_else(|| RotationError::KeyNotFound(key_id.to_string()))?;
        key.policy_id = policy_id.to_string();
        key.next_rotation = now.plus_secs(interval);
        self.event(
            &mut state,
            RotationEventKind::PolicyAssigned,
            Some(key_id),
            None,
            Some(assigned_by),
            format!("assigned policy {policy_id}"),
        );
        info!(key_id, policy = policy_id, by = assigned_by, "rotation policy assigned");
        let committed = self.commit(&state);
        self.release(state);
        committed
    }

    /// Open a rotation task. Without required approvals it runs at once;
    /// otherwise it waits in `Pending` for [`approve`](Self::approve).
    pub fn rotate(
        &self,
        key_id: &str,
        trigger: RotationTrigger,
        initiated_by: &str,
        approvers: &[String],
    ) -> Result<String, RotationError> {
        let mut state = self.state.lock();
        let key = state
            .keys
            .get(key_id)
            .ok_or_else(|| RotationError::KeyNotFound(key_id.to_string()))?;
        if let Some(task) = state.open_task(key_id) {
            return Err(RotationError::RotationInProgress {
                key_id: key_id.to_string(),
                task_id: task.task_id.clone(),
            });
        }
        let policy = state.policy_for(key)?;

        let distinct: BTreeSet<&String> = approvers.iter().collect();
        if distinct.len() != approvers.len() {
            return Err(RotationError::PolicyViolation("approvers must be distinct".into()));
        }
        if !policy.approvers.is_empty() {
            if let Some(outsider) = approvers.iter().find(|a| !policy.approvers.contains(a)) {
                return Err(RotationError::PermissionDenied(outsider.clone()));
            }
        }
        let required = policy.required_approvals();
        if approvers.len() < required {
            return Err(RotationError::InsufficientApprovals {
                required,
                provided: approvers.len(),
            });
        }

        let now = self.clock.now();
        let task = RotationTask {
            task_id: random_id(),
            key_id: key_id.to_string(),
            trigger,
            status: TaskStatus::Pending,
            initiated_by: initiated_by.to_string(),
            old_key_id: key.active_key_id.clone(),
            new_key_id: None,
            approvers: approvers.to_vec(),
            approvals: BTreeSet::new(),
            required_approvals: required,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            rollback: None,
        };
        let task_id = task.task_id.clone();
        state.tasks.insert(task_id.clone(), task);
        self.event(
            &mut state,
            RotationEventKind::RotationInitiated,
            Some(key_id),
            Some(&task_id),
            Some(initiated_by),
            format!("{trigger:?} rotation initiated, {required} approvals required"),
        );
        info!(key_id, task = %task_id, ?trigger, by = initiated_by, required, "rotation initiated");

        let outcome = if required == 0 {
            self.execute(&mut state, &task_id)
        } else {
            Ok(())
        };
        let committed = self.commit(&state);
        self.release(state);
        committed?;
        outcome.map(|()| task_id)
    }

    /// Record an approval. The task runs as soon as it has enough distinct
    /// approvals. Approving twice changes nothing.
    pub fn approve(&self, task_id: &str, approver: &str) -> Result<TaskStatus, RotationError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| RotationError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(RotationError::InvalidTransition {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }
        if !task.approvers.iter().any(|a| a == approver) {
            warn!(task = task_id, approver, "approval from a non-designated approver");
            return Err(RotationError::PermissionDenied(approver.to_string()));
        }
        if !task.approvals.insert(approver.to_string()) {
            return Ok(task.status);
        }
        let ready = task.approvals.len() >= task.required_approvals;
        let key_id = task.key_id.clone();
        let collected = task.approvals.len();
        self.event(
            &mut state,
            RotationEventKind::RotationApproved,
            Some(&key_id),
            Some(task_id),
            Some(approver),
            format!("approval {collected} recorded"),
        );
        info!(task = task_id, approver, collected, "rotation approved");

        let outcome = if ready {
            self.execute(&mut state, task_id)
        } else {
            Ok(())
        };
        let committed = self.commit(&state);
        let status = state
            .tasks
            .get(task_id)
            .map_or(TaskStatus::Pending, |t| t.status);
        self.release(state);
        committed?;
        outcome?;
        Ok(status)
    }

    pub fn cancel(&self, task_id: &str, cancelled_by: &str, reason: &str) -> Result<(), RotationError> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| RotationError::TaskNotFound(task_id.to_string()))?;
        if !task.status.is_open() {
            return Err(RotationError::InvalidTransition {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        task.error = Some(format!("cancelled by {cancelled_by}: {reason}"));
        let key_id = task.key_id.clone();
        self.event(
            &mut state,
            RotationEventKind::RotationCancelled,
            Some(&key_id),
            Some(task_id),
            Some(cancelled_by),
            reason.to_string(),
        );
        info!(task = task_id, by = cancelled_by, reason, "rotation cancelled");
        let committed = self.commit(&state);
        self.release(state);
        committed
    }

    /// Undo a completed rotation: the predecessor becomes active again and
    /// the successor is archived. Only the latest rotation of a key can be
    /// rolled back.
    pub fn rollback(
        &self,
        task_id: &str,
        rolled_back_by: &str,
        reason: &str,
    ) -> Result<(), RotationError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| RotationError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Completed {
            return Err(RotationError::InvalidTransition {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }
        let snapshot = task
            .rollback
            .clone()
            .ok_or_else(|| RotationError::PolicyViolation("task has no rollback snapshot".into()))?;
        let key_id = task.key_id.clone();
        let active = state
            .keys
            .get(&key_id)
            .map(|k| k.active_key_id.clone())
            .ok_or_else(|| RotationError::KeyNotFound(key_id.clone()))?;
        if active != snapshot.new_key_id {
            return Err(RotationError::PolicyViolation(
                "key has been rotated again since this task".into(),
            ));
        }

        self.backend
            .set_key_status(&snapshot.old_key_id, KeyStatus::Active)?;
        if let Err(e) = self
            .backend
            .set_key_status(&snapshot.new_key_id, KeyStatus::Archived)
        {
            if let Err(undo) = self
                .backend
                .set_key_status(&snapshot.old_key_id, KeyStatus::Archived)
            {
                error!(key_id = %snapshot.old_key_id, error = %undo, "failed to undo partial rollback");
            }
            return Err(e.into());
        }

        let now = self.clock.now();
        if let Some(key) = state.keys.get_mut(&key_id) {
            key.active_key_id = snapshot.old_key_id.clone();
            if key.history.back() == Some(&snapshot.old_key_id) {
                key.history.pop_back();
            }
            key.last_rotation = snapshot.last_rotation;
            key.next_rotation = snapshot.next_rotation;
            key.rotation_count = key.rotation_count.saturating_sub(1);
        }
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.status = TaskStatus::RolledBack;
            task.completed_at = Some(now);
            task.error = Some(format!("rolled back by {rolled_back_by}: {reason}"));
        }
        self.event(
            &mut state,
            RotationEventKind::RotationRolledBack,
            Some(&key_id),
            Some(task_id),
            Some(rolled_back_by),
            reason.to_string(),
        );
        info!(task = task_id, key_id = %key_id, by = rolled_back_by, "rotation rolled back");
        let committed = self.commit(&state);
        self.release(state);
        committed
    }

    /// Managed keys past their due date with no open task.
    pub fn due_for_rotation(&self) -> Vec<String> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .keys
            .values()
            .filter(|k| state.is_due(k, now))
            .map(|k| k.key_id.clone())
            .collect()
    }

    /// Keys inside their policy's warning window but not yet due.
    pub fn keys_in_warning_window(&self) -> Vec<String> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .keys
            .values()
            .filter(|k| {
                let warning = state.policy_for(k).map_or(0, |p| p.warning_secs());
                now < k.next_rotation && now >= k.next_rotation.minus_secs(warning)
            })
            .map(|k| k.key_id.clone())
            .collect()
    }

    /// Rotate every due key whose policy allows unattended rotation.
    pub fn auto_rotate_due(&self, initiated_by: &str) -> AutoRotateReport {
        let mut report = AutoRotateReport::default();
        for key_id in self.due_for_rotation() {
            let unattended = {
                let state = self.state.lock();
                state
                    .keys
                    .get(&key_id)
                    .and_then(|k| state.policy_for(k).ok())
                    .is_some_and(|p| p.auto_rotate && p.required_approvals() == 0)
            };
            if !unattended {
                report.needs_attention.push(key_id);
                continue;
            }
            match self.rotate(&key_id, RotationTrigger::Automatic, initiated_by, &[]) {
                Ok(task_id) => report.rotated.push((key_id, task_id)),
                Err(e) => {
                    warn!(key_id = %key_id, error = %e, "scheduled rotation failed");
                    report.failed.push((key_id, e.to_string()));
                }
            }
        }
        if !report.needs_attention.is_empty() {
            warn!(keys = report.needs_attention.len(), "due keys need a manual rotation");
        }
        report
    }

    pub fn status(&self, key_id: &str) -> Result<KeyRotationStatus, RotationError> {
        let now = self.clock.now();
        let (key, active_task, due) = {
            let state = self.state.lock();
            let key = state
                .keys
                .get(key_id)
                .ok_or_else(|| RotationError::KeyNotFound(key_id.to_string()))?;
            (key.clone(), state.open_task(key_id).cloned(), state.is_due(key, now))
        };
        let key_status = self.backend.key_status(&key.active_key_id)?;
        Ok(KeyRotationStatus {
            key,
            key_status,
            active_task,
            due,
        })
    }

    /// Predecessors of a key, newest first.
    pub fn history(&self, key_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, RotationError> {
        let ids: Vec<String> = {
            let state = self.state.lock();
            let key = state
                .keys
                .get(key_id)
                .ok_or_else(|| RotationError::KeyNotFound(key_id.to_string()))?;
            key.history.iter().rev().take(limit).cloned().collect()
        };
        Ok(ids
            .into_iter()
            .map(|id| HistoryEntry {
                status: self.backend.key_status(&id).ok(),
                key_id: id,
            })
            .collect())
    }

    pub fn task(&self, task_id: &str) -> Option<RotationTask> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    /// Tasks for a key, newest first.
    pub fn tasks_for(&self, key_id: &str) -> Vec<RotationTask> {
        let state = self.state.lock();
        let mut tasks: Vec<RotationTask> = state
            .tasks
            .values()
            .filter(|t| t.key_id == key_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Most recent events first.
    pub fn events(&self, limit: usize) -> Vec<RotationEvent> {
        self.state
            .lock()
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn managed_keys(&self) -> Vec<ManagedKey> {
        self.state.lock().keys.values().cloned().collect()
    }

    /// Drop finished tasks older than `retention_secs`. Returns how many
    /// were removed.
    pub fn cleanup_tasks(&self, retention_secs: u64) -> Result<usize, RotationError> {
        let cutoff = self.clock.now().minus_secs(retention_secs);
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|_, t| {
            t.status.is_open() || t.completed_at.map_or(true, |done| done > cutoff)
        });
        let removed = before - state.tasks.len();
        if removed > 0 {
            info!(removed, "finished rotation tasks pruned");
            self.commit(&state)?;
        }
        Ok(removed)
    }

    pub fn summary(&self) -> RotationSummary {
        let now = self.clock.now();
        let state = self.state.lock();
        RotationSummary {
            policies: state.policies.len(),
            managed_keys: state.keys.len(),
            open_tasks: state.tasks.values().filter(|t| t.status.is_open()).count(),
            due: state.keys.values().filter(|k| state.is_due(k, now)).count(),
            events: state.events.len(),
        }
    }

    /// Run a pending task against the store.
    fn execute(&self, state: &mut RotationState, task_id: &str) -> Result<(), RotationError> {
        let now = self.clock.now();
        let (key_id, old_key_id) = {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| RotationError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            (task.key_id.clone(), task.old_key_id.clone())
        };
        self.event(
            state,
            RotationEventKind::RotationStarted,
            Some(&key_id),
            Some(task_id),
            None,
            "rotation started".into(),
        );

        let old_status = self.backend.key_status(&old_key_id);
        let rotated = old_status
            .as_ref()
            .map_err(|e| e.to_string())
            .and_then(|_| self.backend.rotate_key(&old_key_id).map_err(|e| e.to_string()));

        let new_key_id = match rotated {
            Ok(new_key_id) => new_key_id,
            Err(reason) => {
                self.restore_status(&old_key_id, old_status.ok());
                if let Some(task) = state.tasks.get_mut(task_id) {
                    task.status = TaskStatus::Failed;
                    task.error = Some(reason.clone());
                    task.completed_at = Some(now);
                }
                self.event(
                    state,
                    RotationEventKind::RotationFailed,
                    Some(&key_id),
                    Some(task_id),
                    None,
                    reason.clone(),
                );
                error!(task = task_id, key_id = %key_id, reason = %reason, "rotation failed");
                return Err(RotationError::RotationFailed {
                    task_id: task_id.to_string(),
                    reason,
                });
            }
        };
        let old_status = old_status.unwrap_or(KeyStatus::Active);

        let (interval, max_history) = {
            let key = state
                .keys
                .get(&key_id)
                .ok_or_else(|| RotationError::KeyNotFound(key_id.clone()))?;
            let policy = state.policy_for(key)?;
            (policy.interval_secs(), policy.max_history)
        };
        let mut dropped = Vec::new();
        let snapshot = {
            let key = state
                .keys
                .get_mut(&key_id)
                .ok_or_else(|| RotationError::KeyNotFound(key_id.clone()))?;
            let snapshot = RollbackSnapshot {
                old_key_id: old_key_id.clone(),
                old_status,
                new_key_id: new_key_id.clone(),
                last_rotation: key.last_rotation,
                next_rotation: key.next_rotation,
            };
            key.history.push_back(old_key_id.clone());
            while key.history.len() > max_history {
                if let Some(id) = key.history.pop_front() {
                    dropped.push(id);
                }
            }
            key.active_key_id = new_key_id.clone();
            key.last_rotation = Some(now);
            key.next_rotation = now.plus_secs(interval);
            key.rotation_count += 1;
            snapshot
        };
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.new_key_id = Some(new_key_id.clone());
            task.completed_at = Some(now);
            task.rollback = Some(snapshot);
        }
        for id in dropped {
            self.event(
                state,
                RotationEventKind::KeyArchived,
                Some(&id),
                None,
                None,
                format!("dropped from the history of {key_id}"),
            );
        }
        self.event(
            state,
            RotationEventKind::RotationCompleted,
            Some(&key_id),
            Some(task_id),
            None,
            format!("{old_key_id} replaced by {new_key_id}"),
        );
        info!(task = task_id, key_id = %key_id, old = %old_key_id, new = %new_key_id, "rotation completed");
        Ok(())
    }

    /// Put the predecessor back the way it was before a failed attempt.
    fn restore_status(&self, key_id: &str, before: Option<KeyStatus>) {
        let Some(before) = before else { return };
        match self.backend.key_status(key_id) {
            Ok(now) if now == before => {}
            _ => {
                if let Err(e) = self.backend.set_key_status(key_id, before) {
                    error!(key_id, error = %e, "failed to restore key status after rotation failure");
                }
            }
        }
    }

    fn event(
        &self,
        state: &mut RotationState,
        kind: RotationEventKind,
        key_id: Option<&str>,
        task_id: Option<&str>,
        actor: Option<&str>,
        message: String,
    ) {
        let event = RotationEvent {
            event_id: random_id(),
            timestamp: self.clock.now(),
            kind,
            key_id: key_id.map(str::to_string),
            task_id: task_id.map(str::to_string),
            actor: actor.map(str::to_string),
            message,
        };
        state.outbox.push(event.clone());
        state.events.push_back(event);
        while state.events.len() > self.settings.event_capacity {
            state.events.pop_front();
        }
    }

    /// Drop the lock, then hand the events it recorded to listeners.
    fn release(&self, mut state: MutexGuard<'_, RotationState>) {
        let fired = std::mem::take(&mut state.outbox);
        drop(state);
        for event in &fired {
            self.listeners.emit(event);
        }
    }

    fn commit(&self, state: &RotationState) -> Result<(), RotationError> {
        if let Some(path) = &self.settings.state_file {
            write_json_atomic(path, state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DAY_SECS, HIGH_SECURITY_POLICY};
    use keyguard_crypto::KdfParams;
    use keyguard_keystore::{KeySpec, KeyStore, KeyStoreSettings, KeystoreError};
    use keyguard_nullables::ManualClock;
    use keyguard_types::{KeyType, KeyUsage};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        store: Arc<KeyStore>,
        manager: KeyRotationManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (clock, shared) = ManualClock::shared(1_000_000);
        let settings = KeyStoreSettings {
            kdf: KdfParams::light(),
            ..Default::default()
        };
        let store =
            Arc::new(KeyStore::init(dir.path().join("ks"), "rot", "pw", settings, shared.clone()).unwrap());
        let manager =
            KeyRotationManager::new(store.clone(), shared, RotationSettings::default()).unwrap();
        Fixture {
            dir,
            clock,
            store,
            manager,
        }
    }

    fn new_key(f: &Fixture, policy: Option<&str>) -> String {
        let id = f
            .store
            .generate_key(KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
            .unwrap();
        f.manager.register_key(&id, policy).unwrap();
        id
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unattended_rotation_replaces_key() {
        let f = fixture();
        let key = new_key(&f, None);
        f.clock.advance(DAY_SECS);

        let task_id = f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        let task = f.manager.task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let status = f.manager.status(&key).unwrap();
        let new_id = status.key.active_key_id.clone();
        assert_ne!(new_id, key);
        assert_eq!(task.new_key_id.as_deref(), Some(new_id.as_str()));
        assert_eq!(status.key_status, KeyStatus::Active);
        assert_eq!(status.key.rotation_count, 1);
        assert_eq!(
            status.key.next_rotation,
            Timestamp::new(1_000_000 + DAY_SECS + 90 * DAY_SECS)
        );
        assert_eq!(f.store.get_key_info(&key).unwrap().status, KeyStatus::Archived);

        let history = f.manager.history(&key, 10).unwrap();
        assert_eq!(
            history,
            vec![HistoryEntry {
                key_id: key.clone(),
                status: Some(KeyStatus::Archived)
            }]
        );
    }

    #[test]
    fn approval_gated_rotation() {
        let f = fixture();
        let key = new_key(&f, Some(HIGH_SECURITY_POLICY));

        assert!(matches!(
            f.manager.rotate(&key, RotationTrigger::Compliance, "ops", &[]),
            Err(RotationError::InsufficientApprovals { required: 2, provided: 0 })
        ));
        assert!(matches!(
            f.manager.rotate(&key, RotationTrigger::Compliance, "ops", &names(&["amy", "amy"])),
            Err(RotationError::PolicyViolation(_))
        ));

        let task_id = f
            .manager
            .rotate(&key, RotationTrigger::Compliance, "ops", &names(&["amy", "ben"]))
            .unwrap();
        assert_eq!(f.manager.task(&task_id).unwrap().status, TaskStatus::Pending);
        assert!(matches!(
            f.manager.rotate(&key, RotationTrigger::Manual, "ops", &names(&["amy", "ben"])),
            Err(RotationError::RotationInProgress { .. })
        ));

        assert!(matches!(
            f.manager.approve(&task_id, "mallory"),
            Err(RotationError::PermissionDenied(_))
        ));
        assert_eq!(f.manager.approve(&task_id, "amy").unwrap(), TaskStatus::Pending);
        assert_eq!(f.manager.approve(&task_id, "amy").unwrap(), TaskStatus::Pending);
        assert_eq!(f.manager.status(&key).unwrap().key.active_key_id, key);

        assert_eq!(f.manager.approve(&task_id, "ben").unwrap(), TaskStatus::Completed);
        assert_ne!(f.manager.status(&key).unwrap().key.active_key_id, key);
        assert!(matches!(
            f.manager.approve(&task_id, "ben"),
            Err(RotationError::InvalidTransition { status: TaskStatus::Completed, .. })
        ));
    }

    #[test]
    fn policy_approver_list_is_enforced() {
        let f = fixture();
        let policy = RotationPolicy::new("treasury", "Treasury", 30)
            .requires_approvals(1)
            .approvers(["cfo", "cto"]);
        f.manager.create_policy(policy.clone(), "admin").unwrap();
        assert!(matches!(
            f.manager.create_policy(policy, "admin"),
            Err(RotationError::PolicyExists(_))
        ));
        let key = new_key(&f, Some("treasury"));
        assert!(matches!(
            f.manager.rotate(&key, RotationTrigger::Manual, "ops", &names(&["intern"])),
            Err(RotationError::PermissionDenied(who)) if who == "intern"
        ));
        let task = f
            .manager
            .rotate(&key, RotationTrigger::Manual, "ops", &names(&["cfo"]))
            .unwrap();
        assert_eq!(f.manager.approve(&task, "cfo").unwrap(), TaskStatus::Completed);
    }

    #[test]
    fn cancel_only_open_tasks() {
        let f = fixture();
        let key = new_key(&f, Some(HIGH_SECURITY_POLICY));
        let task = f
            .manager
            .rotate(&key, RotationTrigger::Manual, "ops", &names(&["a", "b"]))
            .unwrap();
        f.manager.cancel(&task, "ops", "changed my mind").unwrap();
        let cancelled = f.manager.task(&task).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.error.unwrap().contains("changed my mind"));
        assert!(matches!(
            f.manager.cancel(&task, "ops", "again"),
            Err(RotationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.manager.approve(&task, "a"),
            Err(RotationError::InvalidTransition { .. })
        ));
        // A cancelled task no longer blocks a new one.
        f.manager
            .rotate(&key, RotationTrigger::Manual, "ops", &names(&["a", "b"]))
            .unwrap();
    }

    #[test]
    fn rollback_restores_predecessor() {
        let f = fixture();
        let key = new_key(&f, None);
        let before = f.manager.status(&key).unwrap().key;

        let task = f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        let new_id = f.manager.status(&key).unwrap().key.active_key_id;

        f.manager.rollback(&task, "ops", "bad deploy").unwrap();
        let after = f.manager.status(&key).unwrap();
        assert_eq!(after.key.active_key_id, key);
        assert_eq!(after.key.next_rotation, before.next_rotation);
        assert_eq!(after.key.rotation_count, 0);
        assert!(after.key.history.is_empty());
        assert_eq!(f.store.get_key_info(&key).unwrap().status, KeyStatus::Active);
        assert_eq!(f.store.get_key_info(&new_id).unwrap().status, KeyStatus::Archived);
        assert_eq!(f.manager.task(&task).unwrap().status, TaskStatus::RolledBack);

        assert!(matches!(
            f.manager.rollback(&task, "ops", "twice"),
            Err(RotationError::InvalidTransition { status: TaskStatus::RolledBack, .. })
        ));
    }

    #[test]
    fn only_latest_rotation_rolls_back() {
        let f = fixture();
        let key = new_key(&f, None);
        let first = f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        assert!(matches!(
            f.manager.rollback(&first, "ops", "too late"),
            Err(RotationError::PolicyViolation(_))
        ));
    }

    #[test]
    fn history_is_trimmed_to_policy_depth() {
        let f = fixture();
        f.manager
            .create_policy(RotationPolicy::new("short", "Short", 30).max_history(2), "admin")
            .unwrap();
        let key = new_key(&f, Some("short"));
        for _ in 0..4 {
            f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        }
        let status = f.manager.status(&key).unwrap();
        assert_eq!(status.key.rotation_count, 4);
        assert_eq!(status.key.history.len(), 2);
        let archived = f
            .manager
            .events(100)
            .into_iter()
            .filter(|e| e.kind == RotationEventKind::KeyArchived)
            .count();
        assert_eq!(archived, 2);
    }

    #[test]
    fn due_scan_and_warning_window() {
        let f = fixture();
        let plain = new_key(&f, None);
        let gated = new_key(&f, Some(HIGH_SECURITY_POLICY));
        assert!(f.manager.due_for_rotation().is_empty());

        // High security: 30 day interval, 3 day warning.
        f.clock.advance(28 * DAY_SECS);
        assert_eq!(f.manager.keys_in_warning_window(), vec![gated.clone()]);

        f.clock.advance(2 * DAY_SECS);
        assert_eq!(f.manager.due_for_rotation(), vec![gated.clone()]);

        f.clock.advance(60 * DAY_SECS);
        let mut due = f.manager.due_for_rotation();
        due.sort();
        let mut expected = vec![plain.clone(), gated.clone()];
        expected.sort();
        assert_eq!(due, expected);

        let report = f.manager.auto_rotate_due("scheduler");
        assert_eq!(report.rotated.len(), 1);
        assert_eq!(report.rotated[0].0, plain);
        assert_eq!(report.needs_attention, vec![gated.clone()]);
        assert_eq!(f.manager.due_for_rotation(), vec![gated]);
    }

    /// Delegates to a real store but can be told to fail rotations.
    struct FlakyBackend {
        inner: Arc<KeyStore>,
        fail: AtomicBool,
    }

    impl KeyBackend for FlakyBackend {
        fn key_status(&self, key_id: &str) -> Result<KeyStatus, KeystoreError> {
            self.inner.key_status(key_id)
        }

        fn rotate_key(&self, key_id: &str) -> Result<String, KeystoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(KeystoreError::PolicyViolation("generator offline".into()));
            }
            self.inner.rotate_key(key_id)
        }

        fn set_key_status(&self, key_id: &str, status: KeyStatus) -> Result<KeyStatus, KeystoreError> {
            self.inner.set_key_status(key_id, status)
        }
    }

    #[test]
    fn failed_generation_leaves_key_active() {
        let f = fixture();
        let backend = Arc::new(FlakyBackend {
            inner: f.store.clone(),
            fail: AtomicBool::new(true),
        });
        let (_, shared) = ManualClock::shared(5_000);
        let manager =
            KeyRotationManager::new(backend.clone(), shared, RotationSettings::default()).unwrap();
        let key = f
            .store
            .generate_key(KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
            .unwrap();
        manager.register_key(&key, None).unwrap();

        let err = manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap_err();
        let RotationError::RotationFailed { task_id, reason } = err else {
            panic!("expected RotationFailed");
        };
        assert!(reason.contains("generator offline"));
        let task = manager.task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(f.store.get_key_info(&key).unwrap().status, KeyStatus::Active);
        assert_eq!(manager.status(&key).unwrap().key.active_key_id, key);

        backend.fail.store(false, Ordering::SeqCst);
        manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
    }

    #[test]
    fn state_survives_restart_and_fails_interrupted_tasks() {
        let f = fixture();
        let state_file = f.dir.path().join("rotation.json");
        let settings = RotationSettings {
            state_file: Some(state_file.clone()),
            ..Default::default()
        };
        let (_, shared) = ManualClock::shared(7_000);
        let key;
        let pending;
        {
            let manager =
                KeyRotationManager::new(f.store.clone(), shared.clone(), settings.clone()).unwrap();
            key = f
                .store
                .generate_key(KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
                .unwrap();
            manager.register_key(&key, Some(HIGH_SECURITY_POLICY)).unwrap();
            pending = manager
                .rotate(&key, RotationTrigger::Manual, "ops", &names(&["a", "b"]))
                .unwrap();
        }

        // Simulate a crash mid-rotation.
        let mut raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
        raw["tasks"][&pending]["status"] = serde_json::json!("in_progress");
        std::fs::write(&state_file, serde_json::to_vec(&raw).unwrap()).unwrap();

        let manager = KeyRotationManager::new(f.store.clone(), shared, settings).unwrap();
        assert_eq!(manager.managed_keys().len(), 1);
        let task = manager.task(&pending).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("interrupted by restart"));
        assert!(manager.status(&key).unwrap().active_task.is_none());
    }

    #[test]
    fn cleanup_drops_old_finished_tasks() {
        let f = fixture();
        let key = new_key(&f, None);
        f.manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).unwrap();
        assert_eq!(f.manager.cleanup_tasks(DAY_SECS).unwrap(), 0);
        f.clock.advance(DAY_SECS + 1);
        assert_eq!(f.manager.cleanup_tasks(DAY_SECS).unwrap(), 1);
        assert!(f.manager.tasks_for(&key).is_empty());
        assert_eq!(f.manager.summary().managed_keys, 1);
    }

    #[test]
    fn listeners_see_each_lifecycle_event_once() {
        let f = fixture();
        let lifecycle = Arc::new(Mutex::new(Vec::new()));
        let approvals = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = lifecycle.clone();
            f.manager
                .add_rotation_listener(move |e: &RotationEvent| seen.lock().push(e.kind));
            let seen = approvals.clone();
            f.manager
                .add_approval_listener(move |e: &RotationEvent| seen.lock().push(e.actor.clone()));
            let seen = completions.clone();
            f.manager
                .add_completion_listener(move |e: &RotationEvent| seen.lock().push(e.task_id.clone()));
        }

        let key = new_key(&f, Some(HIGH_SECURITY_POLICY));
        let task = f
            .manager
            .rotate(&key, RotationTrigger::Manual, "ops", &names(&["amy", "ben"]))
            .unwrap();
        f.manager.approve(&task, "amy").unwrap();
        f.manager.approve(&task, "amy").unwrap();
        f.manager.approve(&task, "ben").unwrap();
        f.manager.rollback(&task, "ops", "bad deploy").unwrap();

        assert_eq!(
            *lifecycle.lock(),
            vec![
                RotationEventKind::RotationInitiated,
                RotationEventKind::RotationStarted,
                RotationEventKind::RotationCompleted,
                RotationEventKind::RotationRolledBack,
            ]
        );
        assert_eq!(
            *approvals.lock(),
            vec![Some("amy".to_string()), Some("ben".to_string())]
        );
        assert_eq!(*completions.lock(), vec![Some(task)]);
    }

    #[test]
    fn failed_execution_reaches_completion_listeners() {
        let f = fixture();
        let backend = Arc::new(FlakyBackend {
            inner: f.store.clone(),
            fail: AtomicBool::new(true),
        });
        let (_, shared) = ManualClock::shared(5_000);
        let manager = KeyRotationManager::new(backend, shared, RotationSettings::default()).unwrap();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let seen = outcomes.clone();
        manager.add_completion_listener(move |e: &RotationEvent| seen.lock().push(e.kind));

        let key = f
            .store
            .generate_key(KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
            .unwrap();
        manager.register_key(&key, None).unwrap();
        assert!(manager.rotate(&key, RotationTrigger::Manual, "ops", &[]).is_err());
        assert_eq!(*outcomes.lock(), vec![RotationEventKind::RotationFailed]);
    }

    #[test]
    fn unknown_keys_and_policies() {
        let f = fixture();
        assert!(matches!(
            f.manager.register_key("missing", None),
            Err(RotationError::Keystore(KeystoreError::KeyNotFound(_)))
        ));
        let key = new_key(&f, None);
        assert!(matches!(
            f.manager.register_key(&key, None),
            Err(RotationError::KeyAlreadyManaged(_))
        ));
        assert!(matches!(
            f.manager.assign_policy(&key, "nope", "ops"),
            Err(RotationError::PolicyNotFound(_))
        ));
        f.manager.assign_policy(&key, HIGH_SECURITY_POLICY, "ops").unwrap();
        assert_eq!(
            f.manager.status(&key).unwrap().key.policy_id,
            HIGH_SECURITY_POLICY
        );
    }
}
