//! Rotation policies.

use keyguard_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::RotationError;

pub const DAY_SECS: u64 = 86_400;

pub const DEFAULT_POLICY: &str = "default";
pub const HIGH_SECURITY_POLICY: &str = "high_security";
pub const COMPLIANCE_POLICY: &str = "compliance";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub policy_id: String,
    pub name: String,
    pub description: String,
    pub interval_days: u32,
    /// How long before the due date a key shows up as due soon.
    pub warning_days: u32,
    /// How long a predecessor stays usable for verification after rotation.
    pub grace_period_days: u32,
    /// Predecessors kept per key; older ones are dropped from history.
    pub max_history: usize,
    pub auto_rotate: bool,
    pub requires_approval: bool,
    pub approval_threshold: usize,
    /// When non-empty, only these users may approve.
    pub approvers: Vec<String>,
    pub active: bool,
    pub created_at: Timestamp,
}

impl RotationPolicy {
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>, interval_days: u32) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
            description: String::new(),
            interval_days,
            warning_days: 7,
            grace_period_days: 30,
            max_history: 10,
            auto_rotate: true,
            requires_approval: false,
            approval_threshold: 0,
            approvers: Vec::new(),
            active: true,
            created_at: Timestamp::EPOCH,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn windows(mut self, warning_days: u32, grace_period_days: u32) -> Self {
        self.warning_days = warning_days;
        self.grace_period_days = grace_period_days;
        self
    }

    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn auto_rotate(mut self, enabled: bool) -> Self {
        self.auto_rotate = enabled;
        self
    }

    pub fn requires_approvals(mut self, threshold: usize) -> Self {
        self.requires_approval = threshold > 0;
        self.approval_threshold = threshold;
        self
    }

    pub fn approvers<I, S>(mut self, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approvers = approvers.into_iter().map(Into::into).collect();
        self
    }

    pub fn interval_secs(&self) -> u64 {
        u64::from(self.interval_days) * DAY_SECS
    }

    pub fn warning_secs(&self) -> u64 {
        u64::from(self.warning_days) * DAY_SECS
    }

    /// Approvals a task under this policy must collect before it runs.
    pub fn required_approvals(&self) -> usize {
        if self.requires_approval {
            self.approval_threshold.max(1)
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<(), RotationError> {
        if self.policy_id.is_empty() {
            return Err(RotationError::InvalidPolicy("empty policy id".into()));
        }
        if self.interval_days == 0 {
            return Err(RotationError::InvalidPolicy("interval must be at least one day".into()));
        }
        if self.warning_days >= self.interval_days {
            return Err(RotationError::InvalidPolicy(
                "warning window must be shorter than the interval".into(),
            ));
        }
        if self.max_history == 0 {
            return Err(RotationError::InvalidPolicy("history depth must be positive".into()));
        }
        if !self.approvers.is_empty() && self.approvers.len() < self.required_approvals() {
            return Err(RotationError::InvalidPolicy(format!(
                "{} approvers listed but {} approvals required",
                self.approvers.len(),
                self.required_approvals()
            )));
        }
        Ok(())
    }

    /// The policies every manager starts with.
    pub fn builtin(now: Timestamp) -> Vec<RotationPolicy> {
        let mut policies = vec![
            RotationPolicy::new(DEFAULT_POLICY, "Default Key Rotation Policy", 90)
                .description("Scheduled rotation without approval")
                .windows(7, 30)
                .max_history(10),
            RotationPolicy::new(HIGH_SECURITY_POLICY, "High Security Key Rotation Policy", 30)
                .description("Short interval, two approvals per rotation")
                .windows(3, 7)
                .max_history(20)
                .requires_approvals(2),
            RotationPolicy::new(COMPLIANCE_POLICY, "Compliance Key Rotation Policy", 60)
                .description("Compliance-driven rotation with sign-off")
                .windows(5, 14)
                .max_history(15)
                .requires_approvals(1),
        ];
        for policy in &mut policies {
            policy.created_at = now;
        }
        policies
    }
}
