//! Sizing rule: decides what, if anything, must happen to one instance.

use crate::{InstanceSnapshot, PowerState, ReconciliationPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    RevertToBaseline,
    UpgradeToTarget,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::RevertToBaseline => "revert_to_baseline",
            Action::UpgradeToTarget => "upgrade_to_target",
        }
    }

    /// Concrete executor parameters for this action, or `None` when nothing runs.
    pub fn plan(&self, policy: &ReconciliationPolicy) -> Option<TransitionPlan> {
        match self {
            Action::None => None,
            Action::RevertToBaseline => Some(TransitionPlan {
                target_type: policy.baseline_type.clone(),
                tag_effect: TagEffect::Remove,
                restart_after: true,
            }),
            Action::UpgradeToTarget => Some(TransitionPlan {
                target_type: policy.target_type.clone(),
                tag_effect: TagEffect::Set,
                restart_after: true,
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the policy tag once the type has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagEffect {
    Remove,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub target_type: String,
    pub tag_effect: TagEffect,
    pub restart_after: bool,
}

/// Classify an instance against the policy.
///
/// An exempt instance that is running is reverted even when it also sits at
/// the baseline type; the two rules never both fire for one instance.
pub fn classify(
    instance_type: &str,
    power_state: PowerState,
    tag_value: Option<&str>,
    policy: &ReconciliationPolicy,
) -> Action {
    if tag_value == Some(policy.tag_value.as_str()) && power_state == PowerState::Running {
        Action::RevertToBaseline
    } else if instance_type == policy.baseline_type {
        Action::UpgradeToTarget
    } else {
        Action::None
    }
}

/// Per-instance work item for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionIntent {
    pub instance_id: String,
    pub action: Action,
    pub plan: TransitionPlan,
}

impl TransitionIntent {
    pub fn derive(snapshot: &InstanceSnapshot, policy: &ReconciliationPolicy) -> Option<Self> {
        let action = classify(
            &snapshot.instance_type,
            snapshot.power_state,
            snapshot.tag(&policy.tag_key),
            policy,
        );

        debug!(
            instance_id = %snapshot.instance_id,
            instance_type = %snapshot.instance_type,
            power_state = %snapshot.power_state,
            action = %action,
            "Classified instance"
        );

        let plan = action.plan(policy)?;
        Some(Self {
            instance_id: snapshot.instance_id.clone(),
            action,
            plan,
        })
    }
}
