pub mod classification;
pub mod transition;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use classification::{classify, Action, TagEffect, TransitionIntent, TransitionPlan};
pub use transition::{StepFailure, TransitionReport, TransitionState, TransitionStep};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid power state: {0}")]
    InvalidPowerState(String),
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Provider-reported lifecycle phase of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Pending => "pending",
            PowerState::Running => "running",
            PowerState::Stopping => "stopping",
            PowerState::Stopped => "stopped",
            PowerState::ShuttingDown => "shutting-down",
            PowerState::Terminated => "terminated",
        }
    }

    /// States from which an instance can never reach `stopped` again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PowerState::ShuttingDown | PowerState::Terminated)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PowerState::Pending),
            "running" => Ok(PowerState::Running),
            "stopping" => Ok(PowerState::Stopping),
            "stopped" => Ok(PowerState::Stopped),
            "shutting-down" | "shutting_down" => Ok(PowerState::ShuttingDown),
            "terminated" => Ok(PowerState::Terminated),
            other => Err(CoreError::InvalidPowerState(other.to_string())),
        }
    }
}

/// Point-in-time view of one instance as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub instance_type: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl InstanceSnapshot {
    pub fn new(
        instance_id: impl Into<String>,
        instance_type: impl Into<String>,
        power_state: PowerState,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_type: instance_type.into(),
            power_state,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Sizing policy, constant for the lifetime of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    pub baseline_type: String,
    pub target_type: String,
    pub tag_key: String,
    pub tag_value: String,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            baseline_type: "t2.micro".to_string(),
            target_type: "t3.medium".to_string(),
            tag_key: "instance_mode".to_string(),
            tag_value: "other_instances".to_string(),
        }
    }
}

impl ReconciliationPolicy {
    pub fn new(
        baseline_type: impl Into<String>,
        target_type: impl Into<String>,
        tag_key: impl Into<String>,
        tag_value: impl Into<String>,
    ) -> Self {
        Self {
            baseline_type: baseline_type.into(),
            target_type: target_type.into(),
            tag_key: tag_key.into(),
            tag_value: tag_value.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("baseline_type", &self.baseline_type),
            ("target_type", &self.target_type),
            ("tag_key", &self.tag_key),
            ("tag_value", &self.tag_value),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidPolicy(format!("{name} cannot be empty")));
            }
        }

        if self.baseline_type == self.target_type {
            return Err(CoreError::InvalidPolicy(format!(
                "baseline and target type are both '{}'",
                self.baseline_type
            )));
        }

        Ok(())
    }
}

/// State change reported back by a stop or start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateChange {
    pub instance_id: String,
    pub previous_state: PowerState,
    pub current_state: PowerState,
}

impl fmt::Display for InstanceStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.instance_id, self.previous_state, self.current_state
        )
    }
}
