//! Per-instance transition state machine and its outcome record.

use crate::{Action, CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStep {
    Stop,
    WaitForStopped,
    ModifyType,
    AdjustTag,
    Restart,
}

impl TransitionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStep::Stop => "stop",
            TransitionStep::WaitForStopped => "wait_for_stopped",
            TransitionStep::ModifyType => "modify_type",
            TransitionStep::AdjustTag => "adjust_tag",
            TransitionStep::Restart => "restart",
        }
    }
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one instance through stop, wait, modify, tag and restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TransitionState {
    Pending,
    Stopping,
    Stopped,
    TypeChanged,
    TagAdjusted,
    Restarted,
    Done,
    Aborted { step: TransitionStep, reason: String },
}

impl TransitionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransitionState::Done | TransitionState::Aborted { .. })
    }

    /// Record that `step` completed. Steps must complete in order.
    pub fn advance(&self, step: TransitionStep) -> Result<TransitionState> {
        let next = match (self, step) {
            (TransitionState::Pending, TransitionStep::Stop) => TransitionState::Stopping,
            (TransitionState::Stopping, TransitionStep::WaitForStopped) => {
                TransitionState::Stopped
            }
            (TransitionState::Stopped, TransitionStep::ModifyType) => TransitionState::TypeChanged,
            (TransitionState::TypeChanged, TransitionStep::AdjustTag) => {
                TransitionState::TagAdjusted
            }
            (TransitionState::TagAdjusted, TransitionStep::Restart) => TransitionState::Restarted,
            (state, step) => {
                return Err(CoreError::InvalidTransition(format!(
                    "cannot complete step '{step}' from state {state:?}"
                )))
            }
        };
        Ok(next)
    }

    /// Close a transition that got past tag adjustment.
    pub fn finish(&self) -> Result<TransitionState> {
        match self {
            TransitionState::TagAdjusted | TransitionState::Restarted => Ok(TransitionState::Done),
            state => Err(CoreError::InvalidTransition(format!(
                "cannot finish from state {state:?}"
            ))),
        }
    }

    pub fn abort(
        &self,
        step: TransitionStep,
        reason: impl Into<String>,
    ) -> Result<TransitionState> {
        if self.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "cannot abort from terminal state {self:?}"
            )));
        }
        Ok(TransitionState::Aborted {
            step,
            reason: reason.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: TransitionStep,
    pub message: String,
}

/// Outcome of one executor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    pub instance_id: String,
    pub action: Action,
    pub state: TransitionState,
    /// Non-fatal failures; the sequence carried on past them.
    pub warnings: Vec<StepFailure>,
    pub stop_polls: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransitionReport {
    pub fn new(instance_id: impl Into<String>, action: Action) -> Self {
        Self {
            instance_id: instance_id.into(),
            action,
            state: TransitionState::Pending,
            warnings: Vec::new(),
            stop_polls: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == TransitionState::Done
    }

    pub fn abort_reason(&self) -> Option<(TransitionStep, &str)> {
        match &self.state {
            TransitionState::Aborted { step, reason } => Some((*step, reason.as_str())),
            _ => None,
        }
    }

    pub fn add_warning(&mut self, step: TransitionStep, message: impl Into<String>) {
        self.warnings.push(StepFailure {
            step,
            message: message.into(),
        });
    }

    pub fn close(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}
