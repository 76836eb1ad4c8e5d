pub use fleetsize_core::{
    Action, InstanceSnapshot, InstanceStateChange, PowerState, ReconciliationPolicy, TagEffect,
    TransitionIntent, TransitionPlan, TransitionReport, TransitionState, TransitionStep,
};

/// Outcome of classifying a directory snapshot
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    pub intents: Vec<TransitionIntent>,
    /// Instances that need no action this pass.
    pub skipped: Vec<String>,
}

/// Everything one reconciliation pass did
#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    pub pass_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub inspected: usize,
    pub skipped: Vec<String>,
    pub reports: Vec<TransitionReport>,
}

impl ReconciliationSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn report_for(&self, instance_id: &str) -> Option<&TransitionReport> {
        self.reports.iter().find(|r| r.instance_id == instance_id)
    }
}
