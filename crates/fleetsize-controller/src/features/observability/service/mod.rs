use crate::features::observability::repo::ObservabilityRepository;
use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::{TransitionReport, TransitionState, TransitionStep};
use fleetsize_core::Action;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn set_inspected_instances(&self, count: usize) {
        self.repo.set_inspected_instances(count as f64);
    }

    pub fn record_transition_started(&self, action: Action) {
        self.repo.inc_transitions_started(action.as_str());
    }

    pub fn record_transition_finished(&self, report: &TransitionReport) {
        let outcome = match &report.state {
            TransitionState::Done if report.warnings.is_empty() => "done",
            TransitionState::Done => "done_with_warnings",
            TransitionState::Aborted { .. } => "aborted",
            _ => "incomplete",
        };
        self.repo
            .inc_transitions_finished(report.action.as_str(), outcome);
    }

    pub fn record_step_failure(&self, step: TransitionStep) {
        self.repo.inc_step_failures(step.as_str());
    }

    pub fn record_stop_wait(&self, elapsed: Duration) {
        self.repo.observe_stop_wait(elapsed.as_secs_f64());
    }

    pub fn record_provider_call(&self, operation: &str, elapsed: Duration) {
        self.repo
            .observe_provider_call(operation, elapsed.as_secs_f64());
    }

    pub fn render_metrics(&self) -> ControllerResult<String> {
        self.repo.render_metrics()
    }

    /// Write the current metrics in Prometheus text format, replacing the file atomically.
    pub fn write_textfile(&self, path: &Path) -> ControllerResult<()> {
        let rendered = self.render_metrics()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, rendered)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| {
                ControllerError::Metrics(format!("failed to write {}: {e}", path.display()))
            })
    }
}
