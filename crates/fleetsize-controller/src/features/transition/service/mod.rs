pub mod waiter;

use crate::features::compute_api::repo::{ApiOperation, ComputeApi};
use crate::features::observability::service::ObservabilityService;
use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::{
    InstanceStateChange, ReconciliationPolicy, TagEffect, TransitionIntent, TransitionReport,
    TransitionStep,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use waiter::StopWaiter;

type StepResult<T> = Result<T, (TransitionStep, ControllerError)>;

/// Runs stop, wait, modify, tag and restart for one instance
pub struct TransitionExecutor {
    api: Arc<dyn ComputeApi>,
    waiter: StopWaiter,
    policy: ReconciliationPolicy,
    metrics: Option<Arc<ObservabilityService>>,
}

impl TransitionExecutor {
    pub fn new(api: Arc<dyn ComputeApi>, waiter: StopWaiter, policy: ReconciliationPolicy) -> Self {
        Self {
            api,
            waiter,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObservabilityService>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute the intent. Failures are captured in the report, never returned.
    pub async fn execute(
        &self,
        intent: &TransitionIntent,
        cancel: &CancellationToken,
    ) -> TransitionReport {
        let mut report = TransitionReport::new(&intent.instance_id, intent.action);
        if let Some(metrics) = &self.metrics {
            metrics.record_transition_started(intent.action);
        }

        if let Err((step, e)) = self.run(intent, cancel, &mut report).await {
            error!(
                instance_id = %intent.instance_id,
                action = %intent.action,
                step = %step,
                code = e.code(),
                error = %e,
                "Transition aborted"
            );
            self.record_failure(step);
            report.state = match report.state.abort(step, e.to_string()) {
                Ok(aborted) => aborted,
                Err(_) => report.state.clone(),
            };
        } else {
            info!(
                instance_id = %intent.instance_id,
                action = %intent.action,
                warnings = report.warnings.len(),
                "Transition complete"
            );
        }

        let report = report.close();
        if let Some(metrics) = &self.metrics {
            metrics.record_transition_finished(&report);
        }
        report
    }

    async fn run(
        &self,
        intent: &TransitionIntent,
        cancel: &CancellationToken,
        report: &mut TransitionReport,
    ) -> StepResult<()> {
        let instance_id = intent.instance_id.as_str();
        let ids = [intent.instance_id.clone()];
        let plan = &intent.plan;

        info!(
            instance_id = %instance_id,
            action = %intent.action,
            target_type = %plan.target_type,
            "Stopping instance"
        );
        let changes = self
            .call(ApiOperation::StopInstances, cancel, self.api.stop_instances(&ids))
            .await
            .map_err(|e| (TransitionStep::Stop, e))?;
        log_state_changes("Stop requested", &changes);
        advance(report, TransitionStep::Stop)?;

        let wait_started = Instant::now();
        report.stop_polls = self
            .waiter
            .wait_until_stopped(instance_id, cancel)
            .await
            .map_err(|e| (TransitionStep::WaitForStopped, e))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_stop_wait(wait_started.elapsed());
        }
        advance(report, TransitionStep::WaitForStopped)?;

        self.call(
            ApiOperation::ModifyInstanceType,
            cancel,
            self.api.modify_instance_type(instance_id, &plan.target_type),
        )
        .await
        .map_err(|e| (TransitionStep::ModifyType, e))?;
        info!(
            instance_id = %instance_id,
            instance_type = %plan.target_type,
            "Modified instance type"
        );
        advance(report, TransitionStep::ModifyType)?;

        match self.adjust_tag(instance_id, plan.tag_effect, cancel).await {
            Ok(()) => info!(
                instance_id = %instance_id,
                tag_key = %self.policy.tag_key,
                effect = ?plan.tag_effect,
                "Adjusted instance tag"
            ),
            Err(e @ ControllerError::Cancelled(_)) => return Err((TransitionStep::AdjustTag, e)),
            Err(e) => {
                warn!(
                    instance_id = %instance_id,
                    tag_key = %self.policy.tag_key,
                    error = %e,
                    "Failed to adjust instance tag"
                );
                self.record_failure(TransitionStep::AdjustTag);
                report.add_warning(TransitionStep::AdjustTag, e.to_string());
            }
        }
        advance(report, TransitionStep::AdjustTag)?;

        if plan.restart_after {
            match self
                .call(ApiOperation::StartInstances, cancel, self.api.start_instances(&ids))
                .await
            {
                Ok(changes) => {
                    log_state_changes("Started instance", &changes);
                    advance(report, TransitionStep::Restart)?;
                }
                Err(e @ ControllerError::Cancelled(_)) => {
                    return Err((TransitionStep::Restart, e))
                }
                Err(e) => {
                    warn!(instance_id = %instance_id, error = %e, "Failed to start instance");
                    self.record_failure(TransitionStep::Restart);
                    report.add_warning(TransitionStep::Restart, e.to_string());
                }
            }
        }

        report.state = report
            .state
            .finish()
            .map_err(|e| (TransitionStep::Restart, ControllerError::from(e)))?;
        Ok(())
    }

    async fn adjust_tag(
        &self,
        instance_id: &str,
        effect: TagEffect,
        cancel: &CancellationToken,
    ) -> ControllerResult<()> {
        match effect {
            TagEffect::Remove => {
                let keys = [self.policy.tag_key.clone()];
                self.call(
                    ApiOperation::DeleteTags,
                    cancel,
                    self.api.delete_tags(instance_id, &keys),
                )
                .await
            }
            TagEffect::Set => {
                let tags = HashMap::from([(
                    self.policy.tag_key.clone(),
                    self.policy.tag_value.clone(),
                )]);
                self.call(
                    ApiOperation::CreateTags,
                    cancel,
                    self.api.create_tags(instance_id, &tags),
                )
                .await
            }
        }
    }

    /// Race a provider call against cancellation and time it.
    async fn call<T, F>(
        &self,
        operation: ApiOperation,
        cancel: &CancellationToken,
        request: F,
    ) -> ControllerResult<T>
    where
        F: Future<Output = ControllerResult<T>>,
    {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ControllerError::Cancelled(format!(
                "{operation} interrupted"
            ))),
            result = request => result,
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_provider_call(operation.as_str(), started.elapsed());
        }
        result
    }

    fn record_failure(&self, step: TransitionStep) {
        if let Some(metrics) = &self.metrics {
            metrics.record_step_failure(step);
        }
    }
}

fn advance(report: &mut TransitionReport, step: TransitionStep) -> StepResult<()> {
    report.state = report
        .state
        .advance(step)
        .map_err(|e| (step, ControllerError::from(e)))?;
    Ok(())
}

fn log_state_changes(message: &str, changes: &[InstanceStateChange]) {
    for change in changes {
        info!(
            instance_id = %change.instance_id,
            previous_state = %change.previous_state,
            current_state = %change.current_state,
            "{message}"
        );
    }
}
