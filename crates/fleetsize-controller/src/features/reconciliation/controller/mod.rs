use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::features::instance_directory::service::DirectoryService;
use crate::features::observability::service::ObservabilityService;
use crate::features::reconciliation::service::ReconciliationService;
use crate::features::transition::service::TransitionExecutor;
use crate::shared::error::ControllerResult;
use crate::shared::types::{
    ReconciliationSummary, TransitionIntent, TransitionReport, TransitionStep,
};

/// Reads the fleet once, then fans one transition task out per qualifying instance
#[derive(Clone)]
pub struct ReconciliationController {
    directory: DirectoryService,
    planner: ReconciliationService,
    executor: Arc<TransitionExecutor>,
    metrics: Option<Arc<ObservabilityService>>,
}

impl ReconciliationController {
    pub fn new(
        directory: DirectoryService,
        planner: ReconciliationService,
        executor: Arc<TransitionExecutor>,
    ) -> Self {
        Self {
            directory,
            planner,
            executor,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObservabilityService>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One full pass. Only a failed directory read is an error; per-instance
    /// failures are reported in the summary.
    pub async fn run_pass(
        &self,
        instance_ids: &[String],
        cancel: CancellationToken,
    ) -> ControllerResult<ReconciliationSummary> {
        let pass_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            pass_id = %pass_id,
            requested = instance_ids.len(),
            "Starting reconciliation pass"
        );

        let snapshots = self.directory.read(instance_ids).await.map_err(|e| {
            error!(
                pass_id = %pass_id,
                error = %e,
                code = e.code(),
                "Reconciliation pass failed"
            );
            e
        })?;
        if let Some(metrics) = &self.metrics {
            metrics.set_inspected_instances(snapshots.len());
        }

        let plan = self.planner.plan(&snapshots);
        let handles: Vec<(TransitionIntent, JoinHandle<TransitionReport>)> = plan
            .intents
            .into_iter()
            .map(|intent| {
                let executor = self.executor.clone();
                let token = cancel.child_token();
                let task_intent = intent.clone();
                let handle =
                    tokio::spawn(async move { executor.execute(&task_intent, &token).await });
                (intent, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (intent, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        instance_id = %intent.instance_id,
                        error = %e,
                        "Transition task did not complete"
                    );
                    failed_task_report(&intent, &e.to_string())
                }
            };
            reports.push(report);
        }

        let summary = ReconciliationSummary {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            inspected: snapshots.len(),
            skipped: plan.skipped,
            reports,
        };

        if summary.failed() > 0 {
            warn!(
                pass_id = %summary.pass_id,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                "Reconciliation pass finished with failures"
            );
        } else {
            info!(
                pass_id = %summary.pass_id,
                succeeded = summary.succeeded(),
                skipped = summary.skipped.len(),
                "Reconciliation pass finished"
            );
        }
        Ok(summary)
    }
}

fn failed_task_report(intent: &TransitionIntent, reason: &str) -> TransitionReport {
    let mut report = TransitionReport::new(&intent.instance_id, intent.action);
    if let Ok(aborted) = report
        .state
        .abort(TransitionStep::Stop, format!("task failed: {reason}"))
    {
        report.state = aborted;
    }
    report.close()
}
