pub mod features;
pub mod shared;

use std::sync::Arc;

use features::compute_api::repo::ComputeApi;
use features::instance_directory::service::DirectoryService;
use features::observability::service::ObservabilityService;
use features::reconciliation::controller::ReconciliationController;
use features::reconciliation::service::ReconciliationService;
use features::transition::service::waiter::StopWaiter;
use features::transition::service::TransitionExecutor;
use shared::config::ReconcilerConfig;

/// Wire the directory, waiter, executor and coordinator over one compute API client.
pub fn build_controller(
    config: &ReconcilerConfig,
    api: Arc<dyn ComputeApi>,
    metrics: Option<Arc<ObservabilityService>>,
) -> ReconciliationController {
    let directory = DirectoryService::new(api.clone());
    let waiter = StopWaiter::new(directory.clone(), config.poll_interval())
        .with_timeout(config.wait_timeout());

    let mut executor = TransitionExecutor::new(api, waiter, config.policy.clone());
    if let Some(metrics) = &metrics {
        executor = executor.with_metrics(metrics.clone());
    }

    let controller = ReconciliationController::new(
        directory,
        ReconciliationService::new(config.policy.clone()),
        Arc::new(executor),
    );
    match metrics {
        Some(metrics) => controller.with_metrics(metrics),
        None => controller,
    }
}
