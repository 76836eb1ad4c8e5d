use std::sync::Arc;

use fleetsize_controller::build_controller;
use fleetsize_controller::features::compute_api::repo::http::HttpComputeApi;
use fleetsize_controller::features::compute_api::repo::{ComputeApi, InMemoryComputeApi};
use fleetsize_controller::features::observability::repo::ObservabilityRepository;
use fleetsize_controller::features::observability::service::ObservabilityService;
use fleetsize_controller::shared::config::ReconcilerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleetsize_controller=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ReconcilerConfig::load()?;
    info!(
        instances = config.instance_ids.len(),
        baseline_type = %config.policy.baseline_type,
        target_type = %config.policy.target_type,
        poll_interval_secs = config.poll_interval_secs,
        "Starting fleetsize controller"
    );

    let api: Arc<dyn ComputeApi> = match &config.api.endpoint {
        Some(endpoint) => {
            info!(%endpoint, "Using compute API gateway");
            Arc::new(HttpComputeApi::new(&config.api)?)
        }
        None => {
            warn!(
                simulated = config.simulated_instances.len(),
                "No compute API endpoint configured, running against a simulated fleet"
            );
            Arc::new(InMemoryComputeApi::with_instances(
                config.simulated_instances.clone(),
            ))
        }
    };

    let metrics = Arc::new(ObservabilityService::new(Arc::new(
        ObservabilityRepository::new()?,
    )));
    let controller = build_controller(&config, api, Some(metrics.clone()));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight transitions");
            shutdown.cancel();
        }
    });

    let summary = controller.run_pass(&config.instance_ids, cancel).await?;
    for report in &summary.reports {
        match report.abort_reason() {
            Some((step, reason)) => error!(
                instance_id = %report.instance_id,
                action = %report.action,
                step = %step,
                reason,
                "Instance transition failed"
            ),
            None => info!(
                instance_id = %report.instance_id,
                action = %report.action,
                warnings = report.warnings.len(),
                stop_polls = report.stop_polls,
                "Instance transition succeeded"
            ),
        }
    }
    info!(
        pass_id = %summary.pass_id,
        inspected = summary.inspected,
        skipped = summary.skipped.len(),
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "Reconciliation complete"
    );

    if let Some(path) = &config.metrics_path {
        match metrics.write_textfile(path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics"),
            Err(e) => warn!(error = %e, "Failed to write metrics"),
        }
    }

    Ok(())
}
