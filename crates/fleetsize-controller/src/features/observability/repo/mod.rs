use crate::shared::error::{ControllerError, ControllerResult};
use prometheus::{
    opts, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Registry,
    TextEncoder,
};

fn metrics_error(e: impl ToString) -> ControllerError {
    ControllerError::Metrics(e.to_string())
}

pub struct ObservabilityRepository {
    registry: Registry,
    inspected_instances: Gauge,
    transitions_started_total: CounterVec,
    transitions_finished_total: CounterVec,
    step_failures_total: CounterVec,
    stop_wait_seconds: Histogram,
    provider_call_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> ControllerResult<Self> {
        let registry = Registry::new();

        let inspected_instances = Gauge::with_opts(opts!(
            "fleetsize_inspected_instances",
            "Instances read from the directory in the last pass"
        ))
        .map_err(metrics_error)?;
        let transitions_started_total = CounterVec::new(
            opts!(
                "fleetsize_transitions_started_total",
                "Instance transitions launched"
            ),
            &["action"],
        )
        .map_err(metrics_error)?;
        let transitions_finished_total = CounterVec::new(
            opts!(
                "fleetsize_transitions_finished_total",
                "Instance transitions finished"
            ),
            &["action", "outcome"],
        )
        .map_err(metrics_error)?;
        let step_failures_total = CounterVec::new(
            opts!(
                "fleetsize_step_failures_total",
                "Failed transition steps, fatal or not"
            ),
            &["step"],
        )
        .map_err(metrics_error)?;
        let stop_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "fleetsize_stop_wait_seconds",
                "Time spent waiting for instances to stop (seconds)",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )
        .map_err(metrics_error)?;
        let provider_call_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fleetsize_provider_call_latency_seconds",
                "Compute API call latency (seconds)",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(inspected_instances.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(transitions_started_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(transitions_finished_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(step_failures_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(stop_wait_seconds.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(provider_call_latency_seconds.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            inspected_instances,
            transitions_started_total,
            transitions_finished_total,
            step_failures_total,
            stop_wait_seconds,
            provider_call_latency_seconds,
        })
    }

    pub fn set_inspected_instances(&self, count: f64) {
        self.inspected_instances.set(count);
    }

    pub fn inc_transitions_started(&self, action: &str) {
        self.transitions_started_total
            .with_label_values(&[action])
            .inc();
    }

    pub fn inc_transitions_finished(&self, action: &str, outcome: &str) {
        self.transitions_finished_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn inc_step_failures(&self, step: &str) {
        self.step_failures_total.with_label_values(&[step]).inc();
    }

    pub fn observe_stop_wait(&self, seconds: f64) {
        self.stop_wait_seconds.observe(seconds);
    }

    pub fn observe_provider_call(&self, operation: &str, seconds: f64) {
        self.provider_call_latency_seconds
            .with_label_values(&[operation])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> ControllerResult<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(metrics_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let repo = ObservabilityRepository::new().unwrap();
        repo.inc_transitions_started("upgrade_to_target");
        repo.inc_transitions_finished("upgrade_to_target", "done");
        repo.inc_step_failures("stop");
        repo.observe_provider_call("stop_instances", 0.2);

        let rendered = repo.render_metrics().unwrap();
        assert!(rendered.contains("fleetsize_transitions_started_total"));
        assert!(rendered.contains("outcome=\"done\""));
        assert!(rendered.contains("step=\"stop\""));
        assert!(rendered.contains("operation=\"stop_instances\""));
    }

    #[test]
    fn test_repositories_are_independent() {
        let first = ObservabilityRepository::new().unwrap();
        let second = ObservabilityRepository::new().unwrap();
        first.inc_step_failures("restart");

        let rendered = second.render_metrics().unwrap();
        assert!(!rendered.contains("step=\"restart\""));
    }
}
