use crate::shared::error::{ControllerError, ControllerResult};
use fleetsize_core::{InstanceSnapshot, ReconciliationPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connection settings for the compute control gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeApiConfig {
    /// Base URL of the gateway. Without one the reconciler runs against a simulated fleet.
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl ComputeApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ComputeApiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Everything a reconciliation pass needs to know up front
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub instance_ids: Vec<String>,
    pub policy: ReconciliationPolicy,
    pub poll_interval_secs: u64,
    pub wait_timeout_secs: Option<u64>,
    pub api: ComputeApiConfig,
    /// Seed for the simulated fleet used when no endpoint is configured.
    pub simulated_instances: Vec<InstanceSnapshot>,
    pub metrics_path: Option<PathBuf>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            instance_ids: Vec::new(),
            policy: ReconciliationPolicy::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: None,
            api: ComputeApiConfig::default(),
            simulated_instances: Vec::new(),
            metrics_path: None,
        }
    }
}

impl ReconcilerConfig {
    /// Load from `FLEETSIZE_CONFIG` (if set), apply environment overrides, validate.
    pub fn load() -> ControllerResult<Self> {
        let mut config = match std::env::var("FLEETSIZE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ControllerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ControllerResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ControllerError::Configuration(format!("invalid config: {e}")))
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> ControllerResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("FLEETSIZE_INSTANCE_IDS") {
            self.instance_ids = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(value) = lookup("FLEETSIZE_BASELINE_TYPE") {
            self.policy.baseline_type = value;
        }
        if let Some(value) = lookup("FLEETSIZE_TARGET_TYPE") {
            self.policy.target_type = value;
        }
        if let Some(value) = lookup("FLEETSIZE_TAG_KEY") {
            self.policy.tag_key = value;
        }
        if let Some(value) = lookup("FLEETSIZE_TAG_VALUE") {
            self.policy.tag_value = value;
        }
        if let Some(value) = lookup("FLEETSIZE_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_secs("FLEETSIZE_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("FLEETSIZE_WAIT_TIMEOUT_SECS") {
            self.wait_timeout_secs = Some(parse_secs("FLEETSIZE_WAIT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("FLEETSIZE_API_ENDPOINT") {
            self.api.endpoint = Some(value);
        }
        if let Some(value) = lookup("FLEETSIZE_API_TOKEN") {
            self.api.token = Some(value);
        }
        if let Some(value) = lookup("FLEETSIZE_METRICS_PATH") {
            self.metrics_path = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> ControllerResult<()> {
        if self.instance_ids.is_empty() {
            return Err(ControllerError::Configuration(
                "at least one instance ID must be configured".to_string(),
            ));
        }
        if self.instance_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ControllerError::Configuration(
                "instance IDs cannot be empty".to_string(),
            ));
        }

        self.policy.validate()?;

        if self.poll_interval_secs == 0 {
            return Err(ControllerError::Configuration(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.wait_timeout_secs == Some(0) {
            return Err(ControllerError::Configuration(
                "wait timeout must be at least one second".to_string(),
            ));
        }

        if let Some(endpoint) = &self.api.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ControllerError::Configuration(format!(
                    "API endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> ControllerResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ControllerError::Configuration(format!("{key}='{value}': {e}")))
}
