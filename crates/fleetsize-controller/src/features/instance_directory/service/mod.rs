use crate::features::compute_api::repo::ComputeApi;
use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::{InstanceSnapshot, PowerState};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Reads instance snapshots from the compute API
#[derive(Clone)]
pub struct DirectoryService {
    api: Arc<dyn ComputeApi>,
}

impl DirectoryService {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    /// One batched read of every requested instance.
    ///
    /// All-or-nothing: a failed call, a missing instance, or an answer with
    /// duplicate or unrequested instances fails the read.
    pub async fn read(&self, instance_ids: &[String]) -> ControllerResult<Vec<InstanceSnapshot>> {
        if instance_ids.is_empty() {
            return Err(ControllerError::InvalidRequest(
                "instance ID list cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = instance_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let snapshots = self.api.describe_instances(&unique).await.map_err(|e| {
            error!(error = %e, code = e.code(), "Failed to describe instances");
            ControllerError::DirectoryRead(e.to_string())
        })?;

        let requested: HashSet<&str> = unique.iter().map(String::as_str).collect();
        let mut returned: HashSet<&str> = HashSet::with_capacity(snapshots.len());
        let mut duplicated = Vec::new();
        let mut unexpected = Vec::new();
        for snapshot in &snapshots {
            let id = snapshot.instance_id.as_str();
            if !requested.contains(id) {
                unexpected.push(id);
            } else if !returned.insert(id) {
                duplicated.push(id);
            }
        }
        if !unexpected.is_empty() {
            return Err(ControllerError::DirectoryRead(format!(
                "directory returned unrequested instances: {}",
                unexpected.join(", ")
            )));
        }
        if !duplicated.is_empty() {
            return Err(ControllerError::DirectoryRead(format!(
                "directory returned duplicate instances: {}",
                duplicated.join(", ")
            )));
        }

        let missing: Vec<&str> = unique
            .iter()
            .map(String::as_str)
            .filter(|id| !returned.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(ControllerError::DirectoryRead(format!(
                "instances missing from directory: {}",
                missing.join(", ")
            )));
        }

        info!(count = snapshots.len(), "Read instance directory");
        Ok(snapshots)
    }

    /// Current power state of a single instance
    pub async fn power_state(&self, instance_id: &str) -> ControllerResult<PowerState> {
        let snapshots = self
            .api
            .describe_instances(&[instance_id.to_string()])
            .await?;

        snapshots
            .into_iter()
            .find(|s| s.instance_id == instance_id)
            .map(|s| s.power_state)
            .ok_or_else(|| ControllerError::InstanceNotFound(instance_id.to_string()))
    }
}
