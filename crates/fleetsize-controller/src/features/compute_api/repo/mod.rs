pub mod http;

use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::{InstanceSnapshot, InstanceStateChange, PowerState};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Cloud compute control operations the reconciler depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Batched read of type, power state and tags
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceSnapshot>>;

    /// Request a stop; returns before the instances are stopped
    async fn stop_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>>;

    /// Change the machine size. The provider requires the instance to be stopped.
    async fn modify_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> ControllerResult<()>;

    async fn create_tags(
        &self,
        instance_id: &str,
        tags: &HashMap<String, String>,
    ) -> ControllerResult<()>;

    async fn delete_tags(&self, instance_id: &str, keys: &[String]) -> ControllerResult<()>;

    /// Request a start; returns before the instances are running
    async fn start_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    DescribeInstances,
    StopInstances,
    ModifyInstanceType,
    CreateTags,
    DeleteTags,
    StartInstances,
}

impl ApiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiOperation::DescribeInstances => "describe_instances",
            ApiOperation::StopInstances => "stop_instances",
            ApiOperation::ModifyInstanceType => "modify_instance_type",
            ApiOperation::CreateTags => "create_tags",
            ApiOperation::DeleteTags => "delete_tags",
            ApiOperation::StartInstances => "start_instances",
        }
    }

    /// Gateway route for this operation
    pub fn path(&self) -> &'static str {
        match self {
            ApiOperation::DescribeInstances => "describe-instances",
            ApiOperation::StopInstances => "stop-instances",
            ApiOperation::ModifyInstanceType => "modify-instance-type",
            ApiOperation::CreateTags => "create-tags",
            ApiOperation::DeleteTags => "delete-tags",
            ApiOperation::StartInstances => "start-instances",
        }
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call received by the simulated fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    DescribeInstances(Vec<String>),
    StopInstances(Vec<String>),
    ModifyInstanceType {
        instance_id: String,
        instance_type: String,
    },
    CreateTags {
        instance_id: String,
        tags: Vec<(String, String)>,
    },
    DeleteTags {
        instance_id: String,
        keys: Vec<String>,
    },
    StartInstances(Vec<String>),
}

impl ApiCall {
    pub fn operation(&self) -> ApiOperation {
        match self {
            ApiCall::DescribeInstances(_) => ApiOperation::DescribeInstances,
            ApiCall::StopInstances(_) => ApiOperation::StopInstances,
            ApiCall::ModifyInstanceType { .. } => ApiOperation::ModifyInstanceType,
            ApiCall::CreateTags { .. } => ApiOperation::CreateTags,
            ApiCall::DeleteTags { .. } => ApiOperation::DeleteTags,
            ApiCall::StartInstances(_) => ApiOperation::StartInstances,
        }
    }

    pub fn involves(&self, instance_id: &str) -> bool {
        match self {
            ApiCall::DescribeInstances(ids)
            | ApiCall::StopInstances(ids)
            | ApiCall::StartInstances(ids) => ids.iter().any(|id| id == instance_id),
            ApiCall::ModifyInstanceType { instance_id: id, .. }
            | ApiCall::CreateTags { instance_id: id, .. }
            | ApiCall::DeleteTags { instance_id: id, .. } => id == instance_id,
        }
    }
}

struct SimulatedInstance {
    snapshot: InstanceSnapshot,
    polls_until_stopped: u32,
    scripted_states: VecDeque<PowerState>,
}

/// In-memory stand-in for the compute provider.
///
/// Stopping instances report `stopping` until they have been described
/// `polls_until_stopped` times; started instances report `pending` once and
/// then `running`.
#[derive(Clone)]
pub struct InMemoryComputeApi {
    instances: Arc<RwLock<HashMap<String, SimulatedInstance>>>,
    failures: Arc<RwLock<HashMap<(ApiOperation, String), String>>>,
    calls: Arc<RwLock<Vec<ApiCall>>>,
    polls_until_stopped: u32,
}

impl InMemoryComputeApi {
    pub fn new() -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            polls_until_stopped: 2,
        }
    }

    pub fn with_instances(instances: impl IntoIterator<Item = InstanceSnapshot>) -> Self {
        let api = Self::new();
        for snapshot in instances {
            api.insert(snapshot);
        }
        api
    }

    pub fn with_polls_until_stopped(mut self, polls: u32) -> Self {
        self.polls_until_stopped = polls.max(1);
        self
    }

    pub fn insert(&self, snapshot: InstanceSnapshot) {
        if let Ok(mut instances) = self.instances.write() {
            instances.insert(
                snapshot.instance_id.clone(),
                SimulatedInstance {
                    snapshot,
                    polls_until_stopped: self.polls_until_stopped,
                    scripted_states: VecDeque::new(),
                },
            );
        }
    }

    /// Power states returned by successive describes, ahead of the simulation.
    pub fn script_power_states(&self, instance_id: &str, states: Vec<PowerState>) {
        if let Ok(mut instances) = self.instances.write() {
            if let Some(instance) = instances.get_mut(instance_id) {
                instance.scripted_states = states.into();
            }
        }
    }

    /// Make `operation` fail for `instance_id` until cleared.
    pub fn fail_on(&self, operation: ApiOperation, instance_id: &str, message: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert((operation, instance_id.to_string()), message.to_string());
        }
    }

    pub fn clear_failure(&self, operation: ApiOperation, instance_id: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(&(operation, instance_id.to_string()));
        }
    }

    pub fn snapshot(&self, instance_id: &str) -> Option<InstanceSnapshot> {
        self.instances
            .read()
            .ok()?
            .get(instance_id)
            .map(|instance| instance.snapshot.clone())
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_for(&self, instance_id: &str) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.involves(instance_id))
            .collect()
    }

    fn record(&self, call: ApiCall) -> ControllerResult<()> {
        let mut calls = self.calls.write().map_err(|_| lock_poisoned())?;
        calls.push(call);
        Ok(())
    }

    fn check_failure(&self, operation: ApiOperation, instance_id: &str) -> ControllerResult<()> {
        let failures = self.failures.read().map_err(|_| lock_poisoned())?;
        match failures.get(&(operation, instance_id.to_string())) {
            Some(message) => Err(ControllerError::provider(operation.as_str(), message)),
            None => Ok(()),
        }
    }

    fn check_all(
        &self,
        operation: ApiOperation,
        instances: &HashMap<String, SimulatedInstance>,
        instance_ids: &[String],
    ) -> ControllerResult<()> {
        for instance_id in instance_ids {
            self.check_failure(operation, instance_id)?;
            if !instances.contains_key(instance_id) {
                return Err(ControllerError::InstanceNotFound(instance_id.clone()));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryComputeApi {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_poisoned() -> ControllerError {
    ControllerError::provider("simulation", "Lock poisoned")
}

fn incorrect_state(
    operation: ApiOperation,
    instance_id: &str,
    state: PowerState,
) -> ControllerError {
    ControllerError::provider(
        operation.as_str(),
        format!("IncorrectInstanceState: instance {instance_id} is {state}"),
    )
}

#[async_trait]
impl ComputeApi for InMemoryComputeApi {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceSnapshot>> {
        self.record(ApiCall::DescribeInstances(instance_ids.to_vec()))?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        self.check_all(ApiOperation::DescribeInstances, &instances, instance_ids)?;

        let mut snapshots = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            let Some(instance) = instances.get_mut(instance_id) else {
                continue;
            };

            if let Some(state) = instance.scripted_states.pop_front() {
                instance.snapshot.power_state = state;
            } else {
                match instance.snapshot.power_state {
                    PowerState::Stopping => {
                        instance.polls_until_stopped =
                            instance.polls_until_stopped.saturating_sub(1);
                        if instance.polls_until_stopped == 0 {
                            instance.snapshot.power_state = PowerState::Stopped;
                        }
                    }
                    PowerState::Pending => instance.snapshot.power_state = PowerState::Running,
                    _ => {}
                }
            }

            snapshots.push(instance.snapshot.clone());
        }

        Ok(snapshots)
    }

    async fn stop_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>> {
        self.record(ApiCall::StopInstances(instance_ids.to_vec()))?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        self.check_all(ApiOperation::StopInstances, &instances, instance_ids)?;

        for instance_id in instance_ids {
            if let Some(instance) = instances.get(instance_id) {
                if instance.snapshot.power_state.is_terminal() {
                    return Err(incorrect_state(
                        ApiOperation::StopInstances,
                        instance_id,
                        instance.snapshot.power_state,
                    ));
                }
            }
        }

        let mut changes = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            let Some(instance) = instances.get_mut(instance_id) else {
                continue;
            };
            let previous_state = instance.snapshot.power_state;
            if matches!(previous_state, PowerState::Running | PowerState::Pending) {
                instance.snapshot.power_state = PowerState::Stopping;
                instance.polls_until_stopped = self.polls_until_stopped;
            }
            changes.push(InstanceStateChange {
                instance_id: instance_id.clone(),
                previous_state,
                current_state: instance.snapshot.power_state,
            });
        }

        Ok(changes)
    }

    async fn modify_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> ControllerResult<()> {
        self.record(ApiCall::ModifyInstanceType {
            instance_id: instance_id.to_string(),
            instance_type: instance_type.to_string(),
        })?;
        self.check_failure(ApiOperation::ModifyInstanceType, instance_id)?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| ControllerError::InstanceNotFound(instance_id.to_string()))?;

        if instance.snapshot.power_state != PowerState::Stopped {
            return Err(incorrect_state(
                ApiOperation::ModifyInstanceType,
                instance_id,
                instance.snapshot.power_state,
            ));
        }

        instance.snapshot.instance_type = instance_type.to_string();
        Ok(())
    }

    async fn create_tags(
        &self,
        instance_id: &str,
        tags: &HashMap<String, String>,
    ) -> ControllerResult<()> {
        let mut recorded: Vec<(String, String)> =
            tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        recorded.sort();
        self.record(ApiCall::CreateTags {
            instance_id: instance_id.to_string(),
            tags: recorded,
        })?;
        self.check_failure(ApiOperation::CreateTags, instance_id)?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| ControllerError::InstanceNotFound(instance_id.to_string()))?;
        instance.snapshot.tags.extend(tags.clone());
        Ok(())
    }

    async fn delete_tags(&self, instance_id: &str, keys: &[String]) -> ControllerResult<()> {
        self.record(ApiCall::DeleteTags {
            instance_id: instance_id.to_string(),
            keys: keys.to_vec(),
        })?;
        self.check_failure(ApiOperation::DeleteTags, instance_id)?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| ControllerError::InstanceNotFound(instance_id.to_string()))?;
        for key in keys {
            instance.snapshot.tags.remove(key);
        }
        Ok(())
    }

    async fn start_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>> {
        self.record(ApiCall::StartInstances(instance_ids.to_vec()))?;

        let mut instances = self.instances.write().map_err(|_| lock_poisoned())?;
        self.check_all(ApiOperation::StartInstances, &instances, instance_ids)?;

        for instance_id in instance_ids {
            if let Some(instance) = instances.get(instance_id) {
                let state = instance.snapshot.power_state;
                if state.is_terminal() || state == PowerState::Stopping {
                    return Err(incorrect_state(
                        ApiOperation::StartInstances,
                        instance_id,
                        state,
                    ));
                }
            }
        }

        let mut changes = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            let Some(instance) = instances.get_mut(instance_id) else {
                continue;
            };
            let previous_state = instance.snapshot.power_state;
            if previous_state == PowerState::Stopped {
                instance.snapshot.power_state = PowerState::Pending;
            }
            changes.push(InstanceStateChange {
                instance_id: instance_id.clone(),
                previous_state,
                current_state: instance.snapshot.power_state,
            });
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn running(id: &str, instance_type: &str) -> InstanceSnapshot {
        InstanceSnapshot::new(id, instance_type, PowerState::Running)
    }

    #[tokio::test]
    async fn test_describe_returns_requested_instances() {
        let api = InMemoryComputeApi::with_instances(vec![
            running("i-1", "t2.micro"),
            running("i-2", "t3.medium"),
        ]);

        let snapshots = api.describe_instances(&ids(&["i-2"])).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].instance_type, "t3.medium");
    }

    #[tokio::test]
    async fn test_describe_unknown_id_fails_whole_call() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")]);

        let err = api
            .describe_instances(&ids(&["i-1", "i-missing"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InstanceNotFound(id) if id == "i-missing"));
    }

    #[tokio::test]
    async fn test_stop_then_polls_until_stopped() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")])
            .with_polls_until_stopped(2);

        let changes = api.stop_instances(&ids(&["i-1"])).await.unwrap();
        assert_eq!(changes[0].previous_state, PowerState::Running);
        assert_eq!(changes[0].current_state, PowerState::Stopping);

        let first = api.describe_instances(&ids(&["i-1"])).await.unwrap();
        assert_eq!(first[0].power_state, PowerState::Stopping);
        let second = api.describe_instances(&ids(&["i-1"])).await.unwrap();
        assert_eq!(second[0].power_state, PowerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_terminated_instance_fails() {
        let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
            "i-1",
            "t2.micro",
            PowerState::Terminated,
        )]);

        let err = api.stop_instances(&ids(&["i-1"])).await.unwrap_err();
        assert!(err.to_string().contains("IncorrectInstanceState"));
    }

    #[tokio::test]
    async fn test_modify_requires_stopped() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")]);

        let err = api.modify_instance_type("i-1", "t3.medium").await.unwrap_err();
        assert_eq!(err.code(), "PROVIDER_CALL");
        assert_eq!(api.snapshot("i-1").unwrap().instance_type, "t2.micro");
    }

    #[tokio::test]
    async fn test_modify_stopped_instance() {
        let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
            "i-1",
            "t2.micro",
            PowerState::Stopped,
        )]);

        api.modify_instance_type("i-1", "t3.medium").await.unwrap();
        assert_eq!(api.snapshot("i-1").unwrap().instance_type, "t3.medium");
    }

    #[tokio::test]
    async fn test_tags_round_trip() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")]);
        let tags = HashMap::from([("instance_mode".to_string(), "other_instances".to_string())]);

        api.create_tags("i-1", &tags).await.unwrap();
        assert_eq!(
            api.snapshot("i-1").unwrap().tag("instance_mode"),
            Some("other_instances")
        );

        api.delete_tags("i-1", &ids(&["instance_mode"])).await.unwrap();
        assert_eq!(api.snapshot("i-1").unwrap().tag("instance_mode"), None);
    }

    #[tokio::test]
    async fn test_start_moves_through_pending() {
        let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
            "i-1",
            "t3.medium",
            PowerState::Stopped,
        )]);

        let changes = api.start_instances(&ids(&["i-1"])).await.unwrap();
        assert_eq!(changes[0].current_state, PowerState::Pending);

        let described = api.describe_instances(&ids(&["i-1"])).await.unwrap();
        assert_eq!(described[0].power_state, PowerState::Running);
    }

    #[tokio::test]
    async fn test_scripted_states_take_precedence() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")]);
        api.script_power_states("i-1", vec![PowerState::Stopping, PowerState::Stopped]);

        let first = api.describe_instances(&ids(&["i-1"])).await.unwrap();
        let second = api.describe_instances(&ids(&["i-1"])).await.unwrap();
        let third = api.describe_instances(&ids(&["i-1"])).await.unwrap();

        assert_eq!(first[0].power_state, PowerState::Stopping);
        assert_eq!(second[0].power_state, PowerState::Stopped);
        assert_eq!(third[0].power_state, PowerState::Stopped);
    }

    #[tokio::test]
    async fn test_injected_failure_and_clear() {
        let api = InMemoryComputeApi::with_instances(vec![running("i-1", "t2.micro")]);
        api.fail_on(ApiOperation::StopInstances, "i-1", "UnauthorizedOperation");

        let err = api.stop_instances(&ids(&["i-1"])).await.unwrap_err();
        assert!(err.to_string().contains("UnauthorizedOperation"));
        assert_eq!(api.snapshot("i-1").unwrap().power_state, PowerState::Running);

        api.clear_failure(ApiOperation::StopInstances, "i-1");
        assert!(api.stop_instances(&ids(&["i-1"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_log_is_shared_between_clones() {
        let api = InMemoryComputeApi::with_instances(vec![
            running("i-1", "t2.micro"),
            running("i-2", "t2.micro"),
        ]);
        let clone = api.clone();

        clone.stop_instances(&ids(&["i-1"])).await.unwrap();
        api.stop_instances(&ids(&["i-2"])).await.unwrap();

        assert_eq!(api.calls().len(), 2);
        assert_eq!(
            api.calls_for("i-1"),
            vec![ApiCall::StopInstances(ids(&["i-1"]))]
        );
        assert_eq!(api.calls()[0].operation(), ApiOperation::StopInstances);
    }
}
