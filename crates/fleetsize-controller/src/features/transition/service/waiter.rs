use crate::features::instance_directory::service::DirectoryService;
use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::PowerState;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls an instance until the provider reports it stopped
#[derive(Clone)]
pub struct StopWaiter {
    directory: DirectoryService,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl StopWaiter {
    pub fn new(directory: DirectoryService, poll_interval: Duration) -> Self {
        Self {
            directory,
            poll_interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the number of power-state queries issued.
    pub async fn wait_until_stopped(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> ControllerResult<u32> {
        info!(instance_id = %instance_id, "Waiting for instance to stop");

        let polling = self.poll(instance_id, cancel);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, polling).await.map_err(|_| {
                warn!(
                    instance_id = %instance_id,
                    timeout_secs = limit.as_secs(),
                    "Gave up waiting for instance to stop"
                );
                ControllerError::Timeout(format!(
                    "instance {instance_id} did not stop within {}s",
                    limit.as_secs()
                ))
            })?,
            None => polling.await,
        }
    }

    async fn poll(&self, instance_id: &str, cancel: &CancellationToken) -> ControllerResult<u32> {
        let mut polls = 0u32;
        loop {
            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(instance_id)),
                state = self.directory.power_state(instance_id) => state,
            };
            polls += 1;

            let state = state.map_err(|e| {
                warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Error while waiting for instance to stop"
                );
                e
            })?;
            debug!(instance_id = %instance_id, polls, power_state = %state, "Polled power state");

            if state == PowerState::Stopped {
                return Ok(polls);
            }
            if state.is_terminal() {
                return Err(ControllerError::UnreachableState {
                    instance_id: instance_id.to_string(),
                    state: state.to_string(),
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(instance_id)),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn cancelled(instance_id: &str) -> ControllerError {
    ControllerError::Cancelled(format!("stopped waiting for instance {instance_id}"))
}
