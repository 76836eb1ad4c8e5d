use super::{ApiOperation, ComputeApi};
use crate::shared::config::ComputeApiConfig;
use crate::shared::error::{ControllerError, ControllerResult};
use crate::shared::types::{InstanceSnapshot, InstanceStateChange};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Serialize)]
struct InstanceIdsRequest<'a> {
    instance_ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct ModifyInstanceTypeRequest<'a> {
    instance_id: &'a str,
    instance_type: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTagsRequest<'a> {
    instance_id: &'a str,
    tags: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DeleteTagsRequest<'a> {
    instance_id: &'a str,
    tag_keys: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    instances: Vec<InstanceSnapshot>,
}

#[derive(Debug, Deserialize)]
struct StateChangesResponse {
    #[serde(default)]
    state_changes: Vec<InstanceStateChange>,
}

/// JSON client for a compute control gateway
pub struct HttpComputeApi {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpComputeApi {
    pub fn new(config: &ComputeApiConfig) -> ControllerResult<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            ControllerError::Configuration("compute API endpoint is not configured".to_string())
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                ControllerError::Configuration(format!("failed to build http client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, operation: ApiOperation) -> String {
        format!("{}/{}", self.endpoint, operation.path())
    }

    /// `target` names the instance(s) the request is about, for error messages.
    async fn send<B: Serialize + ?Sized>(
        &self,
        operation: ApiOperation,
        target: &str,
        body: &B,
    ) -> ControllerResult<reqwest::Response> {
        let mut builder = self.client.post(self.url(operation)).json(body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ControllerError::provider(operation.as_str(), e))?;

        let status = response.status();
        debug!(operation = %operation, status = status.as_u16(), "Compute API responded");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            let detail = if body.trim().is_empty() {
                format!("{target} ({operation})")
            } else {
                format!("{target} ({operation}): {}", body.trim())
            };
            return Err(ControllerError::InstanceNotFound(detail));
        }
        Err(ControllerError::provider(
            operation.as_str(),
            format!("HTTP {}: {}", status.as_u16(), body),
        ))
    }

    async fn call<B, R>(
        &self,
        operation: ApiOperation,
        target: &str,
        body: &B,
    ) -> ControllerResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(operation, target, body)
            .await?
            .json::<R>()
            .await
            .map_err(|e| {
                ControllerError::provider(operation.as_str(), format!("invalid response: {e}"))
            })
    }
}

#[async_trait]
impl ComputeApi for HttpComputeApi {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceSnapshot>> {
        let response: DescribeInstancesResponse = self
            .call(
                ApiOperation::DescribeInstances,
                &instance_ids.join(", "),
                &InstanceIdsRequest { instance_ids },
            )
            .await?;
        Ok(response.instances)
    }

    async fn stop_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>> {
        let response: StateChangesResponse = self
            .call(
                ApiOperation::StopInstances,
                &instance_ids.join(", "),
                &InstanceIdsRequest { instance_ids },
            )
            .await?;
        Ok(response.state_changes)
    }

    async fn modify_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> ControllerResult<()> {
        self.send(
            ApiOperation::ModifyInstanceType,
            instance_id,
            &ModifyInstanceTypeRequest {
                instance_id,
                instance_type,
            },
        )
        .await
        .map(|_| ())
    }

    async fn create_tags(
        &self,
        instance_id: &str,
        tags: &HashMap<String, String>,
    ) -> ControllerResult<()> {
        self.send(
            ApiOperation::CreateTags,
            instance_id,
            &CreateTagsRequest { instance_id, tags },
        )
        .await
        .map(|_| ())
    }

    async fn delete_tags(&self, instance_id: &str, keys: &[String]) -> ControllerResult<()> {
        self.send(
            ApiOperation::DeleteTags,
            instance_id,
            &DeleteTagsRequest {
                instance_id,
                tag_keys: keys,
            },
        )
        .await
        .map(|_| ())
    }

    async fn start_instances(
        &self,
        instance_ids: &[String],
    ) -> ControllerResult<Vec<InstanceStateChange>> {
        let response: StateChangesResponse = self
            .call(
                ApiOperation::StartInstances,
                &instance_ids.join(", "),
                &InstanceIdsRequest { instance_ids },
            )
            .await?;
        Ok(response.state_changes)
    }
}
