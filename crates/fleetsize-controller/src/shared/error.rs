use fleetsize_core::CoreError;
use thiserror::Error;

/// Reconciler specific errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Directory read failed: {0}")]
    DirectoryRead(String),
    #[error("Provider call '{operation}' failed: {message}")]
    ProviderCall { operation: String, message: String },
    #[error("Instance {instance_id} can no longer reach the stopped state (currently {state})")]
    UnreachableState { instance_id: String, state: String },
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Metrics error: {0}")]
    Metrics(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ControllerError {
    pub fn provider(operation: impl Into<String>, message: impl ToString) -> Self {
        ControllerError::ProviderCall {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::InvalidRequest(_) => "INVALID_REQUEST",
            ControllerError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ControllerError::DirectoryRead(_) => "DIRECTORY_READ",
            ControllerError::ProviderCall { .. } => "PROVIDER_CALL",
            ControllerError::UnreachableState { .. } => "UNREACHABLE_STATE",
            ControllerError::Timeout(_) => "TIMEOUT",
            ControllerError::Cancelled(_) => "CANCELLED",
            ControllerError::Configuration(_) => "CONFIGURATION",
            ControllerError::Metrics(_) => "METRICS",
            ControllerError::Core(_) => "CORE",
        }
    }
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;
