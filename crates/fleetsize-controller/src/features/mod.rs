pub mod compute_api;
pub mod instance_directory;
pub mod observability;
pub mod reconciliation;
pub mod transition;
