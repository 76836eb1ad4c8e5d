use std::sync::Arc;
use std::time::Duration;

use fleetsize_controller::build_controller;
use fleetsize_controller::features::compute_api::repo::{
    ApiCall, ApiOperation, InMemoryComputeApi,
};
use fleetsize_controller::shared::config::ReconcilerConfig;
use fleetsize_controller::shared::types::{
    Action, InstanceSnapshot, PowerState, TransitionStep,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config_for(ids: &[&str]) -> ReconcilerConfig {
    ReconcilerConfig {
        instance_ids: ids.iter().map(|id| id.to_string()).collect(),
        ..ReconcilerConfig::default()
    }
}

fn mutating_calls(api: &InMemoryComputeApi, instance_id: &str) -> Vec<ApiCall> {
    api.calls_for(instance_id)
        .into_iter()
        .filter(|call| call.operation() != ApiOperation::DescribeInstances)
        .collect()
}

fn single(id: &str) -> Vec<String> {
    vec![id.to_string()]
}

#[tokio::test(start_paused = true)]
async fn upgrade_at_baseline() {
    let config = config_for(&["X"]);
    let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
        "X",
        "t2.micro",
        PowerState::Running,
    )]);
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let summary = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap();

    let report = summary.report_for("X").unwrap();
    assert_eq!(report.action, Action::UpgradeToTarget);
    assert!(report.succeeded());
    assert_eq!(
        mutating_calls(&api, "X"),
        vec![
            ApiCall::StopInstances(single("X")),
            ApiCall::ModifyInstanceType {
                instance_id: "X".to_string(),
                instance_type: "t3.medium".to_string(),
            },
            ApiCall::CreateTags {
                instance_id: "X".to_string(),
                tags: vec![("instance_mode".to_string(), "other_instances".to_string())],
            },
            ApiCall::StartInstances(single("X")),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn revert_tagged_running_instance() {
    let config = config_for(&["Y"]);
    let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
        "Y",
        "t3.medium",
        PowerState::Running,
    )
    .with_tag("instance_mode", "other_instances")]);
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let summary = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.report_for("Y").map(|r| r.action),
        Some(Action::RevertToBaseline)
    );
    assert_eq!(
        mutating_calls(&api, "Y"),
        vec![
            ApiCall::StopInstances(single("Y")),
            ApiCall::ModifyInstanceType {
                instance_id: "Y".to_string(),
                instance_type: "t2.micro".to_string(),
            },
            ApiCall::DeleteTags {
                instance_id: "Y".to_string(),
                keys: vec!["instance_mode".to_string()],
            },
            ApiCall::StartInstances(single("Y")),
        ]
    );
    let after = api.snapshot("Y").unwrap();
    assert_eq!(after.instance_type, "t2.micro");
    assert_eq!(after.tag("instance_mode"), None);
}

#[tokio::test(start_paused = true)]
async fn wait_polls_at_configured_interval() {
    let config = config_for(&["X"]);
    let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
        "X",
        "t2.micro",
        PowerState::Running,
    )])
    .with_polls_until_stopped(3);
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let started = Instant::now();
    let summary = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.report_for("X").unwrap().stop_polls, 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn one_failure_does_not_affect_the_rest() {
    let ids = ["a", "b", "c", "d", "e", "f"];
    let config = config_for(&ids);
    let api = InMemoryComputeApi::with_instances(
        ids.iter()
            .map(|id| InstanceSnapshot::new(*id, "t2.micro", PowerState::Running)),
    );
    api.fail_on(ApiOperation::StopInstances, "c", "UnauthorizedOperation");
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let summary = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.reports.len(), ids.len());
    assert_eq!(summary.failed(), 1);
    assert_eq!(
        summary.report_for("c").and_then(|r| r.abort_reason()).map(|(step, _)| step),
        Some(TransitionStep::Stop)
    );
    assert_eq!(mutating_calls(&api, "c"), vec![ApiCall::StopInstances(single("c"))]);
    for id in ids.iter().filter(|id| **id != "c") {
        let after = api.snapshot(id).unwrap();
        assert_eq!(after.instance_type, "t3.medium");
        assert_eq!(after.tag("instance_mode"), Some("other_instances"));
    }
}

#[tokio::test(start_paused = true)]
async fn mixed_fleet_only_touches_qualifying_instances() {
    let config = config_for(&["up", "down", "idle", "other"]);
    let api = InMemoryComputeApi::with_instances(vec![
        InstanceSnapshot::new("up", "t2.micro", PowerState::Stopped),
        InstanceSnapshot::new("down", "t3.medium", PowerState::Running)
            .with_tag("instance_mode", "other_instances"),
        InstanceSnapshot::new("idle", "t3.medium", PowerState::Stopped)
            .with_tag("instance_mode", "other_instances"),
        InstanceSnapshot::new("other", "m5.large", PowerState::Running),
    ]);
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let summary = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.inspected, 4);
    assert_eq!(summary.succeeded(), 2);
    assert!(mutating_calls(&api, "idle").is_empty());
    assert!(mutating_calls(&api, "other").is_empty());
    assert_eq!(api.snapshot("up").unwrap().instance_type, "t3.medium");
    assert_eq!(api.snapshot("down").unwrap().instance_type, "t2.micro");
}

#[tokio::test]
async fn unknown_instance_fails_the_whole_pass() {
    let config = config_for(&["X", "missing"]);
    let api = InMemoryComputeApi::with_instances(vec![InstanceSnapshot::new(
        "X",
        "t2.micro",
        PowerState::Running,
    )]);
    let controller = build_controller(&config, Arc::new(api.clone()), None);

    let err = controller
        .run_pass(&config.instance_ids, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DIRECTORY_READ");
    assert!(mutating_calls(&api, "X").is_empty());
}
