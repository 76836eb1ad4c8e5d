use crate::shared::types::{
    InstanceSnapshot, ReconciliationPlan, ReconciliationPolicy, TransitionIntent,
};
use tracing::{debug, info};

/// Turns a directory snapshot into transition intents
#[derive(Debug, Clone)]
pub struct ReconciliationService {
    policy: ReconciliationPolicy,
}

impl ReconciliationService {
    pub fn new(policy: ReconciliationPolicy) -> Self {
        Self { policy }
    }

    pub fn plan(&self, snapshots: &[InstanceSnapshot]) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();

        for snapshot in snapshots {
            match TransitionIntent::derive(snapshot, &self.policy) {
                Some(intent) => plan.intents.push(intent),
                None => {
                    debug!(
                        instance_id = %snapshot.instance_id,
                        instance_type = %snapshot.instance_type,
                        power_state = %snapshot.power_state,
                        "No action needed"
                    );
                    plan.skipped.push(snapshot.instance_id.clone());
                }
            }
        }

        info!(
            transitions = plan.intents.len(),
            skipped = plan.skipped.len(),
            "Planned reconciliation pass"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::{Action, PowerState};

    fn create_test_service() -> ReconciliationService {
        ReconciliationService::new(ReconciliationPolicy::default())
    }

    #[test]
    fn test_plan_splits_intents_and_skips() {
        let service = create_test_service();
        let snapshots = vec![
            InstanceSnapshot::new("i-up", "t2.micro", PowerState::Running),
            InstanceSnapshot::new("i-down", "t3.medium", PowerState::Running)
                .with_tag("instance_mode", "other_instances"),
            InstanceSnapshot::new("i-idle", "t3.medium", PowerState::Stopped)
                .with_tag("instance_mode", "other_instances"),
            InstanceSnapshot::new("i-other", "m5.large", PowerState::Running),
        ];

        let plan = service.plan(&snapshots);

        let actions: Vec<(&str, Action)> = plan
            .intents
            .iter()
            .map(|i| (i.instance_id.as_str(), i.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("i-up", Action::UpgradeToTarget),
                ("i-down", Action::RevertToBaseline),
            ]
        );
        assert_eq!(plan.skipped, vec!["i-idle", "i-other"]);
    }

    #[test]
    fn test_plan_empty_snapshot() {
        let plan = create_test_service().plan(&[]);
        assert!(plan.intents.is_empty());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_plan_uses_configured_policy() {
        let policy = ReconciliationPolicy::new("t3.small", "c5.xlarge", "mode", "burst");
        let service = ReconciliationService::new(policy);

        let plan = service.plan(&[
            InstanceSnapshot::new("i-1", "t3.small", PowerState::Running),
            InstanceSnapshot::new("i-2", "t2.micro", PowerState::Running),
        ]);

        assert_eq!(plan.intents.len(), 1);
        assert_eq!(plan.intents[0].plan.target_type, "c5.xlarge");
        assert_eq!(plan.skipped, vec!["i-2"]);
    }
}
