//! Migration-required signal for topology changes
//!
//! A pending change is reported as `False` first and escalated to `True` once
//! the condition has stayed `False` past the grace period, so several
//! hotplug requests arriving close together end up in a single migration.

use chrono::{DateTime, Utc};
use tracing::debug;
use virtnet_core::topology::{lookup_status, secondary_interfaces};
use virtnet_core::{
    ConditionStatus, InfoSource, Instance, InstanceCondition, Time, MIGRATION_REQUIRED_CONDITION,
};

pub const AUTO_MIGRATION_PENDING_REASON: &str = "AutoMigrationPending";
pub const AUTO_MIGRATION_DUE_TO_LIVE_UPDATE_REASON: &str = "AutoMigrationDueToLiveUpdate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationRequirement {
    NotRequired,
    Pending,
    Immediate,
}

/// Classify the instance's current topology delta. The first secondary
/// interface needing a migration decides.
pub fn classify(instance: &Instance) -> MigrationRequirement {
    let statuses = &instance.status.interfaces;
    for iface in secondary_interfaces(instance.spec.interfaces(), &instance.spec.networks) {
        let status = lookup_status(statuses, &iface.name);
        let requirement = match status {
            None if !iface.is_absent() => {
                if iface.is_sriov() {
                    MigrationRequirement::Immediate
                } else if iface.is_hot_attachable() {
                    MigrationRequirement::Pending
                } else {
                    MigrationRequirement::NotRequired
                }
            }
            Some(status)
                if iface.is_absent()
                    && status.info_source.contains(InfoSource::MULTUS_STATUS)
                    && !status.info_source.contains(InfoSource::DOMAIN) =>
            {
                MigrationRequirement::Pending
            }
            _ => MigrationRequirement::NotRequired,
        };

        if requirement != MigrationRequirement::NotRequired {
            debug!(
                "Instance {}/{}: interface {} needs migration ({:?})",
                instance.namespace(),
                instance.name(),
                iface.name,
                requirement
            );
            return requirement;
        }
    }
    MigrationRequirement::NotRequired
}

/// Tri-state migration signal for the instance at `now`
pub fn evaluate(instance: &Instance, now: DateTime<Utc>, grace: chrono::Duration) -> ConditionStatus {
    match classify(instance) {
        MigrationRequirement::NotRequired => ConditionStatus::Unknown,
        MigrationRequirement::Immediate => ConditionStatus::True,
        MigrationRequirement::Pending => {
            let pending_since = instance
                .condition(MIGRATION_REQUIRED_CONDITION)
                .filter(|c| c.status == ConditionStatus::False)
                .and_then(|c| c.last_transition_time.as_ref());
            match pending_since {
                Some(Time(since)) if now - *since > grace => ConditionStatus::True,
                _ => ConditionStatus::False,
            }
        }
    }
}

fn migration_condition(status: ConditionStatus, reason: &str, now: DateTime<Utc>) -> InstanceCondition {
    InstanceCondition {
        condition_type: MIGRATION_REQUIRED_CONDITION.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: None,
        last_probe_time: None,
        last_transition_time: Some(Time(now)),
    }
}

/// Fold the evaluated signal into the instance conditions.
///
/// `Unknown` removes the condition, `False` adds a pending condition only when
/// none exists, and `True` sets the condition to `True`.
pub fn apply_migration_requirement(
    instance: &mut Instance,
    signal: ConditionStatus,
    now: DateTime<Utc>,
) {
    let conditions = &mut instance.status.conditions;
    let existing = conditions
        .iter()
        .position(|c| c.condition_type == MIGRATION_REQUIRED_CONDITION);

    match (signal, existing) {
        (ConditionStatus::Unknown, Some(index)) => {
            conditions.remove(index);
        }
        (ConditionStatus::Unknown, None) | (ConditionStatus::False, Some(_)) => {}
        (ConditionStatus::False, None) => conditions.push(migration_condition(
            ConditionStatus::False,
            AUTO_MIGRATION_PENDING_REASON,
            now,
        )),
        (ConditionStatus::True, Some(index)) => {
            let condition = &mut conditions[index];
            if condition.status != ConditionStatus::True {
                *condition = migration_condition(
                    ConditionStatus::True,
                    AUTO_MIGRATION_DUE_TO_LIVE_UPDATE_REASON,
                    now,
                );
            }
        }
        (ConditionStatus::True, None) => conditions.push(migration_condition(
            ConditionStatus::True,
            AUTO_MIGRATION_DUE_TO_LIVE_UPDATE_REASON,
            now,
        )),
    }
}
