//! Steps shared by every path that starts group replication on a member.

use serde_json::Value;

use crate::changes::ChangeSet;
use crate::errors::AdminResult;
use crate::gateway::Statement;
use crate::metadata::ClusterRecord;
use crate::observability::{log_event, Event};
use crate::quorum::wait_for_member_state;
use crate::topology::{InstanceAddress, MemberState};

/// Cluster attribute holding cluster-wide group variables set with `setOption`.
pub const GROUP_VARIABLES_ATTRIBUTE: &str = "groupVariables";
/// Cluster attribute naming the group communication stack.
pub const COMMUNICATION_STACK_ATTRIBUTE: &str = "communicationStack";

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

pub fn communication_stack(cluster: &ClusterRecord) -> String {
    cluster
        .attributes
        .get(COMMUNICATION_STACK_ATTRIBUTE)
        .and_then(Value::as_str)
        .unwrap_or("XCOM")
        .to_string()
}

/// Cluster-wide group variables recorded in the metadata.
pub fn recorded_group_variables(cluster: &ClusterRecord) -> Vec<(String, String)> {
    cluster
        .attributes
        .get(GROUP_VARIABLES_ATTRIBUTE)
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Persisted settings a member of `cluster` starts group replication with.
pub fn group_settings(
    cluster: &ClusterRecord,
    single_primary: bool,
    address: &InstanceAddress,
    seeds: &[InstanceAddress],
) -> Vec<Statement> {
    let seeds: Vec<String> = seeds
        .iter()
        .filter(|s| *s != address)
        .map(|s| s.local_address().to_string())
        .collect();
    let mut statements = vec![
        Statement::set_persist("group_replication_group_name", cluster.group_name.to_string()),
        Statement::set_persist("group_replication_single_primary_mode", on_off(single_primary)),
        Statement::set_persist(
            "group_replication_enforce_update_everywhere_checks",
            on_off(!single_primary),
        ),
        Statement::set_persist(
            "group_replication_local_address",
            address.local_address().to_string(),
        ),
        Statement::set_persist("group_replication_group_seeds", seeds.join(",")),
        Statement::set_persist("group_replication_ssl_mode", cluster.ssl_mode.as_str()),
        Statement::set_persist(
            "group_replication_communication_stack",
            communication_stack(cluster),
        ),
        Statement::set_persist("group_replication_start_on_boot", "ON"),
    ];
    for (variable, value) in recorded_group_variables(cluster) {
        statements.push(Statement::SetPersist { variable, value });
    }
    statements
}

pub fn configure_member(
    changes: &mut ChangeSet<'_>,
    address: &InstanceAddress,
    cluster: &ClusterRecord,
    single_primary: bool,
    seeds: &[InstanceAddress],
) -> AdminResult<()> {
    for statement in group_settings(cluster, single_primary, address, seeds) {
        changes.apply(address, statement)?;
    }
    Ok(())
}

/// Point the recovery channel of `address` at its replication account.
pub fn set_recovery_account(
    changes: &mut ChangeSet<'_>,
    address: &InstanceAddress,
    user: &str,
    password: Option<String>,
) -> AdminResult<()> {
    changes.apply(
        address,
        Statement::SetRecoveryCredentials {
            user: user.to_string(),
            password,
        },
    )?;
    Ok(())
}

/// Start group replication and wait for the member to come ONLINE.
///
/// A failure later in the operation stops group replication again.
pub fn start_member(changes: &mut ChangeSet<'_>, address: &InstanceAddress, bootstrap: bool) -> AdminResult<()> {
    changes.apply_reversible(
        address,
        Statement::StartGroupReplication { bootstrap },
        Statement::StopGroupReplication,
    )?;
    if changes.is_dry_run() {
        return Ok(());
    }
    wait_for_member_state(changes.ctx(), address, &[MemberState::Online])?;
    log_event(
        Event::MemberOnline,
        &[
            ("instance", address.to_string().as_str()),
            ("bootstrap", on_off(bootstrap)),
        ],
    );
    Ok(())
}

/// Replace the data of `target` with a snapshot of `donor`.
pub fn clone_from(
    changes: &mut ChangeSet<'_>,
    target: &InstanceAddress,
    donor: &InstanceAddress,
    progress: u64,
) -> AdminResult<()> {
    let output = changes.ctx().output();
    if progress > 0 {
        output.info(format!(
            "Clone based state recovery is now in progress: '{}' will be provisioned from '{}'.",
            target, donor
        ));
    }
    changes.apply(target, Statement::Clone { donor: donor.clone() })?;
    if progress > 0 && !changes.is_dry_run() {
        output.info(format!("* Clone process of '{}' has finished.", target));
    }
    Ok(())
}

/// Refresh the seed list of every listed member.
pub fn update_seeds(
    changes: &mut ChangeSet<'_>,
    members: &[InstanceAddress],
) -> AdminResult<()> {
    for member in members {
        let seeds: Vec<String> = members
            .iter()
            .filter(|m| *m != member)
            .map(|m| m.local_address().to_string())
            .collect();
        changes.apply(
            member,
            Statement::set_persist("group_replication_group_seeds", seeds.join(",")),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::topology::{MemberAuthType, SslMode, TopologyMode};

    #[test]
    fn test_settings_include_recorded_variables() {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            GROUP_VARIABLES_ATTRIBUTE.to_string(),
            json!({"group_replication_exit_state_action": "OFFLINE_MODE"}),
        );
        let cluster = ClusterRecord {
            cluster_id: Uuid::new_v4(),
            name: "c".to_string(),
            group_name: Uuid::new_v4(),
            topology_mode: TopologyMode::SinglePrimary,
            ssl_mode: SslMode::Required,
            member_auth_type: MemberAuthType::Password,
            cert_issuer: None,
            disable_clone: false,
            clusterset_id: None,
            created_at: Utc::now(),
            attributes,
        };
        let a = InstanceAddress::new("h", 3310);
        let b = InstanceAddress::new("h", 3320);
        let rendered: Vec<String> = group_settings(&cluster, true, &a, &[a.clone(), b])
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(rendered.contains(&"SET PERSIST group_replication_group_seeds = 'h:33201'".to_string()));
        assert!(rendered
            .iter()
            .any(|s| s.contains("group_replication_exit_state_action = 'OFFLINE_MODE'")));
        assert_eq!(communication_stack(&cluster), "XCOM");
    }
}
