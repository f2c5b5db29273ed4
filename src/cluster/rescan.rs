//! rescan: reconcile the metadata with the live group.

use chrono::Utc;
use serde::Serialize;

use super::accounts::{account_spec, cluster_account, create_account, drop_account};
use super::join::set_recovery_account;
use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::AdminResult;
use crate::metadata::{self, InstanceRecord};
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::{InstanceSelection, RescanOptions};
use crate::quorum::{check_identity_unique, server_identity, ClusterSnapshot};
use crate::topology::{InstanceAddress, TopologyMode};

/// What a rescan found and what it changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanReport {
    /// Group members missing from the metadata.
    pub new_instances: Vec<InstanceAddress>,
    /// Metadata members the group no longer has.
    pub obsolete_instances: Vec<InstanceAddress>,
    pub added: Vec<InstanceAddress>,
    pub removed: Vec<InstanceAddress>,
    /// Mode recorded after the rescan when it had drifted.
    pub topology_mode_changed: Option<TopologyMode>,
}

pub fn rescan(ctx: &AdminContext, handle: &ClusterHandle, options: RescanOptions) -> AdminResult<RescanReport> {
    let scope = ObservationScope::with_fields("RESCAN", &[("cluster", handle.name.as_str())]);
    let result = run(ctx, handle, &options);
    scope.finish(&result);
    result
}

/// Decide for one instance: the option's selection, or ask when interactive.
fn selected(ctx: &AdminContext, selection: Option<&InstanceSelection>, address: &InstanceAddress, question: &str) -> bool {
    match selection {
        Some(selection) => selection.includes(address),
        None => {
            let console = ctx.console();
            console.is_interactive() && console.confirm(question)
        }
    }
}

fn run(ctx: &AdminContext, handle: &ClusterHandle, options: &RescanOptions) -> AdminResult<RescanReport> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let view = snapshot.require_quorum("rescan")?.clone();
    let cluster = snapshot.cluster.clone();
    let members = snapshot.metadata.members_of(&cluster.cluster_id);
    let output = ctx.output();
    output.info(format!("Rescanning the cluster '{}'...", cluster.name));

    let mut report = RescanReport {
        new_instances: view
            .online()
            .into_iter()
            .map(|m| m.address.clone())
            .filter(|a| !members.iter().any(|r| r.address == *a))
            .collect(),
        obsolete_instances: members
            .iter()
            .map(|r| r.address.clone())
            .filter(|a| view.member(a).is_none())
            .collect(),
        ..RescanReport::default()
    };

    for address in &report.new_instances {
        output.info(format!(
            "A new instance '{}' was discovered in the group but is not part of the cluster metadata.",
            address
        ));
        let question = format!("Would you like to add '{}' to the cluster metadata?", address);
        if selected(ctx, options.add_instances.as_ref(), address, &question) {
            report.added.push(address.clone());
        } else {
            output.note("Use the 'addInstances' option to register it.");
        }
    }
    for address in &report.obsolete_instances {
        output.info(format!(
            "The instance '{}' is no longer part of the group but is still in the cluster metadata.",
            address
        ));
        let question = format!("Would you like to remove '{}' from the cluster metadata?", address);
        if selected(ctx, options.remove_instances.as_ref(), address, &question) {
            report.removed.push(address.clone());
        } else {
            output.note("Use the 'removeInstances' option to drop it.");
        }
    }
    if view.topology_mode() != cluster.topology_mode {
        output.warning(format!(
            "The topology mode of the group ({}) differs from the one recorded ({}); the metadata is updated.",
            view.topology_mode().as_str(),
            cluster.topology_mode.as_str()
        ));
        report.topology_mode_changed = Some(view.topology_mode());
    }

    if report.added.is_empty() && report.removed.is_empty() && report.topology_mode_changed.is_none() {
        output.info("The cluster metadata is up to date.");
        return Ok(report);
    }

    let (writer, mut md) = snapshot.metadata_writer(ctx, "rescan")?;
    let mut additions = Vec::new();
    for address in &report.added {
        let identity = server_identity(ctx, address)?;
        check_identity_unique(&md, address, &identity)?;
        additions.push((address.clone(), identity));
    }

    run_reverting(ctx, options.dry_run, |changes| {
        for (address, identity) in &additions {
            let user = cluster_account(identity.server_id);
            let spec = account_spec(user.clone(), &cluster, None);
            create_account(changes, &writer, &spec)?;
            set_recovery_account(changes, address, &user, spec.password.clone())?;
            md.instances.push(InstanceRecord {
                cluster_id: cluster.cluster_id,
                address: address.clone(),
                server_uuid: identity.server_uuid,
                server_id: identity.server_id,
                label: address.to_string(),
                cert_subject: None,
                replication_account: Some(user),
                read_replica: None,
                joined_at: Utc::now(),
            });
        }
        for address in &report.removed {
            if let Some(record) = md.remove_instance(address) {
                if let Some(ref user) = record.replication_account {
                    drop_account(changes, &writer, user)?;
                }
            }
        }
        if let Some(mode) = report.topology_mode_changed {
            if let Some(record) = md.cluster_mut(&cluster.cluster_id) {
                record.topology_mode = mode;
            }
        }
        metadata::store(changes, &writer, &mut md)
    })?;

    if !options.dry_run {
        for address in &report.removed {
            log_event(
                Event::MemberRemoved,
                &[
                    ("cluster", cluster.name.as_str()),
                    ("instance", address.to_string().as_str()),
                    ("metadata_only", "true"),
                ],
            );
        }
        output.info(format!(
            "Rescan of cluster '{}' complete: {} added, {} removed.",
            cluster.name,
            report.added.len(),
            report.removed.len()
        ));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Lab;
    use crate::gateway::Statement;

    fn forget(lab: &Lab, address: &InstanceAddress) {
        let mut md = lab.metadata();
        md.remove_instance(address);
        md.touch();
        lab.ctx
            .execute(
                &lab.members[0],
                &Statement::StoreMetadata {
                    document: md.to_document().unwrap(),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_member_is_reported_only() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        forget(&lab, &lab.members[2]);

        let report = rescan(&lab.ctx, &lab.handle, RescanOptions::default()).unwrap();
        assert_eq!(report.new_instances, vec![lab.members[2].clone()]);
        assert!(report.added.is_empty());
        assert!(lab.metadata().instance(&lab.members[2]).is_none());
    }

    #[test]
    fn test_auto_adds_unknown_member() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        forget(&lab, &lab.members[2]);

        let options = RescanOptions {
            add_instances: Some(InstanceSelection::Auto),
            ..RescanOptions::default()
        };
        let report = rescan(&lab.ctx, &lab.handle, options).unwrap();
        assert_eq!(report.added, vec![lab.members[2].clone()]);
        assert!(lab.metadata().instance(&lab.members[2]).is_some());
    }

    #[test]
    fn test_expelled_member_is_removed_when_listed() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        lab.fleet.kill(&lab.members[2]).unwrap();

        let options = RescanOptions {
            remove_instances: Some(InstanceSelection::List(vec![lab.members[2].clone()])),
            ..RescanOptions::default()
        };
        let report = rescan(&lab.ctx, &lab.handle, options).unwrap();
        assert_eq!(report.removed, vec![lab.members[2].clone()]);
        assert!(lab.metadata().instance(&lab.members[2]).is_none());
    }

    #[test]
    fn test_up_to_date_cluster() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let report = rescan(&lab.ctx, &lab.handle, RescanOptions::default()).unwrap();
        assert_eq!(report, RescanReport::default());
        assert!(lab.ctx.output().contains("up to date"));
    }
}
