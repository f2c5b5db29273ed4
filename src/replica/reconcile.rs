//! Bring Read-Replica channels in line with a changed group.

use super::sources::{plan_sources, repoint};
use crate::changes::ChangeSet;
use crate::errors::AdminResult;
use crate::gateway::READ_REPLICA_CHANNEL;
use crate::observability::{log_event, Event};
use crate::quorum::{channel, ClusterSnapshot};

/// Repoint every Read-Replica whose channel no longer matches its policy.
///
/// Runs after a primary change or a mode switch. Replicas that cannot be
/// reached or planned are reported and left alone; they are handled again
/// by `rejoinInstance`.
pub(crate) fn reconcile_read_replicas(changes: &mut ChangeSet<'_>, snapshot: &ClusterSnapshot) -> AdminResult<()> {
    let ctx = changes.ctx();
    let output = ctx.output();
    for record in snapshot.read_replicas() {
        let sources = record
            .read_replica
            .as_ref()
            .map(|r| r.replication_sources.clone())
            .unwrap_or_default();
        let plan = match plan_sources(snapshot, &sources) {
            Ok(plan) => plan,
            Err(e) => {
                output.warning(format!(
                    "Unable to reconfigure Read-Replica '{}': {}",
                    record.address, e.message
                ));
                continue;
            }
        };
        let status = match channel(ctx, &record.address, READ_REPLICA_CHANNEL) {
            Ok(Some(status)) => status,
            Ok(None) => {
                output.warning(format!(
                    "The Read-Replica '{}' has no replication channel; run rejoinInstance on it.",
                    record.address
                ));
                continue;
            }
            Err(e) => {
                output.warning(format!(
                    "Unable to reach Read-Replica '{}' to reconfigure it: {}",
                    record.address, e.message
                ));
                continue;
            }
        };

        let stale_list = status.sources != plan.source_strings();
        let off_primary = sources.is_primary() && status.source_address().as_ref() != Some(&plan.initial);
        if !stale_list && !off_primary {
            continue;
        }
        repoint(changes, &record.address, &plan)?;
        log_event(
            Event::SourceReconfigured,
            &[
                ("instance", record.address.to_string().as_str()),
                ("source", plan.initial.to_string().as_str()),
            ],
        );
        output.info(format!(
            "Read-Replica '{}' now replicates from '{}'.",
            record.address, plan.initial
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cluster::set_primary_instance;
    use crate::fixtures::Lab;
    use crate::gateway::READ_REPLICA_CHANNEL;
    use crate::options::{AddReplicaInstanceOptions, SetPrimaryInstanceOptions};
    use crate::replica::add_replica_instance;
    use crate::topology::ReplicationSources;

    #[test]
    fn test_primary_followers_move_with_the_primary() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let replica = lab.spare(3340);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default())
            .unwrap();

        set_primary_instance(&lab.ctx, &lab.handle, &lab.members[1], SetPrimaryInstanceOptions::default())
            .unwrap();
        assert_eq!(
            lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
            Some(lab.members[1].clone())
        );
    }

    #[test]
    fn test_listed_sources_are_kept() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let replica = lab.spare(3340);
        let options = AddReplicaInstanceOptions {
            replication_sources: Some(ReplicationSources::List(vec![lab.members[2].clone()])),
            ..AddReplicaInstanceOptions::default()
        };
        add_replica_instance(&lab.ctx, &lab.handle, &replica, options).unwrap();

        set_primary_instance(&lab.ctx, &lab.handle, &lab.members[1], SetPrimaryInstanceOptions::default())
            .unwrap();
        assert_eq!(
            lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
            Some(lab.members[2].clone())
        );
    }
}
