//! Recovery from quorum loss and complete outage.

use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{GtidSet, Statement};
use crate::metadata::{self, InstanceRecord};
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::RebootOptions;
use crate::quorum::{gtid_state, local_group_state, observe, ClusterSnapshot};
use crate::topology::{InstanceAddress, MemberState};

use super::join::{configure_member, start_member};

pub fn force_quorum_using_partition_of(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    partition: &InstanceAddress,
) -> AdminResult<()> {
    let partition_text = partition.to_string();
    let scope = ObservationScope::with_fields(
        "FORCE_QUORUM",
        &[("cluster", handle.name.as_str()), ("instance", partition_text.as_str())],
    );
    let result = force_quorum(ctx, handle, partition);
    scope.finish(&result);
    result
}

fn force_quorum(ctx: &AdminContext, handle: &ClusterHandle, partition: &InstanceAddress) -> AdminResult<()> {
    let via_partition = ClusterHandle::new(handle.name.clone(), partition.clone());
    let snapshot = ClusterSnapshot::load(ctx, &via_partition)?;
    if snapshot.has_quorum() {
        return Err(AdminError::precondition(
            AdminErrorKind::HasQuorum,
            format!(
                "Cluster '{}' has quorum; forcing a partition is not needed.",
                snapshot.name()
            ),
        ));
    }
    let view = observe(ctx, partition)?
        .filter(|v| v.group_name == Some(snapshot.cluster.group_name))
        .ok_or_else(|| {
            AdminError::precondition(
                AdminErrorKind::InvalidState,
                format!(
                    "The instance '{}' is not an active member of cluster '{}'; \
                     it cannot be used to restore quorum.",
                    partition,
                    snapshot.name()
                ),
            )
        })?;
    let survivors: Vec<InstanceAddress> = view
        .members
        .iter()
        .filter(|m| m.state.counts_for_quorum())
        .map(|m| m.address.clone())
        .collect();

    let console = ctx.console();
    if console.is_interactive()
        && !console.confirm(&format!(
            "Restoring quorum with the partition of '{}' ({} member(s)) excludes every other \
             member. Continue?",
            partition,
            survivors.len()
        ))
    {
        return Err(AdminError::precondition(
            AdminErrorKind::Aborted,
            "Operation cancelled by the user.",
        ));
    }

    let output = ctx.output();
    output.info(format!(
        "Restoring cluster '{}' from loss of quorum, using the partition of '{}'...",
        snapshot.name(),
        partition
    ));
    ctx.execute(
        partition,
        &Statement::ForceMembers {
            addresses: survivors.clone(),
        },
    )?;

    let list: Vec<String> = survivors.iter().map(|s| s.to_string()).collect();
    log_event(
        Event::QuorumForced,
        &[("cluster", snapshot.name()), ("members", list.join(",").as_str())],
    );
    output.info(format!(
        "The cluster was successfully restored with member(s): {}. Members outside this \
         partition must be rejoined.",
        list.join(", ")
    ));
    Ok(())
}

/// One group member as found before the reboot.
struct Survivor {
    record: InstanceRecord,
    executed: Option<GtidSet>,
}

impl Survivor {
    fn reachable(&self) -> bool {
        self.executed.is_some()
    }

    fn contains_all(&self, others: &[Survivor]) -> bool {
        let Some(ref mine) = self.executed else {
            return false;
        };
        others
            .iter()
            .filter_map(|o| o.executed.as_ref())
            .all(|theirs| theirs.is_subset_of(mine))
    }
}

pub fn reboot_cluster_from_complete_outage(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    options: RebootOptions,
) -> AdminResult<ClusterHandle> {
    let scope = ObservationScope::with_fields("REBOOT_CLUSTER", &[("cluster", handle.name.as_str())]);
    let result = reboot(ctx, handle, &options);
    scope.finish(&result);
    result
}

fn pick_seed<'s>(
    ctx: &AdminContext,
    survivors: &'s [Survivor],
    options: &RebootOptions,
) -> AdminResult<&'s Survivor> {
    let output = ctx.output();
    if let Some(requested) = options.primary()? {
        let Some(found) = survivors.iter().find(|s| s.record.address == requested) else {
            return Err(AdminError::not_member(&requested, "the rebooted cluster"));
        };
        if !found.reachable() {
            return Err(AdminError::new(
                AdminErrorKind::Connectivity,
                format!("The requested primary '{}' is not reachable.", requested),
            ));
        }
        if !found.contains_all(survivors) {
            if !options.force {
                return Err(AdminError::precondition(
                    AdminErrorKind::InvalidState,
                    format!(
                        "The instance '{}' is missing transactions other members executed. \
                         Use 'force' to reboot from it anyway.",
                        requested
                    ),
                ));
            }
            output.warning(format!(
                "Rebooting from '{}' discards transactions only other members executed (force).",
                requested
            ));
        }
        return Ok(found);
    }

    if let Some(best) = survivors.iter().find(|s| s.contains_all(survivors)) {
        return Ok(best);
    }
    if !options.force {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            "The GTID sets of the reachable members diverge; no member holds every transaction. \
             Pick a primary and use 'force'.",
        ));
    }
    let best = survivors
        .iter()
        .filter(|s| s.reachable())
        .max_by(|a, b| {
            let count = |s: &Survivor| s.executed.as_ref().map(GtidSet::count).unwrap_or(0);
            count(a)
                .cmp(&count(b))
                .then_with(|| b.record.address.cmp(&a.record.address))
        })
        .ok_or_else(|| AdminError::internal("No reachable member to reboot from."))?;
    output.warning(format!(
        "The GTID sets of the members diverge; rebooting from '{}' (force).",
        best.record.address
    ));
    Ok(best)
}

fn reboot(ctx: &AdminContext, handle: &ClusterHandle, options: &RebootOptions) -> AdminResult<ClusterHandle> {
    let md = metadata::load(ctx, &handle.seed)?;
    let cluster = match handle.name.as_str() {
        "" => md
            .instance(&handle.seed)
            .and_then(|i| md.cluster(&i.cluster_id))
            .ok_or_else(|| AdminError::not_member(&handle.seed, "any cluster"))?,
        name => md.require_cluster(name)?,
    };
    let cluster = cluster.clone();
    let output = ctx.output();

    if let Some(requested) = options.primary()? {
        if let Some(record) = md.instance(&requested).filter(|r| r.is_read_replica()) {
            if options.force {
                return Err(AdminError::argument(format!(
                    "The instance '{}' is a Read-Replica and cannot be used to reboot the cluster.",
                    record.address
                )));
            }
            output.warning(format!(
                "The instance '{}' is a Read-Replica; the most suitable group member is used instead.",
                record.address
            ));
            let adjusted = RebootOptions {
                primary: None,
                ..options.clone()
            };
            return reboot(ctx, handle, &adjusted);
        }
    }

    output.info("Current state of the cluster members:");
    let mut survivors = Vec::new();
    for record in md.members_of(&cluster.cluster_id) {
        let state = match local_group_state(ctx, &record.address) {
            Ok(local) if local.running => local.member_state,
            Ok(_) => MemberState::Offline,
            Err(_) => MemberState::Missing,
        };
        output.info(format!("    {}: {}", record.address, state.as_str()));
        if let Ok(Some(view)) = observe(ctx, &record.address) {
            if view.group_name == Some(cluster.group_name) {
                return Err(AdminError::precondition(
                    AdminErrorKind::InvalidState,
                    format!(
                        "The cluster is not in complete outage: '{}' is still {}. Use \
                         rejoinInstance or forceQuorumUsingPartitionOf instead.",
                        record.address,
                        state.as_str()
                    ),
                ));
            }
        }
        let executed = gtid_state(ctx, &record.address).ok().map(|(executed, _)| executed);
        survivors.push(Survivor {
            record: record.clone(),
            executed,
        });
    }

    let seed = pick_seed(ctx, &survivors, options)?;
    let seed_address = seed.record.address.clone();
    let all: Vec<InstanceAddress> = survivors.iter().map(|s| s.record.address.clone()).collect();
    let single_primary = cluster.topology_mode.is_single_primary();
    let replica_cluster = md.is_replica_cluster(&cluster.cluster_id);

    output.info(format!(
        "Rebooting cluster '{}' from '{}'...",
        cluster.name, seed_address
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        configure_member(changes, &seed_address, &cluster, single_primary, &all)?;
        start_member(changes, &seed_address, true)?;
        if replica_cluster {
            changes.apply(&seed_address, Statement::SetSuperReadOnly { enabled: true })?;
        }
        for other in survivors.iter().filter(|s| s.reachable() && s.record.address != seed_address) {
            let address = &other.record.address;
            let rejoined = configure_member(changes, address, &cluster, single_primary, &all)
                .and_then(|_| start_member(changes, address, false));
            match rejoined {
                Ok(()) => output.info(format!("The instance '{}' rejoined the cluster.", address)),
                Err(e) => output.warning(format!(
                    "The instance '{}' could not rejoin the cluster: {}. Use rejoinInstance once \
                     the problem is fixed.",
                    address, e.message
                )),
            }
        }
        Ok(())
    })?;

    if replica_cluster {
        output.note("Run rejoinCluster on the ClusterSet to restore the replication channel of this cluster.");
    }
    if !options.dry_run {
        output.info(format!("The cluster '{}' was successfully rebooted.", cluster.name));
    }
    Ok(ClusterHandle::new(cluster.name.clone(), seed_address))
}
