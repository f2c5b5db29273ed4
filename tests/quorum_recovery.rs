//! Quorum Recovery Tests
//!
//! - Membership changes are refused while the group has no majority
//! - forceQuorumUsingPartitionOf restores a usable cluster from a minority
//! - rebootClusterFromCompleteOutage restarts a fully stopped cluster

mod common;

use common::Lab;
use gradmin::cluster::{
    add_instance, force_quorum_using_partition_of, reboot_cluster_from_complete_outage, rejoin_instance,
};
use gradmin::errors::{AdminErrorKind, ErrorCategory};
use gradmin::gateway::READ_REPLICA_CHANNEL;
use gradmin::options::{AddInstanceOptions, AddReplicaInstanceOptions, RebootOptions, RejoinInstanceOptions};
use gradmin::quorum::ClusterSnapshot;
use gradmin::replica::add_replica_instance;
use gradmin::topology::MemberState;

/// Losing two of three members blocks membership changes until quorum is forced.
#[test]
fn test_lost_majority_then_forced_quorum() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let replica = lab.spare(3340);
    lab.fleet.kill(&lab.members[1]).unwrap();
    lab.fleet.kill(&lab.members[2]).unwrap();

    let err = add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::NoQuorum);
    assert_eq!(err.category(), ErrorCategory::Precondition);
    assert!(lab.metadata_on(&lab.members[0]).instance(&replica).is_none());

    lab.fleet.restart(&lab.members[1]).unwrap();
    lab.fleet.restart(&lab.members[2]).unwrap();
    force_quorum_using_partition_of(&lab.ctx, &lab.handle, &lab.members[0]).unwrap();
    assert!(lab.ctx.output().contains("successfully restored"));

    for member in &lab.members[1..] {
        rejoin_instance(&lab.ctx, &lab.handle, member, RejoinInstanceOptions::default()).unwrap();
    }
    let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
    assert!(snapshot.has_quorum());
    assert_eq!(snapshot.online_members().len(), 3);

    add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();
    assert_eq!(
        lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
        Some(lab.members[0].clone())
    );
}

/// Adding a member needs a majority as well.
#[test]
fn test_add_instance_needs_quorum() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let joiner = lab.spare(3340);
    lab.fleet.kill(&lab.members[1]).unwrap();
    lab.fleet.kill(&lab.members[2]).unwrap();

    let err = add_instance(&lab.ctx, &lab.handle, &joiner, AddInstanceOptions::default()).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::NoQuorum);
    assert!(lab.fleet.accounts(&lab.members[0]).iter().all(|(user, _)| !user.ends_with("_4")));
}

/// Forcing is refused while the majority is still there.
#[test]
fn test_force_quorum_refused_with_quorum() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    lab.fleet.kill(&lab.members[2]).unwrap();

    let err = force_quorum_using_partition_of(&lab.ctx, &lab.handle, &lab.members[0]).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::HasQuorum);
}

/// A stopped member cannot be the partition quorum is forced from.
#[test]
fn test_force_quorum_from_inactive_member() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    lab.fleet.kill(&lab.members[1]).unwrap();
    lab.fleet.kill(&lab.members[2]).unwrap();
    lab.fleet.restart(&lab.members[1]).unwrap();

    let err = force_quorum_using_partition_of(&lab.ctx, &lab.handle, &lab.members[1]).unwrap_err();
    assert!(err.is_pre_mutation(), "{}", err);
}

/// Every member stopped: reboot from the seed and bring the others back.
#[test]
fn test_reboot_after_complete_outage() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    lab.fleet.write_transactions(&lab.members[0], 3).unwrap();
    for member in &lab.members {
        lab.fleet.kill(member).unwrap();
    }
    for member in &lab.members {
        lab.fleet.restart(member).unwrap();
    }

    let handle = reboot_cluster_from_complete_outage(&lab.ctx, &lab.handle, RebootOptions::default()).unwrap();
    assert_eq!(handle.name, "prod");
    assert!(lab.ctx.output().contains("Current state of the cluster members:"));

    let snapshot = ClusterSnapshot::load(&lab.ctx, &handle).unwrap();
    assert!(snapshot.has_quorum());
    for member in &lab.members {
        assert_eq!(snapshot.member(member).unwrap().state, MemberState::Online, "{}", member);
    }
}

/// Reboot is refused while part of the group is still running.
#[test]
fn test_reboot_refused_without_outage() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    lab.fleet.kill(&lab.members[2]).unwrap();

    let err = reboot_cluster_from_complete_outage(&lab.ctx, &lab.handle, RebootOptions::default()).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidState);
}
