//! Topology Mode Tests
//!
//! - Single-primary and multi-primary switches are recorded in the metadata
//! - A chosen primary is honored when returning to single-primary mode
//! - Read-Replicas keep replicating across mode switches

mod common;

use common::Lab;
use gradmin::cluster::{set_primary_instance, switch_to_multi_primary_mode, switch_to_single_primary_mode};
use gradmin::clusterset::create_cluster_set;
use gradmin::errors::AdminErrorKind;
use gradmin::gateway::READ_REPLICA_CHANNEL;
use gradmin::options::{AddReplicaInstanceOptions, CreateClusterSetOptions, SetPrimaryInstanceOptions};
use gradmin::quorum::ClusterSnapshot;
use gradmin::replica::add_replica_instance;
use gradmin::topology::{ReplicationSources, TopologyMode};

fn recorded_mode(lab: &Lab) -> TopologyMode {
    lab.metadata_on(&lab.members[0])
        .cluster_by_name("prod")
        .unwrap()
        .topology_mode
}

#[test]
fn test_multi_primary_round_trip() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);

    switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap();
    assert_eq!(recorded_mode(&lab), TopologyMode::MultiPrimary);
    let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
    assert_eq!(snapshot.topology_mode(), TopologyMode::MultiPrimary);

    switch_to_single_primary_mode(&lab.ctx, &lab.handle, Some(&lab.members[1])).unwrap();
    assert_eq!(recorded_mode(&lab), TopologyMode::SinglePrimary);
    let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
    assert_eq!(snapshot.primary(), Some(lab.members[1].clone()));
}

#[test]
fn test_repeated_switch_is_a_note() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    switch_to_single_primary_mode(&lab.ctx, &lab.handle, None).unwrap();
    assert!(lab.ctx.output().contains("already running in single-primary mode"));

    switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap();
    lab.ctx.output().take();
    switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap();
    assert!(lab.ctx.output().contains("already running in multi-primary mode"));
}

#[test]
fn test_set_primary_refused_in_multi_primary_mode() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap();

    let err = set_primary_instance(&lab.ctx, &lab.handle, &lab.members[1], SetPrimaryInstanceOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidState);
}

#[test]
fn test_multi_primary_refused_inside_clusterset() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();

    let err = switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidState);
    assert_eq!(recorded_mode(&lab), TopologyMode::SinglePrimary);
}

#[test]
fn test_read_replica_survives_mode_switches() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let replica = lab.spare(3340);
    let options = AddReplicaInstanceOptions {
        replication_sources: Some(ReplicationSources::secondary()),
        ..AddReplicaInstanceOptions::default()
    };
    add_replica_instance(&lab.ctx, &lab.handle, &replica, options).unwrap();

    switch_to_multi_primary_mode(&lab.ctx, &lab.handle).unwrap();
    let source = lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).unwrap();
    assert!(lab.members.contains(&source));
    assert_eq!(
        lab.fleet.channel_io_state(&replica, READ_REPLICA_CHANNEL).as_deref(),
        Some("ON")
    );

    switch_to_single_primary_mode(&lab.ctx, &lab.handle, Some(&lab.members[0])).unwrap();
    let source = lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).unwrap();
    assert_ne!(source, lab.members[0]);

    lab.fleet.write_transactions(&lab.members[0], 2).unwrap();
    assert_eq!(lab.fleet.gtid_executed(&replica), lab.fleet.gtid_executed(&lab.members[0]));
}
