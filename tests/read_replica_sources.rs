//! Read-Replica Source Tests
//!
//! - `secondary` moves to another ONLINE secondary when its source dies
//! - an explicit list never falls back to an unlisted member
//! - `primary` follows planned primary changes

mod common;

use common::Lab;
use gradmin::cluster::{rejoin_instance, remove_instance, set_primary_instance};
use gradmin::errors::AdminErrorKind;
use gradmin::gateway::READ_REPLICA_CHANNEL;
use gradmin::options::{
    AddReplicaInstanceOptions, RejoinInstanceOptions, RemoveInstanceOptions, SetPrimaryInstanceOptions,
};
use gradmin::replica::add_replica_instance;
use gradmin::topology::ReplicationSources;

fn with_sources(sources: ReplicationSources) -> AddReplicaInstanceOptions {
    AddReplicaInstanceOptions {
        replication_sources: Some(sources),
        ..AddReplicaInstanceOptions::default()
    }
}

#[test]
fn test_secondary_policy_fails_over_to_another_secondary() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let replica = lab.spare(3340);
    add_replica_instance(&lab.ctx, &lab.handle, &replica, with_sources(ReplicationSources::secondary())).unwrap();

    let first = lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).unwrap();
    assert_ne!(first, lab.members[0]);

    lab.fleet.kill(&first).unwrap();
    let second = lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).unwrap();
    assert_ne!(second, first);
    assert_ne!(second, lab.members[0]);
    assert_eq!(
        lab.fleet.channel_io_state(&replica, READ_REPLICA_CHANNEL).as_deref(),
        Some("ON")
    );

    lab.fleet.write_transactions(&lab.members[0], 2).unwrap();
    assert_eq!(lab.fleet.gtid_executed(&replica), lab.fleet.gtid_executed(&lab.members[0]));
}

#[test]
fn test_source_list_is_never_left() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330, 3340, 3350]);
    let listed = vec![lab.members[1].clone(), lab.members[2].clone()];
    let replica = lab.spare(3360);
    add_replica_instance(
        &lab.ctx,
        &lab.handle,
        &replica,
        with_sources(ReplicationSources::List(listed.clone())),
    )
    .unwrap();
    assert_eq!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL), Some(listed[0].clone()));

    lab.fleet.kill(&listed[0]).unwrap();
    assert_eq!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL), Some(listed[1].clone()));

    lab.fleet.kill(&listed[1]).unwrap();
    let stuck = lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL);
    assert!(stuck.as_ref().map_or(true, |s| listed.contains(s)), "{:?}", stuck);
    assert_eq!(
        lab.fleet.channel_io_state(&replica, READ_REPLICA_CHANNEL).as_deref(),
        Some("CONNECTING")
    );

    lab.fleet.restart(&listed[0]).unwrap();
    rejoin_instance(&lab.ctx, &lab.handle, &listed[0], RejoinInstanceOptions::default()).unwrap();
    assert_eq!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL), Some(listed[0].clone()));
}

#[test]
fn test_invalid_source_lists_rejected() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let replica = lab.spare(3340);

    let duplicated = ReplicationSources::List(vec![lab.members[1].clone(), lab.members[1].clone()]);
    let err = add_replica_instance(&lab.ctx, &lab.handle, &replica, with_sources(duplicated)).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidSource);

    lab.fleet.kill(&lab.members[2]).unwrap();
    let offline = ReplicationSources::List(vec![lab.members[2].clone()]);
    let err = add_replica_instance(&lab.ctx, &lab.handle, &replica, with_sources(offline)).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidSource);

    assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
}

#[test]
fn test_primary_policy_follows_set_primary() {
    let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
    let replica = lab.spare(3340);
    add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();
    let recorded = lab.metadata_on(&lab.members[0]).instance(&replica).unwrap().label.clone();
    assert_eq!(recorded, replica.to_string());

    set_primary_instance(&lab.ctx, &lab.handle, &lab.members[2], SetPrimaryInstanceOptions::default()).unwrap();
    assert_eq!(
        lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
        Some(lab.members[2].clone())
    );
}

#[test]
fn test_read_replica_is_not_a_primary_candidate() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    let replica = lab.spare(3340);
    add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();

    let err = set_primary_instance(&lab.ctx, &lab.handle, &replica, SetPrimaryInstanceOptions::default())
        .unwrap_err();
    assert!(err.is_pre_mutation(), "{}", err);
}

#[test]
fn test_remove_read_replica() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    let replica = lab.spare(3340);
    add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();

    remove_instance(&lab.ctx, &lab.handle, &replica, RemoveInstanceOptions::default()).unwrap();
    assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
    assert!(lab.metadata_on(&lab.members[0]).instance(&replica).is_none());
    assert!(!lab
        .accounts_on(&lab.members[0])
        .iter()
        .any(|user| user.starts_with("mysql_innodb_replica_")));
}
