//! ClusterSet Flow Tests
//!
//! - Channel options are validated before anything is created
//! - Status and describe reflect roles and channel health
//! - Switchover round trip and cluster removal

mod common;

use common::Lab;
use gradmin::clusterset::{create_cluster_set, create_replica_cluster, remove_cluster, set_primary_cluster};
use gradmin::context::ClusterSetHandle;
use gradmin::errors::AdminErrorKind;
use gradmin::gateway::CLUSTERSET_CHANNEL;
use gradmin::options::{
    ClusterSetChannelOptions, CreateClusterSetOptions, CreateReplicaClusterOptions, OperationOptions,
    RemoveClusterOptions, SetPrimaryClusterOptions, StatusOptions,
};
use gradmin::status::{clusterset_status, describe_clusterset, ClusterRole, ClusterSetHealth, GlobalStatus};
use serde_json::json;

fn linked(primary_ports: &[u16], replica_seed: u16) -> (Lab, ClusterSetHandle, gradmin::topology::InstanceAddress) {
    let lab = Lab::cluster("prod", primary_ports);
    let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
    let seed = lab.spare(replica_seed);
    create_replica_cluster(&lab.ctx, &cs, &seed, "dr", CreateReplicaClusterOptions::default()).unwrap();
    lab.ctx.output().take();
    (lab, cs, seed)
}

#[test]
fn test_out_of_range_compression_level_creates_nothing() {
    let lab = Lab::cluster("prod", &[3310, 3320]);
    let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
    let seed = lab.spare(4410);

    let parsed = CreateReplicaClusterOptions::from_json(Some(&json!({
        "clusterSetReplicationZstdCompressionLevel": 999
    })));
    assert_eq!(parsed.unwrap_err().kind, AdminErrorKind::InvalidArgument);

    let channel: ClusterSetChannelOptions =
        serde_json::from_value(json!({"clusterSetReplicationZstdCompressionLevel": 999})).unwrap();
    let bad = CreateReplicaClusterOptions {
        channel,
        ..CreateReplicaClusterOptions::default()
    };
    let err = create_replica_cluster(&lab.ctx, &cs, &seed, "dr", bad).unwrap_err();
    assert_eq!(err.kind, AdminErrorKind::InvalidArgument);
    assert!(err.is_pre_mutation());
    assert!(lab.metadata_on(&lab.members[0]).cluster_by_name("dr").is_none());
    assert!(lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL).is_none());
    assert!(lab.fleet.metadata_document(&seed).is_none());

    let good = CreateReplicaClusterOptions::from_json(Some(&json!({
        "clusterSetReplicationZstdCompressionLevel": 5,
        "clusterSetReplicationCompressionAlgorithms": "zstd"
    })))
    .unwrap();
    create_replica_cluster(&lab.ctx, &cs, &seed, "dr", good).unwrap();
    assert_eq!(
        lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL),
        Some(lab.members[0].clone())
    );
}

#[test]
fn test_status_reports_roles_and_health() {
    let (lab, cs, seed) = linked(&[3310, 3320], 4410);

    let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
    assert_eq!(report.domain_name, "world");
    assert_eq!(report.primary_cluster, "prod");
    assert_eq!(report.status, ClusterSetHealth::Healthy);
    assert_eq!(report.global_primary_instance, Some(lab.members[0].clone()));
    let dr = &report.clusters["dr"];
    assert_eq!(dr.cluster_role, ClusterRole::Replica);
    assert_eq!(dr.global_status, GlobalStatus::Ok);
    assert_eq!(report.clusters["prod"].cluster_role, ClusterRole::Primary);

    lab.fleet.kill(&seed).unwrap();
    let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
    assert_eq!(report.status, ClusterSetHealth::Available);
    assert_ne!(report.clusters["dr"].global_status, GlobalStatus::Ok);

    let description = describe_clusterset(&lab.ctx, &cs).unwrap();
    assert_eq!(description.primary_cluster, "prod");
    assert_eq!(description.clusters.len(), 2);
    assert_eq!(description.clusters["dr"].topology.len(), 1);
}

#[test]
fn test_switchover_round_trip() {
    let (lab, cs, seed) = linked(&[3310, 3320], 4410);
    lab.fleet.write_transactions(&lab.members[0], 2).unwrap();

    set_primary_cluster(&lab.ctx, &cs, "dr", SetPrimaryClusterOptions::default()).unwrap();
    let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
    assert_eq!(report.primary_cluster, "dr");
    assert_eq!(report.global_primary_instance, Some(seed.clone()));
    assert_eq!(
        lab.fleet.channel_source(&lab.members[0], CLUSTERSET_CHANNEL),
        Some(seed.clone())
    );

    lab.fleet.write_transactions(&seed, 3).unwrap();
    set_primary_cluster(&lab.ctx, &cs, "prod", SetPrimaryClusterOptions::default()).unwrap();
    assert!(lab.fleet.channel_source(&lab.members[0], CLUSTERSET_CHANNEL).is_none());
    assert_eq!(
        lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL),
        Some(lab.members[0].clone())
    );
    assert_eq!(lab.fleet.gtid_executed(&seed), lab.fleet.gtid_executed(&lab.members[1]));

    let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
    assert_eq!(report.status, ClusterSetHealth::Healthy);
}

#[test]
fn test_removed_cluster_leaves_the_set() {
    let (lab, cs, seed) = linked(&[3310], 4410);

    remove_cluster(&lab.ctx, &cs, "dr", RemoveClusterOptions::default()).unwrap();
    assert!(lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL).is_none());
    let description = describe_clusterset(&lab.ctx, &cs).unwrap();
    assert_eq!(description.clusters.len(), 1);
    assert!(!description.clusters.contains_key("dr"));

    let err = remove_cluster(&lab.ctx, &cs, "prod", RemoveClusterOptions::default()).unwrap_err();
    assert!(err.is_pre_mutation(), "{}", err);
}
