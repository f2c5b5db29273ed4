//! Status Reporter
//!
//! Read-only views of a cluster or ClusterSet. `status` probes members in
//! parallel and layers detail by tier (`extended` 0-3); `describe` reads
//! the metadata only.

mod cluster;
mod clusterset;
mod describe;
mod report;
mod workers;

pub use cluster::{status, ClusterStatus, ReplicaSetStatus};
pub use clusterset::{
    clusterset_status, ChannelHealth, ClusterSetHealth, ClusterSetMemberStatus, ClusterSetStatus, GlobalStatus,
};
pub use describe::{
    describe, describe_clusterset, ClusterDescription, ClusterSetDescription, DescribedCluster, DescribedInstance,
};
pub use report::{
    ChannelReport, ClusterHealth, ClusterRole, GroupInformation, MemberDetail, MemberReport, ReadReplicaReport,
    ReadReplicaState, Tier, UnreachableMember,
};
pub use workers::probe_parallel;
