//! Topology primitives
//!
//! Value types shared by every layer of the orchestrator:
//! - Instance addresses (`host:port`)
//! - Identifier rules for cluster names and member labels
//! - Roles, states, topology modes, SSL and member-auth settings
//! - Read-Replica source policies and provisioning methods

mod address;
mod model;
mod naming;

pub use address::InstanceAddress;
pub use model::{
    MemberAuthType, MemberRole, MemberState, RecoveryMethod, ReplicationSources, SourcePolicyToken,
    SslMode, TopologyMode,
};
pub use naming::{validate_cluster_name, validate_label, MAX_IDENTIFIER_LEN};
