//! Topology Metadata Store
//!
//! Durable source of truth consulted by every validation. The document is
//! rewritten as a whole on the writable primary after the live change it
//! describes has succeeded, and reaches every other member through
//! replication.

mod document;
mod errors;
mod store;

pub use document::{
    ClusterRecord, ClusterSetMemberRecord, ClusterSetRecord, InstanceRecord, ReadReplicaRecord,
    TopologyMetadata, SCHEMA_VERSION,
};
pub use errors::{MetadataError, MetadataResult};
pub use store::{load, read_from, store};
