//! Read-Replica Manager
//!
//! Read-Replicas are asynchronous followers of a cluster. They never join
//! the group; each one runs a single channel with automatic source
//! failover, weighted according to its `replicationSources` policy.

mod add;
mod manage;
mod reconcile;
mod sources;

pub use add::add_replica_instance;
pub(crate) use manage::{rejoin_read_replica, remove_read_replica, set_replication_sources};
pub(crate) use reconcile::reconcile_read_replicas;
pub use sources::{plan_sources, validate_sources, SourcePlan, PRIMARY_WEIGHTS, SECONDARY_WEIGHTS};
