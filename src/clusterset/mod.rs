//! ClusterSet Replication Manager
//!
//! A ClusterSet is one primary cluster plus replica clusters. Each replica
//! cluster runs one asynchronous channel on its primary, failing over
//! within the primary cluster's group, and stays fenced against client
//! writes while it is a replica.

mod channel;
mod create;
mod membership;
mod switch;
mod view;

pub use channel::{effective_config, mismatches, InboundSource, BUILTIN_CONNECT_RETRY, BUILTIN_RETRY_COUNT};
pub(crate) use channel::{relocate_inbound_channel, set_channel_options};
pub use create::{create_cluster_set, create_replica_cluster};
pub use membership::{rejoin_cluster, remove_cluster};
pub use switch::{force_primary_cluster, set_primary_cluster};
pub use view::ClusterSetView;
