//! Topology Mutators
//!
//! Operations changing the membership, roles or settings of one cluster.
//! Each one validates everything it can before the first remote mutation
//! and runs its mutations through a [`crate::changes::ChangeSet`], so a
//! failure part-way reverts what was already applied.

pub(crate) mod accounts;
mod add_instance;
pub(crate) mod auth;
pub(crate) mod create;
mod dissolve;
pub(crate) mod join;
mod primary;
mod provisioning;
mod recovery;
mod rejoin_instance;
mod remove_instance;
mod rescan;
mod settings;
pub(crate) mod target;

pub use add_instance::add_instance;
pub(crate) use add_instance::plan_provisioning;
pub use create::{create_cluster, derive_group_name};
pub use dissolve::dissolve;
pub use primary::{set_primary_instance, switch_to_multi_primary_mode, switch_to_single_primary_mode};
pub use recovery::{force_quorum_using_partition_of, reboot_cluster_from_complete_outage};
pub use rejoin_instance::rejoin_instance;
pub use remove_instance::remove_instance;
pub(crate) use remove_instance::confirm_unreachable;
pub use rescan::{rescan, RescanReport};
pub use settings::{options, set_instance_option, set_option, ClusterOptions, InstanceOptions, OptionValue};
