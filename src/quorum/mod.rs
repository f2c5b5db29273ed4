//! Membership & Quorum Engine
//!
//! Computes live quorum, member roles and operation preconditions from
//! point-in-time probes of every reachable member.

mod probe;
mod uniqueness;
mod view;
mod wait;

pub use probe::{
    accounts, channel, channels, gtid_state, local_group_state, member_stats, server_identity, variable,
    ChannelStatus, LocalGroupState, MemberStats, ServerIdentity,
};
pub use uniqueness::{check_identity_unique, check_label_unique};
pub use view::{
    cluster_primary, find_view, observe, quorum_holds, ClusterSnapshot, GroupView, MemberStatus,
    ViewMember,
};
pub use wait::{check_appliers, sync_with, wait_for_member_state, wait_for_sync};
