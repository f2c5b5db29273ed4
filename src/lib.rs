//! gradmin - topology orchestrator for group-replicated database clusters
//!
//! Manages clusters of group-replicated instances together with their
//! asynchronous Read-Replicas and the ClusterSets linking clusters. Every
//! operation validates before it mutates and reverts what it applied when
//! it fails. The resulting topology is recorded in a metadata document kept
//! on the instances themselves.
//!
//! Entry points take an [`context::AdminContext`] and a cluster or
//! ClusterSet handle; instances are reached through the
//! [`gateway::Connector`] it carries.

pub mod changes;
pub mod cli;
pub mod cluster;
pub mod clusterset;
pub mod console;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod metadata;
pub mod observability;
pub mod options;
pub mod quorum;
pub mod replica;
pub mod status;
pub mod topology;

#[cfg(test)]
pub(crate) mod fixtures;
