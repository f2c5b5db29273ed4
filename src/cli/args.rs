//! CLI argument definitions using clap
//!
//! Commands:
//! - gradmin init
//! - gradmin <operation> --seed <host:port> [--cluster <name>] [--options '{..}']
//! - gradmin fleet <add-server|kill|restart|write|purge|list>
//!
//! Every command takes `--config <path>` (default `./gradmin.json`).

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// gradmin - topology orchestrator for group-replicated clusters
#[derive(Parser, Debug)]
#[command(name = "gradmin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./gradmin.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Cluster addressed through one of its members.
#[derive(Args, Debug, Clone)]
pub struct ClusterTarget {
    /// Any reachable member of the cluster
    #[arg(long)]
    pub seed: String,
    /// Cluster name; resolved from the seed when omitted
    #[arg(long, default_value = "")]
    pub cluster: String,
}

/// ClusterSet addressed through a member of any of its clusters.
#[derive(Args, Debug, Clone)]
pub struct ClusterSetTarget {
    #[arg(long)]
    pub seed: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with defaults
    Init,

    /// Create a cluster on a standalone seed instance
    CreateCluster {
        seed: String,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Add a group member
    AddInstance {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Attach a Read-Replica
    AddReplicaInstance {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Remove a group member or Read-Replica
    RemoveInstance {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Bring a registered member or Read-Replica back
    RejoinInstance {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Hand the primary role to another member
    SetPrimaryInstance {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Switch to single-primary mode
    SwitchToSinglePrimaryMode {
        #[command(flatten)]
        target: ClusterTarget,
        /// Member to keep as primary
        #[arg(long)]
        primary: Option<String>,
    },

    /// Switch to multi-primary mode
    SwitchToMultiPrimaryMode {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Restore quorum from the partition a member belongs to
    ForceQuorumUsingPartitionOf {
        #[command(flatten)]
        target: ClusterTarget,
        partition: String,
    },

    /// Restart a cluster whose members are all offline
    RebootClusterFromCompleteOutage {
        #[command(flatten)]
        target: ClusterTarget,
        #[arg(long)]
        options: Option<String>,
    },

    /// Change a cluster-wide setting
    SetOption {
        #[command(flatten)]
        target: ClusterTarget,
        key: String,
        /// JSON value, e.g. `42`, `"label"` or `null`
        value: String,
    },

    /// Change a setting on one member
    SetInstanceOption {
        #[command(flatten)]
        target: ClusterTarget,
        address: String,
        key: String,
        /// JSON value
        value: String,
    },

    /// Show cluster and member settings
    Options {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Probe members and report health
    Status {
        #[command(flatten)]
        target: ClusterTarget,
        #[arg(long)]
        options: Option<String>,
    },

    /// Show the recorded topology
    Describe {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Reconcile metadata with the live group
    Rescan {
        #[command(flatten)]
        target: ClusterTarget,
        #[arg(long)]
        options: Option<String>,
    },

    /// Stop replication on every member and drop the metadata
    Dissolve {
        #[command(flatten)]
        target: ClusterTarget,
        #[arg(long)]
        options: Option<String>,
    },

    /// Turn a cluster into the primary of a new ClusterSet
    CreateClusterSet {
        #[command(flatten)]
        target: ClusterTarget,
        domain: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Create a replica cluster on a standalone instance
    CreateReplicaCluster {
        #[command(flatten)]
        target: ClusterSetTarget,
        address: String,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Remove a replica cluster from its ClusterSet
    RemoveCluster {
        #[command(flatten)]
        target: ClusterSetTarget,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Bring an invalidated or diverged replica cluster back
    RejoinCluster {
        #[command(flatten)]
        target: ClusterSetTarget,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Planned switch of the ClusterSet primary
    SetPrimaryCluster {
        #[command(flatten)]
        target: ClusterSetTarget,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Failover to a replica cluster without the primary
    ForcePrimaryCluster {
        #[command(flatten)]
        target: ClusterSetTarget,
        name: String,
        #[arg(long)]
        options: Option<String>,
    },

    /// Probe every cluster of a ClusterSet
    ClusterSetStatus {
        #[command(flatten)]
        target: ClusterSetTarget,
        #[arg(long)]
        options: Option<String>,
    },

    /// Show the recorded ClusterSet topology
    DescribeClusterSet {
        #[command(flatten)]
        target: ClusterSetTarget,
    },

    /// Maintain the simulated fleet
    Fleet {
        #[command(subcommand)]
        action: FleetAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FleetAction {
    /// Add a standalone server
    AddServer {
        address: String,
        #[arg(long)]
        server_id: Option<u32>,
        #[arg(long, default_value = "8.0.35")]
        version: String,
    },
    /// Stop a server
    Kill { address: String },
    /// Start a stopped server
    Restart { address: String },
    /// Commit transactions on a server
    Write {
        address: String,
        #[arg(long, default_value_t = 1)]
        count: u64,
    },
    /// Purge a server's binary logs
    Purge { address: String },
    /// List servers and whether they are running
    List,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_operation_with_target() {
        let cli = Cli::try_parse_from([
            "gradmin",
            "--config",
            "/tmp/g.json",
            "add-instance",
            "--seed",
            "127.0.0.1:3310",
            "127.0.0.1:3320",
            "--options",
            r#"{"recoveryMethod":"clone"}"#,
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/g.json"));
        match cli.command {
            Command::AddInstance {
                target,
                address,
                options,
            } => {
                assert_eq!(target.seed, "127.0.0.1:3310");
                assert_eq!(target.cluster, "");
                assert_eq!(address, "127.0.0.1:3320");
                assert_eq!(options.as_deref(), Some(r#"{"recoveryMethod":"clone"}"#));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_fleet_write() {
        let cli = Cli::try_parse_from(["gradmin", "fleet", "write", "127.0.0.1:3310", "--count", "5"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("./gradmin.json"));
        match cli.command {
            Command::Fleet {
                action: FleetAction::Write { address, count },
            } => {
                assert_eq!(address, "127.0.0.1:3310");
                assert_eq!(count, 5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_seed_is_required() {
        assert!(Cli::try_parse_from(["gradmin", "status"]).is_err());
    }
}
