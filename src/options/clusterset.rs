//! Options of ClusterSet operations and ClusterSet channel tunables.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{check_range, explicit, token, OperationOptions};
use crate::errors::{AdminError, AdminResult};
use crate::topology::{validate_cluster_name, RecoveryMethod};

/// Channel option keys, in reporting order.
pub const CHANNEL_OPTION_KEYS: &[&str] = &[
    "clusterSetReplicationConnectRetry",
    "clusterSetReplicationRetryCount",
    "clusterSetReplicationHeartbeatPeriod",
    "clusterSetReplicationCompressionAlgorithms",
    "clusterSetReplicationZstdCompressionLevel",
    "clusterSetReplicationBind",
    "clusterSetReplicationNetworkNamespace",
];

const COMPRESSION_ALGORITHMS: &[&str] = &["zlib", "zstd", "uncompressed"];

/// Tunables of the inbound ClusterSet channel of a replica cluster.
///
/// Absent keys are `None`; an explicit `null` is `Some(None)` and means
/// "built-in default".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterSetChannelOptions {
    #[serde(default, deserialize_with = "explicit", rename = "clusterSetReplicationConnectRetry")]
    pub connect_retry: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit", rename = "clusterSetReplicationRetryCount")]
    pub retry_count: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit", rename = "clusterSetReplicationHeartbeatPeriod")]
    pub heartbeat_period: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "explicit",
        rename = "clusterSetReplicationCompressionAlgorithms"
    )]
    pub compression_algorithms: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "explicit",
        rename = "clusterSetReplicationZstdCompressionLevel"
    )]
    pub zstd_compression_level: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit", rename = "clusterSetReplicationBind")]
    pub bind: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "explicit",
        rename = "clusterSetReplicationNetworkNamespace"
    )]
    pub network_namespace: Option<Option<String>>,
}

impl ClusterSetChannelOptions {
    /// Parse one `setOption` key/value pair.
    pub fn single(key: &str, value: &Value) -> AdminResult<Self> {
        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), value.clone());
        Self::from_json(Some(&Value::Object(map)))
    }

    pub fn validate_values(&self) -> AdminResult<()> {
        if let Some(Some(level)) = self.zstd_compression_level {
            check_range("clusterSetReplicationZstdCompressionLevel", level, 1, 22)?;
        }
        if let Some(Some(period)) = self.heartbeat_period {
            if !(0.0..=4_294_967.0).contains(&period) {
                return Err(AdminError::argument(format!(
                    "Invalid value for option 'clusterSetReplicationHeartbeatPeriod': {}. \
                     Allowed range is 0..4294967.",
                    period
                )));
            }
        }
        if let Some(Some(ref algorithms)) = self.compression_algorithms {
            for algorithm in algorithms.split(',').map(str::trim) {
                if !COMPRESSION_ALGORITHMS.contains(&algorithm.to_ascii_lowercase().as_str()) {
                    return Err(AdminError::argument(format!(
                        "Invalid value for option 'clusterSetReplicationCompressionAlgorithms': \
                         '{}'. Allowed values: zlib, zstd, uncompressed.",
                        algorithm
                    )));
                }
            }
        }
        Ok(())
    }

    /// Set keys as stored in the metadata, explicit `null` included.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v);
            }
        };
        fn json<T: Into<Value>>(v: &Option<Option<T>>) -> Option<Value>
        where
            T: Clone,
        {
            v.as_ref()
                .map(|inner| inner.clone().map(Into::into).unwrap_or(Value::Null))
        }
        put(CHANNEL_OPTION_KEYS[0], json(&self.connect_retry));
        put(CHANNEL_OPTION_KEYS[1], json(&self.retry_count));
        put(CHANNEL_OPTION_KEYS[2], json(&self.heartbeat_period));
        put(CHANNEL_OPTION_KEYS[3], json(&self.compression_algorithms));
        put(CHANNEL_OPTION_KEYS[4], json(&self.zstd_compression_level));
        put(CHANNEL_OPTION_KEYS[5], json(&self.bind));
        put(CHANNEL_OPTION_KEYS[6], json(&self.network_namespace));
        map
    }

    pub fn is_empty(&self) -> bool {
        self.to_map().is_empty()
    }
}

impl OperationOptions for ClusterSetChannelOptions {
    const OPERATION: &'static str = "setOption";
    const KEYS: &'static [&'static str] = CHANNEL_OPTION_KEYS;

    fn validate(&self) -> AdminResult<()> {
        self.validate_values()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterSetOptions {
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for CreateClusterSetOptions {
    const OPERATION: &'static str = "createClusterSet";
    const KEYS: &'static [&'static str] = &["dryRun"];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplicaClusterOptions {
    #[serde(default, deserialize_with = "token")]
    pub recovery_method: Option<RecoveryMethod>,
    #[serde(default)]
    pub recovery_progress: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(flatten)]
    pub channel: ClusterSetChannelOptions,
}

impl CreateReplicaClusterOptions {
    pub fn recovery_method(&self) -> RecoveryMethod {
        self.recovery_method.unwrap_or_default()
    }
}

impl OperationOptions for CreateReplicaClusterOptions {
    const OPERATION: &'static str = "createReplicaCluster";
    const KEYS: &'static [&'static str] = &["recoveryMethod", "recoveryProgress", "timeout", "dryRun"];

    fn accepts(key: &str) -> bool {
        Self::KEYS.contains(&key) || CHANNEL_OPTION_KEYS.contains(&key)
    }

    fn validate(&self) -> AdminResult<()> {
        if let Some(p) = self.recovery_progress {
            check_range("recoveryProgress", p, 0, 2)?;
        }
        self.channel.validate_values()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveClusterOptions {
    /// Remove even when the cluster is unreachable or cannot sync.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for RemoveClusterOptions {
    const OPERATION: &'static str = "removeCluster";
    const KEYS: &'static [&'static str] = &["force", "timeout", "dryRun"];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinClusterOptions {
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for RejoinClusterOptions {
    const OPERATION: &'static str = "rejoinCluster";
    const KEYS: &'static [&'static str] = &["dryRun"];
}

fn check_cluster_names(names: &[String]) -> AdminResult<()> {
    names.iter().try_for_each(|n| validate_cluster_name(n))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPrimaryClusterOptions {
    /// Seconds the promoted cluster gets to catch up.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Unreachable replica clusters to invalidate instead of failing.
    #[serde(default)]
    pub invalidate_replica_clusters: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for SetPrimaryClusterOptions {
    const OPERATION: &'static str = "setPrimaryCluster";
    const KEYS: &'static [&'static str] = &["timeout", "invalidateReplicaClusters", "dryRun"];

    fn validate(&self) -> AdminResult<()> {
        check_cluster_names(&self.invalidate_replica_clusters)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForcePrimaryClusterOptions {
    #[serde(default)]
    pub invalidate_replica_clusters: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for ForcePrimaryClusterOptions {
    const OPERATION: &'static str = "forcePrimaryCluster";
    const KEYS: &'static [&'static str] = &["invalidateReplicaClusters", "dryRun"];

    fn validate(&self) -> AdminResult<()> {
        check_cluster_names(&self.invalidate_replica_clusters)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn test_zstd_level_range() {
        let err = CreateReplicaClusterOptions::from_json(Some(
            &json!({"clusterSetReplicationZstdCompressionLevel": 999}),
        ))
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
        let ok = CreateReplicaClusterOptions::from_json(Some(
            &json!({"clusterSetReplicationZstdCompressionLevel": 5, "recoveryMethod": "clone"}),
        ))
        .unwrap();
        assert_eq!(ok.channel.zstd_compression_level, Some(Some(5)));
        assert_eq!(ok.recovery_method(), RecoveryMethod::Clone);
    }

    #[test]
    fn test_null_survives_in_map() {
        let opts = ClusterSetChannelOptions::single("clusterSetReplicationBind", &Value::Null).unwrap();
        let map = opts.to_map();
        assert_eq!(map.get("clusterSetReplicationBind"), Some(&Value::Null));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_unknown_channel_option() {
        let err = ClusterSetChannelOptions::single("clusterSetReplicationSpeed", &json!(1)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
    }

    #[test]
    fn test_compression_algorithms_checked() {
        assert!(ClusterSetChannelOptions::single(
            "clusterSetReplicationCompressionAlgorithms",
            &json!("zstd,zlib")
        )
        .is_ok());
        assert!(ClusterSetChannelOptions::single(
            "clusterSetReplicationCompressionAlgorithms",
            &json!("lz4")
        )
        .is_err());
    }
}
