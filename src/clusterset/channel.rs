//! The inbound ClusterSet channel of a replica cluster
//!
//! Channel options live in the metadata at two levels:
//! - `options`: what the operator configured, an explicit `null` kept
//! - `applied_options`: what the live channel was last built with
//!
//! An option left out or set to `null` gets the built-in ClusterSet value,
//! or the server default where there is none. A value can only be cleared
//! from a channel through a reset, so a `null` transition forces a full
//! rebuild while any other change is applied in place.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::changes::{run_reverting, ChangeSet};
use crate::cluster::accounts::{account_spec, create_account};
use crate::context::AdminContext;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{AccountSpec, ChannelConfig, FailoverSource, Statement, CLUSTERSET_CHANNEL};
use crate::metadata::{self, ClusterRecord, TopologyMetadata};
use crate::observability::{log_event, Event};
use crate::options::{ClusterSetChannelOptions, CHANNEL_OPTION_KEYS};
use crate::quorum::{channel, cluster_primary, ChannelStatus, ClusterSnapshot};
use crate::replica::PRIMARY_WEIGHTS;
use crate::topology::InstanceAddress;

pub const BUILTIN_CONNECT_RETRY: u64 = 3;
pub const BUILTIN_RETRY_COUNT: u64 = 10;

/// Where a replica cluster replicates from: the primary cluster's group.
#[derive(Debug, Clone)]
pub struct InboundSource {
    pub group_name: Uuid,
    pub primary: InstanceAddress,
    pub seed: InstanceAddress,
}

impl InboundSource {
    /// Live source for replicas of `cluster_id`, if it has a writable member.
    pub fn of(ctx: &AdminContext, md: &TopologyMetadata, cluster_id: &Uuid) -> Option<Self> {
        let cluster = md.cluster(cluster_id)?;
        let primary = cluster_primary(ctx, md, cluster_id)?;
        let seed = md
            .members_of(cluster_id)
            .first()
            .map(|m| m.address.clone())
            .unwrap_or_else(|| primary.clone());
        Some(Self {
            group_name: cluster.group_name,
            primary,
            seed,
        })
    }

    pub fn failover(&self) -> Vec<FailoverSource> {
        let (primary_weight, secondary_weight) = PRIMARY_WEIGHTS;
        vec![FailoverSource::Group {
            group_name: self.group_name,
            seed: self.seed.clone(),
            primary_weight,
            secondary_weight,
        }]
    }

    /// Whether a live channel already fails over within this source group.
    pub fn is_source_of(&self, status: &ChannelStatus) -> bool {
        let prefix = format!("group {} ", self.group_name);
        status.sources.iter().any(|s| s.starts_with(&prefix))
    }
}

/// Set one channel field from a stored option value; `null` clears it.
fn assign(config: &mut ChannelConfig, key: &str, value: &Value) {
    let text = || value.as_str().map(str::to_string);
    match key {
        "clusterSetReplicationConnectRetry" => config.connect_retry = value.as_u64(),
        "clusterSetReplicationRetryCount" => config.retry_count = value.as_u64(),
        "clusterSetReplicationHeartbeatPeriod" => config.heartbeat_period = value.as_f64(),
        "clusterSetReplicationCompressionAlgorithms" => config.compression_algorithms = text(),
        "clusterSetReplicationZstdCompressionLevel" => config.zstd_compression_level = value.as_u64(),
        "clusterSetReplicationBind" => config.bind = text(),
        "clusterSetReplicationNetworkNamespace" => config.network_namespace = text(),
        _ => {}
    }
}

fn config_value(config: &ChannelConfig, key: &str) -> Value {
    fn json<T: Clone + Into<Value>>(v: &Option<T>) -> Value {
        v.clone().map(Into::into).unwrap_or(Value::Null)
    }
    match key {
        "clusterSetReplicationConnectRetry" => json(&config.connect_retry),
        "clusterSetReplicationRetryCount" => json(&config.retry_count),
        "clusterSetReplicationHeartbeatPeriod" => json(&config.heartbeat_period),
        "clusterSetReplicationCompressionAlgorithms" => json(&config.compression_algorithms),
        "clusterSetReplicationZstdCompressionLevel" => json(&config.zstd_compression_level),
        "clusterSetReplicationBind" => json(&config.bind),
        "clusterSetReplicationNetworkNamespace" => json(&config.network_namespace),
        _ => Value::Null,
    }
}

fn status_value(status: &ChannelStatus, key: &str) -> Value {
    fn json<T: Clone + Into<Value>>(v: &Option<T>) -> Value {
        v.clone().map(Into::into).unwrap_or(Value::Null)
    }
    match key {
        "clusterSetReplicationConnectRetry" => json(&status.connect_retry),
        "clusterSetReplicationRetryCount" => json(&status.retry_count),
        "clusterSetReplicationHeartbeatPeriod" => json(&status.heartbeat_period),
        "clusterSetReplicationCompressionAlgorithms" => json(&status.compression_algorithms),
        "clusterSetReplicationZstdCompressionLevel" => json(&status.zstd_compression_level),
        "clusterSetReplicationBind" => json(&status.bind),
        "clusterSetReplicationNetworkNamespace" => json(&status.network_namespace),
        _ => Value::Null,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

/// Settings a freshly created channel is given.
pub fn creation_config(options: &BTreeMap<String, Value>) -> ChannelConfig {
    let mut config = ChannelConfig {
        auto_failover: Some(true),
        connect_retry: Some(BUILTIN_CONNECT_RETRY),
        retry_count: Some(BUILTIN_RETRY_COUNT),
        ..ChannelConfig::default()
    };
    for (key, value) in options.iter().filter(|(_, v)| !v.is_null()) {
        assign(&mut config, key, value);
    }
    config
}

/// Configured options with the explicit `null`s dropped.
pub fn without_nulls(options: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    options
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Values the live channel reports once built from `options`.
pub fn effective_config(options: &BTreeMap<String, Value>) -> ChannelConfig {
    let defaults = ChannelConfig::server_defaults();
    let mut config = creation_config(options);
    for key in CHANNEL_OPTION_KEYS {
        if config_value(&config, key).is_null() {
            assign(&mut config, key, &config_value(&defaults, key));
        }
    }
    config
}

/// Option keys whose live value differs from what `options` configures.
pub fn mismatches(options: &BTreeMap<String, Value>, status: &ChannelStatus) -> Vec<String> {
    let expected = effective_config(options);
    CHANNEL_OPTION_KEYS
        .iter()
        .filter(|key| !same_value(&config_value(&expected, key), &status_value(status, key)))
        .map(|key| key.to_string())
        .collect()
}

fn is_null(options: &BTreeMap<String, Value>, key: &str) -> bool {
    options.get(key).is_some_and(Value::is_null)
}

/// Whether going from `applied` to `configured` needs a channel reset.
pub fn needs_rebuild(configured: &BTreeMap<String, Value>, applied: &BTreeMap<String, Value>) -> bool {
    CHANNEL_OPTION_KEYS
        .iter()
        .any(|key| is_null(configured, key) != is_null(applied, key))
}

/// Fields to change in place when going from `applied` to `configured`.
pub fn in_place_changes(configured: &BTreeMap<String, Value>, applied: &BTreeMap<String, Value>) -> ChannelConfig {
    let target = effective_config(configured);
    let mut config = ChannelConfig::default();
    for key in CHANNEL_OPTION_KEYS {
        if configured.get(*key) != applied.get(*key) {
            assign(&mut config, key, &config_value(&target, key));
        }
    }
    config
}

/// Create (or recreate with a fresh password) the account a replica
/// cluster's channel connects with.
pub fn refresh_channel_account(
    changes: &mut ChangeSet<'_>,
    writer: &InstanceAddress,
    cluster: &ClusterRecord,
    user: &str,
    cert_subject: Option<&str>,
) -> AdminResult<AccountSpec> {
    let spec = account_spec(user.to_string(), cluster, cert_subject);
    create_account(changes, writer, &spec)?;
    Ok(spec)
}

/// Build and start the inbound channel on `replica_primary`.
pub fn start_inbound_channel(
    changes: &mut ChangeSet<'_>,
    replica_primary: &InstanceAddress,
    source: &InboundSource,
    account: &AccountSpec,
    options: &BTreeMap<String, Value>,
) -> AdminResult<()> {
    let channel = CLUSTERSET_CHANNEL.to_string();
    let config = ChannelConfig {
        source: Some(source.primary.clone()),
        user: Some(account.user.clone()),
        password: account.password.clone(),
        ..creation_config(options)
    };
    changes.apply_reversible(
        replica_primary,
        Statement::ChangeSource {
            channel: channel.clone(),
            config,
        },
        Statement::ResetReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(
        replica_primary,
        Statement::SetFailoverSources {
            channel: channel.clone(),
            sources: source.failover(),
        },
    )?;
    changes.apply_reversible(
        replica_primary,
        Statement::StartReplica {
            channel: channel.clone(),
        },
        Statement::StopReplica { channel },
    )?;
    Ok(())
}

/// Point a running inbound channel at a new source group.
pub fn repoint_inbound_channel(
    changes: &mut ChangeSet<'_>,
    replica_primary: &InstanceAddress,
    source: &InboundSource,
    account: &AccountSpec,
) -> AdminResult<()> {
    let channel = CLUSTERSET_CHANNEL.to_string();
    changes.apply_reversible(
        replica_primary,
        Statement::StopReplica {
            channel: channel.clone(),
        },
        Statement::StartReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(
        replica_primary,
        Statement::ChangeSource {
            channel: channel.clone(),
            config: ChannelConfig {
                source: Some(source.primary.clone()),
                user: Some(account.user.clone()),
                password: account.password.clone(),
                ..ChannelConfig::default()
            },
        },
    )?;
    changes.apply(
        replica_primary,
        Statement::SetFailoverSources {
            channel: channel.clone(),
            sources: source.failover(),
        },
    )?;
    changes.apply_reversible(
        replica_primary,
        Statement::StartReplica {
            channel: channel.clone(),
        },
        Statement::StopReplica { channel },
    )?;
    Ok(())
}

/// Apply option changes to the live channel without a reset.
pub fn update_inbound_channel(
    changes: &mut ChangeSet<'_>,
    replica_primary: &InstanceAddress,
    config: ChannelConfig,
) -> AdminResult<()> {
    let channel = CLUSTERSET_CHANNEL.to_string();
    changes.apply_reversible(
        replica_primary,
        Statement::StopReplica {
            channel: channel.clone(),
        },
        Statement::StartReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(
        replica_primary,
        Statement::ChangeSource {
            channel: channel.clone(),
            config,
        },
    )?;
    changes.apply_reversible(
        replica_primary,
        Statement::StartReplica {
            channel: channel.clone(),
        },
        Statement::StopReplica { channel },
    )?;
    Ok(())
}

/// Stop and remove the inbound channel of `address`.
pub fn drop_inbound_channel(changes: &mut ChangeSet<'_>, address: &InstanceAddress) -> AdminResult<()> {
    let channel = CLUSTERSET_CHANNEL.to_string();
    changes.apply_reversible(
        address,
        Statement::StopReplica {
            channel: channel.clone(),
        },
        Statement::StartReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(address, Statement::ResetReplica { channel })?;
    Ok(())
}

/// Make the group of `address` reject client writes.
pub fn fence(changes: &mut ChangeSet<'_>, address: &InstanceAddress) -> AdminResult<()> {
    changes.apply_reversible(
        address,
        Statement::SetSuperReadOnly { enabled: true },
        Statement::SetSuperReadOnly { enabled: false },
    )?;
    Ok(())
}

pub fn unfence(changes: &mut ChangeSet<'_>, address: &InstanceAddress) -> AdminResult<()> {
    changes.apply_reversible(
        address,
        Statement::SetSuperReadOnly { enabled: false },
        Statement::SetSuperReadOnly { enabled: true },
    )?;
    Ok(())
}

/// Move the inbound channel of a replica cluster from its old primary to
/// the new one after a primary change inside that cluster.
pub(crate) fn relocate_inbound_channel(
    changes: &mut ChangeSet<'_>,
    md: &TopologyMetadata,
    cluster_id: &Uuid,
    from: &InstanceAddress,
    to: &InstanceAddress,
) -> AdminResult<()> {
    let ctx = changes.ctx();
    let Some(cs) = md.clusterset_of(cluster_id) else {
        return Ok(());
    };
    let member = cs
        .member(cluster_id)
        .ok_or_else(|| AdminError::internal("The cluster has no ClusterSet member record."))?;
    let cluster = md
        .cluster(cluster_id)
        .ok_or_else(|| AdminError::internal("The cluster has no metadata record."))?;
    let source = InboundSource::of(ctx, md, &cs.primary_cluster).ok_or_else(|| {
        AdminError::precondition(
            AdminErrorKind::InvalidState,
            "The PRIMARY cluster of the ClusterSet is not available; the replication channel \
             cannot be moved to the new primary.",
        )
    })?;
    let user = member.replication_account.clone().ok_or_else(|| {
        AdminError::internal(format!(
            "No replication account is recorded for cluster '{}'.",
            cluster.name
        ))
    })?;

    if ctx.is_reachable(from) && channel(ctx, from, CLUSTERSET_CHANNEL)?.is_some() {
        drop_inbound_channel(changes, from)?;
    }
    let subject = md.instance(to).and_then(|i| i.cert_subject.clone());
    let account = refresh_channel_account(changes, &source.primary, cluster, &user, subject.as_deref())?;
    start_inbound_channel(changes, to, &source, &account, &member.applied_options)?;
    log_event(
        Event::ChannelRebuilt,
        &[
            ("cluster", cluster.name.as_str()),
            ("instance", to.to_string().as_str()),
            ("reason", "primary_changed"),
        ],
    );
    Ok(())
}

/// `setOption` of a `clusterSetReplication*` key.
///
/// The metadata always takes the value. A replica cluster keeps an explicit
/// `null` until its channel is rebuilt; the primary cluster has no channel
/// and drops it.
pub(crate) fn set_channel_options(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    options: &ClusterSetChannelOptions,
) -> AdminResult<()> {
    let keys: Vec<String> = options.to_map().keys().cloned().collect();
    let Some(cs) = snapshot.clusterset() else {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' is not part of a ClusterSet; the option '{}' cannot be set.",
                snapshot.name(),
                keys.join("', '")
            ),
        ));
    };
    let clusterset_id = cs.clusterset_id;
    let cluster_id = snapshot.cluster_id();
    let is_primary = cs.primary_cluster == cluster_id;
    let (writer, mut md) = snapshot.metadata_writer(ctx, "setOption")?;

    run_reverting(ctx, false, |changes| {
        let member = md
            .clusterset_mut(&clusterset_id)
            .and_then(|cs| cs.member_mut(&cluster_id))
            .ok_or_else(|| AdminError::internal("The cluster has no ClusterSet member record."))?;
        for (key, value) in options.to_map() {
            if is_primary && value.is_null() {
                member.options.remove(&key);
            } else {
                member.options.insert(key, value);
            }
        }
        metadata::store(changes, &writer, &mut md)
    })?;

    let output = ctx.output();
    for key in &keys {
        if is_primary {
            output.warning(format!(
                "The option '{}' was stored for cluster '{}'. It has no effect while the cluster \
                 is the PRIMARY of the ClusterSet and applies once it becomes a replica.",
                key,
                snapshot.name()
            ));
        } else {
            output.warning(format!(
                "The option '{}' was stored for cluster '{}'. Run rejoinCluster('{}') to apply \
                 it to the replication channel.",
                key,
                snapshot.name(),
                snapshot.name()
            ));
        }
    }
    output.info(format!(
        "Successfully set the value of '{}' for cluster '{}'.",
        keys.join("', '"),
        snapshot.name()
    ));
    Ok(())
}
