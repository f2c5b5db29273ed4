//! CLI command implementations
//!
//! Each invocation:
//! 1. loads `gradmin.json` and sets the log severity
//! 2. loads the simulated fleet from its JSON file (empty if absent)
//! 3. runs one operation against it
//! 4. writes the fleet back, whatever the outcome
//! 5. prints one JSON response

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use super::args::{ClusterSetTarget, ClusterTarget, Command, FleetAction};
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{cli_error_response, error_response, ok_response, write_json};
use crate::cluster;
use crate::clusterset;
use crate::console::{Console, NonInteractiveConsole, StdinConsole};
use crate::context::{AdminContext, ClusterHandle, ClusterSetHandle};
use crate::errors::{AdminError, AdminResult};
use crate::gateway::{ServerVersion, SimFleet, SimServerSpec};
use crate::observability::{log_event, Event, Logger};
use crate::options::OperationOptions;
use crate::replica::add_replica_instance;
use crate::status;
use crate::topology::InstanceAddress;

/// Result of one invocation: the response to print and, when the
/// operation failed, its error.
#[derive(Debug)]
pub struct Outcome {
    pub response: Value,
    pub error: Option<AdminError>,
}

/// Main CLI entry point
///
/// Parses arguments, runs the command and prints its response.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    match run_command(&cli.config, cli.command) {
        Ok(outcome) => {
            write_json(&outcome.response)?;
            match outcome.error {
                Some(ref error) => Err(CliError::operation_failed(error)),
                None => Ok(()),
            }
        }
        Err(e) => {
            write_json(&cli_error_response(e.code_str(), e.message()))?;
            Err(e)
        }
    }
}

/// Run one command against the configuration at `config_path`.
pub fn run_command(config_path: &Path, cmd: Command) -> CliResult<Outcome> {
    if let Command::Init = cmd {
        let config = Config::init(config_path)?;
        let data = json!({
            "config": config_path.display().to_string(),
            "fleetFile": config.fleet_path(config_path).display().to_string(),
        });
        return Ok(Outcome {
            response: ok_response(data, &[]),
            error: None,
        });
    }

    let session = Session::open(config_path)?;
    let result = dispatch(&session.ctx, &session.fleet, cmd);
    session.save()?;

    let messages = session.ctx.output().take();
    Ok(match result {
        Ok(data) => Outcome {
            response: ok_response(data, &messages),
            error: None,
        },
        Err(error) => Outcome {
            response: error_response(&error, &messages),
            error: Some(error),
        },
    })
}

/// Loaded configuration and fleet for one invocation.
struct Session {
    fleet_path: PathBuf,
    fleet: SimFleet,
    ctx: AdminContext,
}

impl Session {
    fn open(config_path: &Path) -> CliResult<Self> {
        let config = Config::load(config_path)?;
        Logger::set_min_severity(config.log_level);
        let config_text = config_path.display().to_string();
        log_event(Event::ConfigLoaded, &[("path", config_text.as_str())]);

        let fleet_path = config.fleet_path(config_path);
        let fleet = load_fleet(&fleet_path)?;

        let console: Arc<dyn Console> = if config.interactive {
            Arc::new(StdinConsole)
        } else {
            Arc::new(NonInteractiveConsole)
        };
        let ctx = AdminContext::new(Arc::new(fleet.clone()), console, config.engine_settings());

        Ok(Self {
            fleet_path,
            fleet,
            ctx,
        })
    }

    fn save(&self) -> CliResult<()> {
        let body = self
            .fleet
            .to_json()
            .map_err(|e| CliError::fleet_error(format!("Failed to serialize fleet: {}", e)))?;
        fs::write(&self.fleet_path, body).map_err(|e| {
            CliError::fleet_error(format!(
                "Failed to write fleet {}: {}",
                self.fleet_path.display(),
                e
            ))
        })?;
        let path_text = self.fleet_path.display().to_string();
        log_event(Event::FleetSaved, &[("path", path_text.as_str())]);
        Ok(())
    }
}

fn load_fleet(path: &Path) -> CliResult<SimFleet> {
    if !path.exists() {
        return Ok(SimFleet::new());
    }
    let body = fs::read_to_string(path)
        .map_err(|e| CliError::fleet_error(format!("Failed to read fleet {}: {}", path.display(), e)))?;
    let fleet = SimFleet::from_json(&body)
        .map_err(|e| CliError::fleet_error(format!("Corrupt fleet file {}: {}", path.display(), e)))?;
    let path_text = path.display().to_string();
    log_event(Event::FleetLoaded, &[("path", path_text.as_str())]);
    Ok(fleet)
}

fn address(text: &str) -> AdminResult<InstanceAddress> {
    text.parse()
}

fn cluster_handle(target: &ClusterTarget) -> AdminResult<ClusterHandle> {
    Ok(ClusterHandle::new(target.cluster.clone(), address(&target.seed)?))
}

fn clusterset_handle(target: &ClusterSetTarget) -> AdminResult<ClusterSetHandle> {
    Ok(ClusterSetHandle::new(address(&target.seed)?))
}

/// Parse `--options` into the operation's typed options.
fn options<T: OperationOptions>(text: Option<&str>) -> AdminResult<T> {
    let value = match text {
        None => return Ok(T::default()),
        Some(text) => serde_json::from_str::<Value>(text).map_err(|e| {
            AdminError::argument(format!("{}: --options is not valid JSON: {}", T::OPERATION, e))
        })?,
    };
    T::from_json(Some(&value))
}

/// Option value given on the command line: JSON, or a bare string.
fn option_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn data<T: Serialize>(value: &T) -> AdminResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| AdminError::internal(format!("Failed to serialize result: {}", e)))
}

fn done() -> AdminResult<Value> {
    Ok(Value::Null)
}

fn dispatch(ctx: &AdminContext, fleet: &SimFleet, cmd: Command) -> AdminResult<Value> {
    match cmd {
        Command::Init => done(),

        Command::CreateCluster {
            seed,
            name,
            options: opts,
        } => {
            let handle = cluster::create_cluster(ctx, &address(&seed)?, &name, options(opts.as_deref())?)?;
            Ok(json!({"clusterName": handle.name, "seed": handle.seed}))
        }
        Command::AddInstance {
            target,
            address: member,
            options: opts,
        } => {
            cluster::add_instance(ctx, &cluster_handle(&target)?, &address(&member)?, options(opts.as_deref())?)?;
            done()
        }
        Command::AddReplicaInstance {
            target,
            address: replica,
            options: opts,
        } => {
            add_replica_instance(ctx, &cluster_handle(&target)?, &address(&replica)?, options(opts.as_deref())?)?;
            done()
        }
        Command::RemoveInstance {
            target,
            address: member,
            options: opts,
        } => {
            cluster::remove_instance(ctx, &cluster_handle(&target)?, &address(&member)?, options(opts.as_deref())?)?;
            done()
        }
        Command::RejoinInstance {
            target,
            address: member,
            options: opts,
        } => {
            cluster::rejoin_instance(ctx, &cluster_handle(&target)?, &address(&member)?, options(opts.as_deref())?)?;
            done()
        }
        Command::SetPrimaryInstance {
            target,
            address: member,
            options: opts,
        } => {
            cluster::set_primary_instance(
                ctx,
                &cluster_handle(&target)?,
                &address(&member)?,
                options(opts.as_deref())?,
            )?;
            done()
        }
        Command::SwitchToSinglePrimaryMode { target, primary } => {
            let primary = primary.as_deref().map(address).transpose()?;
            cluster::switch_to_single_primary_mode(ctx, &cluster_handle(&target)?, primary.as_ref())?;
            done()
        }
        Command::SwitchToMultiPrimaryMode { target } => {
            cluster::switch_to_multi_primary_mode(ctx, &cluster_handle(&target)?)?;
            done()
        }
        Command::ForceQuorumUsingPartitionOf { target, partition } => {
            cluster::force_quorum_using_partition_of(ctx, &cluster_handle(&target)?, &address(&partition)?)?;
            done()
        }
        Command::RebootClusterFromCompleteOutage { target, options: opts } => {
            let handle =
                cluster::reboot_cluster_from_complete_outage(ctx, &cluster_handle(&target)?, options(opts.as_deref())?)?;
            Ok(json!({"clusterName": handle.name, "seed": handle.seed}))
        }
        Command::SetOption { target, key, value } => {
            cluster::set_option(ctx, &cluster_handle(&target)?, &key, &option_value(&value))?;
            done()
        }
        Command::SetInstanceOption {
            target,
            address: member,
            key,
            value,
        } => {
            cluster::set_instance_option(
                ctx,
                &cluster_handle(&target)?,
                &address(&member)?,
                &key,
                &option_value(&value),
            )?;
            done()
        }
        Command::Options { target } => data(&cluster::options(ctx, &cluster_handle(&target)?)?),
        Command::Status { target, options: opts } => {
            data(&status::status(ctx, &cluster_handle(&target)?, options(opts.as_deref())?)?)
        }
        Command::Describe { target } => data(&status::describe(ctx, &cluster_handle(&target)?)?),
        Command::Rescan { target, options: opts } => {
            data(&cluster::rescan(ctx, &cluster_handle(&target)?, options(opts.as_deref())?)?)
        }
        Command::Dissolve { target, options: opts } => {
            cluster::dissolve(ctx, &cluster_handle(&target)?, options(opts.as_deref())?)?;
            done()
        }

        Command::CreateClusterSet {
            target,
            domain,
            options: opts,
        } => {
            let handle =
                clusterset::create_cluster_set(ctx, &cluster_handle(&target)?, &domain, options(opts.as_deref())?)?;
            Ok(json!({"domainName": domain, "seed": handle.seed}))
        }
        Command::CreateReplicaCluster {
            target,
            address: seed,
            name,
            options: opts,
        } => {
            let handle = clusterset::create_replica_cluster(
                ctx,
                &clusterset_handle(&target)?,
                &address(&seed)?,
                &name,
                options(opts.as_deref())?,
            )?;
            Ok(json!({"clusterName": handle.name, "seed": handle.seed}))
        }
        Command::RemoveCluster {
            target,
            name,
            options: opts,
        } => {
            clusterset::remove_cluster(ctx, &clusterset_handle(&target)?, &name, options(opts.as_deref())?)?;
            done()
        }
        Command::RejoinCluster {
            target,
            name,
            options: opts,
        } => {
            clusterset::rejoin_cluster(ctx, &clusterset_handle(&target)?, &name, options(opts.as_deref())?)?;
            done()
        }
        Command::SetPrimaryCluster {
            target,
            name,
            options: opts,
        } => {
            clusterset::set_primary_cluster(ctx, &clusterset_handle(&target)?, &name, options(opts.as_deref())?)?;
            done()
        }
        Command::ForcePrimaryCluster {
            target,
            name,
            options: opts,
        } => {
            clusterset::force_primary_cluster(ctx, &clusterset_handle(&target)?, &name, options(opts.as_deref())?)?;
            done()
        }
        Command::ClusterSetStatus { target, options: opts } => data(&status::clusterset_status(
            ctx,
            &clusterset_handle(&target)?,
            options(opts.as_deref())?,
        )?),
        Command::DescribeClusterSet { target } => {
            data(&status::describe_clusterset(ctx, &clusterset_handle(&target)?)?)
        }

        Command::Fleet { action } => fleet_action(fleet, action),
    }
}

fn fleet_action(fleet: &SimFleet, action: FleetAction) -> AdminResult<Value> {
    match action {
        FleetAction::AddServer {
            address: text,
            server_id,
            version,
        } => {
            let server = address(&text)?;
            let version: ServerVersion = version
                .parse()
                .map_err(|e| AdminError::argument(format!("Invalid server version '{}': {}", version, e)))?;
            let uuid = fleet.add_server_with(
                &server,
                SimServerSpec {
                    server_id,
                    server_uuid: None,
                    version,
                },
            );
            Ok(json!({"address": server, "serverUuid": uuid}))
        }
        FleetAction::Kill { address: text } => {
            let server = address(&text)?;
            fleet.kill(&server).map_err(|e| AdminError::connectivity(&server, e))?;
            done()
        }
        FleetAction::Restart { address: text } => {
            let server = address(&text)?;
            fleet.restart(&server).map_err(|e| AdminError::connectivity(&server, e))?;
            done()
        }
        FleetAction::Write { address: text, count } => {
            let server = address(&text)?;
            fleet
                .write_transactions(&server, count)
                .map_err(|e| AdminError::connectivity(&server, e))?;
            Ok(json!({"gtidExecuted": fleet.gtid_executed(&server).map(|g| g.to_string())}))
        }
        FleetAction::Purge { address: text } => {
            let server = address(&text)?;
            fleet
                .purge_binary_logs(&server)
                .map_err(|e| AdminError::connectivity(&server, e))?;
            done()
        }
        FleetAction::List => {
            let servers: Vec<Value> = fleet
                .addresses()
                .into_iter()
                .map(|a| json!({"address": a.to_string(), "alive": fleet.is_alive(&a)}))
                .collect();
            Ok(Value::Array(servers))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gradmin.json");
        fs::write(&path, r#"{"poll_interval_ms": 1, "state_wait_attempts": 5}"#).unwrap();
        (dir, path)
    }

    fn target(seed: &str) -> ClusterTarget {
        ClusterTarget {
            seed: seed.to_string(),
            cluster: String::new(),
        }
    }

    fn run_ok(path: &Path, cmd: Command) -> Value {
        let outcome = run_command(path, cmd).unwrap();
        assert!(outcome.error.is_none(), "{}", outcome.response);
        outcome.response
    }

    fn add_server(path: &Path, address: &str) {
        run_ok(
            path,
            Command::Fleet {
                action: FleetAction::AddServer {
                    address: address.to_string(),
                    server_id: None,
                    version: "8.0.35".to_string(),
                },
            },
        );
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gradmin.json");
        let response = run_ok(&path, Command::Init);
        assert_eq!(response["status"], "ok");
        assert!(Config::load(&path).is_ok());
        assert!(run_command(&path, Command::Init).is_err());
    }

    #[test]
    fn test_fleet_persists_between_invocations() {
        let (dir, path) = setup();
        add_server(&path, "127.0.0.1:3310");
        assert!(dir.path().join("gradmin-fleet.json").exists());

        run_ok(
            &path,
            Command::Fleet {
                action: FleetAction::Kill {
                    address: "127.0.0.1:3310".to_string(),
                },
            },
        );
        let response = run_ok(&path, Command::Fleet { action: FleetAction::List });
        assert_eq!(response["data"][0]["address"], "127.0.0.1:3310");
        assert_eq!(response["data"][0]["alive"], false);
    }

    #[test]
    fn test_cluster_lifecycle_through_cli() {
        let (_dir, path) = setup();
        for port in [3310, 3320, 3330] {
            add_server(&path, &format!("127.0.0.1:{}", port));
        }
        let created = run_ok(
            &path,
            Command::CreateCluster {
                seed: "127.0.0.1:3310".to_string(),
                name: "prod".to_string(),
                options: None,
            },
        );
        assert_eq!(created["data"]["clusterName"], "prod");

        for member in ["127.0.0.1:3320", "127.0.0.1:3330"] {
            run_ok(
                &path,
                Command::AddInstance {
                    target: target("127.0.0.1:3310"),
                    address: member.to_string(),
                    options: Some(r#"{"recoveryMethod":"incremental"}"#.to_string()),
                },
            );
        }

        let status = run_ok(
            &path,
            Command::Status {
                target: target("127.0.0.1:3320"),
                options: None,
            },
        );
        let replica_set = &status["data"]["defaultReplicaSet"];
        assert_eq!(replica_set["status"], "OK");
        assert_eq!(replica_set["primary"], "127.0.0.1:3310");
        assert_eq!(replica_set["topology"].as_object().unwrap().len(), 3);

        let described = run_ok(&path, Command::Describe { target: target("127.0.0.1:3330") });
        assert_eq!(described["data"]["clusterName"], "prod");
    }

    #[test]
    fn test_operation_failure_is_reported_in_envelope() {
        let (_dir, path) = setup();
        add_server(&path, "127.0.0.1:3310");
        let outcome = run_command(
            &path,
            Command::CreateCluster {
                seed: "127.0.0.1:3310".to_string(),
                name: "prod".to_string(),
                options: Some(r#"{"verbose": true}"#.to_string()),
            },
        )
        .unwrap();
        let error = outcome.error.unwrap();
        assert_eq!(error.category().as_str(), "ArgumentError");
        assert_eq!(outcome.response["status"], "error");
        assert_eq!(outcome.response["category"], "ArgumentError");
    }

    #[test]
    fn test_malformed_options_json_is_argument_error() {
        let (_dir, path) = setup();
        add_server(&path, "127.0.0.1:3310");
        let outcome = run_command(
            &path,
            Command::Status {
                target: target("127.0.0.1:3310"),
                options: Some("{extended".to_string()),
            },
        )
        .unwrap();
        assert_eq!(outcome.response["category"], "ArgumentError");
    }

    #[test]
    fn test_missing_config_is_cli_error() {
        let dir = TempDir::new().unwrap();
        let err = run_command(&dir.path().join("absent.json"), Command::Fleet { action: FleetAction::List })
            .unwrap_err();
        assert_eq!(err.code_str(), "GRADMIN_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_corrupt_fleet_is_fleet_error() {
        let (dir, path) = setup();
        fs::write(dir.path().join("gradmin-fleet.json"), "{ not json").unwrap();
        let err = run_command(&path, Command::Fleet { action: FleetAction::List }).unwrap_err();
        assert_eq!(err.code_str(), "GRADMIN_CLI_FLEET_ERROR");
    }

    #[test]
    fn test_option_value_accepts_bare_strings() {
        assert_eq!(option_value("42"), json!(42));
        assert_eq!(option_value("null"), Value::Null);
        assert_eq!(option_value("\"east\""), json!("east"));
        assert_eq!(option_value("east"), json!("east"));
    }
}
