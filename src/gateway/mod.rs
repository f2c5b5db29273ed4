//! Instance Gateway
//!
//! The orchestrator never talks to a server directly. Every remote action
//! goes through an [`InstanceGateway`] obtained from a [`Connector`]:
//! - read probes are issued liberally and are always safe to repeat
//! - mutating statements are issued conservatively, one at a time
//! - any call may fail with a classified [`GatewayError`]
//!
//! [`SimFleet`] is an in-memory connector that models a fleet of servers,
//! their groups and their asynchronous channels. The CLI persists it as a
//! JSON file and the scenario tests drive the engine against it.

mod errors;
mod gtid;
mod rows;
mod sim;
mod statement;
mod version;

use std::sync::Arc;

pub use errors::{codes, GatewayError, GatewayResult, TransportErrorKind};
pub use gtid::GtidSet;
pub use rows::{single_row, Row, Rows};
pub use sim::{SimFleet, SimServerSpec};
pub use statement::{
    AccountSpec, ChannelConfig, FailoverSource, Probe, Statement, APPLIER_CHANNEL,
    CLUSTERSET_CHANNEL, READ_REPLICA_CHANNEL, RECOVERY_CHANNEL,
};
pub use version::ServerVersion;

use crate::topology::InstanceAddress;

/// Session with one remote instance.
pub trait InstanceGateway: Send + Sync {
    /// Address this session is connected to.
    fn address(&self) -> &InstanceAddress;

    /// Execute a statement and return its result rows.
    fn execute(&self, statement: &Statement) -> GatewayResult<Rows>;

    /// Server version.
    fn version(&self) -> GatewayResult<ServerVersion>;

    /// Value of a system variable, `None` if unset.
    fn variable(&self, name: &str) -> GatewayResult<Option<String>>;

    /// Whether the instance still answers.
    fn is_reachable(&self) -> bool;
}

/// Opens gateway sessions.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &InstanceAddress) -> GatewayResult<Arc<dyn InstanceGateway>>;
}
