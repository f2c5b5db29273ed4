//! Provisioning method selection
//!
//! `incremental` replays retained binary logs and is safe when the joiner
//! has no errant transactions and some donor still retains everything the
//! joiner lacks. `clone` replaces the joiner's data with a snapshot of a
//! donor. `auto` picks by the same rule; errant transactions are never
//! silently discarded.

use crate::context::AdminContext;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::GtidSet;
use crate::observability::{log_event, Event};
use crate::topology::{InstanceAddress, RecoveryMethod};

/// What the decision is based on.
#[derive(Debug, Clone)]
pub struct ProvisioningInput<'a> {
    pub target: &'a InstanceAddress,
    pub requested: RecoveryMethod,
    /// Transactions executed by the joiner.
    pub target_executed: &'a GtidSet,
    /// Transactions executed by the topology being joined.
    pub source_executed: &'a GtidSet,
    /// Purged sets of the possible donors.
    pub donor_purged: Vec<GtidSet>,
    /// Both ends support clone and the cluster allows it.
    pub clone_available: bool,
}

/// Chosen method, `Incremental` or `Clone`.
pub fn select_method(ctx: &AdminContext, input: &ProvisioningInput<'_>) -> AdminResult<RecoveryMethod> {
    let errant = input.target_executed.subtract(input.source_executed);
    let missing = input.source_executed.subtract(input.target_executed);
    let recoverable = input
        .donor_purged
        .iter()
        .any(|purged| missing.intersect(purged).is_empty());
    let output = ctx.output();

    let method = match input.requested {
        RecoveryMethod::Incremental => {
            if !errant.is_empty() {
                return Err(errant_error(input.target, &errant));
            }
            if !recoverable {
                return Err(AdminError::precondition(
                    AdminErrorKind::ProvisioningUnavailable,
                    format!(
                        "Cannot use recoveryMethod=incremental for '{}': the binary logs needed \
                         to recover it were purged from every available donor. Use \
                         recoveryMethod=clone instead.",
                        input.target
                    ),
                ));
            }
            RecoveryMethod::Incremental
        }
        RecoveryMethod::Clone => {
            require_clone(input)?;
            output.note(format!(
                "The data of instance '{}' will be overwritten by a clone of the cluster.",
                input.target
            ));
            RecoveryMethod::Clone
        }
        RecoveryMethod::Auto => {
            if !errant.is_empty() {
                output.warning(format!(
                    "A GTID set check of '{}' determined that it contains transactions that do \
                     not originate from the cluster: {}",
                    input.target, errant
                ));
                if input.clone_available && ask_clone(ctx, "Clone the instance, discarding its transactions?") {
                    RecoveryMethod::Clone
                } else {
                    return Err(errant_error(input.target, &errant));
                }
            } else if recoverable {
                if !missing.is_empty() || input.target_executed.is_empty() {
                    output.note(format!(
                        "Incremental state recovery was selected because it seems to be safely \
                         usable for '{}'.",
                        input.target
                    ));
                }
                RecoveryMethod::Incremental
            } else if input.clone_available {
                output.note(format!(
                    "The transactions '{}' lacks were purged from the binary logs of every donor; \
                     clone based recovery is required.",
                    input.target
                ));
                if ctx.console().is_interactive()
                    && !ask_clone(ctx, "Proceed with clone based recovery?")
                {
                    return Err(AdminError::precondition(
                        AdminErrorKind::Aborted,
                        "Operation cancelled by user.",
                    ));
                }
                RecoveryMethod::Clone
            } else {
                return Err(AdminError::precondition(
                    AdminErrorKind::ProvisioningUnavailable,
                    format!(
                        "Instance '{}' cannot be provisioned: its missing transactions were purged \
                         and clone is not available.",
                        input.target
                    ),
                ));
            }
        }
    };
    log_event(
        Event::ProvisioningSelected,
        &[
            ("instance", input.target.to_string().as_str()),
            ("method", method.as_str()),
        ],
    );
    Ok(method)
}

fn require_clone(input: &ProvisioningInput<'_>) -> AdminResult<()> {
    if input.clone_available {
        Ok(())
    } else {
        Err(AdminError::precondition(
            AdminErrorKind::ProvisioningUnavailable,
            format!(
                "Cannot use recoveryMethod=clone for '{}': clone is disabled for the cluster or \
                 not supported by the server versions involved.",
                input.target
            ),
        ))
    }
}

fn ask_clone(ctx: &AdminContext, question: &str) -> bool {
    let console = ctx.console();
    if !console.is_interactive() {
        return false;
    }
    console.prompt_choice(question, &["Clone", "Abort"]) == Some(0)
}

fn errant_error(target: &InstanceAddress, errant: &GtidSet) -> AdminError {
    AdminError::precondition(
        AdminErrorKind::ErrantTransactions,
        format!(
            "Instance '{}' has errant transactions that do not exist in the cluster: {}. \
             Use recoveryMethod=clone to overwrite its data.",
            target, errant
        ),
    )
}
