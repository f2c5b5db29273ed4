//! Bounded waits on remote state.
//!
//! Every wait polls at the fixed interval of the engine settings and runs
//! at least one poll. State waits are bounded by the attempt budget, sync
//! waits by the caller's timeout only.

use std::thread;
use std::time::{Duration, Instant};

use super::probe::{channels, gtid_state, local_group_state};
use crate::context::AdminContext;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::GtidSet;
use crate::topology::{InstanceAddress, MemberState};

/// Wait until the member reports one of `accepted`.
///
/// Reaching ERROR when it is not accepted fails right away.
pub fn wait_for_member_state(
    ctx: &AdminContext,
    address: &InstanceAddress,
    accepted: &[MemberState],
) -> AdminResult<MemberState> {
    let attempts = ctx.settings().state_wait_attempts.max(1);
    let mut last_error = None;
    for attempt in 0..attempts {
        match local_group_state(ctx, address) {
            Ok(local) => {
                let state = if local.running {
                    local.member_state
                } else {
                    MemberState::Offline
                };
                if accepted.contains(&state) {
                    return Ok(state);
                }
                if state == MemberState::Error {
                    return Err(AdminError::new(
                        AdminErrorKind::ReplicationThreadError,
                        format!(
                            "The instance '{}' entered the ERROR state while joining the group. \
                             Check its error log for details.",
                            address
                        ),
                    ));
                }
                last_error = None;
            }
            Err(e) => last_error = Some(e),
        }
        if attempt + 1 < attempts {
            thread::sleep(ctx.settings().poll_interval);
        }
    }
    if let Some(e) = last_error {
        return Err(e);
    }
    let expected: Vec<&str> = accepted.iter().map(|s| s.as_str()).collect();
    Err(AdminError::state_timeout(address, &expected.join(" or ")))
}

/// Fail if a replication applier of the instance reports an error.
pub fn check_appliers(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<()> {
    let failed = channels(ctx, address)?
        .into_iter()
        .find(|c| c.sql_error_number != 0);
    match failed {
        Some(channel) => Err(AdminError::new(
            AdminErrorKind::ReplicationThreadError,
            format!(
                "Applier error in replication channel '{}' on instance '{}': {} ({}).",
                channel.channel, address, channel.sql_error_message, channel.sql_error_number
            ),
        )),
        None => Ok(()),
    }
}

/// Wait until `address` has executed every transaction of `target`.
///
/// `None` waits as long as it takes; an applier error ends the wait.
pub fn wait_for_sync(
    ctx: &AdminContext,
    address: &InstanceAddress,
    target: &GtidSet,
    timeout: Option<Duration>,
) -> AdminResult<()> {
    let started = Instant::now();
    loop {
        let (executed, _) = gtid_state(ctx, address)?;
        if target.is_subset_of(&executed) {
            return Ok(());
        }
        check_appliers(ctx, address)?;
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(AdminError::sync_timeout(address, limit.as_secs()));
            }
        }
        thread::sleep(ctx.settings().poll_interval);
    }
}

/// Wait until `address` caught up with everything `source` has executed.
pub fn sync_with(
    ctx: &AdminContext,
    address: &InstanceAddress,
    source: &InstanceAddress,
    timeout: Option<Duration>,
) -> AdminResult<()> {
    let (target, _) = gtid_state(ctx, source)?;
    wait_for_sync(ctx, address, &target, timeout)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::console::NonInteractiveConsole;
    use crate::context::EngineSettings;
    use crate::gateway::SimFleet;

    fn fast_context(fleet: &SimFleet) -> AdminContext {
        let settings = EngineSettings {
            poll_interval: Duration::from_millis(1),
            state_wait_attempts: 3,
            ..EngineSettings::default()
        };
        AdminContext::new(Arc::new(fleet.clone()), Arc::new(NonInteractiveConsole), settings)
    }

    #[test]
    fn test_sync_timeout_is_reported() {
        let fleet = SimFleet::new();
        let a = InstanceAddress::new("h", 3310);
        let source = fleet.add_server(&a);
        let ctx = fast_context(&fleet);
        let mut target = GtidSet::new();
        target.add(source, 5);

        let err = wait_for_sync(&ctx, &a, &target, Some(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::SyncTimeout);
    }

    #[test]
    fn test_sync_done_on_first_poll() {
        let fleet = SimFleet::new();
        let a = InstanceAddress::new("h", 3310);
        fleet.add_server(&a);
        fleet.write_transactions(&a, 2).unwrap();
        let ctx = fast_context(&fleet);
        let target = fleet.gtid_executed(&a).unwrap();
        wait_for_sync(&ctx, &a, &target, Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn test_state_wait_budget() {
        let fleet = SimFleet::new();
        let a = InstanceAddress::new("h", 3310);
        fleet.add_server(&a);
        let ctx = fast_context(&fleet);
        assert_eq!(
            wait_for_member_state(&ctx, &a, &[MemberState::Offline]).unwrap(),
            MemberState::Offline
        );
        let err = wait_for_member_state(&ctx, &a, &[MemberState::Online]).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::StateTimeout);
    }
}
