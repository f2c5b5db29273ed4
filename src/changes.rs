//! Change tracking, dry-run and revert
//!
//! Every mutating statement of an operation goes through a [`ChangeSet`].
//! In dry-run mode statements are only recorded as planned actions. In
//! normal mode each applied change may register its inverse; if the
//! operation fails midway, [`ChangeSet::revert`] undoes the registered
//! changes newest first and reports the outcome.

use crate::context::AdminContext;
use crate::errors::{AdminError, AdminResult};
use crate::gateway::{Rows, Statement};
use crate::observability::{log_event, Event};
use crate::topology::InstanceAddress;

struct UndoStep {
    address: InstanceAddress,
    statement: Statement,
}

pub struct ChangeSet<'a> {
    ctx: &'a AdminContext,
    dry_run: bool,
    undo: Vec<UndoStep>,
}

impl<'a> ChangeSet<'a> {
    pub fn new(ctx: &'a AdminContext, dry_run: bool) -> Self {
        if dry_run {
            ctx.output()
                .note("dryRun option was specified. Validations will be executed, but no changes will be applied.");
        }
        Self {
            ctx,
            dry_run,
            undo: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn ctx(&self) -> &'a AdminContext {
        self.ctx
    }

    /// Apply a mutating statement, or record it when in dry-run mode.
    pub fn apply(&mut self, address: &InstanceAddress, statement: Statement) -> AdminResult<Rows> {
        if self.dry_run {
            let text = statement.to_string();
            log_event(
                Event::StatementPlanned,
                &[("instance", address.to_string().as_str()), ("statement", text.as_str())],
            );
            self.ctx
                .output()
                .info(format!("[dryRun] {}: {}", address, text));
            return Ok(Vec::new());
        }
        self.ctx.execute(address, &statement)
    }

    /// Apply a statement and register the statement that undoes it.
    pub fn apply_reversible(
        &mut self,
        address: &InstanceAddress,
        statement: Statement,
        inverse: Statement,
    ) -> AdminResult<Rows> {
        let rows = self.apply(address, statement)?;
        self.on_revert(address, inverse);
        Ok(rows)
    }

    /// Register an undo step for a change made outside [`ChangeSet::apply`].
    pub fn on_revert(&mut self, address: &InstanceAddress, inverse: Statement) {
        if !self.dry_run {
            self.undo.push(UndoStep {
                address: address.clone(),
                statement: inverse,
            });
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Keep every applied change.
    pub fn commit(self) {}

    /// Undo registered changes newest first and hand back `error`.
    pub fn revert(self, error: AdminError) -> AdminError {
        if self.undo.is_empty() {
            return error;
        }
        let output = self.ctx.output();
        output.error(error.to_string());
        output.info("Reverting changes...");
        log_event(Event::RollbackBegin, &[("reason", error.message.as_str())]);

        let mut failures = Vec::new();
        for step in self.undo.into_iter().rev() {
            if let Err(e) = self.ctx.execute(&step.address, &step.statement) {
                log_event(
                    Event::RollbackStepFailed,
                    &[
                        ("instance", step.address.to_string().as_str()),
                        ("error", e.to_string().as_str()),
                    ],
                );
                failures.push(format!("{}: {} ({})", step.address, step.statement, e));
            }
        }

        if failures.is_empty() {
            output.info("Changes successfully reverted.");
            log_event(Event::RollbackComplete, &[]);
        } else {
            output.warning(format!(
                "Some changes could not be reverted and need manual cleanup: {}",
                failures.join("; ")
            ));
        }
        error
    }
}

/// Run `body` with a change set; revert on failure, commit on success.
pub fn run_reverting<T>(
    ctx: &AdminContext,
    dry_run: bool,
    body: impl FnOnce(&mut ChangeSet<'_>) -> AdminResult<T>,
) -> AdminResult<T> {
    let mut changes = ChangeSet::new(ctx, dry_run);
    match body(&mut changes) {
        Ok(value) => {
            changes.commit();
            Ok(value)
        }
        Err(e) => Err(changes.revert(e)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::{AccountSpec, SimFleet};

    fn account(user: &str) -> Statement {
        Statement::CreateAccount(AccountSpec {
            user: user.to_string(),
            host: "%".to_string(),
            password: Some("x".to_string()),
            cert_issuer: None,
            cert_subject: None,
        })
    }

    fn drop_account(user: &str) -> Statement {
        Statement::DropAccount {
            user: user.to_string(),
            host: "%".to_string(),
        }
    }

    #[test]
    fn test_revert_undoes_applied_changes() {
        let fleet = SimFleet::new();
        let a = InstanceAddress::new("h", 3310);
        fleet.add_server(&a);
        let ctx = AdminContext::non_interactive(Arc::new(fleet.clone()));

        let result: AdminResult<()> = run_reverting(&ctx, false, |changes| {
            changes.apply_reversible(&a, account("u1"), drop_account("u1"))?;
            Err(AdminError::internal("boom"))
        });
        assert!(result.is_err());
        assert!(fleet.accounts(&a).is_empty());
        assert!(ctx.output().contains("Changes successfully reverted."));
    }

    #[test]
    fn test_dry_run_records_only() {
        let fleet = SimFleet::new();
        let a = InstanceAddress::new("h", 3310);
        fleet.add_server(&a);
        let ctx = AdminContext::non_interactive(Arc::new(fleet.clone()));

        run_reverting(&ctx, true, |changes| {
            changes.apply_reversible(&a, account("u1"), drop_account("u1"))?;
            Ok(())
        })
        .unwrap();
        assert!(fleet.accounts(&a).is_empty());
        assert!(ctx.output().contains("[dryRun] h:3310: CREATE USER 'u1'@'%'"));
    }
}
