//! Reading and writing the metadata document on live instances.

use crate::changes::ChangeSet;
use crate::context::AdminContext;
use crate::errors::{AdminError, AdminResult};
use crate::gateway::{Probe, Statement};
use crate::observability::{log_event, Event};
use crate::topology::InstanceAddress;

use super::document::TopologyMetadata;
use super::errors::MetadataError;

/// Metadata stored on `address`, if any.
pub fn read_from(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<Option<TopologyMetadata>> {
    let rows = ctx.query(address, Probe::Metadata)?;
    match rows.first().and_then(|r| r.opt_str("document")) {
        Some(document) => Ok(Some(TopologyMetadata::from_document(document)?)),
        None => Ok(None),
    }
}

/// Metadata stored on `address`; a missing document is an error.
pub fn load(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<TopologyMetadata> {
    read_from(ctx, address)?
        .ok_or_else(|| AdminError::from(MetadataError::Missing(address.to_string())))
}

/// Write the document on `target`, which must accept writes.
pub fn store(
    changes: &mut ChangeSet<'_>,
    target: &InstanceAddress,
    metadata: &mut TopologyMetadata,
) -> AdminResult<()> {
    metadata.touch();
    let document = metadata.to_document()?;
    changes.apply(target, Statement::StoreMetadata { document })?;
    if !changes.is_dry_run() {
        log_event(
            Event::MetadataWritten,
            &[
                ("generation", metadata.generation.to_string().as_str()),
                ("instance", target.to_string().as_str()),
            ],
        );
    }
    Ok(())
}
