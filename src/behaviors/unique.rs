use crate::context::Context;
use crate::executor::{Behavior, Invocation};
use crate::repository::{STORAGE_PROBE, StorageProbe};
use anyhow::{Context as _, bail};
use async_trait::async_trait;

/// Rejects the operation when another record already holds the property's
/// value.
///
/// Scans the repository's collection through the storage probe the
/// repository puts into the operation context; records sharing the model's
/// own id are skipped, so updates do not conflict with themselves.
pub struct UniqueField;

impl UniqueField {
    pub const IDENTITY: &'static str = "unique_field";
}

#[async_trait]
impl Behavior for UniqueField {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    async fn invoke(&self, ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        let Some(candidate) = call.model.get(call.property) else {
            return Ok(());
        };

        let probe = ctx
            .extension::<StorageProbe>(STORAGE_PROBE)?
            .context("uniqueness check needs a storage probe in the context")?;

        let own_id = call.model.get("id");
        let records = probe.store.scan(&probe.collection).await?;
        for record in records {
            if own_id.is_some() && record.get("id") == own_id.as_ref() {
                continue;
            }
            if record.get(call.property) == Some(&candidate) {
                bail!(
                    "value of '{}' is already taken in '{}'",
                    call.property,
                    probe.collection
                );
            }
        }
        Ok(())
    }
}
