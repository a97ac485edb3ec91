use crate::context::Context;
use crate::executor::{Behavior, Invocation};
use anyhow::bail;
use async_trait::async_trait;

/// Blocks a property from changing after creation.
///
/// Registered for `ON_UPDATE`; fails the pipeline when the incoming value
/// differs from the previous model's. A property absent from the incoming
/// model is treated as unchanged.
pub struct Immutable;

impl Immutable {
    pub const IDENTITY: &'static str = "immutable";
}

#[async_trait]
impl Behavior for Immutable {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    async fn invoke(&self, _ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        let Some(previous) = call.previous else {
            bail!("immutability of '{}' requires the previous model", call.property);
        };

        let Some(incoming) = call.model.get(call.property) else {
            return Ok(());
        };
        if previous.get(call.property).as_ref() != Some(&incoming) {
            bail!("property '{}' is immutable", call.property);
        }
        Ok(())
    }
}
