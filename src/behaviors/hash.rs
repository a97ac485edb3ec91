use crate::context::Context;
use crate::executor::{Behavior, Invocation};
use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;

/// Replaces the property's plaintext value with its bcrypt hash.
///
/// On update the property is only re-hashed when the incoming value differs
/// from the stored one, so writing a model back unchanged does not re-hash a
/// hash. An optional first static arg overrides the bcrypt cost factor.
pub struct HashField;

impl HashField {
    pub const IDENTITY: &'static str = "hash_field";
}

#[async_trait]
impl Behavior for HashField {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    async fn invoke(&self, _ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        let Some(Value::String(plaintext)) = call.model.get(call.property) else {
            return Ok(());
        };
        if plaintext.is_empty() {
            return Ok(());
        }

        if let Some(previous) = call.previous {
            if previous.get(call.property) == Some(Value::String(plaintext.clone())) {
                return Ok(());
            }
        }

        let cost = match call.args.first() {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|c| u32::try_from(c).ok())
                .context("bcrypt cost must fit in u32")?,
            _ => bcrypt::DEFAULT_COST,
        };

        let hashed = bcrypt::hash(&plaintext, cost)
            .with_context(|| format!("hashing property '{}'", call.property))?;
        call.model.set(call.property, Value::String(hashed));
        Ok(())
    }
}
