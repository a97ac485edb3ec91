use crate::context::Context;
use crate::executor::{Behavior, Invocation};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

/// Writes the current UTC time (RFC 3339) into the property.
///
/// Typically annotated for `ON_CREATE` on a `created_at` property and
/// `ON_(CREATE|UPDATE)` on an `updated_at` property.
pub struct StampTimestamp;

impl StampTimestamp {
    pub const IDENTITY: &'static str = "stamp_timestamp";
}

#[async_trait]
impl Behavior for StampTimestamp {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    async fn invoke(&self, _ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        call.model
            .set(call.property, Value::String(Utc::now().to_rfc3339()));
        Ok(())
    }
}
