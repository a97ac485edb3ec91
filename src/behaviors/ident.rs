use crate::context::Context;
use crate::executor::{Behavior, Invocation};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Fills an empty id property with a fresh v4 UUID on create.
///
/// A value already present is left alone, so callers may supply their own
/// identifiers.
pub struct AssignUuid;

impl AssignUuid {
    pub const IDENTITY: &'static str = "assign_uuid";
}

#[async_trait]
impl Behavior for AssignUuid {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    async fn invoke(&self, _ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        let empty = match call.model.get(call.property) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if empty {
            call.model.set(
                call.property,
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        Ok(())
    }
}
