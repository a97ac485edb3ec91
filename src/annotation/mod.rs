// ============================================================================
// Annotation Layer
// ============================================================================
//
// The declarative API that records behavior descriptors into the operation
// registry. A thin producer: applying an annotation registers one descriptor
// per expanded operation key, idempotently, no matter how many times the
// declaring module is evaluated.
//
// ============================================================================

use crate::core::{OperationKey, OrderingHints, Result};
use crate::model::ModelType;
use crate::registry::{BehaviorDescriptor, OperationRegistry};
use serde_json::Value;
use std::sync::Arc;

/// Builder for one per-property behavior declaration.
///
/// ```
/// use modelhooks::annotation::Annotation;
/// use modelhooks::model::ModelType;
/// use modelhooks::registry::OperationRegistry;
/// use std::sync::Arc;
///
/// static ENTITY: ModelType = ModelType::root("Entity");
///
/// # fn main() -> modelhooks::Result<()> {
/// let registry = Arc::new(OperationRegistry::new());
///
/// Annotation::new("stamp_timestamp")
///     .operations("ON_(CREATE|UPDATE)")
///     .priority(10)
///     .apply_with(&registry, &ENTITY, "updated_at")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Annotation {
    identity: String,
    operations: String,
    args: Vec<Value>,
    ordering: Option<OrderingHints>,
}

impl Annotation {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            operations: String::new(),
            args: Vec::new(),
            ordering: None,
        }
    }

    /// Operation keys this behavior applies to, as an anchored pattern over
    /// the rendered keys (`ON_CREATE`, `(ON|AFTER)_UPDATE`, ...).
    pub fn operations(mut self, pattern: impl Into<String>) -> Self {
        self.operations = pattern.into();
        self
    }

    /// Append one static argument passed to the behavior on every invocation.
    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    /// Replace the static argument list.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.ordering.get_or_insert_with(OrderingHints::default).priority = priority;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.ordering.get_or_insert_with(OrderingHints::default).group = Some(group.into());
        self
    }

    pub fn group_priority(mut self, group_priority: i32) -> Self {
        self.ordering
            .get_or_insert_with(OrderingHints::default)
            .group_priority = group_priority;
        self
    }

    /// Register this declaration for `property` on `class` in the global
    /// registry.
    pub fn apply(self, class: &'static ModelType, property: &str) -> Result<()> {
        self.apply_with(&OperationRegistry::global(), class, property)
    }

    /// Register against an explicit registry (test isolation).
    pub fn apply_with(
        self,
        registry: &Arc<OperationRegistry>,
        class: &'static ModelType,
        property: &str,
    ) -> Result<()> {
        for operation in OperationKey::expand(&self.operations)? {
            let mut descriptor =
                BehaviorDescriptor::new(operation, self.identity.clone(), class.name)
                    .with_args(self.args.clone());
            if let Some(ordering) = self.ordering.clone() {
                descriptor = descriptor.with_ordering(ordering);
            }
            registry.register(class, property, descriptor)?;
        }
        Ok(())
    }
}
