// ============================================================================
// Hook Executor
// ============================================================================
//
// Resolves every participating property's behaviors for one operation,
// orders them globally by explicit priority across all properties, and runs
// them as a strictly sequential asynchronous pipeline that short-circuits on
// the first failure.
//
// ============================================================================

use crate::context::Context;
use crate::core::{CrudVerb, HookError, OperationKey, Phase, Result};
use crate::model::{Model, ModelType};
use crate::registry::{BehaviorDescriptor, OperationRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// One call into a behavior: the property it was declared on, the merged
/// static args, and the model (plus its previous version on update).
pub struct Invocation<'a> {
    pub property: &'a str,
    pub args: &'a [Value],
    pub model: &'a mut dyn Model,
    pub previous: Option<&'a dyn Model>,
}

/// A unit of logic executed automatically around a CRUD operation for one
/// property.
///
/// Behaviors may read and mutate the model in place and may suspend (perform
/// I/O). Failures are returned as plain `anyhow` errors and propagate to the
/// repository caller verbatim; the executor never retries.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Stable identity used to detect the same behavior re-declared across a
    /// class hierarchy. Never derived from the implementation itself.
    fn identity(&self) -> &'static str;

    async fn invoke(&self, ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()>;
}

struct PlannedStep {
    property: String,
    descriptor: BehaviorDescriptor,
    handler: Arc<dyn Behavior>,
}

/// The ordered execution sequence computed once per `enforce` call.
pub struct ResolvedPlan {
    steps: Vec<PlannedStep>,
}

impl ResolvedPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `(property, handler identity)` pairs in execution order.
    pub fn sequence(&self) -> Vec<(String, String)> {
        self.steps
            .iter()
            .map(|s| (s.property.clone(), s.descriptor.handler_identity.clone()))
            .collect()
    }
}

/// Executes the resolved behavior pipeline for repository operations.
#[derive(Clone)]
pub struct HookExecutor {
    registry: Arc<OperationRegistry>,
}

impl Default for HookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HookExecutor {
    /// Executor over the global registry.
    pub fn new() -> Self {
        Self {
            registry: OperationRegistry::global(),
        }
    }

    /// Executor over an explicit registry (test isolation).
    pub fn with_registry(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Compute the globally ordered plan for one operation on one model type.
    ///
    /// Ordering: ascending `(priority, group_priority)`; steps without hints
    /// run after all hinted steps, stable in their per-property resolution
    /// order. Ordering is deliberately *not* scoped per property.
    pub fn plan(
        &self,
        model_type: &'static ModelType,
        operation: OperationKey,
    ) -> Result<ResolvedPlan> {
        let mut steps: Vec<PlannedStep> = Vec::new();

        for property in self.registry.properties_for(model_type, operation)? {
            let descriptors = self.registry.resolve(model_type, &property, operation)?;
            let handlers = self.registry.resolve_handlers(&descriptors)?;

            // The merged-args map must line up one-to-one with the handlers.
            if handlers.len() != descriptors.len() {
                return Err(HookError::Consistency(format!(
                    "handlers and argument definitions do not match for '{}.{}'",
                    model_type.name, property
                )));
            }

            for (descriptor, handler) in descriptors.into_iter().zip(handlers) {
                steps.push(PlannedStep {
                    property: property.clone(),
                    descriptor,
                    handler,
                });
            }
        }

        // Global cross-property ordering. Stable sort keeps the resolution
        // order for equal keys and for the hint-less tail.
        steps.sort_by_key(|step| match &step.descriptor.ordering {
            Some(hints) => (0u8, hints.priority as i64, hints.group_priority as i64),
            None => (1u8, 0, 0),
        });

        Ok(ResolvedPlan { steps })
    }

    /// Run every behavior registered for `(phase, verb)` against the model.
    ///
    /// `previous` is required for `UPDATE`+`ON` and ignored elsewhere. The
    /// pipeline is strictly sequential; the first failing behavior aborts the
    /// remainder and its error propagates to the caller unchanged.
    pub async fn enforce(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        verb: CrudVerb,
        phase: Phase,
        previous: Option<&dyn Model>,
    ) -> Result<()> {
        let operation = OperationKey::new(phase, verb);

        if verb == CrudVerb::Update && phase == Phase::On && previous.is_none() {
            return Err(HookError::Consistency(
                "UPDATE requires the previous model for the ON phase".to_string(),
            ));
        }

        let model_type = model.model_type();
        let plan = self.plan(model_type, operation)?;
        if plan.is_empty() {
            return Ok(());
        }

        log::debug!(
            "enforcing {} on {}: {} behavior(s)",
            operation,
            model_type.name,
            plan.len()
        );

        for step in &plan.steps {
            log::trace!(
                "running '{}' on {}.{}",
                step.descriptor.handler_identity,
                model_type.name,
                step.property
            );

            step.handler
                .invoke(
                    ctx,
                    Invocation {
                        property: &step.property,
                        args: &step.descriptor.static_args,
                        model: &mut *model,
                        previous,
                    },
                )
                .await
                .map_err(|source| HookError::Behavior {
                    identity: step.descriptor.handler_identity.clone(),
                    property: step.property.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}
