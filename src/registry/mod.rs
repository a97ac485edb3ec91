// ============================================================================
// Operation Registry
// ============================================================================
//
// Process-wide table mapping (declaring class, property, operation key) to
// the behavior descriptors declared there, plus the handler implementations
// keyed by their stable identity. Resolution walks a model's inheritance
// chain and merges re-declarations of the same handler.
//
// ============================================================================

use crate::core::{HookError, OperationKey, OrderingHints, Result};
use crate::executor::Behavior;
use crate::model::ModelType;
use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One registered annotation instance.
///
/// `handler_identity` is an explicit stable identifier; the same identity
/// re-declared lower in a class hierarchy re-parameterizes the inherited
/// behavior instead of adding a second invocation.
#[derive(Debug, Clone)]
pub struct BehaviorDescriptor {
    pub operation_key: OperationKey,
    pub handler_identity: String,
    pub static_args: Vec<Value>,
    pub ordering: Option<OrderingHints>,
    pub declaring_class: &'static str,
    /// Registration sequence, used as the stable base order across properties.
    pub(crate) seq: u64,
}

impl BehaviorDescriptor {
    pub fn new(
        operation_key: OperationKey,
        handler_identity: impl Into<String>,
        declaring_class: &'static str,
    ) -> Self {
        Self {
            operation_key,
            handler_identity: handler_identity.into(),
            static_args: Vec::new(),
            ordering: None,
            declaring_class,
            seq: 0,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.static_args = args;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingHints) -> Self {
        self.ordering = Some(ordering);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    class: &'static str,
    property: String,
    operation: OperationKey,
}

/// Process-wide registry of behavior declarations and handler implementations.
///
/// The global instance is replaceable via [`OperationRegistry::set_global`]
/// so test suites can swap in a fresh one; replacement affects subsequent
/// registrations and resolutions only.
pub struct OperationRegistry {
    entries: RwLock<HashMap<RegistryKey, Vec<BehaviorDescriptor>>>,
    handlers: RwLock<HashMap<String, Arc<dyn Behavior>>>,
    sequence: AtomicU64,
}

lazy_static! {
    static ref GLOBAL_REGISTRY: RwLock<Arc<OperationRegistry>> =
        RwLock::new(Arc::new(OperationRegistry::new()));
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(1),
        }
    }

    /// Get the global registry instance shared by annotation declarations.
    pub fn global() -> Arc<OperationRegistry> {
        GLOBAL_REGISTRY
            .read()
            .map(|g| Arc::clone(&g))
            .unwrap_or_else(|poison| Arc::clone(&poison.into_inner()))
    }

    /// Replace the global registry; in-flight executors keep their old handle.
    pub fn set_global(registry: Arc<OperationRegistry>) {
        match GLOBAL_REGISTRY.write() {
            Ok(mut g) => *g = registry,
            Err(poison) => *poison.into_inner() = registry,
        }
        log::debug!("operation registry replaced");
    }

    /// Record one declaration at `(class, property, descriptor.operation_key)`.
    ///
    /// Idempotent: the same `handler_identity` at the same key is a no-op, so
    /// a declaration evaluated more than once registers exactly once. Returns
    /// whether a new entry was recorded.
    pub fn register(
        &self,
        class: &'static ModelType,
        property: &str,
        mut descriptor: BehaviorDescriptor,
    ) -> Result<bool> {
        let key = RegistryKey {
            class: class.name,
            property: property.to_string(),
            operation: descriptor.operation_key,
        };

        let mut entries = self.entries.write()?;
        let slot = entries.entry(key).or_default();
        if slot
            .iter()
            .any(|existing| existing.handler_identity == descriptor.handler_identity)
        {
            return Ok(false);
        }

        descriptor.seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        slot.push(descriptor);
        Ok(true)
    }

    /// Store the executable handler under its identity. Last wins, so tests
    /// can stub a behavior out.
    pub fn register_handler(&self, handler: Arc<dyn Behavior>) -> Result<()> {
        self.handlers
            .write()?
            .insert(handler.identity().to_string(), handler);
        Ok(())
    }

    /// Look up a handler implementation by identity.
    pub fn handler(&self, identity: &str) -> Result<Option<Arc<dyn Behavior>>> {
        Ok(self.handlers.read()?.get(identity).cloned())
    }

    /// Ordered union of descriptors for `operation` at `property` across the
    /// model's inheritance chain.
    ///
    /// Ancestor-declared descriptors come first; a re-declaration of the same
    /// handler identity lower in the chain keeps the ancestor's slot but takes
    /// the most-derived declaration's args and ordering hints.
    pub fn resolve(
        &self,
        model_type: &'static ModelType,
        property: &str,
        operation: OperationKey,
    ) -> Result<Vec<BehaviorDescriptor>> {
        let entries = self.entries.read()?;

        let mut chain: Vec<&'static ModelType> = model_type.chain().collect();
        chain.reverse(); // root first

        let mut resolved: Vec<BehaviorDescriptor> = Vec::new();
        let mut by_identity: HashMap<String, usize> = HashMap::new();

        for class in chain {
            let key = RegistryKey {
                class: class.name,
                property: property.to_string(),
                operation,
            };
            let Some(declared) = entries.get(&key) else {
                continue;
            };
            for descriptor in declared {
                match by_identity.get(&descriptor.handler_identity) {
                    Some(&index) => {
                        // Most-derived declaration re-parameterizes the
                        // inherited behavior in place.
                        let slot = &mut resolved[index];
                        slot.static_args = descriptor.static_args.clone();
                        slot.ordering = descriptor.ordering.clone();
                        slot.declaring_class = descriptor.declaring_class;
                    }
                    None => {
                        by_identity
                            .insert(descriptor.handler_identity.clone(), resolved.len());
                        resolved.push(descriptor.clone());
                    }
                }
            }
        }

        Ok(resolved)
    }

    /// Every property across the chain with at least one descriptor for
    /// `operation`, ordered by earliest registration.
    pub fn properties_for(
        &self,
        model_type: &'static ModelType,
        operation: OperationKey,
    ) -> Result<Vec<String>> {
        let entries = self.entries.read()?;
        let chain: Vec<&'static str> = model_type.chain().map(|t| t.name).collect();

        let mut first_seen: HashMap<&str, u64> = HashMap::new();
        for (key, declared) in entries.iter() {
            if key.operation != operation || !chain.contains(&key.class) {
                continue;
            }
            let min_seq = declared.iter().map(|d| d.seq).min().unwrap_or(u64::MAX);
            first_seen
                .entry(key.property.as_str())
                .and_modify(|seq| *seq = (*seq).min(min_seq))
                .or_insert(min_seq);
        }

        let mut properties: Vec<(&str, u64)> = first_seen.into_iter().collect();
        properties.sort_by_key(|&(_, seq)| seq);
        Ok(properties
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect())
    }

    /// Fetch the handler for every resolved descriptor.
    ///
    /// A descriptor whose identity has no registered handler is an internal
    /// consistency violation and fails fatally.
    pub fn resolve_handlers(
        &self,
        descriptors: &[BehaviorDescriptor],
    ) -> Result<Vec<Arc<dyn Behavior>>> {
        let handlers = self.handlers.read()?;
        descriptors
            .iter()
            .map(|descriptor| {
                handlers
                    .get(&descriptor.handler_identity)
                    .cloned()
                    .ok_or_else(|| {
                        HookError::Consistency(format!(
                            "behavior '{}' was declared on '{}' but never registered",
                            descriptor.handler_identity, descriptor.declaring_class
                        ))
                    })
            })
            .collect()
    }
}
