// ============================================================================
// Model Capability Interface
// ============================================================================
//
// Concrete model types implement `Model` instead of inheriting from a shared
// base class; class identity and the inheritance chain are explicit data
// (`ModelType`), so hook resolution is ordinary chain traversal.
//
// ============================================================================

use crate::core::{HookError, Result};
use serde_json::{Map, Value};

/// Identity of a model class and its position in an inheritance chain.
///
/// Declared as statics so identity is stable process-wide:
///
/// ```
/// use modelhooks::model::ModelType;
///
/// static ENTITY: ModelType = ModelType::root("Entity");
/// static USER: ModelType = ModelType::extends("User", &ENTITY);
///
/// assert_eq!(USER.lineage(), vec!["User", "Entity"]);
/// ```
#[derive(Debug)]
pub struct ModelType {
    pub name: &'static str,
    pub parent: Option<&'static ModelType>,
}

impl ModelType {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn extends(name: &'static str, parent: &'static ModelType) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// Walk the chain most-derived first, terminating at the root.
    pub fn chain(&'static self) -> impl Iterator<Item = &'static ModelType> {
        ChainIter { next: Some(self) }
    }

    /// Class names, most-derived first.
    pub fn lineage(&'static self) -> Vec<&'static str> {
        self.chain().map(|t| t.name).collect()
    }
}

struct ChainIter {
    next: Option<&'static ModelType>,
}

impl Iterator for ChainIter {
    type Item = &'static ModelType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent;
        Some(current)
    }
}

/// Property-level access behaviors need to read and mutate a model in place.
pub trait Model: Send + Sync {
    fn model_type(&self) -> &'static ModelType;

    fn get(&self, property: &str) -> Option<Value>;

    fn set(&mut self, property: &str, value: Value);

    fn property_names(&self) -> Vec<String>;
}

/// JSON-map-backed model used by the repository layer and tests.
#[derive(Debug, Clone)]
pub struct DynamicModel {
    model_type: &'static ModelType,
    fields: Map<String, Value>,
}

impl DynamicModel {
    pub fn new(model_type: &'static ModelType) -> Self {
        Self {
            model_type,
            fields: Map::new(),
        }
    }

    /// Build a model from a JSON object.
    pub fn from_value(model_type: &'static ModelType, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { model_type, fields }),
            other => Err(HookError::Consistency(format!(
                "model record for '{}' must be a JSON object, got {other}",
                model_type.name
            ))),
        }
    }

    /// The model's fields as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Builder-style field assignment.
    pub fn with(mut self, property: impl Into<String>, value: Value) -> Self {
        self.fields.insert(property.into(), value);
        self
    }

    /// The `id` property as a string, if present and non-empty.
    pub fn id(&self) -> Option<String> {
        match self.fields.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

impl Model for DynamicModel {
    fn model_type(&self) -> &'static ModelType {
        self.model_type
    }

    fn get(&self, property: &str) -> Option<Value> {
        self.fields.get(property).cloned()
    }

    fn set(&mut self, property: &str, value: Value) {
        self.fields.insert(property.to_string(), value);
    }

    fn property_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}
